//! K-means clustering traits for matrices
//!
//! Provides traits for clustering rows or columns of matrices using the
//! `clustering` crate.

use nalgebra::DMatrix;

/// Arguments for k-means clustering
#[derive(Debug, Clone)]
pub struct KmeansArgs {
    /// Number of clusters
    pub num_clusters: usize,
    /// Maximum number of iterations
    pub max_iter: usize,
}

impl Default for KmeansArgs {
    fn default() -> Self {
        Self {
            num_clusters: 1,
            max_iter: 100,
        }
    }
}

impl KmeansArgs {
    /// Create args with specified number of clusters
    pub fn with_clusters(num_clusters: usize) -> Self {
        Self {
            num_clusters,
            ..Default::default()
        }
    }
}

/// Trait for k-means clustering on matrices
pub trait Kmeans {
    /// Cluster columns and return membership vector, one per column
    fn kmeans_columns(&self, args: KmeansArgs) -> Vec<usize>;

    /// Cluster rows and return membership vector, one per row
    fn kmeans_rows(&self, args: KmeansArgs) -> Vec<usize>;
}

fn kmeans_points<T>(data: Vec<Vec<T>>, args: &KmeansArgs) -> Vec<usize>
where
    Vec<T>: clustering::Elem,
{
    let nn = data.len();
    if args.num_clusters <= 1 || nn == 0 {
        return vec![0; nn];
    }
    if args.num_clusters >= nn {
        return (0..nn).collect();
    }
    clustering::kmeans(args.num_clusters, &data, args.max_iter).membership
}

impl<T> Kmeans for DMatrix<T>
where
    T: nalgebra::Scalar + Sync + Send,
    Vec<T>: clustering::Elem,
{
    fn kmeans_columns(&self, args: KmeansArgs) -> Vec<usize> {
        let data: Vec<Vec<T>> = self
            .column_iter()
            .map(|x| x.iter().cloned().collect())
            .collect();
        kmeans_points(data, &args)
    }

    fn kmeans_rows(&self, args: KmeansArgs) -> Vec<usize> {
        let data: Vec<Vec<T>> = self
            .row_iter()
            .map(|x| x.iter().cloned().collect())
            .collect();
        kmeans_points(data, &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kmeans_columns_single_cluster() {
        let mat = DMatrix::from_row_slice(2, 4, &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let membership = mat.kmeans_columns(KmeansArgs::with_clusters(1));

        assert_eq!(membership.len(), 4);
        assert!(membership.iter().all(|&x| x == 0));
    }

    #[test]
    fn test_kmeans_rows_two_clusters() {
        let mat = DMatrix::from_row_slice(
            4,
            2,
            &[
                0.0f32, 0.0, // A
                0.1, 0.1, // A
                10.0, 10.0, // B
                10.1, 10.1, // B
            ],
        );
        let membership = mat.kmeans_rows(KmeansArgs::with_clusters(2));

        assert_eq!(membership.len(), 4);
        assert_eq!(membership[0], membership[1]);
        assert_eq!(membership[2], membership[3]);
        assert_ne!(membership[0], membership[2]);
    }

    #[test]
    fn test_kmeans_more_clusters_than_rows() {
        let mat = DMatrix::from_row_slice(2, 1, &[0.0f32, 1.0]);
        assert_eq!(mat.kmeans_rows(KmeansArgs::with_clusters(5)), vec![0, 1]);
    }

    #[test]
    fn test_kmeans_empty_matrix() {
        let mat: DMatrix<f32> = DMatrix::zeros(0, 0);
        assert!(mat.kmeans_columns(KmeansArgs::with_clusters(2)).is_empty());
        assert!(mat.kmeans_rows(KmeansArgs::with_clusters(2)).is_empty());
    }
}
