use crate::knn_match::{ColumnDict, MakeVecPoint};
use crate::utils::generate_minibatch_intervals;

use dashmap::DashMap;
use indicatif::ParallelProgressIterator;
use log::info;
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use rayon::prelude::*;

const DEFAULT_BLOCK_SIZE: usize = 1000;

/// Symmetric k-nearest-neighbour graph over the rows (or columns) of a
/// dense matrix
pub struct KnnGraph {
    /// Symmetric CSC adjacency matrix (n_nodes x n_nodes) holding distances
    pub adjacency: CscMatrix<f32>,
    /// Sorted edge list (i < j), deduplicated
    pub edges: Vec<(usize, usize)>,
    /// Edge distances, parallel to `edges`
    pub distances: Vec<f32>,
    /// Number of nodes
    pub n_nodes: usize,
}

#[derive(Clone, Debug)]
pub struct KnnGraphArgs {
    pub knn: usize,
    pub block_size: usize,
    /// If true, keep only reciprocal edges (i→j AND j→i).
    /// If false, keep union edges (i→j OR j→i), using min distance.
    pub reciprocal: bool,
}

impl KnnGraphArgs {
    pub fn union(knn: usize) -> Self {
        Self {
            knn,
            block_size: DEFAULT_BLOCK_SIZE,
            reciprocal: false,
        }
    }
}

fn median_f32(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

impl KnnGraph {
    /// Build a KNN graph from column vectors.
    ///
    /// * `points` - coordinate matrix (d x n), where each column is a point
    /// * `args` - KNN graph construction parameters
    pub fn from_columns(points: &DMatrix<f32>, args: KnnGraphArgs) -> anyhow::Result<KnnGraph> {
        let nn = points.ncols();
        let data = points
            .column_iter()
            .collect::<Vec<_>>()
            .par_iter()
            .map(|x| x.to_vp())
            .collect::<Vec<_>>();
        let dict = ColumnDict::from_points(data, (0..nn).collect());
        Self::build_from_dict(dict, nn, &args)
    }

    /// Build a KNN graph from row vectors (cells × features).
    ///
    /// * `data` - matrix (n x d), where each row is a point
    /// * `args` - KNN graph construction parameters
    pub fn from_rows(data: &DMatrix<f32>, args: KnnGraphArgs) -> anyhow::Result<KnnGraph> {
        Self::from_columns(&data.transpose(), args)
    }

    fn build_from_dict(
        dict: ColumnDict<usize>,
        nn: usize,
        args: &KnnGraphArgs,
    ) -> anyhow::Result<KnnGraph> {
        anyhow::ensure!(nn >= 2, "need at least 2 points for a kNN graph, got {}", nn);
        anyhow::ensure!(args.knn > 0, "knn must be positive");

        let block_size = if args.block_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            args.block_size
        };
        let jobs = generate_minibatch_intervals(nn, block_size);
        let njobs = jobs.len() as u64;

        /////////////////////////////////////////////////////////////////
        // step 1: searching nearest neighbours                        //
        /////////////////////////////////////////////////////////////////

        let triplets: DashMap<(usize, usize), f32> = DashMap::new();

        jobs.into_par_iter().progress_count(njobs).try_for_each(
            |(lb, ub)| -> anyhow::Result<()> {
                for i in lb..ub {
                    let (indices, distances) = dict.search_others(&i, args.knn)?;
                    for (j, d_ij) in indices.into_iter().zip(distances) {
                        triplets.insert((i, j), d_ij);
                    }
                }
                Ok(())
            },
        )?;

        info!("{} triplets by kNN matching", triplets.len());

        if triplets.is_empty() {
            return Err(anyhow::anyhow!("empty triplets"));
        }

        ///////////////////////////////////////////////////
        // step 2: edge filtering (reciprocal or union) //
        ///////////////////////////////////////////////////

        let mut edges: Vec<((usize, usize), f32)> = if args.reciprocal {
            triplets
                .par_iter()
                .filter_map(|entry| {
                    let &(i, j) = entry.key();
                    if i < j && triplets.contains_key(&(j, i)) {
                        Some(((i, j), *entry.value()))
                    } else {
                        None
                    }
                })
                .collect()
        } else {
            triplets
                .par_iter()
                .filter_map(|entry| {
                    let &(i, j) = entry.key();
                    if i < j {
                        let d_ij = *entry.value();
                        let d_ji = triplets.get(&(j, i)).map(|e| *e).unwrap_or(d_ij);
                        Some(((i, j), d_ij.min(d_ji)))
                    } else if i > j && !triplets.contains_key(&(j, i)) {
                        Some(((j, i), *entry.value()))
                    } else {
                        None
                    }
                })
                .collect()
        };

        edges.par_sort_by_key(|&(ij, _)| ij);
        edges.dedup_by_key(|&mut (ij, _)| ij);

        info!(
            "{} edges after {} matching",
            edges.len(),
            if args.reciprocal {
                "reciprocal"
            } else {
                "union"
            }
        );

        Ok(Self::from_edges(nn, edges))
    }

    /// Assemble a graph from canonical `(i < j)` edges and distances
    pub fn from_edges(n_nodes: usize, edges: Vec<((usize, usize), f32)>) -> KnnGraph {
        let mut coo = CooMatrix::new(n_nodes, n_nodes);
        for &((i, j), v) in edges.iter() {
            coo.push(i, j, v);
            coo.push(j, i, v);
        }

        let adjacency = CscMatrix::from(&coo);
        let (edge_pairs, distances): (Vec<_>, Vec<_>) = edges.into_iter().unzip();

        KnnGraph {
            adjacency,
            edges: edge_pairs,
            distances,
            n_nodes,
        }
    }

    /// Get neighbors of a node from the CSC adjacency matrix
    pub fn neighbors(&self, node: usize) -> &[usize] {
        let offsets = self.adjacency.col_offsets();
        &self.adjacency.row_indices()[offsets[node]..offsets[node + 1]]
    }

    /// Neighbours of a node and the distances to them
    pub fn neighbors_with_distances(&self, node: usize) -> (&[usize], &[f32]) {
        let offsets = self.adjacency.col_offsets();
        let (start, end) = (offsets[node], offsets[node + 1]);
        (
            &self.adjacency.row_indices()[start..end],
            &self.adjacency.values()[start..end],
        )
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Connected component id of every node, numbered by first visit
    pub fn component_labels(&self) -> Vec<usize> {
        let n = self.n_nodes;
        let mut label = vec![usize::MAX; n];
        let mut next = 0;

        for start in 0..n {
            if label[start] != usize::MAX {
                continue;
            }
            let mut stack = vec![start];
            label[start] = next;
            while let Some(node) = stack.pop() {
                for &nb in self.neighbors(node) {
                    if label[nb] == usize::MAX {
                        label[nb] = next;
                        stack.push(nb);
                    }
                }
            }
            next += 1;
        }
        label
    }

    pub fn num_components(&self) -> usize {
        self.component_labels()
            .into_iter()
            .max()
            .map_or(0, |m| m + 1)
    }

    /// Convert distances to similarity weights using an exponential kernel:
    /// `w = exp(-d / σ)` where σ = median distance.
    ///
    /// Returns weights parallel to `self.edges`, all in (0, 1].
    pub fn exp_kernel_weights(&self) -> Vec<f32> {
        if self.distances.is_empty() {
            return Vec::new();
        }
        let sigma = median_f32(&self.distances);
        let sigma = if sigma <= 0.0 { 1.0 } else { sigma };
        info!("exp_kernel_weights: σ (median distance) = {:.4}", sigma);
        self.distances.iter().map(|&d| (-d / sigma).exp()).collect()
    }

    /// Adaptive-bandwidth kernel weights with local connectivity.
    ///
    /// 1. rho_i = distance to nearest neighbor
    /// 2. sigma_i via binary search: sum_j exp(-(d_ij - rho_i)/sigma_i) = log2(k)
    /// 3. Directed weight: w(i→j) = exp(-(d_ij - rho_i) / sigma_i)
    /// 4. Symmetrize: w_sym = w(i→j) + w(j→i) - w(i→j) * w(j→i)
    ///
    /// Returns weights parallel to `self.edges`, all in (0, 1].
    pub fn fuzzy_kernel_weights(&self) -> Vec<f32> {
        if self.distances.is_empty() {
            return Vec::new();
        }

        let (rho, sigma): (Vec<f32>, Vec<f32>) = (0..self.n_nodes)
            .into_par_iter()
            .map(|i| {
                let (_, dists) = self.neighbors_with_distances(i);
                if dists.is_empty() {
                    return (0.0, 1.0);
                }
                let rho = dists.iter().cloned().fold(f32::INFINITY, f32::min);
                let target = (dists.len() as f32).log2().max(1.0);
                (rho, smooth_knn_sigma(dists, rho, target))
            })
            .unzip();

        self.edges
            .iter()
            .zip(self.distances.iter())
            .map(|(&(i, j), &d)| {
                let w_ij = directed_umap_weight(d, rho[i], sigma[i]);
                let w_ji = directed_umap_weight(d, rho[j], sigma[j]);
                w_ij + w_ji - w_ij * w_ji
            })
            .collect()
    }
}

/// Binary search for per-point sigma (UMAP's smooth_knn_dist).
///
/// Finds sigma such that: sum_j exp(-max(0, d_j - rho) / sigma) = target
fn smooth_knn_sigma(dists: &[f32], rho: f32, target: f32) -> f32 {
    const TOLERANCE: f32 = 1e-5;
    const MAX_ITER: usize = 64;

    let mean_dist: f32 = dists.iter().sum::<f32>() / dists.len().max(1) as f32;
    let min_sigma = (1e-3 * mean_dist).max(1e-8);

    let mut lo = 0.0f32;
    let mut hi = f32::INFINITY;
    let mut mid = 1.0f32;

    for _ in 0..MAX_ITER {
        let psum: f32 = dists
            .iter()
            .map(|&d| {
                let gap = d - rho;
                if gap > 0.0 {
                    (-gap / mid).exp()
                } else {
                    1.0
                }
            })
            .sum();

        if (psum - target).abs() < TOLERANCE {
            break;
        }

        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            mid = if hi.is_infinite() {
                mid * 2.0
            } else {
                (lo + hi) / 2.0
            };
        }
    }

    mid.max(min_sigma)
}

/// Compute a single directed UMAP membership weight.
fn directed_umap_weight(d: f32, rho: f32, sigma: f32) -> f32 {
    if d.is_infinite() || sigma <= 0.0 {
        return 0.0;
    }
    let gap = d - rho;
    if gap <= 0.0 {
        1.0
    } else {
        (-gap / sigma).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two tight clusters of 5 points each in 2D, well separated
    fn two_cluster_matrix() -> DMatrix<f32> {
        DMatrix::from_row_slice(
            10,
            2,
            &[
                0.0, 0.0, //
                0.1, 0.0, //
                0.0, 0.1, //
                0.1, 0.1, //
                0.05, 0.05, //
                10.0, 10.0, //
                10.1, 10.0, //
                10.0, 10.1, //
                10.1, 10.1, //
                10.05, 10.05, //
            ],
        )
    }

    fn args(knn: usize, reciprocal: bool) -> KnnGraphArgs {
        KnnGraphArgs {
            knn,
            block_size: 3,
            reciprocal,
        }
    }

    #[test]
    fn test_from_rows_basic() {
        let graph = KnnGraph::from_rows(&two_cluster_matrix(), args(4, true)).unwrap();

        assert_eq!(graph.num_nodes(), 10);
        assert!(graph.num_edges() > 0);
        assert_eq!(graph.edges.len(), graph.distances.len());

        for &(i, j) in &graph.edges {
            assert!(i < j, "Edge ({}, {}) not canonical", i, j);
        }
        assert!(graph.distances.iter().all(|&d| d >= 0.0));
    }

    #[test]
    fn test_two_clusters_no_cross_edges() {
        let graph = KnnGraph::from_rows(&two_cluster_matrix(), args(4, false)).unwrap();

        for &(i, j) in &graph.edges {
            let same_cluster = (i < 5 && j < 5) || (i >= 5 && j >= 5);
            assert!(same_cluster, "Cross-cluster edge ({}, {})", i, j);
        }
        assert_eq!(graph.num_components(), 2);

        let labels = graph.component_labels();
        assert!(labels[..5].iter().all(|&c| c == labels[0]));
        assert!(labels[5..].iter().all(|&c| c == labels[5]));
        assert_ne!(labels[0], labels[5]);
    }

    #[test]
    fn test_neighbors_symmetric() {
        let graph = KnnGraph::from_rows(&two_cluster_matrix(), args(3, false)).unwrap();

        for node in 0..graph.num_nodes() {
            let (nbrs, dists) = graph.neighbors_with_distances(node);
            assert_eq!(nbrs.len(), dists.len());
            for &neighbor in nbrs {
                assert!(graph.neighbors(neighbor).contains(&node));
            }
        }
    }

    #[test]
    fn test_kernel_weights_in_unit_interval() {
        let graph = KnnGraph::from_rows(&two_cluster_matrix(), args(4, false)).unwrap();

        for weights in [graph.exp_kernel_weights(), graph.fuzzy_kernel_weights()] {
            assert_eq!(weights.len(), graph.num_edges());
            for &w in &weights {
                assert!(w > 0.0 && w <= 1.0, "weight {} out of range", w);
            }
        }
    }

    #[test]
    fn test_smooth_knn_sigma() {
        let dists = [0.1, 0.2, 0.3, 0.5, 1.0];
        let rho = 0.1;
        let target = (5.0f32).log2();

        let sigma = smooth_knn_sigma(&dists, rho, target);
        let psum: f32 = dists
            .iter()
            .map(|&d| {
                let gap = d - rho;
                if gap > 0.0 {
                    (-gap / sigma).exp()
                } else {
                    1.0
                }
            })
            .sum();

        assert!((psum - target).abs() < 0.1);
    }

    #[test]
    fn test_too_few_points() {
        let data = DMatrix::from_row_slice(1, 2, &[0.0, 0.0]);
        assert!(KnnGraph::from_rows(&data, args(3, false)).is_err());
    }
}
