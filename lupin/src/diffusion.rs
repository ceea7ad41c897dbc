//! Diffusion maps with a locally scaled Gaussian kernel on a kNN graph

use crate::common::*;
use crate::spectral::leading_eigenpairs;
use matrix_util::knn_graph::{KnnGraph, KnnGraphArgs};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

#[derive(Clone, Debug)]
pub struct DiffusionArgs {
    pub n_dims: usize,
    pub knn: usize,
    pub seed: u64,
}

pub struct DiffusionMap {
    /// rows × n_dims diffusion components, `λ_l ψ_l`
    pub coords: Mat,
    /// eigenvalues of the non-trivial components
    pub eigenvalues: Vec<f32>,
}

impl DiffusionMap {
    pub fn fit(data: &Mat, args: &DiffusionArgs) -> anyhow::Result<Self> {
        let n = data.nrows();
        anyhow::ensure!(
            n > args.n_dims + 1,
            "diffusion map needs more than {} rows, got {}",
            args.n_dims + 1,
            n
        );
        let knn = args.knn.min(n - 1);
        let graph = KnnGraph::from_rows(data, KnnGraphArgs::union(knn))?;
        if graph.num_components() > 1 {
            warn!(
                "kNN graph has {} components; leading diffusion components will separate them",
                graph.num_components()
            );
        }

        let op = symmetric_transition(&graph, knn);
        let (values, vectors) = leading_eigenpairs(&op.matrix, args.n_dims + 1, args.seed)?;

        // ψ = D^{-1/2} φ are the right eigenvectors of the Markov matrix
        let mut coords = Mat::zeros(n, args.n_dims);
        for l in 0..args.n_dims {
            let lambda = values[l + 1];
            for i in 0..n {
                coords[(i, l)] = lambda * vectors[(i, l + 1)] / op.sqrt_degree[i];
            }
        }
        let eigenvalues = values[1..].to_vec();
        info!("diffusion eigenvalues: {:?}", eigenvalues);

        Ok(Self {
            coords,
            eigenvalues,
        })
    }
}

struct SymmetricTransition {
    matrix: CsrMatrix<f32>,
    sqrt_degree: Vec<f32>,
}

/// `D^{-1/2} K̃ D^{-1/2}` with `K̃ = Q^{-1} K Q^{-1}` (density normalization)
/// and `K_ij = sqrt(2 σ_i σ_j / (σ_i² + σ_j²)) exp(-d_ij² / (σ_i² + σ_j²))`
fn symmetric_transition(graph: &KnnGraph, knn: usize) -> SymmetricTransition {
    let n = graph.num_nodes();

    let sigma = (0..n)
        .map(|i| {
            let (_, dists) = graph.neighbors_with_distances(i);
            let mut sorted = dists.to_vec();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let s = sorted
                .get(knn.saturating_sub(1).min(sorted.len().saturating_sub(1)))
                .copied()
                .unwrap_or(1.0);
            if s > 0.0 {
                s
            } else {
                1.0
            }
        })
        .collect::<Vec<_>>();

    let kernel = graph
        .edges
        .iter()
        .zip(graph.distances.iter())
        .map(|(&(i, j), &d)| {
            let s2 = sigma[i] * sigma[i] + sigma[j] * sigma[j];
            (2.0 * sigma[i] * sigma[j] / s2).sqrt() * (-d * d / s2).exp()
        })
        .collect::<Vec<_>>();

    // self-affinity is 1
    let mut q = vec![1.0f32; n];
    for (&(i, j), &k) in graph.edges.iter().zip(kernel.iter()) {
        q[i] += k;
        q[j] += k;
    }

    let mut degree = (0..n).map(|i| 1.0 / (q[i] * q[i])).collect::<Vec<_>>();
    let normalized = graph
        .edges
        .iter()
        .zip(kernel.iter())
        .map(|(&(i, j), &k)| k / (q[i] * q[j]))
        .collect::<Vec<_>>();
    for (&(i, j), &k) in graph.edges.iter().zip(normalized.iter()) {
        degree[i] += k;
        degree[j] += k;
    }
    let sqrt_degree = degree.iter().map(|d| d.sqrt()).collect::<Vec<_>>();

    let mut coo = CooMatrix::new(n, n);
    for i in 0..n {
        coo.push(i, i, 1.0 / (q[i] * q[i]) / degree[i]);
    }
    for (&(i, j), &k) in graph.edges.iter().zip(normalized.iter()) {
        let v = k / (sqrt_degree[i] * sqrt_degree[j]);
        coo.push(i, j, v);
        coo.push(j, i, v);
    }

    SymmetricTransition {
        matrix: CsrMatrix::from(&coo),
        sqrt_degree,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Noisy points along a curve; the first diffusion component should
    /// order them
    fn curve() -> Mat {
        Mat::from_fn(80, 2, |i, j| {
            let t = i as f32 / 80.0 * 3.0;
            let jitter = ((i * 7919) % 13) as f32 / 13.0 * 0.02;
            if j == 0 {
                t.cos() * (1.0 + t) + jitter
            } else {
                t.sin() * (1.0 + t) - jitter
            }
        })
    }

    fn spearman_abs(x: &[f32]) -> f32 {
        let n = x.len();
        let mut idx = (0..n).collect::<Vec<_>>();
        idx.sort_by(|&a, &b| x[a].total_cmp(&x[b]));
        let mut rank = vec![0.0f32; n];
        for (r, &i) in idx.iter().enumerate() {
            rank[i] = r as f32;
        }
        let mean = (n - 1) as f32 / 2.0;
        let cov: f32 = (0..n).map(|i| (i as f32 - mean) * (rank[i] - mean)).sum();
        let var: f32 = (0..n).map(|i| (i as f32 - mean).powi(2)).sum();
        (cov / var).abs()
    }

    #[test]
    fn test_operator_has_unit_top_eigenvalue() -> anyhow::Result<()> {
        let graph = KnnGraph::from_rows(&curve(), KnnGraphArgs::union(8))?;
        let op = symmetric_transition(&graph, 8);
        let (values, _) = leading_eigenpairs(&op.matrix, 2, 0)?;
        approx::assert_abs_diff_eq!(values[0], 1.0, epsilon = 1e-4);
        assert!(values[1] < 1.0);
        Ok(())
    }

    #[test]
    fn test_first_component_orders_curve() -> anyhow::Result<()> {
        let dm = DiffusionMap::fit(
            &curve(),
            &DiffusionArgs {
                n_dims: 2,
                knn: 8,
                seed: 0,
            },
        )?;
        assert_eq!(dm.coords.shape(), (80, 2));
        assert!(dm.eigenvalues[0] >= dm.eigenvalues[1]);
        let dc1 = dm.coords.column(0).iter().copied().collect::<Vec<_>>();
        assert!(spearman_abs(&dc1) > 0.9);
        Ok(())
    }
}
