//! t-SNE with kNN input affinities and exact repulsive forces

use crate::common::*;
use indicatif::ProgressIterator;
use matrix_util::knn_match::{ColumnDict, MakeVecPoint};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;

/// Repulsion is quadratic in the number of points
pub const MAX_TSNE_CELLS: usize = 10_000;

pub struct TSne {
    perplexity: f32,
    learning_rate: Option<f32>,
    n_iter: usize,
    n_dims: usize,
    early_exaggeration: f32,
    early_exaggeration_iter: usize,
    seed: u64,
}

impl Default for TSne {
    fn default() -> Self {
        Self {
            perplexity: 30.0,
            learning_rate: None,
            n_iter: 1000,
            n_dims: 2,
            early_exaggeration: 12.0,
            early_exaggeration_iter: 250,
            seed: DEFAULT_SEED,
        }
    }
}

impl TSne {
    pub fn perplexity(mut self, p: f32) -> Self {
        self.perplexity = p;
        self
    }

    pub fn n_iter(mut self, n: usize) -> Self {
        self.n_iter = n;
        self
    }

    pub fn n_dims(mut self, d: usize) -> Self {
        self.n_dims = d;
        self
    }

    pub fn learning_rate(mut self, lr: f32) -> Self {
        self.learning_rate = Some(lr);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Embed the rows of `data`; returns rows × n_dims
    pub fn fit(&self, data: &Mat) -> anyhow::Result<Mat> {
        let n = data.nrows();
        anyhow::ensure!(n >= 4, "t-SNE needs at least 4 rows, got {}", n);
        anyhow::ensure!(
            n <= MAX_TSNE_CELLS,
            "t-SNE is limited to {} rows, got {}; downsample the input or use umap",
            MAX_TSNE_CELLS,
            n
        );
        anyhow::ensure!(self.perplexity > 0.0, "perplexity must be positive");

        let max_perplexity = (n - 1) as f32 / 3.0;
        let perplexity = if self.perplexity > max_perplexity {
            warn!(
                "perplexity {} too large for {} rows; using {:.1}",
                self.perplexity, n, max_perplexity
            );
            max_perplexity
        } else {
            self.perplexity
        };

        let p = joint_probabilities(data, perplexity)?;
        let lr = self
            .learning_rate
            .unwrap_or_else(|| (n as f32 / self.early_exaggeration).max(200.0));

        let d = self.n_dims;
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let init = Normal::new(0.0f32, 1e-4)?;
        let mut y = Mat::from_fn(n, d, |_, _| init.sample(&mut rng));
        let mut update = Mat::zeros(n, d);
        let mut gains = Mat::from_element(n, d, 1.0f32);

        info!(
            "t-SNE: {} points, perplexity {:.1}, learning rate {:.1}, {} iterations",
            n, perplexity, lr, self.n_iter
        );

        for iter in (0..self.n_iter).progress() {
            let exaggeration = if iter < self.early_exaggeration_iter {
                self.early_exaggeration
            } else {
                1.0
            };
            let momentum = if iter < self.early_exaggeration_iter {
                0.5
            } else {
                0.8
            };

            let grad = gradient(&p, &y, exaggeration);

            for i in 0..n {
                for k in 0..d {
                    let g = grad[(i, k)];
                    let u = update[(i, k)];
                    let gain = if (g > 0.0) != (u > 0.0) {
                        gains[(i, k)] + 0.2
                    } else {
                        gains[(i, k)] * 0.8
                    };
                    gains[(i, k)] = gain.max(0.01);
                    update[(i, k)] = momentum * u - lr * gains[(i, k)] * g;
                }
            }
            y += &update;

            // keep the embedding centred
            for k in 0..d {
                let m = y.column(k).mean();
                y.column_mut(k).add_scalar_mut(-m);
            }
        }

        Ok(y)
    }
}

/// Symmetric sparse `P` from perplexity-calibrated conditional
/// probabilities over each row's `3 * perplexity` nearest neighbours
fn joint_probabilities(data: &Mat, perplexity: f32) -> anyhow::Result<CsrMatrix<f32>> {
    let n = data.nrows();
    let k = ((3.0 * perplexity).ceil() as usize).clamp(1, n - 1);

    let transposed = data.transpose();
    let points = transposed
        .column_iter()
        .map(|c| c.to_vp())
        .collect::<Vec<_>>();
    let dict = ColumnDict::from_points(points, (0..n).collect());

    let target = perplexity.ln();
    let rows = (0..n)
        .into_par_iter()
        .map(|i| -> anyhow::Result<(Vec<usize>, Vec<f32>)> {
            let (nbrs, dists) = dict.search_others(&i, k)?;
            let sq = dists.iter().map(|d| d * d).collect::<Vec<_>>();
            Ok((nbrs, conditional_probabilities(&sq, target)))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let scale = 1.0 / (2.0 * n as f32);
    let mut coo = CooMatrix::new(n, n);
    for (i, (nbrs, probs)) in rows.iter().enumerate() {
        for (&j, &pj) in nbrs.iter().zip(probs.iter()) {
            coo.push(i, j, pj * scale);
            coo.push(j, i, pj * scale);
        }
    }
    Ok(CsrMatrix::from(&coo))
}

/// `p_{j|i}` with the precision `beta` found by bisection so that the
/// entropy equals `target` (natural log of the perplexity)
fn conditional_probabilities(sq_dists: &[f32], target: f32) -> Vec<f32> {
    const TOL: f32 = 1e-5;
    const MAX_ITER: usize = 100;

    let d_min = sq_dists.iter().copied().fold(f32::INFINITY, f32::min);
    let mut beta = 1.0f32;
    let (mut lo, mut hi) = (0.0f32, f32::INFINITY);
    let mut probs = vec![0.0f32; sq_dists.len()];

    for _ in 0..MAX_ITER {
        let mut sum = 0.0f32;
        for (p, &d) in probs.iter_mut().zip(sq_dists.iter()) {
            *p = (-(d - d_min) * beta).exp();
            sum += *p;
        }
        let mut entropy = 0.0f32;
        for p in probs.iter_mut() {
            *p /= sum;
            if *p > 1e-12 {
                entropy -= *p * p.ln();
            }
        }

        if (entropy - target).abs() < TOL {
            break;
        }
        if entropy > target {
            lo = beta;
            beta = if hi.is_infinite() { beta * 2.0 } else { (lo + hi) / 2.0 };
        } else {
            hi = beta;
            beta = (lo + hi) / 2.0;
        }
    }
    probs
}

/// KL gradient: `4 Σ_j (e P_ij - q_ij) (y_i - y_j) / (1 + |y_i - y_j|²)`
fn gradient(p: &CsrMatrix<f32>, y: &Mat, exaggeration: f32) -> Mat {
    let n = y.nrows();
    let d = y.ncols();

    // repulsion and the normalizer Z
    let (rep, z_parts): (Vec<Vec<f32>>, Vec<f32>) = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut force = vec![0.0f32; d];
            let mut z = 0.0f32;
            for j in 0..n {
                if i == j {
                    continue;
                }
                let q = 1.0 / (1.0 + sq_dist_rows(y, i, y, j));
                z += q;
                for (k, f) in force.iter_mut().enumerate() {
                    *f += q * q * (y[(i, k)] - y[(j, k)]);
                }
            }
            (force, z)
        })
        .unzip();
    let z: f32 = z_parts.iter().sum::<f32>().max(f32::MIN_POSITIVE);

    let attr = (0..n)
        .into_par_iter()
        .map(|i| {
            let row = p.row(i);
            let mut force = vec![0.0f32; d];
            for (&j, &pij) in row.col_indices().iter().zip(row.values().iter()) {
                let q = 1.0 / (1.0 + sq_dist_rows(y, i, y, j));
                for (k, f) in force.iter_mut().enumerate() {
                    *f += exaggeration * pij * q * (y[(i, k)] - y[(j, k)]);
                }
            }
            force
        })
        .collect::<Vec<_>>();

    Mat::from_fn(n, d, |i, k| 4.0 * (attr[i][k] - rep[i][k] / z))
}
