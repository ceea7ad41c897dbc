//! UMAP: fuzzy kNN graph, spectral initialisation and SGD with negative
//! sampling

use crate::common::*;
use crate::spectral::leading_eigenpairs;
use indicatif::ProgressIterator;
use matrix_util::knn_graph::{KnnGraph, KnnGraphArgs};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const NEGATIVE_SAMPLE_RATE: usize = 5;
const GRAD_CLIP: f32 = 4.0;
const INIT_SCALE: f32 = 10.0;

#[derive(Clone, Debug)]
pub struct UmapArgs {
    pub n_dims: usize,
    pub knn: usize,
    pub min_dist: f32,
    pub spread: f32,
    pub n_epochs: usize,
    pub seed: u64,
}

impl Default for UmapArgs {
    fn default() -> Self {
        Self {
            n_dims: 2,
            knn: DEFAULT_KNN,
            min_dist: 0.1,
            spread: 1.0,
            n_epochs: 200,
            seed: DEFAULT_SEED,
        }
    }
}

pub struct Umap {
    args: UmapArgs,
    /// low-dimensional kernel `1 / (1 + a d^{2b})`
    pub a: f32,
    pub b: f32,
}

impl Umap {
    pub fn new(args: UmapArgs) -> anyhow::Result<Self> {
        anyhow::ensure!(args.spread > 0.0, "spread must be positive");
        anyhow::ensure!(
            args.min_dist >= 0.0 && args.min_dist < args.spread,
            "min_dist must be in [0, spread)"
        );
        let (a, b) = fit_ab(args.min_dist, args.spread);
        debug!("UMAP curve a={:.4} b={:.4}", a, b);
        Ok(Self { args, a, b })
    }

    /// Embed the rows of `data`; returns rows × n_dims
    pub fn fit(&self, data: &Mat) -> anyhow::Result<Mat> {
        let n = data.nrows();
        let d = self.args.n_dims;
        anyhow::ensure!(n > d + 1, "UMAP needs more than {} rows, got {}", d + 1, n);

        let knn = self.args.knn.min(n - 1);
        let graph = KnnGraph::from_rows(data, KnnGraphArgs::union(knn))?;
        let weights = graph.fuzzy_kernel_weights();

        let mut rng = SmallRng::seed_from_u64(self.args.seed);
        let mut y = match spectral_init(&graph, &weights, d, self.args.seed)? {
            Some(y) => y,
            None => {
                info!("UMAP: random initialisation");
                Mat::from_fn(n, d, |_, _| rng.random_range(-INIT_SCALE..INIT_SCALE))
            }
        };

        let max_w = weights.iter().copied().fold(0.0f32, f32::max);
        anyhow::ensure!(max_w > 0.0, "UMAP graph has no positive edge weights");

        info!(
            "UMAP: {} points, {} edges, {} epochs",
            n,
            graph.num_edges(),
            self.args.n_epochs
        );

        let (a, b) = (self.a, self.b);
        let n_epochs = self.args.n_epochs.max(1);
        let mut grad = vec![0.0f32; d];

        for epoch in (0..n_epochs).progress() {
            let alpha = 1.0 - epoch as f32 / n_epochs as f32;

            for (&(u, v), &w) in graph.edges.iter().zip(weights.iter()) {
                for (i, j) in [(u, v), (v, u)] {
                    if rng.random::<f32>() > w / max_w {
                        continue;
                    }

                    let dist2 = sq_dist_rows(&y, i, &y, j);
                    if dist2 > 0.0 {
                        let coef = -2.0 * a * b * dist2.powf(b - 1.0)
                            / (1.0 + a * dist2.powf(b));
                        for k in 0..d {
                            grad[k] = (coef * (y[(i, k)] - y[(j, k)])).clamp(-GRAD_CLIP, GRAD_CLIP);
                        }
                        for k in 0..d {
                            y[(i, k)] += alpha * grad[k];
                            y[(j, k)] -= alpha * grad[k];
                        }
                    }

                    for _ in 0..NEGATIVE_SAMPLE_RATE {
                        let s = rng.random_range(0..n);
                        if s == i {
                            continue;
                        }
                        let dist2 = sq_dist_rows(&y, i, &y, s);
                        for k in 0..d {
                            grad[k] = if dist2 > 0.0 {
                                let coef = 2.0 * b / ((0.001 + dist2) * (1.0 + a * dist2.powf(b)));
                                (coef * (y[(i, k)] - y[(s, k)])).clamp(-GRAD_CLIP, GRAD_CLIP)
                            } else {
                                GRAD_CLIP
                            };
                        }
                        for k in 0..d {
                            y[(i, k)] += alpha * grad[k];
                        }
                    }
                }
            }
        }

        Ok(y)
    }
}

/// Eigenvectors 2..=d+1 of the normalized adjacency, scaled to
/// `[-INIT_SCALE, INIT_SCALE]`; `None` when the graph is disconnected
fn spectral_init(
    graph: &KnnGraph,
    weights: &[f32],
    d: usize,
    seed: u64,
) -> anyhow::Result<Option<Mat>> {
    let n = graph.num_nodes();
    if graph.num_components() > 1 || n < d + 2 {
        return Ok(None);
    }

    let mut degree = vec![0.0f32; n];
    for (&(i, j), &w) in graph.edges.iter().zip(weights.iter()) {
        degree[i] += w;
        degree[j] += w;
    }
    if degree.iter().any(|&x| x <= 0.0) {
        return Ok(None);
    }

    let mut coo = CooMatrix::new(n, n);
    for (&(i, j), &w) in graph.edges.iter().zip(weights.iter()) {
        let v = w / (degree[i] * degree[j]).sqrt();
        coo.push(i, j, v);
        coo.push(j, i, v);
    }
    let op = CsrMatrix::from(&coo);
    let (_, vectors) = leading_eigenpairs(&op, d + 1, seed)?;

    let mut y = vectors.columns(1, d).into_owned();
    let max_abs = y.iter().fold(0.0f32, |m, x| m.max(x.abs()));
    if max_abs <= 0.0 {
        return Ok(None);
    }
    y *= INIT_SCALE / max_abs;
    Ok(Some(y))
}

/// Fit `1 / (1 + a x^{2b})` to the target membership curve by
/// Levenberg–Marquardt
pub fn fit_ab(min_dist: f32, spread: f32) -> (f32, f32) {
    const N_POINTS: usize = 300;

    let xs = (0..N_POINTS)
        .map(|i| 3.0 * spread as f64 * i as f64 / (N_POINTS - 1) as f64)
        .collect::<Vec<_>>();
    let ys = xs
        .iter()
        .map(|&x| {
            if x < min_dist as f64 {
                1.0
            } else {
                (-(x - min_dist as f64) / spread as f64).exp()
            }
        })
        .collect::<Vec<_>>();

    let sse = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(ys.iter())
            .map(|(&x, &y)| {
                let f = 1.0 / (1.0 + a * x.powf(2.0 * b));
                (f - y).powi(2)
            })
            .sum()
    };

    let (mut a, mut b) = (1.0f64, 1.0f64);
    let mut lambda = 1e-3f64;
    let mut err = sse(a, b);

    for _ in 0..500 {
        // normal equations J'J δ = -J'r
        let (mut jaa, mut jab, mut jbb, mut ga, mut gb) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (&x, &y) in xs.iter().zip(ys.iter()) {
            if x <= 0.0 {
                continue;
            }
            let x2b = x.powf(2.0 * b);
            let denom = 1.0 + a * x2b;
            let f = 1.0 / denom;
            let r = f - y;
            let da = -x2b / (denom * denom);
            let db = -a * x2b * 2.0 * x.ln() / (denom * denom);
            jaa += da * da;
            jab += da * db;
            jbb += db * db;
            ga += da * r;
            gb += db * r;
        }

        let (maa, mbb) = (jaa * (1.0 + lambda), jbb * (1.0 + lambda));
        let det = maa * mbb - jab * jab;
        if det.abs() < 1e-300 {
            break;
        }
        let step_a = -(mbb * ga - jab * gb) / det;
        let step_b = -(maa * gb - jab * ga) / det;

        let (na, nb) = (a + step_a, b + step_b);
        let new_err = if na > 0.0 && nb > 0.0 {
            sse(na, nb)
        } else {
            f64::INFINITY
        };

        if new_err < err {
            let converged = (err - new_err) < 1e-12;
            a = na;
            b = nb;
            err = new_err;
            lambda = (lambda / 10.0).max(1e-12);
            if converged {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e12 {
                break;
            }
        }
    }

    (a as f32, b as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_distr::{Distribution, Normal};

    #[test]
    fn test_fit_ab_default_curve() {
        let (a, b) = fit_ab(0.1, 1.0);
        approx::assert_abs_diff_eq!(a, 1.577, epsilon = 0.02);
        approx::assert_abs_diff_eq!(b, 0.895, epsilon = 0.01);
    }

    #[test]
    fn test_umap_keeps_clusters_apart() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(4);
        let noise = Normal::new(0.0f32, 0.3).unwrap();
        let data = Mat::from_fn(80, 4, |i, _| (if i < 40 { 0.0 } else { 8.0 }) + noise.sample(&mut rng));

        let umap = Umap::new(UmapArgs {
            knn: 10,
            n_epochs: 100,
            ..Default::default()
        })?;
        let y = umap.fit(&data)?;
        assert_eq!(y.shape(), (80, 2));
        assert!(y.iter().all(|x| x.is_finite()));

        // every point is nearer to its own group's mean than to the other's
        let ma = y.rows(0, 40).row_mean();
        let mb = y.rows(40, 40).row_mean();
        let mut correct = 0;
        for i in 0..80 {
            let da = (y.row(i) - &ma).norm();
            let db = (y.row(i) - &mb).norm();
            if (i < 40) == (da < db) {
                correct += 1;
            }
        }
        assert!(correct >= 70, "{} of 80 on the right side", correct);
        Ok(())
    }

    #[test]
    fn test_umap_rejects_bad_curve() {
        let args = UmapArgs {
            min_dist: 2.0,
            spread: 1.0,
            ..Default::default()
        };
        assert!(Umap::new(args).is_err());
    }
}
