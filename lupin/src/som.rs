//! Self-organizing map on a rectangular grid, trained online the way
//! FlowSOM does: one random cell per step, Chebyshev grid neighbourhood,
//! linearly shrinking radius and learning rate.

use crate::common::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SomArgs {
    pub xdim: usize,
    pub ydim: usize,
    /// number of passes over the data
    pub rlen: usize,
    /// learning rate at the start and at the end of training
    pub alpha: (f32, f32),
    pub seed: u64,
}

impl Default for SomArgs {
    fn default() -> Self {
        Self {
            xdim: 6,
            ydim: 6,
            rlen: 8,
            alpha: (0.05, 0.01),
            seed: DEFAULT_SEED,
        }
    }
}

pub struct Som {
    /// nodes × features
    pub codes: Mat,
    pub xdim: usize,
    pub ydim: usize,
}

impl Som {
    pub fn n_nodes(&self) -> usize {
        self.codes.nrows()
    }

    /// Grid position of node `k` (column-major, like FlowSOM)
    pub fn grid_position(&self, k: usize) -> (usize, usize) {
        (k % self.xdim, k / self.xdim)
    }

    /// Chebyshev distance between two nodes on the grid
    pub fn grid_distance(&self, a: usize, b: usize) -> f32 {
        let (ax, ay) = self.grid_position(a);
        let (bx, by) = self.grid_position(b);
        ax.abs_diff(bx).max(ay.abs_diff(by)) as f32
    }

    /// Fit codes to the rows of `data`
    pub fn train(data: &Mat, args: &SomArgs) -> anyhow::Result<Self> {
        let n = data.nrows();
        let n_nodes = args.xdim * args.ydim;
        anyhow::ensure!(n_nodes > 0, "SOM grid must have at least one node");
        anyhow::ensure!(
            n >= n_nodes,
            "SOM grid {}x{} has more nodes than the {} cells",
            args.xdim,
            args.ydim,
            n
        );
        anyhow::ensure!(args.rlen > 0, "rlen must be positive");

        let mut rng = SmallRng::seed_from_u64(args.seed);
        let init = rand::seq::index::sample(&mut rng, n, n_nodes);

        let mut som = Som {
            codes: Mat::from_fn(n_nodes, data.ncols(), |k, j| data[(init.index(k), j)]),
            xdim: args.xdim,
            ydim: args.ydim,
        };

        let mut nhbr = Vec::with_capacity(n_nodes * n_nodes);
        for a in 0..n_nodes {
            for b in 0..n_nodes {
                nhbr.push(som.grid_distance(a, b));
            }
        }

        let radius_start = grid_quantile(&nhbr, 0.67);
        let radius_end = 0.0f32;
        let (alpha_start, alpha_end) = args.alpha;

        let niter = args.rlen * n;
        info!(
            "SOM: {}x{} grid, {} steps, radius {:.2} -> {:.2}",
            args.xdim, args.ydim, niter, radius_start, radius_end
        );

        let d = data.ncols();
        for step in 0..niter {
            let frac = step as f32 / niter as f32;
            let radius = radius_start - (radius_start - radius_end) * frac;
            let alpha = alpha_start - (alpha_start - alpha_end) * frac;

            let i = rng.random_range(0..n);
            let (winner, _) = nearest_row(data, i, &som.codes);

            for k in 0..n_nodes {
                if nhbr[winner * n_nodes + k] <= radius {
                    for j in 0..d {
                        let c = som.codes[(k, j)];
                        som.codes[(k, j)] = c + alpha * (data[(i, j)] - c);
                    }
                }
            }
        }

        Ok(som)
    }

    /// Nearest node of every row of `data`
    pub fn map(&self, data: &Mat) -> Vec<usize> {
        (0..data.nrows())
            .into_par_iter()
            .map(|i| nearest_row(data, i, &self.codes).0)
            .collect()
    }
}

fn grid_quantile(values: &[f32], q: f32) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() - 1) as f32;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_distr::{Distribution, Normal};

    fn blobs(centres: &[[f32; 2]], n_each: usize) -> Mat {
        let mut rng = SmallRng::seed_from_u64(3);
        let noise = Normal::new(0.0f32, 0.2).unwrap();
        let n = centres.len() * n_each;
        Mat::from_fn(n, 2, |i, j| centres[i / n_each][j] + noise.sample(&mut rng))
    }

    #[test]
    fn test_grid_distance_is_chebyshev() {
        let som = Som {
            codes: Mat::zeros(12, 1),
            xdim: 4,
            ydim: 3,
        };
        assert_eq!(som.grid_position(5), (1, 1));
        assert_eq!(som.grid_distance(0, 11), 3.0);
        assert_eq!(som.grid_distance(0, 5), 1.0);
    }

    #[test]
    fn test_som_separates_blobs() -> anyhow::Result<()> {
        let data = blobs(&[[0.0, 0.0], [8.0, 8.0]], 60);
        let args = SomArgs {
            xdim: 2,
            ydim: 2,
            ..Default::default()
        };
        let som = Som::train(&data, &args)?;
        let labels = som.map(&data);

        let left: std::collections::HashSet<_> = labels[..60].iter().collect();
        let right: std::collections::HashSet<_> = labels[60..].iter().collect();
        assert!(left.is_disjoint(&right));
        Ok(())
    }

    #[test]
    fn test_som_is_seeded() -> anyhow::Result<()> {
        let data = blobs(&[[0.0, 0.0], [3.0, 1.0], [1.0, 4.0]], 30);
        let args = SomArgs {
            xdim: 3,
            ydim: 2,
            rlen: 3,
            ..Default::default()
        };
        let a = Som::train(&data, &args)?;
        let b = Som::train(&data, &args)?;
        assert_eq!(a.codes, b.codes);
        Ok(())
    }

    #[test]
    fn test_som_too_many_nodes() {
        let data = Mat::zeros(5, 2);
        assert!(Som::train(&data, &SomArgs::default()).is_err());
    }
}
