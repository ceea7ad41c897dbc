use crate::traits::*;
pub use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

type Mat = DMatrix<f32>;

impl SampleOps for Mat {
    type Mat = Mat;

    fn runif(dd: usize, nn: usize) -> Mat {
        let rvec = (0..(dd * nn))
            .into_par_iter()
            .map_init(rand::rng, |rng, _| rng.random::<f32>())
            .collect();
        Mat::from_vec(dd, nn, rvec)
    }

    fn rnorm(dd: usize, nn: usize) -> Mat {
        let rvec = (0..(dd * nn))
            .into_par_iter()
            .map_init(rand::rng, |rng, _| rng.sample::<f32, _>(StandardNormal))
            .collect();
        Mat::from_vec(dd, nn, rvec)
    }
}

impl MatOps for Mat {
    type Mat = Mat;
    type Scalar = f32;

    fn normalize_columns_inplace(&mut self) {
        for mut xx_j in self.column_iter_mut() {
            let denom = xx_j.norm().max(1.0);
            xx_j /= denom;
        }
    }

    fn normalize_columns(&self) -> Mat {
        let mut ret = self.clone();
        ret.normalize_columns_inplace();
        ret
    }

    fn scale_columns_inplace(&mut self) {
        let nn = self.nrows();
        if nn == 0 {
            return;
        }
        for mut xx_j in self.column_iter_mut() {
            let mu = xx_j.mean();
            let var = xx_j.iter().map(|&x| (x - mu) * (x - mu)).sum::<f32>() / nn as f32;
            let sd = var.sqrt();
            if sd > 1e-8 {
                xx_j.apply(|x| *x = (*x - mu) / sd);
            } else {
                xx_j.fill(0.0);
            }
        }
    }

    fn scale_columns(&self) -> Mat {
        let mut ret = self.clone();
        ret.scale_columns_inplace();
        ret
    }

    fn centre_columns_inplace(&mut self) {
        if self.nrows() == 0 {
            return;
        }
        for mut xx_j in self.column_iter_mut() {
            let mu = xx_j.mean();
            xx_j.add_scalar_mut(-mu);
        }
    }

    fn centre_columns(&self) -> Mat {
        let mut ret = self.clone();
        ret.centre_columns_inplace();
        ret
    }
}

impl DistanceOps for Mat {
    type Scalar = f32;

    fn row_sq_distance(&self, i: usize, j: usize) -> f32 {
        (0..self.ncols())
            .map(|k| {
                let d = self[(i, k)] - self[(j, k)];
                d * d
            })
            .sum()
    }

    fn row_distances_to(&self, query: &[f32]) -> Vec<f32> {
        debug_assert_eq!(query.len(), self.ncols());
        (0..self.nrows())
            .into_par_iter()
            .map(|i| {
                query
                    .iter()
                    .enumerate()
                    .map(|(k, &q)| (self[(i, k)] - q) * (self[(i, k)] - q))
                    .sum::<f32>()
                    .sqrt()
            })
            .collect()
    }
}

/// Row-wise means of `data` grouped by `labels` (`n_groups × ncols`).
/// Rows labelled outside `0..n_groups` are ignored; empty groups stay zero.
pub fn group_row_means(data: &Mat, labels: &[usize], n_groups: usize) -> Mat {
    debug_assert_eq!(data.nrows(), labels.len());
    let mut sums = Mat::zeros(n_groups, data.ncols());
    let mut counts = vec![0usize; n_groups];
    for (i, &g) in labels.iter().enumerate() {
        if g < n_groups {
            counts[g] += 1;
            let mut row = sums.row_mut(g);
            row += data.row(i);
        }
    }
    for (g, &n) in counts.iter().enumerate() {
        if n > 0 {
            sums.row_mut(g).scale_mut(1.0 / n as f32);
        }
    }
    sums
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_scale_columns_zero_mean_unit_sd() {
        let mut xx = Mat::rnorm(100, 4);
        xx.column_mut(3).fill(2.5);
        xx.scale_columns_inplace();

        for j in 0..3 {
            let col = xx.column(j);
            assert_abs_diff_eq!(col.mean(), 0.0, epsilon = 1e-4);
            let var = col.iter().map(|x| x * x).sum::<f32>() / 100.0;
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-3);
        }
        assert!(xx.column(3).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_group_row_means() {
        let xx = Mat::from_row_slice(4, 2, &[0.0, 1.0, 2.0, 3.0, 10.0, 10.0, 20.0, 30.0]);
        let mu = group_row_means(&xx, &[0, 0, 1, 1], 3);
        assert_eq!(mu.nrows(), 3);
        assert_abs_diff_eq!(mu[(0, 0)], 1.0);
        assert_abs_diff_eq!(mu[(1, 1)], 20.0);
        assert_abs_diff_eq!(mu[(2, 0)], 0.0);
    }

    #[test]
    fn test_row_distances() {
        let xx = Mat::from_row_slice(2, 2, &[0.0, 0.0, 3.0, 4.0]);
        assert_abs_diff_eq!(xx.row_sq_distance(0, 1), 25.0);
        let d = xx.row_distances_to(&[0.0, 0.0]);
        assert_abs_diff_eq!(d[1], 5.0);
    }
}
