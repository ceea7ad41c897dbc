//! Leading eigenpairs of symmetric sparse operators

use crate::common::*;
use nalgebra_sparse::CsrMatrix;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;

/// Up to this size the operator is densified and solved exactly
const DENSE_EIGEN_LIMIT: usize = 2000;
const BLOCK_OVERSAMPLE: usize = 6;
const MAX_SUBSPACE_ITER: usize = 500;
const RITZ_TOLERANCE: f32 = 1e-6;

/// Dense `op * x` with rows computed in parallel
pub fn csr_times_dense(op: &CsrMatrix<f32>, x: &Mat) -> Mat {
    let b = x.ncols();
    let rows = (0..op.nrows())
        .into_par_iter()
        .map(|i| {
            let row = op.row(i);
            let mut acc = vec![0.0f32; b];
            for (&j, &v) in row.col_indices().iter().zip(row.values().iter()) {
                for (c, a) in acc.iter_mut().enumerate() {
                    *a += v * x[(j, c)];
                }
            }
            acc
        })
        .collect::<Vec<_>>();
    Mat::from_fn(op.nrows(), b, |i, c| rows[i][c])
}

/// The `k` largest eigenvalues (descending) and their eigenvectors
/// (columns) of a symmetric operator whose spectrum lies in `[-1, 1]`.
///
/// Every eigenvector is sign-normalized so that its largest-magnitude
/// entry is positive.
pub fn leading_eigenpairs(
    op: &CsrMatrix<f32>,
    k: usize,
    seed: u64,
) -> anyhow::Result<(Vec<f32>, Mat)> {
    let n = op.nrows();
    anyhow::ensure!(op.ncols() == n, "operator must be square");
    anyhow::ensure!(k > 0 && k <= n, "cannot extract {} eigenpairs of a {}x{} operator", k, n, n);

    let (values, mut vectors) = if n <= DENSE_EIGEN_LIMIT {
        dense_eigenpairs(op, k)
    } else {
        subspace_eigenpairs(op, k, seed)
    };

    for mut col in vectors.column_iter_mut() {
        let pivot = col
            .iter()
            .copied()
            .max_by(|a, b| a.abs().total_cmp(&b.abs()))
            .unwrap_or(0.0);
        if pivot < 0.0 {
            col.neg_mut();
        }
    }
    Ok((values, vectors))
}

fn sorted_desc(values: &[f32]) -> Vec<usize> {
    let mut idx = (0..values.len()).collect::<Vec<_>>();
    idx.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    idx
}

fn dense_eigenpairs(op: &CsrMatrix<f32>, k: usize) -> (Vec<f32>, Mat) {
    let dense: Mat = nalgebra_sparse::convert::serial::convert_csr_dense(op);
    let eig = dense.symmetric_eigen();
    let order = sorted_desc(eig.eigenvalues.as_slice());
    let values = order[..k].iter().map(|&i| eig.eigenvalues[i]).collect();
    let vectors = eig.eigenvectors.select_columns(order[..k].iter());
    (values, vectors)
}

/// Block power iteration on `(op + I) / 2`, whose spectrum is in `[0, 1]`,
/// followed by a Rayleigh–Ritz step on `op`
fn subspace_eigenpairs(op: &CsrMatrix<f32>, k: usize, seed: u64) -> (Vec<f32>, Mat) {
    let n = op.nrows();
    let b = (k + BLOCK_OVERSAMPLE).min(n);
    let mut rng = SmallRng::seed_from_u64(seed);
    let init = Mat::from_fn(n, b, |_, _| StandardNormal.sample(&mut rng));
    let mut q = init.qr().q();

    let mut prev_ritz = vec![f32::INFINITY; k];
    for iter in 0..MAX_SUBSPACE_ITER {
        let aq = csr_times_dense(op, &q);
        let z = (&aq + &q) * 0.5;
        q = z.qr().q();

        if iter % 10 == 9 {
            let t = q.transpose() * csr_times_dense(op, &q);
            let eig = t.symmetric_eigen();
            let order = sorted_desc(eig.eigenvalues.as_slice());
            let ritz = order[..k]
                .iter()
                .map(|&i| eig.eigenvalues[i])
                .collect::<Vec<_>>();
            let change = ritz
                .iter()
                .zip(prev_ritz.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0f32, f32::max);
            prev_ritz = ritz;
            if change < RITZ_TOLERANCE {
                debug!("subspace iteration converged after {} steps", iter + 1);
                break;
            }
        }
    }

    let aq = csr_times_dense(op, &q);
    let t = q.transpose() * aq;
    let t = (&t + t.transpose()) * 0.5;
    let eig = t.symmetric_eigen();
    let order = sorted_desc(eig.eigenvalues.as_slice());
    let values = order[..k].iter().map(|&i| eig.eigenvalues[i]).collect();
    let vectors = q * eig.eigenvectors.select_columns(order[..k].iter());
    (values, vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::CooMatrix;

    /// Normalized adjacency `D^{-1/2} A D^{-1/2}` of a cycle of length `n`
    fn cycle_operator(n: usize) -> CsrMatrix<f32> {
        let mut coo = CooMatrix::new(n, n);
        for i in 0..n {
            let j = (i + 1) % n;
            coo.push(i, j, 0.5);
            coo.push(j, i, 0.5);
        }
        CsrMatrix::from(&coo)
    }

    #[test]
    fn test_dense_cycle_spectrum() -> anyhow::Result<()> {
        let n = 12;
        let (values, vectors) = leading_eigenpairs(&cycle_operator(n), 3, 1)?;
        approx::assert_abs_diff_eq!(values[0], 1.0, epsilon = 1e-5);
        let second = (2.0 * std::f32::consts::PI / n as f32).cos();
        approx::assert_abs_diff_eq!(values[1], second, epsilon = 1e-5);
        approx::assert_abs_diff_eq!(values[2], second, epsilon = 1e-5);

        // the top eigenvector of a regular graph is constant
        let v0 = vectors.column(0);
        let c = v0[0];
        assert!(c > 0.0);
        assert!(v0.iter().all(|&x| (x - c).abs() < 1e-4));
        Ok(())
    }

    #[test]
    fn test_subspace_matches_dense() {
        let op = cycle_operator(40);
        let (dense_vals, _) = dense_eigenpairs(&op, 3);
        let (iter_vals, vectors) = subspace_eigenpairs(&op, 3, 7);
        for (a, b) in dense_vals.iter().zip(iter_vals.iter()) {
            approx::assert_abs_diff_eq!(*a, *b, epsilon = 1e-3);
        }
        let gram = vectors.transpose() * &vectors;
        approx::assert_abs_diff_eq!(gram, Mat::identity(3, 3), epsilon = 1e-3);
    }

    #[test]
    fn test_csr_times_dense() {
        let op = cycle_operator(4);
        let x = Mat::from_column_slice(4, 1, &[1.0, 2.0, 3.0, 4.0]);
        let y = csr_times_dense(&op, &x);
        assert_eq!(y.column(0).as_slice(), &[3.0, 2.0, 3.0, 2.0]);
    }
}
