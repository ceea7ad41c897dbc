use crate::traits::SampleOps;
use log::debug;
use nalgebra::{DMatrix, DVector};

type Mat = DMatrix<f32>;
type Vec = DVector<f32>;

const OVERSAMPLE: usize = 5;
const DEFAULT_POWER_ITER: usize = 5;

pub trait RSVD {
    /// Truncated SVD `X ≈ U diag(d) V'` of rank at most `rank`
    fn rsvd(&self, rank: usize) -> anyhow::Result<(Mat, Vec, Mat)>;
}

impl RSVD for Mat {
    fn rsvd(&self, rank: usize) -> anyhow::Result<(Mat, Vec, Mat)> {
        let mut rsvd = RandomizedSVD::new(rank, DEFAULT_POWER_ITER);
        rsvd.compute(self)?;
        Ok((
            rsvd.matrix_u().clone(),
            rsvd.singular_values().clone(),
            rsvd.matrix_v().clone(),
        ))
    }
}

/// Randomized SVD
///
/// Implement Alg 4.4 of Halko et al. (2009). Small problems, where the
/// sketch would be as wide as the matrix, go straight to a dense SVD.
///
/// Singular vectors are sign-normalized so that the largest-magnitude
/// entry of every right singular vector is positive.
pub struct RandomizedSVD {
    max_rank: usize,
    iter: usize,
    u_vectors: Mat,
    singular_values: Vec,
    v_vectors: Mat,
}

impl RandomizedSVD {
    pub fn new(max_rank: usize, iter: usize) -> Self {
        Self {
            max_rank,
            iter,
            u_vectors: Mat::zeros(0, 0),
            singular_values: Vec::zeros(0),
            v_vectors: Mat::zeros(0, 0),
        }
    }

    pub fn matrix_u(&self) -> &Mat {
        &self.u_vectors
    }

    pub fn matrix_v(&self) -> &Mat {
        &self.v_vectors
    }

    pub fn singular_values(&self) -> &Vec {
        &self.singular_values
    }

    pub fn compute(&mut self, xx: &Mat) -> anyhow::Result<()> {
        let nr = xx.nrows();
        let nc = xx.ncols();
        let full_rank = nr.min(nc);

        anyhow::ensure!(full_rank > 0, "empty matrix [{} x {}]", nr, nc);

        let rank = if self.max_rank > 0 {
            self.max_rank.min(full_rank)
        } else {
            full_rank
        };

        let (svd_u, svd_d, svd_vt) = if rank + OVERSAMPLE >= full_rank {
            debug!("dense svd on [{} x {}]", nr, nc);
            let svd = xx.clone().svd(true, true);
            match (svd.u, svd.v_t) {
                (Some(u), Some(v_t)) => (u, svd.singular_values, v_t),
                _ => anyhow::bail!("SVD failed"),
            }
        } else {
            let qq = self.rand_subspace_iteration(xx, rank + OVERSAMPLE);
            let bb = qq.transpose() * xx;
            debug!("final svd on [{} x {}]", bb.nrows(), bb.ncols());
            let svd = bb.svd(true, true);
            match (svd.u, svd.v_t) {
                (Some(u), Some(v_t)) => (&qq * u, svd.singular_values, v_t),
                _ => anyhow::bail!("SVD failed"),
            }
        };

        // nalgebra does not promise a sorted spectrum
        let mut order: std::vec::Vec<usize> = (0..svd_d.len()).collect();
        order.sort_by(|&a, &b| {
            svd_d[b]
                .partial_cmp(&svd_d[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order.truncate(rank);

        let mut uu = Mat::zeros(nr, rank);
        let mut vv = Mat::zeros(nc, rank);
        let mut dd = Vec::zeros(rank);

        for (k, &s) in order.iter().enumerate() {
            let v_k = svd_vt.row(s).transpose();
            let pivot = v_k
                .iter()
                .copied()
                .fold(0_f32, |acc, x| if x.abs() > acc.abs() { x } else { acc });
            let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
            vv.column_mut(k).copy_from(&(v_k * sign));
            uu.column_mut(k).copy_from(&(svd_u.column(s) * sign));
            dd[k] = svd_d[s];
        }

        self.u_vectors = uu;
        self.v_vectors = vv;
        self.singular_values = dd;
        Ok(())
    }

    // Find an orthonormal matrix whose range approximates the range of xx
    fn rand_subspace_iteration(&self, xx: &Mat, sketch: usize) -> Mat {
        let mut qq = (xx * Mat::rnorm(xx.ncols(), sketch)).qr().q();

        for i in 0..self.iter {
            debug!("power iteration {:>4}", i + 1);
            let zz = (xx.transpose() * &qq).qr().q();
            qq = (xx * zz).qr().q();
        }

        qq
    }
}
