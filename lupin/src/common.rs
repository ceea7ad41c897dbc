pub use log::{debug, info, warn};

pub use matrix_util::traits::*;

pub use serde::{Deserialize, Serialize};

pub const DEFAULT_KNN: usize = 15;
pub const DEFAULT_SEED: u64 = 42;

pub type Mat = nalgebra::DMatrix<f32>;
pub type DVec = nalgebra::DVector<f32>;

/// `f32` with a total order, for heaps and sorting
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrdF32(pub f32);

impl Eq for OrdF32 {}

impl PartialOrd for OrdF32 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdF32 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Deterministic per-task seed derived from a base seed
pub fn derive_seed(base: u64, task: u64) -> u64 {
    // splitmix64 finalizer
    let mut z = base.wrapping_add(task.wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Squared Euclidean distance between row `i` of `a` and row `j` of `b`
#[inline]
pub fn sq_dist_rows(a: &Mat, i: usize, b: &Mat, j: usize) -> f32 {
    debug_assert_eq!(a.ncols(), b.ncols());
    (0..a.ncols())
        .map(|k| {
            let d = a[(i, k)] - b[(j, k)];
            d * d
        })
        .sum()
}

/// Index of the row of `codes` nearest to row `i` of `data`
pub fn nearest_row(data: &Mat, i: usize, codes: &Mat) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for c in 0..codes.nrows() {
        let d = sq_dist_rows(data, i, codes, c);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

/// Parse a comma-separated list of cluster/group ids
pub fn parse_id_list(text: &str) -> anyhow::Result<Vec<usize>> {
    text.split(',')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .map(|x| {
            x.parse::<usize>()
                .map_err(|_| anyhow::anyhow!("'{}' is not a valid id", x))
        })
        .collect()
}
