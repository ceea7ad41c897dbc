//! CLARA: k-medoids on random subsets, scored on every cell

use crate::common::*;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;

const MAX_SWAP_ITER: usize = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaraArgs {
    pub num_clusters: usize,
    /// number of random subsets
    pub samples: usize,
    /// subset size; `40 + 2k` if `None`
    pub sample_size: Option<usize>,
    pub seed: u64,
}

impl ClaraArgs {
    pub fn with_clusters(num_clusters: usize) -> Self {
        Self {
            num_clusters,
            samples: 5,
            sample_size: None,
            seed: DEFAULT_SEED,
        }
    }
}

pub struct Clara {
    /// row indices of the medoids in the full data
    pub medoids: Vec<usize>,
    pub labels: Vec<usize>,
    /// sum over all rows of the distance to the nearest medoid
    pub cost: f32,
}

pub fn clara(data: &Mat, args: &ClaraArgs) -> anyhow::Result<Clara> {
    let n = data.nrows();
    let k = args.num_clusters;
    anyhow::ensure!(k > 0, "number of clusters must be > 0");
    anyhow::ensure!(k <= n, "{} clusters for {} cells", k, n);
    anyhow::ensure!(args.samples > 0, "CLARA needs at least one sample");

    let m = args.sample_size.unwrap_or(40 + 2 * k).clamp(k, n);
    info!(
        "CLARA: {} cells, k={}, {} samples of {}",
        n, k, args.samples, m
    );

    let mut best: Option<Clara> = None;
    for s in 0..args.samples {
        let mut rng = SmallRng::seed_from_u64(derive_seed(args.seed, s as u64));
        let mut subset = rand::seq::index::sample(&mut rng, n, m).into_vec();
        subset.sort_unstable();

        let sub = data.select_rows(subset.iter());
        let local = pam(&sub, k);
        let medoids = local.into_iter().map(|i| subset[i]).collect::<Vec<_>>();

        let (labels, cost) = assign_to_medoids(data, &medoids);
        debug!("CLARA sample {}: cost {:.4}", s, cost);

        if best.as_ref().map_or(true, |b| cost < b.cost) {
            best = Some(Clara {
                medoids,
                labels,
                cost,
            });
        }
    }

    best.ok_or_else(|| anyhow::anyhow!("CLARA produced no solution"))
}

fn assign_to_medoids(data: &Mat, medoids: &[usize]) -> (Vec<usize>, f32) {
    let centres = data.select_rows(medoids.iter());
    let assigned = (0..data.nrows())
        .into_par_iter()
        .map(|i| {
            let (c, d2) = nearest_row(data, i, &centres);
            (c, d2.sqrt())
        })
        .collect::<Vec<_>>();
    let cost = assigned.iter().map(|&(_, d)| d).sum();
    (assigned.into_iter().map(|(c, _)| c).collect(), cost)
}

/// Partitioning around medoids (BUILD then SWAP) on all rows of `data`;
/// returns the medoid row indices
pub fn pam(data: &Mat, k: usize) -> Vec<usize> {
    let n = data.nrows();
    if k >= n {
        return (0..n).collect();
    }

    let dist = Mat::from_fn(n, n, |i, j| data.row_sq_distance(i, j).sqrt());

    // BUILD
    let mut medoids: Vec<usize> = Vec::with_capacity(k);
    let mut nearest = vec![f32::INFINITY; n];

    let first = (0..n)
        .min_by(|&a, &b| {
            let ca: f32 = dist.column(a).sum();
            let cb: f32 = dist.column(b).sum();
            ca.total_cmp(&cb)
        })
        .unwrap_or(0);
    medoids.push(first);
    for j in 0..n {
        nearest[j] = dist[(j, first)];
    }

    while medoids.len() < k {
        let mut best = (usize::MAX, f32::NEG_INFINITY);
        for h in 0..n {
            if medoids.contains(&h) {
                continue;
            }
            let gain: f32 = (0..n).map(|j| (nearest[j] - dist[(j, h)]).max(0.0)).sum();
            if gain > best.1 {
                best = (h, gain);
            }
        }
        let h = best.0;
        medoids.push(h);
        for j in 0..n {
            nearest[j] = nearest[j].min(dist[(j, h)]);
        }
    }

    // SWAP
    let total_cost = |meds: &[usize]| -> f32 {
        (0..n)
            .map(|j| {
                meds.iter()
                    .map(|&m| dist[(j, m)])
                    .fold(f32::INFINITY, f32::min)
            })
            .sum()
    };

    let mut cost = total_cost(&medoids);
    for _ in 0..MAX_SWAP_ITER {
        let mut best_swap: Option<(usize, usize, f32)> = None;
        for slot in 0..k {
            for h in 0..n {
                if medoids.contains(&h) {
                    continue;
                }
                let mut trial = medoids.clone();
                trial[slot] = h;
                let c = total_cost(&trial);
                if c < best_swap.map_or(cost, |(_, _, bc)| bc) - 1e-6 {
                    best_swap = Some((slot, h, c));
                }
            }
        }
        match best_swap {
            Some((slot, h, c)) => {
                medoids[slot] = h;
                cost = c;
            }
            None => break,
        }
    }

    medoids
}
