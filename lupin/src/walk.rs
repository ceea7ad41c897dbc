//! Forward random walks from root cells toward leaf cells; cells that
//! many successful walks pass through are intermediate states

use crate::common::*;
use indicatif::ParallelProgressIterator;
use matrix_util::knn_graph::KnnGraph;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalkConfig {
    pub walks_per_root: usize,
    pub max_steps: usize,
    /// `traj_value` at or above which a cell is intermediate
    pub threshold: f32,
    pub seed: u64,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            walks_per_root: 10,
            max_steps: 500,
            threshold: 0.1,
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TrajectoryValue {
    /// number of leaf-reaching walks through each cell
    pub visits: Vec<u32>,
    pub traj_value: Vec<f32>,
    pub traj_value_log: Vec<f32>,
    pub intermediate: Vec<bool>,
    pub n_walks: usize,
    pub n_reached: usize,
}

/// Neighbour lists with `exp(-d / median d)` transition weights
struct WalkGraph<'a> {
    graph: &'a KnnGraph,
    sigma: f32,
}

impl WalkGraph<'_> {
    fn step(&self, cur: usize, pseudotime: &[f32], rng: &mut SmallRng) -> Option<usize> {
        let (nbrs, dists) = self.graph.neighbors_with_distances(cur);
        let mut total = 0.0f32;
        let mut cands = Vec::with_capacity(nbrs.len());
        for (&v, &d) in nbrs.iter().zip(dists.iter()) {
            if pseudotime[v] >= pseudotime[cur] {
                let w = (-d / self.sigma).exp();
                total += w;
                cands.push((v, total));
            }
        }
        if cands.is_empty() || total <= 0.0 {
            return None;
        }
        let u = rng.random::<f32>() * total;
        let pos = cands.partition_point(|&(_, cum)| cum <= u);
        Some(cands[pos.min(cands.len() - 1)].0)
    }
}

fn median(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n == 0 {
        1.0
    } else if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Launch `walks_per_root` walks from every root cell
pub fn trajectory_values(
    graph: &KnnGraph,
    pseudotime: &[f32],
    roots: &[usize],
    leaves: &[usize],
    config: &WalkConfig,
) -> anyhow::Result<TrajectoryValue> {
    let n = graph.num_nodes();
    anyhow::ensure!(pseudotime.len() == n, "pseudotime length differs from graph size");
    anyhow::ensure!(!roots.is_empty(), "no root cells");
    anyhow::ensure!(!leaves.is_empty(), "no leaf cells");
    anyhow::ensure!(config.walks_per_root > 0, "walks_per_root must be positive");
    anyhow::ensure!(
        config.threshold > 0.0 && config.threshold <= 1.0,
        "intermediate threshold must be in (0, 1], got {}",
        config.threshold
    );

    let mut is_root = vec![false; n];
    for &r in roots {
        is_root[r] = true;
    }
    let mut is_leaf = vec![false; n];
    for &l in leaves {
        anyhow::ensure!(!is_root[l], "cell {} is both a root and a leaf", l);
        is_leaf[l] = true;
    }

    let sigma = median(&graph.distances);
    let walker = WalkGraph {
        graph,
        sigma: if sigma > 0.0 { sigma } else { 1.0 },
    };

    let n_walks = roots.len() * config.walks_per_root;
    info!(
        "{} walks from {} roots toward {} leaf cells (max {} steps)",
        n_walks,
        roots.len(),
        leaves.len(),
        config.max_steps
    );

    let paths = (0..n_walks)
        .into_par_iter()
        .progress_count(n_walks as u64)
        .filter_map(|w| {
            let mut rng = SmallRng::seed_from_u64(derive_seed(config.seed, w as u64));
            let mut cur = roots[w / config.walks_per_root];
            let mut path = vec![cur];
            for _ in 0..config.max_steps {
                cur = walker.step(cur, pseudotime, &mut rng)?;
                path.push(cur);
                if is_leaf[cur] {
                    path.sort_unstable();
                    path.dedup();
                    return Some(path);
                }
            }
            None
        })
        .collect::<Vec<_>>();

    let n_reached = paths.len();
    let mut visits = vec![0u32; n];
    for path in paths.iter() {
        for &i in path {
            visits[i] += 1;
        }
    }

    if n_reached == 0 {
        warn!("no walk reached a leaf cell; trajectory values are all zero");
    } else {
        info!("{} of {} walks reached a leaf", n_reached, n_walks);
    }

    let max_visits = visits.iter().copied().max().unwrap_or(0) as f32;
    let (traj_value, traj_value_log): (Vec<f32>, Vec<f32>) = visits
        .iter()
        .map(|&v| {
            if max_visits > 0.0 {
                let v = v as f32;
                (v / max_visits, (v + 1.0).log10() / (max_visits + 1.0).log10())
            } else {
                (0.0, 0.0)
            }
        })
        .unzip();

    let intermediate = (0..n)
        .map(|i| traj_value[i] >= config.threshold && !is_root[i] && !is_leaf[i])
        .collect::<Vec<_>>();

    info!(
        "{} intermediate cells (traj_value >= {})",
        intermediate.iter().filter(|&&x| x).count(),
        config.threshold
    );

    Ok(TrajectoryValue {
        visits,
        traj_value,
        traj_value_log,
        intermediate,
        n_walks,
        n_reached,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 0 - 1 - 2 - 3 (leaf), with a side spur 1 - 4 that dead-ends
    fn spur_graph() -> KnnGraph {
        KnnGraph::from_edges(
            5,
            vec![((0, 1), 1.0), ((1, 2), 1.0), ((1, 4), 1.0), ((2, 3), 1.0)],
        )
    }

    #[test]
    fn test_walks_pass_through_bridge() -> anyhow::Result<()> {
        let g = spur_graph();
        let pt = [0.0, 0.25, 0.5, 1.0, 0.5];
        let config = WalkConfig {
            walks_per_root: 50,
            ..Default::default()
        };
        let tv = trajectory_values(&g, &pt, &[0], &[3], &config)?;

        assert_eq!(tv.n_walks, 50);
        assert!(tv.n_reached > 0 && tv.n_reached < 50);
        // every successful walk goes 0 -> 1 -> 2 -> 3
        assert_eq!(tv.visits[1] as usize, tv.n_reached);
        assert_eq!(tv.visits[4], 0);
        assert_eq!(tv.traj_value[2], 1.0);
        approx::assert_abs_diff_eq!(tv.traj_value_log[1], 1.0, epsilon = 1e-6);
        assert_eq!(tv.intermediate, vec![false, true, true, false, false]);
        Ok(())
    }

    #[test]
    fn test_walks_deterministic() -> anyhow::Result<()> {
        let g = spur_graph();
        let pt = [0.0, 0.25, 0.5, 1.0, 0.5];
        let a = trajectory_values(&g, &pt, &[0], &[3], &WalkConfig::default())?;
        let b = trajectory_values(&g, &pt, &[0], &[3], &WalkConfig::default())?;
        assert_eq!(a.visits, b.visits);
        Ok(())
    }

    #[test]
    fn test_root_leaf_overlap_rejected() {
        let g = spur_graph();
        let pt = [0.0; 5];
        assert!(trajectory_values(&g, &pt, &[0, 3], &[3], &WalkConfig::default()).is_err());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let g = spur_graph();
        let pt = [0.0, 0.25, 0.5, 1.0, 0.5];
        for threshold in [0.0, -0.5, 1.5, f32::NAN] {
            let config = WalkConfig {
                threshold,
                ..Default::default()
            };
            assert!(trajectory_values(&g, &pt, &[0], &[3], &config).is_err());
        }
    }

    #[test]
    fn test_full_threshold_keeps_only_most_visited() -> anyhow::Result<()> {
        let g = spur_graph();
        let pt = [0.0, 0.25, 0.5, 1.0, 0.5];
        let config = WalkConfig {
            walks_per_root: 50,
            threshold: 1.0,
            ..Default::default()
        };
        let tv = trajectory_values(&g, &pt, &[0], &[3], &config)?;
        assert_eq!(tv.intermediate, vec![false, true, true, false, false]);
        Ok(())
    }

    #[test]
    fn test_no_walk_reaches_leaf() -> anyhow::Result<()> {
        let g = spur_graph();
        // the leaf sits behind a pseudotime drop
        let pt = [0.0, 0.5, 0.4, 0.3, 0.6];
        let tv = trajectory_values(&g, &pt, &[0], &[3], &WalkConfig::default())?;
        assert_eq!(tv.n_reached, 0);
        assert!(tv.traj_value.iter().all(|&v| v == 0.0));
        assert!(!tv.intermediate.iter().any(|&x| x));
        Ok(())
    }
}
