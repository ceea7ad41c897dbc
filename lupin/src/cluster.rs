//! Clustering cells on (normalized) marker expression
//!
//! Every method ends in a [`ClusterResult`] whose labels are contiguous
//! `0..n_clusters`, numbered by decreasing cluster size.

use crate::clara::{clara, ClaraArgs};
use crate::common::*;
use crate::hclust::{hclust, Linkage};
use crate::som::{Som, SomArgs};
use clap::ValueEnum;
use leiden::clustering::SimpleClustering;
use leiden::leiden::Leiden;
use leiden::network::Graph;
use leiden::{Clustering, Network};
use matrix_util::clustering::{Kmeans, KmeansArgs};
use matrix_util::dmatrix_util::group_row_means;
use matrix_util::knn_graph::{KnnGraph, KnnGraphArgs};
use matrix_util::utils::partition_by_membership;

/// Clustering method
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ClusterMethod {
    /// self-organizing map, optionally metaclustered
    #[default]
    Som,
    Kmeans,
    /// k-medoids on random subsets
    Clara,
    /// agglomerative clustering
    Hclust,
    /// Leiden community detection on a kNN graph
    Leiden,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub method: ClusterMethod,
    /// number of clusters; for SOM the number of metaclusters (none if
    /// `None`), for Leiden the resolution-tuning target
    pub num_clusters: Option<usize>,
    pub som: SomArgs,
    pub linkage: Linkage,
    pub max_iter: usize,
    pub clara_samples: usize,
    pub knn: usize,
    pub resolution: f64,
    /// clusters smaller than this are absorbed by their nearest neighbour
    pub min_cluster_size: usize,
    pub seed: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            method: ClusterMethod::Som,
            num_clusters: None,
            som: SomArgs::default(),
            linkage: Linkage::Average,
            max_iter: 100,
            clara_samples: 5,
            knn: DEFAULT_KNN,
            resolution: 1.0,
            min_cluster_size: 1,
            seed: DEFAULT_SEED,
        }
    }
}

/// Clustering result
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterResult {
    /// Cluster assignment for each cell (cell index -> cluster id)
    pub labels: Vec<usize>,
    /// Number of clusters
    pub n_clusters: usize,
}

impl ClusterResult {
    /// Renumber arbitrary labels contiguously by first appearance
    pub fn from_labels(labels: Vec<usize>) -> Self {
        let mut map = std::collections::HashMap::new();
        let labels = labels
            .into_iter()
            .map(|l| {
                let next = map.len();
                *map.entry(l).or_insert(next)
            })
            .collect::<Vec<_>>();
        ClusterResult {
            labels,
            n_clusters: map.len(),
        }
    }

    /// Get cluster size distribution
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_clusters];
        for &label in &self.labels {
            if label < self.n_clusters {
                counts[label] += 1;
            }
        }
        counts
    }

    /// Renumber so that cluster 0 is the largest; ties keep the old order
    pub fn relabel_by_size(&mut self) {
        let sizes = self.cluster_sizes();
        let mut order = (0..self.n_clusters).collect::<Vec<_>>();
        order.sort_by(|&a, &b| sizes[b].cmp(&sizes[a]).then(a.cmp(&b)));

        let mut new_label = vec![0; self.n_clusters];
        for (new, &old) in order.iter().enumerate() {
            new_label[old] = new;
        }
        for label in self.labels.iter_mut() {
            *label = new_label[*label];
        }
    }

    /// Move cells of clusters smaller than `min_size` to the nearest
    /// surviving cluster centroid.
    pub fn absorb_small_clusters(&mut self, data: &Mat, min_size: usize) {
        let sizes = self.cluster_sizes();
        let n_small = sizes.iter().filter(|&&s| s < min_size).count();
        if n_small == 0 || n_small == self.n_clusters {
            return;
        }

        let centroids = group_row_means(data, &self.labels, self.n_clusters);
        let keep = (0..self.n_clusters)
            .filter(|&k| sizes[k] >= min_size)
            .collect::<Vec<_>>();
        let kept_centroids = centroids.select_rows(keep.iter());

        let mut moved = 0;
        for (i, label) in self.labels.iter_mut().enumerate() {
            if sizes[*label] < min_size {
                *label = keep[nearest_row(data, i, &kept_centroids).0];
                moved += 1;
            }
        }

        let compact = ClusterResult::from_labels(std::mem::take(&mut self.labels));
        *self = compact;
        info!(
            "Absorbed {} cluster(s) with < {} cells ({} cells moved)",
            n_small, min_size, moved
        );
    }

    /// Map every cell through a cluster -> group table
    pub fn merge_into(&self, meta: &[usize]) -> ClusterResult {
        ClusterResult::from_labels(self.labels.iter().map(|&l| meta[l]).collect())
    }

    /// Get cluster assignment histogram as ASCII, showing up to
    /// `max_show` largest clusters sorted by size (descending).
    pub fn histogram_ascii(&self, max_width: usize, max_show: usize) -> String {
        let sizes = self.cluster_sizes();

        let mut ranked: Vec<(usize, usize)> = sizes
            .iter()
            .enumerate()
            .filter(|(_, &s)| s > 0)
            .map(|(id, &s)| (id, s))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let n_total = ranked.len();
        let n_show = max_show.min(n_total);
        let max_size = ranked.first().map(|&(_, s)| s).unwrap_or(1);

        let mut lines = Vec::new();
        lines.push(format!(
            "Cluster assignments ({} cells, {} clusters):",
            self.labels.len(),
            n_total
        ));
        lines.push(String::new());

        for &(cluster_id, size) in ranked.iter().take(n_show) {
            let pct = 100.0 * size as f64 / self.labels.len() as f64;
            let bar_len = ((size as f64 / max_size as f64) * max_width as f64) as usize;
            let bar = "█".repeat(bar_len.max(1));

            lines.push(format!(
                "  Cluster {:3}  {:>6} cells ({:>5.1}%)  {}",
                cluster_id, size, pct, bar
            ));
        }

        if n_total > n_show {
            let hidden_cells: usize = ranked[n_show..].iter().map(|&(_, s)| s).sum();
            let hidden_pct = 100.0 * hidden_cells as f64 / self.labels.len() as f64;
            lines.push(format!(
                "  ... and {} more clusters ({} cells, {:.1}%)",
                n_total - n_show,
                hidden_cells,
                hidden_pct
            ));
        }

        lines.join("\n")
    }
}

/// Cluster the rows of `data` (cells × markers)
pub fn cluster_cells(data: &Mat, config: &ClusterConfig) -> anyhow::Result<ClusterResult> {
    let n = data.nrows();
    anyhow::ensure!(n > 0, "no cells to cluster");

    let need_k = || {
        config
            .num_clusters
            .ok_or_else(|| anyhow::anyhow!("{:?} needs the number of clusters", config.method))
    };

    let mut result = match config.method {
        ClusterMethod::Som => som_clustering(data, config)?,
        ClusterMethod::Kmeans => kmeans_clustering(data, need_k()?, config.max_iter)?,
        ClusterMethod::Clara => {
            let args = ClaraArgs {
                samples: config.clara_samples,
                seed: config.seed,
                ..ClaraArgs::with_clusters(need_k()?)
            };
            ClusterResult::from_labels(clara(data, &args)?.labels)
        }
        ClusterMethod::Hclust => {
            ClusterResult::from_labels(hclust(data, need_k()?, config.linkage)?)
        }
        ClusterMethod::Leiden => leiden_clustering(
            data,
            config.knn,
            config.resolution,
            config.num_clusters,
            Some(config.seed),
        )?,
    };

    if config.min_cluster_size > 1 {
        result.absorb_small_clusters(data, config.min_cluster_size);
    }
    result.relabel_by_size();

    let sizes = result.cluster_sizes();
    info!(
        "{:?}: {} clusters, sizes min={} max={}",
        config.method,
        result.n_clusters,
        sizes.iter().copied().min().unwrap_or(0),
        sizes.iter().copied().max().unwrap_or(0)
    );
    Ok(result)
}

fn som_clustering(data: &Mat, config: &ClusterConfig) -> anyhow::Result<ClusterResult> {
    let args = SomArgs {
        seed: config.seed,
        ..config.som.clone()
    };
    let som = Som::train(data, &args)?;
    let nodes = ClusterResult::from_labels(som.map(data));
    if nodes.n_clusters < som.n_nodes() {
        info!(
            "SOM: {} of {} nodes are empty",
            som.n_nodes() - nodes.n_clusters,
            som.n_nodes()
        );
    }

    match config.num_clusters {
        Some(k) if k < nodes.n_clusters => {
            let centroids = group_row_means(data, &nodes.labels, nodes.n_clusters);
            let meta = metacluster(&centroids, k, config.linkage)?;
            Ok(nodes.merge_into(&meta))
        }
        _ => Ok(nodes),
    }
}

/// Hierarchical clustering of cluster centroids into `k` groups; returns
/// the group of every centroid row
pub fn metacluster(centroids: &Mat, k: usize, linkage: Linkage) -> anyhow::Result<Vec<usize>> {
    info!(
        "Metaclustering {} centroids into {} groups",
        centroids.nrows(),
        k
    );
    hclust(centroids, k, linkage)
}

/// Run k-means clustering on rows (cells × features)
pub fn kmeans_clustering(data: &Mat, k: usize, max_iter: usize) -> anyhow::Result<ClusterResult> {
    if k == 0 {
        anyhow::bail!("Number of clusters must be > 0");
    }

    let n = data.nrows();
    if k > n {
        anyhow::bail!(
            "Number of clusters ({}) exceeds number of cells ({})",
            k,
            n
        );
    }

    info!(
        "K-means: {} cells x {} markers, k={}, max_iter={}",
        n,
        data.ncols(),
        k,
        max_iter
    );

    let labels = data.kmeans_rows(KmeansArgs {
        num_clusters: k,
        max_iter,
    });
    Ok(ClusterResult::from_labels(labels))
}

/// Run Leiden community detection on rows (cells × features)
///
/// * `target_clusters` - if Some, binary-search resolution to approximate this count
/// * `resolution` - starting (or fixed) modularity resolution
pub fn leiden_clustering(
    data: &Mat,
    knn: usize,
    resolution: f64,
    target_clusters: Option<usize>,
    seed: Option<u64>,
) -> anyhow::Result<ClusterResult> {
    let n = data.nrows();
    if n < 2 {
        anyhow::bail!("Need at least 2 cells for Leiden clustering");
    }

    info!(
        "Leiden: {} cells x {} markers, knn={}, seed={:?}",
        n,
        data.ncols(),
        knn,
        seed
    );

    let graph = KnnGraph::from_rows(data, KnnGraphArgs::union(knn))?;
    info!(
        "KNN graph: {} nodes, {} edges, {} component(s)",
        graph.num_nodes(),
        graph.num_edges(),
        graph.num_components()
    );

    // Modularity quality increment: Δ = w_jl - γ · k_j · K_l / (2m)
    // The Leiden crate uses CPM form: Δ = w_jl - node_w · cluster_w · res
    // Setting node weights = degree and res = γ/(2m) gives modularity.
    let weights = graph.fuzzy_kernel_weights();

    let mut node_degree = vec![0.0f32; n];
    let mut total_edge_weight = 0.0f64;
    for (&(i, j), &w) in graph.edges.iter().zip(weights.iter()) {
        node_degree[i] += w;
        node_degree[j] += w;
        total_edge_weight += w as f64;
    }

    let mut leiden_graph = Graph::with_capacity(n, graph.num_edges());
    for &deg in node_degree.iter() {
        leiden_graph.add_node(deg);
    }
    for (&(i, j), &w) in graph.edges.iter().zip(weights.iter()) {
        leiden_graph.add_edge((i as u32).into(), (j as u32).into(), w);
    }
    let network = Network::new_from_graph(leiden_graph);

    let resolution_scaled = resolution / (2.0 * total_edge_weight);
    info!(
        "Modularity resolution={:.4} → scaled={:.6e}",
        resolution, resolution_scaled
    );

    let seed_val = seed.map(|s| s as usize);

    let result = if let Some(target_k) = target_clusters {
        info!("Auto-tuning resolution to target ~{} clusters ...", target_k);
        tune_leiden_resolution(&network, n, target_k, resolution_scaled, seed_val)
    } else {
        run_leiden(&network, n, resolution_scaled, seed_val)
    };

    Ok(result)
}

fn run_leiden(network: &Network, n: usize, resolution: f64, seed: Option<usize>) -> ClusterResult {
    let mut leiden = Leiden::new(resolution, 0.01, seed);
    let mut clustering = SimpleClustering::init_different_clusters(n);

    let max_outer = 10;
    for iter in 0..max_outer {
        let updated = leiden.iterate(network, &mut clustering);
        debug!(
            "  iteration {}: {} clusters{}",
            iter + 1,
            clustering.num_clusters(),
            if !updated { " (converged)" } else { "" }
        );
        if !updated {
            break;
        }
    }

    ClusterResult::from_labels((0..n).map(|i| clustering.get(i)).collect())
}

/// Binary search on resolution to get close to `target_k` clusters.
///
/// Lower resolution → fewer clusters; higher → more clusters.
fn tune_leiden_resolution(
    network: &Network,
    n: usize,
    target_k: usize,
    initial_resolution: f64,
    seed: Option<usize>,
) -> ClusterResult {
    let mut lo = 0.0_f64;
    let mut hi = f64::INFINITY;
    let mut mid = initial_resolution;
    let mut best = run_leiden(network, n, mid, seed);
    let mut best_res = mid;

    const MAX_SEARCH: usize = 30;

    for step in 0..MAX_SEARCH {
        let result = if step == 0 {
            best.clone()
        } else {
            run_leiden(network, n, mid, seed)
        };
        info!(
            "  step {}: resolution={:.6e} → {} clusters",
            step + 1,
            mid,
            result.n_clusters
        );

        if result.n_clusters.abs_diff(target_k) < best.n_clusters.abs_diff(target_k) {
            best = result.clone();
            best_res = mid;
        }
        if best.n_clusters == target_k {
            break;
        }

        if result.n_clusters > target_k {
            hi = mid;
        } else {
            lo = mid;
        }
        mid = if hi.is_infinite() {
            mid * 2.0
        } else {
            (lo + hi) / 2.0
        };
        if hi.is_finite() && (hi - lo) / hi.max(1e-12) < 1e-4 {
            break;
        }
    }

    info!(
        "  best resolution={:.6e} → {} clusters (target {})",
        best_res, best.n_clusters, target_k
    );
    best
}

/// Per-cluster statistics of a clustering
#[derive(Clone, Debug)]
pub struct ClusterSummary {
    /// clusters × markers mean expression
    pub centroids: Mat,
    pub sizes: Vec<usize>,
    pub stage_levels: Vec<Box<str>>,
    /// `stage_counts[k][s]`: cells of cluster `k` in stage `s`
    pub stage_counts: Vec<Vec<usize>>,
}

impl ClusterSummary {
    pub fn new(expr: &Mat, result: &ClusterResult, stages: &[Box<str>]) -> Self {
        let mut stage_levels: Vec<Box<str>> = Vec::new();
        for s in stages {
            if !stage_levels.contains(s) {
                stage_levels.push(s.clone());
            }
        }

        let rows_by_stage = partition_by_membership(stages);
        let mut stage_counts = vec![vec![0; stage_levels.len()]; result.n_clusters];
        for (s, level) in stage_levels.iter().enumerate() {
            for &i in rows_by_stage[level].iter() {
                stage_counts[result.labels[i]][s] += 1;
            }
        }

        Self {
            centroids: group_row_means(expr, &result.labels, result.n_clusters),
            sizes: result.cluster_sizes(),
            stage_levels,
            stage_counts,
        }
    }
}
