//! Clustering → reduction → tree → pseudotime → walks, in order

use crate::cluster::{cluster_cells, ClusterConfig, ClusterResult, ClusterSummary};
use crate::common::*;
use crate::input::{CytoData, InputConfig};
use crate::pseudotime::{estimate_pseudotime, Pseudotime, PseudotimeInput, Selection};
use crate::reduce::{reduce, Embedding, Pca, ReduceConfig, ReductionMethod};
use crate::trajectory::ClusterTree;
use crate::walk::{trajectory_values, TrajectoryValue, WalkConfig};
use clap::ValueEnum;
use matrix_util::dmatrix_util::group_row_means;
use matrix_util::knn_graph::{KnnGraph, KnnGraphArgs};

/// Space in which cluster centroids are connected and cell distances
/// are measured
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TreeSpace {
    /// leading principal components of normalized expression
    #[default]
    Pca,
    /// normalized expression
    Expr,
    /// the cell embedding
    Embedding,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub input: InputConfig,
    pub cluster: ClusterConfig,
    pub reduce: ReduceConfig,
    pub n_pcs: usize,
    pub tree_space: TreeSpace,
    /// neighbours per cell in the pseudotime/walk graph
    pub knn: usize,
    pub roots: Selection,
    pub leaves: Selection,
    pub walk: WalkConfig,
    pub n_bins: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: InputConfig::default(),
            cluster: ClusterConfig::default(),
            reduce: ReduceConfig::default(),
            n_pcs: 10,
            tree_space: TreeSpace::Pca,
            knn: DEFAULT_KNN,
            roots: Selection::default(),
            leaves: Selection::default(),
            walk: WalkConfig::default(),
            n_bins: 20,
        }
    }
}

/// Mean raw expression in equal-width pseudotime bins
#[derive(Clone, Debug)]
pub struct PseudotimeBins {
    /// `n_bins + 1` bin edges on `[0, 1]`
    pub edges: Vec<f32>,
    pub counts: Vec<usize>,
    /// bins × markers; NaN for empty bins
    pub means: Mat,
}

impl PseudotimeBins {
    pub fn new(expr: &Mat, pseudotime: &[f32], n_bins: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(n_bins > 0, "n_bins must be positive");
        let bin_of = |v: f32| ((v * n_bins as f32).floor() as usize).min(n_bins - 1);

        let labels = pseudotime.iter().map(|&v| bin_of(v)).collect::<Vec<_>>();
        let mut counts = vec![0usize; n_bins];
        for &b in labels.iter() {
            counts[b] += 1;
        }
        let mut means = group_row_means(expr, &labels, n_bins);
        for (b, &c) in counts.iter().enumerate() {
            if c == 0 {
                means.row_mut(b).fill(f32::NAN);
            }
        }

        Ok(Self {
            edges: (0..=n_bins).map(|b| b as f32 / n_bins as f32).collect(),
            counts,
            means,
        })
    }
}

pub struct PipelineResult {
    pub clusters: ClusterResult,
    pub summary: ClusterSummary,
    pub pca: Pca,
    /// cells in the chosen reduction
    pub embedding: Embedding,
    /// clusters × dims, per-cluster mean of the cell embedding
    pub cluster_embedding: Mat,
    pub tree_space: TreeSpace,
    /// clusters × dims in the tree space
    pub tree_points: Mat,
    pub tree: ClusterTree,
    pub cluster_branch: Vec<usize>,
    pub cell_branch: Vec<usize>,
    pub n_branches: usize,
    pub root_cells: Vec<usize>,
    pub leaf_cells: Vec<usize>,
    pub pseudotime: Pseudotime,
    pub trajectory: Option<TrajectoryValue>,
    pub bins: PseudotimeBins,
}

impl PipelineResult {
    pub fn root_clusters(&self) -> Vec<usize> {
        Selection::clusters_of(&self.root_cells, &self.clusters.labels)
    }

    pub fn leaf_clusters(&self) -> Vec<usize> {
        Selection::clusters_of(&self.leaf_cells, &self.clusters.labels)
    }
}

pub fn run_pipeline(data: &CytoData, config: &PipelineConfig) -> anyhow::Result<PipelineResult> {
    let n = data.n_cells();
    anyhow::ensure!(n >= 3, "need at least 3 cells, got {}", n);
    anyhow::ensure!(
        !config.roots.is_empty(),
        "no root clusters or root cells were given"
    );

    let norm = data.normalized();

    info!("[1/5] clustering {} cells", n);
    let clusters = cluster_cells(&norm, &config.cluster)?;
    info!("\n{}", clusters.histogram_ascii(40, 20));
    let summary = ClusterSummary::new(&data.expr, &clusters, &data.stages);

    info!("[2/5] dimensionality reduction");
    let pca = Pca::fit(&norm, config.n_pcs.min(data.n_markers()))?;
    let pcs = pca.transform(&norm)?;
    let embedding = if config.reduce.method == ReductionMethod::Pca {
        reduce(&norm, &config.reduce)?
    } else {
        reduce(&pcs, &config.reduce)?
    };
    let cluster_embedding = group_row_means(&embedding.coords, &clusters.labels, clusters.n_clusters);

    info!("[3/5] minimum spanning tree in {:?} space", config.tree_space);
    let cell_space = match config.tree_space {
        TreeSpace::Pca => &pcs,
        TreeSpace::Expr => &norm,
        TreeSpace::Embedding => &embedding.coords,
    };
    let tree_points = group_row_means(cell_space, &clusters.labels, clusters.n_clusters);
    let tree = ClusterTree::build(&tree_points)?;
    let (cluster_branch, n_branches) = tree.branches();
    let cell_branch = clusters
        .labels
        .iter()
        .map(|&k| cluster_branch[k])
        .collect::<Vec<_>>();
    info!(
        "tree: {} edges, {} leaves, {} branch points, {} branches",
        tree.edges.len(),
        tree.leaves().len(),
        tree.branch_points().len(),
        n_branches
    );

    info!("[4/5] pseudotime");
    let cell_index = data.cell_index();
    let root_cells = config
        .roots
        .resolve(&clusters.labels, clusters.n_clusters, &cell_index)?;

    let graph = KnnGraph::from_rows(cell_space, KnnGraphArgs::union(config.knn.min(n - 1)))?;
    let pseudotime = estimate_pseudotime(
        &PseudotimeInput {
            graph: &graph,
            coords: cell_space,
            labels: &clusters.labels,
            tree: &tree,
            tree_points: &tree_points,
        },
        &root_cells,
    )?;

    info!("[5/5] intermediate states");
    let (leaf_cells, trajectory) = if config.leaves.is_empty() {
        info!("no leaves given; skipping walks");
        (vec![], None)
    } else {
        let leaf_cells = config
            .leaves
            .resolve(&clusters.labels, clusters.n_clusters, &cell_index)?;
        let tv = trajectory_values(
            &graph,
            &pseudotime.value,
            &root_cells,
            &leaf_cells,
            &config.walk,
        )?;
        (leaf_cells, Some(tv))
    };

    let bins = PseudotimeBins::new(&data.expr, &pseudotime.value, config.n_bins)?;

    Ok(PipelineResult {
        clusters,
        summary,
        pca,
        embedding,
        cluster_embedding,
        tree_space: config.tree_space,
        tree_points,
        tree,
        cluster_branch,
        cell_branch,
        n_branches,
        root_cells,
        leaf_cells,
        pseudotime,
        trajectory,
        bins,
    })
}
