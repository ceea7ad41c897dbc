use crate::cli_common::*;
use clap::Args;
use log::info;
use lupin::input::read_samples;
use lupin::output::{read_config, write_pipeline_outputs};
use lupin::pipeline::{run_pipeline, PipelineConfig, TreeSpace};
use lupin::reduce::{ReduceConfig, ReductionMethod};
use lupin::walk::WalkConfig;

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub cluster: ClusterOpts,

    #[arg(
        long,
        value_enum,
        default_value = "pca",
        help = "Dimensionality reduction for the cell embedding"
    )]
    pub reduction: ReductionMethod,

    #[arg(long, default_value_t = 2, help = "Embedding dimensions")]
    pub n_dims: usize,

    #[arg(long, default_value_t = 30.0, help = "t-SNE perplexity")]
    pub perplexity: f32,

    #[arg(long, default_value_t = 1000, help = "t-SNE iterations")]
    pub tsne_iter: usize,

    #[arg(long, default_value_t = 0.1, help = "UMAP minimum distance")]
    pub min_dist: f32,

    #[arg(long, default_value_t = 1.0, help = "UMAP spread")]
    pub spread: f32,

    #[arg(long, default_value_t = 200, help = "UMAP optimization epochs")]
    pub umap_epochs: usize,

    #[arg(
        long,
        default_value_t = 10,
        help = "Principal components used by nonlinear reductions and the tree"
    )]
    pub n_pcs: usize,

    #[arg(
        long,
        value_enum,
        default_value = "pca",
        help = "Space for the cluster tree and cell distances",
        long_help = "Space in which cluster centroids are connected by the spanning\n\
		     tree and cells are connected by the kNN graph:\n\
		     pca       : leading principal components (--n-pcs)\n\
		     expr      : normalized marker expression\n\
		     embedding : the --reduction embedding"
    )]
    pub tree_space: TreeSpace,

    #[arg(long, default_value_t = 15, help = "Nearest neighbours in the cell graph")]
    pub knn: usize,

    #[arg(long, help = "Root clusters (comma-separated)")]
    pub root_clusters: Option<String>,

    #[arg(long, value_delimiter = ',', help = "Root cell ids (comma-separated)")]
    pub root_cells: Vec<Box<str>>,

    #[arg(long, help = "Leaf clusters (comma-separated)")]
    pub leaf_clusters: Option<String>,

    #[arg(long, value_delimiter = ',', help = "Leaf cell ids (comma-separated)")]
    pub leaf_cells: Vec<Box<str>>,

    #[arg(long, default_value_t = 10, help = "Random walks started per root cell")]
    pub walks_per_root: usize,

    #[arg(long, default_value_t = 500, help = "Maximum steps per walk")]
    pub max_steps: usize,

    #[arg(
        long,
        default_value_t = 0.1,
        help = "Trajectory value (in (0, 1]) at or above which a cell is intermediate"
    )]
    pub threshold: f32,

    #[arg(long, default_value_t = 20, help = "Pseudotime bins for marker trends")]
    pub n_bins: usize,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    pub seed: u64,

    #[arg(
        long,
        help = "Pipeline settings in JSON",
        long_help = "Pipeline settings in JSON, e.g. the `.config.json` of an earlier run.\n\
		     Replaces every option above except the sample files; roots and\n\
		     leaves given on the command line take precedence."
    )]
    pub config: Option<Box<str>>,

    #[arg(short, long, required = true, help = "Output file prefix")]
    pub out: Box<str>,
}

impl RunArgs {
    fn to_config(&self) -> anyhow::Result<PipelineConfig> {
        let roots = selection(self.root_clusters.as_deref(), &self.root_cells)?;
        let leaves = selection(self.leaf_clusters.as_deref(), &self.leaf_cells)?;

        if let Some(path) = self.config.as_deref() {
            info!("reading settings from {}", path);
            let mut config = read_config(path)?;
            if !roots.is_empty() {
                config.roots = roots;
            }
            if !leaves.is_empty() {
                config.leaves = leaves;
            }
            return Ok(config);
        }

        Ok(PipelineConfig {
            input: self.input.to_config(self.seed),
            cluster: self.cluster.to_config(self.seed),
            reduce: ReduceConfig {
                method: self.reduction,
                n_dims: self.n_dims,
                knn: self.knn,
                perplexity: self.perplexity,
                tsne_iter: self.tsne_iter,
                min_dist: self.min_dist,
                spread: self.spread,
                umap_epochs: self.umap_epochs,
                seed: self.seed,
            },
            n_pcs: self.n_pcs,
            tree_space: self.tree_space,
            knn: self.knn,
            roots,
            leaves,
            walk: WalkConfig {
                walks_per_root: self.walks_per_root,
                max_steps: self.max_steps,
                threshold: self.threshold,
                seed: self.seed,
            },
            n_bins: self.n_bins,
        })
    }
}

pub fn run_trajectory(args: &RunArgs) -> anyhow::Result<()> {
    let config = args.to_config()?;
    let specs = args.input.sample_specs()?;

    let data = read_samples(&specs, &config.input)?;
    info!(
        "{} cells x {} markers from {} samples",
        data.n_cells(),
        data.n_markers(),
        specs.len()
    );

    let res = run_pipeline(&data, &config)?;
    write_pipeline_outputs(&args.out, &data, &config, &res)?;
    Ok(())
}
