use clap::{Args, ValueEnum};
use lupin::cluster::{ClusterConfig, ClusterMethod};
use lupin::common::parse_id_list;
use lupin::hclust::Linkage;
use lupin::input::{InputConfig, MergeMethod, SampleSpec, Transform};
use lupin::pseudotime::Selection;
use lupin::som::SomArgs;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum TransformArg {
    None,
    Arcsinh,
    Log1p,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum MergeArg {
    All,
    Ceil,
    Fixed,
    Min,
}

#[derive(Args, Debug)]
pub struct InputArgs {
    #[arg(
        required = true,
        value_name = "PATH[:SAMPLE[:STAGE]]",
        help = "Expression matrices (cells x markers)",
        long_help = "Expression matrices, one per sample: a header line of marker\n\
		     names, then one line per cell starting with the cell name.\n\
		     `.csv` files are comma-separated, anything else tab-separated;\n\
		     `.gz` is read transparently. The sample name defaults to the\n\
		     file's base name and the stage to the sample name."
    )]
    pub samples: Vec<String>,

    #[arg(
        long,
        value_delimiter = ',',
        help = "Markers to use (comma-separated)",
        long_help = "Markers to use (comma-separated). Every sample must have them.\n\
		     Default: all markers shared by every sample."
    )]
    pub markers: Option<Vec<Box<str>>>,

    #[arg(long, value_enum, default_value = "arcsinh", help = "Intensity transformation")]
    pub transform: TransformArg,

    #[arg(
        long,
        default_value_t = 5.0,
        help = "Arcsinh cofactor",
        long_help = "Arcsinh cofactor: 5 for mass cytometry, 150 for fluorescence."
    )]
    pub cofactor: f32,

    #[arg(
        long,
        value_enum,
        default_value = "ceil",
        help = "How many cells to keep per sample",
        long_help = "How many cells to keep per sample:\n\
		     all   : every cell\n\
		     ceil  : at most --merge-size cells\n\
		     fixed : --merge-size cells; smaller samples are kept whole\n\
		     min   : as many as the smallest sample"
    )]
    pub merge: MergeArg,

    #[arg(long, default_value_t = 5000, help = "Cells per sample for ceil/fixed")]
    pub merge_size: usize,
}

impl InputArgs {
    pub fn sample_specs(&self) -> anyhow::Result<Vec<SampleSpec>> {
        self.samples.iter().map(|s| s.parse()).collect()
    }

    pub fn to_config(&self, seed: u64) -> InputConfig {
        InputConfig {
            markers: self.markers.clone(),
            transform: match self.transform {
                TransformArg::None => Transform::None,
                TransformArg::Arcsinh => Transform::Arcsinh {
                    cofactor: self.cofactor,
                },
                TransformArg::Log1p => Transform::Log1p,
            },
            merge: match self.merge {
                MergeArg::All => MergeMethod::All,
                MergeArg::Ceil => MergeMethod::Ceil(self.merge_size),
                MergeArg::Fixed => MergeMethod::Fixed(self.merge_size),
                MergeArg::Min => MergeMethod::Min,
            },
            seed,
        }
    }
}

#[derive(Args, Debug)]
pub struct ClusterOpts {
    #[arg(long, value_enum, default_value = "som", help = "Clustering method")]
    pub method: ClusterMethod,

    #[arg(
        short = 'k',
        long,
        help = "Number of clusters",
        long_help = "Number of clusters. Required for kmeans, clara and hclust.\n\
		     For som, the number of metaclusters of the map nodes (none if unset).\n\
		     For leiden, the target of resolution tuning."
    )]
    pub num_clusters: Option<usize>,

    #[arg(long, default_value_t = 6, help = "SOM grid width")]
    pub xdim: usize,

    #[arg(long, default_value_t = 6, help = "SOM grid height")]
    pub ydim: usize,

    #[arg(long, default_value_t = 8, help = "SOM training passes over the data")]
    pub rlen: usize,

    #[arg(
        long,
        value_enum,
        default_value = "average",
        help = "Linkage for hclust and SOM metaclustering"
    )]
    pub linkage: Linkage,

    #[arg(long, default_value_t = 100, help = "Maximum k-means iterations")]
    pub max_iter: usize,

    #[arg(long, default_value_t = 5, help = "Number of CLARA subsets")]
    pub clara_samples: usize,

    #[arg(long, default_value_t = 1.0, help = "Leiden modularity resolution")]
    pub resolution: f64,

    #[arg(
        long,
        default_value_t = 1,
        help = "Absorb clusters smaller than this into their nearest cluster"
    )]
    pub min_cluster_size: usize,

    #[arg(
        long,
        default_value_t = 15,
        help = "Nearest neighbours for the Leiden graph"
    )]
    pub cluster_knn: usize,
}

impl ClusterOpts {
    pub fn to_config(&self, seed: u64) -> ClusterConfig {
        ClusterConfig {
            method: self.method,
            num_clusters: self.num_clusters,
            som: SomArgs {
                xdim: self.xdim,
                ydim: self.ydim,
                rlen: self.rlen,
                seed,
                ..Default::default()
            },
            linkage: self.linkage,
            max_iter: self.max_iter,
            clara_samples: self.clara_samples,
            knn: self.cluster_knn,
            resolution: self.resolution,
            min_cluster_size: self.min_cluster_size,
            seed,
        }
    }
}

/// Clusters from `1,2,3` and cell ids from a comma-separated list
pub fn selection(clusters: Option<&str>, cells: &[Box<str>]) -> anyhow::Result<Selection> {
    Ok(Selection {
        clusters: match clusters {
            Some(text) => parse_id_list(text)?,
            None => vec![],
        },
        cells: cells.to_vec(),
    })
}
