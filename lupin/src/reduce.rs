//! Dimensionality reduction of cells or cluster centroids

use crate::common::*;
use crate::diffusion::{DiffusionArgs, DiffusionMap};
use crate::tsne::TSne;
use crate::umap::{Umap, UmapArgs};
use clap::ValueEnum;
use matrix_util::dmatrix_rsvd::RSVD;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReductionMethod {
    #[default]
    Pca,
    Tsne,
    Diffusion,
    Umap,
}

impl std::fmt::Display for ReductionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReductionMethod::Pca => "pca",
            ReductionMethod::Tsne => "tsne",
            ReductionMethod::Diffusion => "dc",
            ReductionMethod::Umap => "umap",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReduceConfig {
    pub method: ReductionMethod,
    pub n_dims: usize,
    pub knn: usize,
    pub perplexity: f32,
    pub tsne_iter: usize,
    pub min_dist: f32,
    pub spread: f32,
    pub umap_epochs: usize,
    pub seed: u64,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            method: ReductionMethod::Pca,
            n_dims: 2,
            knn: DEFAULT_KNN,
            perplexity: 30.0,
            tsne_iter: 1000,
            min_dist: 0.1,
            spread: 1.0,
            umap_epochs: 200,
            seed: DEFAULT_SEED,
        }
    }
}

/// Low-dimensional coordinates of every input row
#[derive(Clone, Debug)]
pub struct Embedding {
    pub method: ReductionMethod,
    /// rows × n_dims
    pub coords: Mat,
    /// per-dimension score: explained variance for PCA, eigenvalue for
    /// diffusion maps, empty otherwise
    pub scores: Vec<f32>,
}

impl Embedding {
    /// Column names such as `pca_1`, `tsne_2`
    pub fn column_names(&self) -> Vec<Box<str>> {
        (1..=self.coords.ncols())
            .map(|j| format!("{}_{}", self.method, j).into_boxed_str())
            .collect()
    }
}

fn check_input(data: &Mat, n_dims: usize) -> anyhow::Result<()> {
    anyhow::ensure!(n_dims > 0, "n_dims must be positive");
    anyhow::ensure!(
        data.nrows() > n_dims,
        "need more than {} rows to embed in {} dimensions, got {}",
        n_dims,
        n_dims,
        data.nrows()
    );
    anyhow::ensure!(
        data.iter().all(|x| x.is_finite()),
        "input to dimensionality reduction contains non-finite values"
    );
    Ok(())
}

/// Embed the rows of `data`
pub fn reduce(data: &Mat, config: &ReduceConfig) -> anyhow::Result<Embedding> {
    check_input(data, config.n_dims)?;
    info!(
        "{:?}: {} rows x {} features -> {} dims",
        config.method,
        data.nrows(),
        data.ncols(),
        config.n_dims
    );

    match config.method {
        ReductionMethod::Pca => {
            let pca = Pca::fit(data, config.n_dims)?;
            Ok(Embedding {
                method: config.method,
                coords: pca.transform(data)?,
                scores: pca.explained_variance.clone(),
            })
        }
        ReductionMethod::Tsne => {
            let coords = TSne::default()
                .perplexity(config.perplexity)
                .n_iter(config.tsne_iter)
                .n_dims(config.n_dims)
                .seed(config.seed)
                .fit(data)?;
            Ok(Embedding {
                method: config.method,
                coords,
                scores: vec![],
            })
        }
        ReductionMethod::Diffusion => {
            let dm = DiffusionMap::fit(
                data,
                &DiffusionArgs {
                    n_dims: config.n_dims,
                    knn: config.knn,
                    seed: config.seed,
                },
            )?;
            Ok(Embedding {
                method: config.method,
                coords: dm.coords,
                scores: dm.eigenvalues,
            })
        }
        ReductionMethod::Umap => {
            let args = UmapArgs {
                n_dims: config.n_dims,
                knn: config.knn,
                min_dist: config.min_dist,
                spread: config.spread,
                n_epochs: config.umap_epochs,
                seed: config.seed,
            };
            Ok(Embedding {
                method: config.method,
                coords: Umap::new(args)?.fit(data)?,
                scores: vec![],
            })
        }
    }
}

/// Principal components by randomized SVD of the centred matrix
#[derive(Clone, Debug)]
pub struct Pca {
    /// column means of the training data
    pub mean: DVec,
    /// features × components
    pub loadings: Mat,
    pub explained_variance: Vec<f32>,
    /// fraction of the total variance per component
    pub explained_ratio: Vec<f32>,
}

impl Pca {
    pub fn fit(data: &Mat, n_components: usize) -> anyhow::Result<Self> {
        let n = data.nrows();
        anyhow::ensure!(n >= 2, "PCA needs at least 2 rows");
        let rank = n_components.min(n).min(data.ncols());
        anyhow::ensure!(rank > 0, "PCA needs at least one component and one feature");

        let mean = DVec::from_iterator(data.ncols(), data.column_iter().map(|c| c.mean()));
        let centred = data.centre_columns();
        let (_, d, v) = centred.rsvd(rank)?;

        let denom = (n - 1) as f32;
        let total: f32 = centred.iter().map(|x| x * x).sum::<f32>() / denom;
        let explained_variance = d.iter().map(|s| s * s / denom).collect::<Vec<_>>();
        let explained_ratio = explained_variance
            .iter()
            .map(|v| if total > 0.0 { v / total } else { 0.0 })
            .collect();

        Ok(Self {
            mean,
            loadings: v,
            explained_variance,
            explained_ratio,
        })
    }

    pub fn n_components(&self) -> usize {
        self.loadings.ncols()
    }

    /// Project rows onto the components
    pub fn transform(&self, data: &Mat) -> anyhow::Result<Mat> {
        anyhow::ensure!(
            data.ncols() == self.mean.len(),
            "PCA was fitted on {} features, got {}",
            self.mean.len(),
            data.ncols()
        );
        let mut centred = data.clone();
        for mut row in centred.row_iter_mut() {
            row -= self.mean.transpose();
        }
        Ok(centred * &self.loadings)
    }
}
