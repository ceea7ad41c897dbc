pub mod common; // shared types and re-exports
pub mod input; // sample matrices, transforms, merging

pub mod clara; // k-medoids on subsamples
pub mod cluster; // clustering front-end and summaries
pub mod hclust; // agglomerative clustering
pub mod som; // self-organizing map

pub mod diffusion; // diffusion map
pub mod reduce; // PCA and reduction front-end
pub mod spectral; // leading eigenvectors of sparse operators
pub mod tsne;
pub mod umap;

pub mod pseudotime; // graph distance from root cells
pub mod trajectory; // minimum spanning tree over clusters
pub mod walk; // random walks toward leaf cells

pub mod diff; // two-group marker tests
pub mod output;
pub mod pipeline;
