pub mod clustering; // k-means over rows or columns
pub mod common_io; // gzip-aware line I/O
pub mod dmatrix_io; // named delimited matrices
pub mod dmatrix_rsvd; // randomized SVD
pub mod dmatrix_util; // column scaling and random matrices
pub mod knn_graph; // symmetric kNN graph
pub mod knn_match; // HNSW column dictionary
pub mod traits;
pub mod utils; // membership partitions and job intervals
