use crate::common_io::Delimiter;

/// A matrix with row and column names
#[derive(Clone, Debug)]
pub struct MatWithNames<T> {
    pub rows: Vec<Box<str>>,
    pub cols: Vec<Box<str>>,
    pub mat: T,
}

/// Normalize or scale columns
pub trait MatOps {
    type Mat;
    type Scalar;

    /// `X[,j] / max(1, ||X[,j]||)`
    fn normalize_columns_inplace(&mut self);
    fn normalize_columns(&self) -> Self::Mat;
    /// z-score every column; constant columns become zero
    fn scale_columns_inplace(&mut self);
    fn scale_columns(&self) -> Self::Mat;
    fn centre_columns_inplace(&mut self);
    fn centre_columns(&self) -> Self::Mat;
}

/// Operations to sample random matrices
pub trait SampleOps {
    type Mat;

    /// Sample a matrix from a uniform distribution `U(0,1)`
    fn runif(dd: usize, nn: usize) -> Self::Mat;

    /// Sample a matrix from a normal distribution `N(0,1)`
    fn rnorm(dd: usize, nn: usize) -> Self::Mat;
}

/// Pairwise distances between rows
pub trait DistanceOps {
    type Scalar;

    /// Squared Euclidean distance between rows `i` and `j`
    fn row_sq_distance(&self, i: usize, j: usize) -> Self::Scalar;

    /// Euclidean distances from every row to a query point
    fn row_distances_to(&self, query: &[Self::Scalar]) -> Vec<Self::Scalar>;
}

/// Read and write matrices with names from and to delimited files
pub trait IoOps {
    type Mat;

    /// Read a table whose first line holds column names and whose first
    /// field of every other line holds the row name.
    ///
    /// * `file_path` - `.tsv`, `.csv`, with or without `.gz`
    /// * `delim` - field delimiter
    fn read_named(
        file_path: &str,
        delim: impl Into<Delimiter>,
    ) -> anyhow::Result<MatWithNames<Self::Mat>>;

    /// Write in the layout `read_named` expects
    ///
    /// * `row_header` - the name of the row-name column
    fn write_named(
        &self,
        file_path: &str,
        row_header: &str,
        rows: &[Box<str>],
        cols: &[Box<str>],
    ) -> anyhow::Result<()>;

    fn to_tsv(&self, file_path: &str) -> anyhow::Result<()>;
}
