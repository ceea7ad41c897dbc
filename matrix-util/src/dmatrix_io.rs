use crate::common_io::{read_lines_of_words_delim, write_lines, Delimiter, ReadLinesOut};
use crate::traits::*;
pub use nalgebra::{DMatrix, DVector};

use std::fmt::Display;
use std::str::FromStr;

impl<T> IoOps for DMatrix<T>
where
    T: nalgebra::Scalar + Copy + Send + FromStr + Display,
{
    type Mat = Self;

    fn read_named(
        file_path: &str,
        delim: impl Into<Delimiter>,
    ) -> anyhow::Result<MatWithNames<Self::Mat>> {
        let ReadLinesOut { lines, header } = read_lines_of_words_delim(file_path, delim, Some(0))?;

        if header.len() < 2 {
            anyhow::bail!(
                "{}: header needs a row-name column and at least one data column",
                file_path
            );
        }
        if lines.is_empty() {
            anyhow::bail!("{}: no data rows", file_path);
        }

        let cols: Vec<Box<str>> = header[1..].to_vec();
        let ncols = cols.len();
        let nrows = lines.len();

        let mut rows = Vec::with_capacity(nrows);
        let mut data = Vec::with_capacity(nrows * ncols);

        for (i, words) in lines.into_iter().enumerate() {
            if words.len() != ncols + 1 {
                anyhow::bail!(
                    "{}: data line {} has {} fields, expected {}",
                    file_path,
                    i + 1,
                    words.len(),
                    ncols + 1
                );
            }
            let mut words = words.into_iter();
            rows.push(words.next().unwrap_or_default());
            for (j, w) in words.enumerate() {
                let x = w.parse::<T>().map_err(|_| {
                    anyhow::anyhow!(
                        "{}: cannot parse '{}' at row {} column {}",
                        file_path,
                        w,
                        i + 1,
                        cols[j]
                    )
                })?;
                data.push(x);
            }
        }

        Ok(MatWithNames {
            rows,
            cols,
            mat: DMatrix::<T>::from_row_iterator(nrows, ncols, data),
        })
    }

    fn write_named(
        &self,
        file_path: &str,
        row_header: &str,
        rows: &[Box<str>],
        cols: &[Box<str>],
    ) -> anyhow::Result<()> {
        if rows.len() != self.nrows() || cols.len() != self.ncols() {
            anyhow::bail!(
                "names ({} x {}) don't match the matrix ({} x {})",
                rows.len(),
                cols.len(),
                self.nrows(),
                self.ncols()
            );
        }

        let mut lines = Vec::with_capacity(self.nrows() + 1);
        lines.push(
            std::iter::once(row_header)
                .chain(cols.iter().map(|c| c.as_ref()))
                .collect::<Vec<_>>()
                .join("\t"),
        );

        for (name, row) in rows.iter().zip(self.row_iter()) {
            let mut line = name.to_string();
            for x in row.iter() {
                line.push('\t');
                line.push_str(&x.to_string());
            }
            lines.push(line);
        }

        write_lines(&lines, file_path)
    }

    fn to_tsv(&self, file_path: &str) -> anyhow::Result<()> {
        let lines = self
            .row_iter()
            .map(|row| {
                row.iter()
                    .map(|x| x.to_string())
                    .collect::<Vec<_>>()
                    .join("\t")
            })
            .collect::<Vec<_>>();
        write_lines(&lines, file_path)
    }
}
