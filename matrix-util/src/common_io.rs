use flate2::read::GzDecoder;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Field separator for delimited text: a literal string or any of a
/// set of characters
#[derive(Clone, Debug)]
pub enum Delimiter {
    Str(String),
    Chars(Vec<char>),
}

impl From<&str> for Delimiter {
    fn from(s: &str) -> Self {
        Delimiter::Str(s.to_string())
    }
}

impl From<char> for Delimiter {
    fn from(c: char) -> Self {
        Delimiter::Chars(vec![c])
    }
}

impl From<&[char]> for Delimiter {
    fn from(chars: &[char]) -> Self {
        Delimiter::Chars(chars.to_vec())
    }
}

impl<const N: usize> From<&[char; N]> for Delimiter {
    fn from(chars: &[char; N]) -> Self {
        Delimiter::Chars(chars.to_vec())
    }
}

impl Delimiter {
    /// Split a line into trimmed fields
    pub fn split_line(&self, line: &str) -> Vec<Box<str>> {
        match self {
            Delimiter::Str(s) => line.split(s.as_str()).map(|x| x.trim().into()).collect(),
            Delimiter::Chars(cc) => line
                .split(cc.as_slice())
                .map(|x| x.trim().into())
                .collect(),
        }
    }
}

/// Guess the delimiter of a table by its file name: comma for `.csv`
/// (or `.csv.gz`), tab otherwise
pub fn detect_delimiter(file_path: &str) -> Delimiter {
    let lower = file_path.to_ascii_lowercase();
    if lower.ends_with(".csv") || lower.ends_with(".csv.gz") {
        Delimiter::from(',')
    } else {
        Delimiter::from('\t')
    }
}

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let file = File::open(input_file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", input_file, e))?;

    match Path::new(input_file).extension().and_then(|x| x.to_str()) {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not (`stdout` and
///   `stderr` are recognized)
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }

    if output_file.eq_ignore_ascii_case("stderr") {
        return Ok(Box::new(BufWriter::new(std::io::stderr())));
    }

    let file = File::create(output_file)
        .map_err(|e| anyhow::anyhow!("failed to create {}: {}", output_file, e))?;

    match Path::new(output_file).extension().and_then(|x| x.to_str()) {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

///
/// Write every line into the output_file
///
/// * `lines` - vector of lines
/// * `output_file` - file name--either gzipped or not
///
pub fn write_lines<T>(lines: &[T], output_file_path: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file_path)?;
    for line in lines {
        if let Err(e) = writeln!(buf, "{}", line) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            }
            return Err(anyhow::anyhow!("unexpected error: {}", e));
        }
    }
    buf.flush()?;
    Ok(())
}

pub struct ReadLinesOut<T: Send> {
    pub lines: Vec<Vec<T>>,
    pub header: Vec<Box<str>>,
}

fn is_data_line(line: &str) -> bool {
    !(line.is_empty() || line.starts_with('#') || line.starts_with('%'))
}

///
/// Read a delimited file into a vector of words per line.
///
/// * `input_file` - file name--either gzipped or not
/// * `delim` - delimiter
/// * `hdr_line` - location of a header line (`None` = no header line)
///
/// Empty lines and lines starting with `#` or `%` are skipped.
pub fn read_lines_of_words_delim(
    input_file: &str,
    delim: impl Into<Delimiter>,
    hdr_line: Option<usize>,
) -> anyhow::Result<ReadLinesOut<Box<str>>> {
    let delim = delim.into();
    let buf = open_buf_reader(input_file)?;

    let mut lines_raw = vec![];
    for line in buf.lines() {
        let line = line?;
        if is_data_line(&line) {
            lines_raw.push(line.into_boxed_str());
        }
    }

    let (header, body) = match hdr_line {
        Some(skip) => {
            if lines_raw.len() < skip + 1 {
                anyhow::bail!("not enough lines in {}", input_file);
            }
            (delim.split_line(&lines_raw[skip]), &lines_raw[(skip + 1)..])
        }
        None => (vec![], &lines_raw[..]),
    };

    // splitting keeps the order with indexed parallel iterators
    let lines = body
        .par_iter()
        .map(|s| delim.split_line(s))
        .collect::<Vec<_>>();

    Ok(ReadLinesOut { lines, header })
}

///
/// Create a directory for the file if needed
/// * `file` - file name
///
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    if let Some(dir) = Path::new(file).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

///
/// Take the basename of a file without any `.gz` and table extension
/// * `file` - file name
///
pub fn basename(file: &str) -> anyhow::Result<Box<str>> {
    let name = Path::new(file)
        .file_name()
        .and_then(|x| x.to_str())
        .ok_or_else(|| anyhow::anyhow!("no file name in {}", file))?;

    let name = name.strip_suffix(".gz").unwrap_or(name);
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    Ok(stem.into())
}

///
/// Create a temporary directory and suggest a file name
/// * `suffix` - suffix of the file name
///
pub fn create_temp_dir_file(suffix: &str) -> anyhow::Result<std::path::PathBuf> {
    let temp_dir = tempfile::tempdir()?.into_path();
    let temp_file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile_in(&temp_dir)?
        .path()
        .to_owned();
    Ok(temp_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basename_strips_gz_and_ext() {
        assert_eq!(basename("dir/sample_a.tsv.gz").unwrap().as_ref(), "sample_a");
        assert_eq!(basename("sample_b.csv").unwrap().as_ref(), "sample_b");
        assert_eq!(basename("plain").unwrap().as_ref(), "plain");
    }

    #[test]
    fn test_detect_delimiter() {
        assert!(matches!(detect_delimiter("x.csv.gz"), Delimiter::Chars(c) if c == vec![',']));
        assert!(matches!(detect_delimiter("x.tsv"), Delimiter::Chars(c) if c == vec!['\t']));
    }

    #[test]
    fn test_write_read_gz_lines() -> anyhow::Result<()> {
        let file = create_temp_dir_file(".tsv.gz")?;
        let file = file.to_str().unwrap();

        let lines = vec!["a\tb".to_string(), "# comment".to_string(), "1\t2".to_string()];
        write_lines(&lines, file)?;

        let out = read_lines_of_words_delim(file, '\t', Some(0))?;
        let expected: Vec<Box<str>> = vec!["a".into(), "b".into()];
        assert_eq!(out.header, expected);
        assert_eq!(out.lines.len(), 1);
        assert_eq!(out.lines[0][1].as_ref(), "2");
        Ok(())
    }
}
