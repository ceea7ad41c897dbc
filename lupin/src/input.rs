//! Reading per-sample expression matrices and merging them into one
//! cells × markers matrix with sample and stage labels

use crate::common::*;
use matrix_util::common_io::{basename, detect_delimiter};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

/// One input matrix, given on the command line as `path[:sample[:stage]]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleSpec {
    pub path: Box<str>,
    pub sample: Box<str>,
    pub stage: Box<str>,
}

impl FromStr for SampleSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        // split at the last two colons; the path itself may contain ':'
        let mut parts: Vec<&str> = s.rsplitn(3, ':').collect();
        parts.reverse();
        let path = match parts.first() {
            Some(p) if !p.is_empty() => *p,
            _ => anyhow::bail!("empty sample path in '{}'", s),
        };

        let sample: Box<str> = match parts.get(1) {
            Some(x) if !x.is_empty() => (*x).into(),
            _ => basename(path)?,
        };
        let stage: Box<str> = match parts.get(2) {
            Some(x) if !x.is_empty() => (*x).into(),
            _ => sample.clone(),
        };

        Ok(SampleSpec {
            path: path.into(),
            sample,
            stage,
        })
    }
}

/// Value transformation applied to raw intensities
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Transform {
    None,
    /// `asinh(x / cofactor)`; 5 is customary for mass cytometry,
    /// 150 for fluorescence
    Arcsinh { cofactor: f32 },
    /// `ln(1 + max(x, 0))`
    Log1p,
}

impl Default for Transform {
    fn default() -> Self {
        Transform::Arcsinh { cofactor: 5.0 }
    }
}

impl Transform {
    pub fn apply(&self, x: f32) -> f32 {
        match *self {
            Transform::None => x,
            Transform::Arcsinh { cofactor } => (x / cofactor).asinh(),
            Transform::Log1p => x.max(0.0).ln_1p(),
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if let Transform::Arcsinh { cofactor } = self {
            anyhow::ensure!(
                cofactor.is_finite() && *cofactor > 0.0,
                "arcsinh cofactor must be positive, got {}",
                cofactor
            );
        }
        Ok(())
    }
}

/// How many cells of every sample enter the merged matrix
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    /// keep every cell
    All,
    /// keep at most `n` cells per sample
    Ceil(usize),
    /// keep exactly `n` cells per sample; samples with fewer cells are
    /// kept whole
    Fixed(usize),
    /// downsample every sample to the size of the smallest one
    Min,
}

impl Default for MergeMethod {
    fn default() -> Self {
        MergeMethod::Ceil(5000)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InputConfig {
    /// markers to keep; all markers shared by every sample if `None`
    pub markers: Option<Vec<Box<str>>>,
    pub transform: Transform,
    pub merge: MergeMethod,
    pub seed: u64,
}

/// Merged expression data: every cell belongs to exactly one sample and
/// one stage
#[derive(Clone, Debug)]
pub struct CytoData {
    pub cells: Vec<Box<str>>,
    pub markers: Vec<Box<str>>,
    pub samples: Vec<Box<str>>,
    pub stages: Vec<Box<str>>,
    /// cells × markers
    pub expr: Mat,
}

impl CytoData {
    /// Assemble and validate
    pub fn new(
        cells: Vec<Box<str>>,
        markers: Vec<Box<str>>,
        samples: Vec<Box<str>>,
        stages: Vec<Box<str>>,
        expr: Mat,
    ) -> anyhow::Result<Self> {
        let n = expr.nrows();
        anyhow::ensure!(n > 0, "no cells");
        anyhow::ensure!(
            cells.len() == n && samples.len() == n && stages.len() == n,
            "{} cells, but {} names, {} samples, {} stages",
            n,
            cells.len(),
            samples.len(),
            stages.len()
        );
        anyhow::ensure!(
            markers.len() == expr.ncols(),
            "{} marker names for {} columns",
            markers.len(),
            expr.ncols()
        );
        anyhow::ensure!(
            expr.iter().all(|x| x.is_finite()),
            "expression contains non-finite values"
        );

        let mut seen = HashSet::with_capacity(n);
        for c in cells.iter() {
            anyhow::ensure!(seen.insert(c.clone()), "duplicate cell id {}", c);
        }

        Ok(Self {
            cells,
            markers,
            samples,
            stages,
            expr,
        })
    }

    pub fn n_cells(&self) -> usize {
        self.expr.nrows()
    }

    pub fn n_markers(&self) -> usize {
        self.expr.ncols()
    }

    /// Column z-scored expression
    pub fn normalized(&self) -> Mat {
        self.expr.scale_columns()
    }

    /// Distinct stages in order of first appearance
    pub fn stage_levels(&self) -> Vec<Box<str>> {
        let mut seen = HashSet::new();
        self.stages
            .iter()
            .filter(|s| seen.insert((*s).clone()))
            .cloned()
            .collect()
    }

    /// Map from cell id to row index
    pub fn cell_index(&self) -> HashMap<Box<str>, usize> {
        self.cells
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect()
    }
}

struct RawSample {
    spec: SampleSpec,
    rows: Vec<Box<str>>,
    cols: Vec<Box<str>>,
    mat: Mat,
}

/// Read, transform, downsample and merge sample matrices
pub fn read_samples(specs: &[SampleSpec], config: &InputConfig) -> anyhow::Result<CytoData> {
    anyhow::ensure!(!specs.is_empty(), "no input samples");
    config.transform.validate()?;

    let mut names = HashSet::new();
    for s in specs {
        anyhow::ensure!(
            names.insert(s.sample.clone()),
            "sample name {} used twice",
            s.sample
        );
    }

    let mut raw = Vec::with_capacity(specs.len());
    for spec in specs {
        let MatWithNames { rows, cols, mat } = Mat::read_named(&spec.path, detect_delimiter(&spec.path))?;
        info!(
            "{}: {} cells × {} markers (sample {}, stage {})",
            spec.path,
            mat.nrows(),
            mat.ncols(),
            spec.sample,
            spec.stage
        );
        raw.push(RawSample {
            spec: spec.clone(),
            rows,
            cols,
            mat,
        });
    }

    let markers = select_markers(&raw, config.markers.as_deref())?;
    info!("using {} markers", markers.len());

    let sizes = raw.iter().map(|r| r.mat.nrows()).collect::<Vec<_>>();
    let keep = downsample_rows(&sizes, config.merge, config.seed)?;

    let ntot: usize = keep.iter().map(|k| k.len()).sum();
    let mut cells = Vec::with_capacity(ntot);
    let mut samples = Vec::with_capacity(ntot);
    let mut stages = Vec::with_capacity(ntot);
    let mut expr = Mat::zeros(ntot, markers.len());

    let mut r = 0;
    for (sample, rows) in raw.iter().zip(keep.iter()) {
        let col_of: HashMap<&str, usize> = sample
            .cols
            .iter()
            .enumerate()
            .map(|(j, c)| (c.as_ref(), j))
            .collect();
        let src_cols = markers
            .iter()
            .map(|m| col_of[m.as_ref()])
            .collect::<Vec<_>>();

        for &i in rows {
            for (j, &src) in src_cols.iter().enumerate() {
                expr[(r, j)] = config.transform.apply(sample.mat[(i, src)]);
            }
            cells.push(format!("{}_{}", sample.spec.sample, sample.rows[i]).into_boxed_str());
            samples.push(sample.spec.sample.clone());
            stages.push(sample.spec.stage.clone());
            r += 1;
        }
        info!(
            "sample {}: kept {} of {} cells",
            sample.spec.sample,
            rows.len(),
            sample.mat.nrows()
        );
    }

    CytoData::new(cells, markers, samples, stages, expr)
}

fn select_markers(
    raw: &[RawSample],
    requested: Option<&[Box<str>]>,
) -> anyhow::Result<Vec<Box<str>>> {
    let col_sets = raw
        .iter()
        .map(|r| r.cols.iter().cloned().collect::<HashSet<_>>())
        .collect::<Vec<_>>();

    if let Some(requested) = requested {
        anyhow::ensure!(!requested.is_empty(), "empty marker list");
        for m in requested {
            for (r, set) in raw.iter().zip(col_sets.iter()) {
                anyhow::ensure!(
                    set.contains(m),
                    "marker {} not found in {}",
                    m,
                    r.spec.path
                );
            }
        }
        return Ok(requested.to_vec());
    }

    let shared = raw[0]
        .cols
        .iter()
        .filter(|c| col_sets.iter().all(|s| s.contains(*c)))
        .cloned()
        .collect::<Vec<_>>();

    let dropped = raw[0].cols.len() - shared.len();
    if dropped > 0 {
        warn!("{} markers are not shared by all samples and were dropped", dropped);
    }
    anyhow::ensure!(!shared.is_empty(), "no marker is shared by all samples");
    Ok(shared)
}

/// Row indices (ascending) kept from every sample
fn downsample_rows(
    sizes: &[usize],
    merge: MergeMethod,
    seed: u64,
) -> anyhow::Result<Vec<Vec<usize>>> {
    let target = |n: usize| -> usize {
        match merge {
            MergeMethod::All => n,
            MergeMethod::Ceil(m) | MergeMethod::Fixed(m) => n.min(m),
            MergeMethod::Min => sizes.iter().copied().min().unwrap_or(0),
        }
    };

    if let MergeMethod::Ceil(0) | MergeMethod::Fixed(0) = merge {
        anyhow::bail!("merge size must be positive");
    }

    sizes
        .iter()
        .enumerate()
        .map(|(s, &n)| {
            if let MergeMethod::Fixed(m) = merge {
                if n < m {
                    warn!("sample #{} has {} cells < {}; keeping all", s, n, m);
                }
            }
            let m = target(n);
            let mut rows = if m >= n {
                (0..n).collect::<Vec<_>>()
            } else {
                let mut rng = SmallRng::seed_from_u64(derive_seed(seed, s as u64));
                rand::seq::index::sample(&mut rng, n, m).into_vec()
            };
            rows.sort_unstable();
            Ok(rows)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_util::common_io::{create_temp_dir_file, write_lines};

    fn write_sample(header: &str, rows: &[String]) -> Box<str> {
        let file = create_temp_dir_file(".tsv").unwrap();
        let file: Box<str> = file.to_str().unwrap().into();
        let mut lines = vec![header.to_string()];
        lines.extend(rows.iter().cloned());
        write_lines(&lines, &file).unwrap();
        file
    }

    #[test]
    fn test_sample_spec_parsing() {
        let s: SampleSpec = "data/d0.tsv:day0:D0".parse().unwrap();
        assert_eq!(s.sample.as_ref(), "day0");
        assert_eq!(s.stage.as_ref(), "D0");

        let s: SampleSpec = "data/d2.csv.gz".parse().unwrap();
        assert_eq!(s.sample.as_ref(), "d2");
        assert_eq!(s.stage.as_ref(), "d2");

        let s: SampleSpec = "runs/2024-01-02T10:00/d4.tsv:day4:D4".parse().unwrap();
        assert_eq!(s.path.as_ref(), "runs/2024-01-02T10:00/d4.tsv");
        assert_eq!(s.sample.as_ref(), "day4");
        assert_eq!(s.stage.as_ref(), "D4");

        let s: SampleSpec = "data/d6.tsv::D6".parse().unwrap();
        assert_eq!(s.sample.as_ref(), "d6");
        assert_eq!(s.stage.as_ref(), "D6");

        assert!(":day0:D0".parse::<SampleSpec>().is_err());
    }

    #[test]
    fn test_transforms() {
        let t = Transform::Arcsinh { cofactor: 5.0 };
        approx::assert_abs_diff_eq!(t.apply(5.0), 1.0f32.asinh(), epsilon = 1e-6);
        approx::assert_abs_diff_eq!(Transform::Log1p.apply(-3.0), 0.0);
        assert_eq!(Transform::None.apply(2.5), 2.5);
        assert!(Transform::Arcsinh { cofactor: 0.0 }.validate().is_err());
    }

    #[test]
    fn test_downsample_methods() {
        let sizes = [10, 4];
        let all = downsample_rows(&sizes, MergeMethod::All, 1).unwrap();
        assert_eq!(all[0].len(), 10);

        let ceil = downsample_rows(&sizes, MergeMethod::Ceil(6), 1).unwrap();
        assert_eq!((ceil[0].len(), ceil[1].len()), (6, 4));
        assert!(ceil[0].windows(2).all(|w| w[0] < w[1]));

        let min = downsample_rows(&sizes, MergeMethod::Min, 1).unwrap();
        assert_eq!((min[0].len(), min[1].len()), (4, 4));

        let again = downsample_rows(&sizes, MergeMethod::Min, 1).unwrap();
        assert_eq!(min, again);

        assert!(downsample_rows(&sizes, MergeMethod::Ceil(0), 1).is_err());
    }

    #[test]
    fn test_fixed_keeps_small_samples_whole() {
        let fixed = downsample_rows(&[10, 3], MergeMethod::Fixed(5), 3).unwrap();
        assert_eq!((fixed[0].len(), fixed[1].len()), (5, 3));
        assert!(fixed[0].windows(2).all(|w| w[0] < w[1]));
        assert!(fixed[0].iter().all(|&i| i < 10));
        assert_eq!(fixed[1], vec![0, 1, 2]);

        assert!(downsample_rows(&[10, 3], MergeMethod::Fixed(0), 3).is_err());
    }

    #[test]
    fn test_read_and_merge_samples() -> anyhow::Result<()> {
        let a = write_sample(
            "cell\tCD3\tCD19\tCD4",
            &(0..5).map(|i| format!("c{}\t{}\t0\t1", i, i)).collect::<Vec<_>>(),
        );
        let b = write_sample(
            "cell\tCD19\tCD3",
            &(0..3).map(|i| format!("c{}\t2\t{}", i, i)).collect::<Vec<_>>(),
        );

        let specs = vec![
            SampleSpec {
                path: a,
                sample: "A".into(),
                stage: "D0".into(),
            },
            SampleSpec {
                path: b,
                sample: "B".into(),
                stage: "D2".into(),
            },
        ];

        let config = InputConfig {
            markers: None,
            transform: Transform::None,
            merge: MergeMethod::All,
            seed: 0,
        };
        let data = read_samples(&specs, &config)?;

        let expected: Vec<Box<str>> = vec!["CD3".into(), "CD19".into()];
        assert_eq!(data.markers, expected);
        assert_eq!(data.n_cells(), 8);
        assert_eq!(data.cells[5].as_ref(), "B_c0");
        assert_eq!(data.stages[7].as_ref(), "D2");
        // B's columns are reordered to the shared marker order
        assert_eq!(data.expr[(7, 0)], 2.0);
        assert_eq!(data.expr[(7, 1)], 2.0);
        assert_eq!(data.expr[(6, 0)], 1.0);
        assert_eq!(data.stage_levels().len(), 2);

        let missing = InputConfig {
            markers: Some(vec!["CD4".into()]),
            ..config
        };
        assert!(read_samples(&specs, &missing).is_err());
        Ok(())
    }

    #[test]
    fn test_duplicate_cells_rejected() {
        let res = CytoData::new(
            vec!["x".into(), "x".into()],
            vec!["m".into()],
            vec!["s".into(), "s".into()],
            vec!["t".into(), "t".into()],
            Mat::zeros(2, 1),
        );
        assert!(res.is_err());
    }
}
