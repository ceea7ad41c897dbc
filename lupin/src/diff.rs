//! Marker-wise comparison of two groups of cells

use crate::common::*;
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::str::FromStr;

/// Which per-cell label a group is defined by
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKey {
    Cluster,
    Branch,
}

/// `cluster:1,2` or `branch:0`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSelector {
    pub key: GroupKey,
    pub ids: Vec<usize>,
}

impl FromStr for GroupSelector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (key, ids) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("expected cluster:IDS or branch:IDS, got '{}'", s))?;
        let key = match key.trim().to_lowercase().as_str() {
            "cluster" => GroupKey::Cluster,
            "branch" => GroupKey::Branch,
            other => anyhow::bail!("unknown group key '{}'", other),
        };
        let ids = parse_id_list(ids)?;
        anyhow::ensure!(!ids.is_empty(), "no ids in '{}'", s);
        Ok(Self { key, ids })
    }
}

impl GroupSelector {
    /// Rows whose cluster (or branch) is one of `ids`
    pub fn rows(&self, clusters: &[usize], branches: &[usize]) -> Vec<usize> {
        let labels = match self.key {
            GroupKey::Cluster => clusters,
            GroupKey::Branch => branches,
        };
        labels
            .iter()
            .enumerate()
            .filter(|(_, l)| self.ids.contains(l))
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct MarkerTest {
    pub marker: Box<str>,
    pub mean_a: f32,
    pub mean_b: f32,
    /// `mean_a - mean_b`
    pub diff: f32,
    pub t: f64,
    pub df: f64,
    pub p_value: f64,
    pub p_adjusted: f64,
}

impl MarkerTest {
    pub fn header() -> &'static str {
        "marker\tmean_a\tmean_b\tdiff\tt\tdf\tp_value\tp_adjusted"
    }

    pub fn to_tsv_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.marker,
            self.mean_a,
            self.mean_b,
            self.diff,
            self.t,
            self.df,
            self.p_value,
            self.p_adjusted
        )
    }
}

fn mean_var(x: &[f64]) -> (f64, f64) {
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var)
}

/// Welch's unequal-variance t-test; returns `(t, df, two-sided p)`
pub fn welch_t_test(a: &[f64], b: &[f64]) -> anyhow::Result<(f64, f64, f64)> {
    anyhow::ensure!(
        a.len() >= 2 && b.len() >= 2,
        "each group needs at least 2 cells ({} vs {})",
        a.len(),
        b.len()
    );
    let (ma, va) = mean_var(a);
    let (mb, vb) = mean_var(b);
    let (sa, sb) = (va / a.len() as f64, vb / b.len() as f64);
    let se2 = sa + sb;

    if se2 <= 0.0 {
        return Ok(if ma == mb {
            (0.0, f64::NAN, 1.0)
        } else {
            ((ma - mb).signum() * f64::INFINITY, f64::NAN, 0.0)
        });
    }

    let t = (ma - mb) / se2.sqrt();
    let df = se2 * se2
        / (sa * sa / (a.len() as f64 - 1.0) + sb * sb / (b.len() as f64 - 1.0));
    let dist = StudentsT::new(0.0, 1.0, df)?;
    let p = (2.0 * dist.sf(t.abs())).min(1.0);
    Ok((t, df, p))
}

/// Benjamini–Hochberg adjusted p-values, in input order
pub fn benjamini_hochberg(p: &[f64]) -> Vec<f64> {
    let m = p.len();
    let mut order = (0..m).collect::<Vec<_>>();
    order.sort_by(|&a, &b| p[a].total_cmp(&p[b]));

    let mut adjusted = vec![0.0; m];
    let mut running = 1.0f64;
    for (pos, &i) in order.iter().enumerate().rev() {
        let q = p[i] * m as f64 / (pos + 1) as f64;
        running = running.min(q);
        adjusted[i] = running.min(1.0);
    }
    adjusted
}

/// Test every column of `expr` between rows `a` and rows `b`
pub fn compare_groups(
    expr: &Mat,
    markers: &[Box<str>],
    a: &[usize],
    b: &[usize],
) -> anyhow::Result<Vec<MarkerTest>> {
    anyhow::ensure!(markers.len() == expr.ncols(), "marker names do not match columns");
    let overlap = a.iter().filter(|i| b.contains(i)).count();
    anyhow::ensure!(overlap == 0, "the two groups share {} cells", overlap);

    info!("comparing {} vs {} cells on {} markers", a.len(), b.len(), markers.len());

    let mut tests = Vec::with_capacity(markers.len());
    for (j, marker) in markers.iter().enumerate() {
        let xa = a.iter().map(|&i| expr[(i, j)] as f64).collect::<Vec<_>>();
        let xb = b.iter().map(|&i| expr[(i, j)] as f64).collect::<Vec<_>>();
        let (t, df, p_value) = welch_t_test(&xa, &xb)?;
        let mean_a = (xa.iter().sum::<f64>() / xa.len() as f64) as f32;
        let mean_b = (xb.iter().sum::<f64>() / xb.len() as f64) as f32;
        tests.push(MarkerTest {
            marker: marker.clone(),
            mean_a,
            mean_b,
            diff: mean_a - mean_b,
            t,
            df,
            p_value,
            p_adjusted: 1.0,
        });
    }

    let adjusted = benjamini_hochberg(&tests.iter().map(|t| t.p_value).collect::<Vec<_>>());
    for (t, q) in tests.iter_mut().zip(adjusted) {
        t.p_adjusted = q;
    }
    Ok(tests)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welch_known_values() -> anyhow::Result<()> {
        let a = [27.5, 21.0, 19.0, 23.6, 17.0, 17.9, 16.9, 20.1, 21.9, 22.6, 23.1, 19.6, 19.0, 21.7, 21.4];
        let b = [27.1, 22.0, 20.8, 23.4, 23.4, 23.5, 25.8, 22.0, 24.8, 20.2, 21.9, 22.1, 22.9, 20.5, 24.4];
        let (t, df, p) = welch_t_test(&a, &b)?;
        approx::assert_abs_diff_eq!(t, -2.46, epsilon = 0.01);
        approx::assert_abs_diff_eq!(df, 24.99, epsilon = 0.05);
        approx::assert_abs_diff_eq!(p, 0.021, epsilon = 0.002);
        Ok(())
    }

    #[test]
    fn test_constant_groups() -> anyhow::Result<()> {
        let (_, _, p) = welch_t_test(&[1.0, 1.0], &[1.0, 1.0, 1.0])?;
        assert_eq!(p, 1.0);
        let (t, _, p) = welch_t_test(&[1.0, 1.0], &[2.0, 2.0])?;
        assert!(t.is_infinite() && t < 0.0);
        assert_eq!(p, 0.0);
        assert!(welch_t_test(&[1.0], &[2.0, 3.0]).is_err());
        Ok(())
    }

    #[test]
    fn test_benjamini_hochberg() {
        let q = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.5]);
        approx::assert_abs_diff_eq!(q[0], 0.04, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(q[1], 0.04 * 4.0 / 3.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(q[2], 0.04 * 4.0 / 3.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(q[3], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_group_selector() -> anyhow::Result<()> {
        let sel: GroupSelector = "branch:1, 2".parse()?;
        assert_eq!(sel.key, GroupKey::Branch);
        assert_eq!(sel.rows(&[0, 0, 0, 0], &[1, 0, 2, 1]), vec![0, 2, 3]);
        assert!("leaf:1".parse::<GroupSelector>().is_err());
        assert!("cluster".parse::<GroupSelector>().is_err());
        Ok(())
    }

    #[test]
    fn test_compare_groups() -> anyhow::Result<()> {
        let expr = Mat::from_row_slice(
            6,
            2,
            &[
                1.0, 5.0, //
                1.2, 5.1, //
                0.9, 4.9, //
                3.0, 5.0, //
                3.1, 5.2, //
                2.9, 4.8, //
            ],
        );
        let markers: Vec<Box<str>> = vec!["up".into(), "flat".into()];
        let res = compare_groups(&expr, &markers, &[3, 4, 5], &[0, 1, 2])?;
        assert!(res[0].diff > 1.9);
        assert!(res[0].p_value < 0.01);
        assert!(res[1].p_value > 0.5);
        assert!(compare_groups(&expr, &markers, &[0, 1], &[1, 2]).is_err());
        Ok(())
    }
}
