//! Agglomerative hierarchical clustering by the nearest-neighbour chain
//! with Lance–Williams distance updates

use crate::common::*;
use clap::ValueEnum;

/// Largest number of rows accepted; the condensed distance matrix grows
/// quadratically
pub const MAX_HCLUST_CELLS: usize = 5000;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    Single,
    Complete,
    #[default]
    Average,
    Ward,
}

/// Condensed upper-triangular distance matrix
struct Condensed {
    n: usize,
    d: Vec<f32>,
}

impl Condensed {
    fn from_rows(data: &Mat, squared: bool) -> Self {
        let n = data.nrows();
        let mut d = Vec::with_capacity(n * (n.saturating_sub(1)) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                let d2 = data.row_sq_distance(i, j);
                d.push(if squared { d2 } else { d2.sqrt() });
            }
        }
        Self { n, d }
    }

    #[inline]
    fn index(&self, i: usize, j: usize) -> usize {
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        i * self.n - i * (i + 1) / 2 + (j - i - 1)
    }

    #[inline]
    fn get(&self, i: usize, j: usize) -> f32 {
        self.d[self.index(i, j)]
    }

    #[inline]
    fn set(&mut self, i: usize, j: usize, v: f32) {
        let k = self.index(i, j);
        self.d[k] = v;
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

/// Merge history; every merge joins the groups containing `a` and `b`
#[derive(Clone, Debug)]
pub struct Dendrogram {
    pub n: usize,
    /// `(a, b, height)` in non-decreasing height
    pub merges: Vec<(usize, usize, f32)>,
}

impl Dendrogram {
    pub fn build(data: &Mat, linkage: Linkage) -> anyhow::Result<Self> {
        let n = data.nrows();
        anyhow::ensure!(n > 0, "nothing to cluster");
        anyhow::ensure!(
            n <= MAX_HCLUST_CELLS,
            "hierarchical clustering is limited to {} rows, got {}; use som, kmeans, clara or leiden",
            MAX_HCLUST_CELLS,
            n
        );

        let ward = linkage == Linkage::Ward;
        let mut dist = Condensed::from_rows(data, ward);
        let mut size = vec![1usize; n];
        let mut active = vec![true; n];
        let mut merges = Vec::with_capacity(n.saturating_sub(1));
        let mut chain: Vec<usize> = Vec::with_capacity(n);

        while merges.len() + 1 < n {
            if chain.is_empty() {
                if let Some(first) = (0..n).find(|&i| active[i]) {
                    chain.push(first);
                }
            }
            let a = chain[chain.len() - 1];
            let prev = if chain.len() >= 2 {
                Some(chain[chain.len() - 2])
            } else {
                None
            };

            // nearest active neighbour; the previous chain element wins ties
            let mut b = prev.unwrap_or(usize::MAX);
            let mut best = prev.map_or(f32::INFINITY, |p| dist.get(a, p));
            for k in 0..n {
                if k == a || !active[k] {
                    continue;
                }
                let d = dist.get(a, k);
                if d < best {
                    best = d;
                    b = k;
                }
            }

            if Some(b) == prev {
                chain.pop();
                chain.pop();

                let (sa, sb) = (size[a] as f32, size[b] as f32);
                let d_ab = best;
                for k in 0..n {
                    if k == a || k == b || !active[k] {
                        continue;
                    }
                    let (d_ka, d_kb) = (dist.get(k, a), dist.get(k, b));
                    let sk = size[k] as f32;
                    let updated = match linkage {
                        Linkage::Single => d_ka.min(d_kb),
                        Linkage::Complete => d_ka.max(d_kb),
                        Linkage::Average => (sa * d_ka + sb * d_kb) / (sa + sb),
                        Linkage::Ward => {
                            ((sa + sk) * d_ka + (sb + sk) * d_kb - sk * d_ab) / (sa + sb + sk)
                        }
                    };
                    dist.set(k, b, updated);
                }
                active[a] = false;
                size[b] += size[a];

                let height = if ward { d_ab.max(0.0).sqrt() } else { d_ab };
                merges.push((a, b, height));
            } else {
                chain.push(b);
            }
        }

        merges.sort_by(|x, y| x.2.total_cmp(&y.2));
        Ok(Self { n, merges })
    }

    /// Flat labels for `k` groups, numbered by first appearance
    pub fn cut(&self, k: usize) -> anyhow::Result<Vec<usize>> {
        anyhow::ensure!(
            k >= 1 && k <= self.n,
            "cannot cut {} items into {} groups",
            self.n,
            k
        );

        let mut uf = UnionFind::new(self.n);
        for &(a, b, _) in self.merges.iter().take(self.n - k) {
            uf.union(a, b);
        }

        let mut root_label = vec![usize::MAX; self.n];
        let mut next = 0;
        let mut labels = Vec::with_capacity(self.n);
        for i in 0..self.n {
            let r = uf.find(i);
            if root_label[r] == usize::MAX {
                root_label[r] = next;
                next += 1;
            }
            labels.push(root_label[r]);
        }
        Ok(labels)
    }
}

/// Cluster the rows of `data` into `k` groups
pub fn hclust(data: &Mat, k: usize, linkage: Linkage) -> anyhow::Result<Vec<usize>> {
    info!(
        "hclust: {} rows, k={}, {:?} linkage",
        data.nrows(),
        k,
        linkage
    );
    Dendrogram::build(data, linkage)?.cut(k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_points() -> Mat {
        // 0 1 2 | 10 11 | 30
        Mat::from_column_slice(6, 1, &[0.0, 1.0, 2.0, 10.0, 11.0, 30.0])
    }

    #[test]
    fn test_too_many_rows_rejected() {
        let data = Mat::zeros(MAX_HCLUST_CELLS + 1, 1);
        assert!(Dendrogram::build(&data, Linkage::Average).is_err());
    }

    #[test]
    fn test_single_linkage_heights() -> anyhow::Result<()> {
        let dend = Dendrogram::build(&line_points(), Linkage::Single)?;
        let heights = dend.merges.iter().map(|m| m.2).collect::<Vec<_>>();
        assert_eq!(heights, vec![1.0, 1.0, 1.0, 8.0, 19.0]);
        Ok(())
    }

    #[test]
    fn test_cut_into_groups() -> anyhow::Result<()> {
        for linkage in [
            Linkage::Single,
            Linkage::Complete,
            Linkage::Average,
            Linkage::Ward,
        ] {
            let labels = hclust(&line_points(), 3, linkage)?;
            assert_eq!(labels, vec![0, 0, 0, 1, 1, 2], "{:?}", linkage);
        }
        Ok(())
    }

    #[test]
    fn test_cut_extremes() -> anyhow::Result<()> {
        let dend = Dendrogram::build(&line_points(), Linkage::Average)?;
        assert_eq!(dend.cut(1)?, vec![0; 6]);
        assert_eq!(dend.cut(6)?, (0..6).collect::<Vec<_>>());
        assert!(dend.cut(0).is_err());
        assert!(dend.cut(7).is_err());
        Ok(())
    }

    #[test]
    fn test_complete_linkage_height() -> anyhow::Result<()> {
        let dend = Dendrogram::build(&line_points(), Linkage::Complete)?;
        // {0,1,2} joins {10,11} at 11
        assert!(dend.merges.iter().any(|m| (m.2 - 11.0).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn test_single_row() -> anyhow::Result<()> {
        let data = Mat::zeros(1, 3);
        assert_eq!(hclust(&data, 1, Linkage::Ward)?, vec![0]);
        Ok(())
    }
}
