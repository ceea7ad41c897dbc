//! Pseudotime as shortest-path distance from root cells on the cell kNN
//! graph

use crate::common::*;
use crate::trajectory::ClusterTree;
use matrix_util::knn_graph::KnnGraph;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Cells chosen by cluster membership and/or by id
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub clusters: Vec<usize>,
    pub cells: Vec<Box<str>>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty() && self.cells.is_empty()
    }

    /// Row indices of the selected cells, ascending
    pub fn resolve(
        &self,
        labels: &[usize],
        n_clusters: usize,
        cell_index: &HashMap<Box<str>, usize>,
    ) -> anyhow::Result<Vec<usize>> {
        for &k in self.clusters.iter() {
            anyhow::ensure!(
                k < n_clusters,
                "cluster {} does not exist ({} clusters)",
                k,
                n_clusters
            );
        }

        let mut rows = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| self.clusters.contains(l))
            .map(|(i, _)| i)
            .collect::<Vec<_>>();

        for c in self.cells.iter() {
            let i = cell_index
                .get(c)
                .ok_or_else(|| anyhow::anyhow!("unknown cell id {}", c))?;
            rows.push(*i);
        }

        rows.sort_unstable();
        rows.dedup();
        anyhow::ensure!(!rows.is_empty(), "the selection contains no cells");
        Ok(rows)
    }

    /// Distinct clusters of the selected rows
    pub fn clusters_of(rows: &[usize], labels: &[usize]) -> Vec<usize> {
        let mut ks = rows.iter().map(|&i| labels[i]).collect::<Vec<_>>();
        ks.sort_unstable();
        ks.dedup();
        ks
    }
}

#[derive(Clone, Debug)]
pub struct Pseudotime {
    /// distance from the nearest root before scaling
    pub raw: Vec<f32>,
    /// `raw` min-max scaled to `[0, 1]`
    pub value: Vec<f32>,
    /// 1-based ordinal rank; ties share the lower rank
    pub rank: Vec<usize>,
    /// cells placed through the cluster tree rather than the graph
    pub fallback: Vec<bool>,
    /// mean `value` per cluster
    pub cluster_mean: Vec<f32>,
}

/// Multi-source Dijkstra over edge distances
pub fn graph_distances(graph: &KnnGraph, sources: &[usize]) -> Vec<f32> {
    let n = graph.num_nodes();
    let mut dist = vec![f32::INFINITY; n];
    let mut heap = BinaryHeap::new();

    for &s in sources {
        dist[s] = 0.0;
        heap.push(Reverse((OrdF32(0.0), s)));
    }

    while let Some(Reverse((OrdF32(d), u))) = heap.pop() {
        if d > dist[u] {
            continue;
        }
        let (nbrs, dists) = graph.neighbors_with_distances(u);
        for (&v, &w) in nbrs.iter().zip(dists.iter()) {
            let nd = d + w;
            if nd < dist[v] {
                dist[v] = nd;
                heap.push(Reverse((OrdF32(nd), v)));
            }
        }
    }
    dist
}

/// Inputs shared by pseudotime estimation and the tree fallback
pub struct PseudotimeInput<'a> {
    pub graph: &'a KnnGraph,
    /// cells × dims, same space as `tree_points`
    pub coords: &'a Mat,
    pub labels: &'a [usize],
    pub tree: &'a ClusterTree,
    /// clusters × dims
    pub tree_points: &'a Mat,
}

pub fn estimate_pseudotime(input: &PseudotimeInput, roots: &[usize]) -> anyhow::Result<Pseudotime> {
    let n = input.graph.num_nodes();
    anyhow::ensure!(!roots.is_empty(), "no root cells");
    anyhow::ensure!(
        input.labels.len() == n && input.coords.nrows() == n,
        "graph, labels and coordinates disagree on the number of cells"
    );
    anyhow::ensure!(
        roots.iter().all(|&r| r < n),
        "root cell index out of range"
    );

    let mut raw = graph_distances(input.graph, roots);

    let root_clusters = Selection::clusters_of(roots, input.labels);
    let tree_dist = input.tree.distances_from(&root_clusters);

    let mut fallback = vec![false; n];
    for i in 0..n {
        if raw[i].is_finite() {
            continue;
        }
        let k = input.labels[i];
        anyhow::ensure!(
            tree_dist[k].is_finite(),
            "cluster {} is not connected to any root cluster",
            k
        );
        raw[i] = tree_dist[k] + sq_dist_rows(input.coords, i, input.tree_points, k).sqrt();
        fallback[i] = true;
    }

    let n_fallback = fallback.iter().filter(|&&f| f).count();
    if n_fallback > 0 {
        warn!(
            "{} cells are unreachable from the roots on the kNN graph; placed by tree distance",
            n_fallback
        );
    }

    let value = min_max_scale(&raw);
    let rank = min_rank(&raw);

    let n_clusters = input.tree.n_nodes;
    let mut sums = vec![0.0f32; n_clusters];
    let mut counts = vec![0usize; n_clusters];
    for (&k, &v) in input.labels.iter().zip(value.iter()) {
        sums[k] += v;
        counts[k] += 1;
    }
    let cluster_mean = sums
        .iter()
        .zip(counts.iter())
        .map(|(&s, &c)| if c > 0 { s / c as f32 } else { f32::NAN })
        .collect();

    info!(
        "pseudotime from {} root cells in {} cluster(s); max raw distance {:.4}",
        roots.len(),
        root_clusters.len(),
        raw.iter().copied().fold(0.0f32, f32::max)
    );

    Ok(Pseudotime {
        raw,
        value,
        rank,
        fallback,
        cluster_mean,
    })
}

fn min_max_scale(x: &[f32]) -> Vec<f32> {
    let lo = x.iter().copied().fold(f32::INFINITY, f32::min);
    let hi = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = hi - lo;
    if range > 0.0 {
        x.iter().map(|v| (v - lo) / range).collect()
    } else {
        vec![0.0; x.len()]
    }
}

/// Competition ranking: `1 + #{j : x_j < x_i}`
fn min_rank(x: &[f32]) -> Vec<usize> {
    let mut order = (0..x.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));

    let mut rank = vec![0; x.len()];
    for (pos, &i) in order.iter().enumerate() {
        rank[i] = if pos > 0 && x[order[pos - 1]] == x[i] {
            rank[order[pos - 1]]
        } else {
            pos + 1
        };
    }
    rank
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Path graph 0-1-2-3 (unit edges) plus an isolated pair 4-5
    fn split_graph() -> KnnGraph {
        KnnGraph::from_edges(
            6,
            vec![((0, 1), 1.0), ((1, 2), 1.0), ((2, 3), 1.0), ((4, 5), 0.5)],
        )
    }

    #[test]
    fn test_multi_source_dijkstra() {
        let g = split_graph();
        let d = graph_distances(&g, &[0, 3]);
        assert_eq!(&d[..4], &[0.0, 1.0, 1.0, 0.0]);
        assert!(d[4].is_infinite());
    }

    #[test]
    fn test_min_rank_ties() {
        assert_eq!(min_rank(&[0.5, 0.0, 0.5, 1.0]), vec![2, 1, 2, 4]);
    }

    #[test]
    fn test_pseudotime_with_fallback() -> anyhow::Result<()> {
        let g = split_graph();
        // cells 0..4 on a line, cells 4, 5 far along the same line
        let coords = Mat::from_column_slice(6, 1, &[0.0, 1.0, 2.0, 3.0, 5.0, 5.5]);
        let labels = vec![0, 0, 1, 1, 2, 2];
        let tree_points = Mat::from_column_slice(3, 1, &[0.5, 2.5, 5.25]);
        let tree = ClusterTree::build(&tree_points)?;

        let input = PseudotimeInput {
            graph: &g,
            coords: &coords,
            labels: &labels,
            tree: &tree,
            tree_points: &tree_points,
        };
        let pt = estimate_pseudotime(&input, &[0])?;

        assert_eq!(&pt.raw[..4], &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(pt.fallback, vec![false, false, false, false, true, true]);
        // tree distance 0 -> 2 is 4.75, plus 0.25 to the centroid
        approx::assert_abs_diff_eq!(pt.raw[4], 5.0, epsilon = 1e-5);
        approx::assert_abs_diff_eq!(pt.raw[5], 5.0, epsilon = 1e-5);

        assert_eq!(pt.value[0], 0.0);
        approx::assert_abs_diff_eq!(pt.value[4], 1.0, epsilon = 1e-6);
        assert_eq!(pt.rank[4], pt.rank[5]);
        approx::assert_abs_diff_eq!(pt.cluster_mean[0], 0.1, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_selection_resolve() {
        let labels = vec![0, 1, 1, 2];
        let index: HashMap<Box<str>, usize> =
            [("a".into(), 0), ("d".into(), 3)].into_iter().collect();

        let sel = Selection {
            clusters: vec![1],
            cells: vec!["d".into()],
        };
        assert_eq!(sel.resolve(&labels, 3, &index).unwrap(), vec![1, 2, 3]);

        let bad = Selection {
            clusters: vec![7],
            cells: vec![],
        };
        assert!(bad.resolve(&labels, 3, &index).is_err());

        let unknown = Selection {
            clusters: vec![],
            cells: vec!["zz".into()],
        };
        assert!(unknown.resolve(&labels, 3, &index).is_err());
        assert!(Selection::default().resolve(&labels, 3, &index).is_err());
    }
}
