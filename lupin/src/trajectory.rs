//! Minimum spanning tree over cluster centroids and its branches

use crate::common::*;
use std::collections::VecDeque;

/// Undirected tree whose nodes are clusters
#[derive(Clone, Debug)]
pub struct ClusterTree {
    pub n_nodes: usize,
    /// `(a, b, length)` with `a < b`
    pub edges: Vec<(usize, usize, f32)>,
    adj: Vec<Vec<(usize, f32)>>,
}

impl ClusterTree {
    /// Euclidean minimum spanning tree over the rows of `points` (Prim)
    pub fn build(points: &Mat) -> anyhow::Result<Self> {
        let n = points.nrows();
        anyhow::ensure!(n > 0, "cannot build a tree over zero clusters");
        anyhow::ensure!(
            points.iter().all(|x| x.is_finite()),
            "cluster coordinates contain non-finite values"
        );

        let mut in_tree = vec![false; n];
        let mut best = vec![(f32::INFINITY, usize::MAX); n];
        let mut edges = Vec::with_capacity(n.saturating_sub(1));

        in_tree[0] = true;
        for v in 1..n {
            best[v] = (points.row_sq_distance(0, v).sqrt(), 0);
        }

        for _ in 1..n {
            let next = (0..n)
                .filter(|&v| !in_tree[v])
                .min_by(|&a, &b| best[a].0.total_cmp(&best[b].0).then(a.cmp(&b)));
            let Some(v) = next else { break };

            let (len, u) = best[v];
            in_tree[v] = true;
            edges.push((u.min(v), u.max(v), len));

            for w in 0..n {
                if !in_tree[w] {
                    let d = points.row_sq_distance(v, w).sqrt();
                    if d < best[w].0 {
                        best[w] = (d, v);
                    }
                }
            }
        }

        Ok(Self::from_edges(n, edges))
    }

    pub fn from_edges(n_nodes: usize, mut edges: Vec<(usize, usize, f32)>) -> Self {
        edges.sort_by(|x, y| (x.0, x.1).cmp(&(y.0, y.1)));
        let mut adj = vec![Vec::new(); n_nodes];
        for &(a, b, len) in edges.iter() {
            adj[a].push((b, len));
            adj[b].push((a, len));
        }
        Self {
            n_nodes,
            edges,
            adj,
        }
    }

    pub fn degree(&self, node: usize) -> usize {
        self.adj[node].len()
    }

    pub fn neighbors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.adj[node].iter().map(|&(v, _)| v)
    }

    /// Degree-1 nodes
    pub fn leaves(&self) -> Vec<usize> {
        (0..self.n_nodes).filter(|&v| self.degree(v) == 1).collect()
    }

    /// Nodes of degree 3 or more
    pub fn branch_points(&self) -> Vec<usize> {
        (0..self.n_nodes).filter(|&v| self.degree(v) >= 3).collect()
    }

    pub fn total_length(&self) -> f32 {
        self.edges.iter().map(|e| e.2).sum()
    }

    /// Parent of every node when the tree hangs from `root`
    fn parents(&self, root: usize) -> Vec<Option<usize>> {
        let mut parent = vec![None; self.n_nodes];
        let mut visited = vec![false; self.n_nodes];
        let mut queue = VecDeque::from([root]);
        visited[root] = true;
        while let Some(u) = queue.pop_front() {
            for v in self.neighbors(u) {
                if !visited[v] {
                    visited[v] = true;
                    parent[v] = Some(u);
                    queue.push_back(v);
                }
            }
        }
        parent
    }

    /// Unique path from `a` to `b`, both included
    pub fn path(&self, a: usize, b: usize) -> anyhow::Result<Vec<usize>> {
        anyhow::ensure!(
            a < self.n_nodes && b < self.n_nodes,
            "node out of range ({}, {}) for a tree of {} nodes",
            a,
            b,
            self.n_nodes
        );
        let parent = self.parents(b);
        let mut path = vec![a];
        let mut cur = a;
        while cur != b {
            cur = parent[cur].ok_or_else(|| anyhow::anyhow!("{} and {} are not connected", a, b))?;
            path.push(cur);
        }
        Ok(path)
    }

    /// Tree distance from the nearest of `sources` to every node;
    /// unreachable nodes are infinite
    pub fn distances_from(&self, sources: &[usize]) -> Vec<f32> {
        let mut dist = vec![f32::INFINITY; self.n_nodes];
        let mut queue = VecDeque::new();
        for &s in sources {
            if s < self.n_nodes {
                dist[s] = 0.0;
                queue.push_back(s);
            }
        }
        // a tree has one path between any two nodes, but with several
        // sources a node can be improved after its first visit
        while let Some(u) = queue.pop_front() {
            for &(v, len) in self.adj[u].iter() {
                if dist[u] + len < dist[v] {
                    dist[v] = dist[u] + len;
                    queue.push_back(v);
                }
            }
        }
        dist
    }

    /// Branch of every node: each branch point is a branch of its own and
    /// the remaining nodes are grouped into the segments left after
    /// removing the branch points. Returns `(branch_of_node, n_branches)`.
    pub fn branches(&self) -> (Vec<usize>, usize) {
        let is_branch_point = (0..self.n_nodes)
            .map(|v| self.degree(v) >= 3)
            .collect::<Vec<_>>();

        let mut branch = vec![usize::MAX; self.n_nodes];
        let mut next = 0;
        for start in 0..self.n_nodes {
            if branch[start] != usize::MAX {
                continue;
            }
            branch[start] = next;
            if !is_branch_point[start] {
                let mut stack = vec![start];
                while let Some(u) = stack.pop() {
                    for v in self.neighbors(u) {
                        if branch[v] == usize::MAX && !is_branch_point[v] {
                            branch[v] = next;
                            stack.push(v);
                        }
                    }
                }
            }
            next += 1;
        }
        (branch, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Y shape: 0-1-2 stem, 2 forks to 3-4 and 5-6
    fn y_points() -> Mat {
        Mat::from_row_slice(
            7,
            2,
            &[
                0.0, 0.0, //
                1.0, 0.0, //
                2.0, 0.0, //
                3.0, 1.0, //
                4.0, 2.0, //
                3.0, -1.0, //
                4.0, -2.0, //
            ],
        )
    }

    #[test]
    fn test_mst_of_y() -> anyhow::Result<()> {
        let tree = ClusterTree::build(&y_points())?;
        assert_eq!(tree.edges.len(), 6);
        let pairs = tree.edges.iter().map(|e| (e.0, e.1)).collect::<Vec<_>>();
        assert_eq!(pairs, vec![(0, 1), (1, 2), (2, 3), (2, 5), (3, 4), (5, 6)]);
        assert_eq!(tree.leaves(), vec![0, 4, 6]);
        assert_eq!(tree.branch_points(), vec![2]);
        approx::assert_abs_diff_eq!(tree.total_length(), 2.0 + 4.0 * 2f32.sqrt(), epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_path_and_distances() -> anyhow::Result<()> {
        let tree = ClusterTree::build(&y_points())?;
        assert_eq!(tree.path(0, 6)?, vec![0, 1, 2, 5, 6]);
        assert_eq!(tree.path(4, 4)?, vec![4]);
        assert!(tree.path(0, 9).is_err());

        let d = tree.distances_from(&[0]);
        approx::assert_abs_diff_eq!(d[4], 2.0 + 2.0 * 2f32.sqrt(), epsilon = 1e-5);

        let d = tree.distances_from(&[0, 6]);
        assert_eq!(d[6], 0.0);
        approx::assert_abs_diff_eq!(d[5], 2f32.sqrt(), epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_branches() -> anyhow::Result<()> {
        let tree = ClusterTree::build(&y_points())?;
        let (branch, n) = tree.branches();
        assert_eq!(n, 4);
        assert_eq!(branch[0], branch[1]);
        assert_eq!(branch[3], branch[4]);
        assert_eq!(branch[5], branch[6]);
        let distinct = [branch[0], branch[2], branch[3], branch[5]]
            .into_iter()
            .collect::<std::collections::HashSet<_>>();
        assert_eq!(distinct.len(), 4);
        Ok(())
    }

    #[test]
    fn test_single_cluster_tree() -> anyhow::Result<()> {
        let tree = ClusterTree::build(&Mat::zeros(1, 3))?;
        assert!(tree.edges.is_empty());
        assert!(tree.leaves().is_empty());
        assert_eq!(tree.branches(), (vec![0], 1));
        Ok(())
    }
}
