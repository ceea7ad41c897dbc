//! Tables and JSON written by the command-line tool

use crate::cluster::{ClusterResult, ClusterSummary};
use crate::common::*;
use crate::input::CytoData;
use crate::pipeline::{PipelineConfig, PipelineResult};
use matrix_util::common_io::{mkdir, read_lines_of_words_delim, write_lines};
use rayon::prelude::*;

fn join<T: std::fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join("\t")
}

/// Run-level numbers for `{out}.summary.json`
#[derive(Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub n_cells: usize,
    pub n_markers: usize,
    pub n_samples: usize,
    pub stages: Vec<Box<str>>,
    pub n_clusters: usize,
    pub cluster_sizes: Vec<usize>,
    pub n_branches: usize,
    pub tree_edges: Vec<(usize, usize, f32)>,
    pub tree_leaves: Vec<usize>,
    pub branch_points: Vec<usize>,
    pub root_clusters: Vec<usize>,
    pub leaf_clusters: Vec<usize>,
    pub n_root_cells: usize,
    pub n_leaf_cells: usize,
    pub n_fallback_cells: usize,
    pub n_walks: usize,
    pub n_walks_reached: usize,
    pub n_intermediate: usize,
    pub pca_explained_ratio: Vec<f32>,
}

impl RunSummary {
    pub fn new(data: &CytoData, res: &PipelineResult) -> Self {
        let mut samples = data.samples.clone();
        samples.sort();
        samples.dedup();

        let (n_walks, n_walks_reached, n_intermediate) = match &res.trajectory {
            Some(tv) => (
                tv.n_walks,
                tv.n_reached,
                tv.intermediate.iter().filter(|&&x| x).count(),
            ),
            None => (0, 0, 0),
        };

        Self {
            n_cells: data.n_cells(),
            n_markers: data.n_markers(),
            n_samples: samples.len(),
            stages: data.stage_levels(),
            n_clusters: res.clusters.n_clusters,
            cluster_sizes: res.summary.sizes.clone(),
            n_branches: res.n_branches,
            tree_edges: res.tree.edges.clone(),
            tree_leaves: res.tree.leaves(),
            branch_points: res.tree.branch_points(),
            root_clusters: res.root_clusters(),
            leaf_clusters: res.leaf_clusters(),
            n_root_cells: res.root_cells.len(),
            n_leaf_cells: res.leaf_cells.len(),
            n_fallback_cells: res.pseudotime.fallback.iter().filter(|&&x| x).count(),
            n_walks,
            n_walks_reached,
            n_intermediate,
            pca_explained_ratio: res.pca.explained_ratio.clone(),
        }
    }
}

/// Write every output of a full run under the prefix `out`
pub fn write_pipeline_outputs(
    out: &str,
    data: &CytoData,
    config: &PipelineConfig,
    res: &PipelineResult,
) -> anyhow::Result<()> {
    mkdir(out)?;
    write_cells(&format!("{}.cells.tsv.gz", out), data, res)?;
    write_clusters(&format!("{}.clusters.tsv.gz", out), data, res)?;
    write_tree(&format!("{}.tree.tsv", out), res)?;
    write_bins(&format!("{}.pseudotime_bins.tsv.gz", out), data, res)?;
    write_json(&format!("{}.summary.json", out), &RunSummary::new(data, res))?;
    write_json(&format!("{}.config.json", out), config)?;
    info!("wrote {}.{{cells,clusters,pseudotime_bins}}.tsv.gz, tree.tsv, summary.json, config.json", out);
    Ok(())
}

pub fn write_json<T: Serialize>(path: &str, value: &T) -> anyhow::Result<()> {
    mkdir(path)?;
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text)?;
    Ok(())
}

pub fn read_config(path: &str) -> anyhow::Result<PipelineConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read config {}: {}", path, e))?;
    Ok(serde_json::from_str(&text)?)
}

fn write_cells(path: &str, data: &CytoData, res: &PipelineResult) -> anyhow::Result<()> {
    let mut header = vec![
        "cell".to_string(),
        "sample".into(),
        "stage".into(),
        "cluster".into(),
        "branch".into(),
    ];
    header.extend(res.embedding.column_names().iter().map(|x| x.to_string()));
    header.extend(
        [
            "pseudotime",
            "pseudotime_rank",
            "tree_fallback",
            "traj_value",
            "traj_value_log",
            "intermediate",
        ]
        .map(String::from),
    );

    let pt = &res.pseudotime;
    let tv = res.trajectory.as_ref();
    let mut lines = vec![join(header)];
    lines.par_extend((0..data.n_cells()).into_par_iter().map(|i| {
        let mut fields = vec![
            data.cells[i].to_string(),
            data.samples[i].to_string(),
            data.stages[i].to_string(),
            res.clusters.labels[i].to_string(),
            res.cell_branch[i].to_string(),
        ];
        fields.extend(res.embedding.coords.row(i).iter().map(|x| x.to_string()));
        fields.push(pt.value[i].to_string());
        fields.push(pt.rank[i].to_string());
        fields.push((pt.fallback[i] as u8).to_string());
        match tv {
            Some(tv) => {
                fields.push(tv.traj_value[i].to_string());
                fields.push(tv.traj_value_log[i].to_string());
                fields.push((tv.intermediate[i] as u8).to_string());
            }
            None => fields.extend(["NA", "NA", "NA"].map(String::from)),
        }
        fields.join("\t")
    }));
    write_lines(&lines, path)
}

fn write_clusters(path: &str, data: &CytoData, res: &PipelineResult) -> anyhow::Result<()> {
    let summary = &res.summary;
    let roots = res.root_clusters();
    let leaves = res.leaf_clusters();
    let emb_names = res.embedding.column_names();

    let mut header = vec![
        "cluster".to_string(),
        "size".into(),
        "branch".into(),
        "tree_degree".into(),
        "pseudotime".into(),
        "root".into(),
        "leaf".into(),
    ];
    header.extend(summary.stage_levels.iter().map(|s| format!("n_{}", s)));
    header.extend(emb_names.iter().map(|x| x.to_string()));
    header.extend(data.markers.iter().map(|x| x.to_string()));

    let mut lines = vec![join(header)];
    for k in 0..res.clusters.n_clusters {
        let mut fields = vec![
            k.to_string(),
            summary.sizes[k].to_string(),
            res.cluster_branch[k].to_string(),
            res.tree.degree(k).to_string(),
            res.pseudotime.cluster_mean[k].to_string(),
            (roots.contains(&k) as u8).to_string(),
            (leaves.contains(&k) as u8).to_string(),
        ];
        fields.extend(summary.stage_counts[k].iter().map(|c| c.to_string()));
        fields.extend(res.cluster_embedding.row(k).iter().map(|x| x.to_string()));
        fields.extend(summary.centroids.row(k).iter().map(|x| x.to_string()));
        lines.push(fields.join("\t"));
    }
    write_lines(&lines, path)
}

fn write_tree(path: &str, res: &PipelineResult) -> anyhow::Result<()> {
    let mut lines = vec!["from\tto\tlength".to_string()];
    lines.extend(
        res.tree
            .edges
            .iter()
            .map(|(a, b, len)| format!("{}\t{}\t{}", a, b, len)),
    );
    write_lines(&lines, path)
}

fn write_bins(path: &str, data: &CytoData, res: &PipelineResult) -> anyhow::Result<()> {
    let bins = &res.bins;
    let mut header = vec!["bin".to_string(), "lower".into(), "upper".into(), "n_cells".into()];
    header.extend(data.markers.iter().map(|x| x.to_string()));

    let mut lines = vec![join(header)];
    for b in 0..bins.counts.len() {
        let mut fields = vec![
            b.to_string(),
            bins.edges[b].to_string(),
            bins.edges[b + 1].to_string(),
            bins.counts[b].to_string(),
        ];
        fields.extend(bins.means.row(b).iter().map(|x| x.to_string()));
        lines.push(fields.join("\t"));
    }
    write_lines(&lines, path)
}

/// Outputs of `lupin cluster`: per-cell assignments and per-cluster summary
pub fn write_cluster_outputs(
    out: &str,
    data: &CytoData,
    clusters: &ClusterResult,
    summary: &ClusterSummary,
) -> anyhow::Result<()> {
    mkdir(out)?;

    let mut lines = vec!["cell\tsample\tstage\tcluster".to_string()];
    lines.extend((0..data.n_cells()).map(|i| {
        format!(
            "{}\t{}\t{}\t{}",
            data.cells[i], data.samples[i], data.stages[i], clusters.labels[i]
        )
    }));
    write_lines(&lines, &format!("{}.cells.tsv.gz", out))?;

    let mut header = vec!["cluster".to_string(), "size".into()];
    header.extend(summary.stage_levels.iter().map(|s| format!("n_{}", s)));
    header.extend(data.markers.iter().map(|x| x.to_string()));
    let mut lines = vec![join(header)];
    for k in 0..clusters.n_clusters {
        let mut fields = vec![k.to_string(), summary.sizes[k].to_string()];
        fields.extend(summary.stage_counts[k].iter().map(|c| c.to_string()));
        fields.extend(summary.centroids.row(k).iter().map(|x| x.to_string()));
        lines.push(fields.join("\t"));
    }
    write_lines(&lines, &format!("{}.clusters.tsv.gz", out))?;
    info!("wrote {}.cells.tsv.gz and {}.clusters.tsv.gz", out, out);
    Ok(())
}

/// Cluster and branch columns of a cell table written by `run`
pub struct CellLabels {
    pub cells: Vec<Box<str>>,
    pub clusters: Vec<usize>,
    /// absent in tables written by `cluster`
    pub branches: Option<Vec<usize>>,
}

pub fn read_cell_labels(path: &str) -> anyhow::Result<CellLabels> {
    let table = read_lines_of_words_delim(path, '\t', Some(0))?;
    let column = |name: &str| table.header.iter().position(|h| h.as_ref() == name);

    let cell_col = column("cell").ok_or_else(|| anyhow::anyhow!("no 'cell' column in {}", path))?;
    let cluster_col =
        column("cluster").ok_or_else(|| anyhow::anyhow!("no 'cluster' column in {}", path))?;
    let branch_col = column("branch");

    let parse = |words: &[Box<str>], j: usize, line: usize| -> anyhow::Result<usize> {
        let w = words
            .get(j)
            .ok_or_else(|| anyhow::anyhow!("line {} of {} is too short", line + 2, path))?;
        w.parse::<usize>()
            .map_err(|_| anyhow::anyhow!("cannot parse '{}' on line {} of {}", w, line + 2, path))
    };

    let mut cells = Vec::with_capacity(table.lines.len());
    let mut clusters = Vec::with_capacity(table.lines.len());
    let mut branches = Vec::with_capacity(table.lines.len());
    for (l, words) in table.lines.iter().enumerate() {
        let cell = words
            .get(cell_col)
            .ok_or_else(|| anyhow::anyhow!("line {} of {} is too short", l + 2, path))?;
        cells.push(cell.clone());
        clusters.push(parse(words.as_slice(), cluster_col, l)?);
        if let Some(b) = branch_col {
            branches.push(parse(words.as_slice(), b, l)?);
        }
    }

    Ok(CellLabels {
        cells,
        clusters,
        branches: branch_col.map(|_| branches),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_util::common_io::create_temp_dir_file;

    #[test]
    fn test_read_cell_labels() -> anyhow::Result<()> {
        let file = create_temp_dir_file(".tsv.gz")?;
        let file = file.to_str().unwrap_or_default().to_string();
        write_lines(
            &[
                "cell\tsample\tcluster\tbranch",
                "a_1\ta\t0\t2",
                "b_1\tb\t3\t1",
            ],
            &file,
        )?;
        let labels = read_cell_labels(&file)?;
        assert_eq!(labels.cells[1].as_ref(), "b_1");
        assert_eq!(labels.clusters, vec![0, 3]);
        assert_eq!(labels.branches, Some(vec![2, 1]));
        Ok(())
    }

    #[test]
    fn test_read_cell_labels_without_branch() -> anyhow::Result<()> {
        let file = create_temp_dir_file(".tsv")?;
        let file = file.to_str().unwrap_or_default().to_string();
        write_lines(&["cell\tcluster", "x\t1", "y\tz"], &file)?;
        assert!(read_cell_labels(&file).is_err());

        write_lines(&["cell\tcluster", "x\t1"], &file)?;
        assert!(read_cell_labels(&file)?.branches.is_none());
        Ok(())
    }
}
