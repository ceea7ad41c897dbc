use lupin::cluster::ClusterMethod;
use lupin::hclust::Linkage;
use lupin::input::{read_samples, InputConfig, MergeMethod, SampleSpec, Transform};
use lupin::output::{read_cell_labels, read_config, write_pipeline_outputs};
use lupin::pipeline::{run_pipeline, PipelineConfig};
use lupin::pseudotime::Selection;
use matrix_util::traits::IoOps;
use nalgebra::DMatrix;
use std::collections::HashSet;

/// A stem along the first marker that splits into two arms, one per
/// remaining marker. The stem goes into sample `early`, the arms into
/// sample `late`.
fn write_branching_samples(dir: &std::path::Path) -> anyhow::Result<Vec<SampleSpec>> {
    let n = 100;
    let jitter = |i: usize, j: usize| 0.01 * ((i * 7 + j * 13) as f32).sin();
    let markers: Vec<Box<str>> = vec!["CD34".into(), "CD11b".into(), "CD3".into()];

    let stem = DMatrix::<f32>::from_fn(n, 3, |i, j| {
        let t = 5.0 * i as f32 / n as f32;
        (if j == 0 { t } else { 0.0 }) + jitter(i, j)
    });
    let stem_rows: Vec<Box<str>> = (0..n).map(|i| format!("s{}", i).into()).collect();

    let arms = DMatrix::<f32>::from_fn(2 * n, 3, |i, j| {
        let s = 5.0 * ((i % n) + 1) as f32 / n as f32;
        let arm = 1 + i / n;
        let x = match j {
            0 => 5.0,
            _ if j == arm => s,
            _ => 0.0,
        };
        x + jitter(i, j)
    });
    let arm_rows: Vec<Box<str>> = (0..2 * n)
        .map(|i| format!("{}{}", if i < n { "a" } else { "b" }, i % n).into())
        .collect();

    let early = dir.join("early.tsv.gz");
    let late = dir.join("late.tsv");
    let early = early.to_str().unwrap();
    let late = late.to_str().unwrap();
    stem.write_named(early, "cell", &stem_rows, &markers)?;
    arms.write_named(late, "cell", &arm_rows, &markers)?;

    Ok(vec![
        format!("{}:early:day0", early).parse()?,
        format!("{}:late:day5", late).parse()?,
    ])
}

fn branching_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.input = InputConfig {
        markers: None,
        transform: Transform::None,
        merge: MergeMethod::All,
        seed: 7,
    };
    config.cluster.method = ClusterMethod::Hclust;
    config.cluster.linkage = Linkage::Average;
    config.cluster.num_clusters = Some(6);
    config.n_pcs = 3;
    config.roots = Selection {
        clusters: vec![],
        cells: (0..5).map(|i| format!("early_s{}", i).into_boxed_str()).collect(),
    };
    config.leaves = Selection {
        clusters: vec![],
        cells: (90..100)
            .flat_map(|i| {
                [
                    format!("late_a{}", i).into_boxed_str(),
                    format!("late_b{}", i).into_boxed_str(),
                ]
            })
            .collect(),
    };
    config
}

#[test]
fn reads_and_merges_branching_samples() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let specs = write_branching_samples(dir.path())?;
    let data = read_samples(&specs, &branching_config().input)?;

    assert_eq!(data.n_cells(), 300);
    assert_eq!(data.n_markers(), 3);
    let stages: Vec<Box<str>> = vec!["day0".into(), "day5".into()];
    assert_eq!(data.stage_levels(), stages);
    assert_eq!(data.cells[0].as_ref(), "early_s0");
    assert_eq!(data.samples[299].as_ref(), "late");
    Ok(())
}

#[test]
fn pseudotime_increases_along_each_arm() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let specs = write_branching_samples(dir.path())?;
    let config = branching_config();
    let data = read_samples(&specs, &config.input)?;
    let res = run_pipeline(&data, &config)?;

    assert_eq!(res.clusters.n_clusters, 6);
    assert_eq!(res.tree.edges.len(), 5);
    assert_eq!(res.cell_branch.len(), data.n_cells());

    // the stem splits into two arms at a branch point
    assert!(!res.tree.branch_points().is_empty());
    assert!(res.n_branches >= 3);

    let index = data.cell_index();
    let arm_end_branches = |arm: &str| -> HashSet<usize> {
        (90..100)
            .map(|i| res.cell_branch[index[format!("late_{}{}", arm, i).as_str()]])
            .collect()
    };
    assert!(arm_end_branches("a").is_disjoint(&arm_end_branches("b")));
    let pt = |cell: &str| res.pseudotime.value[index[cell]];

    for r in res.root_cells.iter() {
        assert_eq!(res.pseudotime.value[*r], 0.0);
    }
    assert!(res.pseudotime.value.iter().all(|v| (0.0..=1.0).contains(v)));

    assert!(pt("early_s10") < pt("early_s50"));
    assert!(pt("early_s50") < pt("early_s90"));
    for arm in ["a", "b"] {
        let early = pt(&format!("late_{}10", arm));
        let late = pt(&format!("late_{}90", arm));
        assert!(pt("early_s90") < early);
        assert!(early < late, "arm {}: {} >= {}", arm, early, late);
    }

    let traj = res.trajectory.as_ref().unwrap();
    assert_eq!(traj.n_walks, 5 * config.walk.walks_per_root);
    assert!(traj.n_reached > 0);
    assert!(traj.traj_value.iter().all(|v| (0.0..=1.0).contains(v)));
    Ok(())
}

#[test]
fn writes_outputs_that_read_back() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let specs = write_branching_samples(dir.path())?;
    let config = branching_config();
    let data = read_samples(&specs, &config.input)?;
    let res = run_pipeline(&data, &config)?;

    let out = dir.path().join("out").join("run");
    let out = out.to_str().unwrap();
    write_pipeline_outputs(out, &data, &config, &res)?;

    let labels = read_cell_labels(&format!("{}.cells.tsv.gz", out))?;
    assert_eq!(labels.cells, data.cells);
    assert_eq!(labels.clusters, res.clusters.labels);
    assert_eq!(labels.branches.as_ref(), Some(&res.cell_branch));

    let back = read_config(&format!("{}.config.json", out))?;
    assert_eq!(back.roots, config.roots);
    assert_eq!(back.leaves, config.leaves);
    assert_eq!(back.cluster.num_clusters, Some(6));

    for suffix in ["clusters.tsv.gz", "tree.tsv", "pseudotime_bins.tsv.gz", "summary.json"] {
        assert!(std::path::Path::new(&format!("{}.{}", out, suffix)).exists());
    }
    Ok(())
}
