use crate::cli_common::*;
use clap::Args;
use log::info;
use lupin::diff::{compare_groups, GroupKey, GroupSelector, MarkerTest};
use lupin::input::read_samples;
use lupin::output::read_cell_labels;
use matrix_util::common_io::write_lines;

#[derive(Args, Debug)]
pub struct DiffArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[arg(
        long,
        required = true,
        help = "Cell table from `lupin run` or `lupin cluster`",
        long_help = "Cell table (`{out}.cells.tsv.gz`) from `lupin run` or `lupin cluster`.\n\
		     Read the same samples with the same options so that cell ids match."
    )]
    pub cells: Box<str>,

    #[arg(long, required = true, help = "First group, e.g. cluster:1,2 or branch:0")]
    pub group_a: GroupSelector,

    #[arg(long, required = true, help = "Second group, e.g. cluster:3 or branch:1")]
    pub group_b: GroupSelector,

    #[arg(long, default_value_t = 42, help = "Random seed (must match the run)")]
    pub seed: u64,

    #[arg(short, long, required = true, help = "Output file prefix")]
    pub out: Box<str>,
}

pub fn run_diff(args: &DiffArgs) -> anyhow::Result<()> {
    let data = read_samples(&args.input.sample_specs()?, &args.input.to_config(args.seed))?;
    let table = read_cell_labels(&args.cells)?;

    let uses_branch = [&args.group_a, &args.group_b]
        .iter()
        .any(|g| g.key == GroupKey::Branch);
    anyhow::ensure!(
        !uses_branch || table.branches.is_some(),
        "{} has no branch column",
        args.cells
    );

    // labels in data row order
    let index = data.cell_index();
    let mut clusters = vec![usize::MAX; data.n_cells()];
    let mut branches = vec![usize::MAX; data.n_cells()];
    for (l, cell) in table.cells.iter().enumerate() {
        let i = *index
            .get(cell)
            .ok_or_else(|| anyhow::anyhow!("cell {} is not in the samples", cell))?;
        clusters[i] = table.clusters[l];
        if let Some(b) = table.branches.as_ref() {
            branches[i] = b[l];
        }
    }
    let unlabelled = clusters.iter().filter(|&&k| k == usize::MAX).count();
    if unlabelled > 0 {
        info!("{} cells are not in {}", unlabelled, args.cells);
    }

    let a = args.group_a.rows(&clusters, &branches);
    let b = args.group_b.rows(&clusters, &branches);
    let tests = compare_groups(&data.expr, &data.markers, &a, &b)?;

    let mut lines = vec![MarkerTest::header().to_string()];
    lines.extend(tests.iter().map(|t| t.to_tsv_line()));
    let path = format!("{}.diff.tsv", args.out);
    matrix_util::common_io::mkdir(&path)?;
    write_lines(&lines, &path)?;
    info!("wrote {}", path);
    Ok(())
}
