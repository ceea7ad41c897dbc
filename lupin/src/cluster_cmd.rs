use crate::cli_common::*;
use clap::Args;
use log::info;
use lupin::cluster::{cluster_cells, ClusterSummary};
use lupin::input::read_samples;
use lupin::output::{write_cluster_outputs, write_json};

#[derive(Args, Debug)]
pub struct ClusterArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub cluster: ClusterOpts,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    pub seed: u64,

    #[arg(short, long, required = true, help = "Output file prefix")]
    pub out: Box<str>,
}

pub fn run_cluster(args: &ClusterArgs) -> anyhow::Result<()> {
    let input = args.input.to_config(args.seed);
    let config = args.cluster.to_config(args.seed);

    let data = read_samples(&args.input.sample_specs()?, &input)?;
    info!("{} cells x {} markers", data.n_cells(), data.n_markers());

    let clusters = cluster_cells(&data.normalized(), &config)?;
    info!("\n{}", clusters.histogram_ascii(40, 20));

    let summary = ClusterSummary::new(&data.expr, &clusters, &data.stages);
    write_cluster_outputs(&args.out, &data, &clusters, &summary)?;
    write_json(&format!("{}.config.json", args.out), &config)?;
    Ok(())
}
