mod cli_common;
mod cluster_cmd;
mod diff_cmd;
mod run_cmd;

use cluster_cmd::*;
use diff_cmd::*;
use run_cmd::*;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use log::info;

const LOGO: &str = include_str!("../logo.txt");

fn colorize_logo_line(line: &str) -> String {
    line.replace('o', &"o".truecolor(123, 104, 238).to_string())
        .replace('|', &"|".truecolor(0, 100, 0).to_string())
        .replace('\\', &"\\".truecolor(0, 100, 0).to_string())
        .replace('/', &"/".truecolor(0, 100, 0).to_string())
        .replace('~', &"~".truecolor(101, 67, 33).to_string())
}

fn print_logo() {
    for line in LOGO.lines() {
        println!("  {}", colorize_logo_line(line));
    }
    // Lineage Unfolding by Pseudotime INference
    println!("  {}", "lupin".bold());
    println!();
}

#[derive(Parser)]
#[command(name = "lupin", version)]
#[command(
    about = "Lineage Unfolding by Pseudotime INference for cytometry data",
    long_about = "Cluster cytometry cells, embed them, connect cluster centroids by a\n\
		  minimum spanning tree, order cells by pseudotime from root cells and\n\
		  score intermediate states by random walks toward leaf cells.\n\
		  Input matrices are delimited text (cells x markers, .tsv/.csv, .gz ok)."
)]
struct Cli {
    #[arg(short = 'v', long, global = true, help = "Log progress (RUST_LOG=info)")]
    verbose: bool,

    #[arg(
        long,
        global = true,
        help = "Number of worker threads",
        long_help = "Number of worker threads for the global rayon pool.\n\
		     Defaults to the number of logical CPUs."
    )]
    threads: Option<usize>,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(
        about = "Run the whole trajectory pipeline",
        long_about = "Run every stage in order:\n\
		      (1) read, transform, downsample and merge samples\n\
		      (2) cluster cells\n\
		      (3) reduce dimensions\n\
		      (4) build a minimum spanning tree over cluster centroids\n\
		      (5) pseudotime from root clusters/cells\n\
		      (6) trajectory values from walks toward leaf clusters/cells\n"
    )]
    Run(RunArgs),

    #[command(
        about = "Cluster cells only",
        long_about = "Read and merge samples, cluster cells and write per-cell\n\
		      assignments with per-cluster size, stage counts and mean expression.\n\
		      Useful for choosing root and leaf clusters before `lupin run`."
    )]
    Cluster(ClusterArgs),

    #[command(
        about = "Compare marker expression between two groups of cells",
        long_about = "Welch t-test per marker between two groups of clusters or branches\n\
		      read from a cell table written by `lupin run` or `lupin cluster`,\n\
		      with Benjamini-Hochberg adjusted p-values."
    )]
    Diff(DiffArgs),
}

fn main() -> Result<()> {
    // Show logo if help is requested
    if std::env::args().any(|arg| arg == "--help" || arg == "-h") {
        print_logo();
    }

    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let threads = cli.threads.unwrap_or_else(num_cpus::get).max(1);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()?;
    info!("using {} threads", threads);

    match &cli.commands {
        Commands::Run(args) => {
            run_trajectory(args)?;
        }
        Commands::Cluster(args) => {
            run_cluster(args)?;
        }
        Commands::Diff(args) => {
            run_diff(args)?;
        }
    }

    info!("Done");
    Ok(())
}
