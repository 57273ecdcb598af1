use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod tasks;

#[derive(Parser)]
#[command(
    name = "instantdl",
    about = "Train, predict and estimate uncertainty on image datasets",
    author,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full experiment: train, predict, estimate uncertainty, evaluate.
    Run(tasks::run::RunArgs),
    /// Report dataset shape and the train/validation split without training.
    Probe(tasks::probe::ProbeArgs),
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run(args) => tasks::run::run(args),
        Commands::Probe(args) => tasks::probe::run(args),
    }
}
