use std::path::PathBuf;

use anyhow::Result;
use burn_instantdl::{Algorithm, DatasetLayout, DatasetProber, RunConfig, SplitPlanner};
use clap::Args;

#[derive(Args)]
pub struct ProbeArgs {
    /// Dataset root holding `train/` and `test/`.
    #[arg(short, long)]
    pub path: PathBuf,

    #[arg(long, value_delimiter = ',')]
    pub image_size: Option<Vec<usize>>,

    #[arg(short, long, default_value_t = 2)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1)]
    pub seed: u64,
}

pub fn run(args: &ProbeArgs) -> Result<()> {
    // Probing reads the shape settings only, the algorithm is irrelevant.
    let config = RunConfig::new(Algorithm::Regression, args.path.clone())
        .with_image_size(args.image_size.clone())
        .with_batch_size(args.batch_size)
        .with_seed(args.seed);
    config.validate()?;

    let layout = DatasetLayout::new(config.path.clone());
    let descriptor = DatasetProber::new(&layout).probe(&config)?;
    let manifest = SplitPlanner::new(config.seed, config.batch_size).plan(&layout.train_images())?;

    println!("Dataset:          {}", layout.dataset_name());
    println!("Modalities:       {}", descriptor.modalities.join(", "));
    println!("Input shape:      {:?}", descriptor.input_shape);
    println!("Network input:    {:?}", descriptor.network_input_shape);
    if let Some(raw) = &descriptor.raw_shape {
        println!("Stored shape:     {raw:?}");
    }
    println!("Dimensions:       {:?}", descriptor.dimensions);
    println!(
        "Split:            {} train / {} validation",
        manifest.train_files.len(),
        manifest.val_files.len()
    );
    println!("Steps per epoch:  {}", manifest.steps_per_epoch);
    println!(
        "Validation steps: {}",
        manifest.validation_steps(config.batch_size)
    );

    Ok(())
}
