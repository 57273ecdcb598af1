pub mod probe;
pub mod run;

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use burn_instantdl::{Algorithm, AugmentationConfig, RunConfig};
use burn::config::Config;
use clap::{Args, ValueEnum};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum AlgorithmArg {
    Classification,
    SemanticSegmentation,
    Regression,
}

impl From<AlgorithmArg> for Algorithm {
    fn from(value: AlgorithmArg) -> Self {
        match value {
            AlgorithmArg::Classification => Algorithm::Classification,
            AlgorithmArg::SemanticSegmentation => Algorithm::SemanticSegmentation,
            AlgorithmArg::Regression => Algorithm::Regression,
        }
    }
}

/// Where the run configuration comes from: a JSON file, or flags.
#[derive(Args)]
pub struct ConfigArgs {
    /// JSON run configuration, overrides every other flag.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long, value_enum)]
    pub algorithm: Option<AlgorithmArg>,

    /// Dataset root holding `train/` and `test/`.
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    #[arg(short, long, default_value_t = 2)]
    pub batch_size: usize,

    #[arg(short, long, default_value_t = 100)]
    pub epochs: usize,

    #[arg(long)]
    pub num_classes: Option<usize>,

    #[arg(long)]
    pub loss: Option<String>,

    #[arg(long)]
    pub pretrained_weights: Option<PathBuf>,

    /// Channel-last input shape, e.g. `128,128,3`.
    #[arg(long, value_delimiter = ',')]
    pub image_size: Option<Vec<usize>>,

    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,

    #[arg(long, default_value_t = 32)]
    pub base_filters: usize,

    #[command(flatten)]
    pub augmentation: AugmentationArgs,
}

/// Training-feed augmentations, all off by default.
#[derive(Args, Clone, Debug, Default)]
pub struct AugmentationArgs {
    #[arg(long)]
    pub horizontal_flip: bool,

    #[arg(long)]
    pub vertical_flip: bool,

    /// Random multiples of 90 degrees, square inputs only.
    #[arg(long)]
    pub rotate_90: bool,

    /// Maximum relative brightness change, `0` disables it.
    #[arg(long, default_value_t = 0.0)]
    pub brightness_range: f32,

    /// Threshold ground truth at 0.5 after loading.
    #[arg(long)]
    pub binarize_mask: bool,
}

impl From<&AugmentationArgs> for AugmentationConfig {
    fn from(args: &AugmentationArgs) -> Self {
        AugmentationConfig::new()
            .with_horizontal_flip(args.horizontal_flip)
            .with_vertical_flip(args.vertical_flip)
            .with_rotate_90(args.rotate_90)
            .with_brightness_range(args.brightness_range)
            .with_binarize_mask(args.binarize_mask)
    }
}

impl ConfigArgs {
    pub fn resolve(&self) -> Result<RunConfig> {
        if let Some(path) = &self.config {
            return RunConfig::load(path)
                .map_err(|e| anyhow!("Failed to read configuration {}: {e}", path.display()));
        }

        let algorithm = self
            .algorithm
            .ok_or_else(|| anyhow!("--algorithm is required without --config"))?;
        let path = self
            .path
            .clone()
            .ok_or_else(|| anyhow!("--path is required without --config"))?;

        Ok(RunConfig::new(algorithm.into(), path)
            .with_batch_size(self.batch_size)
            .with_iterations_over_dataset(self.epochs)
            .with_num_classes(self.num_classes)
            .with_loss_function(self.loss.clone())
            .with_pretrained_weights(self.pretrained_weights.clone())
            .with_image_size(self.image_size.clone())
            .with_seed(self.seed)
            .with_learning_rate(self.lr)
            .with_base_filters(self.base_filters)
            .with_augmentation((&self.augmentation).into()))
    }
}
