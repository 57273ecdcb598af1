mod blocks;
mod resnet;
mod unet;
pub mod weights;

use burn::prelude::*;
use derive_new::new;

pub use blocks::{
    DoubleConv2d, DoubleConv3d, DoubleConvConfig, Down2d, Down3d, LevelConfig, Residual2d,
    Residual3d, ResidualConfig, Up2d, Up3d,
};
pub use resnet::{Classifier, Classifier2d, Classifier3d, ClassifierBackbone, ClassifierConfig};
pub use unet::{SegmentationNet, UNet, UNet3d, UNetBackbone, UNetConfig};
pub use weights::{CheckpointRecorder, LoadReport, load_checkpoint, load_matching, save_weights};

/// Dropout rate of the classifier head during ordinary training.
pub const TRAINING_DROPOUT: f64 = 0.1;
/// Dropout rate of the classifier head when rebuilt for Monte-Carlo sampling.
pub const STOCHASTIC_DROPOUT: f64 = 0.5;

/// Spatial dimensionality of the data, and therefore of the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dimensionality {
    Two,
    Three,
}

impl Dimensionality {
    /// 3D networks are used for three or more spatial axes.
    pub fn from_spatial_rank(rank: usize) -> Self {
        if rank >= 3 { Self::Three } else { Self::Two }
    }

    pub fn rank(&self) -> usize {
        match self {
            Self::Two => 2,
            Self::Three => 3,
        }
    }
}

/// Network that maps a `[batch, channels, depth, height, width]` input to
/// per-sample probabilities, flattened to `[batch, outputs]`.
pub trait TaskModel<B: Backend>: Module<B> {
    fn forward_probs(&self, inputs: Tensor<B, 5>) -> Tensor<B, 2>;

    /// One-line topology summary for the log.
    fn describe(&self) -> String;
}

/// Everything a builder needs to size a network.
#[derive(Clone, Debug, new)]
pub struct NetworkSpec {
    pub dimensions: Dimensionality,
    pub input_channels: usize,
    pub output_channels: usize,
    pub base_filters: usize,
    /// Build for Monte-Carlo dropout sampling.
    pub stochastic: bool,
}

impl NetworkSpec {
    pub fn head_dropout(&self) -> f64 {
        if self.stochastic {
            STOCHASTIC_DROPOUT
        } else {
            TRAINING_DROPOUT
        }
    }
}
