pub mod config;
pub mod dataset;
pub mod error;
pub mod inference;
pub mod model;
pub mod pipeline;
pub mod training;

pub use config::{Algorithm, AugmentationConfig, RunConfig};
pub use dataset::{DatasetDescriptor, DatasetLayout, DatasetProber, SplitPlanner};
pub use error::{PipelineError, Result};
pub use model::{Classifier, SegmentationNet, UNet, UNetConfig};
pub use pipeline::{Pipeline, RunReport, Task, run_experiment};
pub use training::{LossKind, MetricKind};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
