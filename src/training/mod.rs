pub mod callbacks;
pub mod loss;
pub mod metrics;
pub mod runner;

pub use callbacks::{BestCheckpoint, EarlyStopping, MonitorMode, ProgressLog};
pub use loss::LossKind;
pub use metrics::{MeanAccumulator, MetricKind};
pub use runner::{TrainedArtifact, TrainingOutcome, TrainingRunner, TrainingSchedule};
