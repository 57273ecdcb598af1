//! The six-stage experiment run shared by every task family.

pub mod classification;
pub mod segmentation;
pub mod task;

use std::path::PathBuf;

use burn::{config::Config, module::AutodiffModule, tensor::backend::AutodiffBackend};

use crate::config::{Algorithm, RunConfig};
use crate::dataset::layout::{DatasetLayout, create_dir};
use crate::dataset::probe::{DatasetDescriptor, DatasetProber};
use crate::dataset::split::SplitPlanner;
use crate::error::{PipelineError, Result};
use crate::inference::evaluation::EvaluationReport;
use crate::inference::evaluator::{TestSet, predict};
use crate::inference::uncertainty::{UncertaintyEstimator, UncertaintySummary};
use crate::model::{LoadReport, NetworkSpec};
use crate::training::{TrainingOutcome, TrainingRunner, TrainingSchedule};

pub use classification::ClassificationTask;
pub use segmentation::DenseTask;
pub use task::{DataFeeds, DataPlan, Task};

pub const RUN_CONFIG_FILE: &str = "run_config.json";

/// Summary of one completed run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub algorithm: Algorithm,
    pub descriptor: DatasetDescriptor,
    pub train_files: usize,
    pub val_files: usize,
    pub steps_per_epoch: usize,
    /// How the pretrained weights matched the network, when any were given.
    pub warm_start: Option<LoadReport>,
    pub training: TrainingOutcome,
    pub predictions: usize,
    pub uncertainty: Option<UncertaintySummary>,
    pub evaluation: Option<EvaluationReport>,
}

/// One experiment: probe, split, feed, build, train, then infer on the test set.
pub struct Pipeline<B: AutodiffBackend, T: Task<B>> {
    config: RunConfig,
    task: T,
    device: B::Device,
}

impl<B: AutodiffBackend, T: Task<B>> Pipeline<B, T> {
    pub fn new(config: RunConfig, task: T, device: B::Device) -> Result<Self> {
        config.validate()?;
        if task.algorithm() != config.algorithm {
            return Err(PipelineError::configuration(format!(
                "Task {} cannot run a {} configuration",
                task.algorithm().name(),
                config.algorithm.name()
            )));
        }

        Ok(Self {
            config,
            task,
            device,
        })
    }

    pub fn run(self) -> Result<RunReport> {
        let Self {
            config,
            task,
            device,
        } = self;
        let layout = DatasetLayout::new(config.path.clone());
        tracing::info!(
            "Starting {} run on {:?}",
            config.algorithm.name(),
            layout.root()
        );

        let logs_dir = layout.logs_dir();
        create_dir(&logs_dir)?;
        let config_path = logs_dir.join(RUN_CONFIG_FILE);
        config
            .save(&config_path)
            .map_err(|e| PipelineError::io(&config_path, e))?;
        B::seed(config.seed);

        // Stage 1: dataset shape.
        let descriptor = DatasetProber::new(&layout).probe(&config)?;

        // Stage 2: split.
        let manifest = SplitPlanner::new(config.seed, config.batch_size).plan(&layout.train_images())?;
        let schedule = TrainingSchedule::new(
            &manifest,
            config.batch_size,
            config.iterations_over_dataset,
            config.learning_rate,
        )?;

        let output_channels = task.output_channels(&layout, &config)?;
        let plan = DataPlan {
            config,
            layout,
            descriptor,
            manifest,
            output_channels,
        };

        // Stage 3: data feeds.
        let feeds = task.data_generator(&plan)?;

        // Stage 4: network.
        let spatial = plan.descriptor.spatial().to_vec();
        let spec = NetworkSpec::new(
            plan.descriptor.dimensions,
            plan.descriptor.network_channels(),
            plan.output_channels,
            plan.config.base_filters,
            false,
        );
        let pretrained = plan.config.pretrained_weights.clone();
        let (model, warm_start) = task.load_model(&spec, &spatial, pretrained.as_deref(), &device)?;
        if let Some(report) = &warm_start {
            tracing::info!(
                "Warm start loaded {} parameters, skipped {}, {} had no stored value",
                report.loaded,
                report.skipped.len(),
                report.missing
            );
        }

        // Stage 5: training.
        let runner = TrainingRunner::new(
            schedule,
            plan.config.loss()?,
            task.metric(),
            plan.layout.checkpoint_path(),
            plan.layout.logs_dir(),
        );
        let artifact = runner.fit::<B, _>(model, &feeds.train, &feeds.validation, &device)?;
        let training = artifact.outcome;

        // Stage 6: inference on the test set.
        let test = TestSet::discover(&plan.layout, &plan.descriptor)?;
        let predictions = predict(&artifact.model.valid(), &test, &device)?;
        let prediction_count = predictions.len();
        task.save_predictions(&predictions, &plan, &test)?;
        drop(artifact.model);

        let uncertainty = if plan.config.calculate_uncertainty {
            let spec = NetworkSpec {
                stochastic: true,
                ..spec
            };
            let model = match uncertainty_weights(&training, pretrained) {
                WeightsSource::Checkpoint(path) => {
                    tracing::info!("Restoring the best checkpoint {:?}", path);
                    task.restore_model(&spec, &spatial, &path, &device)?
                }
                WeightsSource::WarmStart(path) => {
                    task.load_model(&spec, &spatial, Some(&path), &device)?.0
                }
                WeightsSource::Random => task.load_model(&spec, &spatial, None, &device)?.0,
            };
            let summary = UncertaintyEstimator::default().estimate(
                &task.uncertainty_strategy(&plan, &predictions),
                &model,
                &test,
                &plan.layout,
                &device,
            )?;
            Some(summary)
        } else {
            None
        };

        let evaluation = if plan.config.evaluation {
            let report = task.evaluate(&plan)?;
            report.save(&plan.layout)?;
            Some(report)
        } else {
            None
        };

        tracing::info!("Run on {:?} finished", plan.layout.root());

        Ok(RunReport {
            algorithm: plan.config.algorithm,
            train_files: plan.manifest.train_files.len(),
            val_files: plan.manifest.val_files.len(),
            steps_per_epoch: plan.manifest.steps_per_epoch,
            descriptor: plan.descriptor,
            warm_start,
            training,
            predictions: prediction_count,
            uncertainty,
            evaluation,
        })
    }
}

/// Weights the stochastic network starts from.
#[derive(Clone, Debug, PartialEq)]
enum WeightsSource {
    /// Best checkpoint of this run, same architecture.
    Checkpoint(PathBuf),
    /// User weights, loaded skipping mismatched parameters.
    WarmStart(PathBuf),
    Random,
}

/// Best checkpoint when training wrote one, the warm-start weights otherwise.
fn uncertainty_weights(training: &TrainingOutcome, pretrained: Option<PathBuf>) -> WeightsSource {
    match (&training.checkpoint, pretrained) {
        (Some(checkpoint), _) if training.epochs_run > 0 => {
            WeightsSource::Checkpoint(checkpoint.clone())
        }
        (_, Some(path)) => WeightsSource::WarmStart(path),
        (_, None) => WeightsSource::Random,
    }
}

/// Run `config` with the task its algorithm selects.
pub fn run_experiment<B: AutodiffBackend>(config: RunConfig, device: B::Device) -> Result<RunReport> {
    match config.algorithm {
        Algorithm::Classification => {
            let task = ClassificationTask::<B>::from_config(&config)?;
            Pipeline::new(config, task, device)?.run()
        }
        Algorithm::SemanticSegmentation => {
            Pipeline::new(config, DenseTask::<B>::semantic_segmentation(), device)?.run()
        }
        Algorithm::Regression => Pipeline::new(config, DenseTask::<B>::regression(), device)?.run(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncertainty_prefers_written_checkpoint() {
        let pretrained = Some(PathBuf::from("warm.bin"));
        let trained = TrainingOutcome {
            epochs_run: 3,
            best_val_loss: Some(0.1),
            early_stopped: false,
            checkpoint: Some(PathBuf::from("best.bin")),
        };

        assert_eq!(
            uncertainty_weights(&trained, pretrained.clone()),
            WeightsSource::Checkpoint(PathBuf::from("best.bin"))
        );
        assert_eq!(
            uncertainty_weights(&TrainingOutcome::default(), pretrained),
            WeightsSource::WarmStart(PathBuf::from("warm.bin"))
        );
        assert_eq!(
            uncertainty_weights(&TrainingOutcome::default(), None),
            WeightsSource::Random
        );
    }
}
