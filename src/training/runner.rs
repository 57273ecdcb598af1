use std::path::PathBuf;

use burn::{
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::dataset::generator::{BatchFeed, PREFETCH_CAPACITY};
use crate::dataset::split::{SplitManifest, steps_for};
use crate::error::{PipelineError, Result};
use crate::model::TaskModel;
use crate::training::callbacks::{BestCheckpoint, EarlyStopping, ProgressLog, VALIDATION_LOSS};
use crate::training::loss::LossKind;
use crate::training::metrics::{MeanAccumulator, MetricKind};

/// Epoch and step counts of one fit, fixed before training starts.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingSchedule {
    pub epochs: usize,
    pub steps_per_epoch: usize,
    pub validation_steps: usize,
    pub learning_rate: f64,
}

impl TrainingSchedule {
    pub fn new(
        manifest: &SplitManifest,
        batch_size: usize,
        epochs: usize,
        learning_rate: f64,
    ) -> Result<Self> {
        if manifest.steps_per_epoch == 0 {
            return Err(PipelineError::configuration(format!(
                "{} training files are not enough for one batch of {batch_size}",
                manifest.train_files.len()
            )));
        }

        let validation_steps = steps_for(manifest.val_files.len(), batch_size);
        if validation_steps == 0 && epochs > 0 {
            return Err(PipelineError::configuration(format!(
                "{} validation files are not enough for one batch of {batch_size}",
                manifest.val_files.len()
            )));
        }

        Ok(Self {
            epochs,
            steps_per_epoch: manifest.steps_per_epoch,
            validation_steps,
            learning_rate,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingOutcome {
    pub epochs_run: usize,
    pub best_val_loss: Option<f64>,
    pub early_stopped: bool,
    /// Best-validation-loss snapshot, `None` when nothing was written.
    pub checkpoint: Option<PathBuf>,
}

/// The trained model and where its best snapshot lives.
pub struct TrainedArtifact<M> {
    pub model: M,
    pub outcome: TrainingOutcome,
}

/// Drives the fit loop: Adam steps over the prefetched training feed, then a
/// validation pass per epoch feeding checkpointing, early stopping and the progress log.
pub struct TrainingRunner {
    schedule: TrainingSchedule,
    loss: LossKind,
    metric: MetricKind,
    checkpoint_path: PathBuf,
    logs_dir: PathBuf,
}

impl TrainingRunner {
    pub fn new(
        schedule: TrainingSchedule,
        loss: LossKind,
        metric: MetricKind,
        checkpoint_path: PathBuf,
        logs_dir: PathBuf,
    ) -> Self {
        Self {
            schedule,
            loss,
            metric,
            checkpoint_path,
            logs_dir,
        }
    }

    pub fn schedule(&self) -> &TrainingSchedule {
        &self.schedule
    }

    pub fn fit<B, M>(
        &self,
        mut model: M,
        train: &BatchFeed,
        validation: &BatchFeed,
        device: &B::Device,
    ) -> Result<TrainedArtifact<M>>
    where
        B: AutodiffBackend,
        M: TaskModel<B> + AutodiffModule<B>,
        M::InnerModule: TaskModel<B::InnerBackend>,
    {
        let schedule = &self.schedule;
        if schedule.epochs == 0 {
            tracing::info!("Zero epochs requested, skipping training");
            return Ok(TrainedArtifact {
                model,
                outcome: TrainingOutcome::default(),
            });
        }

        tracing::info!(
            "Training for {} epochs, {} steps per epoch, {} validation steps, loss {}",
            schedule.epochs,
            schedule.steps_per_epoch,
            schedule.validation_steps,
            self.loss
        );

        let mut optim = AdamConfig::new().init();
        let mut checkpoint = BestCheckpoint::new(self.checkpoint_path.clone());
        let mut early_stopping = EarlyStopping::on_validation_loss();
        let mut progress = ProgressLog::create(&self.logs_dir)?;
        let prefetcher = train.prefetch(PREFETCH_CAPACITY)?;

        let mut outcome = TrainingOutcome::default();
        let mut train_loss = MeanAccumulator::default();
        let mut val_loss = MeanAccumulator::default();
        let mut val_metric = MeanAccumulator::default();

        for epoch in 1..=schedule.epochs {
            train_loss.clear();
            for step in 1..=schedule.steps_per_epoch {
                let batch = prefetcher.next_batch()?.to_batch::<B>(device);
                let batch_size = batch.inputs.dims()[0];

                let probs = model.forward_probs(batch.inputs);
                let loss = self.loss.forward(probs, batch.targets);
                let loss_value = loss.clone().into_scalar().elem::<f64>();

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optim.step(schedule.learning_rate, model, grads);

                train_loss.update(loss_value, batch_size);
                progress.record(epoch, step, "train", "loss", loss_value)?;
                tracing::debug!("Epoch {} step {}: loss {:.5}", epoch, step, loss_value);
            }

            let model_valid = model.valid();
            val_loss.clear();
            val_metric.clear();
            for batch in validation.iter().take(schedule.validation_steps) {
                let batch = batch?.to_batch::<B::InnerBackend>(device);
                let batch_size = batch.inputs.dims()[0];

                let probs = model_valid.forward_probs(batch.inputs);
                let loss = self.loss.forward(probs.clone(), batch.targets.clone());

                val_loss.update(loss.into_scalar().elem::<f64>(), batch_size);
                val_metric.update(self.metric.batch_value(probs, batch.targets), batch_size);
            }

            let metric_name = format!("val_{}", self.metric.name());
            progress.record(epoch, schedule.steps_per_epoch, "valid", VALIDATION_LOSS, val_loss.value())?;
            progress.record(epoch, schedule.steps_per_epoch, "valid", &metric_name, val_metric.value())?;
            progress.flush()?;

            tracing::info!(
                "Epoch {}/{}: loss {:.5}, {} {:.5}, {} {:.5}",
                epoch,
                schedule.epochs,
                train_loss.value(),
                VALIDATION_LOSS,
                val_loss.value(),
                metric_name,
                val_metric.value()
            );

            outcome.epochs_run = epoch;
            if checkpoint.update::<B::InnerBackend, _>(val_loss.value(), &model_valid)? {
                outcome.checkpoint = Some(self.checkpoint_path.clone());
            }

            if early_stopping.update(val_loss.value()) {
                outcome.early_stopped = true;
                break;
            }
        }

        outcome.best_val_loss = checkpoint.best();

        Ok(TrainedArtifact { model, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(train: usize, val: usize, batch: usize) -> SplitManifest {
        SplitManifest {
            train_files: (0..train).map(|i| format!("{i}.png")).collect(),
            val_files: (0..val).map(|i| format!("v{i}.png")).collect(),
            steps_per_epoch: steps_for(train, batch),
        }
    }

    #[test]
    fn empty_training_split_is_configuration_error() {
        let err = TrainingSchedule::new(&manifest(0, 0, 2), 2, 0, 1e-3).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn missing_validation_batches_only_matter_when_training() {
        let err = TrainingSchedule::new(&manifest(8, 1, 2), 2, 3, 1e-3).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));

        let schedule = TrainingSchedule::new(&manifest(8, 1, 2), 2, 0, 1e-3).unwrap();
        assert_eq!(schedule.steps_per_epoch, 4);
        assert_eq!(schedule.validation_steps, 0);
    }

    #[test]
    fn counts_follow_split() {
        let schedule = TrainingSchedule::new(&manifest(80, 20, 4), 4, 10, 1e-3).unwrap();
        assert_eq!(schedule.steps_per_epoch, 20);
        assert_eq!(schedule.validation_steps, 5);
    }
}
