//! Per-epoch policies of the fit loop.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use burn::prelude::*;

use crate::dataset::layout::create_dir;
use crate::error::{PipelineError, Result};
use crate::model::save_weights;

pub const EARLY_STOPPING_PATIENCE: usize = 5;
pub const VALIDATION_LOSS: &str = "val_loss";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorMode {
    /// Minimize monitors whose name contains `loss`, maximize the others.
    Auto,
    Min,
    Max,
}

impl MonitorMode {
    fn resolve(self, monitor: &str) -> MonitorMode {
        match self {
            MonitorMode::Auto if monitor.contains("loss") => MonitorMode::Min,
            MonitorMode::Auto => MonitorMode::Max,
            mode => mode,
        }
    }
}

/// Stops training once the monitored value failed to improve for `patience` epochs.
#[derive(Clone, Debug)]
pub struct EarlyStopping {
    monitor: String,
    mode: MonitorMode,
    patience: usize,
    min_delta: f64,
    best: Option<f64>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(monitor: impl Into<String>, patience: usize, mode: MonitorMode) -> Self {
        let monitor = monitor.into();
        let mode = mode.resolve(&monitor);

        Self {
            monitor,
            mode,
            patience,
            min_delta: 0.0,
            best: None,
            wait: 0,
        }
    }

    pub fn on_validation_loss() -> Self {
        Self::new(VALIDATION_LOSS, EARLY_STOPPING_PATIENCE, MonitorMode::Auto)
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }

    pub fn mode(&self) -> MonitorMode {
        self.mode
    }

    /// Record one epoch. Returns `true` when training should stop.
    pub fn update(&mut self, value: f64) -> bool {
        let improved = match (self.best, self.mode) {
            (None, _) => true,
            (Some(best), MonitorMode::Max) => value > best + self.min_delta,
            (Some(best), _) => value < best - self.min_delta,
        };

        if improved {
            self.best = Some(value);
            self.wait = 0;
            return false;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            tracing::info!(
                "Early stopping: {} did not improve for {} epochs",
                self.monitor,
                self.wait
            );
            return true;
        }

        false
    }
}

/// Writes the model to a fixed path whenever the validation loss beats every earlier epoch.
#[derive(Clone, Debug)]
pub struct BestCheckpoint {
    path: PathBuf,
    best: Option<f64>,
}

impl BestCheckpoint {
    pub fn new(path: PathBuf) -> Self {
        Self { path, best: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Strict best-so-far tracking: ties and NaN never count as improvements.
    pub fn observe(&mut self, val_loss: f64) -> bool {
        let improved = match self.best {
            None => !val_loss.is_nan(),
            Some(best) => val_loss < best,
        };
        if improved {
            self.best = Some(val_loss);
        }
        improved
    }

    pub fn update<B: Backend, M: Module<B>>(&mut self, val_loss: f64, model: &M) -> Result<bool> {
        let previous = self.best;
        if !self.observe(val_loss) {
            return Ok(false);
        }

        save_weights::<B, M>(model, &self.path)?;
        match previous {
            Some(previous) => tracing::info!(
                "{} improved from {:.5} to {:.5}, saving model to {:?}",
                VALIDATION_LOSS,
                previous,
                val_loss,
                self.path
            ),
            None => tracing::info!(
                "{} is {:.5}, saving model to {:?}",
                VALIDATION_LOSS,
                val_loss,
                self.path
            ),
        }

        Ok(true)
    }
}

/// Scalar log under `<logs>/<unix millis>/progress.csv`, suffixed `-<n>` when that directory exists.
pub struct ProgressLog {
    dir: PathBuf,
    writer: BufWriter<File>,
}

impl ProgressLog {
    pub const FILE_NAME: &'static str = "progress.csv";

    pub fn create(logs_dir: &Path) -> Result<Self> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let dir = unused_dir(logs_dir, &timestamp.to_string());
        create_dir(&dir)?;

        let path = dir.join(Self::FILE_NAME);
        let file = File::create(&path).map_err(|e| PipelineError::io(&path, e))?;
        let mut log = Self {
            dir,
            writer: BufWriter::new(file),
        };
        log.write_line("epoch,step,split,metric,value")?;

        Ok(log)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record(
        &mut self,
        epoch: usize,
        step: usize,
        split: &str,
        metric: &str,
        value: f64,
    ) -> Result<()> {
        self.write_line(&format!("{epoch},{step},{split},{metric},{value}"))
    }

    pub fn flush(&mut self) -> Result<()> {
        let path = self.dir.join(Self::FILE_NAME);
        self.writer.flush().map_err(|e| PipelineError::io(path, e))
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{line}")
            .map_err(|e| PipelineError::io(self.dir.join(Self::FILE_NAME), e))
    }
}

fn unused_dir(parent: &Path, name: &str) -> PathBuf {
    let mut dir = parent.join(name);
    let mut suffix = 1;
    while dir.exists() {
        dir = parent.join(format!("{name}-{suffix}"));
        suffix += 1;
    }
    dir
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;
    use crate::model::{Classifier, Dimensionality, NetworkSpec};

    #[test]
    fn auto_mode_follows_monitor_name() {
        assert_eq!(
            EarlyStopping::new("val_loss", 5, MonitorMode::Auto).mode(),
            MonitorMode::Min
        );
        assert_eq!(
            EarlyStopping::new("val_accuracy", 5, MonitorMode::Auto).mode(),
            MonitorMode::Max
        );
    }

    #[test]
    fn stops_after_patience_epochs_without_improvement() {
        let mut stopping = EarlyStopping::on_validation_loss();
        assert!(!stopping.update(1.0));
        assert!(!stopping.update(0.9));

        let stops: Vec<bool> = (0..5).map(|_| stopping.update(0.95)).collect();
        assert_eq!(stops, vec![false, false, false, false, true]);
    }

    #[test]
    fn improvement_resets_patience() {
        let mut stopping = EarlyStopping::new("val_loss", 2, MonitorMode::Auto);
        stopping.update(1.0);
        assert!(!stopping.update(1.0));
        assert!(!stopping.update(0.5));
        assert!(!stopping.update(0.6));
        assert!(stopping.update(0.7));
    }

    #[test]
    fn best_loss_sequence_is_strictly_decreasing() {
        let mut checkpoint = BestCheckpoint::new(PathBuf::from("unused.bin"));
        let losses = [0.9, 0.8, 0.8, 1.2, f64::NAN, 0.5, 0.50, 0.7];
        let saved: Vec<bool> = losses.iter().map(|&l| checkpoint.observe(l)).collect();

        assert_eq!(
            saved,
            vec![true, true, false, false, false, true, false, false]
        );
        assert_eq!(checkpoint.best(), Some(0.5));
    }

    #[test]
    fn checkpoint_written_only_on_improvement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/best.bin");
        let spec = NetworkSpec::new(Dimensionality::Two, 1, 2, 2, false);
        let model = Classifier::<NdArray>::build(&spec, &Default::default());
        let mut checkpoint = BestCheckpoint::new(path.clone());

        assert!(checkpoint.update::<NdArray, _>(1.0, &model).unwrap());
        assert!(path.is_file());

        std::fs::remove_file(&path).unwrap();
        assert!(!checkpoint.update::<NdArray, _>(1.5, &model).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn progress_log_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ProgressLog::create(dir.path()).unwrap();
        log.record(1, 3, "train", "loss", 0.25).unwrap();
        log.flush().unwrap();

        let content = std::fs::read_to_string(log.dir().join(ProgressLog::FILE_NAME)).unwrap();
        assert_eq!(content, "epoch,step,split,metric,value\n1,3,train,loss,0.25\n");
    }

    #[test]
    fn progress_logs_of_back_to_back_runs_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let first = ProgressLog::create(dir.path()).unwrap();
        let second = ProgressLog::create(dir.path()).unwrap();

        assert_ne!(first.dir(), second.dir());
        assert!(first.dir().join(ProgressLog::FILE_NAME).is_file());
        assert!(second.dir().join(ProgressLog::FILE_NAME).is_file());
    }

    #[test]
    fn taken_directory_names_get_a_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("1700000000000")).unwrap();
        std::fs::create_dir(dir.path().join("1700000000000-1")).unwrap();

        assert_eq!(
            unused_dir(dir.path(), "1700000000000"),
            dir.path().join("1700000000000-2")
        );
    }
}
