//! Checkpoint files.
//!
//! Checkpoints are module records written by burn's binary file recorder.
//! Restoring a checkpoint into the architecture that wrote it is a plain
//! record load. Warm starts from arbitrary weights go through
//! [`load_matching`], which walks the recorded parameters and the target
//! module side by side and keeps the target's initialization wherever the
//! shapes disagree.

use std::path::{Path, PathBuf};

use burn::module::{ModuleMapper, ModuleVisitor, ParamId};
use burn::prelude::*;
use burn::record::{BinFileRecorder, FileRecorder, FullPrecisionSettings, Recorder};

use crate::dataset::layout::create_dir;
use crate::error::{PipelineError, Result};

pub type CheckpointRecorder = BinFileRecorder<FullPrecisionSettings>;

#[derive(Clone, Debug, PartialEq)]
pub struct StoredParam {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// Outcome of a skip-on-mismatch load.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadReport {
    pub loaded: usize,
    /// `(position, expected shape, stored shape)` of every skipped parameter.
    pub skipped: Vec<(usize, Vec<usize>, Vec<usize>)>,
    /// Parameters of the model with no stored counterpart.
    pub missing: usize,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.missing == 0
    }
}

struct Collector {
    params: Vec<StoredParam>,
}

impl<B: Backend> ModuleVisitor<B> for Collector {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.params.push(StoredParam {
            shape: tensor.dims().to_vec(),
            values: tensor.to_data().iter::<f32>().collect(),
        });
    }
}

struct Restorer {
    stored: Vec<StoredParam>,
    position: usize,
    report: LoadReport,
}

impl<B: Backend> ModuleMapper<B> for Restorer {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let position = self.position;
        self.position += 1;

        let expected = tensor.dims().to_vec();
        let Some(stored) = self.stored.get_mut(position) else {
            self.report.missing += 1;
            return tensor;
        };

        if stored.shape != expected {
            self.report
                .skipped
                .push((position, expected, stored.shape.clone()));
            return tensor;
        }

        let values = std::mem::take(&mut stored.values);
        let require_grad = tensor.is_require_grad();
        let restored = Tensor::<B, D>::from_data(
            TensorData::new(values, expected).convert::<B::FloatElem>(),
            &tensor.device(),
        );

        self.report.loaded += 1;
        restored.set_require_grad(require_grad)
    }
}

/// File the recorder actually reads and writes for `path`.
pub fn checkpoint_file<B: Backend>(path: &Path) -> PathBuf {
    path.with_extension(<CheckpointRecorder as FileRecorder<B>>::file_extension())
}

fn existing_checkpoint<B: Backend>(path: &Path) -> Result<PathBuf> {
    let file = checkpoint_file::<B>(path);
    if !file.is_file() {
        return Err(PipelineError::missing(format!(
            "Weights file does not exist: {:?}",
            file
        )));
    }
    Ok(file)
}

/// Float parameters of `model` in traversal order.
pub fn collect_params<B: Backend, M: Module<B>>(model: &M) -> Vec<StoredParam> {
    let mut collector = Collector { params: Vec::new() };
    model.visit(&mut collector);
    collector.params
}

pub fn save_weights<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }

    model
        .clone()
        .save_file(path.to_path_buf(), &CheckpointRecorder::new())
        .map_err(|e| PipelineError::checkpoint(path, e))
}

/// Restore a checkpoint written for this exact architecture.
pub fn load_checkpoint<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> Result<M> {
    let file = existing_checkpoint::<B>(path)?;
    let model = model
        .load_file(file.clone(), &CheckpointRecorder::new(), device)
        .map_err(|e| PipelineError::checkpoint(&file, e))?;
    tracing::info!("Restored checkpoint {:?}", file);

    Ok(model)
}

/// Load `path` into `model`, skipping parameters whose shape disagrees.
pub fn load_matching<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> Result<(M, LoadReport)> {
    let file = existing_checkpoint::<B>(path)?;
    let record: M::Record = Recorder::<B>::load(&CheckpointRecorder::new(), file.clone(), device)
        .map_err(|e| PipelineError::checkpoint(&file, e))?;
    let stored = collect_params::<B, M>(&model.clone().load_record(record));

    let mut restorer = Restorer {
        stored,
        position: 0,
        report: LoadReport::default(),
    };
    let model = model.map(&mut restorer);

    for (position, expected, stored) in &restorer.report.skipped {
        tracing::warn!(
            "Skipping parameter {} from {:?}: model expects {:?}, file holds {:?}",
            position,
            file,
            expected,
            stored
        );
    }
    tracing::info!(
        "Loaded {} parameters from {:?} ({} skipped, {} without stored value)",
        restorer.report.loaded,
        file,
        restorer.report.skipped.len(),
        restorer.report.missing
    );

    Ok((model, restorer.report))
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;
    use crate::model::{Classifier, Dimensionality, NetworkSpec};

    type TestBackend = NdArray;

    fn classifier(num_classes: usize) -> Classifier<TestBackend> {
        let spec = NetworkSpec::new(Dimensionality::Two, 1, num_classes, 2, false);
        Classifier::build(&spec, &Default::default())
    }

    #[test]
    fn identical_architecture_loads_completely() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.bin");
        let source = classifier(3);
        save_weights::<TestBackend, _>(&source, &path).unwrap();

        let (target, report) = load_matching::<TestBackend, _>(classifier(3), &path, &Default::default()).unwrap();

        assert!(report.is_complete());
        assert_eq!(collect_params::<TestBackend, _>(&target), collect_params::<TestBackend, _>(&source));
    }

    #[test]
    fn mismatched_head_keeps_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.bin");
        let source = classifier(3);
        save_weights::<TestBackend, _>(&source, &path).unwrap();

        let fresh = classifier(4);
        let fresh_params = collect_params::<TestBackend, _>(&fresh);
        let (target, report) = load_matching::<TestBackend, _>(fresh, &path, &Default::default()).unwrap();

        let source_params = collect_params::<TestBackend, _>(&source);
        let target_params = collect_params::<TestBackend, _>(&target);
        let head = target_params.len() - 2;

        // Linear weight and bias of the head.
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.loaded, target_params.len() - 2);
        assert_eq!(target_params[..head], source_params[..head]);
        assert_eq!(target_params[head..], fresh_params[head..]);
    }

    #[test]
    fn checkpoint_restores_same_architecture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/best.bin");
        let source = classifier(3);
        save_weights::<TestBackend, _>(&source, &path).unwrap();
        assert!(checkpoint_file::<TestBackend>(&path).is_file());

        let restored =
            load_checkpoint::<TestBackend, _>(classifier(3), &path, &Default::default()).unwrap();

        assert_eq!(
            collect_params::<TestBackend, _>(&restored),
            collect_params::<TestBackend, _>(&source)
        );
    }

    #[test]
    fn missing_file_is_missing_data() {
        let err = load_matching::<TestBackend, _>(
            classifier(2),
            Path::new("/no/such/weights.bin"),
            &Default::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::MissingData(_)));
    }
}
