use std::path::Path;

use burn::{module::AutodiffModule, tensor::backend::AutodiffBackend};

use crate::config::{Algorithm, AugmentationConfig, RunConfig};
use crate::dataset::augment::Augmenter;
use crate::dataset::generator::BatchFeed;
use crate::dataset::layout::DatasetLayout;
use crate::dataset::probe::{DatasetDescriptor, grid_shape};
use crate::dataset::split::SplitManifest;
use crate::error::Result;
use crate::inference::evaluation::EvaluationReport;
use crate::inference::evaluator::{PredictionBatch, TestSet};
use crate::inference::uncertainty::UncertaintyStrategy;
use crate::model::{LoadReport, NetworkSpec, TaskModel, load_checkpoint, load_matching};
use crate::training::metrics::MetricKind;

/// Everything the first two stages established, threaded through the rest of the run.
#[derive(Clone, Debug)]
pub struct DataPlan {
    pub config: RunConfig,
    pub layout: DatasetLayout,
    pub descriptor: DatasetDescriptor,
    pub manifest: SplitManifest,
    /// Label channel depth for dense tasks, class count for classification.
    pub output_channels: usize,
}

impl DataPlan {
    /// Augmentations of the training feed.
    pub fn train_augmenter(&self, binarize_mask: bool) -> Augmenter {
        let mut augmentation = self.config.augmentation.clone();
        augmentation.binarize_mask |= binarize_mask;
        Augmenter::new(augmentation)
    }

    /// Validation batches are only binarized, never perturbed.
    pub fn validation_augmenter(&self, binarize_mask: bool) -> Augmenter {
        let binarize = self.config.augmentation.binarize_mask || binarize_mask;
        Augmenter::new(AugmentationConfig::new().with_binarize_mask(binarize))
    }

    pub fn validation_seed(&self) -> u64 {
        self.config.seed.wrapping_add(1)
    }

    /// Channel-first shape of one network output for dense tasks.
    pub fn output_grid(&self) -> [usize; 4] {
        grid_shape(self.output_channels, self.descriptor.spatial())
    }
}

/// Paired training and validation feeds.
#[derive(Clone)]
pub struct DataFeeds {
    pub train: BatchFeed,
    pub validation: BatchFeed,
}

/// What differs between task families. The pipeline itself is shared.
pub trait Task<B: AutodiffBackend> {
    type Model: TaskModel<B> + AutodiffModule<B, InnerModule: TaskModel<B::InnerBackend>>;

    fn algorithm(&self) -> Algorithm;

    /// Label channels (dense) or class count (classification).
    fn output_channels(&self, layout: &DatasetLayout, config: &RunConfig) -> Result<usize>;

    fn data_generator(&self, plan: &DataPlan) -> Result<DataFeeds>;

    fn build_network(
        &self,
        spec: &NetworkSpec,
        spatial: &[usize],
        device: &B::Device,
    ) -> Result<Self::Model>;

    /// Build the network and warm-start it from `weights`, skipping mismatched parameters.
    /// The report is `None` for a randomly initialized network.
    fn load_model(
        &self,
        spec: &NetworkSpec,
        spatial: &[usize],
        weights: Option<&Path>,
        device: &B::Device,
    ) -> Result<(Self::Model, Option<LoadReport>)> {
        let model = self.build_network(spec, spatial, device)?;
        tracing::info!("Model: {}", model.describe());

        match weights {
            Some(path) => {
                tracing::info!("Loading weights from {:?}", path);
                let (model, report) = load_matching::<B, _>(model, path, device)?;
                Ok((model, Some(report)))
            }
            None => {
                tracing::info!("Initializing network with random weights");
                Ok((model, None))
            }
        }
    }

    /// Rebuild the network from a checkpoint this run wrote.
    fn restore_model(
        &self,
        spec: &NetworkSpec,
        spatial: &[usize],
        checkpoint: &Path,
        device: &B::Device,
    ) -> Result<Self::Model> {
        let model = self.build_network(spec, spatial, device)?;
        load_checkpoint::<B, _>(model, checkpoint, device)
    }

    /// `predictions` are the deterministic test-set outputs of the same run.
    fn uncertainty_strategy(&self, plan: &DataPlan, predictions: &PredictionBatch) -> UncertaintyStrategy;

    fn save_predictions(&self, predictions: &PredictionBatch, plan: &DataPlan, test: &TestSet) -> Result<()>;

    fn evaluate(&self, plan: &DataPlan) -> Result<EvaluationReport>;

    fn metric(&self) -> MetricKind {
        MetricKind::for_algorithm(self.algorithm())
    }
}
