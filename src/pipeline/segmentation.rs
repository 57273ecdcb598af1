use std::marker::PhantomData;
use std::sync::Arc;

use burn::tensor::backend::AutodiffBackend;

use crate::config::{Algorithm, RunConfig};
use crate::dataset::generator::BatchFeed;
use crate::dataset::layout::DatasetLayout;
use crate::dataset::segmentation::{DenseLoader, probe_label_channels};
use crate::error::Result;
use crate::inference::evaluation::{EvaluationReport, dense_evaluation};
use crate::inference::evaluator::{PredictionBatch, TestSet, save_dense_predictions};
use crate::inference::uncertainty::UncertaintyStrategy;
use crate::model::{NetworkSpec, SegmentationNet};
use crate::pipeline::task::{DataFeeds, DataPlan, Task};

/// Per-voxel prediction: semantic segmentation or image-to-image regression.
#[derive(Clone, Debug)]
pub struct DenseTask<B> {
    algorithm: Algorithm,
    _b: PhantomData<B>,
}

impl<B> DenseTask<B> {
    /// Ground truth is thresholded into binary masks.
    pub fn semantic_segmentation() -> Self {
        Self {
            algorithm: Algorithm::SemanticSegmentation,
            _b: PhantomData,
        }
    }

    pub fn regression() -> Self {
        Self {
            algorithm: Algorithm::Regression,
            _b: PhantomData,
        }
    }

    pub fn binarize_mask(&self) -> bool {
        self.algorithm == Algorithm::SemanticSegmentation
    }
}

impl<B: AutodiffBackend> Task<B> for DenseTask<B> {
    type Model = SegmentationNet<B>;

    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn output_channels(&self, layout: &DatasetLayout, _config: &RunConfig) -> Result<usize> {
        probe_label_channels(layout)
    }

    fn data_generator(&self, plan: &DataPlan) -> Result<DataFeeds> {
        let loader = Arc::new(DenseLoader::new(
            plan.layout.train_dir(),
            plan.descriptor.modalities.clone(),
            plan.descriptor.spatial().to_vec(),
            plan.descriptor.channels,
            plan.output_channels,
        ));

        let batch_size = plan.config.batch_size;
        Ok(DataFeeds {
            train: BatchFeed::new(
                loader.clone(),
                plan.manifest.train_files.clone(),
                batch_size,
                plan.train_augmenter(self.binarize_mask()),
                plan.config.seed,
            ),
            validation: BatchFeed::new(
                loader,
                plan.manifest.val_files.clone(),
                batch_size,
                plan.validation_augmenter(self.binarize_mask()),
                plan.validation_seed(),
            ),
        })
    }

    fn build_network(
        &self,
        spec: &NetworkSpec,
        spatial: &[usize],
        device: &B::Device,
    ) -> Result<SegmentationNet<B>> {
        SegmentationNet::build(spec, spatial, device)
    }

    fn uncertainty_strategy(&self, plan: &DataPlan, _predictions: &PredictionBatch) -> UncertaintyStrategy {
        UncertaintyStrategy::PixelVariance {
            output_grid: plan.output_grid(),
        }
    }

    fn save_predictions(
        &self,
        predictions: &PredictionBatch,
        plan: &DataPlan,
        test: &TestSet,
    ) -> Result<()> {
        save_dense_predictions(&plan.layout.results_dir(), predictions, plan.output_grid(), test)
    }

    fn evaluate(&self, plan: &DataPlan) -> Result<EvaluationReport> {
        dense_evaluation(&plan.layout, self.binarize_mask())
    }
}
