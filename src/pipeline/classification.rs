use std::marker::PhantomData;
use std::sync::Arc;

use burn::tensor::backend::AutodiffBackend;

use crate::config::{Algorithm, RunConfig};
use crate::dataset::classification::{ClassificationLoader, LabelTable};
use crate::dataset::generator::BatchFeed;
use crate::dataset::layout::DatasetLayout;
use crate::error::{PipelineError, Result};
use crate::inference::evaluation::{EvaluationReport, classification_evaluation};
use crate::inference::evaluator::{CLASS_TABLE, PredictionBatch, TestSet, argmax, save_class_table};
use crate::inference::uncertainty::UncertaintyStrategy;
use crate::model::{Classifier, NetworkSpec};
use crate::pipeline::task::{DataFeeds, DataPlan, Task};

/// Image classification with a residual network and one-hot labels.
#[derive(Clone, Debug)]
pub struct ClassificationTask<B> {
    num_classes: usize,
    _b: PhantomData<B>,
}

impl<B> ClassificationTask<B> {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            _b: PhantomData,
        }
    }

    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let num_classes = config.num_classes.ok_or_else(|| {
            PipelineError::configuration(
                "Number of classes has not been set, num_classes is required for classification",
            )
        })?;
        Ok(Self::new(num_classes))
    }
}

impl<B: AutodiffBackend> Task<B> for ClassificationTask<B> {
    type Model = Classifier<B>;

    fn algorithm(&self) -> Algorithm {
        Algorithm::Classification
    }

    fn output_channels(&self, _layout: &DatasetLayout, _config: &RunConfig) -> Result<usize> {
        Ok(self.num_classes)
    }

    fn data_generator(&self, plan: &DataPlan) -> Result<DataFeeds> {
        let train_dir = plan.layout.train_dir();
        let labels = Arc::new(LabelTable::load(&train_dir, self.num_classes)?);
        tracing::info!("Read {} training labels", labels.len());

        let loader = Arc::new(ClassificationLoader::new(
            train_dir,
            plan.descriptor.modalities.clone(),
            plan.descriptor.spatial().to_vec(),
            plan.descriptor.channels,
            labels,
            self.num_classes,
        ));

        let batch_size = plan.config.batch_size;
        Ok(DataFeeds {
            train: BatchFeed::new(
                loader.clone(),
                plan.manifest.train_files.clone(),
                batch_size,
                plan.train_augmenter(false),
                plan.config.seed,
            ),
            validation: BatchFeed::new(
                loader,
                plan.manifest.val_files.clone(),
                batch_size,
                plan.validation_augmenter(false),
                plan.validation_seed(),
            ),
        })
    }

    fn build_network(
        &self,
        spec: &NetworkSpec,
        _spatial: &[usize],
        device: &B::Device,
    ) -> Result<Classifier<B>> {
        Ok(Classifier::build(spec, device))
    }

    fn uncertainty_strategy(&self, _plan: &DataPlan, predictions: &PredictionBatch) -> UncertaintyStrategy {
        UncertaintyStrategy::ClassEntropy {
            num_classes: self.num_classes,
            predictions: predictions.values.iter().map(|values| argmax(values)).collect(),
        }
    }

    fn save_predictions(
        &self,
        predictions: &PredictionBatch,
        plan: &DataPlan,
        _test: &TestSet,
    ) -> Result<()> {
        save_class_table(&plan.layout.results_dir().join(CLASS_TABLE), predictions)
    }

    fn evaluate(&self, plan: &DataPlan) -> Result<EvaluationReport> {
        classification_evaluation(&plan.layout, self.num_classes)
    }
}
