use std::path::PathBuf;

use burn::prelude::*;

use crate::error::PipelineError;
use crate::training::LossKind;

/// Task family a run belongs to.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Classification,
    SemanticSegmentation,
    Regression,
}

impl Algorithm {
    pub fn default_loss(&self) -> LossKind {
        match self {
            Algorithm::Classification => LossKind::CategoricalCrossEntropy,
            Algorithm::SemanticSegmentation => LossKind::BinaryCrossEntropy,
            Algorithm::Regression => LossKind::MeanSquaredError,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Classification => "Classification",
            Algorithm::SemanticSegmentation => "SemanticSegmentation",
            Algorithm::Regression => "Regression",
        }
    }
}

/// Augmentation switches shared by the training and validation feeds.
#[derive(Config, Debug)]
pub struct AugmentationConfig {
    #[config(default = false)]
    pub horizontal_flip: bool,

    #[config(default = false)]
    pub vertical_flip: bool,

    /// Random multiples of 90 degrees in the height/width plane (square inputs only).
    #[config(default = false)]
    pub rotate_90: bool,

    /// Maximum relative brightness change applied to inputs, `0.0` disables it.
    #[config(default = 0.0)]
    pub brightness_range: f32,

    /// Threshold ground truth at 0.5 after loading.
    #[config(default = false)]
    pub binarize_mask: bool,
}

impl AugmentationConfig {
    pub fn is_identity(&self) -> bool {
        !self.horizontal_flip
            && !self.vertical_flip
            && !self.rotate_90
            && self.brightness_range == 0.0
            && !self.binarize_mask
    }
}

/// Parameters of one experiment run. Built once, never mutated by the pipeline.
#[derive(Config, Debug)]
pub struct RunConfig {
    pub algorithm: Algorithm,

    /// Dataset root holding `train/` and `test/`.
    pub path: PathBuf,

    pub pretrained_weights: Option<PathBuf>,

    #[config(default = 2)]
    pub batch_size: usize,

    #[config(default = 100)]
    pub iterations_over_dataset: usize,

    #[config(default = "AugmentationConfig::new()")]
    pub augmentation: AugmentationConfig,

    /// Loss identifier, the algorithm's default when absent.
    pub loss_function: Option<String>,

    pub num_classes: Option<usize>,

    /// Explicit channel-last training input shape, e.g. `[128, 128, 3]`.
    pub image_size: Option<Vec<usize>>,

    #[config(default = false)]
    pub calculate_uncertainty: bool,

    #[config(default = true)]
    pub evaluation: bool,

    #[config(default = 1)]
    pub seed: u64,

    #[config(default = 1e-3)]
    pub learning_rate: f64,

    #[config(default = 32)]
    pub base_filters: usize,
}

impl RunConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::configuration("batch_size must be at least 1"));
        }

        if self.base_filters == 0 {
            return Err(PipelineError::configuration(
                "base_filters must be at least 1",
            ));
        }

        if let Some(size) = &self.image_size {
            validate_image_size(size)?;
        }

        match (self.algorithm, self.num_classes) {
            (Algorithm::Classification, None) => {
                return Err(PipelineError::configuration(
                    "Number of classes has not been set, num_classes is required for classification",
                ));
            }
            (Algorithm::Classification, Some(n)) if n < 2 => {
                return Err(PipelineError::configuration(format!(
                    "Classification needs at least 2 classes, got {n}"
                )));
            }
            (Algorithm::SemanticSegmentation | Algorithm::Regression, Some(n)) if n != 1 => {
                return Err(PipelineError::configuration(format!(
                    "{} supports num_classes = 1 only, got {n}",
                    self.algorithm.name()
                )));
            }
            _ => {}
        }

        self.loss()?;

        Ok(())
    }

    pub fn loss(&self) -> crate::error::Result<LossKind> {
        match &self.loss_function {
            Some(identifier) => identifier.parse(),
            None => Ok(self.algorithm.default_loss()),
        }
    }

    /// Class count for classification, label depth placeholder of 1 otherwise.
    pub fn classes(&self) -> usize {
        self.num_classes.unwrap_or(1)
    }
}

pub fn validate_image_size(size: &[usize]) -> crate::error::Result<()> {
    if !(3..=4).contains(&size.len()) {
        return Err(PipelineError::configuration(format!(
            "image_size must be channel-last with 2 or 3 spatial dimensions, got {size:?}"
        )));
    }

    if size.iter().any(|&extent| extent == 0) {
        return Err(PipelineError::configuration(format!(
            "image_size must not contain zero extents, got {size:?}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(algorithm: Algorithm) -> RunConfig {
        RunConfig::new(algorithm, PathBuf::from("/data/set"))
    }

    #[test]
    fn classification_requires_num_classes() {
        let err = config(Algorithm::Classification).validate().unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));

        config(Algorithm::Classification)
            .with_num_classes(Some(3))
            .validate()
            .unwrap();
    }

    #[test]
    fn segmentation_rejects_multiple_classes() {
        let err = config(Algorithm::SemanticSegmentation)
            .with_num_classes(Some(4))
            .validate()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn malformed_image_size_is_rejected() {
        for size in [vec![128, 128], vec![0, 128, 1], vec![1, 2, 3, 4, 5]] {
            let err = config(Algorithm::Regression)
                .with_image_size(Some(size))
                .validate()
                .unwrap_err();
            assert!(matches!(err, PipelineError::Configuration(_)));
        }
    }

    #[test]
    fn unknown_loss_is_rejected() {
        let err = config(Algorithm::Regression)
            .with_loss_function(Some("focal".to_string()))
            .validate()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn default_loss_follows_algorithm() {
        assert_eq!(
            config(Algorithm::SemanticSegmentation).loss().unwrap(),
            LossKind::BinaryCrossEntropy
        );
        assert_eq!(
            config(Algorithm::Regression).loss().unwrap(),
            LossKind::MeanSquaredError
        );
    }
}
