use std::fmt;
use std::str::FromStr;

use burn::prelude::*;

use crate::error::PipelineError;

/// Clamp applied to probabilities before taking logarithms.
const LOG_EPSILON: f32 = 1e-7;
/// Smoothing of the Jaccard ratio, keeps empty masks finite.
const JACCARD_SMOOTH: f32 = 1e-5;

/// Losses selectable through `loss_function`.
///
/// All of them compare probabilities against targets of the same flattened
/// shape `[batch, outputs]`, one-hot for classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossKind {
    MeanSquaredError,
    MeanAbsoluteError,
    BinaryCrossEntropy,
    CategoricalCrossEntropy,
    Jaccard,
}

impl LossKind {
    pub fn name(&self) -> &'static str {
        match self {
            LossKind::MeanSquaredError => "mse",
            LossKind::MeanAbsoluteError => "mae",
            LossKind::BinaryCrossEntropy => "binary_crossentropy",
            LossKind::CategoricalCrossEntropy => "categorical_crossentropy",
            LossKind::Jaccard => "jaccard",
        }
    }

    pub fn forward<B: Backend>(&self, probs: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
        match self {
            LossKind::MeanSquaredError => (probs - targets).powf_scalar(2.0).mean(),
            LossKind::MeanAbsoluteError => (probs - targets).abs().mean(),
            LossKind::BinaryCrossEntropy => {
                let probs = probs.clamp(LOG_EPSILON, 1.0 - LOG_EPSILON);
                let positive = targets.clone() * probs.clone().log();
                let negative = targets.neg().add_scalar(1.0) * probs.neg().add_scalar(1.0).log();

                (positive + negative).mean().neg()
            }
            LossKind::CategoricalCrossEntropy => {
                let log_probs = probs.clamp(LOG_EPSILON, 1.0).log();

                (targets * log_probs).sum_dim(1).mean().neg()
            }
            LossKind::Jaccard => {
                let device = probs.device();
                let intersection = (probs.clone() * targets.clone()).sum();
                let union = probs.sum() + targets.sum() - intersection.clone();
                let iou = (intersection + JACCARD_SMOOTH) / (union + JACCARD_SMOOTH);

                Tensor::<B, 1>::ones([1], &device) - iou
            }
        }
    }
}

impl FromStr for LossKind {
    type Err = PipelineError;

    fn from_str(identifier: &str) -> Result<Self, Self::Err> {
        match identifier.trim().to_ascii_lowercase().as_str() {
            "mse" | "mean_squared_error" => Ok(LossKind::MeanSquaredError),
            "mae" | "mean_absolute_error" => Ok(LossKind::MeanAbsoluteError),
            "binary_crossentropy" => Ok(LossKind::BinaryCrossEntropy),
            "categorical_crossentropy" => Ok(LossKind::CategoricalCrossEntropy),
            "jaccard" | "iou" => Ok(LossKind::Jaccard),
            other => Err(PipelineError::configuration(format!(
                "Unknown loss function `{other}`"
            ))),
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    type TestBackend = NdArray;

    fn tensor(values: Vec<f32>, shape: [usize; 2]) -> Tensor<TestBackend, 2> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    fn value(loss: Tensor<TestBackend, 1>) -> f32 {
        loss.into_scalar()
    }

    #[test]
    fn parses_aliases() {
        assert_eq!("mean_squared_error".parse::<LossKind>().unwrap(), LossKind::MeanSquaredError);
        assert_eq!("MAE".parse::<LossKind>().unwrap(), LossKind::MeanAbsoluteError);
        assert_eq!("iou".parse::<LossKind>().unwrap(), LossKind::Jaccard);
        assert!("hinge".parse::<LossKind>().is_err());
    }

    #[test]
    fn regression_losses() {
        let probs = tensor(vec![0.0, 1.0, 0.5, 0.5], [1, 4]);
        let targets = tensor(vec![1.0, 1.0, 0.0, 0.5], [1, 4]);

        let mse = value(LossKind::MeanSquaredError.forward(probs.clone(), targets.clone()));
        let mae = value(LossKind::MeanAbsoluteError.forward(probs, targets));

        assert!((mse - 1.25 / 4.0).abs() < 1e-6);
        assert!((mae - 1.5 / 4.0).abs() < 1e-6);
    }

    #[test]
    fn perfect_predictions_have_near_zero_loss() {
        let targets = tensor(vec![0.0, 1.0, 1.0, 0.0], [2, 2]);

        for kind in [
            LossKind::BinaryCrossEntropy,
            LossKind::CategoricalCrossEntropy,
            LossKind::Jaccard,
        ] {
            let loss = value(kind.forward(targets.clone(), targets.clone()));
            assert!(loss.abs() < 1e-4, "{kind} gave {loss}");
        }
    }

    #[test]
    fn categorical_crossentropy_of_uniform_prediction() {
        let probs = tensor(vec![0.25; 4], [1, 4]);
        let targets = tensor(vec![0.0, 0.0, 1.0, 0.0], [1, 4]);

        let loss = value(LossKind::CategoricalCrossEntropy.forward(probs, targets));
        assert!((loss - 4f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn jaccard_of_disjoint_masks_is_one() {
        let probs = tensor(vec![1.0, 0.0], [1, 2]);
        let targets = tensor(vec![0.0, 1.0], [1, 2]);

        let loss = value(LossKind::Jaccard.forward(probs, targets));
        assert!((loss - 1.0).abs() < 1e-4);
    }
}
