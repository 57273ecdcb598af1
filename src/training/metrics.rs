use burn::prelude::*;

use crate::config::Algorithm;

/// Threshold turning probabilities into binary masks.
pub const MASK_THRESHOLD: f64 = 0.5;

/// Task metric reported next to the validation loss.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    Accuracy,
    IoU,
    MeanAbsoluteError,
}

impl MetricKind {
    pub fn for_algorithm(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Classification => MetricKind::Accuracy,
            Algorithm::SemanticSegmentation => MetricKind::IoU,
            Algorithm::Regression => MetricKind::MeanAbsoluteError,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::Accuracy => "accuracy",
            MetricKind::IoU => "iou",
            MetricKind::MeanAbsoluteError => "mae",
        }
    }

    /// Metric of one batch of `[batch, outputs]` probabilities and targets.
    pub fn batch_value<B: Backend>(&self, probs: Tensor<B, 2>, targets: Tensor<B, 2>) -> f64 {
        match self {
            MetricKind::Accuracy => {
                let [batch_size, _] = probs.dims();
                let predictions = probs.argmax(1).reshape([batch_size]);
                let labels = targets.argmax(1).reshape([batch_size]);
                let correct = predictions
                    .equal(labels)
                    .int()
                    .sum()
                    .into_scalar()
                    .elem::<f64>();

                correct / batch_size as f64
            }
            MetricKind::IoU => {
                let pred_mask = probs.greater_elem(MASK_THRESHOLD).float();
                let target_mask = targets.greater_elem(MASK_THRESHOLD).float();

                let intersection = (target_mask.clone() * pred_mask.clone())
                    .sum()
                    .into_scalar()
                    .elem::<f64>();
                let union = (target_mask.clone() + pred_mask.clone()
                    - (target_mask * pred_mask))
                    .sum()
                    .into_scalar()
                    .elem::<f64>();

                if union > 0.0 { intersection / union } else { 1.0 }
            }
            MetricKind::MeanAbsoluteError => {
                (probs - targets).abs().mean().into_scalar().elem::<f64>()
            }
        }
    }
}

/// Running mean weighted by batch size.
#[derive(Clone, Debug, Default)]
pub struct MeanAccumulator {
    sum: f64,
    count: usize,
}

impl MeanAccumulator {
    pub fn update(&mut self, value: f64, batch_size: usize) {
        self.sum += value * batch_size as f64;
        self.count += batch_size;
    }

    pub fn value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
