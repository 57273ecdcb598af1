//! Monte-Carlo dropout uncertainty.
//!
//! The model is sampled [`MC_PASSES`] times per test file with dropout
//! active. Classification reports the majority vote and the normalized
//! predictive entropy; dense tasks report per-voxel aleatoric
//! (`mean(p(1-p))`) and epistemic (`var(p)`) maps and their sum.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use burn::prelude::*;

use crate::dataset::io::{VoxelGrid, write_prediction};
use crate::dataset::layout::{DatasetLayout, create_dir, file_stem};
use crate::error::{PipelineError, Result};
use crate::inference::evaluator::{TestSet, argmax, probabilities};
use crate::model::TaskModel;

pub const MC_PASSES: usize = 20;
pub const ENTROPY_EPSILON: f64 = 1e-5;
pub const UNCERTAINTY_TABLE: &str = "uncertainty.csv";

/// Class predicted most often across passes; ties go to the lowest class index.
pub fn majority_vote(passes: &[Vec<f32>], num_classes: usize) -> usize {
    let mut votes = vec![0usize; num_classes.max(1)];
    for probs in passes {
        if let Some(count) = votes.get_mut(argmax(probs)) {
            *count += 1;
        }
    }

    votes
        .iter()
        .enumerate()
        .fold((0, 0), |(best, best_votes), (class, &count)| {
            if count > best_votes {
                (class, count)
            } else {
                (best, best_votes)
            }
        })
        .0
}

/// Entropy `-sum p log(p + eps)` averaged over passes and divided by `ln(num_classes)`, within `[0, 1]`.
pub fn predictive_entropy(passes: &[Vec<f32>], num_classes: usize) -> f64 {
    if passes.is_empty() || num_classes < 2 {
        return 0.0;
    }

    let total: f64 = passes
        .iter()
        .map(|probs| {
            probs
                .iter()
                .map(|&p| {
                    let p = p as f64;
                    -p * (p + ENTROPY_EPSILON).ln()
                })
                .sum::<f64>()
        })
        .sum();

    let mean = total / passes.len() as f64;
    (mean / (num_classes as f64).ln()).clamp(0.0, 1.0)
}

/// Per-voxel uncertainty maps of one file.
#[derive(Clone, Debug, PartialEq)]
pub struct DenseUncertainty {
    pub aleatoric: Vec<f32>,
    pub epistemic: Vec<f32>,
}

impl DenseUncertainty {
    pub fn total(&self) -> Vec<f32> {
        self.aleatoric
            .iter()
            .zip(&self.epistemic)
            .map(|(a, e)| a + e)
            .collect()
    }
}

/// Aleatoric and epistemic maps of `passes`, each a flattened probability map.
pub fn dense_uncertainty(passes: &[Vec<f32>]) -> DenseUncertainty {
    let outputs = passes.first().map_or(0, Vec::len);
    let count = passes.len().max(1) as f64;

    let mut aleatoric = Vec::with_capacity(outputs);
    let mut epistemic = Vec::with_capacity(outputs);
    for voxel in 0..outputs {
        let values = passes.iter().map(|pass| pass[voxel] as f64);
        let mean = values.clone().sum::<f64>() / count;
        let variance = values.clone().map(|p| (p - mean).powi(2)).sum::<f64>() / count;
        let data_noise = values.map(|p| p * (1.0 - p)).sum::<f64>() / count;

        aleatoric.push(data_noise.max(0.0) as f32);
        epistemic.push(variance as f32);
    }

    DenseUncertainty {
        aleatoric,
        epistemic,
    }
}

/// How a task turns stochastic passes into persisted uncertainty.
#[derive(Clone, Debug, PartialEq)]
pub enum UncertaintyStrategy {
    /// Majority vote and normalized entropy per file, written to `results/uncertainty.csv`
    /// next to the deterministic class of each file.
    ClassEntropy {
        num_classes: usize,
        /// Deterministic class per test file, in test-set order.
        predictions: Vec<usize>,
    },
    /// Aleatoric/epistemic maps to `insights/`, their sum to `uncertainty/`.
    PixelVariance { output_grid: [usize; 4] },
}

/// What the stochastic stage produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UncertaintySummary {
    pub files: usize,
    pub passes: usize,
    /// Mean of the per-file entropy (classification) or of the total map (dense tasks).
    pub mean_uncertainty: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassUncertainty {
    pub file: String,
    pub prediction: usize,
    pub mc_prediction: usize,
    pub uncertainty: f64,
}

/// Repeats stochastic forward passes over a test set.
pub struct UncertaintyEstimator {
    passes: usize,
}

impl Default for UncertaintyEstimator {
    fn default() -> Self {
        Self { passes: MC_PASSES }
    }
}

impl UncertaintyEstimator {
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// `passes` forward passes over one file.
    ///
    /// Dropout only samples on autodiff backends, so `model` must live on one.
    pub fn sample<B: Backend, M: TaskModel<B>>(
        &self,
        model: &M,
        test: &TestSet,
        file: &str,
        device: &B::Device,
    ) -> Result<Vec<Vec<f32>>> {
        let input = test.input::<B>(file, device)?;
        Ok((0..self.passes)
            .map(|_| probabilities(model, input.clone()))
            .collect())
    }

    pub fn estimate<B: Backend, M: TaskModel<B>>(
        &self,
        strategy: &UncertaintyStrategy,
        model: &M,
        test: &TestSet,
        layout: &DatasetLayout,
        device: &B::Device,
    ) -> Result<UncertaintySummary> {
        tracing::info!(
            "Estimating uncertainty with {} stochastic passes over {} files",
            self.passes,
            test.len()
        );

        let mut total = 0.0;
        match strategy {
            UncertaintyStrategy::ClassEntropy {
                num_classes,
                predictions,
            } => {
                if predictions.len() != test.len() {
                    return Err(PipelineError::configuration(format!(
                        "Expected {} deterministic predictions, got {}",
                        test.len(),
                        predictions.len()
                    )));
                }

                let mut rows = Vec::with_capacity(test.len());
                for (file, &prediction) in test.files().iter().zip(predictions) {
                    let passes = self.sample(model, test, file, device)?;
                    let row = ClassUncertainty {
                        file: file.clone(),
                        prediction,
                        mc_prediction: majority_vote(&passes, *num_classes),
                        uncertainty: predictive_entropy(&passes, *num_classes),
                    };
                    total += row.uncertainty;
                    rows.push(row);
                }
                save_class_uncertainty(&layout.results_dir().join(UNCERTAINTY_TABLE), &rows)?;
            }
            UncertaintyStrategy::PixelVariance { output_grid } => {
                for file in test.files() {
                    let passes = self.sample(model, test, file, device)?;
                    let maps = dense_uncertainty(&passes);
                    let combined = maps.total();
                    total += combined.iter().map(|&v| v as f64).sum::<f64>()
                        / combined.len().max(1) as f64;
                    save_dense_uncertainty(layout, test, file, *output_grid, &maps, combined)?;
                }
            }
        }

        Ok(UncertaintySummary {
            files: test.len(),
            passes: self.passes,
            mean_uncertainty: total / test.len().max(1) as f64,
        })
    }
}

/// `filename,prediction,mc_prediction,uncertainty` rows.
pub fn save_class_uncertainty(path: &Path, rows: &[ClassUncertainty]) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }

    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let write_err = |e| PipelineError::io(path, e);

    writeln!(writer, "filename,prediction,mc_prediction,uncertainty").map_err(write_err)?;
    for row in rows {
        writeln!(
            writer,
            "{},{},{},{:.6}",
            row.file, row.prediction, row.mc_prediction, row.uncertainty
        )
        .map_err(write_err)?;
    }
    writer.flush().map_err(write_err)?;
    tracing::info!("Saved classification uncertainty to {:?}", path);

    Ok(())
}

fn save_dense_uncertainty(
    layout: &DatasetLayout,
    test: &TestSet,
    file: &str,
    output_grid: [usize; 4],
    maps: &DenseUncertainty,
    combined: Vec<f32>,
) -> Result<()> {
    let original = test.original_shape(file)?;
    let stem = file_stem(file);

    let grid = |data: Vec<f32>| VoxelGrid {
        shape: output_grid,
        data,
    };

    write_prediction(
        &layout.insights_dir(),
        &format!("{stem}_epistemic"),
        &grid(maps.epistemic.clone()),
        &original,
    )?;
    write_prediction(
        &layout.insights_dir(),
        &format!("{stem}_aleatoric"),
        &grid(maps.aleatoric.clone()),
        &original,
    )?;
    write_prediction(&layout.uncertainty_dir(), &stem, &grid(combined), &original)?;

    Ok(())
}
