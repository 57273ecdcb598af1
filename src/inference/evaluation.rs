//! Ground-truth evaluation of the persisted predictions, written to `results/evaluation.json`.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dataset::classification::LabelTable;
use crate::dataset::io::{import_image, output_path};
use crate::dataset::layout::{DatasetLayout, create_dir, file_stem, list_image_files};
use crate::error::{PipelineError, Result};
use crate::inference::evaluator::CLASS_TABLE;
use crate::training::metrics::MASK_THRESHOLD;

pub const EVALUATION_REPORT: &str = "evaluation.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum EvaluationReport {
    Classification {
        samples: usize,
        accuracy: f64,
        /// Rows are true classes, columns predicted classes.
        confusion_matrix: Vec<Vec<usize>>,
    },
    Dense {
        samples: usize,
        mean_absolute_error: f64,
        mean_squared_error: f64,
        dice: Option<f64>,
        iou: Option<f64>,
    },
}

impl EvaluationReport {
    pub fn save(&self, layout: &DatasetLayout) -> Result<()> {
        let dir = layout.results_dir();
        create_dir(&dir)?;

        let path = dir.join(EVALUATION_REPORT);
        let file = File::create(&path).map_err(|e| PipelineError::io(&path, e))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        tracing::info!("Saved evaluation to {:?}", path);

        Ok(())
    }
}

/// Compare `results/results.csv` against `test/groundtruth/groundtruth.csv`.
pub fn classification_evaluation(layout: &DatasetLayout, num_classes: usize) -> Result<EvaluationReport> {
    let labels = LabelTable::load(&layout.test_dir(), num_classes)?;
    let table = layout.results_dir().join(CLASS_TABLE);
    let content = std::fs::read_to_string(&table).map_err(|e| PipelineError::io(&table, e))?;

    let mut confusion_matrix = vec![vec![0usize; num_classes]; num_classes];
    let mut samples = 0;
    let mut correct = 0;
    for line in content.lines().skip(1) {
        let mut fields = line.split(',');
        let (Some(file), Some(prediction)) = (fields.next(), fields.next()) else {
            continue;
        };
        let prediction: usize = prediction.trim().parse().map_err(|_| {
            PipelineError::ShapeMismatch(format!("Malformed prediction row in {:?}: {line}", table))
        })?;
        let truth = labels.label(file)?;

        if let Some(cell) = confusion_matrix
            .get_mut(truth)
            .and_then(|row| row.get_mut(prediction))
        {
            *cell += 1;
        }
        samples += 1;
        if truth == prediction {
            correct += 1;
        }
    }

    let accuracy = if samples == 0 {
        0.0
    } else {
        correct as f64 / samples as f64
    };
    tracing::info!("Test accuracy: {:.4} over {} samples", accuracy, samples);

    Ok(EvaluationReport::Classification {
        samples,
        accuracy,
        confusion_matrix,
    })
}

#[derive(Default)]
struct DenseTotals {
    voxels: usize,
    absolute: f64,
    squared: f64,
    intersection: f64,
    predicted: f64,
    actual: f64,
}

impl DenseTotals {
    fn update(&mut self, prediction: &[f32], truth: &[f32]) {
        for (&p, &t) in prediction.iter().zip(truth) {
            let (p, t) = (p as f64, t as f64);
            self.voxels += 1;
            self.absolute += (p - t).abs();
            self.squared += (p - t).powi(2);

            let p_mask = (p > MASK_THRESHOLD) as u8 as f64;
            let t_mask = (t > MASK_THRESHOLD) as u8 as f64;
            self.intersection += p_mask * t_mask;
            self.predicted += p_mask;
            self.actual += t_mask;
        }
    }

    fn mean(&self, sum: f64) -> f64 {
        if self.voxels == 0 {
            0.0
        } else {
            sum / self.voxels as f64
        }
    }

    fn dice(&self) -> f64 {
        let denominator = self.predicted + self.actual;
        if denominator == 0.0 {
            1.0
        } else {
            2.0 * self.intersection / denominator
        }
    }

    fn iou(&self) -> f64 {
        let union = self.predicted + self.actual - self.intersection;
        if union == 0.0 {
            1.0
        } else {
            self.intersection / union
        }
    }
}

/// Compare every `results/<stem>` image with `test/groundtruth/<file>`.
///
/// Overlap scores are reported for thresholded masks when `segmentation` is set.
pub fn dense_evaluation(layout: &DatasetLayout, segmentation: bool) -> Result<EvaluationReport> {
    let files = list_image_files(&layout.test_images())?;
    let groundtruth = layout.test_groundtruth();

    let mut totals = DenseTotals::default();
    for file in &files {
        let truth = import_image(&groundtruth.join(file))?;
        let rank = truth.spatial().len();
        let prediction = import_image(&output_path(&layout.results_dir(), &file_stem(file), rank))?;

        let truth = truth
            .with_channels(prediction.channels())?
            .resize(prediction.spatial())?;
        totals.update(prediction.data(), truth.data());
    }

    let report = EvaluationReport::Dense {
        samples: files.len(),
        mean_absolute_error: totals.mean(totals.absolute),
        mean_squared_error: totals.mean(totals.squared),
        dice: segmentation.then(|| totals.dice()),
        iou: segmentation.then(|| totals.iou()),
    };
    tracing::info!("Test evaluation: {:?}", report);

    Ok(report)
}

/// Load a previously written report.
pub fn load_report(path: &Path) -> Result<EvaluationReport> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::io::{RawImage, write_image};

    #[test]
    fn classification_accuracy_and_confusion() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        create_dir(&layout.test_groundtruth()).unwrap();
        create_dir(&layout.results_dir()).unwrap();
        std::fs::write(
            layout.test_groundtruth().join("groundtruth.csv"),
            "filename,label\na.png,0\nb.png,1\nc.png,2\n",
        )
        .unwrap();
        std::fs::write(
            layout.results_dir().join(CLASS_TABLE),
            "filename,prediction,p0,p1,p2\na.png,0,0.8,0.1,0.1\nb.png,2,0.1,0.2,0.7\nc.png,2,0.1,0.1,0.8\n",
        )
        .unwrap();

        let report = classification_evaluation(&layout, 3).unwrap();
        report.save(&layout).unwrap();

        let EvaluationReport::Classification {
            samples,
            accuracy,
            confusion_matrix,
        } = load_report(&layout.results_dir().join(EVALUATION_REPORT)).unwrap()
        else {
            panic!("expected a classification report");
        };
        assert_eq!(samples, 3);
        assert!((accuracy - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(confusion_matrix[1][2], 1);
        assert_eq!(confusion_matrix[2][2], 1);
    }

    #[test]
    fn dense_scores_of_identical_masks() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        let mask = RawImage::new(vec![2, 2, 1], vec![0.0, 1.0, 1.0, 0.0]).unwrap();
        write_image(&layout.test_images(), "a", &mask).unwrap();
        write_image(&layout.test_groundtruth(), "a", &mask).unwrap();
        write_image(&layout.results_dir(), "a", &mask).unwrap();

        let EvaluationReport::Dense {
            samples,
            mean_absolute_error,
            dice,
            iou,
            ..
        } = dense_evaluation(&layout, true).unwrap()
        else {
            panic!("expected a dense report");
        };

        assert_eq!(samples, 1);
        assert!(mean_absolute_error < 1e-6);
        assert_eq!(dice, Some(1.0));
        assert_eq!(iou, Some(1.0));
    }

    #[test]
    fn missing_ground_truth_is_missing_data() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        let image = RawImage::new(vec![2, 2, 1], vec![0.5; 4]).unwrap();
        write_image(&layout.test_images(), "a", &image).unwrap();

        let err = dense_evaluation(&layout, false).unwrap_err();
        assert!(matches!(err, PipelineError::MissingData(_)));
    }
}
