use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use burn::prelude::*;

use crate::dataset::generator::InputReader;
use crate::dataset::io::{VoxelGrid, spatial_shape, write_prediction};
use crate::dataset::layout::{DatasetLayout, create_dir, file_stem, list_image_files};
use crate::dataset::probe::DatasetDescriptor;
use crate::error::{PipelineError, Result};
use crate::model::TaskModel;

pub const CLASS_TABLE: &str = "results.csv";

/// Test inputs in file order, read the same way as training inputs.
#[derive(Clone, Debug)]
pub struct TestSet {
    images_dir: PathBuf,
    files: Vec<String>,
    reader: InputReader,
    grid_shape: [usize; 4],
}

impl TestSet {
    pub fn discover(layout: &DatasetLayout, descriptor: &DatasetDescriptor) -> Result<Self> {
        let images_dir = layout.test_images();
        let files = list_image_files(&images_dir)?;
        if files.is_empty() {
            return Err(PipelineError::missing(format!(
                "No test image found in {:?}",
                images_dir
            )));
        }
        tracing::info!("Testing on {} files", files.len());

        let reader = InputReader::new(
            layout.test_dir(),
            descriptor.modalities.clone(),
            descriptor.spatial().to_vec(),
            descriptor.channels,
        );

        Ok(Self {
            images_dir,
            files,
            reader,
            grid_shape: descriptor.grid_shape(),
        })
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Network input of one file as a batch of one.
    pub fn input<B: Backend>(&self, file: &str, device: &B::Device) -> Result<Tensor<B, 5>> {
        let grid = self.reader.read(file)?;
        let [c, d, h, w] = grid.shape;
        if grid.shape != self.grid_shape {
            return Err(PipelineError::ShapeMismatch(format!(
                "Test input {file} has shape {:?}, expected {:?}",
                grid.shape, self.grid_shape
            )));
        }

        Ok(Tensor::from_data(
            TensorData::new(grid.data, [1, c, d, h, w]).convert::<B::FloatElem>(),
            device,
        ))
    }

    /// Spatial shape of a test file as stored on disk.
    pub fn original_shape(&self, file: &str) -> Result<Vec<usize>> {
        spatial_shape(&self.images_dir.join(file))
    }
}

/// One prediction per test file, aligned with the file list.
#[derive(Clone, Debug)]
pub struct PredictionBatch {
    pub files: Vec<String>,
    pub values: Vec<Vec<f32>>,
}

impl PredictionBatch {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Flattened probabilities of one network pass over a batch of one.
pub fn probabilities<B: Backend, M: TaskModel<B>>(model: &M, input: Tensor<B, 5>) -> Vec<f32> {
    model
        .forward_probs(input)
        .into_data()
        .iter::<f32>()
        .collect()
}

/// One deterministic forward pass per test file, in file order.
///
/// Pass a model on a non-autodiff backend (`AutodiffModule::valid`) so dropout is inactive.
pub fn predict<B: Backend, M: TaskModel<B>>(
    model: &M,
    test: &TestSet,
    device: &B::Device,
) -> Result<PredictionBatch> {
    let mut values = Vec::with_capacity(test.len());
    for file in test.files() {
        let input = test.input::<B>(file, device)?;
        values.push(probabilities(model, input));
    }

    Ok(PredictionBatch {
        files: test.files().to_vec(),
        values,
    })
}

pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_value), (index, &value)| {
            if value > best_value {
                (index, value)
            } else {
                (best, best_value)
            }
        })
        .0
}

/// `filename,prediction,p0..pK-1` rows.
pub fn save_class_table(path: &Path, predictions: &PredictionBatch) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }

    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let write_err = |e| PipelineError::io(path, e);

    let num_classes = predictions.values.first().map_or(0, Vec::len);
    let columns: Vec<String> = (0..num_classes).map(|c| format!("p{c}")).collect();
    writeln!(writer, "filename,prediction,{}", columns.join(",")).map_err(write_err)?;

    for (file, probs) in predictions.files.iter().zip(&predictions.values) {
        let formatted: Vec<String> = probs.iter().map(|p| format!("{p:.6}")).collect();
        writeln!(writer, "{file},{},{}", argmax(probs), formatted.join(",")).map_err(write_err)?;
    }

    writer.flush().map_err(write_err)?;
    tracing::info!("Saved {} class predictions to {:?}", predictions.len(), path);

    Ok(())
}

/// Write every dense prediction as an image resized back to its test input's shape.
pub fn save_dense_predictions(
    dir: &Path,
    predictions: &PredictionBatch,
    output_grid: [usize; 4],
    test: &TestSet,
) -> Result<()> {
    let count = predictions.len();
    for (file, values) in predictions.files.iter().zip(&predictions.values) {
        let grid = VoxelGrid {
            shape: output_grid,
            data: values.clone(),
        };
        let original = test.original_shape(file)?;
        write_prediction(dir, &file_stem(file), &grid, &original)?;
    }
    tracing::info!("Saved {} predictions to {:?}", count, dir);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_prefers_first_of_ties() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), 1);
        assert_eq!(argmax(&[0.9, 0.05, 0.05]), 0);
    }

    #[test]
    fn class_table_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results/results.csv");
        let predictions = PredictionBatch {
            files: vec!["a.png".into(), "b.png".into()],
            values: vec![vec![0.1, 0.9], vec![0.75, 0.25]],
        };

        save_class_table(&path, &predictions).unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "filename,prediction,p0,p1");
        assert_eq!(lines[1], "a.png,1,0.100000,0.900000");
        assert_eq!(lines[2], "b.png,0,0.750000,0.250000");
    }
}
