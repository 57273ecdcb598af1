use std::path::PathBuf;

use crate::dataset::generator::{InputReader, Sample, SampleLoader, Target};
use crate::dataset::io::import_image;
use crate::dataset::layout::{DatasetLayout, GROUNDTRUTH_FOLDER, list_image_files};
use crate::error::{PipelineError, Result};

/// Label channel depth used for a ground truth stored with `channels` channels.
///
/// Single-channel and RGB ground truth keep their depth; anything else is
/// averaged down to one channel.
pub fn coerce_label_channels(channels: usize) -> usize {
    match channels {
        1 | 3 => channels,
        _ => 1,
    }
}

/// Inspect the first training ground truth and return the label channel depth.
pub fn probe_label_channels(layout: &DatasetLayout) -> Result<usize> {
    let groundtruth = layout.train_groundtruth();
    let files = list_image_files(&groundtruth)?;
    let first = files.first().ok_or_else(|| {
        PipelineError::missing(format!("No ground truth found in {:?}", groundtruth))
    })?;

    let stored = import_image(&groundtruth.join(first))?.channels();
    let label_channels = coerce_label_channels(stored);
    if label_channels != stored {
        tracing::warn!(
            "Ground truth has {} channels, training against {} label channel",
            stored,
            label_channels
        );
    }
    tracing::info!("Label channels: {}", label_channels);

    Ok(label_channels)
}

/// Loads an input stack and its per-voxel ground truth with the same file name.
#[derive(Clone, Debug)]
pub struct DenseLoader {
    reader: InputReader,
    groundtruth: PathBuf,
    spatial: Vec<usize>,
    label_channels: usize,
}

impl DenseLoader {
    pub fn new(
        split_dir: PathBuf,
        modalities: Vec<String>,
        spatial: Vec<usize>,
        channels: usize,
        label_channels: usize,
    ) -> Self {
        Self {
            reader: InputReader::new(split_dir.clone(), modalities, spatial.clone(), channels),
            groundtruth: split_dir.join(GROUNDTRUTH_FOLDER),
            spatial,
            label_channels,
        }
    }

    pub fn label_channels(&self) -> usize {
        self.label_channels
    }
}

impl SampleLoader for DenseLoader {
    fn load(&self, file: &str) -> Result<Sample> {
        let input = self.reader.read(file)?;
        let target = import_image(&self.groundtruth.join(file))?
            .with_channels(self.label_channels)?
            .resize(&self.spatial)?
            .to_grid();

        Ok(Sample {
            input,
            target: Target::Dense(target),
        })
    }

    fn target_len(&self) -> usize {
        self.label_channels * self.spatial.iter().product::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::io::{RawImage, write_image};

    #[test]
    fn five_channel_ground_truth_is_coerced_to_one() {
        assert_eq!(coerce_label_channels(5), 1);
        assert_eq!(coerce_label_channels(4), 1);
        assert_eq!(coerce_label_channels(3), 3);
        assert_eq!(coerce_label_channels(1), 1);
    }

    #[test]
    fn five_channel_volume_probes_as_single_label_channel() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        let volume = RawImage::new(vec![2, 4, 4, 5], vec![0.5; 2 * 4 * 4 * 5]).unwrap();
        write_image(&layout.train_groundtruth(), "cell", &volume).unwrap();

        assert_eq!(probe_label_channels(&layout).unwrap(), 1);
    }

    #[test]
    fn loads_input_and_aligned_target() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        let input = RawImage::new(vec![4, 4, 1], vec![0.25; 16]).unwrap();
        let mask = RawImage::new(vec![4, 4, 1], vec![1.0; 16]).unwrap();
        write_image(&layout.train_images(), "a", &input).unwrap();
        write_image(&layout.train_groundtruth(), "a", &mask).unwrap();

        let loader = DenseLoader::new(
            layout.train_dir(),
            vec!["image".to_string()],
            vec![8, 8],
            1,
            1,
        );
        let sample = loader.load("a.png").unwrap();

        assert_eq!(sample.input.shape, [1, 1, 8, 8]);
        assert_eq!(sample.target.len(), loader.target_len());
        assert!(
            sample
                .target
                .into_values()
                .iter()
                .all(|v| (v - 1.0).abs() < 1e-3)
        );
    }

    #[test]
    fn missing_ground_truth_is_missing_data() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        let input = RawImage::new(vec![4, 4, 1], vec![0.25; 16]).unwrap();
        write_image(&layout.train_images(), "a", &input).unwrap();

        let loader = DenseLoader::new(layout.train_dir(), vec!["image".into()], vec![4, 4], 1, 1);
        let err = loader.load("a.png").unwrap_err();
        assert!(matches!(err, PipelineError::MissingData(_)));
    }
}
