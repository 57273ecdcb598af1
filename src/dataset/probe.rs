use crate::config::{RunConfig, validate_image_size};
use crate::dataset::io::import_image;
use crate::dataset::layout::{DatasetLayout, list_image_files};
use crate::error::{PipelineError, Result};
use crate::model::Dimensionality;

/// Shape facts about a dataset, computed once before anything is built.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetDescriptor {
    /// Channel-last training input shape of a single modality.
    pub input_shape: Vec<usize>,
    pub channels: usize,
    pub dimensions: Dimensionality,
    /// Modality folders stacked along the channel axis, in order.
    pub modalities: Vec<String>,
    /// `input_shape` with the channel axis multiplied by the modality count.
    pub network_input_shape: Vec<usize>,
    /// Shape of the first training image as stored, when it was probed.
    pub raw_shape: Option<Vec<usize>>,
}

impl DatasetDescriptor {
    pub fn spatial(&self) -> &[usize] {
        &self.input_shape[..self.input_shape.len() - 1]
    }

    pub fn network_channels(&self) -> usize {
        self.network_input_shape[self.network_input_shape.len() - 1]
    }

    /// Channel-first shape of one stacked network input `[C, D, H, W]`.
    pub fn grid_shape(&self) -> [usize; 4] {
        grid_shape(self.network_channels(), self.spatial())
    }
}

pub fn grid_shape(channels: usize, spatial: &[usize]) -> [usize; 4] {
    match spatial {
        [d, h, w] => [channels, *d, *h, *w],
        [h, w] => [channels, 1, *h, *w],
        _ => [channels, 1, 1, spatial.iter().product()],
    }
}

/// Inspects the dataset directory for image shape, channels and input modalities.
pub struct DatasetProber<'a> {
    layout: &'a DatasetLayout,
}

impl<'a> DatasetProber<'a> {
    pub fn new(layout: &'a DatasetLayout) -> Self {
        Self { layout }
    }

    pub fn probe(&self, config: &RunConfig) -> Result<DatasetDescriptor> {
        let (input_shape, raw_shape) = match &config.image_size {
            Some(size) => {
                validate_image_size(size)?;
                (size.clone(), None)
            }
            None => {
                let raw = self.first_image_shape()?;
                (raw.clone(), Some(raw))
            }
        };

        let channels = input_shape[input_shape.len() - 1];
        let dimensions = Dimensionality::from_spatial_rank(input_shape.len() - 1);
        tracing::info!("Image dimensions are: {}D", dimensions.rank());

        let modalities = self.layout.modalities()?;
        if modalities.is_empty() {
            return Err(PipelineError::missing(format!(
                "No input image folder found in {:?}",
                self.layout.train_dir()
            )));
        }
        tracing::info!("Number of input folders is: {}", modalities.len());

        let network_input_shape = combined_input_shape(&input_shape, modalities.len());
        tracing::info!("Network input shape {:?}", network_input_shape);

        Ok(DatasetDescriptor {
            input_shape,
            channels,
            dimensions,
            modalities,
            network_input_shape,
            raw_shape,
        })
    }

    fn first_image_shape(&self) -> Result<Vec<usize>> {
        let images_dir = self.layout.train_images();
        let files = list_image_files(&images_dir)?;
        let first = files.first().ok_or_else(|| {
            PipelineError::missing(format!("No training image found in {:?}", images_dir))
        })?;

        let image = import_image(&images_dir.join(first))?;
        Ok(image.shape().to_vec())
    }
}

/// Multiply the channel axis by the number of stacked modalities.
pub fn combined_input_shape(input_shape: &[usize], modalities: usize) -> Vec<usize> {
    let mut shape = input_shape.to_vec();
    if let Some(channels) = shape.last_mut() {
        *channels *= modalities;
    }
    shape
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::config::Algorithm;
    use crate::dataset::io::{RawImage, write_volume};
    use crate::dataset::layout::MODALITY_FOLDERS;

    fn write_gray(path: &Path, width: u32, height: u32) {
        image::GrayImage::from_fn(width, height, |x, y| image::Luma([(x + y) as u8]))
            .save(path)
            .unwrap();
    }

    fn dataset_with_modalities(count: usize) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for folder in &MODALITY_FOLDERS[..count] {
            let folder = dir.path().join("train").join(folder);
            std::fs::create_dir_all(&folder).unwrap();
            write_gray(&folder.join("a.png"), 24, 16);
        }
        dir
    }

    #[test]
    fn probes_first_training_image() {
        let dir = dataset_with_modalities(1);
        let layout = DatasetLayout::new(dir.path());
        let config = RunConfig::new(Algorithm::Regression, dir.path().to_path_buf());

        let descriptor = DatasetProber::new(&layout).probe(&config).unwrap();

        assert_eq!(descriptor.input_shape, vec![16, 24, 1]);
        assert_eq!(descriptor.raw_shape, Some(vec![16, 24, 1]));
        assert_eq!(descriptor.dimensions, Dimensionality::Two);
        assert_eq!(descriptor.grid_shape(), [1, 1, 16, 24]);
    }

    #[test]
    fn channel_depth_scales_with_modality_folders() {
        for count in 1..=MODALITY_FOLDERS.len() {
            let dir = dataset_with_modalities(count);
            let layout = DatasetLayout::new(dir.path());
            let config = RunConfig::new(Algorithm::Regression, dir.path().to_path_buf())
                .with_image_size(Some(vec![16, 16, 3]));

            let descriptor = DatasetProber::new(&layout).probe(&config).unwrap();

            assert_eq!(descriptor.channels, 3);
            assert_eq!(descriptor.network_channels(), 3 * count);
            assert_eq!(descriptor.modalities.len(), count);
        }
    }

    #[test]
    fn explicit_image_size_bypasses_probing() {
        let dir = dataset_with_modalities(1);
        let layout = DatasetLayout::new(dir.path());
        let config = RunConfig::new(Algorithm::Regression, dir.path().to_path_buf())
            .with_image_size(Some(vec![8, 32, 32, 2]));

        let descriptor = DatasetProber::new(&layout).probe(&config).unwrap();

        assert_eq!(descriptor.channels, 2);
        assert_eq!(descriptor.dimensions, Dimensionality::Three);
        assert_eq!(descriptor.raw_shape, None);
        assert_eq!(descriptor.grid_shape(), [2, 8, 32, 32]);
    }

    #[test]
    fn channelless_volume_is_three_dimensional() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("train/image");
        std::fs::create_dir_all(&folder).unwrap();
        let stack = RawImage::new(vec![4, 8, 8], vec![0.5; 256]).unwrap();
        write_volume(&folder.join("a.vol"), &stack).unwrap();
        let layout = DatasetLayout::new(dir.path());
        let config = RunConfig::new(Algorithm::Regression, dir.path().to_path_buf());

        let descriptor = DatasetProber::new(&layout).probe(&config).unwrap();

        assert_eq!(descriptor.dimensions, Dimensionality::Three);
        assert_eq!(descriptor.spatial(), &[4, 8, 8]);
        assert_eq!(descriptor.input_shape, vec![4, 8, 8, 1]);
        assert_eq!(descriptor.grid_shape(), [1, 4, 8, 8]);
    }

    #[test]
    fn empty_image_folder_is_missing_data() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("train/image")).unwrap();
        let layout = DatasetLayout::new(dir.path());
        let config = RunConfig::new(Algorithm::Regression, dir.path().to_path_buf());

        let err = DatasetProber::new(&layout).probe(&config).unwrap_err();
        assert!(matches!(err, PipelineError::MissingData(_)));
    }
}
