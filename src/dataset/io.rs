//! Image and volume I/O.
//!
//! 2D files are decoded with the `image` crate and normalized to `[0, 1]`.
//! 3D volumes live in `.vol` files: a bincode record holding a channel-last
//! shape and its `f32` values.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, Rgb};
use serde::{Deserialize, Serialize};

use crate::dataset::layout::create_dir;
use crate::error::{PipelineError, Result};

pub const VOLUME_EXTENSION: &str = "vol";

#[derive(Serialize, Deserialize)]
struct VolumeRecord {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// Channel-last image or volume, `[spatial.., channels]`.
#[derive(Clone, Debug, PartialEq)]
pub struct RawImage {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// Channel-first grid `[channels, depth, height, width]`, depth is 1 for 2D data.
#[derive(Clone, Debug, PartialEq)]
pub struct VoxelGrid {
    pub shape: [usize; 4],
    pub data: Vec<f32>,
}

impl RawImage {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        if shape.len() < 2 {
            return Err(PipelineError::ShapeMismatch(format!(
                "Image shape needs at least one spatial axis and a channel axis, got {shape:?}"
            )));
        }

        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(PipelineError::ShapeMismatch(format!(
                "Shape {shape:?} holds {expected} values but {} were given",
                data.len()
            )));
        }

        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn spatial(&self) -> &[usize] {
        &self.shape[..self.shape.len() - 1]
    }

    pub fn channels(&self) -> usize {
        self.shape[self.shape.len() - 1]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    fn voxels(&self) -> usize {
        self.spatial().iter().product()
    }

    /// Adapt the channel count: replicate a single channel, average many into one.
    pub fn with_channels(self, channels: usize) -> Result<Self> {
        let current = self.channels();
        if current == channels {
            return Ok(self);
        }

        let voxels = self.voxels();
        let mut shape = self.shape.clone();
        if let Some(last) = shape.last_mut() {
            *last = channels;
        }

        let data: Vec<f32> = if current == 1 {
            self.data
                .iter()
                .flat_map(|&v| std::iter::repeat_n(v, channels))
                .collect()
        } else if channels == 1 {
            self.data
                .chunks(current)
                .map(|pixel| pixel.iter().sum::<f32>() / current as f32)
                .collect()
        } else if current == 4 && channels == 3 {
            self.data
                .chunks(4)
                .flat_map(|pixel| pixel[..3].to_vec())
                .collect()
        } else {
            return Err(PipelineError::ShapeMismatch(format!(
                "Cannot convert {current} channels into {channels}"
            )));
        };

        debug_assert_eq!(data.len(), voxels * channels);
        Self::new(shape, data)
    }

    /// Resample the spatial axes, bilinear for 2D, nearest neighbour for 3D.
    pub fn resize(&self, spatial: &[usize]) -> Result<Self> {
        if spatial == self.spatial() {
            return Ok(self.clone());
        }

        if spatial.len() != self.spatial().len() {
            return Err(PipelineError::ShapeMismatch(format!(
                "Cannot resize {:?} to {:?}: spatial ranks differ",
                self.spatial(),
                spatial
            )));
        }

        let channels = self.channels();
        let mut shape = spatial.to_vec();
        shape.push(channels);

        let data = match spatial.len() {
            2 => self.resize_planes(spatial[0], spatial[1])?,
            3 => self.resize_nearest(spatial),
            rank => {
                return Err(PipelineError::ShapeMismatch(format!(
                    "Unsupported spatial rank {rank}"
                )));
            }
        };

        Self::new(shape, data)
    }

    fn resize_planes(&self, height: usize, width: usize) -> Result<Vec<f32>> {
        let channels = self.channels();
        let [src_height, src_width] = [self.shape[0], self.shape[1]];

        let mut planes = Vec::with_capacity(channels);
        for c in 0..channels {
            let plane: Vec<f32> = self.data.iter().skip(c).step_by(channels).copied().collect();
            let buffer = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(
                src_width as u32,
                src_height as u32,
                plane,
            )
            .ok_or_else(|| {
                PipelineError::ShapeMismatch(format!(
                    "Plane buffer does not match {src_height}x{src_width}"
                ))
            })?;
            planes.push(
                imageops::resize(&buffer, width as u32, height as u32, FilterType::Triangle)
                    .into_raw(),
            );
        }

        let mut data = Vec::with_capacity(height * width * channels);
        for i in 0..height * width {
            for plane in &planes {
                data.push(plane[i]);
            }
        }

        Ok(data)
    }

    fn resize_nearest(&self, spatial: &[usize]) -> Vec<f32> {
        let channels = self.channels();
        let src = self.spatial();
        let index = |dst: usize, axis: usize| -> usize {
            ((dst * src[axis]) / spatial[axis]).min(src[axis] - 1)
        };

        let mut data = Vec::with_capacity(spatial.iter().product::<usize>() * channels);
        for z in 0..spatial[0] {
            let sz = index(z, 0);
            for y in 0..spatial[1] {
                let sy = index(y, 1);
                for x in 0..spatial[2] {
                    let sx = index(x, 2);
                    let offset = ((sz * src[1] + sy) * src[2] + sx) * channels;
                    data.extend_from_slice(&self.data[offset..offset + channels]);
                }
            }
        }

        data
    }

    pub fn to_grid(&self) -> VoxelGrid {
        let channels = self.channels();
        let voxels = self.voxels();
        let spatial = self.spatial();
        let (depth, height, width) = match spatial {
            [h, w] => (1, *h, *w),
            [d, h, w] => (*d, *h, *w),
            _ => (1, 1, voxels),
        };

        let mut data = vec![0.0; voxels * channels];
        for (i, pixel) in self.data.chunks(channels).enumerate() {
            for (c, &value) in pixel.iter().enumerate() {
                data[c * voxels + i] = value;
            }
        }

        VoxelGrid {
            shape: [channels, depth, height, width],
            data,
        }
    }
}

impl VoxelGrid {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Concatenate along the channel axis.
    pub fn stack_channels(grids: Vec<VoxelGrid>) -> Result<VoxelGrid> {
        let mut grids = grids.into_iter();
        let mut stacked = grids
            .next()
            .ok_or_else(|| PipelineError::missing("No input modality to stack"))?;

        for grid in grids {
            if grid.shape[1..] != stacked.shape[1..] {
                return Err(PipelineError::ShapeMismatch(format!(
                    "Modalities disagree on spatial shape: {:?} vs {:?}",
                    stacked.shape, grid.shape
                )));
            }
            stacked.shape[0] += grid.shape[0];
            stacked.data.extend(grid.data);
        }

        Ok(stacked)
    }

    /// Back to channel-last with the given number of spatial axes (2 or 3).
    pub fn to_image(&self, spatial_rank: usize) -> Result<RawImage> {
        let [channels, depth, height, width] = self.shape;
        let voxels = depth * height * width;

        let mut data = vec![0.0; voxels * channels];
        for c in 0..channels {
            for i in 0..voxels {
                data[i * channels + c] = self.data[c * voxels + i];
            }
        }

        let shape = if spatial_rank == 3 {
            vec![depth, height, width, channels]
        } else {
            vec![height, width, channels]
        };

        RawImage::new(shape, data)
    }
}

/// Load an input or ground-truth file as a channel-last array.
pub fn import_image(path: &Path) -> Result<RawImage> {
    if !path.is_file() {
        return Err(PipelineError::missing(format!(
            "Image file does not exist: {:?}",
            path
        )));
    }

    if is_volume(path) {
        return read_volume(path);
    }

    let image = image::open(path)?;
    let (width, height) = (image.width() as usize, image.height() as usize);

    if image.color().has_color() {
        RawImage::new(vec![height, width, 3], image.to_rgb32f().into_raw())
    } else {
        RawImage::new(vec![height, width, 1], image.to_luma32f().into_raw())
    }
}

/// Spatial extent of a file without keeping its pixels around.
pub fn spatial_shape(path: &Path) -> Result<Vec<usize>> {
    if is_volume(path) {
        return Ok(import_image(path)?.spatial().to_vec());
    }

    let (width, height) = image::image_dimensions(path)?;
    Ok(vec![height as usize, width as usize])
}

fn is_volume(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(VOLUME_EXTENSION))
}

/// Read a `.vol` record. Stored arrays carry no channel axis unless they are
/// rank 4, so rank 2 (a plane) and rank 3 (a volume) get a trailing channel of 1.
pub fn read_volume(path: &Path) -> Result<RawImage> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let record: VolumeRecord =
        bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())?;

    let mut shape = record.shape;
    if matches!(shape.len(), 2 | 3) {
        shape.push(1);
    }

    RawImage::new(shape, record.data)
}

pub fn write_volume(path: &Path, image: &RawImage) -> Result<()> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let record = VolumeRecord {
        shape: image.shape.clone(),
        data: image.data.clone(),
    };
    bincode::serde::encode_into_std_write(&record, &mut writer, bincode::config::standard())?;

    Ok(())
}

fn to_u16(value: f32) -> u16 {
    (value.clamp(0.0, 1.0) * u16::MAX as f32).round() as u16
}

/// Where [`write_image`] puts an image with `spatial_rank` spatial axes.
pub fn output_path(dir: &Path, stem: &str, spatial_rank: usize) -> PathBuf {
    if spatial_rank == 3 {
        dir.join(format!("{stem}.{VOLUME_EXTENSION}"))
    } else {
        dir.join(format!("{stem}.png"))
    }
}

/// Write `image` as `<dir>/<stem>.png` (16 bit) or `<dir>/<stem>.vol` for volumes.
pub fn write_image(dir: &Path, stem: &str, image: &RawImage) -> Result<PathBuf> {
    create_dir(dir)?;

    let path = output_path(dir, stem, image.spatial().len());
    if image.spatial().len() == 3 {
        write_volume(&path, image)?;
        return Ok(path);
    }

    let [height, width] = [image.shape[0] as u32, image.shape[1] as u32];
    let pixels: Vec<u16> = image.data.iter().map(|&v| to_u16(v)).collect();

    match image.channels() {
        1 => ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(width, height, pixels)
            .ok_or_else(|| PipelineError::ShapeMismatch("Invalid grayscale buffer".into()))?
            .save(&path)?,
        3 => ImageBuffer::<Rgb<u16>, Vec<u16>>::from_raw(width, height, pixels)
            .ok_or_else(|| PipelineError::ShapeMismatch("Invalid RGB buffer".into()))?
            .save(&path)?,
        channels => {
            return Err(PipelineError::ShapeMismatch(format!(
                "Only 1 or 3 channel images can be written, got {channels}"
            )));
        }
    }

    Ok(path)
}

/// Persist one network output grid as `<dir>/<stem>.*`, resized back to `original`.
pub fn write_prediction(
    dir: &Path,
    stem: &str,
    grid: &VoxelGrid,
    original: &[usize],
) -> Result<PathBuf> {
    let image = grid.to_image(original.len())?.resize(original)?;
    write_image(dir, stem, &image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_round_trip_keeps_channel_layout() {
        let image = RawImage::new(vec![2, 2, 2], vec![0., 10., 1., 11., 2., 12., 3., 13.]).unwrap();
        let grid = image.to_grid();

        assert_eq!(grid.shape, [2, 1, 2, 2]);
        assert_eq!(grid.data, vec![0., 1., 2., 3., 10., 11., 12., 13.]);
        assert_eq!(grid.to_image(2).unwrap(), image);
    }

    #[test]
    fn single_channel_is_replicated() {
        let image = RawImage::new(vec![1, 2, 1], vec![0.25, 0.5]).unwrap();
        let rgb = image.with_channels(3).unwrap();
        assert_eq!(rgb.shape(), &[1, 2, 3]);
        assert_eq!(rgb.data(), &[0.25, 0.25, 0.25, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn volume_nearest_resize() {
        let image = RawImage::new(vec![1, 2, 2, 1], vec![1., 2., 3., 4.]).unwrap();
        let resized = image.resize(&[2, 4, 4]).unwrap();
        assert_eq!(resized.shape(), &[2, 4, 4, 1]);
        assert_eq!(resized.data()[0], 1.);
        assert_eq!(resized.data()[3], 2.);
        assert_eq!(resized.data()[15], 4.);
    }

    #[test]
    fn png_written_at_sixteen_bits_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let image = RawImage::new(vec![2, 2, 1], vec![0.0, 0.25, 0.5, 1.0]).unwrap();
        let path = write_image(dir.path(), "mask", &image).unwrap();

        let loaded = import_image(&path).unwrap();
        assert_eq!(loaded.shape(), &[2, 2, 1]);
        for (a, b) in loaded.data().iter().zip(image.data()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn volume_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let image = RawImage::new(vec![2, 2, 2, 1], (0..8).map(|v| v as f32).collect()).unwrap();
        let path = write_image(dir.path(), "stack", &image).unwrap();

        assert_eq!(path.extension().unwrap(), "vol");
        assert_eq!(import_image(&path).unwrap(), image);
        assert_eq!(spatial_shape(&path).unwrap(), vec![2, 2, 2]);
    }

    #[test]
    fn channelless_volume_reads_as_single_channel_stack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.vol");
        let stored = RawImage::new(vec![4, 8, 8], (0..256).map(|v| v as f32).collect()).unwrap();
        write_volume(&path, &stored).unwrap();

        let loaded = import_image(&path).unwrap();
        assert_eq!(loaded.shape(), &[4, 8, 8, 1]);
        assert_eq!(loaded.spatial(), &[4, 8, 8]);
        assert_eq!(loaded.data(), stored.data());
        assert_eq!(spatial_shape(&path).unwrap(), vec![4, 8, 8]);
    }
}
