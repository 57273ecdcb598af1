use rand::Rng;
use rand::rngs::StdRng;

use crate::config::AugmentationConfig;
use crate::dataset::io::VoxelGrid;

/// Applies the configured augmentations, geometric ones identically to input and target.
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn binarizes_mask(&self) -> bool {
        self.config.binarize_mask
    }

    pub fn apply(&self, input: &mut VoxelGrid, mut target: Option<&mut VoxelGrid>, rng: &mut StdRng) {
        if self.config.horizontal_flip && rng.random_bool(0.5) {
            flip_width(input);
            if let Some(target) = target.as_deref_mut() {
                flip_width(target);
            }
        }

        if self.config.vertical_flip && rng.random_bool(0.5) {
            flip_height(input);
            if let Some(target) = target.as_deref_mut() {
                flip_height(target);
            }
        }

        if self.config.rotate_90 && input.shape[2] == input.shape[3] {
            let turns = rng.random_range(0..4);
            for _ in 0..turns {
                rotate_90(input);
                if let Some(target) = target.as_deref_mut() {
                    rotate_90(target);
                }
            }
        }

        if self.config.brightness_range > 0.0 {
            let range = self.config.brightness_range;
            let factor = 1.0 + rng.random_range(-range..=range);
            input.data.iter_mut().for_each(|v| *v *= factor);
        }

        if self.config.binarize_mask {
            if let Some(target) = target {
                binarize(target);
            }
        }
    }
}

pub fn binarize(grid: &mut VoxelGrid) {
    grid.data
        .iter_mut()
        .for_each(|v| *v = if *v > 0.5 { 1.0 } else { 0.0 });
}

fn flip_width(grid: &mut VoxelGrid) {
    let width = grid.shape[3];
    grid.data
        .chunks_mut(width)
        .for_each(|row| row.reverse());
}

fn flip_height(grid: &mut VoxelGrid) {
    let [_, _, height, width] = grid.shape;
    for plane in grid.data.chunks_mut(height * width) {
        for y in 0..height / 2 {
            for x in 0..width {
                plane.swap(y * width + x, (height - 1 - y) * width + x);
            }
        }
    }
}

fn rotate_90(grid: &mut VoxelGrid) {
    let size = grid.shape[3];
    for plane in grid.data.chunks_mut(size * size) {
        let source = plane.to_vec();
        for y in 0..size {
            for x in 0..size {
                plane[y * size + x] = source[x * size + (size - 1 - y)];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn grid(data: Vec<f32>) -> VoxelGrid {
        VoxelGrid {
            shape: [1, 1, 2, 2],
            data,
        }
    }

    #[test]
    fn flips_and_rotations_move_pixels() {
        let mut g = grid(vec![1., 2., 3., 4.]);
        flip_width(&mut g);
        assert_eq!(g.data, vec![2., 1., 4., 3.]);

        let mut g = grid(vec![1., 2., 3., 4.]);
        flip_height(&mut g);
        assert_eq!(g.data, vec![3., 4., 1., 2.]);

        let mut g = grid(vec![1., 2., 3., 4.]);
        for _ in 0..4 {
            rotate_90(&mut g);
        }
        assert_eq!(g.data, vec![1., 2., 3., 4.]);
    }

    #[test]
    fn binarize_only_touches_target() {
        let augmenter = Augmenter::new(AugmentationConfig::new().with_binarize_mask(true));
        let mut input = grid(vec![0.2, 0.7, 0.4, 0.9]);
        let mut target = grid(vec![0.2, 0.7, 0.4, 0.9]);
        let mut rng = StdRng::seed_from_u64(0);

        augmenter.apply(&mut input, Some(&mut target), &mut rng);

        assert_eq!(input.data, vec![0.2, 0.7, 0.4, 0.9]);
        assert_eq!(target.data, vec![0., 1., 0., 1.]);
    }

    #[test]
    fn geometric_ops_keep_input_and_target_aligned() {
        let augmenter = Augmenter::new(
            AugmentationConfig::new()
                .with_horizontal_flip(true)
                .with_vertical_flip(true)
                .with_rotate_90(true),
        );
        let mut rng = StdRng::seed_from_u64(9);

        for _ in 0..16 {
            let mut input = grid(vec![1., 2., 3., 4.]);
            let mut target = grid(vec![1., 2., 3., 4.]);
            augmenter.apply(&mut input, Some(&mut target), &mut rng);
            assert_eq!(input, target);
        }
    }
}
