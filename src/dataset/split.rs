use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::dataset::layout::list_image_files;
use crate::error::Result;

pub const TRAIN_FRACTION: f64 = 0.8;

/// Training/validation partition of the available training files.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitManifest {
    pub train_files: Vec<String>,
    pub val_files: Vec<String>,
    pub steps_per_epoch: usize,
}

impl SplitManifest {
    pub fn validation_steps(&self, batch_size: usize) -> usize {
        steps_for(self.val_files.len(), batch_size)
    }
}

/// Number of full batches in `count` files.
pub fn steps_for(count: usize, batch_size: usize) -> usize {
    if batch_size == 0 { 0 } else { count / batch_size }
}

/// Partitions training filenames 80/20 with a seeded shuffle.
///
/// Files are sorted before shuffling, so the same seed over the same folder
/// always produces the same manifest.
pub struct SplitPlanner {
    seed: u64,
    batch_size: usize,
}

impl SplitPlanner {
    pub fn new(seed: u64, batch_size: usize) -> Self {
        Self { seed, batch_size }
    }

    pub fn plan(&self, images_dir: &Path) -> Result<SplitManifest> {
        let files = list_image_files(images_dir)?;
        Ok(self.split(files))
    }

    pub fn split(&self, mut files: Vec<String>) -> SplitManifest {
        files.sort();
        let mut rng = StdRng::seed_from_u64(self.seed);
        files.shuffle(&mut rng);

        let total = files.len();
        let split_at = ((total as f64) * TRAIN_FRACTION).round() as usize;
        let val_files = files.split_off(split_at.min(total));

        let steps_per_epoch = steps_for(files.len(), self.batch_size);

        tracing::info!(
            "Dataset split: {} training, {} validation files",
            files.len(),
            val_files.len()
        );
        tracing::info!("Making: {} steps per Epoch", steps_per_epoch);

        SplitManifest {
            train_files: files,
            val_files,
            steps_per_epoch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("img_{i:03}.png")).collect()
    }

    #[test]
    fn hundred_files_batch_four() {
        let manifest = SplitPlanner::new(1, 4).split(names(100));

        assert_eq!(manifest.train_files.len(), 80);
        assert_eq!(manifest.val_files.len(), 20);
        assert_eq!(manifest.steps_per_epoch, 20);
        assert_eq!(manifest.validation_steps(4), 5);
    }

    #[test]
    fn steps_per_epoch_is_floor_of_train_over_batch() {
        for (count, batch) in [(10, 3), (7, 2), (1, 4), (33, 5)] {
            let manifest = SplitPlanner::new(7, batch).split(names(count));
            assert_eq!(manifest.steps_per_epoch, manifest.train_files.len() / batch);
        }
    }

    #[test]
    fn hundred_train_files_give_twenty_five_steps() {
        assert_eq!(steps_for(100, 4), 25);
    }

    #[test]
    fn empty_training_set_has_zero_steps() {
        let manifest = SplitPlanner::new(1, 2).split(Vec::new());

        assert!(manifest.train_files.is_empty());
        assert!(manifest.val_files.is_empty());
        assert_eq!(manifest.steps_per_epoch, 0);
    }

    #[test]
    fn split_is_stable_and_independent_of_listing_order() {
        let planner = SplitPlanner::new(42, 2);
        let mut reversed = names(25);
        reversed.reverse();

        let first = planner.split(names(25));
        let second = planner.split(reversed);

        assert_eq!(first, second);
    }

    #[test]
    fn no_file_is_lost_or_duplicated() {
        let manifest = SplitPlanner::new(3, 2).split(names(37));
        let mut all: Vec<_> = manifest
            .train_files
            .iter()
            .chain(manifest.val_files.iter())
            .cloned()
            .collect();
        all.sort();

        assert_eq!(all, names(37));
    }
}
