//! Lazy, restartable batch feeds and the bounded prefetch queue feeding the training loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use burn::prelude::*;
use crossbeam_channel::{Receiver, bounded};
use derive_new::new;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::dataset::augment::Augmenter;
use crate::dataset::io::{VoxelGrid, import_image};
use crate::error::{PipelineError, Result};

/// Capacity of the prefetch queue between loader thread and training loop.
pub const PREFETCH_CAPACITY: usize = 50;

/// Label of one example.
#[derive(Clone, Debug)]
pub enum Target {
    /// Per-voxel ground truth, augmented together with the input.
    Dense(VoxelGrid),
    /// One-hot class vector.
    Class(Vec<f32>),
}

impl Target {
    pub fn len(&self) -> usize {
        match self {
            Target::Dense(grid) => grid.len(),
            Target::Class(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_values(self) -> Vec<f32> {
        match self {
            Target::Dense(grid) => grid.data,
            Target::Class(values) => values,
        }
    }
}

/// One loaded training example.
#[derive(Clone, Debug)]
pub struct Sample {
    pub input: VoxelGrid,
    pub target: Target,
}

/// Produces samples by file name. Implemented once per task family.
pub trait SampleLoader: Send + Sync {
    fn load(&self, file: &str) -> Result<Sample>;

    /// Flattened length of one target.
    fn target_len(&self) -> usize;
}

/// Reads every modality of one file, resizes it to the training shape and stacks the channels.
#[derive(Clone, Debug, new)]
pub struct InputReader {
    root: PathBuf,
    modalities: Vec<String>,
    spatial: Vec<usize>,
    channels: usize,
}

impl InputReader {
    pub fn read(&self, file: &str) -> Result<VoxelGrid> {
        let mut grids = Vec::with_capacity(self.modalities.len());
        for modality in &self.modalities {
            let image = import_image(&self.root.join(modality).join(file))?
                .with_channels(self.channels)?
                .resize(&self.spatial)?;
            grids.push(image.to_grid());
        }

        VoxelGrid::stack_channels(grids)
    }
}

/// Host-side batch assembled off the training thread.
#[derive(Clone, Debug)]
pub struct HostBatch {
    pub inputs: Vec<f32>,
    pub input_shape: [usize; 5],
    pub targets: Vec<f32>,
    pub target_shape: [usize; 2],
}

/// Device-side batch. Inputs are `[batch, channels, depth, height, width]`,
/// targets are flattened per sample.
#[derive(Clone, Debug)]
pub struct Batch<B: Backend> {
    pub inputs: Tensor<B, 5>,
    pub targets: Tensor<B, 2>,
}

impl HostBatch {
    pub fn from_samples(samples: Vec<Sample>) -> Result<Self> {
        let first = samples
            .first()
            .ok_or_else(|| PipelineError::missing("Cannot assemble an empty batch"))?;
        let [c, d, h, w] = first.input.shape;
        let target_len = first.target.len();
        let batch_size = samples.len();

        let mut inputs = Vec::with_capacity(batch_size * first.input.len());
        let mut targets = Vec::with_capacity(batch_size * target_len);
        for sample in samples {
            if sample.input.shape != [c, d, h, w] || sample.target.len() != target_len {
                return Err(PipelineError::ShapeMismatch(format!(
                    "Sample shape {:?} differs from batch shape {:?}",
                    sample.input.shape,
                    [c, d, h, w]
                )));
            }
            inputs.extend(sample.input.data);
            targets.extend(sample.target.into_values());
        }

        Ok(Self {
            inputs,
            input_shape: [batch_size, c, d, h, w],
            targets,
            target_shape: [batch_size, target_len],
        })
    }

    pub fn to_batch<B: Backend>(self, device: &B::Device) -> Batch<B> {
        let inputs = Tensor::<B, 5>::from_data(
            TensorData::new(self.inputs, self.input_shape).convert::<B::FloatElem>(),
            device,
        );
        let targets = Tensor::<B, 2>::from_data(
            TensorData::new(self.targets, self.target_shape).convert::<B::FloatElem>(),
            device,
        );

        Batch { inputs, targets }
    }
}

/// An infinite stream of batches over a fixed file list.
///
/// Every call to [`BatchFeed::iter`] restarts from the same seed, so a feed
/// replays identically. Files are re-shuffled at the start of each pass.
#[derive(Clone)]
pub struct BatchFeed {
    loader: Arc<dyn SampleLoader>,
    files: Vec<String>,
    batch_size: usize,
    augmenter: Augmenter,
    seed: u64,
}

impl BatchFeed {
    pub fn new(
        loader: Arc<dyn SampleLoader>,
        files: Vec<String>,
        batch_size: usize,
        augmenter: Augmenter,
        seed: u64,
    ) -> Self {
        Self {
            loader,
            files,
            batch_size,
            augmenter,
            seed,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn target_len(&self) -> usize {
        self.loader.target_len()
    }

    pub fn iter(&self) -> FeedIter {
        FeedIter {
            feed: self.clone(),
            order: Vec::new(),
            cursor: 0,
            rng: StdRng::seed_from_u64(self.seed),
        }
    }

    /// Move batch assembly onto a worker thread behind a bounded queue.
    pub fn prefetch(&self, capacity: usize) -> Result<Prefetcher> {
        Prefetcher::spawn(self.clone(), capacity)
    }
}

pub struct FeedIter {
    feed: BatchFeed,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl FeedIter {
    fn next_file(&mut self) -> &str {
        if self.cursor >= self.order.len() {
            self.order = (0..self.feed.files.len()).collect();
            self.order.shuffle(&mut self.rng);
            self.cursor = 0;
        }

        let index = self.order[self.cursor];
        self.cursor += 1;
        &self.feed.files[index]
    }

    fn next_batch(&mut self) -> Result<HostBatch> {
        if self.feed.files.is_empty() {
            return Err(PipelineError::missing("Batch feed has no files"));
        }

        let mut samples = Vec::with_capacity(self.feed.batch_size);
        for _ in 0..self.feed.batch_size {
            let file = self.next_file().to_string();
            let Sample { mut input, mut target } = self.feed.loader.load(&file)?;
            let dense = match &mut target {
                Target::Dense(grid) => Some(grid),
                Target::Class(_) => None,
            };
            self.feed.augmenter.apply(&mut input, dense, &mut self.rng);
            samples.push(Sample { input, target });
        }

        HostBatch::from_samples(samples)
    }
}

impl Iterator for FeedIter {
    type Item = Result<HostBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}

/// Receiving end of a prefetching worker. Dropping it stops the worker on its next send.
pub struct Prefetcher {
    receiver: Receiver<Result<HostBatch>>,
}

impl Prefetcher {
    pub fn spawn(feed: BatchFeed, capacity: usize) -> Result<Self> {
        let (sender, receiver) = bounded(capacity.max(1));

        thread::Builder::new()
            .name("batch-prefetch".to_string())
            .spawn(move || {
                for batch in feed.iter() {
                    let failed = batch.is_err();
                    if sender.send(batch).is_err() || failed {
                        break;
                    }
                }
            })
            .map_err(|e| PipelineError::io("batch-prefetch", e))?;

        Ok(Self { receiver })
    }

    pub fn next_batch(&self) -> Result<HostBatch> {
        self.receiver
            .recv()
            .map_err(|_| PipelineError::PrefetchStopped)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AugmentationConfig;

    /// Input filled with the file index, target is the index as a class.
    struct IndexLoader;

    impl SampleLoader for IndexLoader {
        fn load(&self, file: &str) -> Result<Sample> {
            let index: f32 = file
                .parse()
                .map_err(|_| PipelineError::missing(format!("bad file {file}")))?;
            Ok(Sample {
                input: VoxelGrid {
                    shape: [1, 1, 2, 2],
                    data: vec![index; 4],
                },
                target: Target::Class(vec![index]),
            })
        }

        fn target_len(&self) -> usize {
            1
        }
    }

    fn feed(files: &[&str]) -> BatchFeed {
        BatchFeed::new(
            Arc::new(IndexLoader),
            files.iter().map(|f| f.to_string()).collect(),
            2,
            Augmenter::new(AugmentationConfig::new()),
            7,
        )
    }

    #[test]
    fn every_file_is_seen_once_per_pass() {
        let feed = feed(&["0", "1", "2", "3"]);
        let mut seen: Vec<f32> = feed
            .iter()
            .take(2)
            .flat_map(|batch| batch.unwrap().targets)
            .collect();
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());

        assert_eq!(seen, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn restarted_feed_replays_the_same_batches() {
        let feed = feed(&["0", "1", "2", "3", "4"]);
        let first: Vec<Vec<f32>> = feed.iter().take(5).map(|b| b.unwrap().targets).collect();
        let second: Vec<Vec<f32>> = feed.iter().take(5).map(|b| b.unwrap().targets).collect();

        assert_eq!(first, second);
    }

    #[test]
    fn prefetched_batches_match_the_direct_feed() {
        let feed = feed(&["0", "1", "2", "3"]);
        let prefetcher = feed.prefetch(PREFETCH_CAPACITY).unwrap();

        for expected in feed.iter().take(3) {
            let batch = prefetcher.next_batch().unwrap();
            assert_eq!(batch.input_shape, [2, 1, 1, 2, 2]);
            assert_eq!(batch.targets, expected.unwrap().targets);
        }
    }

    #[test]
    fn loader_errors_reach_the_consumer() {
        let feed = feed(&["0", "broken"]);
        let prefetcher = feed.prefetch(4).unwrap();

        let err = prefetcher.next_batch().unwrap_err();
        assert!(matches!(err, PipelineError::MissingData(_)));
        assert!(matches!(
            prefetcher.next_batch().unwrap_err(),
            PipelineError::PrefetchStopped
        ));
    }
}
