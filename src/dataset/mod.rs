pub mod augment;
pub mod classification;
pub mod generator;
pub mod io;
pub mod layout;
pub mod probe;
pub mod segmentation;
pub mod split;

pub use augment::Augmenter;
pub use generator::{Batch, BatchFeed, HostBatch, PREFETCH_CAPACITY, Prefetcher, SampleLoader};
pub use layout::DatasetLayout;
pub use probe::{DatasetDescriptor, DatasetProber};
pub use split::{SplitManifest, SplitPlanner};
