pub mod autoretrieves;
pub mod objects;
pub mod published_batches;

pub use autoretrieves::AutoretrieveRow;
pub use published_batches::PublishedBatchRow;
