//! Collaborators around the pipeline: fetching, storage and local files

pub mod fetch;
pub mod storage;
pub mod workspace;

pub use fetch::ImageFetcher;
#[cfg(feature = "s3")]
pub use storage::S3Store;
pub use storage::{ObjectStore, PNG_CONTENT_TYPE};
