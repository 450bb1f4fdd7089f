//! Blob storage abstraction and backends for depot.
//!
//! This crate provides:
//! - Staged writes into private temporary files
//! - Atomic promotion of a staged file to its final key
//! - Streaming reads of committed blobs
//! - Backend: local filesystem

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::{BlobStore, ByteStream, ObjectMeta, StagedBlob};

use depot_core::config::StorageConfig;
use std::sync::Arc;

/// Create a blob store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path, staging_path } => {
            let backend = FilesystemBackend::new(path, staging_path.as_deref()).await?;
            Ok(Arc::new(backend))
        }
    }
}
