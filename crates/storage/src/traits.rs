//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Metadata about a stored blob.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Blob size in bytes.
    pub size: u64,
    /// Last modification time (if available). Informational; downloads
    /// only need the size.
    pub last_modified: Option<time::OffsetDateTime>,
}

/// Blob store for committed files.
///
/// Final blobs are addressed by key. New content always enters through
/// [`BlobStore::stage`], which hands out a private temporary file that
/// only becomes visible under a key once it is persisted.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Allocate a fresh staging file on the same volume as final blobs.
    async fn stage(&self) -> StorageResult<Box<dyn StagedBlob>>;

    /// Check if a blob exists. Used by tests and diagnostics; the
    /// server addresses blobs through the metadata record.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get a blob's size without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get a blob's content in one buffer. Downloads stream through
    /// [`BlobStore::get_stream`]; this is for tests and small reads.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Get a blob as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Delete a blob. Returns `NotFound` if it does not exist.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Remove staging files left behind by a previous process.
    ///
    /// Only safe to call before any upload is staged.
    async fn sweep_staging(&self) -> StorageResult<u64>;

    /// Get the backend name (for logging/metrics).
    fn backend_name(&self) -> &'static str;

    /// Check storage availability.
    async fn health_check(&self) -> StorageResult<()>;
}

/// An exclusively owned temporary file awaiting commit.
///
/// Exactly one of [`persist`](StagedBlob::persist) or
/// [`discard`](StagedBlob::discard) should finish it. Dropping an
/// unfinished blob removes its temporary file.
#[async_trait]
pub trait StagedBlob: Send {
    /// Append data, returning the number of bytes written.
    async fn write(&mut self, data: &[u8]) -> StorageResult<usize>;

    /// Total bytes written so far.
    fn bytes_written(&self) -> u64;

    /// Flush, sync, close, and atomically rename to the final `key`.
    ///
    /// On failure the temporary file is kept so it can still be discarded.
    async fn persist(&mut self, key: &str) -> StorageResult<u64>;

    /// Close and delete the temporary file. Succeeds if it is already gone
    /// or the blob was persisted.
    async fn discard(self: Box<Self>) -> StorageResult<()>;
}
