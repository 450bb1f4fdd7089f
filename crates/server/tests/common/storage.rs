//! Storage test doubles.

use async_trait::async_trait;
use depot_storage::{
    BlobStore, ByteStream, FilesystemBackend, ObjectMeta, StagedBlob, StorageError, StorageResult,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Filesystem store whose staged blobs can be made to fail the final rename.
///
/// Everything else passes through to the wrapped backend, so staging
/// files are real and the test can watch them come and go.
#[allow(dead_code)]
pub struct FailingRenameStore {
    inner: Arc<FilesystemBackend>,
    fail_persist: Arc<AtomicBool>,
}

#[allow(dead_code)]
impl FailingRenameStore {
    pub fn new(inner: Arc<FilesystemBackend>) -> Self {
        Self {
            inner,
            fail_persist: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Toggle whether subsequent renames fail.
    pub fn set_failing(&self, failing: bool) {
        self.fail_persist.store(failing, Ordering::SeqCst);
    }
}

#[allow(dead_code)]
struct FailingRenameBlob {
    inner: Box<dyn StagedBlob>,
    fail_persist: Arc<AtomicBool>,
}

#[async_trait]
impl StagedBlob for FailingRenameBlob {
    async fn write(&mut self, data: &[u8]) -> StorageResult<usize> {
        self.inner.write(data).await
    }

    fn bytes_written(&self) -> u64 {
        self.inner.bytes_written()
    }

    async fn persist(&mut self, key: &str) -> StorageResult<u64> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other(format!(
                "injected rename failure for {key}"
            ))));
        }
        self.inner.persist(key).await
    }

    async fn discard(self: Box<Self>) -> StorageResult<()> {
        self.inner.discard().await
    }
}

#[async_trait]
impl BlobStore for FailingRenameStore {
    async fn stage(&self) -> StorageResult<Box<dyn StagedBlob>> {
        let inner = self.inner.stage().await?;
        Ok(Box::new(FailingRenameBlob {
            inner,
            fail_persist: self.fail_persist.clone(),
        }))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<bytes::Bytes> {
        self.inner.get(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_stream(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn sweep_staging(&self) -> StorageResult<u64> {
        self.inner.sweep_staging().await
    }

    fn backend_name(&self) -> &'static str {
        "failing-rename"
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}
