//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobStore, ByteStream, ObjectMeta, StagedBlob};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tempfile::TempPath;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// Default chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Name prefix of staging files, used to recognise leftovers.
const STAGING_PREFIX: &str = ".upload-";

/// Local filesystem blob store.
///
/// Committed blobs live flat under `<root>/files/<key>`. Staging files
/// live in a separate directory which must be on the same filesystem,
/// otherwise the commit rename fails with a cross-device error.
pub struct FilesystemBackend {
    files_dir: PathBuf,
    staging_dir: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`.
    ///
    /// Staging defaults to `<root>/staging`.
    pub async fn new(root: impl AsRef<Path>, staging: Option<&Path>) -> StorageResult<Self> {
        let root = root.as_ref();
        let files_dir = root.join("files");
        let staging_dir = staging
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.join("staging"));

        fs::create_dir_all(&files_dir).await?;
        fs::create_dir_all(&staging_dir).await?;

        Ok(Self {
            files_dir,
            staging_dir,
        })
    }

    /// Directory holding committed blobs.
    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// Directory holding in-flight staging files.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Resolve a key to its final path.
    ///
    /// Keys are a single normal path component; anything that could
    /// address a different directory is rejected.
    fn key_path(files_dir: &Path, key: &str) -> StorageResult<PathBuf> {
        let mut components = Path::new(key).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !key.contains(['/', '\\']) => {
                Ok(files_dir.join(key))
            }
            _ => Err(StorageError::InvalidKey(format!(
                "key must be a single path component: {key:?}"
            ))),
        }
    }

    fn not_found_or_io(key: &str, e: std::io::Error) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

async fn check_dir(path: &Path, what: &str) -> StorageResult<std::fs::Metadata> {
    let metadata = fs::metadata(path).await.map_err(|e| {
        StorageError::Io(std::io::Error::new(
            e.kind(),
            format!("{what} not accessible: {e}"),
        ))
    })?;

    if !metadata.is_dir() {
        return Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::NotADirectory,
            format!("{what} is not a directory: {}", path.display()),
        )));
    }
    Ok(metadata)
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn stage(&self) -> StorageResult<Box<dyn StagedBlob>> {
        let staging_dir = self.staging_dir.clone();
        let named = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .suffix(".part")
                .tempfile_in(&staging_dir)
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))??;

        let (file, temp) = named.into_parts();
        tracing::debug!(path = %temp.display(), "Staged upload file");

        Ok(Box::new(FilesystemStagedBlob {
            file: Some(fs::File::from_std(file)),
            temp: Some(temp),
            files_dir: self.files_dir.clone(),
            bytes_written: 0,
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = Self::key_path(&self.files_dir, key)?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = Self::key_path(&self.files_dir, key)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| Self::not_found_or_io(key, e))?;

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = Self::key_path(&self.files_dir, key)?;
        let data = fs::read(&path)
            .await
            .map_err(|e| Self::not_found_or_io(key, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let path = Self::key_path(&self.files_dir, key)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| Self::not_found_or_io(key, e))?;

        // Stream the file in chunks instead of loading entirely into memory
        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = Self::key_path(&self.files_dir, key)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| Self::not_found_or_io(key, e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn sweep_staging(&self) -> StorageResult<u64> {
        let mut removed = 0u64;
        let mut entries = fs::read_dir(&self.staging_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            // Leave anything we did not create alone.
            if !name.to_string_lossy().starts_with(STAGING_PREFIX) {
                continue;
            }
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }

        if removed > 0 {
            tracing::info!(removed, dir = %self.staging_dir.display(), "Removed stale staging files");
        }
        Ok(removed)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let files_meta = check_dir(&self.files_dir, "files directory").await?;
        let staging_meta = check_dir(&self.staging_dir, "staging directory").await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            if files_meta.dev() != staging_meta.dev() {
                tracing::warn!(
                    files_dir = %self.files_dir.display(),
                    staging_dir = %self.staging_dir.display(),
                    "Staging and files directories are on different filesystems; commits will fail"
                );
            }
        }
        #[cfg(not(unix))]
        let _ = (files_meta, staging_meta);

        Ok(())
    }
}

/// A staging file owned by one upload.
///
/// `temp` deletes the file when dropped, so an abandoned upload never
/// leaves its staging file behind.
struct FilesystemStagedBlob {
    file: Option<fs::File>,
    temp: Option<TempPath>,
    files_dir: PathBuf,
    bytes_written: u64,
}

#[async_trait]
impl StagedBlob for FilesystemStagedBlob {
    async fn write(&mut self, data: &[u8]) -> StorageResult<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or(StorageError::Finalized("write after close"))?;
        file.write_all(data).await?;
        self.bytes_written += data.len() as u64;
        Ok(data.len())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    async fn persist(&mut self, key: &str) -> StorageResult<u64> {
        let final_path = FilesystemBackend::key_path(&self.files_dir, key)?;
        if self.temp.is_none() {
            return Err(StorageError::Finalized("persist after persist or discard"));
        }

        // Ensure all data is on disk before the rename makes it visible
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }

        let Some(temp) = self.temp.take() else {
            return Err(StorageError::Finalized("persist after persist or discard"));
        };
        let result = tokio::task::spawn_blocking(move || temp.persist(&final_path))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?;

        match result {
            Ok(()) => Ok(self.bytes_written),
            Err(err) => {
                // Keep ownership so the caller can still discard it.
                self.temp = Some(err.path);
                Err(StorageError::Io(err.error))
            }
        }
    }

    async fn discard(mut self: Box<Self>) -> StorageResult<()> {
        drop(self.file.take());
        let Some(temp) = self.temp.take() else {
            return Ok(());
        };

        let result = tokio::task::spawn_blocking(move || temp.close())
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
