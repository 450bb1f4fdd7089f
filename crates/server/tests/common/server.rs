//! Server test utilities.

use depot_core::config::{AppConfig, MetadataConfig, StorageConfig};
use depot_metadata::{MetadataStore, SqliteStore};
use depot_server::{AppState, create_router};
use depot_storage::{BlobStore, FilesystemBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub staging_dir: PathBuf,
    pub files_dir: PathBuf,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::build(|_| {}, |backend| backend).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, |backend| backend).await
    }

    /// Create a test server whose blob store wraps the filesystem backend.
    pub async fn with_storage<W>(wrap: W) -> Self
    where
        W: FnOnce(Arc<FilesystemBackend>) -> Arc<dyn BlobStore>,
    {
        Self::build(|_| {}, wrap).await
    }

    async fn build<F, W>(modifier: F, wrap: W) -> Self
    where
        F: FnOnce(&mut AppConfig),
        W: FnOnce(Arc<FilesystemBackend>) -> Arc<dyn BlobStore>,
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        let backend = Arc::new(
            FilesystemBackend::new(&storage_path, None)
                .await
                .expect("Failed to create storage backend"),
        );
        let staging_dir = backend.staging_dir().to_path_buf();
        let files_dir = backend.files_dir().to_path_buf();
        let storage = wrap(backend);

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig {
            server: Default::default(),
            storage: StorageConfig::Filesystem {
                path: storage_path,
                staging_path: None,
            },
            metadata: MetadataConfig::Sqlite {
                path: db_path,
                query_timeout_secs: None,
            },
        };
        modifier(&mut config);

        let state = AppState::new(config, storage, metadata);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            staging_dir,
            files_dir,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }
}
