//! Application state shared across handlers.

use crate::sessions::SessionRegistry;
use crate::transfer::TransferLimits;
use depot_core::config::AppConfig;
use depot_metadata::MetadataStore;
use depot_storage::BlobStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Blob storage backend.
    pub storage: Arc<dyn BlobStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Live upload sessions.
    pub sessions: SessionRegistry,
}

impl AppState {
    /// Create new application state with a fresh session registry.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let sessions = SessionRegistry::new(config.server.session_grace());
        Self::with_sessions(config, storage, metadata, sessions)
    }

    /// Create application state around an existing registry.
    pub fn with_sessions(
        config: AppConfig,
        storage: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        sessions: SessionRegistry,
    ) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            metadata,
            sessions,
        }
    }

    /// Streaming limits derived from the server config.
    pub fn transfer_limits(&self) -> TransferLimits {
        TransferLimits {
            chunk_size: self.config.server.read_chunk_size,
            max_bytes: self.config.server.max_upload_size,
        }
    }

    /// Clamp a requested listing size to the configured limit.
    pub fn listing_limit(&self, requested: Option<u32>) -> u32 {
        let max = self.config.server.listing_limit;
        requested.map_or(max, |n| n.clamp(1, max))
    }
}
