//! Metadata store abstraction and implementations for depot.
//!
//! This crate provides the durable record of committed files:
//! - File records keyed by an auto-increment id
//! - Two-step inserts (prepare, then execute at commit time)
//! - Cursor queries by id and by posting time

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{FileRow, PendingInsert};
pub use repos::FileRepo;
pub use store::{MetadataStore, SqliteStore};

use depot_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
