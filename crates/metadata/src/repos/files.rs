//! File record repository.

use crate::error::MetadataResult;
use crate::models::{FileRow, PendingInsert};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for committed file records.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Validate an insert for `name` posted at `posted_at` without executing it.
    ///
    /// Fails if the statement cannot be prepared against the live schema.
    async fn prepare_insert(
        &self,
        name: &str,
        posted_at: OffsetDateTime,
    ) -> MetadataResult<PendingInsert>;

    /// Execute a prepared insert and return the generated id.
    async fn execute_insert(&self, pending: PendingInsert) -> MetadataResult<i64>;

    /// Get a file record by id.
    async fn get_file(&self, id: i64) -> MetadataResult<Option<FileRow>>;

    /// The `limit` lowest ids greater than `after_id`, returned newest id first.
    ///
    /// Paging forward from the highest id of each page visits every record.
    async fn files_since_id(&self, after_id: i64, limit: u32) -> MetadataResult<Vec<FileRow>>;

    /// Records posted strictly after `after_unix_secs`, most recent first.
    async fn files_since_time(
        &self,
        after_unix_secs: i64,
        limit: u32,
    ) -> MetadataResult<Vec<FileRow>>;

    /// Total number of records. Used by tests and diagnostics.
    async fn count_files(&self) -> MetadataResult<u64>;
}
