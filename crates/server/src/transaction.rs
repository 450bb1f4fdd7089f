//! Staged file transaction.
//!
//! Couples a private temporary file with a prepared-but-unexecuted
//! metadata insert. Commit executes the insert to obtain the file id and
//! then renames the temporary file to that id. Cancel undoes whatever
//! has happened so far. The record is written before the rename, so a
//! failed rename leaves an orphan record that is reported as
//! [`StageError::PartialCommit`].

use crate::metrics;
use depot_core::DeclaredName;
use depot_metadata::{MetadataError, MetadataStore, PendingInsert};
use depot_storage::{BlobStore, StagedBlob, StorageError};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;

/// Staged transaction errors.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("staging storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("staging metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// The record for `file_id` exists but the blob was not moved into place.
    #[error("file {file_id} recorded but its content could not be committed: {source}")]
    PartialCommit {
        file_id: i64,
        #[source]
        source: StorageError,
    },

    #[error("staged file was already {0}")]
    AlreadyFinalized(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Open,
    Committed,
    Failed,
    Cancelled,
}

impl Phase {
    fn describe(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One upload's staged content and pending record.
pub struct StagedFile {
    declared_name: DeclaredName,
    blob: Option<Box<dyn StagedBlob>>,
    pending: Option<PendingInsert>,
    assigned_id: Option<i64>,
    written: u64,
    phase: Phase,
    storage: Arc<dyn BlobStore>,
}

impl StagedFile {
    /// Allocate a staging file and prepare the insert for `declared_name`.
    ///
    /// Nothing is visible to readers until [`commit`](Self::commit).
    #[tracing::instrument(skip_all, fields(name = %declared_name))]
    pub async fn prepare(
        declared_name: DeclaredName,
        metadata: &dyn MetadataStore,
        storage: Arc<dyn BlobStore>,
    ) -> Result<Self, StageError> {
        let blob = storage.stage().await?;
        let pending = match metadata
            .prepare_insert(declared_name.as_str(), OffsetDateTime::now_utc())
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                if let Err(discard_err) = blob.discard().await {
                    tracing::warn!(error = %discard_err, "Failed to discard staging file after prepare error");
                }
                return Err(e.into());
            }
        };

        Ok(Self {
            declared_name,
            blob: Some(blob),
            pending: Some(pending),
            assigned_id: None,
            written: 0,
            phase: Phase::Open,
            storage,
        })
    }

    pub fn declared_name(&self) -> &DeclaredName {
        &self.declared_name
    }

    /// Bytes appended so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Id assigned by the insert, once commit got that far.
    pub fn file_id(&self) -> Option<i64> {
        self.assigned_id
    }

    /// Append bytes to the staging file.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, StageError> {
        self.ensure_open()?;
        let blob = self
            .blob
            .as_mut()
            .ok_or(StageError::AlreadyFinalized("closed"))?;
        match blob.write(data).await {
            Ok(n) => {
                self.written += n as u64;
                Ok(n)
            }
            Err(e) => {
                self.phase = Phase::Failed;
                Err(e.into())
            }
        }
    }

    /// Execute the insert, then move the staging file to its final key.
    ///
    /// At most one commit can succeed.
    #[tracing::instrument(skip(self, metadata), fields(name = %self.declared_name))]
    pub async fn commit(&mut self, metadata: &dyn MetadataStore) -> Result<i64, StageError> {
        self.ensure_open()?;
        let started = Instant::now();

        let (Some(pending), Some(blob)) = (self.pending.take(), self.blob.as_mut()) else {
            self.phase = Phase::Failed;
            return Err(StageError::AlreadyFinalized("closed"));
        };

        let file_id = match metadata.execute_insert(pending).await {
            Ok(id) => id,
            Err(e) => {
                self.phase = Phase::Failed;
                return Err(e.into());
            }
        };
        self.assigned_id = Some(file_id);

        let size = match blob.persist(&file_id.to_string()).await {
            Ok(size) => size,
            Err(source) => {
                self.phase = Phase::Failed;
                metrics::ORPHAN_RECORDS.inc();
                tracing::error!(
                    file_id,
                    error = %source,
                    "File record written but content rename failed, record is orphaned"
                );
                return Err(StageError::PartialCommit { file_id, source });
            }
        };

        // The staging file is gone after a successful rename.
        self.blob = None;
        self.phase = Phase::Committed;
        metrics::UPLOADS_COMMITTED.inc();
        metrics::UPLOAD_COMMIT_DURATION.observe(started.elapsed().as_secs_f64());
        tracing::info!(file_id, bytes = size, "Upload committed");
        Ok(file_id)
    }

    /// Roll back everything this transaction did.
    ///
    /// Cleanup is best effort: problems are logged, not returned. The only
    /// error is cancelling a transaction that already committed, which
    /// leaves it untouched.
    #[tracing::instrument(skip(self), fields(name = %self.declared_name))]
    pub async fn cancel(mut self) -> Result<(), StageError> {
        if self.phase == Phase::Committed {
            return Err(StageError::AlreadyFinalized(Phase::Committed.describe()));
        }
        self.phase = Phase::Cancelled;
        // Dropping the pending insert discards it.
        self.pending.take();

        if let Some(blob) = self.blob.take()
            && let Err(e) = blob.discard().await
        {
            tracing::warn!(error = %e, "Failed to remove staging file during rollback");
        }

        // A final blob can only exist if the rename got through.
        if let Some(file_id) = self.assigned_id {
            match self.storage.delete(&file_id.to_string()).await {
                Ok(()) => tracing::debug!(file_id, "Removed committed blob during rollback"),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::warn!(file_id, error = %e, "Failed to remove blob during rollback")
                }
            }
        }

        metrics::UPLOADS_CANCELLED.inc();
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StageError> {
        match self.phase {
            Phase::Open => Ok(()),
            other => Err(StageError::AlreadyFinalized(other.describe())),
        }
    }
}

impl std::fmt::Debug for StagedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedFile")
            .field("declared_name", &self.declared_name)
            .field("phase", &self.phase)
            .field("assigned_id", &self.assigned_id)
            .finish_non_exhaustive()
    }
}
