//! Transfer loop: moves one request body into a staged file.

use crate::metrics;
use crate::sessions::UploadSession;
use crate::transaction::{StageError, StagedFile};
use depot_core::TransferState;
use depot_metadata::MetadataStore;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Transfer errors. The staged file has been rolled back when one is returned.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("failed to read upload body: {0}")]
    Read(#[source] std::io::Error),

    #[error("upload exceeds the maximum size of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error(transparent)]
    Stage(#[from] StageError),
}

/// Limits applied while streaming.
#[derive(Clone, Copy, Debug)]
pub struct TransferLimits {
    /// Size of each read from the body.
    pub chunk_size: usize,
    /// Hard cap on the number of bytes accepted.
    pub max_bytes: u64,
}

/// Result of a committed transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommittedFile {
    pub file_id: i64,
    pub bytes: u64,
}

/// Stream `reader` into `staged`, then commit.
///
/// Every chunk is written before it is counted in the session's
/// progress. End of stream marks the session completed before the
/// commit runs. Any failure cancels the staged file before returning.
#[tracing::instrument(skip_all, fields(upload_id = %session.id(), name = %staged.declared_name()))]
pub async fn run_transfer<R>(
    mut reader: R,
    mut staged: StagedFile,
    session: &UploadSession,
    metadata: &dyn MetadataStore,
    limits: TransferLimits,
) -> Result<CommittedFile, TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; limits.chunk_size.max(1)];
    let mut state = TransferState::Started;
    tracing::debug!(%state, chunk_size = limits.chunk_size, "Transfer started");

    let outcome = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(TransferError::Read(e)),
        };

        if staged.bytes_written() + n as u64 > limits.max_bytes {
            break Err(TransferError::TooLarge {
                limit: limits.max_bytes,
            });
        }

        if let Err(e) = staged.write(&buf[..n]).await {
            break Err(e.into());
        }
        session.record_bytes(n as u64);
        metrics::BYTES_UPLOADED.inc_by(n as u64);
    };

    let result = match outcome {
        Ok(()) => {
            state = TransferState::Completed;
            session.mark_completed();
            tracing::debug!(%state, bytes = staged.bytes_written(), "End of stream reached");
            staged.commit(metadata).await.map_err(TransferError::from)
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(file_id) => {
            state = TransferState::Committed;
            tracing::debug!(%state, file_id, "Transfer finished");
            Ok(CommittedFile {
                file_id,
                bytes: staged.bytes_written(),
            })
        }
        Err(e) => {
            tracing::debug!(state = %TransferState::Failed, error = %e, "Transfer failed, rolling back");
            if let Err(cancel_err) = staged.cancel().await {
                tracing::warn!(error = %cancel_err, "Rollback refused");
            }
            state = TransferState::Cancelled;
            tracing::debug!(%state, "Transfer rolled back");
            Err(e)
        }
    }
}
