//! HTTP server for depot.
//!
//! This crate provides the upload lifecycle coordinator and its HTTP surface:
//! - Upload session registry with idle-timeout eviction
//! - Staged file transactions (prepare, commit, cancel)
//! - Streaming transfer of multipart bodies into staged files
//! - File download and listing endpoints

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod sessions;
pub mod state;
pub mod transaction;
pub mod transfer;

pub use error::ApiError;
pub use routes::create_router;
pub use sessions::{SessionError, SessionRegistry, UploadSession};
pub use state::AppState;
pub use transaction::{StageError, StagedFile};
pub use transfer::{CommittedFile, TransferError, TransferLimits, run_transfer};
