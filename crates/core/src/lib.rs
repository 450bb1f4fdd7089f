//! Core domain types and shared logic for depot.
//!
//! This crate defines the data model used across all other crates:
//! - Upload session identifiers and progress records
//! - Transfer lifecycle states
//! - Client-declared file names and their download encodings
//! - Application configuration

pub mod config;
pub mod error;
pub mod file_name;
pub mod upload;

pub use error::{Error, Result};
pub use file_name::DeclaredName;
pub use upload::{Progress, SessionId, TransferState};

/// Default read chunk size for the transfer loop: 1 MiB
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024 * 1024;

/// Default maximum declared upload size: 20 GiB
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 20 * 1024 * 1024 * 1024;

/// Default grace period before an unclaimed session is evicted.
pub const DEFAULT_SESSION_GRACE_SECS: u64 = 10;
