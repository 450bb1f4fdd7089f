//! Upload session types and lifecycle.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

/// Identifier of an in-flight upload session.
///
/// Ids are random, non-zero 64-bit values. On the wire they are always
/// rendered as lowercase hexadecimal, both in responses and in paths.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(NonZeroU64);

impl SessionId {
    /// Wrap a raw value. Returns `None` for zero, which is never a valid id.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Parse the hexadecimal wire form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() || s.len() > 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(crate::Error::InvalidSessionId(s.to_string()));
        }
        let raw = u64::from_str_radix(s, 16)
            .map_err(|e| crate::Error::InvalidSessionId(format!("{s}: {e}")))?;
        Self::new(raw).ok_or_else(|| crate::Error::InvalidSessionId(format!("{s}: zero id")))
    }

    /// Get the raw value.
    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({:x})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Progress of a single upload.
///
/// Mutated only by the transfer that claimed the session, under the
/// session lock. `uploaded` never decreases and nothing changes once
/// `completed` is set, except recording the committed file id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Bytes written to the staged file so far.
    pub uploaded: u64,
    /// Declared content length of the upload request, or -1 when unknown.
    pub total: i64,
    /// Set once a transfer claims the session.
    pub started: bool,
    /// Set once, on clean end of stream.
    pub completed: bool,
    /// Id of the committed file, once known.
    pub file_id: Option<i64>,
}

impl Progress {
    /// A fresh record for a newly created session.
    pub fn new() -> Self {
        Self {
            total: -1,
            ..Self::default()
        }
    }

    /// Record the claim of the session by a transfer.
    pub fn mark_started(&mut self, declared_total: Option<u64>) {
        self.started = true;
        self.total = declared_total
            .and_then(|len| i64::try_from(len).ok())
            .unwrap_or(-1);
    }

    /// Account for bytes written to the staged file.
    pub fn record(&mut self, bytes: u64) {
        if self.completed {
            return;
        }
        self.uploaded = self.uploaded.saturating_add(bytes);
    }

    /// Mark the transfer as having reached end of stream.
    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    /// Lifecycle state as seen by a poller.
    ///
    /// Failed transfers retire their session, so a live record is never
    /// in a failed or cancelled state.
    pub fn state(&self) -> TransferState {
        match (self.started, self.completed, self.file_id) {
            (false, _, _) => TransferState::Idle,
            (true, false, _) => TransferState::Started,
            (true, true, None) => TransferState::Completed,
            (true, true, Some(_)) => TransferState::Committed,
        }
    }
}

/// Lifecycle of a transfer, from claim to terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    /// Session exists but no transfer has claimed it.
    Idle,
    /// A transfer is streaming bytes into the staged file.
    Started,
    /// End of stream reached, commit pending.
    Completed,
    /// Blob and record are both durable.
    Committed,
    /// A read, write, or commit step failed.
    Failed,
    /// Rollback has run.
    Cancelled,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Response from beginning an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BeginUploadResponse {
    pub status: String,
    /// Session id to use for the upload and progress requests.
    pub upload_id: SessionId,
}

/// Response from a completed upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    pub file_id: i64,
    pub name: String,
    /// Download URL relative to the server root.
    pub url: String,
}

/// Response from a progress poll.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub status: String,
    pub state: TransferState,
    pub total: i64,
    pub uploaded: u64,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<i64>,
}

impl From<Progress> for ProgressResponse {
    fn from(progress: Progress) -> Self {
        Self {
            status: "success".to_string(),
            state: progress.state(),
            total: progress.total,
            uploaded: progress.uploaded,
            completed: progress.completed,
            file_id: progress.file_id,
        }
    }
}
