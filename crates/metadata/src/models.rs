//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;

/// Committed file record.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct FileRow {
    pub id: i64,
    /// Sanitized client-declared name. Display only.
    pub name: String,
    /// Unix seconds, UTC.
    pub date_posted: i64,
}

impl FileRow {
    /// Posting time as a timestamp, falling back to the epoch for
    /// values outside the representable range.
    pub fn posted_at(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.date_posted)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

/// A validated insert that has not been executed yet.
///
/// Produced by [`FileRepo::prepare_insert`](crate::FileRepo::prepare_insert)
/// and consumed by [`FileRepo::execute_insert`](crate::FileRepo::execute_insert),
/// so a pending insert can run at most once. Dropping it discards the
/// insert without touching the store.
#[derive(Debug)]
#[must_use = "a pending insert does nothing until executed"]
pub struct PendingInsert {
    name: String,
    date_posted: i64,
}

impl PendingInsert {
    pub fn new(name: impl Into<String>, posted_at: OffsetDateTime) -> Self {
        Self {
            name: name.into(),
            date_posted: posted_at.unix_timestamp(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn date_posted(&self) -> i64 {
        self.date_posted
    }
}
