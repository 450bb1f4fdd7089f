//! Metadata store trait and implementations.

use crate::error::MetadataResult;
use crate::repos::FileRepo;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: FileRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout: Duration,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout = Duration::from_secs(query_timeout_secs.unwrap_or(30));

        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection serializes writers, which is what id allocation needs.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout,
        };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs = query_timeout.as_secs(),
            "SQLite metadata store ready"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run a query, logging it if it outlives the advisory timeout.
    async fn timed<T, F>(&self, op: &'static str, fut: F) -> MetadataResult<T>
    where
        F: Future<Output = MetadataResult<T>> + Send,
    {
        let started = Instant::now();
        let result = fut.await;
        let elapsed = started.elapsed();
        if elapsed > self.query_timeout {
            tracing::warn!(
                op,
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_secs = self.query_timeout.as_secs(),
                "Metadata query exceeded advisory timeout"
            );
        }
        result
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::error::MetadataError;
    use crate::models::{FileRow, PendingInsert};
    use sqlx::Executor;
    use time::OffsetDateTime;

    const INSERT_FILE_SQL: &str = "INSERT INTO files (name, date_posted) VALUES (?, ?)";

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn prepare_insert(
            &self,
            name: &str,
            posted_at: OffsetDateTime,
        ) -> MetadataResult<PendingInsert> {
            self.timed("prepare_insert", async {
                // Compiles the statement against the live schema; nothing is written.
                self.pool.prepare(INSERT_FILE_SQL).await?;
                Ok::<_, MetadataError>(PendingInsert::new(name, posted_at))
            })
            .await
        }

        async fn execute_insert(&self, pending: PendingInsert) -> MetadataResult<i64> {
            self.timed("execute_insert", async {
                let result = sqlx::query(INSERT_FILE_SQL)
                    .bind(pending.name())
                    .bind(pending.date_posted())
                    .execute(&self.pool)
                    .await?;
                Ok::<_, MetadataError>(result.last_insert_rowid())
            })
            .await
        }

        async fn get_file(&self, id: i64) -> MetadataResult<Option<FileRow>> {
            self.timed("get_file", async {
                let row = sqlx::query_as::<_, FileRow>(
                    "SELECT id, name, date_posted FROM files WHERE id = ?",
                )
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
                Ok::<_, MetadataError>(row)
            })
            .await
        }

        async fn files_since_id(
            &self,
            after_id: i64,
            limit: u32,
        ) -> MetadataResult<Vec<FileRow>> {
            self.timed("files_since_id", async {
                let rows = sqlx::query_as::<_, FileRow>(
                    r#"
                    SELECT id, name, date_posted FROM (
                        SELECT id, name, date_posted FROM files
                        WHERE id > ?
                        ORDER BY id ASC
                        LIMIT ?
                    )
                    ORDER BY id DESC
                    "#,
                )
                .bind(after_id)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?;
                Ok::<_, MetadataError>(rows)
            })
            .await
        }

        async fn files_since_time(
            &self,
            after_unix_secs: i64,
            limit: u32,
        ) -> MetadataResult<Vec<FileRow>> {
            self.timed("files_since_time", async {
                let rows = sqlx::query_as::<_, FileRow>(
                    r#"
                    SELECT id, name, date_posted FROM files
                    WHERE date_posted > ?
                    ORDER BY date_posted DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(after_unix_secs)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?;
                Ok::<_, MetadataError>(rows)
            })
            .await
        }

        async fn count_files(&self) -> MetadataResult<u64> {
            self.timed("count_files", async {
                let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
                    .fetch_one(&self.pool)
                    .await?;
                Ok::<_, MetadataError>(u64::try_from(count).unwrap_or(0))
            })
            .await
        }
    }
}

// AUTOINCREMENT keeps ids from being reused after the newest row is
// deleted, so a final blob path never names two different records.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    date_posted INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_date_posted ON files(date_posted);
"#;
