//! Postgres-backed job store.
//!
//! Each record is one row: the full record as JSONB plus the columns the due
//! query filters on, so sweeping is an index range scan instead of a scan
//! over every document.
//!
//! | Column | Source |
//! |--------|--------|
//! | `id` | `record.id()` |
//! | `status` | `record.status` |
//! | `start_at` | `document.start` |
//! | `next_due` | earliest pending due time (NULL when nothing is pending) |
//! | `document` | the whole record |

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use oagr_core::JobId;

use super::store::{JobStore, JobStoreError};
use super::types::{JobQuery, JobRecord, JobStatus, JobStatusEntry};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS oagr_jobs (
    id          UUID PRIMARY KEY,
    status      TEXT NOT NULL,
    start_at    TIMESTAMPTZ NOT NULL,
    next_due    TIMESTAMPTZ NULL,
    document    JSONB NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS oagr_jobs_due_idx ON oagr_jobs (status, next_due, start_at);
"#;

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, JobStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the jobs table and index if missing.
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<JobRecord, JobStoreError> {
    let Json(doc): Json<Value> = row
        .try_get("document")
        .map_err(|e| map_sqlx_error("decode", e))?;
    Ok(JobRecord::from_json(doc)?)
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, record), fields(job_id = %record.id()), err)]
    async fn save(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        let doc = record.to_json()?;
        sqlx::query(
            r#"
            INSERT INTO oagr_jobs (id, status, start_at, next_due, document, updated_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                start_at = EXCLUDED.start_at,
                next_due = EXCLUDED.next_due,
                document = EXCLUDED.document,
                updated_at = now()
            "#,
        )
        .bind(record.id().as_uuid())
        .bind(record.status.as_str())
        .bind(record.document.start)
        .bind(record.next_due)
        .bind(Json(doc))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn pull(&self, id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        let row = sqlx::query("SELECT document FROM oagr_jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("pull", e))?;
        row.as_ref().map(decode_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn count(&self, query: &JobQuery) -> Result<usize, JobStoreError> {
        let row = match query {
            JobQuery::Due { now } => {
                sqlx::query(
                    "SELECT COUNT(*) AS n FROM oagr_jobs \
                     WHERE status = 'active' AND start_at <= $1 AND next_due <= $1",
                )
                .bind(*now)
                .fetch_one(&*self.pool)
                .await
            }
            JobQuery::All => {
                sqlx::query("SELECT COUNT(*) AS n FROM oagr_jobs")
                    .fetch_one(&*self.pool)
                    .await
            }
        }
        .map_err(|e| map_sqlx_error("count", e))?;

        let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("count", e))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    #[instrument(skip(self), err)]
    async fn iterate(&self, query: &JobQuery) -> Result<Vec<JobRecord>, JobStoreError> {
        let rows = match query {
            JobQuery::Due { now } => {
                sqlx::query(
                    "SELECT document FROM oagr_jobs \
                     WHERE status = 'active' AND start_at <= $1 AND next_due <= $1 \
                     ORDER BY id",
                )
                .bind(*now)
                .fetch_all(&*self.pool)
                .await
            }
            JobQuery::All => {
                sqlx::query("SELECT document FROM oagr_jobs ORDER BY id")
                    .fetch_all(&*self.pool)
                    .await
            }
        }
        .map_err(|e| map_sqlx_error("iterate", e))?;

        rows.iter().map(decode_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn statuses(&self) -> Result<Vec<JobStatusEntry>, JobStoreError> {
        let rows = sqlx::query("SELECT id, status FROM oagr_jobs ORDER BY id")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("statuses", e))?;

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error("statuses", e))?;
                let status: String = row
                    .try_get("status")
                    .map_err(|e| map_sqlx_error("statuses", e))?;
                let status = status
                    .parse::<JobStatus>()
                    .map_err(JobStoreError::Serialization)?;
                Ok(JobStatusEntry {
                    id: JobId::from_uuid(id),
                    status,
                })
            })
            .collect()
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            JobStoreError::Serialization(format!("row decode failed in {operation}: {err}"))
        }
        other => JobStoreError::Storage(format!("{operation}: {other}")),
    }
}

