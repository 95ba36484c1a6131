//! Idempotent persistence operations over the metadata store.
//!
//! Redeliveries are expected under at-least-once delivery, so every write
//! is an upsert or a guarded update. The one subtle operation is
//! `mark_in_progress`: a single conditional UPDATE that both claims the
//! record for a fetch attempt and detects terminal records (zero rows
//! updated), which is what lets the worker ack stale redeliveries without
//! re-fetching.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::error_handling::DatabaseError;
use crate::storage::record::{FetchedMetadata, MetadataRecord, RecordStatus};

/// Port for record persistence. All operations are safe to repeat.
#[async_trait]
pub trait MetadataRepository: Send + Sync {
    /// Creates the record as PENDING if it does not exist yet. Touches only
    /// `updated_at` when it does.
    async fn ensure_pending(&self, url: &str) -> Result<(), DatabaseError>;

    /// Claims the record for a fetch attempt: moves a non-terminal record to
    /// IN_PROGRESS, increments `attempt_number`, clears the error, stamps
    /// the request id. Returns the post-increment attempt number, or `None`
    /// when the record is terminal (the caller acks without fetching).
    async fn mark_in_progress(
        &self,
        url: &str,
        request_id: &str,
    ) -> Result<Option<i64>, DatabaseError>;

    /// Terminal success: writes metadata and clears the error message.
    async fn mark_completed(
        &self,
        url: &str,
        request_id: &str,
        metadata: &FetchedMetadata,
    ) -> Result<(), DatabaseError>;

    /// Records a retryable failure; the message will be redelivered.
    async fn mark_retryable_failure(
        &self,
        url: &str,
        request_id: &str,
        error_msg: &str,
    ) -> Result<(), DatabaseError>;

    /// Terminal failure.
    async fn mark_permanent_failure(
        &self,
        url: &str,
        request_id: &str,
        error_msg: &str,
    ) -> Result<(), DatabaseError>;

    /// Reads one record by normalized URL.
    async fn get(&self, url: &str) -> Result<Option<MetadataRecord>, DatabaseError>;

    /// Store liveness check, used by the readiness probe.
    async fn ping(&self) -> Result<(), DatabaseError>;
}

/// SQLite-backed repository shared by both processes.
pub struct SqliteMetadataRepository {
    pool: Arc<Pool<Sqlite>>,
}

impl SqliteMetadataRepository {
    pub fn new(pool: Arc<Pool<Sqlite>>) -> Self {
        Self { pool }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl MetadataRepository for SqliteMetadataRepository {
    async fn ensure_pending(&self, url: &str) -> Result<(), DatabaseError> {
        let now = now_ms();
        sqlx::query(
            "INSERT INTO metadata_records (url, status, attempt_number, created_at, updated_at)
             VALUES (?, ?, 0, ?, ?)
             ON CONFLICT(url) DO UPDATE SET updated_at = excluded.updated_at",
        )
        .bind(url)
        .bind(RecordStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn mark_in_progress(
        &self,
        url: &str,
        request_id: &str,
    ) -> Result<Option<i64>, DatabaseError> {
        // Zero rows updated means the record is terminal; never pull a
        // record out of COMPLETED or FAILED_PERMANENT.
        let attempt: Option<i64> = sqlx::query_scalar(
            "UPDATE metadata_records
             SET status = ?,
                 attempt_number = attempt_number + 1,
                 error_msg = NULL,
                 last_request_id = ?,
                 updated_at = ?
             WHERE url = ?
               AND status IN ('PENDING', 'QUEUED', 'IN_PROGRESS', 'FAILED_RETRYABLE')
             RETURNING attempt_number",
        )
        .bind(RecordStatus::InProgress.as_str())
        .bind(request_id)
        .bind(now_ms())
        .bind(url)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(attempt)
    }

    async fn mark_completed(
        &self,
        url: &str,
        request_id: &str,
        metadata: &FetchedMetadata,
    ) -> Result<(), DatabaseError> {
        let headers = serde_json::to_string(&metadata.headers)?;
        let cookies = serde_json::to_string(&metadata.cookies)?;
        let additional_details = metadata
            .additional_details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "UPDATE metadata_records
             SET status = ?,
                 status_code = ?,
                 headers = ?,
                 cookies = ?,
                 page_source = ?,
                 final_url = ?,
                 additional_details = ?,
                 error_msg = NULL,
                 last_request_id = ?,
                 updated_at = ?
             WHERE url = ?",
        )
        .bind(RecordStatus::Completed.as_str())
        .bind(metadata.status_code as i64)
        .bind(headers)
        .bind(cookies)
        .bind(&metadata.page_source)
        .bind(&metadata.final_url)
        .bind(additional_details)
        .bind(request_id)
        .bind(now_ms())
        .bind(url)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn mark_retryable_failure(
        &self,
        url: &str,
        request_id: &str,
        error_msg: &str,
    ) -> Result<(), DatabaseError> {
        mark_failure(
            self.pool.as_ref(),
            url,
            request_id,
            error_msg,
            RecordStatus::FailedRetryable,
        )
        .await
    }

    async fn mark_permanent_failure(
        &self,
        url: &str,
        request_id: &str,
        error_msg: &str,
    ) -> Result<(), DatabaseError> {
        mark_failure(
            self.pool.as_ref(),
            url,
            request_id,
            error_msg,
            RecordStatus::FailedPermanent,
        )
        .await
    }

    async fn get(&self, url: &str) -> Result<Option<MetadataRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, MetadataRecord>(
            "SELECT * FROM metadata_records WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(record)
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(self.pool.as_ref()).await?;
        Ok(())
    }
}

async fn mark_failure(
    pool: &Pool<Sqlite>,
    url: &str,
    request_id: &str,
    error_msg: &str,
    status: RecordStatus,
) -> Result<(), DatabaseError> {
    sqlx::query(
        "UPDATE metadata_records
         SET status = ?,
             error_msg = ?,
             last_request_id = ?,
             updated_at = ?
         WHERE url = ?",
    )
    .bind(status.as_str())
    .bind(error_msg)
    .bind(request_id)
    .bind(now_ms())
    .bind(url)
    .execute(pool)
    .await?;
    Ok(())
}
