//! Multipart upload session rows.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::db::{parse_timestamp, DbPool, SQL_NOW};
use crate::{Result, StowageError};

/// Upload session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// Parts are still being received.
    InProgress,
    /// Terminal: the object was finalized and the reservation committed.
    Completed,
    /// Terminal: the session was abandoned and the reservation released.
    Aborted,
}

impl UploadStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::InProgress => "in_progress",
            UploadStatus::Completed => "completed",
            UploadStatus::Aborted => "aborted",
        }
    }

    /// Parse from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(UploadStatus::InProgress),
            "completed" => Some(UploadStatus::Completed),
            "aborted" => Some(UploadStatus::Aborted),
            _ => None,
        }
    }

    /// Whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadStatus::InProgress)
    }
}

impl TryFrom<String> for UploadStatus {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        UploadStatus::from_str(&value).ok_or_else(|| format!("unknown upload status: {value}"))
    }
}

/// One in-flight or terminal multipart transfer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MultipartUploadSession {
    /// Unique session row ID.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: String,
    /// Backend multipart handle.
    pub session_id: String,
    /// Original filename.
    pub filename: String,
    /// Object-store key the finished object will live under.
    pub storage_key: String,
    /// Declared total size in bytes; the reservation unit.
    pub total_size: i64,
    /// Part size in bytes.
    pub part_size: i64,
    /// Declared part count: ceil(total_size / part_size).
    pub total_parts: i32,
    /// JSON-encoded set of received part numbers.
    pub uploaded_parts: String,
    /// Session status.
    #[sqlx(try_from = "String")]
    pub status: UploadStatus,
    /// Uploading user.
    pub created_by: String,
    /// Reaper deadline.
    pub expires_at: String,
    /// Creation timestamp.
    pub created_at: String,
    /// Last mutation timestamp.
    pub updated_at: String,
    /// When the session completed, if it did.
    pub completed_at: Option<String>,
}

impl MultipartUploadSession {
    /// Decode the received part numbers. Set semantics: no duplicates,
    /// order-irrelevant.
    pub fn parts(&self) -> BTreeSet<i32> {
        serde_json::from_str(&self.uploaded_parts).unwrap_or_default()
    }

    /// Completion percentage: received / declared * 100.
    pub fn progress(&self) -> f64 {
        if self.total_parts <= 0 {
            return 0.0;
        }
        self.parts().len() as f64 / self.total_parts as f64 * 100.0
    }

    /// Part numbers not yet received, in ascending order. Enables
    /// resuming after a client disconnect.
    pub fn remaining_parts(&self) -> Vec<i32> {
        let received = self.parts();
        (1..=self.total_parts)
            .filter(|n| !received.contains(n))
            .collect()
    }

    /// Whether the session is past its expiry deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match parse_timestamp(&self.expires_at) {
            Some(deadline) => deadline < now,
            None => false,
        }
    }

    /// Get the expires_at as DateTime<Utc>.
    pub fn expires_at_datetime(&self) -> DateTime<Utc> {
        parse_timestamp(&self.expires_at).unwrap_or_else(Utc::now)
    }
}

/// Data for creating a session row.
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Owning tenant.
    pub tenant_id: String,
    /// Backend multipart handle.
    pub session_id: String,
    /// Original filename.
    pub filename: String,
    /// Object-store key.
    pub storage_key: String,
    /// Declared total size in bytes.
    pub total_size: i64,
    /// Part size in bytes.
    pub part_size: i64,
    /// Declared part count.
    pub total_parts: i32,
    /// Uploading user.
    pub created_by: String,
    /// Reaper deadline, in column timestamp format.
    pub expires_at: String,
}

const SESSION_COLUMNS: &str = "id, tenant_id, session_id, filename, storage_key, total_size, \
                               part_size, total_parts, uploaded_parts, status, created_by, \
                               expires_at, created_at, updated_at, completed_at";

/// Repository for multipart upload sessions.
pub struct SessionRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> SessionRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new in-progress session.
    pub async fn create(&self, new_session: &NewSession) -> Result<MultipartUploadSession> {
        let sql = format!(
            "INSERT INTO multipart_upload_sessions
                 (tenant_id, session_id, filename, storage_key, total_size, part_size,
                  total_parts, created_by, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {SESSION_COLUMNS}"
        );
        let session = sqlx::query_as::<_, MultipartUploadSession>(&sql)
            .bind(&new_session.tenant_id)
            .bind(&new_session.session_id)
            .bind(&new_session.filename)
            .bind(&new_session.storage_key)
            .bind(new_session.total_size)
            .bind(new_session.part_size)
            .bind(new_session.total_parts)
            .bind(&new_session.created_by)
            .bind(&new_session.expires_at)
            .fetch_one(self.pool)
            .await?;

        Ok(session)
    }

    /// Get a session by row ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<MultipartUploadSession>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM multipart_upload_sessions WHERE id = $1");
        let session = sqlx::query_as::<_, MultipartUploadSession>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(session)
    }

    /// Get a session by its backend handle.
    pub async fn get_by_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<MultipartUploadSession>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM multipart_upload_sessions WHERE session_id = $1"
        );
        let session = sqlx::query_as::<_, MultipartUploadSession>(&sql)
            .bind(session_id)
            .fetch_optional(self.pool)
            .await?;

        Ok(session)
    }

    /// Persist the received-part set.
    ///
    /// Only applies while the session is still in progress, so a racing
    /// terminal transition cannot be overwritten. Returns the updated
    /// row, or None if the session was no longer active.
    pub async fn save_parts(
        &self,
        id: i64,
        parts: &BTreeSet<i32>,
    ) -> Result<Option<MultipartUploadSession>> {
        let encoded = serde_json::to_string(parts)
            .map_err(|e| StowageError::Database(e.to_string()))?;

        let sql = format!(
            "UPDATE multipart_upload_sessions
             SET uploaded_parts = $2, updated_at = {SQL_NOW}
             WHERE id = $1 AND status = 'in_progress'
             RETURNING {SESSION_COLUMNS}"
        );
        let session = sqlx::query_as::<_, MultipartUploadSession>(&sql)
            .bind(id)
            .bind(&encoded)
            .fetch_optional(self.pool)
            .await?;

        Ok(session)
    }

    /// Atomically transition an in-progress session to completed.
    ///
    /// Returns None if the session was missing or already terminal;
    /// the terminal transition can only ever happen once.
    pub async fn mark_completed(&self, id: i64) -> Result<Option<MultipartUploadSession>> {
        let sql = format!(
            "UPDATE multipart_upload_sessions
             SET status = 'completed', completed_at = {SQL_NOW}, updated_at = {SQL_NOW}
             WHERE id = $1 AND status = 'in_progress'
             RETURNING {SESSION_COLUMNS}"
        );
        let session = sqlx::query_as::<_, MultipartUploadSession>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(session)
    }

    /// Atomically transition an in-progress session to aborted.
    pub async fn mark_aborted(&self, id: i64) -> Result<Option<MultipartUploadSession>> {
        let sql = format!(
            "UPDATE multipart_upload_sessions
             SET status = 'aborted', updated_at = {SQL_NOW}
             WHERE id = $1 AND status = 'in_progress'
             RETURNING {SESSION_COLUMNS}"
        );
        let session = sqlx::query_as::<_, MultipartUploadSession>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(session)
    }

    /// Delete a session row. Returns true if a row was removed.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM multipart_upload_sessions WHERE id = $1")
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// List in-progress sessions whose deadline has passed.
    pub async fn list_expired(
        &self,
        now: &str,
        limit: u32,
    ) -> Result<Vec<MultipartUploadSession>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM multipart_upload_sessions
             WHERE status = 'in_progress' AND expires_at < $1
             ORDER BY expires_at LIMIT $2"
        );
        let sessions = sqlx::query_as::<_, MultipartUploadSession>(&sql)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(self.pool)
            .await?;

        Ok(sessions)
    }
}
