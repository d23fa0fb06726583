//! Durable file records, created at upload commit time.

use chrono::{DateTime, Utc};

use crate::db::{parse_timestamp, DbPool, SQL_NOW};
use crate::{Result, StowageError};

/// A committed file.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileRecord {
    /// Unique file ID.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: String,
    /// Original filename.
    pub filename: String,
    /// Object-store key the bytes live under.
    pub storage_key: String,
    /// File size in bytes.
    pub size_bytes: i64,
    /// SHA-256 hex checksum of the content.
    pub checksum: String,
    /// User who uploaded the file.
    pub created_by: String,
    /// Creation timestamp.
    pub created_at: String,
    /// Soft-deletion timestamp (None while the file is live).
    pub deleted_at: Option<String>,
}

impl FileRecord {
    /// Whether the record is still live.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Get the created_at as DateTime<Utc>.
    pub fn created_at_datetime(&self) -> DateTime<Utc> {
        parse_timestamp(&self.created_at).unwrap_or_else(Utc::now)
    }
}

/// Data for creating a file record.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    /// Owning tenant.
    pub tenant_id: String,
    /// Original filename.
    pub filename: String,
    /// Object-store key.
    pub storage_key: String,
    /// File size in bytes.
    pub size_bytes: i64,
    /// SHA-256 hex checksum.
    pub checksum: String,
    /// Uploading user.
    pub created_by: String,
}

const FILE_COLUMNS: &str =
    "id, tenant_id, filename, storage_key, size_bytes, checksum, created_by, created_at, deleted_at";

/// Repository for file records.
pub struct FileRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> FileRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new file record.
    pub async fn create(&self, new_file: &NewFileRecord) -> Result<FileRecord> {
        let sql = format!(
            "INSERT INTO files (tenant_id, filename, storage_key, size_bytes, checksum, created_by)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {FILE_COLUMNS}"
        );
        let record = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(&new_file.tenant_id)
            .bind(&new_file.filename)
            .bind(&new_file.storage_key)
            .bind(new_file.size_bytes)
            .bind(&new_file.checksum)
            .bind(&new_file.created_by)
            .fetch_one(self.pool)
            .await?;

        Ok(record)
    }

    /// Get a file record by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = $1");
        let record = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(record)
    }

    /// Find a live file with the given checksum inside a tenant.
    ///
    /// The backing index on (tenant_id, checksum) makes this the
    /// deduplication lookup path.
    pub async fn find_by_checksum(
        &self,
        tenant_id: &str,
        checksum: &str,
    ) -> Result<Option<FileRecord>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE tenant_id = $1 AND checksum = $2 AND deleted_at IS NULL
             ORDER BY id LIMIT 1"
        );
        let record = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(tenant_id)
            .bind(checksum)
            .fetch_optional(self.pool)
            .await?;

        Ok(record)
    }

    /// List live files for a tenant.
    pub async fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE tenant_id = $1 AND deleted_at IS NULL
             ORDER BY id"
        );
        let records = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(tenant_id)
            .fetch_all(self.pool)
            .await?;

        Ok(records)
    }

    /// Soft-delete a file record.
    ///
    /// Returns the record if it was live and is now marked deleted.
    pub async fn mark_deleted(&self, id: i64) -> Result<FileRecord> {
        let sql = format!(
            "UPDATE files SET deleted_at = {SQL_NOW}
             WHERE id = $1 AND deleted_at IS NULL
             RETURNING {FILE_COLUMNS}"
        );
        let record = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        record.ok_or_else(|| StowageError::NotFound("file".to_string()))
    }

    /// Sum of live file sizes and count for a tenant.
    ///
    /// Feeds the quota reconciliation path
    /// ([`QuotaRepository::update_usage`](crate::quota::QuotaRepository::update_usage)).
    pub async fn usage_for_tenant(&self, tenant_id: &str) -> Result<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(size_bytes), 0), COUNT(*)
             FROM files WHERE tenant_id = $1 AND deleted_at IS NULL",
        )
        .bind(tenant_id)
        .fetch_one(self.pool)
        .await?;

        Ok(row)
    }
}
