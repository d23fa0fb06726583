//! Storage quota ledger: durable per-subject counters.

use chrono::{DateTime, Utc};

use crate::db::{parse_timestamp, DbPool, SQL_NOW};
use crate::{Result, StowageError};

/// Kind of subject a quota row accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectType {
    /// Whole-tenant quota.
    Tenant,
    /// Per-user quota within a tenant.
    User,
    /// Per-department quota within a tenant.
    Department,
}

impl SubjectType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Tenant => "tenant",
            SubjectType::User => "user",
            SubjectType::Department => "department",
        }
    }

    /// Parse from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "tenant" => Some(SubjectType::Tenant),
            "user" => Some(SubjectType::User),
            "department" => Some(SubjectType::Department),
            _ => None,
        }
    }
}

impl TryFrom<String> for SubjectType {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        SubjectType::from_str(&value).ok_or_else(|| format!("unknown subject type: {value}"))
    }
}

/// Identifies one quota row: tenant plus an optional narrower subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSubject {
    /// Owning tenant.
    pub tenant_id: String,
    /// Subject kind.
    pub subject_type: SubjectType,
    /// Subject id within the tenant; None for tenant-level rows.
    pub subject_id: Option<String>,
}

impl QuotaSubject {
    /// Tenant-level subject.
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            subject_type: SubjectType::Tenant,
            subject_id: None,
        }
    }

    /// User-level subject.
    pub fn user(tenant_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            subject_type: SubjectType::User,
            subject_id: Some(user_id.into()),
        }
    }

    /// Department-level subject.
    pub fn department(tenant_id: impl Into<String>, department_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            subject_type: SubjectType::Department,
            subject_id: Some(department_id.into()),
        }
    }
}

/// One quota ledger row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StorageQuota {
    /// Unique quota ID.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: String,
    /// Subject kind.
    #[sqlx(try_from = "String")]
    pub subject_type: SubjectType,
    /// Subject id within the tenant; None for tenant-level rows.
    pub subject_id: Option<String>,
    /// Byte limit.
    pub limit_bytes: i64,
    /// Bytes committed to durable files.
    pub used_bytes: i64,
    /// Bytes held by outstanding reservations.
    pub reserved_bytes: i64,
    /// Optional file-count ceiling.
    pub file_count_limit: Option<i64>,
    /// Files committed so far.
    pub file_count_used: i64,
    /// Creation timestamp.
    pub created_at: String,
    /// Last mutation timestamp.
    pub updated_at: String,
}

impl StorageQuota {
    /// Bytes still allocatable. May be negative transiently after an
    /// admin lowers the limit; a new reservation never makes it worse.
    pub fn available(&self) -> i64 {
        self.limit_bytes - self.used_bytes - self.reserved_bytes
    }

    /// Whether `size` more bytes fit under the limit right now.
    pub fn can_allocate(&self, size: i64) -> bool {
        size <= self.available()
    }

    /// Committed-plus-reserved usage as a percentage of the limit.
    /// Returns 0 for rows with no limit set.
    pub fn usage_percent(&self) -> i64 {
        if self.limit_bytes <= 0 {
            return 0;
        }
        (self.used_bytes + self.reserved_bytes) * 100 / self.limit_bytes
    }

    /// Get the updated_at as DateTime<Utc>.
    pub fn updated_at_datetime(&self) -> DateTime<Utc> {
        parse_timestamp(&self.updated_at).unwrap_or_else(Utc::now)
    }
}

const QUOTA_COLUMNS: &str = "id, tenant_id, subject_type, subject_id, limit_bytes, used_bytes, \
                             reserved_bytes, file_count_limit, file_count_used, created_at, updated_at";

/// Repository for quota ledger rows.
pub struct QuotaRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> QuotaRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Fetch the quota row for a subject, if one exists.
    pub async fn get(&self, subject: &QuotaSubject) -> Result<Option<StorageQuota>> {
        let sql = format!(
            "SELECT {QUOTA_COLUMNS} FROM storage_quotas
             WHERE tenant_id = $1 AND subject_type = $2
               AND COALESCE(subject_id, '') = COALESCE($3, '')"
        );
        let quota = sqlx::query_as::<_, StorageQuota>(&sql)
            .bind(&subject.tenant_id)
            .bind(subject.subject_type.as_str())
            .bind(&subject.subject_id)
            .fetch_optional(self.pool)
            .await?;

        Ok(quota)
    }

    /// Fetch a quota row by id.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<StorageQuota>> {
        let sql = format!("SELECT {QUOTA_COLUMNS} FROM storage_quotas WHERE id = $1");
        let quota = sqlx::query_as::<_, StorageQuota>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(quota)
    }

    /// Return the subject's quota row, creating it with zeroed counters
    /// on first access.
    ///
    /// At most one insert: racing creators are resolved by the unique
    /// subject index, and the loser re-reads the winner's row.
    pub async fn get_or_create(
        &self,
        subject: &QuotaSubject,
        default_limit: i64,
        file_count_limit: Option<i64>,
    ) -> Result<StorageQuota> {
        if let Some(quota) = self.get(subject).await? {
            return Ok(quota);
        }

        sqlx::query(
            "INSERT INTO storage_quotas (tenant_id, subject_type, subject_id, limit_bytes, file_count_limit)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT DO NOTHING",
        )
        .bind(&subject.tenant_id)
        .bind(subject.subject_type.as_str())
        .bind(&subject.subject_id)
        .bind(default_limit)
        .bind(file_count_limit)
        .execute(self.pool)
        .await?;

        self.get(subject)
            .await?
            .ok_or_else(|| StowageError::NotFound("quota".to_string()))
    }

    /// List all quota rows for a tenant.
    pub async fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<StorageQuota>> {
        let sql = format!(
            "SELECT {QUOTA_COLUMNS} FROM storage_quotas
             WHERE tenant_id = $1 ORDER BY subject_type, subject_id"
        );
        let quotas = sqlx::query_as::<_, StorageQuota>(&sql)
            .bind(tenant_id)
            .fetch_all(self.pool)
            .await?;

        Ok(quotas)
    }

    /// List quota rows at or above a usage percentage.
    ///
    /// Used by the reaper's alert pass; rows without a limit are skipped.
    pub async fn list_above_usage(&self, threshold_percent: i64) -> Result<Vec<StorageQuota>> {
        let sql = format!(
            "SELECT {QUOTA_COLUMNS} FROM storage_quotas
             WHERE limit_bytes > 0
               AND (used_bytes + reserved_bytes) * 100 >= limit_bytes * $1
             ORDER BY id"
        );
        let quotas = sqlx::query_as::<_, StorageQuota>(&sql)
            .bind(threshold_percent)
            .fetch_all(self.pool)
            .await?;

        Ok(quotas)
    }

    /// Apply a reconciliation delta to the committed counters.
    ///
    /// This is the drift-correction path fed by an authoritative size
    /// scan; it deliberately bypasses the reservation protocol.
    pub async fn update_usage(
        &self,
        quota_id: i64,
        used_delta: i64,
        file_count_delta: i64,
    ) -> Result<StorageQuota> {
        let sql = format!(
            "UPDATE storage_quotas
             SET used_bytes = used_bytes + $2,
                 file_count_used = file_count_used + $3,
                 updated_at = {SQL_NOW}
             WHERE id = $1
             RETURNING {QUOTA_COLUMNS}"
        );
        let quota = sqlx::query_as::<_, StorageQuota>(&sql)
            .bind(quota_id)
            .bind(used_delta)
            .bind(file_count_delta)
            .fetch_optional(self.pool)
            .await?;

        quota.ok_or_else(|| StowageError::NotFound("quota".to_string()))
    }

    /// Change the byte limit for a quota row.
    pub async fn set_limit(&self, quota_id: i64, limit_bytes: i64) -> Result<StorageQuota> {
        let sql = format!(
            "UPDATE storage_quotas
             SET limit_bytes = $2, updated_at = {SQL_NOW}
             WHERE id = $1
             RETURNING {QUOTA_COLUMNS}"
        );
        let quota = sqlx::query_as::<_, StorageQuota>(&sql)
            .bind(quota_id)
            .bind(limit_bytes)
            .fetch_optional(self.pool)
            .await?;

        quota.ok_or_else(|| StowageError::NotFound("quota".to_string()))
    }
}
