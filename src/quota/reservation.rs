//! Reservation protocol: reserve → commit | release on one quota row.
//!
//! The check-then-increment of `reserve` is expressed as a single
//! conditional UPDATE so that two concurrent reservations that would
//! jointly exceed the limit can never both succeed; the database
//! serializes writers on the row.

use tracing::debug;

use super::ledger::{QuotaRepository, StorageQuota};
use crate::db::{DbPool, SQL_GREATEST, SQL_NOW};
use crate::{Result, StowageError};

const QUOTA_COLUMNS: &str = "id, tenant_id, subject_type, subject_id, limit_bytes, used_bytes, \
                             reserved_bytes, file_count_limit, file_count_used, created_at, updated_at";

/// The reserve/commit/release state machine over quota rows.
///
/// Each successful `reserve` must be matched by exactly one `commit`
/// or `release`; pairing is enforced by the owning upload attempt or
/// multipart session, not here. Commit and release are floor-clamped
/// and safe to repeat.
pub struct ReservationProtocol<'a> {
    pool: &'a DbPool,
}

impl<'a> ReservationProtocol<'a> {
    /// Create a new protocol instance over the given pool.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Provisionally claim `size` bytes on a quota row.
    ///
    /// Fails with `QuotaExceeded` when the row cannot cover the claim,
    /// reporting current availability. A configured file-count limit is
    /// part of the guard: a reservation implies one future file.
    pub async fn reserve(&self, quota_id: i64, size: i64) -> Result<StorageQuota> {
        if size <= 0 {
            return Err(StowageError::Validation(
                "reservation size must be positive".to_string(),
            ));
        }

        let sql = format!(
            "UPDATE storage_quotas
             SET reserved_bytes = reserved_bytes + $2,
                 updated_at = {SQL_NOW}
             WHERE id = $1
               AND limit_bytes - used_bytes - reserved_bytes >= $2
               AND (file_count_limit IS NULL OR file_count_used < file_count_limit)
             RETURNING {QUOTA_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, StorageQuota>(&sql)
            .bind(quota_id)
            .bind(size)
            .fetch_optional(self.pool)
            .await?;

        match updated {
            Some(quota) => {
                debug!(
                    quota_id,
                    size,
                    reserved = quota.reserved_bytes,
                    "reserved quota"
                );
                Ok(quota)
            }
            None => {
                // Guard failed: re-read to report availability, or the
                // row genuinely does not exist.
                let quota = QuotaRepository::new(self.pool)
                    .get_by_id(quota_id)
                    .await?
                    .ok_or_else(|| StowageError::NotFound("quota".to_string()))?;
                Err(StowageError::QuotaExceeded {
                    available: quota.available().max(0),
                    requested: size,
                })
            }
        }
    }

    /// Convert a reservation into permanent usage after the bytes are
    /// durably stored. Increments the file count.
    pub async fn commit(&self, quota_id: i64, size: i64) -> Result<StorageQuota> {
        let sql = format!(
            "UPDATE storage_quotas
             SET reserved_bytes = {SQL_GREATEST}(reserved_bytes - $2, 0),
                 used_bytes = used_bytes + $2,
                 file_count_used = file_count_used + 1,
                 updated_at = {SQL_NOW}
             WHERE id = $1
             RETURNING {QUOTA_COLUMNS}"
        );
        let quota = sqlx::query_as::<_, StorageQuota>(&sql)
            .bind(quota_id)
            .bind(size)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| StowageError::NotFound("quota".to_string()))?;

        debug!(quota_id, size, used = quota.used_bytes, "committed quota");
        Ok(quota)
    }

    /// Cancel a reservation without converting it to usage.
    ///
    /// Clamped at zero, so repeated releases beyond the outstanding
    /// reserved amount are no-ops.
    pub async fn release(&self, quota_id: i64, size: i64) -> Result<StorageQuota> {
        let sql = format!(
            "UPDATE storage_quotas
             SET reserved_bytes = {SQL_GREATEST}(reserved_bytes - $2, 0),
                 updated_at = {SQL_NOW}
             WHERE id = $1
             RETURNING {QUOTA_COLUMNS}"
        );
        let quota = sqlx::query_as::<_, StorageQuota>(&sql)
            .bind(quota_id)
            .bind(size)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| StowageError::NotFound("quota".to_string()))?;

        debug!(
            quota_id,
            size,
            reserved = quota.reserved_bytes,
            "released quota"
        );
        Ok(quota)
    }

    /// Reserve the same size on several quota rows, all or nothing.
    ///
    /// Rows are reserved in order; on failure every reservation taken
    /// so far is released before the error propagates. Used for
    /// uploads gated by both a tenant-level and a user-level quota.
    pub async fn reserve_all(&self, quota_ids: &[i64], size: i64) -> Result<()> {
        for (i, &quota_id) in quota_ids.iter().enumerate() {
            if let Err(e) = self.reserve(quota_id, size).await {
                for &taken in &quota_ids[..i] {
                    self.release(taken, size).await?;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Commit the same size on several quota rows, all or nothing.
    ///
    /// Commits already applied when a later row fails are reversed,
    /// restoring their reservations, before the error propagates. The
    /// caller can then release as if nothing was committed.
    pub async fn commit_all(&self, quota_ids: &[i64], size: i64) -> Result<()> {
        for (i, &quota_id) in quota_ids.iter().enumerate() {
            if let Err(e) = self.commit(quota_id, size).await {
                for &committed in &quota_ids[..i] {
                    self.uncommit(committed, size).await?;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Reverse a commit: move the bytes from used back to reserved and
    /// undo the file count increment.
    async fn uncommit(&self, quota_id: i64, size: i64) -> Result<StorageQuota> {
        let sql = format!(
            "UPDATE storage_quotas
             SET used_bytes = {SQL_GREATEST}(used_bytes - $2, 0),
                 reserved_bytes = reserved_bytes + $2,
                 file_count_used = {SQL_GREATEST}(file_count_used - 1, 0),
                 updated_at = {SQL_NOW}
             WHERE id = $1
             RETURNING {QUOTA_COLUMNS}"
        );
        let quota = sqlx::query_as::<_, StorageQuota>(&sql)
            .bind(quota_id)
            .bind(size)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| StowageError::NotFound("quota".to_string()))?;

        debug!(quota_id, size, used = quota.used_bytes, "reversed quota commit");
        Ok(quota)
    }

    /// Release the same size on several quota rows.
    pub async fn release_all(&self, quota_ids: &[i64], size: i64) -> Result<()> {
        for &quota_id in quota_ids {
            self.release(quota_id, size).await?;
        }
        Ok(())
    }
}
