//! Multipart upload tracking: initiate, record parts, complete, abort.

use chrono::{Duration, Utc};
use tracing::warn;
use uuid::Uuid;

use super::session::{MultipartUploadSession, NewSession, SessionRepository, UploadStatus};
use crate::config::{Config, QuotaConfig, UploadConfig};
use crate::db::{format_timestamp, DbPool};
use crate::file::{FileRepository, NewFileRecord};
use crate::quota::{QuotaRepository, QuotaSubject, ReservationProtocol};
use crate::store::ObjectStore;
use crate::{Result, StowageError};

/// Upper bound on declared parts per session.
pub const MAX_PARTS: i32 = 10_000;

/// Tracks multipart transfers against the quota ledger and the object
/// store backend.
///
/// Every session owns a pair of reservations (tenant-level and
/// user-level) of the declared total size, taken at initiate time and
/// resolved exactly once by complete, abort, or the reaper.
pub struct MultipartUploadTracker<'a> {
    pool: &'a DbPool,
    store: &'a dyn ObjectStore,
    quota: QuotaConfig,
    upload: UploadConfig,
}

impl<'a> MultipartUploadTracker<'a> {
    /// Create a new tracker.
    pub fn new(pool: &'a DbPool, store: &'a dyn ObjectStore, config: &Config) -> Self {
        Self {
            pool,
            store,
            quota: config.quota.clone(),
            upload: config.upload.clone(),
        }
    }

    /// Resolve (creating lazily) the tenant-level and user-level quota
    /// rows gating an upload. Both must pass for a user-scoped upload.
    pub(crate) async fn quota_ids(&self, tenant_id: &str, user_id: &str) -> Result<[i64; 2]> {
        let repo = QuotaRepository::new(self.pool);
        let tenant = repo
            .get_or_create(
                &QuotaSubject::tenant(tenant_id),
                self.quota.default_tenant_limit_bytes,
                self.quota.default_file_count_limit,
            )
            .await?;
        let user = repo
            .get_or_create(
                &QuotaSubject::user(tenant_id, user_id),
                self.quota.default_user_limit_bytes,
                self.quota.default_file_count_limit,
            )
            .await?;
        Ok([tenant.id, user.id])
    }

    /// Open a new multipart session.
    ///
    /// Reserves the declared total size on both quotas, opens the
    /// backend session, and persists the tracker row in progress with
    /// an expiry deadline. The declared size must be known up front;
    /// it is the unit every later commit or release uses.
    pub async fn initiate(
        &self,
        tenant_id: &str,
        created_by: &str,
        filename: &str,
        total_size: i64,
        part_size: Option<i64>,
    ) -> Result<MultipartUploadSession> {
        let part_size = part_size.unwrap_or(self.upload.part_size_bytes);

        if filename.chars().count() > self.upload.max_filename_length {
            return Err(StowageError::Validation(format!(
                "filename exceeds {} characters",
                self.upload.max_filename_length
            )));
        }
        if total_size <= 0 {
            return Err(StowageError::Validation(
                "total size must be declared and positive".to_string(),
            ));
        }
        if part_size <= 0 {
            return Err(StowageError::Validation(
                "part size must be positive".to_string(),
            ));
        }

        // Signed div_ceil is unstable on this toolchain; both values
        // are validated positive above, so route through u64.
        let total_parts = (total_size as u64).div_ceil(part_size as u64) as i64;
        if total_parts > MAX_PARTS as i64 {
            return Err(StowageError::Validation(format!(
                "{total_parts} parts exceed the {MAX_PARTS} part limit"
            )));
        }
        let total_parts = total_parts as i32;

        let quota_ids = self.quota_ids(tenant_id, created_by).await?;
        let protocol = ReservationProtocol::new(self.pool);
        protocol.reserve_all(&quota_ids, total_size).await?;

        let storage_key = object_key(tenant_id, filename);
        let session_id = match self.store.new_multipart_session(&storage_key).await {
            Ok(session_id) => session_id,
            Err(e) => {
                protocol.release_all(&quota_ids, total_size).await?;
                return Err(StowageError::StorageBackend(e.to_string()));
            }
        };

        let expires_at =
            format_timestamp(Utc::now() + Duration::days(self.upload.session_ttl_days));
        let new_session = NewSession {
            tenant_id: tenant_id.to_string(),
            session_id: session_id.clone(),
            filename: filename.to_string(),
            storage_key,
            total_size,
            part_size,
            total_parts,
            created_by: created_by.to_string(),
            expires_at,
        };

        match SessionRepository::new(self.pool).create(&new_session).await {
            Ok(session) => Ok(session),
            Err(e) => {
                // Untracked backend session and reservations must not
                // outlive a failed insert.
                if let Err(abort_err) = self
                    .store
                    .abort_multipart_session(&new_session.storage_key, &session_id)
                    .await
                {
                    warn!(%session_id, error = %abort_err, "failed to abort orphan backend session");
                }
                protocol.release_all(&quota_ids, total_size).await?;
                Err(e)
            }
        }
    }

    /// Fetch a session or fail with `UploadNotFound`.
    pub async fn get(&self, id: i64) -> Result<MultipartUploadSession> {
        SessionRepository::new(self.pool)
            .get_by_id(id)
            .await?
            .ok_or_else(|| StowageError::UploadNotFound(id.to_string()))
    }

    /// Require an in-progress session; `check_expiry` additionally
    /// rejects sessions past their deadline.
    async fn get_active(&self, id: i64, check_expiry: bool) -> Result<MultipartUploadSession> {
        let session = self.get(id).await?;
        if session.status.is_terminal() {
            return Err(StowageError::UploadNotActive(id.to_string()));
        }
        if check_expiry && session.is_expired(Utc::now()) {
            return Err(StowageError::UploadExpired(id.to_string()));
        }
        Ok(session)
    }

    /// Record a received part. Idempotent set insert: recording the
    /// same part twice leaves it in the set exactly once.
    pub async fn record_part(&self, id: i64, part_number: i32) -> Result<MultipartUploadSession> {
        let session = self.get_active(id, true).await?;

        if part_number < 1 || part_number > session.total_parts {
            return Err(StowageError::PartOutOfRange {
                part: part_number,
                total: session.total_parts,
            });
        }

        let mut parts = session.parts();
        if !parts.insert(part_number) {
            // Duplicate: nothing to persist
            return Ok(session);
        }

        SessionRepository::new(self.pool)
            .save_parts(id, &parts)
            .await?
            .ok_or_else(|| StowageError::UploadNotActive(id.to_string()))
    }

    /// Store one part's bytes on the backend, then record it.
    pub async fn upload_part(
        &self,
        id: i64,
        part_number: i32,
        data: &[u8],
    ) -> Result<MultipartUploadSession> {
        let session = self.get_active(id, true).await?;

        if part_number < 1 || part_number > session.total_parts {
            return Err(StowageError::PartOutOfRange {
                part: part_number,
                total: session.total_parts,
            });
        }

        // A transient backend failure leaves the session in progress
        // for client retry; the reaper reclaims it if the client never
        // comes back.
        self.store
            .put_part(&session.storage_key, &session.session_id, part_number, data)
            .await
            .map_err(|e| StowageError::StorageBackend(e.to_string()))?;

        self.record_part(id, part_number).await
    }

    /// Finalize the transfer.
    ///
    /// All declared parts must be present: the caller-supplied list if
    /// given, otherwise the backend's authoritative part listing. On
    /// success the object is assembled, the session marked completed,
    /// the File record created, and both reservations committed.
    pub async fn complete(
        &self,
        id: i64,
        parts: Option<&[i32]>,
    ) -> Result<(MultipartUploadSession, crate::file::FileRecord)> {
        let session = self.get_active(id, false).await?;

        let part_numbers: Vec<i32> = match parts {
            Some(parts) => parts.to_vec(),
            None => self
                .store
                .list_parts(&session.storage_key, &session.session_id)
                .await
                .map_err(|e| StowageError::StorageBackend(e.to_string()))?
                .into_iter()
                .map(|p| p.part_number)
                .collect(),
        };

        let mut distinct: Vec<i32> = part_numbers.clone();
        distinct.sort_unstable();
        distinct.dedup();
        if let Some(&part) = distinct
            .iter()
            .find(|&&p| p < 1 || p > session.total_parts)
        {
            return Err(StowageError::PartOutOfRange {
                part,
                total: session.total_parts,
            });
        }
        if distinct.len() as i32 != session.total_parts {
            return Err(StowageError::IncompleteUpload {
                expected: session.total_parts,
                got: distinct.len() as i32,
            });
        }

        let quota_ids = self
            .quota_ids(&session.tenant_id, &session.created_by)
            .await?;
        let protocol = ReservationProtocol::new(self.pool);

        let completed = match self
            .store
            .complete_multipart_session(&session.storage_key, &session.session_id, &distinct)
            .await
        {
            Ok(completed) => completed,
            Err(e) => {
                // Backend failure terminates the attempt: compensating
                // release, then propagate.
                let repo = SessionRepository::new(self.pool);
                if repo.mark_aborted(id).await?.is_some() {
                    protocol.release_all(&quota_ids, session.total_size).await?;
                }
                return Err(StowageError::StorageBackend(e.to_string()));
            }
        };

        // Claim the terminal transition before any quota settlement, so
        // a racing abort or reaper sweep cannot settle the same
        // reservations twice.
        let done = match SessionRepository::new(self.pool).mark_completed(id).await? {
            Some(done) => done,
            None => {
                // Another path settled the session while the backend
                // was finalizing; it released the reservations, so the
                // assembled object is an orphan to discard.
                if let Err(rm_err) = self.store.remove_object(&session.storage_key).await {
                    warn!(session = id, error = %rm_err, "failed to remove orphan object");
                }
                return Err(StowageError::UploadNotActive(id.to_string()));
            }
        };

        // From here the reservations belong to this path exclusively;
        // any failure below must release them before propagating.
        let record = match FileRepository::new(self.pool)
            .create(&NewFileRecord {
                tenant_id: session.tenant_id.clone(),
                filename: session.filename.clone(),
                storage_key: session.storage_key.clone(),
                size_bytes: completed.size as i64,
                checksum: completed.checksum,
                created_by: session.created_by.clone(),
            })
            .await
        {
            Ok(record) => record,
            Err(e) => {
                if let Err(rm_err) = self.store.remove_object(&session.storage_key).await {
                    warn!(session = id, error = %rm_err, "failed to remove orphan object");
                }
                protocol.release_all(&quota_ids, session.total_size).await?;
                return Err(e);
            }
        };

        if let Err(e) = protocol.commit_all(&quota_ids, session.total_size).await {
            // commit_all rolled back its partial commits, so a plain
            // release settles the reservations.
            if let Err(del_err) = FileRepository::new(self.pool).mark_deleted(record.id).await {
                warn!(session = id, error = %del_err, "failed to remove record of failed commit");
            }
            if let Err(rm_err) = self.store.remove_object(&session.storage_key).await {
                warn!(session = id, error = %rm_err, "failed to remove orphan object");
            }
            protocol.release_all(&quota_ids, session.total_size).await?;
            return Err(e);
        }

        Ok((done, record))
    }

    /// Abandon the transfer: abort the backend session, release both
    /// reservations, mark the session aborted.
    pub async fn abort(&self, id: i64) -> Result<MultipartUploadSession> {
        let session = self.get_active(id, false).await?;

        // Claim the terminal transition first so a racing complete or
        // a reaper sweep cannot double-release the reservations.
        let aborted = SessionRepository::new(self.pool)
            .mark_aborted(id)
            .await?
            .ok_or_else(|| StowageError::UploadNotActive(id.to_string()))?;

        if let Err(e) = self
            .store
            .abort_multipart_session(&session.storage_key, &session.session_id)
            .await
        {
            // Staged parts may leak on the backend, but abandoning the
            // reservation would leak quota permanently. Keep going.
            warn!(session = id, error = %e, "backend abort failed");
        }

        let quota_ids = self
            .quota_ids(&session.tenant_id, &session.created_by)
            .await?;
        ReservationProtocol::new(self.pool)
            .release_all(&quota_ids, session.total_size)
            .await?;

        Ok(aborted)
    }

    /// Completion percentage for a session.
    pub async fn progress(&self, id: i64) -> Result<f64> {
        Ok(self.get(id).await?.progress())
    }

    /// Part numbers still missing from a session.
    pub async fn remaining_parts(&self, id: i64) -> Result<Vec<i32>> {
        Ok(self.get(id).await?.remaining_parts())
    }
}

/// Object key for a fresh upload: tenant prefix plus a uuid, keeping
/// the original extension.
pub(crate) fn object_key(tenant_id: &str, filename: &str) -> String {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.len() <= 10 && ext.chars().all(char::is_alphanumeric))
        .unwrap_or("bin");
    format!("{tenant_id}/{}.{}", Uuid::new_v4(), ext.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;
    use crate::store::{CompletedObject, FsObjectStore, PartInfo};
    use crate::Database;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Store that settles the target session the way a reaper sweep
    /// would (abort claim plus reservation release) while the final
    /// assembly is in flight, then lets the assembly proceed.
    struct AbortDuringFinalize {
        inner: FsObjectStore,
        pool: DbPool,
        target: i64,
        quota_ids: [i64; 2],
        total_size: i64,
    }

    #[async_trait]
    impl ObjectStore for AbortDuringFinalize {
        async fn put_object(&self, key: &str, data: &[u8]) -> crate::Result<()> {
            self.inner.put_object(key, data).await
        }

        async fn get_object(&self, key: &str) -> crate::Result<Vec<u8>> {
            self.inner.get_object(key).await
        }

        async fn remove_object(&self, key: &str) -> crate::Result<bool> {
            self.inner.remove_object(key).await
        }

        async fn new_multipart_session(&self, key: &str) -> crate::Result<String> {
            self.inner.new_multipart_session(key).await
        }

        async fn put_part(
            &self,
            key: &str,
            session_id: &str,
            part_number: i32,
            data: &[u8],
        ) -> crate::Result<PartInfo> {
            self.inner.put_part(key, session_id, part_number, data).await
        }

        async fn list_parts(&self, key: &str, session_id: &str) -> crate::Result<Vec<PartInfo>> {
            self.inner.list_parts(key, session_id).await
        }

        async fn complete_multipart_session(
            &self,
            key: &str,
            session_id: &str,
            parts: &[i32],
        ) -> crate::Result<CompletedObject> {
            let repo = SessionRepository::new(&self.pool);
            if repo.mark_aborted(self.target).await?.is_some() {
                ReservationProtocol::new(&self.pool)
                    .release_all(&self.quota_ids, self.total_size)
                    .await?;
            }
            self.inner.complete_multipart_session(key, session_id, parts).await
        }

        async fn abort_multipart_session(&self, key: &str, session_id: &str) -> crate::Result<()> {
            self.inner.abort_multipart_session(key, session_id).await
        }

        async fn presigned_get(
            &self,
            key: &str,
            expiry: std::time::Duration,
        ) -> crate::Result<String> {
            self.inner.presigned_get(key, expiry).await
        }
    }

    async fn setup() -> (Database, TempDir, FsObjectStore, Config) {
        let db = Database::open_in_memory().await.unwrap();
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path()).unwrap();
        let mut config = Config::default();
        config.quota.default_tenant_limit_bytes = 100_000_000;
        config.quota.default_user_limit_bytes = 100_000_000;
        (db, dir, store, config)
    }

    #[tokio::test]
    async fn test_initiate_computes_parts_and_reserves() {
        let (db, _dir, store, config) = setup().await;
        let tracker = MultipartUploadTracker::new(db.pool(), &store, &config);

        let session = tracker
            .initiate("acme", "u1", "video.mp4", 25_000_000, Some(5_000_000))
            .await
            .unwrap();

        assert_eq!(session.total_parts, 5);
        assert_eq!(session.status, UploadStatus::InProgress);

        let tenant = QuotaRepository::new(db.pool())
            .get(&QuotaSubject::tenant("acme"))
            .await
            .unwrap()
            .unwrap();
        let user = QuotaRepository::new(db.pool())
            .get(&QuotaSubject::user("acme", "u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tenant.reserved_bytes, 25_000_000);
        assert_eq!(user.reserved_bytes, 25_000_000);
    }

    #[tokio::test]
    async fn test_initiate_rejects_unknown_total_size() {
        let (db, _dir, store, config) = setup().await;
        let tracker = MultipartUploadTracker::new(db.pool(), &store, &config);

        let result = tracker.initiate("acme", "u1", "f.bin", 0, None).await;
        assert!(matches!(result, Err(StowageError::Validation(_))));
    }

    #[tokio::test]
    async fn test_initiate_over_quota_leaves_no_reservation() {
        let (db, _dir, store, mut config) = setup().await;
        config.quota.default_user_limit_bytes = 1_000;
        let tracker = MultipartUploadTracker::new(db.pool(), &store, &config);

        let result = tracker
            .initiate("acme", "u1", "f.bin", 10_000, Some(5_000))
            .await;
        assert!(matches!(result, Err(StowageError::QuotaExceeded { .. })));

        // The tenant-level reservation taken before the user-level
        // failure must have been rolled back.
        let tenant = QuotaRepository::new(db.pool())
            .get(&QuotaSubject::tenant("acme"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tenant.reserved_bytes, 0);
    }

    #[tokio::test]
    async fn test_record_part_idempotent_and_progress() {
        let (db, _dir, store, config) = setup().await;
        let tracker = MultipartUploadTracker::new(db.pool(), &store, &config);

        let session = tracker
            .initiate("acme", "u1", "v.bin", 25_000_000, Some(5_000_000))
            .await
            .unwrap();

        tracker.record_part(session.id, 1).await.unwrap();
        tracker.record_part(session.id, 2).await.unwrap();
        tracker.record_part(session.id, 3).await.unwrap();
        let after_dup = tracker.record_part(session.id, 3).await.unwrap();

        assert_eq!(after_dup.parts().into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(tracker.progress(session.id).await.unwrap(), 60.0);
        assert_eq!(tracker.remaining_parts(session.id).await.unwrap(), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_record_part_out_of_range() {
        let (db, _dir, store, config) = setup().await;
        let tracker = MultipartUploadTracker::new(db.pool(), &store, &config);

        let session = tracker
            .initiate("acme", "u1", "v.bin", 10_000_000, Some(5_000_000))
            .await
            .unwrap();

        let too_high = tracker.record_part(session.id, 3).await;
        assert!(matches!(
            too_high,
            Err(StowageError::PartOutOfRange { part: 3, total: 2 })
        ));

        let too_low = tracker.record_part(session.id, 0).await;
        assert!(matches!(too_low, Err(StowageError::PartOutOfRange { .. })));
    }

    #[tokio::test]
    async fn test_full_upload_commits_reservations() {
        let (db, _dir, store, config) = setup().await;
        let tracker = MultipartUploadTracker::new(db.pool(), &store, &config);

        let session = tracker
            .initiate("acme", "u1", "doc.txt", 10, Some(5))
            .await
            .unwrap();

        tracker.upload_part(session.id, 1, b"hello").await.unwrap();
        tracker.upload_part(session.id, 2, b"world").await.unwrap();

        let (done, record) = tracker.complete(session.id, None).await.unwrap();
        assert_eq!(done.status, UploadStatus::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(record.size_bytes, 10);
        assert_eq!(record.checksum, crate::dedup::checksum_hex(b"helloworld"));

        let tenant = QuotaRepository::new(db.pool())
            .get(&QuotaSubject::tenant("acme"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tenant.reserved_bytes, 0);
        assert_eq!(tenant.used_bytes, 10);
        assert_eq!(tenant.file_count_used, 1);

        // The assembled object is readable under the session's key
        assert_eq!(store.get_object(&done.storage_key).await.unwrap(), b"helloworld");
    }

    #[tokio::test]
    async fn test_complete_with_missing_parts() {
        let (db, _dir, store, config) = setup().await;
        let tracker = MultipartUploadTracker::new(db.pool(), &store, &config);

        let session = tracker
            .initiate("acme", "u1", "doc.txt", 10, Some(5))
            .await
            .unwrap();
        tracker.upload_part(session.id, 1, b"hello").await.unwrap();

        let result = tracker.complete(session.id, None).await;
        assert!(matches!(
            result,
            Err(StowageError::IncompleteUpload { expected: 2, got: 1 })
        ));

        // Still in progress and resumable
        let current = tracker.get(session.id).await.unwrap();
        assert_eq!(current.status, UploadStatus::InProgress);
        assert_eq!(current.remaining_parts(), vec![2]);
    }

    #[tokio::test]
    async fn test_complete_losing_terminal_race_settles_nothing() {
        let (db, _dir, store, config) = setup().await;
        let tracker = MultipartUploadTracker::new(db.pool(), &store, &config);

        let session = tracker
            .initiate("acme", "u1", "doc.txt", 10, Some(5))
            .await
            .unwrap();
        tracker.upload_part(session.id, 1, b"hello").await.unwrap();
        tracker.upload_part(session.id, 2, b"world").await.unwrap();

        // A second transfer holding its own live reservation
        let bystander = tracker
            .initiate("acme", "u1", "other.bin", 10, Some(5))
            .await
            .unwrap();

        let quota_ids = tracker.quota_ids("acme", "u1").await.unwrap();
        let racing_store = AbortDuringFinalize {
            inner: store.clone(),
            pool: db.pool().clone(),
            target: session.id,
            quota_ids,
            total_size: 10,
        };
        let racing = MultipartUploadTracker::new(db.pool(), &racing_store, &config);

        let result = racing.complete(session.id, None).await;
        assert!(matches!(result, Err(StowageError::UploadNotActive(_))));

        // The losing complete must not have settled anything: no usage
        // committed, no file record, no orphan object, and the other
        // session's reservation untouched.
        let tenant = QuotaRepository::new(db.pool())
            .get(&QuotaSubject::tenant("acme"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tenant.used_bytes, 0);
        assert_eq!(tenant.reserved_bytes, bystander.total_size);
        assert_eq!(tenant.file_count_used, 0);

        let checksum = crate::dedup::checksum_hex(b"helloworld");
        assert!(FileRepository::new(db.pool())
            .find_by_checksum("acme", &checksum)
            .await
            .unwrap()
            .is_none());
        assert!(store.get_object(&session.storage_key).await.is_err());
    }

    #[tokio::test]
    async fn test_complete_releases_when_record_insert_fails() {
        let (db, _dir, store, config) = setup().await;
        let tracker = MultipartUploadTracker::new(db.pool(), &store, &config);

        let session = tracker
            .initiate("acme", "u1", "doc.txt", 10, Some(5))
            .await
            .unwrap();
        tracker.upload_part(session.id, 1, b"hello").await.unwrap();
        tracker.upload_part(session.id, 2, b"world").await.unwrap();

        // Occupy the session's storage key so the record insert
        // collides with the unique constraint.
        FileRepository::new(db.pool())
            .create(&NewFileRecord {
                tenant_id: "acme".to_string(),
                filename: "squatter.bin".to_string(),
                storage_key: session.storage_key.clone(),
                size_bytes: 1,
                checksum: "cafe".to_string(),
                created_by: "u1".to_string(),
            })
            .await
            .unwrap();

        let result = tracker.complete(session.id, None).await;
        assert!(matches!(result, Err(StowageError::Database(_))));

        // Compensated on the same path: reservations released, no
        // usage committed, assembled object removed.
        let tenant = QuotaRepository::new(db.pool())
            .get(&QuotaSubject::tenant("acme"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tenant.reserved_bytes, 0);
        assert_eq!(tenant.used_bytes, 0);
        assert_eq!(tenant.file_count_used, 0);
        assert!(store.get_object(&session.storage_key).await.is_err());

        // The session settled terminally; nothing is left for the
        // reaper to release twice.
        assert!(tracker.get(session.id).await.unwrap().status.is_terminal());
    }

    #[tokio::test]
    async fn test_complete_rejects_out_of_range_supplied_parts() {
        let (db, _dir, store, config) = setup().await;
        let tracker = MultipartUploadTracker::new(db.pool(), &store, &config);

        let session = tracker
            .initiate("acme", "u1", "v.bin", 25_000_000, Some(5_000_000))
            .await
            .unwrap();

        // Right length, wrong values: must fail before touching the
        // backend, leaving the session resumable.
        let result = tracker.complete(session.id, Some(&[2, 3, 4, 5, 6])).await;
        assert!(matches!(
            result,
            Err(StowageError::PartOutOfRange { part: 6, total: 5 })
        ));

        let current = tracker.get(session.id).await.unwrap();
        assert_eq!(current.status, UploadStatus::InProgress);

        let tenant = QuotaRepository::new(db.pool())
            .get(&QuotaSubject::tenant("acme"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tenant.reserved_bytes, 25_000_000);
    }

    #[tokio::test]
    async fn test_abort_releases_reservations() {
        let (db, _dir, store, config) = setup().await;
        let tracker = MultipartUploadTracker::new(db.pool(), &store, &config);

        let session = tracker
            .initiate("acme", "u1", "doc.txt", 10, Some(5))
            .await
            .unwrap();
        tracker.upload_part(session.id, 1, b"hello").await.unwrap();

        let aborted = tracker.abort(session.id).await.unwrap();
        assert_eq!(aborted.status, UploadStatus::Aborted);

        let tenant = QuotaRepository::new(db.pool())
            .get(&QuotaSubject::tenant("acme"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tenant.reserved_bytes, 0);
        assert_eq!(tenant.used_bytes, 0);
    }

    #[tokio::test]
    async fn test_terminal_sessions_reject_further_transitions() {
        let (db, _dir, store, config) = setup().await;
        let tracker = MultipartUploadTracker::new(db.pool(), &store, &config);

        let session = tracker
            .initiate("acme", "u1", "doc.txt", 10, Some(5))
            .await
            .unwrap();
        tracker.abort(session.id).await.unwrap();

        assert!(matches!(
            tracker.abort(session.id).await,
            Err(StowageError::UploadNotActive(_))
        ));
        assert!(matches!(
            tracker.complete(session.id, None).await,
            Err(StowageError::UploadNotActive(_))
        ));
        assert!(matches!(
            tracker.record_part(session.id, 1).await,
            Err(StowageError::UploadNotActive(_))
        ));

        // Releases are floor-clamped: the double abort attempt must not
        // have driven counters negative.
        let tenant = QuotaRepository::new(db.pool())
            .get(&QuotaSubject::tenant("acme"))
            .await
            .unwrap()
            .unwrap();
        assert!(tenant.reserved_bytes >= 0);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (db, _dir, store, config) = setup().await;
        let tracker = MultipartUploadTracker::new(db.pool(), &store, &config);

        assert!(matches!(
            tracker.record_part(999, 1).await,
            Err(StowageError::UploadNotFound(_))
        ));
        assert!(matches!(
            tracker.progress(999).await,
            Err(StowageError::UploadNotFound(_))
        ));
    }

    #[test]
    fn test_object_key_keeps_extension() {
        let key = object_key("acme", "Report.PDF");
        assert!(key.starts_with("acme/"));
        assert!(key.ends_with(".pdf"));

        let no_ext = object_key("acme", "README");
        assert!(no_ext.ends_with(".bin"));
    }
}
