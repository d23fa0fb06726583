//! Caller-facing upload surface.
//!
//! This is the logical operation set a host application binds to its
//! transport: single-shot uploads with deduplication, the multipart
//! session operations, and quota reads.

use tracing::{debug, warn};

use super::session::MultipartUploadSession;
use super::tracker::{object_key, MultipartUploadTracker};
use crate::config::Config;
use crate::db::DbPool;
use crate::dedup::{checksum_hex, DeduplicationIndex};
use crate::file::{FileRecord, FileRepository, NewFileRecord};
use crate::quota::{QuotaRepository, QuotaSubject, ReservationProtocol, StorageQuota, SubjectType};
use crate::store::ObjectStore;
use crate::{Result, StowageError};

/// Request data for a single-shot upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Owning tenant.
    pub tenant_id: String,
    /// Uploading user.
    pub created_by: String,
    /// Original filename.
    pub filename: String,
    /// File content.
    pub content: Vec<u8>,
}

impl UploadRequest {
    /// Create a new upload request.
    pub fn new(
        tenant_id: impl Into<String>,
        created_by: impl Into<String>,
        filename: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            created_by: created_by.into(),
            filename: filename.into(),
            content,
        }
    }
}

/// Result of a single-shot upload.
#[derive(Debug)]
pub struct UploadOutcome {
    /// The durable file record, freshly created or reused.
    pub record: FileRecord,
    /// True when an existing file with the same checksum was reused
    /// and no bytes were written.
    pub deduplicated: bool,
}

/// High-level upload service over the ledger, the dedup index, the
/// session tracker, and the object store.
pub struct UploadService<'a> {
    pool: &'a DbPool,
    store: &'a dyn ObjectStore,
    config: &'a Config,
}

impl<'a> UploadService<'a> {
    /// Create a new service.
    pub fn new(pool: &'a DbPool, store: &'a dyn ObjectStore, config: &'a Config) -> Self {
        Self { pool, store, config }
    }

    fn tracker(&self) -> MultipartUploadTracker<'a> {
        MultipartUploadTracker::new(self.pool, self.store, self.config)
    }

    /// Single-shot upload.
    ///
    /// Reserves quota, hashes the content, consults the deduplication
    /// index, and only then writes to the object store. Every failure
    /// after the reservation releases it on the same path; a dedup hit
    /// releases it too, since no bytes are stored.
    pub async fn upload(&self, request: &UploadRequest) -> Result<UploadOutcome> {
        if request.filename.chars().count() > self.config.upload.max_filename_length {
            return Err(StowageError::Validation(format!(
                "filename exceeds {} characters",
                self.config.upload.max_filename_length
            )));
        }
        let size = request.content.len() as i64;
        if size == 0 {
            return Err(StowageError::Validation("empty upload".to_string()));
        }

        let quota_ids = self
            .tracker()
            .quota_ids(&request.tenant_id, &request.created_by)
            .await?;
        let protocol = ReservationProtocol::new(self.pool);
        protocol.reserve_all(&quota_ids, size).await?;

        let checksum = checksum_hex(&request.content);

        match DeduplicationIndex::new(self.pool)
            .find_by_checksum(&request.tenant_id, &checksum)
            .await
        {
            Ok(Some(existing)) => {
                debug!(file = existing.id, %checksum, "dedup hit, reusing existing file");
                protocol.release_all(&quota_ids, size).await?;
                return Ok(UploadOutcome {
                    record: existing,
                    deduplicated: true,
                });
            }
            Ok(None) => {}
            Err(e) => {
                protocol.release_all(&quota_ids, size).await?;
                return Err(e);
            }
        }

        let storage_key = object_key(&request.tenant_id, &request.filename);
        if let Err(e) = self.store.put_object(&storage_key, &request.content).await {
            protocol.release_all(&quota_ids, size).await?;
            return Err(StowageError::StorageBackend(e.to_string()));
        }

        let record = match FileRepository::new(self.pool)
            .create(&NewFileRecord {
                tenant_id: request.tenant_id.clone(),
                filename: request.filename.clone(),
                storage_key: storage_key.clone(),
                size_bytes: size,
                checksum,
                created_by: request.created_by.clone(),
            })
            .await
        {
            Ok(record) => record,
            Err(e) => {
                if let Err(rm_err) = self.store.remove_object(&storage_key).await {
                    warn!(%storage_key, error = %rm_err, "failed to remove orphan object");
                }
                protocol.release_all(&quota_ids, size).await?;
                return Err(e);
            }
        };

        protocol.commit_all(&quota_ids, size).await?;

        Ok(UploadOutcome {
            record,
            deduplicated: false,
        })
    }

    /// Open a multipart session. See
    /// [`MultipartUploadTracker::initiate`].
    pub async fn initiate_upload(
        &self,
        tenant_id: &str,
        created_by: &str,
        filename: &str,
        total_size: i64,
        part_size: Option<i64>,
    ) -> Result<MultipartUploadSession> {
        self.tracker()
            .initiate(tenant_id, created_by, filename, total_size, part_size)
            .await
    }

    /// Store and record one part of a multipart session.
    pub async fn upload_part(
        &self,
        session_id: i64,
        part_number: i32,
        data: &[u8],
    ) -> Result<MultipartUploadSession> {
        self.tracker().upload_part(session_id, part_number, data).await
    }

    /// Finalize a multipart session.
    pub async fn complete_upload(
        &self,
        session_id: i64,
        parts: Option<&[i32]>,
    ) -> Result<(MultipartUploadSession, FileRecord)> {
        self.tracker().complete(session_id, parts).await
    }

    /// Abandon a multipart session.
    pub async fn abort_upload(&self, session_id: i64) -> Result<MultipartUploadSession> {
        self.tracker().abort(session_id).await
    }

    /// Completion percentage of a multipart session.
    pub async fn get_upload_progress(&self, session_id: i64) -> Result<f64> {
        self.tracker().progress(session_id).await
    }

    /// Part numbers a multipart session is still missing.
    pub async fn list_remaining_parts(&self, session_id: i64) -> Result<Vec<i32>> {
        self.tracker().remaining_parts(session_id).await
    }

    /// The subject's quota row, lazily created with configured defaults.
    pub async fn get_quota(&self, subject: &QuotaSubject) -> Result<StorageQuota> {
        let default_limit = match subject.subject_type {
            SubjectType::User => self.config.quota.default_user_limit_bytes,
            _ => self.config.quota.default_tenant_limit_bytes,
        };
        QuotaRepository::new(self.pool)
            .get_or_create(
                subject,
                default_limit,
                self.config.quota.default_file_count_limit,
            )
            .await
    }

    /// Whether `size` more bytes currently fit under the subject's
    /// quota. Advisory: only a reservation actually claims the space.
    pub async fn check_quota(&self, subject: &QuotaSubject, size: i64) -> Result<bool> {
        Ok(self.get_quota(subject).await?.can_allocate(size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsObjectStore;
    use crate::Database;
    use tempfile::TempDir;

    async fn setup() -> (Database, TempDir, FsObjectStore, Config) {
        let db = Database::open_in_memory().await.unwrap();
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path()).unwrap();
        let mut config = Config::default();
        config.quota.default_tenant_limit_bytes = 1_000_000;
        config.quota.default_user_limit_bytes = 1_000_000;
        (db, dir, store, config)
    }

    #[tokio::test]
    async fn test_upload_success_commits_quota() {
        let (db, _dir, store, config) = setup().await;
        let service = UploadService::new(db.pool(), &store, &config);

        let outcome = service
            .upload(&UploadRequest::new("acme", "u1", "hello.txt", b"Hello, World!".to_vec()))
            .await
            .unwrap();

        assert!(!outcome.deduplicated);
        assert_eq!(outcome.record.size_bytes, 13);
        assert_eq!(outcome.record.filename, "hello.txt");

        let tenant = service.get_quota(&QuotaSubject::tenant("acme")).await.unwrap();
        assert_eq!(tenant.used_bytes, 13);
        assert_eq!(tenant.reserved_bytes, 0);
        assert_eq!(tenant.file_count_used, 1);

        // Bytes are durable under the record's key
        assert_eq!(
            store.get_object(&outcome.record.storage_key).await.unwrap(),
            b"Hello, World!"
        );
    }

    #[tokio::test]
    async fn test_upload_dedup_hit_releases_reservation() {
        let (db, _dir, store, config) = setup().await;
        let service = UploadService::new(db.pool(), &store, &config);

        let first = service
            .upload(&UploadRequest::new("acme", "u1", "a.txt", b"same bytes".to_vec()))
            .await
            .unwrap();
        let second = service
            .upload(&UploadRequest::new("acme", "u2", "b.txt", b"same bytes".to_vec()))
            .await
            .unwrap();

        assert!(second.deduplicated);
        assert_eq!(second.record.id, first.record.id);

        // Only the first upload committed usage; the second released
        let tenant = service.get_quota(&QuotaSubject::tenant("acme")).await.unwrap();
        assert_eq!(tenant.used_bytes, 10);
        assert_eq!(tenant.reserved_bytes, 0);
        assert_eq!(tenant.file_count_used, 1);
    }

    #[tokio::test]
    async fn test_dedup_does_not_cross_tenants() {
        let (db, _dir, store, config) = setup().await;
        let service = UploadService::new(db.pool(), &store, &config);

        service
            .upload(&UploadRequest::new("acme", "u1", "a.txt", b"same bytes".to_vec()))
            .await
            .unwrap();
        let other = service
            .upload(&UploadRequest::new("globex", "u1", "a.txt", b"same bytes".to_vec()))
            .await
            .unwrap();

        assert!(!other.deduplicated);
    }

    #[tokio::test]
    async fn test_upload_quota_exceeded() {
        let (db, _dir, store, mut config) = setup().await;
        config.quota.default_user_limit_bytes = 5;
        let service = UploadService::new(db.pool(), &store, &config);

        let result = service
            .upload(&UploadRequest::new("acme", "u1", "big.bin", vec![0u8; 100]))
            .await;
        assert!(matches!(result, Err(StowageError::QuotaExceeded { .. })));

        // Nothing left reserved on either ledger row
        let tenant = service.get_quota(&QuotaSubject::tenant("acme")).await.unwrap();
        let user = service
            .get_quota(&QuotaSubject::user("acme", "u1"))
            .await
            .unwrap();
        assert_eq!(tenant.reserved_bytes, 0);
        assert_eq!(user.reserved_bytes, 0);
    }

    #[tokio::test]
    async fn test_upload_empty_content_rejected() {
        let (db, _dir, store, config) = setup().await;
        let service = UploadService::new(db.pool(), &store, &config);

        let result = service
            .upload(&UploadRequest::new("acme", "u1", "empty.txt", Vec::new()))
            .await;
        assert!(matches!(result, Err(StowageError::Validation(_))));
    }

    #[tokio::test]
    async fn test_upload_filename_too_long() {
        let (db, _dir, store, config) = setup().await;
        let service = UploadService::new(db.pool(), &store, &config);

        let long_name = "a".repeat(300);
        let result = service
            .upload(&UploadRequest::new("acme", "u1", long_name, b"x".to_vec()))
            .await;
        assert!(matches!(result, Err(StowageError::Validation(_))));
    }

    #[tokio::test]
    async fn test_check_quota() {
        let (db, _dir, store, config) = setup().await;
        let service = UploadService::new(db.pool(), &store, &config);

        let subject = QuotaSubject::user("acme", "u1");
        assert!(service.check_quota(&subject, 1_000_000).await.unwrap());
        assert!(!service.check_quota(&subject, 1_000_001).await.unwrap());

        service
            .upload(&UploadRequest::new("acme", "u1", "f.bin", vec![0u8; 500_000]))
            .await
            .unwrap();
        assert!(!service.check_quota(&subject, 600_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_multipart_delegation_round_trip() {
        let (db, _dir, store, config) = setup().await;
        let service = UploadService::new(db.pool(), &store, &config);

        let session = service
            .initiate_upload("acme", "u1", "big.bin", 8, Some(4))
            .await
            .unwrap();
        service.upload_part(session.id, 1, b"aaaa").await.unwrap();
        assert_eq!(service.get_upload_progress(session.id).await.unwrap(), 50.0);
        assert_eq!(service.list_remaining_parts(session.id).await.unwrap(), vec![2]);

        service.upload_part(session.id, 2, b"bbbb").await.unwrap();
        let (done, record) = service.complete_upload(session.id, None).await.unwrap();
        assert_eq!(done.progress(), 100.0);
        assert_eq!(record.size_bytes, 8);
    }
}
