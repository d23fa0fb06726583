//! Stowage: multi-tenant file ingestion with quota accounting.
//!
//! The crate tracks storage quotas per tenant and per user, admits
//! uploads through a reserve/commit/release protocol so concurrent
//! transfers can never oversubscribe a ledger, stages large files as
//! multipart sessions, deduplicates by content checksum, and reclaims
//! abandoned sessions with a background reaper.
//!
//! # Example
//!
//! ```no_run
//! use stowage::{Config, Database, FsObjectStore, UploadRequest, UploadService};
//!
//! #[tokio::main]
//! async fn main() -> stowage::Result<()> {
//!     let config = Config::default();
//!     let db = Database::open(&config.database.path).await?;
//!     let store = FsObjectStore::new(&config.store.path)?;
//!
//!     let service = UploadService::new(db.pool(), &store, &config);
//!     let request = UploadRequest::new("acme", "u1", "report.pdf", b"...".to_vec());
//!     let outcome = service.upload(&request).await?;
//!     println!("stored as {}", outcome.record.storage_key);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod file;
pub mod logging;
pub mod quota;
pub mod reaper;
pub mod store;
pub mod upload;

pub use config::Config;
pub use db::Database;
pub use dedup::DeduplicationIndex;
pub use error::{Result, StowageError};
pub use file::{FileRecord, FileRepository, NewFileRecord};
pub use quota::{QuotaRepository, QuotaSubject, ReservationProtocol, StorageQuota, SubjectType};
pub use reaper::{ExpiryReaper, SweepStats};
pub use store::{CompletedObject, FsObjectStore, ObjectStore, PartInfo};
pub use upload::{
    MultipartUploadSession, MultipartUploadTracker, SessionRepository, UploadOutcome,
    UploadRequest, UploadService, UploadStatus,
};
