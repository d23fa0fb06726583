//! Object storage capability consumed by the upload paths.
//!
//! The trait mirrors the operations a cloud object store exposes; the
//! crate ships a filesystem-backed implementation for hosting without
//! one. Multipart operations are keyed by (object key, session id).

mod fs;

pub use fs::FsObjectStore;

use async_trait::async_trait;
use std::time::Duration;

use crate::Result;

/// One uploaded part as the backend sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    /// 1-based part number.
    pub part_number: i32,
    /// Part size in bytes.
    pub size: u64,
    /// Backend content tag for the part.
    pub etag: String,
}

/// Result of finalizing a multipart session.
#[derive(Debug, Clone)]
pub struct CompletedObject {
    /// Total object size in bytes.
    pub size: u64,
    /// SHA-256 hex checksum of the assembled object.
    pub checksum: String,
}

/// Object storage operations.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object in one shot.
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Fetch an object's content.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove an object. Returns false if it did not exist.
    async fn remove_object(&self, key: &str) -> Result<bool>;

    /// Open a multipart session for the given key, returning the
    /// backend session handle.
    async fn new_multipart_session(&self, key: &str) -> Result<String>;

    /// Store one part of a multipart session.
    async fn put_part(
        &self,
        key: &str,
        session_id: &str,
        part_number: i32,
        data: &[u8],
    ) -> Result<PartInfo>;

    /// List the parts the backend has for a session, ordered by part
    /// number. This listing is authoritative for completion checks.
    async fn list_parts(&self, key: &str, session_id: &str) -> Result<Vec<PartInfo>>;

    /// Assemble the parts into the final object and tear down the
    /// session.
    async fn complete_multipart_session(
        &self,
        key: &str,
        session_id: &str,
        parts: &[i32],
    ) -> Result<CompletedObject>;

    /// Abort a multipart session, discarding staged parts.
    async fn abort_multipart_session(&self, key: &str, session_id: &str) -> Result<()>;

    /// Produce a time-limited URL for fetching the object.
    async fn presigned_get(&self, key: &str, expiry: Duration) -> Result<String>;
}
