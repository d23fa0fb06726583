//! Content-addressable deduplication.
//!
//! Uploads are hashed before the durable object write; when a live
//! file with the same checksum already exists for the tenant, the
//! caller releases its reservation and reuses the existing record.
//! This is advisory: two concurrent uploads of identical content may
//! both commit, and that is acceptable.

use sha2::{Digest, Sha256};

use crate::db::DbPool;
use crate::file::{FileRecord, FileRepository};
use crate::Result;

/// Checksum → existing-file lookup.
pub struct DeduplicationIndex<'a> {
    pool: &'a DbPool,
}

impl<'a> DeduplicationIndex<'a> {
    /// Create a new index over the given pool.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Find a live file with this checksum inside the tenant.
    pub async fn find_by_checksum(
        &self,
        tenant_id: &str,
        checksum: &str,
    ) -> Result<Option<FileRecord>> {
        FileRepository::new(self.pool)
            .find_by_checksum(tenant_id, checksum)
            .await
    }
}

/// SHA-256 hex checksum of a byte slice.
pub fn checksum_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

/// Incremental SHA-256 hasher for content that arrives in pieces.
#[derive(Default)]
pub struct StreamingChecksum {
    hasher: Sha256,
}

impl StreamingChecksum {
    /// Start a fresh hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of content.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// Finish and return the hex digest.
    pub fn finalize(self) -> String {
        hex_encode(&self.hasher.finalize())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
