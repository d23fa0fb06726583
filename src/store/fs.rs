//! Filesystem-backed object store.
//!
//! Objects live under `{base}/objects/{key}`; multipart sessions stage
//! their parts under `{base}/staging/{session_id}/part.N` until the
//! session is completed (parts concatenated into the final object) or
//! aborted (staging directory removed).

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{CompletedObject, ObjectStore, PartInfo};
use crate::dedup::{checksum_hex, StreamingChecksum};
use crate::{Result, StowageError};

/// Local object store.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    base_path: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at the given directory.
    ///
    /// The objects and staging directories are created if missing.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(base_path.join("objects"))?;
        std::fs::create_dir_all(base_path.join("staging"))?;

        Ok(Self { base_path })
    }

    /// Get the base path of this store.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.base_path.join("objects").join(key))
    }

    fn staging_dir(&self, session_id: &str) -> Result<PathBuf> {
        validate_key(session_id)?;
        Ok(self.base_path.join("staging").join(session_id))
    }

    fn part_path(&self, session_id: &str, part_number: i32) -> Result<PathBuf> {
        Ok(self.staging_dir(session_id)?.join(format!("part.{part_number}")))
    }
}

/// Keys and session ids must not escape the store root.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(StowageError::Validation(format!("invalid object key: {key}")));
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        match fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StowageError::NotFound(format!("object {key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_object(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn new_multipart_session(&self, _key: &str) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        fs::create_dir_all(self.staging_dir(&session_id)?).await?;
        Ok(session_id)
    }

    async fn put_part(
        &self,
        _key: &str,
        session_id: &str,
        part_number: i32,
        data: &[u8],
    ) -> Result<PartInfo> {
        if part_number < 1 {
            return Err(StowageError::Validation(format!(
                "part number must be positive, got {part_number}"
            )));
        }

        let staging = self.staging_dir(session_id)?;
        if !staging.is_dir() {
            return Err(StowageError::NotFound(format!("multipart session {session_id}")));
        }

        let path = self.part_path(session_id, part_number)?;
        fs::write(&path, data).await?;

        Ok(PartInfo {
            part_number,
            size: data.len() as u64,
            etag: checksum_hex(data),
        })
    }

    async fn list_parts(&self, _key: &str, session_id: &str) -> Result<Vec<PartInfo>> {
        let staging = self.staging_dir(session_id)?;
        let mut entries = match fs::read_dir(&staging).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StowageError::NotFound(format!("multipart session {session_id}")))
            }
            Err(e) => return Err(e.into()),
        };

        let mut parts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(number) = name
                .to_str()
                .and_then(|n| n.strip_prefix("part."))
                .and_then(|n| n.parse::<i32>().ok())
            else {
                continue;
            };

            let content = fs::read(entry.path()).await?;
            parts.push(PartInfo {
                part_number: number,
                size: content.len() as u64,
                etag: checksum_hex(&content),
            });
        }

        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    async fn complete_multipart_session(
        &self,
        key: &str,
        session_id: &str,
        parts: &[i32],
    ) -> Result<CompletedObject> {
        let staging = self.staging_dir(session_id)?;
        if !staging.is_dir() {
            return Err(StowageError::NotFound(format!("multipart session {session_id}")));
        }

        let object_path = self.object_path(key)?;
        if let Some(parent) = object_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut ordered: Vec<i32> = parts.to_vec();
        ordered.sort_unstable();

        let mut hasher = StreamingChecksum::new();
        let mut size = 0u64;
        let mut object = fs::File::create(&object_path).await?;

        for part_number in ordered {
            let part_path = self.part_path(session_id, part_number)?;
            let content = match fs::read(&part_path).await {
                Ok(content) => content,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(StowageError::NotFound(format!(
                        "part {part_number} of session {session_id}"
                    )))
                }
                Err(e) => return Err(e.into()),
            };
            size += content.len() as u64;
            hasher.update(&content);
            object.write_all(&content).await?;
        }
        object.flush().await?;

        fs::remove_dir_all(&staging).await?;

        Ok(CompletedObject {
            size,
            checksum: hasher.finalize(),
        })
    }

    async fn abort_multipart_session(&self, _key: &str, session_id: &str) -> Result<()> {
        let staging = self.staging_dir(session_id)?;
        match fs::remove_dir_all(&staging).await {
            Ok(()) => Ok(()),
            // Aborting an unknown or already-aborted session is a no-op
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn presigned_get(&self, key: &str, expiry: Duration) -> Result<String> {
        let path = self.object_path(key)?;
        if !path.is_file() {
            return Err(StowageError::NotFound(format!("object {key}")));
        }
        let expires = Utc::now().timestamp() + expiry.as_secs() as i64;
        Ok(format!("file://{}?expires={expires}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FsObjectStore) {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_remove_object() {
        let (_dir, store) = setup();

        store.put_object("acme/a.txt", b"hello").await.unwrap();
        assert_eq!(store.get_object("acme/a.txt").await.unwrap(), b"hello");

        assert!(store.remove_object("acme/a.txt").await.unwrap());
        assert!(!store.remove_object("acme/a.txt").await.unwrap());
        assert!(matches!(
            store.get_object("acme/a.txt").await,
            Err(StowageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_multipart_round_trip() {
        let (_dir, store) = setup();

        let session = store.new_multipart_session("acme/big.bin").await.unwrap();
        store.put_part("acme/big.bin", &session, 2, b"world").await.unwrap();
        store.put_part("acme/big.bin", &session, 1, b"hello ").await.unwrap();

        let parts = store.list_parts("acme/big.bin", &session).await.unwrap();
        assert_eq!(
            parts.iter().map(|p| p.part_number).collect::<Vec<_>>(),
            vec![1, 2]
        );

        let completed = store
            .complete_multipart_session("acme/big.bin", &session, &[1, 2])
            .await
            .unwrap();
        assert_eq!(completed.size, 11);
        assert_eq!(completed.checksum, checksum_hex(b"hello world"));

        assert_eq!(store.get_object("acme/big.bin").await.unwrap(), b"hello world");

        // Staging is gone once completed
        assert!(matches!(
            store.list_parts("acme/big.bin", &session).await,
            Err(StowageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_put_part_overwrite_is_idempotent() {
        let (_dir, store) = setup();

        let session = store.new_multipart_session("k").await.unwrap();
        store.put_part("k", &session, 1, b"aaaa").await.unwrap();
        store.put_part("k", &session, 1, b"aaaa").await.unwrap();

        let parts = store.list_parts("k", &session).await.unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].size, 4);
    }

    #[tokio::test]
    async fn test_complete_with_missing_part() {
        let (_dir, store) = setup();

        let session = store.new_multipart_session("k").await.unwrap();
        store.put_part("k", &session, 1, b"only one").await.unwrap();

        let result = store.complete_multipart_session("k", &session, &[1, 2]).await;
        assert!(matches!(result, Err(StowageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_abort_discards_staging() {
        let (_dir, store) = setup();

        let session = store.new_multipart_session("k").await.unwrap();
        store.put_part("k", &session, 1, b"data").await.unwrap();

        store.abort_multipart_session("k", &session).await.unwrap();
        assert!(matches!(
            store.put_part("k", &session, 2, b"late").await,
            Err(StowageError::NotFound(_))
        ));

        // Aborting again is a no-op
        store.abort_multipart_session("k", &session).await.unwrap();
    }

    #[tokio::test]
    async fn test_presigned_get() {
        let (_dir, store) = setup();

        store.put_object("acme/a.txt", b"x").await.unwrap();
        let url = store
            .presigned_get("acme/a.txt", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.contains("expires="));
    }

    #[tokio::test]
    async fn test_key_traversal_rejected() {
        let (_dir, store) = setup();

        assert!(matches!(
            store.put_object("../escape", b"x").await,
            Err(StowageError::Validation(_))
        ));
        assert!(matches!(
            store.get_object("/abs").await,
            Err(StowageError::Validation(_))
        ));
    }
}
