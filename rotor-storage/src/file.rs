//! Filesystem backend
//!
//! One file per key under `<dir>/<partition>/<key>`. Partition
//! subdirectories are created lazily and concurrent creation by another
//! process is tolerated. The claim primitive maps onto the OS unlink
//! semantics: a `NotFound` from `remove_file` means another process
//! already removed the entry, reported as `Ok(false)`.
//!
//! Writes go through a hidden temporary file followed by a rename, so a
//! reader never observes a half-written value.

use crate::{Result, Storage, StorageError};
use async_trait::async_trait;
use rotor_core::Partition;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;

/// Store keeping every record as a file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    directory: PathBuf,
}

impl FileStorage {
    /// Creates a store rooted at `directory`. The directory itself is
    /// only created on first write.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        if directory.as_os_str().is_empty() {
            return Err(StorageError::Unavailable(
                "the directory for shared engine state is not specified".into(),
            ));
        }
        Ok(Self { directory })
    }

    fn partition_dir(&self, partition: Partition) -> PathBuf {
        self.directory.join(partition.as_str())
    }

    fn entry_path(&self, key: &str, partition: Partition) -> PathBuf {
        self.partition_dir(partition).join(key)
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str, partition: Partition) -> Result<Option<Vec<u8>>> {
        match fs::read(self.entry_path(key, partition)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, partition: Partition, value: &[u8]) -> Result<()> {
        let dir = self.partition_dir(partition);
        // Idempotent, so a parallel process creating the same partition
        // directory is not an error.
        fs::create_dir_all(&dir).await?;

        let tmp = dir.join(format!(".{key}.tmp"));
        fs::write(&tmp, value).await?;
        fs::rename(&tmp, self.entry_path(key, partition)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str, partition: Partition) -> Result<bool> {
        match fs::remove_file(self.entry_path(key, partition)).await {
            Ok(()) => Ok(true),
            // Someone else already removed it: a lost claim, not an error.
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn has(&self, key: &str, partition: Partition) -> Result<bool> {
        match fs::metadata(self.entry_path(key, partition)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self, partition: Partition) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(self.partition_dir(partition)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                // In-flight temporary files are hidden.
                if !name.starts_with('.') {
                    keys.push(name.to_string());
                }
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FileStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        (dir, storage)
    }

    #[test]
    fn empty_directory_is_rejected() {
        assert!(matches!(
            FileStorage::new(""),
            Err(StorageError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn lazily_creates_partition_directories() {
        let (_dir, storage) = store();

        assert_eq!(storage.keys(Partition::Job).await.unwrap(), Vec::<String>::new());

        storage.set("1-10-5-a", Partition::Job, b"body").await.unwrap();
        assert_eq!(
            storage.get("1-10-5-a", Partition::Job).await.unwrap(),
            Some(b"body".to_vec())
        );
        assert_eq!(storage.keys(Partition::Job).await.unwrap(), vec!["1-10-5-a"]);
    }

    #[tokio::test]
    async fn delete_reports_whether_it_removed_anything() {
        let (_dir, storage) = store();
        storage.set("k", Partition::Result, b"v").await.unwrap();

        assert!(storage.delete("k", Partition::Result).await.unwrap());
        assert!(!storage.delete("k", Partition::Result).await.unwrap());
        assert!(!storage.has("k", Partition::Result).await.unwrap());
    }

    #[tokio::test]
    async fn overwrite_replaces_the_value() {
        let (_dir, storage) = store();
        storage.set("k", Partition::Heartbeat, b"one").await.unwrap();
        storage.set("k", Partition::Heartbeat, b"two").await.unwrap();

        assert_eq!(
            storage.get("k", Partition::Heartbeat).await.unwrap(),
            Some(b"two".to_vec())
        );
        assert_eq!(storage.keys(Partition::Heartbeat).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn partitions_do_not_collide() {
        let (_dir, storage) = store();
        storage.set("same", Partition::Job, b"job").await.unwrap();
        storage.set("same", Partition::Result, b"result").await.unwrap();

        assert_eq!(
            storage.get("same", Partition::Job).await.unwrap(),
            Some(b"job".to_vec())
        );
        assert_eq!(
            storage.get("same", Partition::Result).await.unwrap(),
            Some(b"result".to_vec())
        );
    }
}
