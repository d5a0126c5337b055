//! Rotor Storage
//!
//! The partitioned key-value store every engine process coordinates
//! through, plus its backends:
//! - [`MemoryStorage`]: an explicit in-process instance, used by tests
//!   and single-process embeddings
//! - [`FileStorage`]: one file per key under `<dir>/<partition>/`
//! - [`RedisStorage`]: one Redis hash per partition, every operation a
//!   single server-side-atomic round trip
//! - [`SharedMemoryStorage`]: POSIX shared memory with one named
//!   semaphore per partition (unix only)
//!
//! The store is the only shared mutable resource in the system. The
//! `delete` return value doubles as the claim primitive: whichever
//! process observes `true` owns the record it just removed.

pub mod file;
pub mod memory;
pub mod redis;
pub mod shm;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use redis::RedisStorage;
pub use shm::SharedMemoryStorage;

use async_trait::async_trait;
use rotor_core::Partition;
use thiserror::Error;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Failures surfaced by storage backends.
///
/// A failed `set` while submitting a job is fatal to that submission.
/// A failed `delete` during claims or cleanup is not routed through
/// this type at all: backends report "key was already gone" as
/// `Ok(false)`, because losing such a race is expected behavior.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend cannot be used in this environment at all.
    /// Surfaced at construction so the caller can pick another backend.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// Filesystem-level failure.
    #[error("filesystem storage error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote hash store failure.
    #[error("remote store error: {0}")]
    Remote(String),

    /// Shared memory segment or semaphore failure.
    #[error("shared memory error in {partition} partition: {detail}")]
    SharedMemory {
        /// Partition whose critical section failed.
        partition: Partition,
        /// Underlying OS-level detail.
        detail: String,
    },
}

impl From<::redis::RedisError> for StorageError {
    fn from(err: ::redis::RedisError) -> Self {
        StorageError::Remote(err.to_string())
    }
}

/// Partitioned key-value store shared by all engine processes.
///
/// Implementations must make each operation safe under concurrent
/// access from independent OS processes. For the filesystem and remote
/// backends that follows from the backend's own atomic create/delete
/// semantics; the shared memory backend wraps every index or value
/// mutation in a per-partition semaphore.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Returns the value stored under `key`, or `None` if absent.
    async fn get(&self, key: &str, partition: Partition) -> Result<Option<Vec<u8>>>;

    /// Creates or replaces the value stored under `key`.
    async fn set(&self, key: &str, partition: Partition, value: &[u8]) -> Result<()>;

    /// Removes `key`, reporting whether this call removed a live entry.
    ///
    /// `Ok(false)` means another process got there first; callers use
    /// this as the atomic claim primitive and as the "lost the cleanup
    /// race" signal.
    async fn delete(&self, key: &str, partition: Partition) -> Result<bool>;

    /// Whether `key` currently exists.
    async fn has(&self, key: &str, partition: Partition) -> Result<bool>;

    /// Lists all keys in `partition`, in unspecified order.
    async fn keys(&self, partition: Partition) -> Result<Vec<String>>;
}
