//! Shared memory backend
//!
//! POSIX shared memory for hosts where workers and serving processes
//! share a machine but the filesystem is too slow and no network cache
//! is available.
//!
//! Layout per partition:
//! - one named semaphore guarding the partition's critical section;
//! - one fixed-size index object holding a serialized map from key to
//!   the id and length of its value object;
//! - one value object per key, created at exactly the value's size.
//!
//! Every index read, index write, value write and value delete happens
//! inside the partition's critical section. Replacing a value creates
//! the new object under a fresh id and unlinks the old one last; value
//! objects are never resized in place. The semaphore is never held
//! across an await point.

use crate::{Result, Storage, StorageError};
use async_trait::async_trait;
use rotor_core::Partition;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[cfg(unix)]
use std::ffi::CString;

/// Size of the per-partition key index object.
#[cfg(unix)]
const INDEX_CAPACITY: usize = 256 * 1024;

/// Location of a value inside the shared memory namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    /// Monotonic id naming the value object.
    id: u64,
    /// Exact byte length of the stored value.
    len: u64,
}

/// Serialized content of a partition's index object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IndexState {
    /// Next id to hand out for a value object.
    next_id: u64,
    /// Key to value-object mapping.
    entries: HashMap<String, IndexEntry>,
}

/// Store backed by POSIX shared memory. Unix only.
pub struct SharedMemoryStorage {
    #[cfg(unix)]
    partitions: [unix::PartitionState; 3],
    #[cfg(not(unix))]
    _never: std::convert::Infallible,
}

impl SharedMemoryStorage {
    /// Opens (creating if needed) the shared memory namespace `ns`.
    ///
    /// All processes of one deployment must use the same namespace; two
    /// deployments on one host must not share one. On non-unix targets
    /// construction fails with [`StorageError::Unavailable`].
    #[cfg(unix)]
    pub fn open(ns: &str) -> Result<Self> {
        let partitions = [
            unix::PartitionState::open(ns, Partition::Job)?,
            unix::PartitionState::open(ns, Partition::Result)?,
            unix::PartitionState::open(ns, Partition::Heartbeat)?,
        ];
        tracing::debug!(namespace = ns, "opened the shared memory store");
        Ok(Self { partitions })
    }

    #[cfg(not(unix))]
    pub fn open(_ns: &str) -> Result<Self> {
        Err(StorageError::Unavailable(
            "the shared memory backend requires POSIX shared memory and semaphores".into(),
        ))
    }

    /// Unlinks every object and semaphore of the namespace. Intended
    /// for teardown; live processes still holding mappings keep them
    /// until they exit.
    #[cfg(unix)]
    pub fn destroy(self) -> Result<()> {
        for partition in &self.partitions {
            partition.destroy()?;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn state(&self, partition: Partition) -> &unix::PartitionState {
        match partition {
            Partition::Job => &self.partitions[0],
            Partition::Result => &self.partitions[1],
            Partition::Heartbeat => &self.partitions[2],
        }
    }
}

#[cfg(unix)]
#[async_trait]
impl Storage for SharedMemoryStorage {
    async fn get(&self, key: &str, partition: Partition) -> Result<Option<Vec<u8>>> {
        let state = self.state(partition);
        let _guard = state.lock()?;
        let index = state.read_index()?;
        match index.entries.get(key) {
            Some(entry) => Ok(Some(state.read_value(entry)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, partition: Partition, value: &[u8]) -> Result<()> {
        let state = self.state(partition);
        let _guard = state.lock()?;
        let mut index = state.read_index()?;

        // Replacement writes the new object under a fresh id and
        // persists the index before touching the old object, so a
        // failure part-way leaves the previous value readable.
        let entry = IndexEntry {
            id: index.next_id,
            len: value.len() as u64,
        };
        index.next_id += 1;
        state.create_value(&entry, value)?;
        let replaced = index.entries.insert(key.to_string(), entry);
        state.write_index(&index)?;

        if let Some(old) = replaced {
            state.unlink_value(&old);
        }
        Ok(())
    }

    async fn delete(&self, key: &str, partition: Partition) -> Result<bool> {
        let state = self.state(partition);
        let _guard = state.lock()?;
        let mut index = state.read_index()?;

        match index.entries.remove(key) {
            Some(entry) => {
                state.unlink_value(&entry);
                state.write_index(&index)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn has(&self, key: &str, partition: Partition) -> Result<bool> {
        let state = self.state(partition);
        let _guard = state.lock()?;
        Ok(state.read_index()?.entries.contains_key(key))
    }

    async fn keys(&self, partition: Partition) -> Result<Vec<String>> {
        let state = self.state(partition);
        let _guard = state.lock()?;
        Ok(state.read_index()?.entries.keys().cloned().collect())
    }
}

#[cfg(not(unix))]
#[async_trait]
impl Storage for SharedMemoryStorage {
    async fn get(&self, _key: &str, _partition: Partition) -> Result<Option<Vec<u8>>> {
        match self._never {}
    }
    async fn set(&self, _key: &str, _partition: Partition, _value: &[u8]) -> Result<()> {
        match self._never {}
    }
    async fn delete(&self, _key: &str, _partition: Partition) -> Result<bool> {
        match self._never {}
    }
    async fn has(&self, _key: &str, _partition: Partition) -> Result<bool> {
        match self._never {}
    }
    async fn keys(&self, _partition: Partition) -> Result<Vec<String>> {
        match self._never {}
    }
}

#[cfg(unix)]
mod unix {
    use super::*;

    /// Semaphore handle plus naming for one partition.
    pub(super) struct PartitionState {
        partition: Partition,
        ns: String,
        sem: *mut libc::sem_t,
        sem_name: CString,
        index_name: CString,
    }

    // The semaphore pointer refers to a process-shared named semaphore;
    // libc's sem_wait/sem_post are thread safe on it.
    unsafe impl Send for PartitionState {}
    unsafe impl Sync for PartitionState {}

    /// Releases the partition's semaphore when dropped.
    pub(super) struct SectionGuard<'a> {
        state: &'a PartitionState,
    }

    impl Drop for SectionGuard<'_> {
        fn drop(&mut self) {
            unsafe {
                libc::sem_post(self.state.sem);
            }
        }
    }

    impl PartitionState {
        pub(super) fn open(ns: &str, partition: Partition) -> Result<Self> {
            let sem_name = shm_name(ns, &format!("sem-{partition}"))?;
            let index_name = shm_name(ns, &format!("idx-{partition}"))?;

            let sem = unsafe {
                libc::sem_open(sem_name.as_ptr(), libc::O_CREAT, 0o666 as libc::mode_t, 1)
            };
            if sem == libc::SEM_FAILED {
                return Err(StorageError::Unavailable(format!(
                    "sem_open({}) failed: {}",
                    sem_name.to_string_lossy(),
                    std::io::Error::last_os_error()
                )));
            }

            let state = Self {
                partition,
                ns: ns.to_string(),
                sem,
                sem_name,
                index_name,
            };

            // Fail at construction, not first use, if shared memory
            // itself is unusable here.
            {
                let _guard = state.lock()?;
                state.read_index().map_err(|e| match e {
                    StorageError::SharedMemory { detail, .. } => StorageError::Unavailable(detail),
                    other => other,
                })?;
            }
            Ok(state)
        }

        pub(super) fn lock(&self) -> Result<SectionGuard<'_>> {
            let rc = unsafe { libc::sem_wait(self.sem) };
            if rc != 0 {
                return Err(self.os_error("sem_wait"));
            }
            Ok(SectionGuard { state: self })
        }

        pub(super) fn read_index(&self) -> Result<IndexState> {
            let mapping = Mapping::open(&self.index_name, INDEX_CAPACITY, true)
                .map_err(|e| self.wrap("open index", e))?;
            let bytes = mapping.as_slice();

            let mut header = [0u8; 8];
            header.copy_from_slice(&bytes[..8]);
            let len = u64::from_le_bytes(header) as usize;
            if len == 0 || len > INDEX_CAPACITY - 8 {
                return Ok(IndexState::default());
            }
            serde_json::from_slice(&bytes[8..8 + len]).map_err(|e| StorageError::SharedMemory {
                partition: self.partition,
                detail: format!("corrupt key index: {e}"),
            })
        }

        pub(super) fn write_index(&self, index: &IndexState) -> Result<()> {
            let payload = serde_json::to_vec(index).map_err(|e| StorageError::SharedMemory {
                partition: self.partition,
                detail: format!("serialize key index: {e}"),
            })?;
            if payload.len() > INDEX_CAPACITY - 8 {
                return Err(StorageError::SharedMemory {
                    partition: self.partition,
                    detail: format!("key index overflow ({} bytes)", payload.len()),
                });
            }

            let mut mapping = Mapping::open(&self.index_name, INDEX_CAPACITY, true)
                .map_err(|e| self.wrap("open index", e))?;
            let bytes = mapping.as_mut_slice();
            bytes[..8].copy_from_slice(&(payload.len() as u64).to_le_bytes());
            bytes[8..8 + payload.len()].copy_from_slice(&payload);
            Ok(())
        }

        pub(super) fn read_value(&self, entry: &IndexEntry) -> Result<Vec<u8>> {
            let name = self.value_name(entry)?;
            let size = (entry.len as usize).max(1);
            let mapping =
                Mapping::open(&name, size, false).map_err(|e| self.wrap("open value", e))?;
            Ok(mapping.as_slice()[..entry.len as usize].to_vec())
        }

        pub(super) fn create_value(&self, entry: &IndexEntry, value: &[u8]) -> Result<()> {
            let name = self.value_name(entry)?;
            let size = value.len().max(1);
            let mut mapping =
                Mapping::open(&name, size, true).map_err(|e| self.wrap("create value", e))?;
            mapping.as_mut_slice()[..value.len()].copy_from_slice(value);
            Ok(())
        }

        pub(super) fn unlink_value(&self, entry: &IndexEntry) {
            if let Ok(name) = self.value_name(entry) {
                unsafe {
                    // Already-unlinked objects are no concern here.
                    libc::shm_unlink(name.as_ptr());
                }
            }
        }

        pub(super) fn destroy(&self) -> Result<()> {
            let index = {
                let _guard = self.lock()?;
                self.read_index()?
            };
            for entry in index.entries.values() {
                self.unlink_value(entry);
            }
            unsafe {
                libc::shm_unlink(self.index_name.as_ptr());
                libc::sem_unlink(self.sem_name.as_ptr());
            }
            Ok(())
        }

        fn value_name(&self, entry: &IndexEntry) -> Result<CString> {
            shm_name(&self.ns, &format!("{}-{}", self.partition, entry.id))
        }

        fn os_error(&self, what: &str) -> StorageError {
            StorageError::SharedMemory {
                partition: self.partition,
                detail: format!("{what} failed: {}", std::io::Error::last_os_error()),
            }
        }

        fn wrap(&self, what: &str, detail: String) -> StorageError {
            StorageError::SharedMemory {
                partition: self.partition,
                detail: format!("{what}: {detail}"),
            }
        }
    }

    impl Drop for PartitionState {
        fn drop(&mut self) {
            unsafe {
                libc::sem_close(self.sem);
            }
        }
    }

    fn shm_name(ns: &str, suffix: &str) -> Result<CString> {
        CString::new(format!("/{ns}-{suffix}")).map_err(|_| {
            StorageError::Unavailable("shared memory namespace contains a NUL byte".into())
        })
    }

    /// RAII wrapper over one mapped shared memory object.
    struct Mapping {
        ptr: *mut libc::c_void,
        size: usize,
    }

    impl Mapping {
        /// Opens (optionally creating and sizing) the object `name` and
        /// maps `size` bytes of it.
        fn open(name: &CString, size: usize, create: bool) -> std::result::Result<Self, String> {
            let mut flags = libc::O_RDWR;
            if create {
                flags |= libc::O_CREAT;
            }
            let fd = unsafe { libc::shm_open(name.as_ptr(), flags, 0o666 as libc::mode_t) };
            if fd < 0 {
                return Err(format!(
                    "shm_open({}): {}",
                    name.to_string_lossy(),
                    std::io::Error::last_os_error()
                ));
            }

            if create {
                let mut stat = std::mem::MaybeUninit::<libc::stat>::uninit();
                let rc = unsafe { libc::fstat(fd, stat.as_mut_ptr()) };
                if rc != 0 {
                    let err = std::io::Error::last_os_error();
                    unsafe { libc::close(fd) };
                    return Err(format!("fstat: {err}"));
                }
                let current = unsafe { stat.assume_init() }.st_size as usize;
                if current < size {
                    let rc = unsafe { libc::ftruncate(fd, size as libc::off_t) };
                    if rc != 0 {
                        let err = std::io::Error::last_os_error();
                        unsafe { libc::close(fd) };
                        return Err(format!("ftruncate: {err}"));
                    }
                }
            }

            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd,
                    0,
                )
            };
            // The mapping stays valid after the descriptor is closed.
            unsafe { libc::close(fd) };
            if ptr == libc::MAP_FAILED {
                return Err(format!("mmap: {}", std::io::Error::last_os_error()));
            }

            Ok(Self { ptr, size })
        }

        fn as_slice(&self) -> &[u8] {
            unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.size) }
        }

        fn as_mut_slice(&mut self) -> &mut [u8] {
            unsafe { std::slice::from_raw_parts_mut(self.ptr as *mut u8, self.size) }
        }
    }

    impl Drop for Mapping {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.ptr, self.size);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::Storage;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn namespace() -> String {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        format!(
            "rotor-test-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        )
    }

    #[tokio::test]
    async fn set_get_delete_cycle() {
        let ns = namespace();
        let store = SharedMemoryStorage::open(&ns).unwrap();

        store.set("1-10-5-a", Partition::Job, b"body").await.unwrap();
        assert_eq!(
            store.get("1-10-5-a", Partition::Job).await.unwrap(),
            Some(b"body".to_vec())
        );
        assert_eq!(store.keys(Partition::Job).await.unwrap(), vec!["1-10-5-a"]);

        assert!(store.delete("1-10-5-a", Partition::Job).await.unwrap());
        assert!(!store.delete("1-10-5-a", Partition::Job).await.unwrap());
        assert_eq!(store.get("1-10-5-a", Partition::Job).await.unwrap(), None);

        store.destroy().unwrap();
    }

    #[tokio::test]
    async fn growing_a_value_recreates_its_object() {
        let ns = namespace();
        let store = SharedMemoryStorage::open(&ns).unwrap();

        store.set("k", Partition::Result, b"tiny").await.unwrap();
        let large = vec![0xAB; 4096];
        store.set("k", Partition::Result, &large).await.unwrap();

        assert_eq!(
            store.get("k", Partition::Result).await.unwrap(),
            Some(large)
        );
        store.destroy().unwrap();
    }

    #[tokio::test]
    async fn overwrite_cycles_keep_the_key_readable() {
        let ns = namespace();
        let store = SharedMemoryStorage::open(&ns).unwrap();

        // Grow, shrink, grow again: each replacement retires the
        // previous object only after the new one is in the index.
        let large = vec![0x5A; 8192];
        let medium = vec![0xC3; 2048];
        let values: [&[u8]; 4] = [b"short", &large, b"tiny", &medium];
        for value in values {
            store.set("k", Partition::Job, value).await.unwrap();
            assert_eq!(
                store.get("k", Partition::Job).await.unwrap(),
                Some(value.to_vec())
            );
        }
        assert_eq!(store.keys(Partition::Job).await.unwrap(), vec!["k"]);

        store.destroy().unwrap();
    }

    #[tokio::test]
    async fn empty_values_round_trip() {
        let ns = namespace();
        let store = SharedMemoryStorage::open(&ns).unwrap();

        store.set("empty", Partition::Heartbeat, b"").await.unwrap();
        assert_eq!(
            store.get("empty", Partition::Heartbeat).await.unwrap(),
            Some(Vec::new())
        );
        assert!(store.has("empty", Partition::Heartbeat).await.unwrap());

        store.destroy().unwrap();
    }

    #[tokio::test]
    async fn two_handles_share_one_namespace() {
        let ns = namespace();
        let writer = SharedMemoryStorage::open(&ns).unwrap();
        let reader = SharedMemoryStorage::open(&ns).unwrap();

        writer.set("1", Partition::Heartbeat, b"{}").await.unwrap();
        assert_eq!(
            reader.get("1", Partition::Heartbeat).await.unwrap(),
            Some(b"{}".to_vec())
        );

        // Exactly one of two competing claims wins.
        writer.set("job", Partition::Job, b"x").await.unwrap();
        let a = writer.delete("job", Partition::Job).await.unwrap();
        let b = reader.delete("job", Partition::Job).await.unwrap();
        assert!(a ^ b);

        writer.destroy().unwrap();
    }
}
