//! In-memory backend
//!
//! An explicit store instance holding a map of maps. Cloning shares the
//! underlying data, so a test can hand one store to a dispatcher and a
//! poller and observe both sides. Not a process-coordination backend:
//! it only spans the process that created it.

use crate::{Result, Storage};
use async_trait::async_trait;
use rotor_core::Partition;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type PartitionMap = HashMap<Partition, HashMap<String, Vec<u8>>>;

/// Shared in-process store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<PartitionMap>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_map<T>(&self, f: impl FnOnce(&mut PartitionMap) -> T) -> T {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut data)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str, partition: Partition) -> Result<Option<Vec<u8>>> {
        Ok(self.with_map(|map| {
            map.get(&partition)
                .and_then(|entries| entries.get(key).cloned())
        }))
    }

    async fn set(&self, key: &str, partition: Partition, value: &[u8]) -> Result<()> {
        self.with_map(|map| {
            map.entry(partition)
                .or_default()
                .insert(key.to_string(), value.to_vec());
        });
        Ok(())
    }

    async fn delete(&self, key: &str, partition: Partition) -> Result<bool> {
        Ok(self.with_map(|map| {
            map.get_mut(&partition)
                .is_some_and(|entries| entries.remove(key).is_some())
        }))
    }

    async fn has(&self, key: &str, partition: Partition) -> Result<bool> {
        Ok(self.with_map(|map| {
            map.get(&partition)
                .is_some_and(|entries| entries.contains_key(key))
        }))
    }

    async fn keys(&self, partition: Partition) -> Result<Vec<String>> {
        Ok(self.with_map(|map| {
            map.get(&partition)
                .map(|entries| entries.keys().cloned().collect())
                .unwrap_or_default()
        }))
    }
}
