//! Worker registry and selection
//!
//! Workers advertise themselves with a single heartbeat record written
//! at startup. Selection probes the configured worker ids in random
//! order and takes the first one still inside its lifetime window; the
//! randomization spreads load instead of always saturating worker #1.

use rand::Rng;
use rand::seq::SliceRandom;
use rotor_core::{Clock, HeartbeatRecord, Partition};
use rotor_storage::Storage;
use std::sync::Arc;
use tracing::{debug, warn};

/// View over the heartbeat partition.
pub struct WorkerRegistry {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    worker_count: u32,
}

impl WorkerRegistry {
    /// Creates a registry over `worker_count` configured workers.
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, worker_count: u32) -> Self {
        Self {
            storage,
            clock,
            worker_count,
        }
    }

    /// Returns the id of a randomly chosen live worker, or `None` when
    /// every configured worker is missing or past its lifetime window.
    pub async fn select(&self) -> crate::Result<Option<u32>> {
        if self.worker_count == 0 {
            return Ok(None);
        }

        let mut ids: Vec<u32> = (1..=self.worker_count).collect();
        ids.shuffle(&mut rand::thread_rng());

        let now_secs = self.clock.now_secs();
        for id in ids {
            match self.heartbeat(id).await? {
                None => {
                    // Sampled so a fleet of dead workers does not flood
                    // the log on every request.
                    if rand::thread_rng().gen_range(0..=10) == 1 {
                        warn!(worker_id = id, "worker heartbeat not found");
                    }
                }
                Some(record) if record.is_live(now_secs) => {
                    debug!(worker_id = id, "selected worker for the request");
                    return Ok(Some(id));
                }
                Some(_) => {}
            }
        }
        Ok(None)
    }

    /// Reads and parses one worker's heartbeat record.
    pub async fn heartbeat(&self, id: u32) -> crate::Result<Option<HeartbeatRecord>> {
        let Some(bytes) = self
            .storage
            .get(&id.to_string(), Partition::Heartbeat)
            .await?
        else {
            return Ok(None);
        };

        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(worker_id = id, error = %e, "discarding unreadable heartbeat record");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rotor_core::ManualClock;
    use rotor_storage::MemoryStorage;

    async fn write_heartbeat(storage: &MemoryStorage, id: u32, start: f64, lifetime: u64) {
        let record = HeartbeatRecord::new(start, lifetime);
        storage
            .set(
                &id.to_string(),
                Partition::Heartbeat,
                &serde_json::to_vec(&record).unwrap(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn selects_the_only_live_worker() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::at_secs(100);
        write_heartbeat(&storage, 2, 90.0, 60).await;

        let registry = WorkerRegistry::new(Arc::new(storage), Arc::new(clock), 3);
        assert_eq!(registry.select().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn no_heartbeats_means_no_worker() {
        let registry = WorkerRegistry::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::at_secs(100)),
            3,
        );
        assert_eq!(registry.select().await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_workers_are_not_selected() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::at_secs(200);
        // Lifetime window closed at t=160, grace at t=161.
        write_heartbeat(&storage, 1, 100.0, 60).await;

        let registry = WorkerRegistry::new(Arc::new(storage), Arc::new(clock), 1);
        assert_eq!(registry.select().await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_workers_disables_selection() {
        let storage = MemoryStorage::new();
        write_heartbeat(&storage, 1, 100.0, 60).await;

        let registry =
            WorkerRegistry::new(Arc::new(storage), Arc::new(ManualClock::at_secs(100)), 0);
        assert_eq!(registry.select().await.unwrap(), None);
    }

    #[tokio::test]
    async fn unreadable_heartbeats_are_skipped() {
        let storage = MemoryStorage::new();
        storage
            .set("1", Partition::Heartbeat, b"not json")
            .await
            .unwrap();

        let registry = WorkerRegistry::new(
            Arc::new(storage),
            Arc::new(ManualClock::at_secs(100)),
            1,
        );
        assert_eq!(registry.select().await.unwrap(), None);
    }
}
