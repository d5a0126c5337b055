//! Stale-data reaper
//!
//! Housekeeping runs out-of-band, probabilistically, once per
//! (permanent) worker activation: on average one activation in
//! `worker_count + 1` pays the scan cost. It removes jobs and results
//! whose execution budget has elapsed, heartbeat records of workers
//! that are clearly gone, and on a much coarser schedule hands control
//! to an external log-rotation hook.

use anyhow::Result;
use rand::Rng;
use rotor_core::{Clock, EngineConfig, HeartbeatRecord, Partition, Tag};
use rotor_storage::Storage;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rotation of historical logs is an external concern; the reaper only
/// decides when to trigger it.
pub trait LogRotation: Send + Sync {
    /// Performs one rotation pass. Best effort.
    fn rotate(&self);
}

/// Interval the log-rotation schedule is derived from.
const ROTATION_INTERVAL_SECS: u64 = 2 * 60 * 60;

/// Deletes data no participant will ever read again.
pub struct Reaper {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    rotation: Option<Arc<dyn LogRotation>>,
}

impl Reaper {
    /// Creates a reaper over the shared store.
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            storage,
            clock,
            config,
            rotation: None,
        }
    }

    /// Attaches an external log-rotation hook.
    pub fn with_rotation(mut self, rotation: Arc<dyn LogRotation>) -> Self {
        self.rotation = Some(rotation);
        self
    }

    /// Probabilistically runs one housekeeping pass. Temporary workers
    /// never pay this cost; they exist to drain backlog.
    pub async fn maybe_run(&self) {
        if self.config.is_temporary_worker() {
            return;
        }

        if rand::thread_rng().gen_range(0..=self.config.worker_count + 1) == 1 {
            debug!("starting the search for outdated data");
            let start = self.clock.now_micros();
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "housekeeping pass failed");
            }
            let elapsed_secs = (self.clock.now_micros().saturating_sub(start)) as f64 / 1_000_000.0;
            debug!(elapsed_secs, "finished the search for outdated data");
        }

        if let Some(rotation) = &self.rotation {
            let lifetime = self.config.worker_lifetime_secs;
            let odds = ROTATION_INTERVAL_SECS.div_ceil(lifetime);
            if lifetime >= ROTATION_INTERVAL_SECS || rand::thread_rng().gen_range(0..=odds) == 1 {
                rotation.rotate();
            }
        }
    }

    /// Deterministic single pass, also used directly by tests.
    ///
    /// Safe to run from any number of workers concurrently: a delete
    /// that reports nothing removed just means another process was
    /// faster, and re-running the pass is a no-op.
    pub async fn run_once(&self) -> Result<()> {
        self.reap_stale_records().await?;
        self.reap_dead_heartbeats().await?;
        Ok(())
    }

    async fn reap_stale_records(&self) -> Result<()> {
        let now = self.clock.now_micros();
        for partition in [Partition::Job, Partition::Result] {
            for key in self.storage.keys(partition).await? {
                let stale = match key.parse::<Tag>() {
                    Ok(tag) => tag.is_stale(partition, now),
                    Err(e) => {
                        // A key no valid tag can ever address again.
                        warn!(%key, %partition, error = %e, "removing unparseable key");
                        true
                    }
                };
                if stale {
                    debug!(%key, %partition, "removing expired record");
                    self.storage.delete(&key, partition).await?;
                }
            }
        }
        Ok(())
    }

    async fn reap_dead_heartbeats(&self) -> Result<()> {
        let now_secs = self.clock.now_secs();
        for key in self.storage.keys(Partition::Heartbeat).await? {
            let Some(bytes) = self.storage.get(&key, Partition::Heartbeat).await? else {
                continue;
            };
            let record: HeartbeatRecord = match serde_json::from_slice(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    warn!(worker_id = %key, error = %e, "removing unreadable heartbeat record");
                    self.storage.delete(&key, Partition::Heartbeat).await?;
                    continue;
                }
            };

            if record.is_reapable(now_secs) {
                self.storage.delete(&key, Partition::Heartbeat).await?;
                let started = chrono::DateTime::from_timestamp(record.start as i64, 0)
                    .map(|t| t.format("%d-%m-%Y %H:%M:%S").to_string())
                    .unwrap_or_else(|| format!("{}", record.start));
                info!(
                    worker_id = %key,
                    started = %started,
                    lifetime_secs = record.lifetime,
                    "removed the heartbeat of a worker that has not run for a long time"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rotor_core::{Config, ManualClock, Role};
    use rotor_storage::MemoryStorage;

    fn reaper(storage: &MemoryStorage, clock: &ManualClock) -> Reaper {
        let engine = EngineConfig::new(
            &Config::default(),
            Role::Worker {
                id: 1,
                temporary: false,
            },
            clock,
        )
        .unwrap();
        Reaper::new(Arc::new(storage.clone()), Arc::new(clock.clone()), engine)
    }

    #[tokio::test]
    async fn removes_only_records_past_their_budget() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::at_secs(100);

        let fresh = Tag::generate(1, 60, &clock).to_string();
        let stale = Tag::generate(1, 5, &clock).to_string();
        storage.set(&fresh, Partition::Job, b"fresh").await.unwrap();
        storage.set(&stale, Partition::Job, b"stale").await.unwrap();
        storage.set(&stale, Partition::Result, b"stale").await.unwrap();

        clock.advance_secs(6);
        reaper(&storage, &clock).run_once().await.unwrap();

        assert!(storage.has(&fresh, Partition::Job).await.unwrap());
        assert!(!storage.has(&stale, Partition::Job).await.unwrap());
        assert!(!storage.has(&stale, Partition::Result).await.unwrap());
    }

    #[tokio::test]
    async fn eventually_removes_every_stale_record() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::at_secs(100);

        let tag = Tag::generate(2, 5, &clock).to_string();
        storage.set(&tag, Partition::Job, b"x").await.unwrap();

        // Not yet stale: untouched no matter how often the pass runs.
        let reaper = reaper(&storage, &clock);
        reaper.run_once().await.unwrap();
        reaper.run_once().await.unwrap();
        assert!(storage.has(&tag, Partition::Job).await.unwrap());

        clock.advance_secs(10);
        reaper.run_once().await.unwrap();
        assert!(!storage.has(&tag, Partition::Job).await.unwrap());
        // Idempotent under repetition.
        reaper.run_once().await.unwrap();
    }

    #[tokio::test]
    async fn reaps_heartbeats_of_long_gone_workers() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::at_secs(0);

        let dead = HeartbeatRecord::new(0.0, 60);
        let live = HeartbeatRecord::new(250.0, 60);
        storage
            .set("1", Partition::Heartbeat, &serde_json::to_vec(&dead).unwrap())
            .await
            .unwrap();
        storage
            .set("2", Partition::Heartbeat, &serde_json::to_vec(&live).unwrap())
            .await
            .unwrap();

        // Past start + lifetime + 2.5 x lifetime for worker #1 only.
        clock.advance_secs(260);
        reaper(&storage, &clock).run_once().await.unwrap();

        assert!(!storage.has("1", Partition::Heartbeat).await.unwrap());
        assert!(storage.has("2", Partition::Heartbeat).await.unwrap());
    }

    #[tokio::test]
    async fn absurd_budget_fields_do_not_break_the_pass() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::at_secs(100);
        let key = format!("1-0-{}-x", u64::MAX);
        storage.set(&key, Partition::Job, b"junk").await.unwrap();

        reaper(&storage, &clock).run_once().await.unwrap();
        // Parseable, and by saturating math never past its budget.
        assert!(storage.has(&key, Partition::Job).await.unwrap());
    }

    #[tokio::test]
    async fn unparseable_keys_are_swept_out() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::at_secs(100);
        storage
            .set("not-a-tag", Partition::Job, b"junk")
            .await
            .unwrap();

        reaper(&storage, &clock).run_once().await.unwrap();
        assert!(storage.keys(Partition::Job).await.unwrap().is_empty());
    }
}
