//! Worker poll loop
//!
//! The loop is an explicit state machine: every iteration produces one
//! [`PollOutcome`], and the claim step is the only point of contention
//! between workers. A claim is the atomic delete of the job record;
//! whichever process observes that its delete removed a live entry owns
//! the job, every other contender sees [`PollOutcome::LostClaim`] and
//! simply scans again.

use crate::handler::JobHandler;
use crate::reaper::Reaper;
use crate::spawn::TemporarySpawner;
use anyhow::Result;
use rotor_core::{Clock, EngineConfig, HeartbeatRecord, Partition, Tag};
use rotor_storage::Storage;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A job this worker owns exclusively, removed from the store.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// The tag the result record must be written under.
    pub tag: Tag,
    /// Serialized job payload.
    pub body: Vec<u8>,
}

/// Result of one poll iteration.
#[derive(Debug)]
pub enum PollOutcome {
    /// A job was claimed and must now be executed.
    Job(ClaimedJob),
    /// Nothing addressed to this worker is pending.
    Idle,
    /// Another process removed the candidate first. Not an error.
    LostClaim,
    /// The claimed record carried no payload and was discarded.
    Corrupt,
    /// Lifetime or idle window elapsed; the loop must stop.
    Expired,
}

/// Scans the job partition for work addressed to one worker id.
pub struct JobPoller {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    spawner: Option<TemporarySpawner>,
    reaper: Option<Reaper>,
    worker_id: u32,
    // One elastic spawn attempt per activation, successful or not.
    spawn_attempted: bool,
    last_activity_micros: u64,
}

impl JobPoller {
    /// Creates a poller for the worker identity in `config`.
    pub fn new(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<Self> {
        let Some(worker_id) = config.worker_id() else {
            anyhow::bail!("a job poller requires a worker role, not a server role");
        };
        let last_activity_micros = config.started_at_micros;
        Ok(Self {
            storage,
            clock,
            config,
            spawner: None,
            reaper: None,
            worker_id,
            spawn_attempted: false,
            last_activity_micros,
        })
    }

    /// Enables elastic spawning of one temporary worker under backlog.
    pub fn with_spawner(mut self, spawner: TemporarySpawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Enables the probabilistic housekeeping pass at activation.
    pub fn with_reaper(mut self, reaper: Reaper) -> Self {
        self.reaper = Some(reaper);
        self
    }

    /// Writes this worker's liveness advertisement. Called once per
    /// activation, before the first scan.
    pub async fn publish_heartbeat(&self) -> Result<()> {
        let record = HeartbeatRecord::new(
            self.config.started_at_secs(),
            self.config.effective_lifetime_secs(),
        );
        self.storage
            .set(
                &self.worker_id.to_string(),
                Partition::Heartbeat,
                &serde_json::to_vec(&record)?,
            )
            .await?;
        info!(
            worker_id = self.worker_id,
            lifetime_secs = record.lifetime,
            temporary = self.config.is_temporary_worker(),
            "worker heartbeat published"
        );
        Ok(())
    }

    /// Performs one scan-and-claim iteration.
    pub async fn poll_once(&mut self) -> Result<PollOutcome> {
        let now_micros = self.clock.now_micros();

        let lifetime_end = self.config.started_at_micros
            + self.config.effective_lifetime_secs() * 1_000_000;
        if now_micros >= lifetime_end {
            info!(worker_id = self.worker_id, "worker lifetime elapsed");
            return Ok(PollOutcome::Expired);
        }
        if let Some(idle) = self.config.idle_timeout {
            if now_micros.saturating_sub(self.last_activity_micros) > idle.as_micros() as u64 {
                info!(worker_id = self.worker_id, "worker idle window elapsed");
                return Ok(PollOutcome::Expired);
            }
        }

        let job_keys = self.storage.keys(Partition::Job).await?;
        // The spawn decision sees the whole queue, not just this
        // worker's share of it.
        self.consider_spawning(job_keys.len()).await;

        let mut pending = self.pending_jobs(job_keys, now_micros).await?;
        if pending.is_empty() {
            return Ok(PollOutcome::Idle);
        }

        // Oldest submission first; the suffix breaks exact-instant ties
        // deterministically.
        pending.sort_by(|a, b| {
            (a.submitted_micros, &a.suffix).cmp(&(b.submitted_micros, &b.suffix))
        });
        self.claim(pending.swap_remove(0)).await
    }

    /// Takes exclusive ownership of `tag` by removing its job record.
    async fn claim(&mut self, tag: Tag) -> Result<PollOutcome> {
        let key = tag.to_string();

        let Some(body) = self.storage.get(&key, Partition::Job).await? else {
            return Ok(PollOutcome::LostClaim);
        };
        if !self.storage.delete(&key, Partition::Job).await? {
            debug!(tag = %key, "another process claimed the job first");
            return Ok(PollOutcome::LostClaim);
        }

        // A result record already present under this tag is residue
        // from a competing answer; it must not shadow the answer this
        // claim will produce. Debug retention keeps it for inspection.
        if !self.config.debug && self.storage.delete(&key, Partition::Result).await? {
            debug!(tag = %key, "removed result residue for the claimed job");
        }

        if body.is_empty() {
            warn!(tag = %key, "claimed job carried no payload, discarding");
            return Ok(PollOutcome::Corrupt);
        }
        debug!(tag = %key, bytes = body.len(), "claimed a job");
        Ok(PollOutcome::Job(ClaimedJob { tag, body }))
    }

    /// Publishes the result record a serving process is polling for.
    pub async fn complete(&mut self, tag: &Tag, result: &[u8]) -> Result<()> {
        self.storage
            .set(&tag.to_string(), Partition::Result, result)
            .await?;
        self.last_activity_micros = self.clock.now_micros();
        info!(tag = %tag, bytes = result.len(), "published a result");
        Ok(())
    }

    /// Runs the full worker activation: heartbeat, optional
    /// housekeeping, then the poll loop until the lifetime or idle
    /// window closes. Handler failures become error-shaped results,
    /// never a loop exit.
    pub async fn run(&mut self, handler: &dyn JobHandler) -> Result<()> {
        self.publish_heartbeat().await?;
        if let Some(reaper) = &self.reaper {
            reaper.maybe_run().await;
        }

        loop {
            match self.poll_once().await? {
                PollOutcome::Job(job) => {
                    let result = match handler.execute(job.body).await {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            error!(tag = %job.tag, error = %e, "job handler failed");
                            handler.failure_payload(&e)
                        }
                    };
                    self.complete(&job.tag, &result).await?;
                }
                PollOutcome::Idle => tokio::time::sleep(self.config.poll_delay).await,
                PollOutcome::LostClaim | PollOutcome::Corrupt => {}
                PollOutcome::Expired => return Ok(()),
            }
        }
    }

    /// Filters `job_keys` down to this worker's unanswered, still-valid
    /// jobs.
    async fn pending_jobs(&self, job_keys: Vec<String>, now_micros: u64) -> Result<Vec<Tag>> {
        let answered: HashSet<String> = self
            .storage
            .keys(Partition::Result)
            .await?
            .into_iter()
            .collect();

        let mut pending = Vec::new();
        for key in job_keys {
            if !Tag::owned_by(&key, self.worker_id) {
                continue;
            }
            // Unparseable keys are the reaper's problem.
            let Ok(tag) = key.parse::<Tag>() else { continue };
            if tag.is_stale(Partition::Job, now_micros) {
                continue;
            }
            if answered.contains(&key) {
                continue;
            }
            pending.push(tag);
        }
        Ok(pending)
    }

    async fn consider_spawning(&mut self, backlog: usize) {
        if self.spawn_attempted || self.config.is_temporary_worker() {
            return;
        }
        let Some(spawner) = &self.spawner else { return };
        if spawner.spawn_if_needed(backlog).await {
            self.spawn_attempted = true;
        }
    }
}
