//! Response matcher
//!
//! After submitting a job the serving process polls the result
//! partition for the job's tag until a deadline derived from the
//! submission time. A timeout also reclaims the abandoned job record so
//! no worker wastes a claim on a request nobody is waiting for anymore.

use crate::error::{DispatchError, Result};
use rotor_core::{Clock, EngineConfig, Partition, Tag};
use rotor_storage::Storage;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Waits for a worker's answer to one submitted job.
pub struct ResponseMatcher {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl ResponseMatcher {
    /// Creates a matcher over the shared store.
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            storage,
            clock,
            config,
        }
    }

    /// Polls for the result of `tag`.
    ///
    /// Returns the result bytes, or `None` once the response timeout
    /// has elapsed (the unclaimed job record is deleted on the way
    /// out). With no timeout configured this waits indefinitely; the
    /// caller opted into that.
    pub async fn await_result(&self, tag: &Tag) -> Result<Option<Vec<u8>>> {
        let key = tag.to_string();
        let deadline = self
            .config
            .response_timeout
            .map(|timeout| tag.submitted_micros + timeout.as_micros() as u64);

        loop {
            if let Some(deadline) = deadline {
                if self.clock.now_micros() >= deadline {
                    warn!(tag = %key, "response timeout expired, falling back to in-process handling");
                    // Nobody is waiting for this job anymore; reclaim it
                    // so a worker does not claim it later. A false here
                    // just means a worker or the reaper won the race.
                    self.storage.delete(&key, Partition::Job).await?;
                    return Ok(None);
                }
            }

            match self.storage.get(&key, Partition::Result).await? {
                Some(bytes) if bytes.is_empty() => {
                    return Err(DispatchError::EmptyResult { tag: key });
                }
                Some(bytes) => {
                    // Idempotent: the claiming worker usually removed
                    // the job record already.
                    self.storage.delete(&key, Partition::Job).await?;
                    if !self.config.debug {
                        self.storage.delete(&key, Partition::Result).await?;
                    } else {
                        debug!(tag = %key, "debug retention: leaving the result record in place");
                    }
                    info!(tag = %key, bytes = bytes.len(), "collected worker response");
                    return Ok(Some(bytes));
                }
                None => {
                    tokio::time::sleep(self.config.response_poll_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rotor_core::{Config, ManualClock, Role};
    use rotor_storage::MemoryStorage;
    use std::time::Duration;

    fn engine_config(clock: &ManualClock, debug: bool) -> EngineConfig {
        let config = Config {
            debug,
            response_timeout: Some(Duration::from_secs(3)),
            ..Config::default()
        };
        EngineConfig::new(&config, Role::Server, clock).unwrap()
    }

    fn matcher(storage: &MemoryStorage, clock: &ManualClock, debug: bool) -> ResponseMatcher {
        ResponseMatcher::new(
            Arc::new(storage.clone()),
            Arc::new(clock.clone()),
            engine_config(clock, debug),
        )
    }

    #[tokio::test]
    async fn returns_the_exact_bytes_the_worker_wrote() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::at_secs(10);
        let tag = Tag::generate(1, 30, &clock);
        let key = tag.to_string();

        storage.set(&key, Partition::Job, b"job input").await.unwrap();
        storage.set(&key, Partition::Result, b"answer").await.unwrap();

        let found = matcher(&storage, &clock, false)
            .await_result(&tag)
            .await
            .unwrap();
        assert_eq!(found, Some(b"answer".to_vec()));

        // Collected: both records are gone in non-debug mode.
        assert!(!storage.has(&key, Partition::Job).await.unwrap());
        assert!(!storage.has(&key, Partition::Result).await.unwrap());
    }

    #[tokio::test]
    async fn debug_mode_retains_the_result_record() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::at_secs(10);
        let tag = Tag::generate(1, 30, &clock);
        let key = tag.to_string();

        storage.set(&key, Partition::Result, b"answer").await.unwrap();

        let found = matcher(&storage, &clock, true)
            .await_result(&tag)
            .await
            .unwrap();
        assert_eq!(found, Some(b"answer".to_vec()));
        assert!(storage.has(&key, Partition::Result).await.unwrap());
    }

    #[tokio::test]
    async fn timeout_reclaims_the_abandoned_job() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::at_secs(10);
        let tag = Tag::generate(1, 30, &clock);
        let key = tag.to_string();

        storage.set(&key, Partition::Job, b"job input").await.unwrap();

        // No worker ever answers; move straight past the deadline.
        clock.advance_micros(3_100_000);

        let found = matcher(&storage, &clock, false)
            .await_result(&tag)
            .await
            .unwrap();
        assert_eq!(found, None);
        assert!(!storage.has(&key, Partition::Job).await.unwrap());
    }

    #[tokio::test]
    async fn empty_result_records_are_fatal() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::at_secs(10);
        let tag = Tag::generate(1, 30, &clock);

        storage
            .set(&tag.to_string(), Partition::Result, b"")
            .await
            .unwrap();

        let outcome = matcher(&storage, &clock, false).await_result(&tag).await;
        assert!(matches!(outcome, Err(DispatchError::EmptyResult { .. })));
    }
}
