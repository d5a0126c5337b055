//! Dispatcher
//!
//! Entry point for the serving process: select a worker, persist the
//! job under a fresh tag, then hand the tag to the response matcher.
//! Every refusal path is soft: the caller serves the request in place
//! and the user never sees a failure attributable to the engine.

use crate::error::Result;
use crate::matcher::ResponseMatcher;
use crate::registry::WorkerRegistry;
use rotor_core::{Clock, EngineConfig, JobPayload, Partition, Tag};
use rotor_storage::Storage;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of attempting to queue one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The job record was written; await the result under this tag.
    Queued(Tag),
    /// The payload is tied to the current process and was not queued.
    Bypass,
    /// No configured worker is currently live.
    NoWorker,
}

/// Why a dispatched request fell back to in-process handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// No live worker was found at submission time.
    NoWorker,
    /// The payload could not safely leave the process.
    ProcessBound,
    /// A worker was selected but no answer arrived before the timeout.
    Timeout,
}

/// Result of a full submit-and-await round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A worker answered; these are the result bytes it wrote.
    Completed(Vec<u8>),
    /// Handle the request in place.
    Fallback(FallbackReason),
}

/// Submits jobs from a serving process.
pub struct Dispatcher {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    registry: WorkerRegistry,
    matcher: ResponseMatcher,
}

impl Dispatcher {
    /// Creates a dispatcher over the shared store.
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let registry =
            WorkerRegistry::new(Arc::clone(&storage), Arc::clone(&clock), config.worker_count);
        let matcher = ResponseMatcher::new(Arc::clone(&storage), Arc::clone(&clock), config.clone());
        Self {
            storage,
            clock,
            config,
            registry,
            matcher,
        }
    }

    /// Queues `payload` for a live worker.
    ///
    /// A failed write of the job record is fatal to this submission and
    /// surfaces as an error; every other refusal is a soft outcome the
    /// caller answers synchronously.
    pub async fn submit(&self, payload: &JobPayload) -> Result<Submission> {
        let Some(worker_id) = self.registry.select().await? else {
            warn!("no active worker found, switching to in-process handling");
            return Ok(Submission::NoWorker);
        };

        if payload.is_process_bound() {
            info!(worker_id, "payload is process-bound, using the in-process handler");
            return Ok(Submission::Bypass);
        }

        let tag = self.create_tag(worker_id).await?;
        self.storage
            .set(&tag.to_string(), Partition::Job, payload.body())
            .await?;
        info!(tag = %tag, worker_id, "queued job for worker");

        Ok(Submission::Queued(tag))
    }

    /// Submits `payload` and waits for the worker's answer.
    pub async fn dispatch(&self, payload: &JobPayload) -> Result<DispatchOutcome> {
        let tag = match self.submit(payload).await? {
            Submission::Queued(tag) => tag,
            Submission::Bypass => return Ok(DispatchOutcome::Fallback(FallbackReason::ProcessBound)),
            Submission::NoWorker => return Ok(DispatchOutcome::Fallback(FallbackReason::NoWorker)),
        };

        match self.matcher.await_result(&tag).await? {
            Some(bytes) => Ok(DispatchOutcome::Completed(bytes)),
            None => Ok(DispatchOutcome::Fallback(FallbackReason::Timeout)),
        }
    }

    /// The response matcher bound to this dispatcher's configuration.
    pub fn matcher(&self) -> &ResponseMatcher {
        &self.matcher
    }

    /// Generates a tag no live job currently uses. Collisions are next
    /// to impossible with the random suffix, but a fresh suffix costs
    /// nothing to re-roll.
    async fn create_tag(&self, worker_id: u32) -> Result<Tag> {
        loop {
            let tag = Tag::generate(
                worker_id,
                self.config.execution_budget_secs,
                self.clock.as_ref(),
            );
            if !self.storage.has(&tag.to_string(), Partition::Job).await? {
                return Ok(tag);
            }
        }
    }
}
