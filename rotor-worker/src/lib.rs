//! Rotor Worker
//!
//! The worker side of the engine: a long-running process that publishes
//! one heartbeat at startup, then repeatedly scans the job partition
//! for work addressed to its id, claims the oldest valid job with an
//! atomic delete, executes it through the embedding application's
//! handler and writes the result record the serving process is polling
//! for.
//!
//! Also home to the elastic spawner (one extra short-lived worker when
//! the backlog grows) and the reaper (probabilistic cleanup of stale
//! jobs, stale results and dead heartbeats).

pub mod handler;
pub mod poller;
pub mod reaper;
pub mod spawn;

pub use handler::JobHandler;
pub use poller::{ClaimedJob, JobPoller, PollOutcome};
pub use reaper::{LogRotation, Reaper};
pub use spawn::{CommandLauncher, NullLauncher, TemporarySpawner, WorkerLauncher};
