//! Elastic worker spawning
//!
//! When a worker sees more backlog than it can reasonably drain before
//! its lifetime ends, it may ask the process-launch capability to start
//! one short-lived extra worker. The derived id keeps the fan-out
//! traceable (`current × 100 + random(0..=99)`) and single-level:
//! temporary workers never spawn further workers.

use anyhow::Context;
use async_trait::async_trait;
use rand::Rng;
use rotor_core::config::MAX_WORKER_ID;
use rotor_core::{EngineConfig, Partition};
use rotor_storage::Storage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Backlog size above which a worker considers spawning help.
pub const SPAWN_BACKLOG_THRESHOLD: usize = 3;

/// Capability to start an additional worker process.
///
/// Fire and forget: failures are logged by the caller, never fatal.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Starts a worker with the given id against the application entry
    /// point at `index_path`.
    async fn launch(&self, worker_id: u32, index_path: &Path, temporary: bool)
    -> anyhow::Result<()>;
}

/// Launcher that does nothing; used in tests and in deployments that
/// forbid process creation.
pub struct NullLauncher;

#[async_trait]
impl WorkerLauncher for NullLauncher {
    async fn launch(
        &self,
        worker_id: u32,
        _index_path: &Path,
        _temporary: bool,
    ) -> anyhow::Result<()> {
        debug!(worker_id, "null launcher ignored a spawn request");
        Ok(())
    }
}

/// Launcher that executes a configured program, detached.
pub struct CommandLauncher {
    program: PathBuf,
}

impl CommandLauncher {
    /// Creates a launcher running `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl WorkerLauncher for CommandLauncher {
    async fn launch(
        &self,
        worker_id: u32,
        index_path: &Path,
        temporary: bool,
    ) -> anyhow::Result<()> {
        let mut command = std::process::Command::new(&self.program);
        command
            .arg(index_path)
            .arg(format!("--id={worker_id}"))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());
        if temporary {
            command.arg("--temporary");
        }

        // The child is left running on its own; dropping the handle
        // does not reap it.
        command
            .spawn()
            .with_context(|| format!("failed to launch worker #{worker_id}"))?;
        Ok(())
    }
}

/// Decides whether and how to spawn one temporary worker.
pub struct TemporarySpawner {
    storage: Arc<dyn Storage>,
    config: EngineConfig,
    launcher: Arc<dyn WorkerLauncher>,
}

impl TemporarySpawner {
    /// Creates a spawner acting on behalf of the current worker.
    pub fn new(
        storage: Arc<dyn Storage>,
        config: EngineConfig,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Self {
        Self {
            storage,
            config,
            launcher,
        }
    }

    /// Considers spawning a temporary worker for `backlog` visible jobs.
    ///
    /// Returns `true` once the single spawn attempt of this worker's
    /// lifetime has been consumed, whether or not a process actually
    /// started; the guards here are best-effort, not a hard guarantee
    /// against concurrent workers deriving the same id.
    pub async fn spawn_if_needed(&self, backlog: usize) -> bool {
        if backlog <= SPAWN_BACKLOG_THRESHOLD {
            return false;
        }
        let (Some(index_path), Some(_)) = (&self.config.index_path, &self.config.launcher_program)
        else {
            return false;
        };
        let Some(current_id) = self.config.worker_id() else {
            return false;
        };

        let derived_id = current_id * 100 + rand::thread_rng().gen_range(0..=99);
        if derived_id > MAX_WORKER_ID {
            debug!(derived_id, "derived worker id exceeds the ceiling, not spawning");
            return true;
        }

        match self
            .storage
            .has(&derived_id.to_string(), Partition::Heartbeat)
            .await
        {
            Ok(true) => {
                debug!(
                    worker_id = derived_id,
                    "a worker with the derived id already exists, cancelling the spawn"
                );
                return true;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "could not check for a worker id collision, not spawning");
                return true;
            }
        }

        info!(
            worker_id = derived_id,
            lifetime_secs = self.config.temporary_worker_lifetime_secs,
            backlog,
            "attempting to start a temporary worker"
        );
        if let Err(e) = self.launcher.launch(derived_id, index_path, true).await {
            warn!(worker_id = derived_id, error = %e, "the temporary worker failed to start");
        }
        true
    }
}
