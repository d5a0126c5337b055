//! Engine configuration
//!
//! Two layers, mirroring how the engine is embedded:
//! - [`Config`] is the public knob set an application fills in (all
//!   fields have workable defaults);
//! - [`EngineConfig`] is the validated form every component receives.
//!   Validation happens exactly once, at startup, and configuration
//!   errors are fatal and never retried.

use crate::clock::Clock;
use crate::error::ConfigError;
use crate::path;
use std::path::PathBuf;
use std::time::Duration;

/// Hard ceiling for worker ids, including elastically derived ones.
pub const MAX_WORKER_ID: u32 = 100_000;

/// Identity of the current process within the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// A request-serving process that submits jobs and awaits results.
    Server,
    /// A long-running (or temporary) worker process.
    Worker {
        /// This worker's id; owns every tag prefixed with it.
        id: u32,
        /// Temporary workers are spawned elastically, use the shorter
        /// lifetime and never spawn further workers.
        temporary: bool,
    },
}

/// Public configuration supplied by the embedding application.
#[derive(Debug, Clone)]
pub struct Config {
    /// Debug mode. Also enables result retention: collected result
    /// records are left in place for inspection until they go stale.
    pub debug: bool,

    /// Number of permanent workers the deployment runs. Zero disables
    /// job distribution entirely (every request is served in place).
    pub worker_count: u32,

    /// Declared lifetime of a permanent worker. Should match how often
    /// worker processes are relaunched.
    pub worker_lifetime: Duration,

    /// Lifetime for temporary workers; falls back to `worker_lifetime`
    /// when unset.
    pub temporary_worker_lifetime: Option<Duration>,

    /// Execution budget stamped into every tag. Past it a job or result
    /// is stale for every participant.
    pub execution_budget: Duration,

    /// Maximum time the serving process waits for a worker's answer
    /// before falling back to in-process handling. `None` waits forever.
    pub response_timeout: Option<Duration>,

    /// If set, a worker exits once this long has passed without it
    /// processing a job.
    pub idle_timeout: Option<Duration>,

    /// Sleep between empty scans in the worker poll loop.
    pub poll_delay: Duration,

    /// Sleep between probes in the response matcher loop.
    pub response_poll_delay: Duration,

    /// Directory for shared engine state (filesystem backend). Must not
    /// live inside the public document root.
    pub runtime_directory: Option<PathBuf>,

    /// Directory for engine logs, same nesting restriction.
    pub log_directory: Option<PathBuf>,

    /// Entry point script/binary of the application, handed to the
    /// launch capability when spawning temporary workers. Its parent
    /// directory is treated as the public document root.
    pub index_path: Option<PathBuf>,

    /// Program used to launch temporary workers. Unset disables elastic
    /// spawning.
    pub launcher_program: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            worker_count: 1,
            worker_lifetime: Duration::from_secs(60),
            temporary_worker_lifetime: None,
            execution_budget: Duration::from_secs(30),
            response_timeout: Some(Duration::from_secs(5)),
            idle_timeout: None,
            poll_delay: Duration::from_millis(1),
            response_poll_delay: Duration::from_micros(500),
            runtime_directory: None,
            log_directory: None,
            index_path: None,
            launcher_program: None,
        }
    }
}

/// Validated configuration, fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Identity of this process.
    pub role: Role,
    /// Wall-clock instant this process entered the engine, microseconds.
    pub started_at_micros: u64,
    /// Number of permanent workers.
    pub worker_count: u32,
    /// Permanent worker lifetime, whole seconds.
    pub worker_lifetime_secs: u64,
    /// Temporary worker lifetime, whole seconds.
    pub temporary_worker_lifetime_secs: u64,
    /// Execution budget, whole seconds.
    pub execution_budget_secs: u64,
    /// Response wait bound, clamped to the execution budget.
    pub response_timeout: Option<Duration>,
    /// Idle shutdown bound for workers.
    pub idle_timeout: Option<Duration>,
    /// Worker loop sleep.
    pub poll_delay: Duration,
    /// Matcher loop sleep.
    pub response_poll_delay: Duration,
    /// Debug mode / result retention.
    pub debug: bool,
    /// Shared-state directory for the filesystem backend.
    pub runtime_directory: Option<PathBuf>,
    /// Application entry point for spawned workers.
    pub index_path: Option<PathBuf>,
    /// Launcher program for temporary workers.
    pub launcher_program: Option<PathBuf>,
}

impl EngineConfig {
    /// Validates `config` for the given process role.
    ///
    /// The clock is read once here; the resulting instant anchors the
    /// response deadline on the serving side and the lifetime window on
    /// the worker side.
    pub fn new(config: &Config, role: Role, clock: &dyn Clock) -> Result<Self, ConfigError> {
        if config.worker_lifetime < Duration::from_secs(1) {
            return Err(ConfigError::LifetimeTooShort);
        }
        if config.poll_delay.is_zero() {
            return Err(ConfigError::ZeroDuration { name: "poll_delay" });
        }
        if config.response_poll_delay.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "response_poll_delay",
            });
        }
        if config.execution_budget.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "execution_budget",
            });
        }

        if let Role::Worker { id, temporary } = role {
            let max = if temporary {
                MAX_WORKER_ID
            } else {
                config.worker_count
            };
            if id < 1 || id > max {
                return Err(ConfigError::WorkerIdOutOfRange { id, max });
            }
        }

        Self::check_directory_nesting(config)?;

        let execution_budget_secs = config.execution_budget.as_secs().max(1);
        // A longer wait than the budget is pointless: the job would be
        // stale before the answer could arrive.
        let response_timeout = config
            .response_timeout
            .map(|t| t.min(Duration::from_secs(execution_budget_secs)));

        let worker_lifetime_secs = config.worker_lifetime.as_secs();

        Ok(Self {
            role,
            started_at_micros: clock.now_micros(),
            worker_count: config.worker_count,
            worker_lifetime_secs,
            temporary_worker_lifetime_secs: config
                .temporary_worker_lifetime
                .map(|t| t.as_secs().max(1))
                .unwrap_or(worker_lifetime_secs),
            execution_budget_secs,
            response_timeout,
            idle_timeout: config.idle_timeout,
            poll_delay: config.poll_delay,
            response_poll_delay: config.response_poll_delay,
            debug: config.debug,
            runtime_directory: config.runtime_directory.clone(),
            index_path: config.index_path.clone(),
            launcher_program: config.launcher_program.clone(),
        })
    }

    /// Queued request data must never end up web-servable: the runtime
    /// and log directories may not sit inside the public document root.
    fn check_directory_nesting(config: &Config) -> Result<(), ConfigError> {
        let Some(index_path) = &config.index_path else {
            return Ok(());
        };
        let Some(public_root) = index_path.parent() else {
            return Ok(());
        };
        let public_root = public_root.to_string_lossy();

        for (name, dir) in [
            ("runtime", &config.runtime_directory),
            ("log", &config.log_directory),
        ] {
            if let Some(dir) = dir {
                let dir = dir.to_string_lossy();
                if path::is_within(&dir, &public_root) {
                    return Err(ConfigError::DirectoryInsidePublicRoot {
                        name,
                        path: path::normalize_path(&dir),
                    });
                }
            }
        }
        Ok(())
    }

    /// This worker's id, if the process is a worker.
    pub fn worker_id(&self) -> Option<u32> {
        match self.role {
            Role::Worker { id, .. } => Some(id),
            Role::Server => None,
        }
    }

    /// Whether the process is a temporary worker.
    pub fn is_temporary_worker(&self) -> bool {
        matches!(self.role, Role::Worker { temporary: true, .. })
    }

    /// Lifetime that applies to this process's role.
    pub fn effective_lifetime_secs(&self) -> u64 {
        if self.is_temporary_worker() {
            self.temporary_worker_lifetime_secs
        } else {
            self.worker_lifetime_secs
        }
    }

    /// Start instant in fractional seconds.
    pub fn started_at_secs(&self) -> f64 {
        self.started_at_micros as f64 / 1_000_000.0
    }
}
