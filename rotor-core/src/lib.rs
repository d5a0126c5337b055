//! Rotor Core
//!
//! Domain types and pure logic shared by the dispatch side and the worker
//! side of the engine:
//! - Tags: the composite keys that correlate a job with its result
//! - Partitions: the namespaces of the shared store
//! - Heartbeat records and the liveness rules applied to them
//! - Configuration with startup validation
//! - The clock abstraction all staleness math goes through

pub mod clock;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod partition;
pub mod payload;
pub mod path;
pub mod tag;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, EngineConfig, MAX_WORKER_ID, Role};
pub use error::{ConfigError, TagError};
pub use heartbeat::HeartbeatRecord;
pub use partition::Partition;
pub use payload::{JobPayload, PayloadCodec};
pub use tag::Tag;
