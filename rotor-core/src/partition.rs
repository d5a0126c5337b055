//! Store partitions
//!
//! A partition is a logical namespace inside the shared store. Jobs,
//! results and heartbeats never share a key space, so the same tag can
//! name both a job record and its result record.

use serde::{Deserialize, Serialize};

/// Namespace within the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Partition {
    /// Submitted jobs waiting to be claimed by a worker.
    Job,
    /// Results written by workers, waiting to be collected.
    Result,
    /// Worker liveness advertisements, keyed by worker id.
    Heartbeat,
}

impl Partition {
    /// All partitions, in cleanup order.
    pub const ALL: [Partition; 3] = [Partition::Job, Partition::Result, Partition::Heartbeat];

    /// Stable name used by every backend (directory name, hash name,
    /// shared memory object prefix). Part of the interoperability contract.
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Job => "job",
            Partition::Result => "result",
            Partition::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
