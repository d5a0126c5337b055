//! Heartbeat records
//!
//! A worker writes exactly one heartbeat record when its poll loop
//! starts; there is no periodic renewal. Liveness is derived from the
//! declared lifetime window, so a record only needs to be re-read, never
//! re-written.

use serde::{Deserialize, Serialize};

/// Grace applied when deciding whether a worker is still selectable.
const LIVENESS_GRACE_SECS: f64 = 1.0;

/// Multiplier of the lifetime after which a heartbeat is clearly dead
/// and may be reaped.
const REAP_GRACE_FACTOR: f64 = 2.5;

/// Liveness advertisement written once per worker process start.
///
/// Stored as JSON under the worker id in the heartbeat partition; the
/// wire shape is part of the interoperability contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    /// Unix start time of the worker process, fractional seconds.
    pub start: f64,
    /// Declared lifetime of the worker in seconds.
    pub lifetime: u64,
}

impl HeartbeatRecord {
    /// Builds a record for a worker starting at `start_secs`.
    pub fn new(start_secs: f64, lifetime_secs: u64) -> Self {
        Self {
            start: start_secs,
            lifetime: lifetime_secs,
        }
    }

    /// Whether the worker is still within its declared lifetime window
    /// (with a small grace) and may be handed new jobs.
    pub fn is_live(&self, now_secs: f64) -> bool {
        self.start + self.lifetime as f64 > now_secs - LIVENESS_GRACE_SECS
    }

    /// Whether the record is long past its window and should be removed
    /// by housekeeping.
    pub fn is_reapable(&self, now_secs: f64) -> bool {
        self.start + (self.lifetime as f64) < now_secs - self.lifetime as f64 * REAP_GRACE_FACTOR
    }
}
