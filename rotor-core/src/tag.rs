//! Tag codec
//!
//! A tag is the composite string key that ties a job record to its
//! eventual result record:
//!
//! ```text
//! {ownerWorkerId}-{submissionTimeMicros}-{executionBudgetSeconds}-{uniqueSuffix}
//! ```
//!
//! The format is an interoperability contract: a dispatcher and a worker
//! written against different codebases must agree on it bit-exactly.
//! Properties the rest of the engine relies on:
//! - lexicographic sort within one worker's keys follows submission order
//!   (the timestamp field is fixed-width in practice for the next few
//!   thousand years);
//! - the owner-id prefix lets a worker scan only its own jobs;
//! - the budget field lets any reader compute staleness without loading
//!   the job body.

use crate::clock::Clock;
use crate::error::TagError;
use crate::partition::Partition;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Composite identifier for a job and its result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Id of the worker this job is addressed to.
    pub worker_id: u32,
    /// Submission time in microseconds since the unix epoch.
    pub submitted_micros: u64,
    /// Execution budget in seconds; past it the job is stale.
    pub budget_secs: u64,
    /// Random suffix making concurrently generated tags unique.
    /// Never contains a hyphen.
    pub suffix: String,
}

impl Tag {
    /// Generates a fresh tag for `worker_id` at the clock's current time.
    pub fn generate(worker_id: u32, budget_secs: u64, clock: &dyn Clock) -> Self {
        Self {
            worker_id,
            submitted_micros: clock.now_micros(),
            budget_secs,
            suffix: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Whether the record stored under this tag has outlived its
    /// execution budget at `now_micros`.
    ///
    /// Heartbeat keys are plain worker ids and use a different liveness
    /// rule, so for the heartbeat partition this is always false.
    pub fn is_stale(&self, partition: Partition, now_micros: u64) -> bool {
        match partition {
            Partition::Heartbeat => false,
            Partition::Job | Partition::Result => {
                // Saturating: keys are parsed from the shared store, so
                // an absurd budget field must not be able to overflow.
                let expiry = self
                    .submitted_micros
                    .saturating_add(self.budget_secs.saturating_mul(1_000_000));
                now_micros > expiry
            }
        }
    }

    /// Whether `key` belongs to the worker with the given id.
    ///
    /// A cheap prefix test used to filter key listings before paying for
    /// a full parse.
    pub fn owned_by(key: &str, worker_id: u32) -> bool {
        key.strip_prefix(&worker_id.to_string())
            .is_some_and(|rest| rest.starts_with('-'))
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.worker_id, self.submitted_micros, self.budget_secs, self.suffix
        )
    }
}

impl FromStr for Tag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split('-').collect();
        let [worker_id, submitted, budget, suffix] = fields[..] else {
            return Err(TagError::Malformed(s.to_string()));
        };

        let parse_u64 = |value: &str, field: &'static str| {
            value.parse::<u64>().map_err(|_| TagError::InvalidField {
                field,
                tag: s.to_string(),
            })
        };

        Ok(Tag {
            worker_id: worker_id.parse().map_err(|_| TagError::InvalidField {
                field: "owner",
                tag: s.to_string(),
            })?,
            submitted_micros: parse_u64(submitted, "timestamp")?,
            budget_secs: parse_u64(budget, "budget")?,
            suffix: suffix.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn roundtrip_preserves_owner() {
        let clock = ManualClock::at_secs(100);
        let tag = Tag::generate(7, 30, &clock);

        let decoded: Tag = tag.to_string().parse().unwrap();
        assert_eq!(decoded.worker_id, 7);
        assert_eq!(decoded.submitted_micros, 100_000_000);
        assert_eq!(decoded.budget_secs, 30);
        assert_eq!(decoded, tag);
    }

    #[test]
    fn successive_tags_have_increasing_timestamps() {
        let clock = ManualClock::at_secs(1);
        let first = Tag::generate(1, 5, &clock);
        clock.advance_micros(1);
        let second = Tag::generate(1, 5, &clock);

        assert!(second.submitted_micros > first.submitted_micros);
        assert_ne!(first.suffix, second.suffix);
    }

    #[test]
    fn staleness_follows_the_budget() {
        let clock = ManualClock::at_secs(50);
        let tag = Tag::generate(1, 5, &clock);

        assert!(!tag.is_stale(Partition::Job, clock.now_micros()));

        clock.advance_secs(5);
        assert!(!tag.is_stale(Partition::Job, clock.now_micros()));

        clock.advance_micros(1);
        assert!(tag.is_stale(Partition::Job, clock.now_micros()));
        assert!(tag.is_stale(Partition::Result, clock.now_micros()));
    }

    #[test]
    fn heartbeats_never_go_stale_by_tag_rules() {
        let clock = ManualClock::at_secs(0);
        let tag = Tag::generate(1, 0, &clock);
        clock.advance_secs(1_000_000);

        assert!(!tag.is_stale(Partition::Heartbeat, clock.now_micros()));
    }

    #[test]
    fn absurd_budget_fields_saturate_instead_of_overflowing() {
        let tag: Tag = format!("1-0-{}-x", u64::MAX).parse().unwrap();

        assert!(!tag.is_stale(Partition::Job, u64::MAX));
        assert!(!tag.is_stale(Partition::Result, u64::MAX));
    }

    #[test]
    fn ownership_prefix_is_exact() {
        assert!(Tag::owned_by("12-100-5-abc", 12));
        assert!(!Tag::owned_by("12-100-5-abc", 1));
        assert!(!Tag::owned_by("120-100-5-abc", 12));
    }

    #[test]
    fn malformed_tags_are_rejected() {
        assert!("1-2-3".parse::<Tag>().is_err());
        assert!("1-2-3-4-5".parse::<Tag>().is_err());
        assert!("x-2-3-abc".parse::<Tag>().is_err());
        assert!("1-y-3-abc".parse::<Tag>().is_err());
    }

    #[test]
    fn sorting_tags_orders_by_submission_within_one_worker() {
        let clock = ManualClock::at_micros(1_700_000_000_000_000);
        let older = Tag::generate(3, 5, &clock).to_string();
        clock.advance_micros(10);
        let newer = Tag::generate(3, 5, &clock).to_string();

        let mut keys = vec![newer.clone(), older.clone()];
        keys.sort();
        assert_eq!(keys, vec![older, newer]);
    }
}
