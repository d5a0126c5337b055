//! Core error types

use thiserror::Error;

/// Errors detected while validating the configuration.
///
/// These are fatal at startup and never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The worker lifetime is below the supported minimum.
    #[error("worker lifetime must be at least one second")]
    LifetimeTooShort,

    /// A worker id outside the configured range was supplied.
    #[error("worker id {id} is not within the configured range 1..={max}")]
    WorkerIdOutOfRange {
        /// The offending id.
        id: u32,
        /// Highest permitted id for this role.
        max: u32,
    },

    /// The runtime or log directory resolves to a path inside the public
    /// document root. Queued request data must never be web-servable.
    #[error("{name} directory {path} cannot be inside the public directory")]
    DirectoryInsidePublicRoot {
        /// Which directory failed the check.
        name: &'static str,
        /// The normalized offending path.
        path: String,
    },

    /// A duration knob was given a zero value where one is not meaningful.
    #[error("{name} must be greater than zero")]
    ZeroDuration {
        /// The offending configuration field.
        name: &'static str,
    },
}

/// Errors produced when parsing a tag string.
#[derive(Debug, Error)]
pub enum TagError {
    /// The tag did not contain exactly four hyphen-separated fields.
    #[error("malformed tag {0:?}: expected owner-timestamp-budget-suffix")]
    Malformed(String),

    /// A numeric field of the tag failed to parse.
    #[error("invalid {field} field in tag {tag:?}")]
    InvalidField {
        /// Name of the field that failed to parse.
        field: &'static str,
        /// The full tag string.
        tag: String,
    },
}
