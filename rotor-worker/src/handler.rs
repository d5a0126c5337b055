//! Job execution boundary
//!
//! The engine moves bytes; the embedding application turns them into a
//! request, runs its own code and produces response bytes. A handler
//! failure never crashes the worker loop: it is converted into an
//! error-shaped result payload and delivered like any other answer, so
//! the serving process is released instead of waiting out its timeout.

use async_trait::async_trait;

/// Executes claimed jobs inside a worker process.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs the application code for one job payload and returns the
    /// serialized result.
    async fn execute(&self, job: Vec<u8>) -> anyhow::Result<Vec<u8>>;

    /// Builds the result payload delivered when [`JobHandler::execute`]
    /// fails. Must be non-empty: an empty result record reads as
    /// corrupt on the serving side.
    fn failure_payload(&self, error: &anyhow::Error) -> Vec<u8>;
}
