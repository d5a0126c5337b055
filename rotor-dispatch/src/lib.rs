//! Rotor Dispatch
//!
//! The request-serving side of the engine. A serving process uses the
//! [`Dispatcher`] to select a live worker, queue a job under a fresh
//! tag and wait for the worker's answer; if no worker is available, the
//! payload cannot leave the process, or no answer arrives in time, the
//! caller falls back to handling the request in place, as if no
//! acceleration existed.

pub mod dispatcher;
pub mod error;
pub mod matcher;
pub mod registry;

pub use dispatcher::{DispatchOutcome, Dispatcher, FallbackReason, Submission};
pub use error::{DispatchError, Result};
pub use matcher::ResponseMatcher;
pub use registry::WorkerRegistry;
