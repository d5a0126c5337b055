//! Error types for the dispatch side

use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors surfaced to the serving process.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The shared store failed. For job submission this is fatal to the
    /// submission; expected delete races are absorbed before reaching
    /// this type.
    #[error(transparent)]
    Storage(#[from] rotor_storage::StorageError),

    /// A result record existed but was zero-length. An empty record can
    /// only come from a corrupt write, never from a pending worker, so
    /// this is fatal rather than a retry.
    #[error("the result record for {tag} is empty")]
    EmptyResult {
        /// Tag whose result record was corrupt.
        tag: String,
    },
}
