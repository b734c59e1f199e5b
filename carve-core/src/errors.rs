use carve_hal::HalError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// An external command failed, timed out, or was not found.
    #[error(transparent)]
    Tool(#[from] HalError),

    /// Caller-supplied parameters violate a local invariant. Rejected
    /// before any subprocess runs.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The second phase of a two-phase operation failed after the first
    /// succeeded. Blind retry of the whole operation would be wrong, so
    /// the message spells out both halves.
    #[error("{succeeded}, but {failed}")]
    Consistency { succeeded: String, failed: String },

    /// Undo/redo requested on a history entry that cannot satisfy it.
    #[error("{0}")]
    NotReversible(String),

    /// Copy verification found differing content digests. Distinct from
    /// copy failure: the copy completed, the data does not match.
    #[error("verification failed: digests do not match (source {source_digest}, destination {dest_digest})")]
    VerifyMismatch {
        source_digest: String,
        dest_digest: String,
    },
}
