use milestone_core::error::CoreError;
use milestone_core::types::Timestamp;

/// Errors raised while driving tracks through the runners.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Sample source or milestone store could not be reached.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The bucket has closed but the source has no sample for it yet.
    #[error("No data yet for {track} at {bucket}")]
    DataNotReady { track: String, bucket: Timestamp },

    #[error("Track {0} is leased by another worker")]
    LeaseHeld(String),

    #[error("Cancelled")]
    Cancelled,
}

impl WorkerError {
    /// Transient failures worth retrying with backoff. Everything else
    /// either needs operator attention or resolves on a later tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkerError::StoreUnavailable(_))
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, WorkerError::Core(CoreError::InvariantViolation(_)))
    }
}

impl From<sqlx::Error> for WorkerError {
    fn from(err: sqlx::Error) -> Self {
        WorkerError::StoreUnavailable(err.to_string())
    }
}
