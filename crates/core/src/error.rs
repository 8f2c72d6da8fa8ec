#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported track: {metric} at {period} for {partition}")]
    UnsupportedTrack {
        metric: String,
        period: String,
        partition: String,
    },

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
