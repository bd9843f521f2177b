//! Error types for the corridor engine binary.
//!
//! [`EngineError`] wraps every failure mode between loading the comparison
//! file and printing the report. Argument errors are reported by `clap`
//! before any of these can occur.

/// Top-level error for the corridor engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Loading or running the comparison failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: corridor_core::runner::RunnerError,
    },

    /// The report could not be serialized.
    #[error("output error: {source}")]
    Output {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// The log subscriber could not be installed.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },
}
