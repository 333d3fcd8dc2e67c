use thiserror::Error;

/// Orchestration-level failures.
///
/// Per-URL failures are reported as [`mailsift_core::FailureKind`] values inside
/// results, never through this type.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The batch had no usable URLs
    #[error("invalid URL list: {0}")]
    InvalidUrlList(String),

    /// A custom filter pattern failed to compile
    #[error("invalid filter rule {pattern:?}: {source}")]
    InvalidFilterRule {
        /// The offending pattern
        pattern: String,
        /// Compilation error
        #[source]
        source: regex::Error,
    },

    /// The orchestrator was shut down
    #[error("engine is shut down")]
    Shutdown,
}

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, ScanError>;
