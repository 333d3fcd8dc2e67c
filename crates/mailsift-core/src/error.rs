//! Error types shared by the Mailsift crates.
//!
//! Per-URL extraction failures are not errors here; they are reported as
//! [`crate::FailureKind`] values inside results.

use thiserror::Error;

/// Errors from constructing core values.
#[derive(Error, Debug)]
pub enum MailsiftError {
    /// A value that does not match the email grammar in full
    #[error("invalid email address: '{0}'")]
    InvalidEmail(String),
}

/// Errors from loading, validating or saving [`crate::AppConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No home or config directory could be resolved
    #[error("could not determine config directory (XDG base directories not available)")]
    NoConfigDir,

    /// An explicitly given config file is missing
    #[error("config file not found at {path}")]
    NotFound {
        /// Path that was tried
        path: String,
    },

    /// Malformed TOML
    #[error("failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// The config could not be written as TOML
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Reading or writing the config file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value outside its allowed range
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Dotted field name, e.g. `scanning.max_concurrency`
        field: String,
        /// What was wrong
        reason: String,
    },
}

/// Result type alias using `MailsiftError`.
pub type Result<T> = std::result::Result<T, MailsiftError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
