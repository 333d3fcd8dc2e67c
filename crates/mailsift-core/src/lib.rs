//! Mailsift Core - Foundation crate for the Mailsift email extraction engine.
//!
//! This crate provides shared types, error handling and configuration
//! management that all other Mailsift crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared newtypes and enums (`EmailAddress`, `ProxyEndpoint`, `FailureKind`)
//!
//! # Example
//!
//! ```rust
//! use mailsift_core::{AppConfig, EmailAddress};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! config.validate()?;
//!
//! let email = EmailAddress::parse("Sales@Example.com")?;
//! assert_eq!(email.as_str(), "sales@example.com");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{AppConfig, BrowserConfig, ProxyConfig, ScanningConfig};
pub use error::{ConfigError, ConfigResult, MailsiftError, Result};
pub use types::{
    email_regex, BatchId, EmailAddress, FailureKind, ProxyCredentials, ProxyEndpoint,
    EMAIL_PATTERN,
};
