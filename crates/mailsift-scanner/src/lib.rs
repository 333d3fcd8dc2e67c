//! Mailsift Scanner - email extraction orchestration.
//!
//! This crate turns a list of URLs into a set of contact email addresses. It
//! drives each URL through a [`mailsift_browser::SessionFactory`] with retry
//! and proxy escalation, mines rendered pages with a fixed filter pipeline,
//! and runs whole batches under a concurrency limit with pause, resume and
//! stop.
//!
//! # Features
//!
//! - Bounded concurrent batches with cooperative pause/resume/stop
//! - Per-URL retry on navigation timeout
//! - Bot-challenge detection with one-time escalation to a proxied session
//! - English-variant discovery and merge
//! - Typed event stream for logs, partial results and progress
//!
//! # Example
//!
//! ```rust,ignore
//! use mailsift_scanner::{BatchOrchestrator, EventBus};
//! use std::sync::Arc;
//!
//! let (events, mut rx) = EventBus::channel();
//! let orchestrator = BatchOrchestrator::from_config(
//!     Arc::new(browser_engine),
//!     Arc::new(ProxyPool::from_config(&config.proxy)),
//!     &config,
//! )
//! .with_events(events);
//!
//! let summary = orchestrator.run(urls).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[allow(missing_docs)]
pub mod challenge;
pub mod control;
pub mod error;
#[allow(missing_docs)]
pub mod events;
pub mod extractor;
#[allow(missing_docs)]
pub mod filter;
#[allow(missing_docs)]
pub mod locale;
pub mod orchestrator;

// Re-export commonly used types
pub use control::{BatchControl, ControlState};
pub use error::{Result, ScanError};
pub use events::{EventBus, LogLevel, ScanEvent};
pub use extractor::{AttemptBudget, ExtractionResult, ExtractorSettings, UrlExtractor};
pub use filter::{extract_emails, EmailFilter, FilterRules, Rejection};
pub use orchestrator::{BatchOrchestrator, BatchSummary, FailedUrl};
