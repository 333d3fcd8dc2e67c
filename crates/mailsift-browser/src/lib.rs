//! Page rendering for Mailsift.
//!
//! Provides the [`SessionFactory`]/[`PageSession`] seam the extraction engine
//! renders through, a Chromium implementation with per-session fingerprinting
//! and proxy routing, and the shared [`ProxyPool`].

pub mod engine;
pub mod error;
pub mod fingerprint;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod proxy;
pub mod session;

pub use engine::BrowserEngine;
pub use error::{BrowserError, Result};
pub use proxy::{ProxyPool, ProxyStats};
pub use session::{Anchor, LinkPredicate, PageContent, PageSession, SessionFactory};
