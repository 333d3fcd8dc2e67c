//! The page-rendering seam.
//!
//! The extraction engine only ever talks to a renderer through these traits,
//! so the Chromium adapter and the scripted mock are interchangeable.

use crate::error::Result;
use mailsift_core::ProxyEndpoint;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A link found on a rendered page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    /// Absolute href as resolved by the page
    pub href: String,
    /// Visible link text
    pub text: String,
    /// `title` attribute
    #[serde(default)]
    pub title: String,
    /// `aria-label` attribute
    #[serde(default)]
    pub aria_label: String,
}

/// Raw HTML plus visible text of the current document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContent {
    pub html: String,
    pub text: String,
}

/// Predicate used to pick a link on the page.
pub type LinkPredicate<'a> = dyn Fn(&Anchor) -> bool + Send + Sync + 'a;

/// One rendering session: a single page, exclusively owned by its opener.
#[async_trait::async_trait]
pub trait PageSession: Send {
    /// Navigate to a URL, failing with a timeout error once `timeout` elapses
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Wait until the network looks idle. Callers treat errors as non-fatal.
    async fn wait_quiescent(&mut self, timeout: Duration) -> Result<()>;

    /// HTML and visible text of the current document
    async fn content(&mut self) -> Result<PageContent>;

    /// Document title
    async fn title(&mut self) -> Result<String>;

    /// URL after redirects
    async fn current_url(&mut self) -> Result<String>;

    /// First link accepted by `predicate`, in document order
    async fn find_link(&mut self, predicate: &LinkPredicate<'_>) -> Result<Option<String>>;

    /// Release the session and everything it owns
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens rendering sessions, optionally routed through a proxy.
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a fresh session
    async fn open(&self, proxy: Option<&ProxyEndpoint>) -> Result<Box<dyn PageSession>>;

    /// Tear down shared resources, bounded by `grace`
    async fn shutdown(&self, grace: Duration);
}
