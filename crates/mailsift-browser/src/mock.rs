//! Scripted in-memory renderer for tests.
//!
//! Pages are registered per URL and describe what navigation does, what the
//! title looks like with and without a proxy, and what content is served.
//! [`MockStats`] records every open, close and navigation so tests can check
//! concurrency bounds and session cleanup.

use crate::error::{BrowserError, Result};
use crate::session::{Anchor, LinkPredicate, PageContent, PageSession, SessionFactory};
use mailsift_core::ProxyEndpoint;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// What a navigation to a page does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NavigationScript {
    #[default]
    Load,
    Timeout,
    Fail(String),
    Panic,
}

/// When a page presents a bot challenge title.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChallengeMode {
    #[default]
    Never,
    /// Only for sessions without a proxy
    Direct,
    Always,
}

#[derive(Debug, Clone, Default)]
pub struct MockPage {
    pub html: String,
    pub text: String,
    pub title: String,
    pub redirect_to: Option<String>,
    pub links: Vec<Anchor>,
    /// Outcome of the nth navigation; the last entry repeats
    pub outcomes: Vec<NavigationScript>,
    pub challenge: ChallengeMode,
    /// Number of initial content reads that return an empty document
    pub empty_reads: usize,
    pub load_delay: Duration,
}

impl MockPage {
    pub fn new(html: impl Into<String>) -> Self {
        let html = html.into();
        Self {
            text: html.clone(),
            html,
            title: "Welcome".to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    #[must_use]
    pub fn with_links(mut self, links: Vec<Anchor>) -> Self {
        self.links = links;
        self
    }

    #[must_use]
    pub fn with_outcomes(mut self, outcomes: Vec<NavigationScript>) -> Self {
        self.outcomes = outcomes;
        self
    }

    #[must_use]
    pub fn with_challenge(mut self, challenge: ChallengeMode) -> Self {
        self.challenge = challenge;
        self
    }

    #[must_use]
    pub fn with_empty_reads(mut self, reads: usize) -> Self {
        self.empty_reads = reads;
        self
    }

    #[must_use]
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    #[must_use]
    pub fn redirecting_to(mut self, url: impl Into<String>) -> Self {
        self.redirect_to = Some(url.into());
        self
    }

    fn outcome(&self, attempt: usize) -> NavigationScript {
        self.outcomes
            .get(attempt)
            .or_else(|| self.outcomes.last())
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRecord {
    pub url: String,
    pub proxy: Option<String>,
}

#[derive(Debug, Default)]
pub struct MockStats {
    opened: AtomicUsize,
    closed: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    shutdown_grace: Mutex<Option<Duration>>,
    navigations: Mutex<Vec<NavigationRecord>>,
    content_reads: Mutex<HashMap<String, usize>>,
}

impl MockStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open sessions seen
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn shutdown_called(&self) -> bool {
        self.shutdown_grace().is_some()
    }

    /// Grace period the factory was shut down with.
    pub fn shutdown_grace(&self) -> Option<Duration> {
        *locked(&self.shutdown_grace)
    }

    pub fn navigations(&self) -> Vec<NavigationRecord> {
        locked(&self.navigations).clone()
    }

    pub fn navigations_to(&self, url: &str) -> usize {
        locked(&self.navigations)
            .iter()
            .filter(|record| record.url == url)
            .count()
    }

    fn record_open(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn record_close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Returns how many navigations to `url` happened before this one
    fn record_navigation(&self, url: &str, proxy: Option<&ProxyEndpoint>) -> usize {
        let mut navigations = locked(&self.navigations);
        let previous = navigations.iter().filter(|r| r.url == url).count();
        navigations.push(NavigationRecord {
            url: url.to_string(),
            proxy: proxy.map(|p| p.server.clone()),
        });
        previous
    }

    fn record_read(&self, url: &str) -> usize {
        let mut reads = locked(&self.content_reads);
        let count = reads.entry(url.to_string()).or_insert(0);
        let previous = *count;
        *count += 1;
        previous
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Default)]
pub struct MockSessionFactory {
    pages: Arc<HashMap<String, MockPage>>,
    stats: Arc<MockStats>,
    open_delay: Duration,
    refuse_proxied: bool,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_page(mut self, url: impl Into<String>, page: MockPage) -> Self {
        Arc::make_mut(&mut self.pages).insert(url.into(), page);
        self
    }

    /// Delay every session open, to keep sessions alive across scheduler turns.
    #[must_use]
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Fail every attempt to open a proxied session.
    #[must_use]
    pub fn refusing_proxied_sessions(mut self) -> Self {
        self.refuse_proxied = true;
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }
}

#[async_trait::async_trait]
impl SessionFactory for MockSessionFactory {
    async fn open(&self, proxy: Option<&ProxyEndpoint>) -> Result<Box<dyn PageSession>> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if self.refuse_proxied && proxy.is_some() {
            return Err(BrowserError::ChromiumError(
                "proxied browser failed to launch".to_string(),
            ));
        }
        self.stats.record_open();
        Ok(Box::new(MockSession {
            pages: self.pages.clone(),
            stats: self.stats.clone(),
            proxy: proxy.cloned(),
            current: None,
        }))
    }

    async fn shutdown(&self, grace: Duration) {
        *locked(&self.stats.shutdown_grace) = Some(grace);
    }
}

pub struct MockSession {
    pages: Arc<HashMap<String, MockPage>>,
    stats: Arc<MockStats>,
    proxy: Option<ProxyEndpoint>,
    current: Option<String>,
}

impl MockSession {
    fn current_page(&self) -> Result<(&str, &MockPage)> {
        let url = self
            .current
            .as_deref()
            .ok_or_else(|| BrowserError::NavigationError("no page loaded".to_string()))?;
        let page = self
            .pages
            .get(url)
            .ok_or_else(|| BrowserError::NavigationError(format!("no route to {url}")))?;
        Ok((url, page))
    }
}

#[async_trait::async_trait]
impl PageSession for MockSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        let previous = self.stats.record_navigation(url, self.proxy.as_ref());
        let page = self
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| BrowserError::NavigationError(format!("no route to {url}")))?;

        if !page.load_delay.is_zero() {
            if page.load_delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(BrowserError::Timeout(url.to_string()));
            }
            tokio::time::sleep(page.load_delay).await;
        }

        match page.outcome(previous) {
            NavigationScript::Load => {
                self.current = Some(url.to_string());
                Ok(())
            }
            NavigationScript::Timeout => {
                tokio::time::sleep(timeout).await;
                Err(BrowserError::Timeout(url.to_string()))
            }
            NavigationScript::Fail(message) => Err(BrowserError::NavigationError(message)),
            NavigationScript::Panic => panic!("scripted renderer panic for {url}"),
        }
    }

    async fn wait_quiescent(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn content(&mut self) -> Result<PageContent> {
        let (url, page) = self.current_page()?;
        let previous = self.stats.record_read(url);
        if previous < page.empty_reads {
            return Ok(PageContent {
                html: "<html><head></head><body></body></html>".to_string(),
                text: String::new(),
            });
        }
        Ok(PageContent {
            html: page.html.clone(),
            text: page.text.clone(),
        })
    }

    async fn title(&mut self) -> Result<String> {
        let (_, page) = self.current_page()?;
        let challenged = match page.challenge {
            ChallengeMode::Never => false,
            ChallengeMode::Direct => self.proxy.is_none(),
            ChallengeMode::Always => true,
        };
        if challenged {
            Ok("Just a moment...".to_string())
        } else {
            Ok(page.title.clone())
        }
    }

    async fn current_url(&mut self) -> Result<String> {
        let (url, page) = self.current_page()?;
        Ok(page.redirect_to.clone().unwrap_or_else(|| url.to_string()))
    }

    async fn find_link(&mut self, predicate: &LinkPredicate<'_>) -> Result<Option<String>> {
        let (_, page) = self.current_page()?;
        Ok(page
            .links
            .iter()
            .find(|anchor| predicate(anchor))
            .map(|anchor| anchor.href.clone()))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.stats.record_close();
        Ok(())
    }
}
