//! Single-URL extraction.
//!
//! [`UrlExtractor::extract`] drives one URL through the renderer as an
//! iterative state machine. Each attempt opens a fresh session, navigates,
//! checks for a bot challenge, mines the page and optionally follows an
//! English-variant link. Timeouts are retried while the [`AttemptBudget`]
//! allows; a challenge on the first attempt escalates once to a proxied
//! session. Sessions are closed on every exit path, including panics.

use crate::challenge::detect_challenge;
use crate::control::BatchControl;
use crate::events::{EventBus, LogLevel, ScanEvent};
use crate::filter::EmailFilter;
use crate::locale::{is_english_link, is_english_url};
use futures::FutureExt;
use mailsift_browser::{Anchor, PageSession, ProxyPool, SessionFactory};
use mailsift_core::{AppConfig, EmailAddress, FailureKind, ProxyEndpoint};
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timeouts, delays and switches for one extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorSettings {
    /// Tries per URL, the proxy escalation included
    pub max_attempts: u32,
    /// Primary navigation timeout
    pub navigation_timeout: Duration,
    /// Timeout for the English-variant page
    pub secondary_navigation_timeout: Duration,
    /// Upper bound on the best-effort network idle wait
    pub quiescence_timeout: Duration,
    /// Wait before retrying a timed-out navigation
    pub retry_delay: Duration,
    /// Pause after load for deferred scripts
    pub settle_delay: Duration,
    /// Wait before re-reading a page that yielded nothing
    pub empty_retry_delay: Duration,
    /// Pause after loading the English variant
    pub secondary_settle_delay: Duration,
    /// Escalate to a proxy after a bot challenge
    pub proxy_fallback: bool,
    /// Look for and merge an English-variant page
    pub follow_english_variant: bool,
}

impl ExtractorSettings {
    /// Collect the extractor's knobs from the scanning, browser and proxy sections.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.scanning.max_attempts,
            navigation_timeout: config.browser.navigation_timeout(),
            secondary_navigation_timeout: config.browser.secondary_navigation_timeout(),
            quiescence_timeout: config.browser.quiescence_timeout(),
            retry_delay: config.scanning.retry_delay(),
            settle_delay: config.scanning.settle_delay(),
            empty_retry_delay: config.scanning.empty_retry_delay(),
            secondary_settle_delay: config.scanning.secondary_settle_delay(),
            proxy_fallback: config.proxy.fallback_enabled,
            follow_english_variant: config.scanning.follow_english_variant,
        }
    }
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Tries consumed by one URL, including the one-time proxy escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptBudget {
    max_attempts: u32,
    used: u32,
    escalated: bool,
}

impl AttemptBudget {
    /// A fresh budget. Zero attempts is treated as one.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            used: 0,
            escalated: false,
        }
    }

    /// Consume one attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.used += 1;
        self.used
    }

    /// Attempts begun so far.
    pub fn used(&self) -> u32 {
        self.used
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt may begin.
    pub fn can_retry(&self) -> bool {
        self.used < self.max_attempts
    }

    /// Escalation is only offered after the first attempt, once.
    pub fn can_escalate(&self, fallback_enabled: bool) -> bool {
        fallback_enabled && !self.escalated && self.used == 1 && self.can_retry()
    }

    /// Record the switch to a proxied route.
    pub fn mark_escalated(&mut self) {
        self.escalated = true;
    }

    /// Whether the proxy escalation has been used.
    pub fn escalated(&self) -> bool {
        self.escalated
    }
}

/// Final disposition of one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    /// The URL as given
    pub url: String,
    /// Addresses from the page and its English variant
    pub emails: BTreeSet<EmailAddress>,
    /// The page loaded and was mined, with or without results
    pub success: bool,
    /// Why the URL failed, if it did
    pub error: Option<FailureKind>,
    /// Human-readable failure context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Attempts consumed
    pub attempts: u32,
    /// Proxy the final attempt went through
    pub proxy: Option<String>,
    /// English-variant page that was visited
    pub secondary_url: Option<String>,
}

impl ExtractionResult {
    fn failure(url: &str, kind: FailureKind, detail: String, attempts: u32, proxy: Option<&ProxyEndpoint>) -> Self {
        Self {
            url: url.to_string(),
            emails: BTreeSet::new(),
            success: false,
            error: Some(kind),
            detail: Some(detail),
            attempts,
            proxy: proxy.map(|p| p.server.clone()),
            secondary_url: None,
        }
    }

    /// Whether the URL ended because of a stop request.
    pub fn is_stopped(&self) -> bool {
        self.error == Some(FailureKind::UserStopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Direct,
    Proxied,
}

#[derive(Debug)]
struct Harvest {
    emails: BTreeSet<EmailAddress>,
    secondary_url: Option<String>,
}

#[derive(Debug)]
enum AttemptOutcome {
    Extracted(Harvest),
    Timeout(String),
    Challenge(&'static str),
    Failed(FailureKind, String),
    Stopped,
}

/// Extracts emails from one URL at a time. Cheap to share behind an `Arc`.
pub struct UrlExtractor {
    factory: Arc<dyn SessionFactory>,
    proxies: Arc<ProxyPool>,
    filter: EmailFilter,
    settings: ExtractorSettings,
    control: BatchControl,
    events: EventBus,
}

impl UrlExtractor {
    /// Create an extractor with the standard filter, its own control and no listener.
    pub fn new(factory: Arc<dyn SessionFactory>, proxies: Arc<ProxyPool>, settings: ExtractorSettings) -> Self {
        Self {
            factory,
            proxies,
            filter: EmailFilter::standard(),
            settings,
            control: BatchControl::new(),
            events: EventBus::detached(),
        }
    }

    /// Replace the filter pipeline.
    #[must_use]
    pub fn with_filter(mut self, filter: EmailFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Share a batch's pause/stop handle.
    #[must_use]
    pub fn with_control(mut self, control: BatchControl) -> Self {
        self.control = control;
        self
    }

    /// Send per-URL events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Active settings.
    pub fn settings(&self) -> &ExtractorSettings {
        &self.settings
    }

    /// Run the full attempt sequence for `url`. Never fails; failures are values.
    pub async fn extract(&self, url: &str) -> ExtractionResult {
        let mut budget = AttemptBudget::new(self.settings.max_attempts);
        let mut route = Route::Direct;
        let fallback = self.settings.proxy_fallback && self.proxies.is_enabled();

        info!("extracting {}", url);
        self.events.log(LogLevel::Info, format!("Visiting {url}"), Some(url));

        loop {
            if self.control.is_stopped() {
                return self.stopped(url, budget.used(), None);
            }

            let attempt = budget.begin_attempt();
            let proxy = match route {
                Route::Direct => None,
                Route::Proxied => match self.proxies.select_random() {
                    Some(endpoint) => Some(endpoint),
                    None => {
                        return self.fail(
                            url,
                            FailureKind::ProxyAcquisitionFailure,
                            "no proxy endpoint available".to_string(),
                            attempt,
                            None,
                        );
                    }
                },
            };
            debug!(
                "attempt {}/{} for {} ({})",
                attempt,
                budget.max_attempts(),
                url,
                proxy.as_ref().map_or("direct".to_string(), ToString::to_string)
            );

            match self.run_attempt(url, proxy.as_ref()).await {
                AttemptOutcome::Extracted(harvest) => {
                    info!("extracted {} emails from {}", harvest.emails.len(), url);
                    return ExtractionResult {
                        url: url.to_string(),
                        emails: harvest.emails,
                        success: true,
                        error: None,
                        detail: None,
                        attempts: attempt,
                        proxy: proxy.map(|p| p.server),
                        secondary_url: harvest.secondary_url,
                    };
                }
                AttemptOutcome::Stopped => return self.stopped(url, attempt, proxy.as_ref()),
                AttemptOutcome::Timeout(detail) => {
                    if let Some(endpoint) = &proxy {
                        self.proxies.mark_failed(&endpoint.server);
                    }
                    if self.control.is_stopped() {
                        return self.stopped(url, attempt, proxy.as_ref());
                    }
                    if !budget.can_retry() {
                        return self.fail(
                            url,
                            FailureKind::NavigationTimeout,
                            format!("{detail} (after {attempt} attempts)"),
                            attempt,
                            proxy.as_ref(),
                        );
                    }
                    warn!("navigation to {} timed out, retrying ({}/{})", url, attempt, budget.max_attempts());
                    self.events.log(
                        LogLevel::Warning,
                        format!("Timed out, retrying ({attempt}/{})", budget.max_attempts()),
                        Some(url),
                    );
                    self.pause_before_retry().await;
                }
                AttemptOutcome::Challenge(indicator) => {
                    if let Some(endpoint) = &proxy {
                        self.proxies.mark_failed(&endpoint.server);
                    }
                    if self.control.is_stopped() {
                        return self.stopped(url, attempt, proxy.as_ref());
                    }
                    if !budget.can_escalate(fallback) {
                        return self.fail(
                            url,
                            FailureKind::BotChallengeDetected,
                            format!("challenge page detected ({indicator})"),
                            attempt,
                            proxy.as_ref(),
                        );
                    }
                    budget.mark_escalated();
                    route = Route::Proxied;
                    warn!("bot challenge on {} ({}), escalating to proxy", url, indicator);
                    self.events.log(
                        LogLevel::Warning,
                        "Bot challenge detected, retrying through a proxy",
                        Some(url),
                    );
                }
                AttemptOutcome::Failed(kind, detail) => {
                    if kind == FailureKind::ProxyAcquisitionFailure {
                        if let Some(endpoint) = &proxy {
                            self.proxies.mark_failed(&endpoint.server);
                        }
                    }
                    return self.fail(url, kind, detail, attempt, proxy.as_ref());
                }
            }
        }
    }

    async fn pause_before_retry(&self) {
        tokio::select! {
            () = tokio::time::sleep(self.settings.retry_delay) => {}
            () = self.control.stopped() => {}
        }
    }

    /// One attempt in a fresh session, which is always closed afterwards.
    async fn run_attempt(&self, url: &str, proxy: Option<&ProxyEndpoint>) -> AttemptOutcome {
        let mut session = match self.factory.open(proxy).await {
            Ok(session) => session,
            Err(e) => {
                return match proxy {
                    Some(endpoint) => AttemptOutcome::Failed(
                        FailureKind::ProxyAcquisitionFailure,
                        format!("could not open session via {endpoint}: {e}"),
                    ),
                    None => AttemptOutcome::Failed(FailureKind::RenderingSessionError, e.to_string()),
                };
            }
        };

        let driven = AssertUnwindSafe(self.drive(session.as_mut(), url))
            .catch_unwind()
            .await;

        if let Err(e) = session.close().await {
            warn!("failed to close session for {}: {}", url, e);
        }

        driven.unwrap_or_else(|payload| {
            AttemptOutcome::Failed(FailureKind::UnknownExtractionError, panic_message(payload.as_ref()))
        })
    }

    async fn drive(&self, session: &mut dyn PageSession, url: &str) -> AttemptOutcome {
        if self.control.is_stopped() {
            return AttemptOutcome::Stopped;
        }

        match session.navigate(url, self.settings.navigation_timeout).await {
            Ok(()) => {}
            Err(e) if e.is_timeout() => return AttemptOutcome::Timeout(e.to_string()),
            Err(e) => return AttemptOutcome::Failed(FailureKind::RenderingSessionError, e.to_string()),
        }

        if let Err(e) = session.wait_quiescent(self.settings.quiescence_timeout).await {
            debug!("network did not settle on {}: {}", url, e);
        }
        tokio::time::sleep(self.settings.settle_delay).await;
        self.events.log(LogLevel::Success, format!("Page loaded: {url}"), Some(url));

        let title = session.title().await.unwrap_or_else(|e| {
            debug!("could not read title of {}: {}", url, e);
            String::new()
        });
        let final_url = session.current_url().await.unwrap_or_else(|e| {
            debug!("could not read final URL of {}: {}", url, e);
            url.to_string()
        });
        if let Some(indicator) = detect_challenge(&title, &final_url) {
            return AttemptOutcome::Challenge(indicator);
        }

        let mut emails = match self.harvest(session).await {
            Ok(emails) => emails,
            Err(e) => {
                return AttemptOutcome::Failed(
                    FailureKind::RenderingSessionError,
                    format!("could not read page content: {e}"),
                );
            }
        };

        if emails.is_empty() {
            warn!("no emails found on {}", url);
            self.events.log(LogLevel::Warning, "No emails found on this page", Some(url));
        } else {
            self.events.log(
                LogLevel::Success,
                format!("Found {} emails on this page", emails.len()),
                Some(url),
            );
            self.emit_emails(&emails);
        }

        let secondary_url = if self.settings.follow_english_variant {
            self.visit_english_variant(session, url, &final_url, &mut emails)
                .await
        } else {
            None
        };

        AttemptOutcome::Extracted(Harvest {
            emails,
            secondary_url,
        })
    }

    /// Read the page, re-reading once after a short wait if nothing was found.
    async fn harvest(&self, session: &mut dyn PageSession) -> mailsift_browser::Result<BTreeSet<EmailAddress>> {
        let emails = self.read_emails(session).await?;
        if !emails.is_empty() {
            return Ok(emails);
        }
        debug!("empty read, retrying in {:?}", self.settings.empty_retry_delay);
        tokio::time::sleep(self.settings.empty_retry_delay).await;
        self.read_emails(session).await
    }

    async fn read_emails(&self, session: &mut dyn PageSession) -> mailsift_browser::Result<BTreeSet<EmailAddress>> {
        let content = session.content().await?;
        let mut emails = self.filter.extract(&content.html, None);
        emails.extend(self.filter.extract(&content.text, None));
        Ok(emails)
    }

    /// Follow an English-variant link and merge what it adds. Never fatal.
    async fn visit_english_variant(
        &self,
        session: &mut dyn PageSession,
        url: &str,
        final_url: &str,
        emails: &mut BTreeSet<EmailAddress>,
    ) -> Option<String> {
        if is_english_url(url) || is_english_url(final_url) {
            return None;
        }

        let current = final_url.to_string();
        let predicate = move |anchor: &Anchor| is_english_link(anchor, &current);
        let link = match session.find_link(&predicate).await {
            Ok(Some(link)) => link,
            Ok(None) => return None,
            Err(e) => {
                debug!("could not search {} for an English link: {}", url, e);
                return None;
            }
        };
        if link == url || link == final_url || self.control.is_stopped() {
            return None;
        }

        info!("following English variant {} of {}", link, url);
        self.events.log(
            LogLevel::Info,
            format!("Found English version, visiting {link}"),
            Some(url),
        );

        if let Err(e) = session
            .navigate(&link, self.settings.secondary_navigation_timeout)
            .await
        {
            warn!("English variant {} failed: {}", link, e);
            let message = if e.is_timeout() {
                "English page timed out, skipping"
            } else {
                "English page failed to load, skipping"
            };
            self.events.log(LogLevel::Warning, message, Some(url));
            return None;
        }
        tokio::time::sleep(self.settings.secondary_settle_delay).await;

        match self.read_emails(session).await {
            Ok(found) => {
                let before = emails.len();
                emails.extend(found);
                let added = emails.len() - before;
                if added > 0 {
                    self.events.log(
                        LogLevel::Success,
                        format!("Found {added} more emails on the English page"),
                        Some(url),
                    );
                    self.emit_emails(emails);
                } else {
                    self.events.log(LogLevel::Info, "No new emails on the English page", Some(url));
                }
            }
            Err(e) => warn!("could not read English variant {}: {}", link, e),
        }

        Some(link)
    }

    fn emit_emails(&self, emails: &BTreeSet<EmailAddress>) {
        self.events.emit(ScanEvent::Email {
            emails: emails.iter().cloned().collect(),
        });
    }

    fn fail(
        &self,
        url: &str,
        kind: FailureKind,
        detail: String,
        attempts: u32,
        proxy: Option<&ProxyEndpoint>,
    ) -> ExtractionResult {
        error!("{} failed: {} ({})", url, kind, detail);
        self.events.log(LogLevel::Error, format!("Error: {url} - {kind}"), Some(url));
        ExtractionResult::failure(url, kind, detail, attempts, proxy)
    }

    fn stopped(&self, url: &str, attempts: u32, proxy: Option<&ProxyEndpoint>) -> ExtractionResult {
        debug!("{} observed stop after {} attempts", url, attempts);
        ExtractionResult::failure(
            url,
            FailureKind::UserStopped,
            "stopped before completion".to_string(),
            attempts,
            proxy,
        )
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("extraction panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("extraction panicked: {message}")
    } else {
        "extraction panicked".to_string()
    }
}
