//! Batch orchestrator for fanning a URL list out across bounded workers.
//!
//! This module provides the `BatchOrchestrator`, which dispatches one
//! [`UrlExtractor`] run per URL under a semaphore, gates dispatch on the
//! shared [`BatchControl`], aggregates results under a mutex and reports
//! progress on the [`EventBus`].

use crate::control::BatchControl;
use crate::error::{Result, ScanError};
use crate::events::{EventBus, LogLevel, ScanEvent};
use crate::extractor::{ExtractionResult, ExtractorSettings, UrlExtractor};
use crate::filter::EmailFilter;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use mailsift_browser::{ProxyPool, SessionFactory};
use mailsift_core::{AppConfig, BatchId, EmailAddress, FailureKind};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Default number of URLs processed at once.
const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// A URL that ended in failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUrl {
    /// The URL as given
    pub url: String,
    /// Failure category
    pub error: FailureKind,
    /// Failure context, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Outcome of a whole batch. Every input URL lands in exactly one of
/// `succeeded_urls`, `empty_urls`, `failed_urls`, `stopped_urls` or
/// `skipped_urls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Identifier logged for this batch
    pub batch_id: BatchId,
    /// Union of every URL's addresses, sorted
    pub emails: Vec<EmailAddress>,
    /// Loaded and yielded at least one address
    pub succeeded_urls: Vec<String>,
    /// Ended in a failure
    pub failed_urls: Vec<FailedUrl>,
    /// Loaded but yielded nothing
    pub empty_urls: Vec<String>,
    /// In flight when stop was requested
    pub stopped_urls: Vec<String>,
    /// Never dispatched because of stop
    pub skipped_urls: Vec<String>,
    /// Non-blank input URLs
    pub total: usize,
    /// URLs handed to a worker
    pub dispatched: usize,
    /// Workers that finished, whatever the outcome
    pub total_processed: usize,
    /// Batch start time
    pub started_at: DateTime<Utc>,
    /// Batch end time
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration
    pub duration_ms: u64,
}

#[derive(Debug, Default)]
struct Aggregate {
    emails: BTreeSet<EmailAddress>,
    succeeded: Vec<String>,
    failed: Vec<FailedUrl>,
    empty: Vec<String>,
    stopped: Vec<String>,
    completed: usize,
}

impl Aggregate {
    fn record(&mut self, result: ExtractionResult) {
        self.completed += 1;
        match result.error {
            Some(FailureKind::UserStopped) => self.stopped.push(result.url),
            Some(kind) => self.failed.push(FailedUrl {
                url: result.url,
                error: kind,
                detail: result.detail,
            }),
            None if result.emails.is_empty() => self.empty.push(result.url),
            None => {
                self.emails.extend(result.emails);
                self.succeeded.push(result.url);
            }
        }
    }

    fn progress(&self, total: usize) -> u8 {
        if total == 0 {
            return 100;
        }
        u8::try_from(self.completed.min(total) * 100 / total).unwrap_or(100)
    }
}

/// Runs batches of URLs through a shared [`SessionFactory`].
pub struct BatchOrchestrator {
    factory: Arc<dyn SessionFactory>,
    proxies: Arc<ProxyPool>,
    filter: EmailFilter,
    settings: ExtractorSettings,
    max_concurrency: usize,
    control: BatchControl,
    events: EventBus,
    tracker: TaskTracker,
    closed: AtomicBool,
}

impl BatchOrchestrator {
    /// Create an orchestrator with default settings and no event listener.
    #[must_use]
    pub fn new(factory: Arc<dyn SessionFactory>, proxies: Arc<ProxyPool>) -> Self {
        Self {
            factory,
            proxies,
            filter: EmailFilter::standard(),
            settings: ExtractorSettings::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            control: BatchControl::new(),
            events: EventBus::detached(),
            tracker: TaskTracker::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Create an orchestrator configured from `config`.
    #[must_use]
    pub fn from_config(
        factory: Arc<dyn SessionFactory>,
        proxies: Arc<ProxyPool>,
        config: &AppConfig,
    ) -> Self {
        Self::new(factory, proxies)
            .with_settings(ExtractorSettings::from_config(config))
            .with_max_concurrency(config.scanning.max_concurrency as usize)
    }

    /// Set the maximum number of URLs in flight. Zero is treated as one.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Replace the per-URL settings.
    #[must_use]
    pub fn with_settings(mut self, settings: ExtractorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the filter pipeline.
    #[must_use]
    pub fn with_filter(mut self, filter: EmailFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Send batch and per-URL events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Maximum URLs in flight.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Handle for pausing or stopping from another task.
    pub fn control(&self) -> BatchControl {
        self.control.clone()
    }

    /// Hold back URLs that have not started yet.
    pub fn pause(&self) {
        self.control.pause();
    }

    /// Let held-back URLs start.
    pub fn resume(&self) {
        self.control.resume();
    }

    /// Stop dispatching; in-flight URLs end at their next checkpoint.
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Process `urls` and return once every dispatched URL has finished.
    ///
    /// A stop requested before the call skips every URL. Pause and stop
    /// flags are cleared once the batch has finished.
    pub async fn run(&self, urls: Vec<String>) -> Result<BatchSummary> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ScanError::Shutdown);
        }

        let urls: Vec<String> = urls
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(ScanError::InvalidUrlList("no URLs given".to_string()));
        }

        let batch_id = BatchId::generate();
        let started_at = Utc::now();
        let clock = Instant::now();
        let total = urls.len();

        info!(
            "starting batch {} with {} URLs (concurrency {})",
            batch_id, total, self.max_concurrency
        );
        self.events.log(
            LogLevel::Info,
            format!("Starting extraction of {total} URLs"),
            None,
        );

        let extractor = Arc::new(
            UrlExtractor::new(self.factory.clone(), self.proxies.clone(), self.settings.clone())
                .with_filter(self.filter.clone())
                .with_control(self.control.clone())
                .with_events(self.events.clone()),
        );
        let aggregate = Arc::new(Mutex::new(Aggregate::default()));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        let mut workers = FuturesUnordered::new();
        let mut skipped = Vec::new();
        let mut queue = urls.into_iter();

        while let Some(url) = queue.next() {
            let permit = tokio::select! {
                biased;
                () = self.control.stopped() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                skipped.push(url);
                skipped.extend(queue.by_ref());
                break;
            };

            if !self.control.wait_until_runnable().await {
                drop(permit);
                skipped.push(url);
                skipped.extend(queue.by_ref());
                break;
            }

            let extractor = extractor.clone();
            let aggregate = aggregate.clone();
            let events = self.events.clone();
            let task_url = url.clone();
            let handle = self.tracker.spawn(async move {
                let result = extractor.extract(&task_url).await;
                drop(permit);
                let mut aggregate = aggregate.lock().await;
                aggregate.record(result);
                events.emit(ScanEvent::Progress {
                    progress: aggregate.progress(total),
                });
            });
            workers.push(async move { (url, handle.await) });
        }

        let dispatched = workers.len();
        if !skipped.is_empty() {
            warn!("stop requested, skipping {} undispatched URLs", skipped.len());
            self.events.log(LogLevel::Warning, "Extraction stopped", None);
        }

        // Panicking workers never reach the aggregate; record them here
        while let Some((url, joined)) = workers.next().await {
            if let Err(e) = joined {
                error!("worker for {} crashed: {}", url, e);
                let mut aggregate = aggregate.lock().await;
                aggregate.record(ExtractionResult {
                    url,
                    emails: BTreeSet::new(),
                    success: false,
                    error: Some(FailureKind::UnknownExtractionError),
                    detail: Some(e.to_string()),
                    attempts: 0,
                    proxy: None,
                    secondary_url: None,
                });
                self.events.emit(ScanEvent::Progress {
                    progress: aggregate.progress(total),
                });
            }
        }

        let aggregate = std::mem::take(&mut *aggregate.lock().await);
        let summary = BatchSummary {
            batch_id,
            emails: aggregate.emails.into_iter().collect(),
            succeeded_urls: aggregate.succeeded,
            failed_urls: aggregate.failed,
            empty_urls: aggregate.empty,
            stopped_urls: aggregate.stopped,
            skipped_urls: skipped,
            total,
            dispatched,
            total_processed: aggregate.completed,
            started_at,
            finished_at: Utc::now(),
            duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        info!(
            "batch {} finished: {} emails, {} failed, {} empty, {} stopped, {} skipped in {}ms",
            summary.batch_id,
            summary.emails.len(),
            summary.failed_urls.len(),
            summary.empty_urls.len(),
            summary.stopped_urls.len(),
            summary.skipped_urls.len(),
            summary.duration_ms
        );
        self.events.log(
            LogLevel::Success,
            format!("Extraction complete: {} unique emails", summary.emails.len()),
            None,
        );
        self.events.emit(ScanEvent::FailedUrls {
            urls: summary.failed_urls.clone(),
        });
        self.events.emit(ScanEvent::NoEmailUrls {
            urls: summary.empty_urls.clone(),
        });
        self.events.emit(ScanEvent::Complete {
            summary: summary.clone(),
        });

        if !self.closed.load(Ordering::SeqCst) {
            self.control.reset();
        }
        Ok(summary)
    }

    /// Stop dispatch, wait up to `grace` for in-flight workers, then close
    /// the session factory. Later calls to [`run`](Self::run) fail.
    pub async fn shutdown(&self, grace: Duration) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("orchestrator already shut down");
            return;
        }

        info!("shutting down orchestrator");
        let deadline = tokio::time::Instant::now() + grace;
        self.control.stop();
        self.tracker.close();

        if tokio::time::timeout_at(deadline, self.tracker.wait()).await.is_err() {
            warn!(
                "{} workers still running after {:?}, closing anyway",
                self.tracker.len(),
                grace
            );
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        self.factory.shutdown(remaining).await;
        info!("orchestrator closed");
    }
}
