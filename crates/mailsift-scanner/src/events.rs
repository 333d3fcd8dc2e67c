//! Lifecycle events streamed to whoever drives a batch.

use crate::orchestrator::{BatchSummary, FailedUrl};
use mailsift_core::EmailAddress;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One event on the bus, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    Log {
        level: LogLevel,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// Cumulative set of addresses found for one URL so far
    Email { emails: Vec<EmailAddress> },
    /// Completed share of the batch, 0 to 100
    Progress { progress: u8 },
    FailedUrls { urls: Vec<FailedUrl> },
    NoEmailUrls { urls: Vec<String> },
    Complete { summary: BatchSummary },
}

/// Non-blocking event sender.
///
/// A dropped receiver is noted once at debug level; later events are discarded.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: Option<mpsc::UnboundedSender<ScanEvent>>,
    disconnected: Arc<AtomicBool>,
}

impl EventBus {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = Self {
            tx: Some(tx),
            disconnected: Arc::new(AtomicBool::new(false)),
        };
        (bus, rx)
    }

    /// A bus with no listener.
    pub fn detached() -> Self {
        Self {
            tx: None,
            disconnected: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn emit(&self, event: ScanEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(event).is_err() && !self.disconnected.swap(true, Ordering::Relaxed) {
            debug!("event receiver dropped, discarding further events");
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, url: Option<&str>) {
        self.emit(ScanEvent::Log {
            level,
            message: message.into(),
            url: url.map(str::to_string),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::detached()
    }
}
