//! Pause/stop signalling shared between the dispatcher and in-flight workers.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Snapshot of the batch control flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlState {
    /// Dispatch of new URLs is held back
    pub paused: bool,
    /// No new URLs are dispatched and in-flight URLs end early
    pub stopped: bool,
}

/// Cloneable handle over a `watch` cell holding [`ControlState`].
///
/// Stop is sticky and clears pause, so a paused dispatcher wakes up and
/// drains instead of waiting forever.
#[derive(Debug, Clone)]
pub struct BatchControl {
    state: Arc<watch::Sender<ControlState>>,
}

impl BatchControl {
    /// Create a handle in the running state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ControlState::default());
        Self {
            state: Arc::new(tx),
        }
    }

    /// Hold back dispatch. Ignored once stopped.
    pub fn pause(&self) {
        let changed = self.state.send_if_modified(|s| {
            let changed = !s.stopped && !s.paused;
            if changed {
                s.paused = true;
            }
            changed
        });
        if changed {
            info!("extraction paused");
        }
    }

    /// Release a pause.
    pub fn resume(&self) {
        let changed = self.state.send_if_modified(|s| std::mem::replace(&mut s.paused, false));
        if changed {
            info!("extraction resumed");
        }
    }

    /// Request a stop. Sticky until [`reset`](Self::reset).
    pub fn stop(&self) {
        let changed = self.state.send_if_modified(|s| {
            let changed = !s.stopped;
            s.stopped = true;
            s.paused = false;
            changed
        });
        if changed {
            info!("extraction stopped");
        }
    }

    /// Clear both flags for a fresh batch.
    pub fn reset(&self) {
        self.state.send_replace(ControlState::default());
    }

    /// Current flags.
    pub fn state(&self) -> ControlState {
        *self.state.borrow()
    }

    /// Whether dispatch is paused.
    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    /// Whether stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.state().stopped
    }

    /// Wait while paused. Returns `false` if the batch was stopped.
    pub async fn wait_until_runnable(&self) -> bool {
        let mut rx = self.state.subscribe();
        rx.wait_for(|s| s.stopped || !s.paused)
            .await
            .is_ok_and(|state| !state.stopped)
    }

    /// Resolves once stop has been requested.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|s| s.stopped).await;
    }
}

impl Default for BatchControl {
    fn default() -> Self {
        Self::new()
    }
}
