//! Proxy endpoint pool with failure tracking.

use mailsift_core::{ProxyConfig, ProxyEndpoint};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct PoolState {
    failed: HashSet<String>,
    cursor: usize,
}

/// Snapshot of pool health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProxyStats {
    pub total: usize,
    pub available: usize,
    pub failed: usize,
    pub enabled: bool,
}

/// Shared pool of proxy endpoints.
///
/// Endpoints that fail are excluded from selection until every endpoint has
/// failed, at which point the failed set is cleared and selection starts over.
#[derive(Debug)]
pub struct ProxyPool {
    endpoints: Vec<ProxyEndpoint>,
    enabled: bool,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    /// Build a pool. Endpoints repeating an earlier server are dropped, so the
    /// first (for example a credentialed override) wins.
    pub fn new(endpoints: Vec<ProxyEndpoint>) -> Self {
        let mut seen = HashSet::new();
        let endpoints: Vec<ProxyEndpoint> = endpoints
            .into_iter()
            .filter(|e| {
                let fresh = seen.insert(e.server.clone());
                if !fresh {
                    debug!("dropping duplicate proxy {}", e.server);
                }
                fresh
            })
            .collect();
        Self {
            endpoints,
            enabled: true,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// A pool that never hands out an endpoint.
    pub fn disabled() -> Self {
        Self {
            endpoints: Vec::new(),
            enabled: false,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        if config.fallback_enabled {
            Self::new(config.endpoints.clone())
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Random endpoint among those not marked failed.
    pub fn select_random(&self) -> Option<ProxyEndpoint> {
        if !self.is_enabled() {
            return None;
        }
        let mut state = self.lock();
        self.replenish(&mut state);

        let candidates: Vec<&ProxyEndpoint> = self
            .endpoints
            .iter()
            .filter(|e| !state.failed.contains(&e.server))
            .collect();
        let chosen = candidates.choose(&mut rand::thread_rng()).map(|e| (*e).clone());

        if let Some(endpoint) = &chosen {
            debug!("selected proxy {} ({} available)", endpoint, candidates.len());
        }
        chosen
    }

    /// Next non-failed endpoint in round-robin order.
    pub fn select_next(&self) -> Option<ProxyEndpoint> {
        if !self.is_enabled() {
            return None;
        }
        let mut state = self.lock();
        self.replenish(&mut state);

        let total = self.endpoints.len();
        for offset in 0..total {
            let idx = (state.cursor + offset) % total;
            let endpoint = &self.endpoints[idx];
            if !state.failed.contains(&endpoint.server) {
                state.cursor = (idx + 1) % total;
                debug!("selected proxy {} (round robin)", endpoint);
                return Some(endpoint.clone());
            }
        }
        None
    }

    /// Exclude an endpoint from selection. Unknown servers are ignored.
    pub fn mark_failed(&self, server: &str) {
        if !self.endpoints.iter().any(|e| e.server == server) {
            debug!("ignoring failure report for unknown proxy {}", server);
            return;
        }
        let mut state = self.lock();
        if state.failed.insert(server.to_string()) {
            warn!(
                "marked proxy {} as failed ({}/{} failed)",
                server,
                state.failed.len(),
                self.endpoints.len()
            );
        }
    }

    pub fn reset_failed(&self) {
        let mut state = self.lock();
        let cleared = state.failed.len();
        state.failed.clear();
        info!("reset {} failed proxies", cleared);
    }

    pub fn stats(&self) -> ProxyStats {
        let state = self.lock();
        let failed = state.failed.len();
        ProxyStats {
            total: self.endpoints.len(),
            available: self.endpoints.len() - failed,
            failed,
            enabled: self.enabled,
        }
    }

    fn replenish(&self, state: &mut PoolState) {
        if !self.endpoints.is_empty() && state.failed.len() >= self.endpoints.len() {
            warn!("all {} proxies failed, resetting pool", self.endpoints.len());
            state.failed.clear();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
