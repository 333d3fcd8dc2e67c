//! Configuration management for Mailsift.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides. Read once at startup, never mutated
//! by the engine afterwards.

use crate::error::{ConfigError, ConfigResult};
use crate::types::ProxyEndpoint;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration.
///
/// This is loaded from `~/.config/mailsift/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Batch scheduling and retry settings
    pub scanning: ScanningConfig,
    /// Browser automation settings
    pub browser: BrowserConfig,
    /// Proxy fallback settings
    pub proxy: ProxyConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file.
    ///
    /// Unlike [`AppConfig::load`], a missing file is an error here.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            });
        }

        tracing::debug!("Loading config from {}", path.display());
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `MAILSIFT_HEADLESS`: Override browser headless mode (true/false)
    /// - `MAILSIFT_MAX_CONCURRENCY`: Override the concurrent URL limit
    /// - `MAILSIFT_NAVIGATION_TIMEOUT_SECS`: Override the per-navigation timeout
    /// - `MAILSIFT_PROXY_FALLBACK`: Override proxy fallback (true/false)
    /// - `PROXY_SERVER`, `PROXY_USERNAME`, `PROXY_PASSWORD`: Prepend a proxy endpoint
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment overrides on top of the current values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MAILSIFT_HEADLESS") {
            if let Ok(headless) = val.parse() {
                self.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Ok(val) = std::env::var("MAILSIFT_MAX_CONCURRENCY") {
            if let Ok(limit) = val.parse() {
                self.scanning.max_concurrency = limit;
                tracing::debug!("Override scanning.max_concurrency from env: {}", limit);
            }
        }

        if let Ok(val) = std::env::var("MAILSIFT_NAVIGATION_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.browser.navigation_timeout_secs = secs;
                tracing::debug!("Override browser.navigation_timeout_secs from env: {}", secs);
            }
        }

        if let Ok(val) = std::env::var("MAILSIFT_PROXY_FALLBACK") {
            if let Ok(enabled) = val.parse() {
                self.proxy.fallback_enabled = enabled;
                tracing::debug!("Override proxy.fallback_enabled from env: {}", enabled);
            }
        }

        if let Ok(server) = std::env::var("PROXY_SERVER") {
            let mut endpoint = ProxyEndpoint::new(server);
            if let (Ok(username), Ok(password)) =
                (std::env::var("PROXY_USERNAME"), std::env::var("PROXY_PASSWORD"))
            {
                endpoint = endpoint.with_credentials(username, password);
            }
            tracing::debug!("Prepending proxy endpoint from env: {}", endpoint);
            self.proxy.endpoints.insert(0, endpoint);
        }
    }

    /// Check values the engine cannot run with.
    ///
    /// # Errors
    /// Returns `InvalidValue` for the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scanning.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scanning.max_concurrency".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.scanning.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scanning.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.browser.navigation_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "browser.navigation_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if let Some(bad) = self.proxy.endpoints.iter().find(|p| p.server.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "proxy.endpoints".to_string(),
                reason: format!("empty server in endpoint {bad:?}"),
            });
        }

        Ok(())
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/mailsift/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "mailsift", "mailsift").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

/// Batch scheduling and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanningConfig {
    /// Maximum number of URLs extracted concurrently
    pub max_concurrency: u32,
    /// Attempts per URL, including a proxy escalation
    pub max_attempts: u32,
    /// Wait before retrying a timed-out navigation, in milliseconds
    pub retry_delay_ms: u64,
    /// Pause after load for deferred scripts, in milliseconds
    pub settle_delay_ms: u64,
    /// Wait before re-reading a page that yielded no emails, in milliseconds
    pub empty_retry_delay_ms: u64,
    /// Pause after loading the English variant, in milliseconds
    pub secondary_settle_delay_ms: u64,
    /// Whether to follow a discovered English-language variant
    pub follow_english_variant: bool,
}

impl ScanningConfig {
    /// Retry delay as a `Duration`.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Settle delay as a `Duration`.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Empty-result retry delay as a `Duration`.
    #[must_use]
    pub fn empty_retry_delay(&self) -> Duration {
        Duration::from_millis(self.empty_retry_delay_ms)
    }

    /// Secondary settle delay as a `Duration`.
    #[must_use]
    pub fn secondary_settle_delay(&self) -> Duration {
        Duration::from_millis(self.secondary_settle_delay_ms)
    }
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            max_attempts: 2,
            retry_delay_ms: 3000,
            settle_delay_ms: 3000,
            empty_retry_delay_ms: 2000,
            secondary_settle_delay_ms: 2000,
            follow_english_variant: true,
        }
    }
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
    /// Navigation timeout in seconds
    pub navigation_timeout_secs: u64,
    /// Navigation timeout for the English-variant hop in seconds
    pub secondary_navigation_timeout_secs: u64,
    /// Best-effort network quiescence wait in seconds
    pub quiescence_timeout_secs: u64,
    /// Grace period for closing sessions and browsers in seconds
    pub close_grace_secs: u64,
    /// Accept-Language / navigator locale
    pub locale: String,
}

impl BrowserConfig {
    /// Navigation timeout as a `Duration`.
    #[must_use]
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    /// Secondary navigation timeout as a `Duration`.
    #[must_use]
    pub fn secondary_navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.secondary_navigation_timeout_secs)
    }

    /// Quiescence timeout as a `Duration`.
    #[must_use]
    pub fn quiescence_timeout(&self) -> Duration {
        Duration::from_secs(self.quiescence_timeout_secs)
    }

    /// Close grace period as a `Duration`.
    #[must_use]
    pub fn close_grace(&self) -> Duration {
        Duration::from_secs(self.close_grace_secs)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            navigation_timeout_secs: 60,
            secondary_navigation_timeout_secs: 45,
            quiescence_timeout_secs: 10,
            close_grace_secs: 5,
            locale: "en-US".to_string(),
        }
    }
}

/// Proxy fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Escalate to a proxied session when a bot challenge is detected
    pub fallback_enabled: bool,
    /// Proxy endpoints available for escalation
    pub endpoints: Vec<ProxyEndpoint>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        // Public free proxies; unreliable, replace for production use.
        let endpoints = [
            "http://38.252.213.67:999",
            "http://199.217.99.123:2525",
            "http://195.158.8.123:3128",
            "http://35.209.198.222:80",
            "http://156.38.112.11:80",
            "http://185.99.70.146:8080",
            "http://154.65.39.7:80",
            "http://138.124.49.149:10808",
            "http://35.197.89.213:80",
            "http://162.240.19.30:80",
            "http://210.223.44.230:3128",
        ]
        .into_iter()
        .map(ProxyEndpoint::new)
        .collect();

        Self {
            fallback_enabled: true,
            endpoints,
        }
    }
}
