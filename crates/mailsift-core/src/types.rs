//! Shared types used across the Mailsift workspace.
//!
//! This module defines the newtypes and enums that every crate speaks:
//! validated email addresses, proxy endpoints and the per-URL failure taxonomy.

use crate::error::MailsiftError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Structural email grammar: `local-part @ domain-labels . tld`.
///
/// Matching is case-insensitive and word-bounded. The TLD is 2-63 letters.
pub const EMAIL_PATTERN: &str = r"(?i)\b[a-z\d-][_a-z\d+-]*(?:\.[_a-z\d+-]*)*@[a-z\d]+[a-z\d-]*(?:\.[a-z\d-]+)*(?:\.[a-z]{2,63})\b";

/// Shared compiled form of [`EMAIL_PATTERN`].
#[must_use]
pub fn email_regex() -> &'static Regex {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    EMAIL_REGEX.get_or_init(|| Regex::new(EMAIL_PATTERN).expect("valid regex"))
}

/// A normalized (lower-cased, trimmed) email address.
///
/// Two addresses that differ only in case compare equal because the value is
/// normalized on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Parse and normalize an email address.
    ///
    /// # Errors
    /// Returns error if the trimmed value is not entirely one grammar match.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, MailsiftError> {
        let normalized = raw.as_ref().trim().to_lowercase();

        let whole_match = email_regex()
            .find(&normalized)
            .is_some_and(|m| m.start() == 0 && m.end() == normalized.len());

        if whole_match {
            Ok(Self(normalized))
        } else {
            Err(MailsiftError::InvalidEmail(raw.as_ref().to_string()))
        }
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before the `@`.
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.0.split_once('@').map_or(self.0.as_str(), |(local, _)| local)
    }

    /// The part after the `@`.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.split_once('@').map_or("", |(_, domain)| domain)
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = MailsiftError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<EmailAddress> for String {
    fn from(email: EmailAddress) -> Self {
        email.0
    }
}

/// Username/password pair for an authenticated proxy.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCredentials {
    /// Proxy username
    pub username: String,
    /// Proxy password
    pub password: String,
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An egress proxy a rendering session can be routed through.
///
/// Read-only once constructed; health tracking lives in the proxy pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    /// Proxy server URL, e.g. `http://10.0.0.1:8080`
    pub server: String,
    /// Optional credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<ProxyCredentials>,
}

impl ProxyEndpoint {
    /// Create an endpoint without credentials.
    #[must_use]
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            credentials: None,
        }
    }

    /// Attach credentials to the endpoint.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(ProxyCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.server)
    }
}

/// Why a URL ended without a successful extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Every navigation attempt exceeded its timeout
    NavigationTimeout,
    /// A bot-detection interstitial was served and could not be bypassed
    BotChallengeDetected,
    /// No proxy could be obtained or opened for an escalation
    ProxyAcquisitionFailure,
    /// The rendering session failed (navigation error, script error, closed page)
    RenderingSessionError,
    /// The batch was stopped while this URL was in flight
    UserStopped,
    /// Anything else, including panics inside an attempt
    UnknownExtractionError,
}

impl FailureKind {
    /// Get a human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::NavigationTimeout => "page load timed out",
            Self::BotChallengeDetected => "bot challenge detected",
            Self::ProxyAcquisitionFailure => "no usable proxy",
            Self::RenderingSessionError => "rendering session error",
            Self::UserStopped => "stopped by user",
            Self::UnknownExtractionError => "unknown extraction error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Identifier for one batch run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(String);

impl BatchId {
    /// Create a new random `BatchId` using UUID v4.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_parse_normalizes() {
        let email = EmailAddress::parse("  Sales@Example.COM ").expect("valid email");
        assert_eq!(email.as_str(), "sales@example.com");
        assert_eq!(email.local_part(), "sales");
        assert_eq!(email.domain(), "example.com");
    }

    #[test]
    fn test_email_parse_invalid() {
        let invalid = vec![
            "not-an-email",
            "missing@tld",
            "two@@example.com",
            "spaces in@example.com",
            "trailing@example.c",
            "",
        ];

        for raw in invalid {
            assert!(EmailAddress::parse(raw).is_err(), "Should fail for: {raw}");
        }
    }

    #[test]
    fn test_email_case_insensitive_equality() {
        let a = EmailAddress::parse("Info@Acme.com").expect("valid email");
        let b = EmailAddress::parse("info@ACME.COM").expect("valid email");
        assert_eq!(a, b);
    }

    #[test]
    fn test_email_serde_roundtrip_validates() {
        let json = serde_json::to_string(&EmailAddress::parse("a.b@c.io").expect("valid email"))
            .expect("serialize email");
        assert_eq!(json, "\"a.b@c.io\"");

        let bad: Result<EmailAddress, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let endpoint = ProxyEndpoint::new("http://proxy.local:8080").with_credentials("user", "hunter2");
        let debug = format!("{endpoint:?}");
        assert!(debug.contains("user"));
        assert!(!debug.contains("hunter2"));
        assert_eq!(endpoint.to_string(), "http://proxy.local:8080");
    }

    #[test]
    fn test_failure_kind_serialization() {
        let json = serde_json::to_string(&FailureKind::BotChallengeDetected).expect("serialize kind");
        assert_eq!(json, "\"bot_challenge_detected\"");
        assert_eq!(FailureKind::NavigationTimeout.to_string(), "page load timed out");
    }

    #[test]
    fn test_batch_id_generate() {
        assert_ne!(BatchId::generate(), BatchId::generate());
    }
}
