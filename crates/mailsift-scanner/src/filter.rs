//! Email text mining and filtering.
//!
//! [`EmailFilter::extract`] pulls every structural email match out of a blob of
//! text and runs it through the rejection rules in a fixed order: domain
//! filter, resource extensions, junk-prefix cleanup, bounce patterns, digit
//! runs, spam keywords, then the fake local-part denylist.

#![allow(clippy::must_use_candidate)]

use crate::error::{Result, ScanError};
use mailsift_core::{email_regex, EmailAddress};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, trace};

const FAKE_PREFIXES: &[&str] = &[
    "the", "2", "3", "4", "123", "20info", "aaa", "ab", "abc", "acc", "acc_kaz", "account",
    "accounts", "accueil", "ad", "adi", "adm", "an", "and", "available", "cc", "com", "domain",
    "domen", "email", "fb", "foi", "for", "found", "get", "here", "includes", "linkedin",
    "mailbox", "more", "my_name", "name", "need", "nfo", "ninfo", "now", "online", "post",
    "sales2", "test", "up", "we", "www", "xxx", "xxxxx", "username", "firstname.lastname",
    "your.name", "unsubscribe",
];

const SPAM_KEYWORDS: &[&str] = &[
    "nondelivery",
    "@linkedin.com",
    "@sentry",
    "@linkedhelper.com",
    "feedback",
    "notification",
];

const RESOURCE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".gif", ".css", ".webp", ".crx1", ".js"];

const CLEANUP_PREFIXES: &[&str] = &["x3|x2|u003|u0022", "sx_mrsp_", "3a"];

const BOUNCE_PATTERNS: &[&str] = &[r"(no|not)[-|_]*reply", r"mailer[-|_]*daemon", r"reply.+\d{5,}"];

const DIGIT_RUN_PATTERN: &str = r"\d{13,}";

/// Static filter configuration.
///
/// Serializable so a front end can show the denylist the engine applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRules {
    pub version: u32,
    /// Local-parts that are never real contacts
    pub fake_prefixes: Vec<String>,
    pub spam_keywords: Vec<String>,
    pub resource_extensions: Vec<String>,
    /// Prefix alternations stripped in order, each anchored at the start
    pub cleanup_prefixes: Vec<String>,
    pub bounce_patterns: Vec<String>,
    pub digit_run_pattern: String,
}

impl FilterRules {
    /// Revision of [`FilterRules::standard`]. Bump whenever the lists change.
    pub const VERSION: u32 = 1;

    pub fn standard() -> Self {
        let owned = |items: &[&str]| items.iter().map(ToString::to_string).collect();
        Self {
            version: Self::VERSION,
            fake_prefixes: owned(FAKE_PREFIXES),
            spam_keywords: owned(SPAM_KEYWORDS),
            resource_extensions: owned(RESOURCE_EXTENSIONS),
            cleanup_prefixes: owned(CLEANUP_PREFIXES),
            bounce_patterns: owned(BOUNCE_PATTERNS),
            digit_run_pattern: DIGIT_RUN_PATTERN.to_string(),
        }
    }
}

impl Default for FilterRules {
    fn default() -> Self {
        Self::standard()
    }
}

/// Why a candidate was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    DomainMismatch,
    ResourceExtension,
    InvalidAfterCleanup,
    BounceAddress,
    DigitRun,
    SpamKeyword,
    FakePrefix,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Rejection::DomainMismatch => "domain mismatch",
            Rejection::ResourceExtension => "resource file name",
            Rejection::InvalidAfterCleanup => "invalid after prefix cleanup",
            Rejection::BounceAddress => "no-reply or bounce address",
            Rejection::DigitRun => "too many consecutive digits",
            Rejection::SpamKeyword => "spam keyword",
            Rejection::FakePrefix => "fake local part",
        };
        f.write_str(reason)
    }
}

/// Compiled form of a [`FilterRules`] set.
#[derive(Debug, Clone)]
pub struct EmailFilter {
    rules: FilterRules,
    cleanup: Vec<Regex>,
    bounce: Vec<Regex>,
    digit_run: Regex,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| ScanError::InvalidFilterRule {
        pattern: pattern.to_string(),
        source,
    })
}

impl EmailFilter {
    pub fn new(rules: FilterRules) -> Result<Self> {
        let cleanup = rules
            .cleanup_prefixes
            .iter()
            .map(|p| compile(&format!("(?i)^(?:{p})")))
            .collect::<Result<Vec<_>>>()?;
        let bounce = rules
            .bounce_patterns
            .iter()
            .map(|p| compile(&format!("(?i){p}")))
            .collect::<Result<Vec<_>>>()?;
        let digit_run = compile(&rules.digit_run_pattern)?;

        Ok(Self {
            rules,
            cleanup,
            bounce,
            digit_run,
        })
    }

    /// Filter compiled from [`FilterRules::standard`].
    pub fn standard() -> Self {
        static STANDARD: OnceLock<EmailFilter> = OnceLock::new();
        STANDARD
            .get_or_init(|| {
                EmailFilter::new(FilterRules::standard()).expect("standard filter rules compile")
            })
            .clone()
    }

    pub fn rules(&self) -> &FilterRules {
        &self.rules
    }

    /// Extract every address in `text` that survives the rules.
    ///
    /// When `domain` is given, only candidates containing it are kept.
    pub fn extract(&self, text: &str, domain: Option<&str>) -> BTreeSet<EmailAddress> {
        let mut accepted = BTreeSet::new();
        if text.is_empty() {
            return accepted;
        }

        let text = text.replace("\\n", " ");
        let mut filtered = 0usize;

        for found in email_regex().find_iter(&text) {
            let candidate = found.as_str().trim().to_lowercase();
            if accepted.iter().any(|e: &EmailAddress| e.as_str() == candidate) {
                continue;
            }

            match self.classify(&candidate, domain) {
                Ok(email) => {
                    trace!("keeping email {}", email);
                    accepted.insert(email);
                }
                Err(reason) => {
                    debug!("filtered email {} ({})", candidate, reason);
                    filtered += 1;
                }
            }
        }

        if filtered > 0 {
            debug!("filtered {} candidates, kept {}", filtered, accepted.len());
        }
        accepted
    }

    /// Run one lower-cased candidate through every rule.
    pub fn classify(
        &self,
        candidate: &str,
        domain: Option<&str>,
    ) -> std::result::Result<EmailAddress, Rejection> {
        if let Some(domain) = domain {
            if !candidate.contains(domain) {
                return Err(Rejection::DomainMismatch);
            }
        }

        if self.is_resource_name(candidate) {
            return Err(Rejection::ResourceExtension);
        }

        let mut cleaned = candidate.to_string();
        for prefix in &self.cleanup {
            if let Some(m) = prefix.find(&cleaned) {
                cleaned = cleaned[m.end()..].to_string();
            }
        }
        let email = match EmailAddress::parse(&cleaned) {
            Ok(email) => email,
            Err(_) => return Err(Rejection::InvalidAfterCleanup),
        };
        let value = email.as_str();

        if self.bounce.iter().any(|re| re.is_match(value)) {
            return Err(Rejection::BounceAddress);
        }
        if self.digit_run.is_match(value) {
            return Err(Rejection::DigitRun);
        }
        if self.rules.spam_keywords.iter().any(|k| value.contains(k.as_str())) {
            return Err(Rejection::SpamKeyword);
        }
        let local = email.local_part();
        if self.rules.fake_prefixes.iter().any(|p| p == local) {
            return Err(Rejection::FakePrefix);
        }

        Ok(email)
    }

    // Also catches asset names used as local-parts, e.g. `logo.png@2x.cdn.net`
    fn is_resource_name(&self, candidate: &str) -> bool {
        let local = candidate.split('@').next().unwrap_or(candidate);
        self.rules
            .resource_extensions
            .iter()
            .any(|ext| candidate.ends_with(ext.as_str()) || local.ends_with(ext.as_str()))
    }
}

impl Default for EmailFilter {
    fn default() -> Self {
        Self::standard()
    }
}

/// Extract with the standard rules.
pub fn extract_emails(text: &str, domain: Option<&str>) -> BTreeSet<EmailAddress> {
    EmailFilter::standard().extract(text, domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(set: &BTreeSet<EmailAddress>) -> Vec<&str> {
        set.iter().map(EmailAddress::as_str).collect()
    }

    #[test]
    fn test_contact_paragraph() {
        let text = "<p>Contact us: SALES@Example.COM or noreply@example.com. Logo: img@cdn.example.com.png</p>";
        let found = extract_emails(text, None);
        assert_eq!(addresses(&found), vec!["sales@example.com"]);
    }

    #[test]
    fn test_extract_is_idempotent() {
        let text = "info@acme.io, Support@Acme.io, x3hello@acme.io, test@acme.io, press@acme.io";
        let first = extract_emails(text, None);
        let second = extract_emails(text, None);
        assert_eq!(first, second);
        assert_eq!(
            addresses(&first),
            vec!["hello@acme.io", "info@acme.io", "press@acme.io", "support@acme.io"]
        );
    }

    #[test]
    fn test_every_fake_prefix_is_rejected() {
        let filter = EmailFilter::standard();
        for prefix in FAKE_PREFIXES {
            let candidate = format!("{prefix}@acme.com");
            assert_eq!(
                filter.classify(&candidate, None),
                Err(Rejection::FakePrefix),
                "{candidate} should be rejected"
            );
        }
    }

    #[test]
    fn test_non_denylisted_prefixes_are_kept() {
        let filter = EmailFilter::standard();
        for prefix in ["sales", "support", "s", "b", "contact", "the.team", "tests", "info2"] {
            let candidate = format!("{prefix}@acme.com");
            assert!(filter.classify(&candidate, None).is_ok(), "{candidate} should be kept");
        }
    }

    #[test]
    fn test_domain_filter() {
        let text = "a.b@acme.com hello@other.org team@mail.acme.com";
        let found = extract_emails(text, Some("acme.com"));
        assert_eq!(addresses(&found), vec!["a.b@acme.com", "team@mail.acme.com"]);
    }

    #[test]
    fn test_resource_extensions() {
        let filter = EmailFilter::standard();
        for candidate in [
            "icon@2x.png",
            "sprite@site.jpg",
            "anim@site.gif",
            "theme@site.css",
            "hero@site.webp",
            "ext@site.crx1",
            "bundle@site.js",
            "logo.png@cdn.example.com",
        ] {
            assert_eq!(
                filter.classify(candidate, None),
                Err(Rejection::ResourceExtension),
                "{candidate}"
            );
        }
    }

    #[test]
    fn test_case_insensitive_dedup() {
        let found = extract_emails("Jane@Acme.com jane@acme.com JANE@ACME.COM", None);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_prefix_cleanup() {
        let filter = EmailFilter::standard();
        assert_eq!(
            filter.classify("u003csales@acme.com", None).map(|e| e.to_string()),
            Ok("csales@acme.com".to_string())
        );
        assert_eq!(
            filter.classify("sx_mrsp_owner@acme.com", None).map(|e| e.to_string()),
            Ok("owner@acme.com".to_string())
        );
        assert_eq!(
            filter.classify("x23ajobs@acme.com", None).map(|e| e.to_string()),
            Ok("jobs@acme.com".to_string())
        );
    }

    #[test]
    fn test_bounce_and_digit_rules() {
        let filter = EmailFilter::standard();
        assert_eq!(filter.classify("no-reply@acme.com", None), Err(Rejection::BounceAddress));
        assert_eq!(filter.classify("do_not_reply@acme.com", None), Err(Rejection::BounceAddress));
        assert_eq!(filter.classify("mailer-daemon@acme.com", None), Err(Rejection::BounceAddress));
        assert_eq!(filter.classify("reply-123456@acme.com", None), Err(Rejection::BounceAddress));
        assert_eq!(filter.classify("u1234567890123@acme.com", None), Err(Rejection::DigitRun));
        assert!(filter.classify("reply@acme.com", None).is_ok());
    }

    #[test]
    fn test_spam_keywords() {
        let filter = EmailFilter::standard();
        for candidate in [
            "nondelivery@acme.com",
            "jobs@linkedin.com",
            "abc123@sentry.io",
            "me@linkedhelper.com",
            "feedback@acme.com",
            "notifications@acme.com",
        ] {
            assert_eq!(filter.classify(candidate, None), Err(Rejection::SpamKeyword), "{candidate}");
        }
    }

    #[test]
    fn test_escaped_newlines_are_separators() {
        let found = extract_emails(r"call\nsales@acme.com\nnow", None);
        assert_eq!(addresses(&found), vec!["sales@acme.com"]);
    }

    #[test]
    fn test_empty_text() {
        assert!(extract_emails("", None).is_empty());
        assert!(extract_emails("no addresses here", None).is_empty());
    }

    #[test]
    fn test_custom_rules() {
        let mut rules = FilterRules::standard();
        rules.fake_prefixes.push("info".to_string());
        let filter = EmailFilter::new(rules).expect("valid rules");
        assert_eq!(filter.classify("info@acme.com", None), Err(Rejection::FakePrefix));
    }

    #[test]
    fn test_invalid_rule_pattern() {
        let mut rules = FilterRules::standard();
        rules.bounce_patterns.push("(unclosed".to_string());
        assert!(matches!(
            EmailFilter::new(rules),
            Err(ScanError::InvalidFilterRule { .. })
        ));
    }

    #[test]
    fn test_rules_serialize_with_version() {
        let json = serde_json::to_value(FilterRules::standard()).expect("serialize rules");
        assert_eq!(json["version"], FilterRules::VERSION);
        assert!(json["fake_prefixes"]
            .as_array()
            .is_some_and(|list| list.iter().any(|p| p == "unsubscribe")));
    }
}
