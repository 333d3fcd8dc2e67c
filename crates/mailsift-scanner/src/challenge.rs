//! Bot-challenge interstitial detection.

/// Title substrings that identify a challenge page, lower-case.
pub const TITLE_INDICATORS: &[&str] = &[
    "captcha",
    "robot",
    "verify you are human",
    "verification",
    "just a moment",
    "attention required",
    "cloudflare",
    "access denied",
    "security check",
];

/// URL substrings that identify a challenge redirect, lower-case.
pub const URL_INDICATORS: &[&str] = &["captcha", "challenge", "cdn-cgi/", "/sorry/"];

/// The first indicator found in the page title or final URL.
pub fn detect_challenge(title: &str, url: &str) -> Option<&'static str> {
    let title = title.to_lowercase();
    if let Some(hit) = TITLE_INDICATORS.iter().copied().find(|i| title.contains(i)) {
        return Some(hit);
    }
    let url = url.to_lowercase();
    URL_INDICATORS.iter().copied().find(|i| url.contains(i))
}
