//! English-variant link matching.

use mailsift_browser::Anchor;

/// Whether a URL already points at an English variant.
pub fn is_english_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    path.contains("/en/") || path.ends_with("/en")
}

/// Whether an anchor looks like a switch to the English version of the page.
///
/// Path-based matches are only considered when `current_url` is not already
/// under `/en/`.
pub fn is_english_link(anchor: &Anchor, current_url: &str) -> bool {
    let text = anchor.text.trim().to_lowercase();
    if text == "english" || text == "en" || text.contains("english version") {
        return true;
    }

    if anchor.title.to_lowercase().contains("english")
        || anchor.aria_label.to_lowercase().contains("english")
    {
        return true;
    }

    let href = anchor.href.to_lowercase();
    (href.contains("/en/") || href.ends_with("/en")) && !current_url.to_lowercase().contains("/en/")
}
