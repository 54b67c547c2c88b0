//! Media URL patterns for embed pages.
//!
//! Embed pages hide the real stream behind player setup code such as
//! `file: "https://cdn/x/index.m3u8"` or `source = '//cdn/x.mp4'`. The
//! patterns run in order: typed adaptive assignments, typed progressive
//! assignments, then any quoted or bare URL with a media extension.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::stream::descriptor::{ExtractedStream, MediaType};

const ASSIGNMENT_KEYS: &str =
    r"(?:file|source|src|hls|hlsUrl|stream|streamUrl|videoUrl|video_url|playlist|url)";

static PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    let adaptive = format!(
        r#"(?i){ASSIGNMENT_KEYS}["']?\s*[:=]\s*["']([^"'\s]+?\.m3u8(?:\?[^"'\s]*)?)["']"#
    );
    let progressive = format!(
        r#"(?i){ASSIGNMENT_KEYS}["']?\s*[:=]\s*["']([^"'\s]+?\.(?:mp4|webm|m4v|mov|mkv|flv|ogv)(?:\?[^"'\s]*)?)["']"#
    );
    let fallback =
        r#"(?i)((?:https?:)?//[^\s"'<>()\\]+?\.(?:m3u8|mp4|webm|m4v|mov|mkv|flv|ogv)(?:\?[^\s"'<>()\\]*)?)"#;

    [adaptive.as_str(), progressive.as_str(), fallback]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

/// Scan page text for a playable media URL.
///
/// Prefers the first adaptive URL found, then the first progressive one,
/// then whatever matched first.
#[must_use]
pub fn scan_page(body: &str, page_url: &str) -> Option<ExtractedStream> {
    // JSON blobs inside pages escape slashes
    let text = body.replace("\\/", "/");
    let base = Url::parse(page_url).ok();

    let candidates: Vec<ExtractedStream> = PATTERNS
        .iter()
        .flat_map(|pattern| pattern.captures_iter(&text))
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| normalize(m.as_str(), base.as_ref()))
        .map(ExtractedStream::new)
        .collect();

    let first_of = |wanted: MediaType| candidates.iter().find(|c| c.media_type == wanted);

    first_of(MediaType::Adaptive)
        .or_else(|| first_of(MediaType::Progressive))
        .or_else(|| candidates.first())
        .cloned()
}

/// Resolve a matched URL against the embed page. Scheme-relative URLs take
/// the page's scheme; path-relative URLs are joined onto the page URL.
#[must_use]
pub fn normalize(raw: &str, base: Option<&Url>) -> Option<String> {
    let raw = raw.trim().replace("&amp;", "&");
    let lower = raw.to_ascii_lowercase();
    if raw.is_empty()
        || lower.starts_with("data:")
        || lower.starts_with("blob:")
        || lower.starts_with("javascript:")
    {
        return None;
    }

    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Url::parse(&raw).ok().map(String::from);
    }

    if let Some(rest) = raw.strip_prefix("//") {
        let scheme = base.map_or("https", Url::scheme);
        return Url::parse(&format!("{scheme}://{rest}")).ok().map(String::from);
    }

    base?.join(&raw).ok().map(String::from)
}
