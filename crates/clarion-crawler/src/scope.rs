//! URL scope rules for one crawl: root parsing, normalization, domain and depth.

use crate::error::{CrawlError, Result};
use url::Url;

/// Parse a submitted root URL. A bare host gets `https://`.
pub fn parse_root(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };

    let url = Url::parse(&candidate).map_err(|e| CrawlError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(CrawlError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(CrawlError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}

/// Visited-set key: fragment dropped, trailing slash stripped except on the
/// bare root. Scheme and host are already lowercased by the URL parser.
pub fn normalize(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        let trimmed = if trimmed.is_empty() { "/" } else { trimmed }.to_string();
        url.set_path(&trimmed);
    }

    url.to_string()
}

/// Host with any leading `www.` removed, lowercase.
pub fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    Some(match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    })
}

/// Whether `candidate` is on the same site as `root`, ignoring `www.`.
pub fn same_domain(root: &Url, candidate: &Url) -> bool {
    matches!(candidate.scheme(), "http" | "https")
        && host_key(root).is_some()
        && host_key(root) == host_key(candidate)
}

fn segment_count(url: &Url) -> u32 {
    let count = url
        .path_segments()
        .map_or(0, |segments| segments.filter(|s| !s.is_empty()).count());
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Link depth: path segments beyond the root's, plus one. The root is depth 1.
pub fn depth(root: &Url, candidate: &Url) -> u32 {
    segment_count(candidate)
        .saturating_sub(segment_count(root))
        .saturating_add(1)
}
