//! Outbound link extraction from rendered HTML.

use scraper::{Html, Selector};
use std::sync::OnceLock;
use url::Url;

fn link_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("a[href]").expect("static selector is valid"))
}

/// Absolute http(s) targets of every `<a href>` in `html`, resolved against `base`.
///
/// Hrefs that fail to resolve and non-web schemes (`mailto:`, `javascript:`,
/// `tel:`) are dropped.
pub fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);

    document
        .select(link_selector())
        .filter_map(|element| element.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .filter_map(|href| base.join(href).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .collect()
}
