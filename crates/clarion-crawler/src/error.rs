use clarion_browser::BrowserError;
use clarion_db::DatabaseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrawlError {
    /// A single page failed; the crawl carries on without it.
    #[error("page {url} failed: {source}")]
    Page {
        url: String,
        #[source]
        source: BrowserError,
    },

    #[error("scanner unavailable: {0}")]
    ScannerUnavailable(#[source] BrowserError),

    #[error("persistence error: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("invalid root URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The store stopped accepting pages for a job that was not cancelled.
    #[error("job stopped accepting pages: {0}")]
    Refused(String),
}

pub type Result<T> = std::result::Result<T, CrawlError>;
