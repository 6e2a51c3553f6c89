use crate::error::Result;
use async_trait::async_trait;
use clarion_core::{AuditStandard, AuditViolation};
use url::Url;

/// Result of scanning one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageScan {
    /// Absolute http(s) links found on the page, in document order
    pub links: Vec<Url>,
    /// Rule violations, one per failing rule
    pub violations: Vec<AuditViolation>,
}

/// Opens scanning sessions. One session serves one crawl.
#[async_trait]
pub trait PageScanner: Send + Sync {
    /// Start a session whose audits are scoped to `standard`.
    async fn open_session(&self, standard: AuditStandard) -> Result<Box<dyn ScanSession>>;
}

/// A live scanning session, e.g. one browser process.
#[async_trait]
pub trait ScanSession: Send {
    /// Navigate to `url`, extract links and run the audit.
    ///
    /// Implementations bound the scan by their own page timeout and release
    /// any per-page resources before returning, timed out or not.
    async fn scan(&mut self, url: &Url) -> Result<PageScan>;

    /// Release the session's resources.
    async fn close(self: Box<Self>) -> Result<()>;
}
