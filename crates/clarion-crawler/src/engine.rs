//! Breadth-first crawl of one job.
//!
//! The engine owns a fresh [`Frontier`] per run and one scanning session. It
//! visits pages depth-ascending under the job's depth, page and domain
//! bounds, sleeps `60 / crawl_rate` seconds after every navigation attempt
//! and checks the cancellation token before every page and during every
//! sleep. The session is closed on every exit path.

use crate::aggregator::Aggregator;
use crate::error::{CrawlError, Result};
use crate::frontier::Frontier;
use crate::scope::{depth, normalize, parse_root, same_domain};
use clarion_browser::{PageScanner, ScanSession};
use clarion_core::JobStatus;
use clarion_db::{crawl_jobs, CrawlJob, Database};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Sessions enforce the page timeout themselves and clean up after it; this
/// only bounds a session that does not return at all.
const SCAN_GRACE: Duration = Duration::from_secs(5);

/// How a crawl that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    /// Frontier exhausted or page limit reached
    Completed,
    /// Cancellation was observed
    Cancelled,
}

impl TerminalStatus {
    /// Job status this outcome maps to.
    pub fn job_status(self) -> JobStatus {
        match self {
            Self::Completed => JobStatus::Completed,
            Self::Cancelled => JobStatus::Cancelled,
        }
    }
}

pub struct CrawlEngine {
    scanner: Arc<dyn PageScanner>,
    aggregator: Aggregator,
    db: Database,
    page_timeout: Duration,
}

impl CrawlEngine {
    pub fn new(scanner: Arc<dyn PageScanner>, db: Database, page_timeout: Duration) -> Self {
        Self {
            scanner,
            aggregator: Aggregator::new(db.clone()),
            db,
            page_timeout,
        }
    }

    /// Crawl `job`, which must already be `in_progress`.
    ///
    /// # Errors
    /// `ScannerUnavailable` if no session could be opened, `InvalidUrl` for
    /// an unusable root, `Persistence`/`Refused` when results can no longer
    /// be stored. Individual page failures are logged and skipped.
    pub async fn run(&self, job: &CrawlJob, cancel: CancellationToken) -> Result<TerminalStatus> {
        let root = parse_root(&job.root_url)?;
        if cancel.is_cancelled() {
            return Ok(TerminalStatus::Cancelled);
        }

        let mut session = self
            .scanner
            .open_session(job.standard)
            .await
            .map_err(CrawlError::ScannerUnavailable)?;

        info!(job_id = %job.id, "Crawling {} ({})", root, job.standard);

        let outcome = self.crawl(job, root, session.as_mut(), &cancel).await;

        if let Err(e) = session.close().await {
            warn!(job_id = %job.id, "Failed to close scan session: {}", e);
        }

        match &outcome {
            Ok(status) => info!(job_id = %job.id, "Crawl ended: {:?}", status),
            Err(e) => warn!(job_id = %job.id, "Crawl aborted: {}", e),
        }
        outcome
    }

    async fn crawl(
        &self,
        job: &CrawlJob,
        root: Url,
        session: &mut dyn ScanSession,
        cancel: &CancellationToken,
    ) -> Result<TerminalStatus> {
        let page_limit = job.bounds.page_limit;
        let interval = job.bounds.page_interval();
        let mut pages_scanned = job.pages_scanned;
        let mut frontier = Frontier::seeded(root.clone());

        while pages_scanned < page_limit {
            if cancel.is_cancelled() {
                return Ok(TerminalStatus::Cancelled);
            }

            let Some((url, page_depth)) = frontier.next_unvisited() else {
                break;
            };
            if !same_domain(&root, &url) {
                continue;
            }

            debug!(job_id = %job.id, depth = page_depth, "Scanning {}", url);

            match tokio::time::timeout(self.page_timeout + SCAN_GRACE, session.scan(&url)).await {
                Ok(Ok(scan)) => {
                    let recorded = self
                        .aggregator
                        .record_page(&job.id, url.as_str(), &scan.violations)
                        .await?;

                    let Some(record) = recorded else {
                        return self.refused(job, cancel).await;
                    };
                    pages_scanned = record.pages_scanned;

                    let candidates: Vec<(Url, u32)> = scan
                        .links
                        .into_iter()
                        .filter(|link| same_domain(&root, link))
                        .map(|link| {
                            let link_depth = depth(&root, &link);
                            (link, link_depth)
                        })
                        .filter(|(_, link_depth)| *link_depth <= job.bounds.depth_limit)
                        .collect();

                    let budget = usize::try_from(page_limit.saturating_sub(pages_scanned))
                        .unwrap_or(usize::MAX);
                    let admitted = frontier.admit(candidates, budget);
                    debug!(
                        job_id = %job.id,
                        admitted,
                        "Page {} done ({}/{})",
                        normalize(&url),
                        pages_scanned,
                        page_limit
                    );
                }
                Ok(Err(source)) => {
                    let err = CrawlError::Page {
                        url: url.to_string(),
                        source,
                    };
                    warn!(job_id = %job.id, "{}", err);
                    self.heartbeat(job).await;
                }
                Err(_) => {
                    warn!(
                        job_id = %job.id,
                        "Scan of {} did not return within {:?}",
                        url,
                        self.page_timeout + SCAN_GRACE
                    );
                    self.heartbeat(job).await;
                }
            }

            if pages_scanned < page_limit && frontier.has_pending() {
                tokio::select! {
                    () = cancel.cancelled() => return Ok(TerminalStatus::Cancelled),
                    () = tokio::time::sleep(interval) => {}
                }
            }
        }

        if cancel.is_cancelled() {
            Ok(TerminalStatus::Cancelled)
        } else {
            Ok(TerminalStatus::Completed)
        }
    }

    async fn heartbeat(&self, job: &CrawlJob) {
        if let Err(e) = crawl_jobs::touch(self.db.pool(), &job.id).await {
            warn!(job_id = %job.id, "Failed to record heartbeat: {}", e);
        }
    }

    async fn refused(&self, job: &CrawlJob, cancel: &CancellationToken) -> Result<TerminalStatus> {
        if cancel.is_cancelled() {
            return Ok(TerminalStatus::Cancelled);
        }

        let current = crawl_jobs::get(self.db.pool(), &job.id).await?;
        match current.status {
            JobStatus::Cancelled => Ok(TerminalStatus::Cancelled),
            JobStatus::InProgress if current.pages_scanned >= current.bounds.page_limit => {
                Ok(TerminalStatus::Completed)
            }
            status => Err(CrawlError::Refused(format!(
                "job {} is {status} with {} of {} pages",
                job.id, current.pages_scanned, current.bounds.page_limit
            ))),
        }
    }
}
