use async_trait::async_trait;
use clarion_crawler::{CrawlEngine, CrawlError, TerminalStatus};
use clarion_db::CrawlJob;
use tokio_util::sync::CancellationToken;

/// Executes one dispatched job to its end.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(
        &self,
        job: CrawlJob,
        cancel: CancellationToken,
    ) -> Result<TerminalStatus, CrawlError>;
}

#[async_trait]
impl JobRunner for CrawlEngine {
    async fn run(
        &self,
        job: CrawlJob,
        cancel: CancellationToken,
    ) -> Result<TerminalStatus, CrawlError> {
        CrawlEngine::run(self, &job, cancel).await
    }
}
