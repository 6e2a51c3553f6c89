//! Headless Chromium adapter.
//!
//! Every session launches its own browser process, so crawls never share
//! cookies, caches or a crashed renderer.

use crate::audit::{parse_violations, run_expression};
use crate::error::{BrowserError, Result};
use crate::links::extract_links;
use crate::scanner::{PageScan, PageScanner, ScanSession};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as LaunchConfig};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use clarion_core::{AuditStandard, BrowserConfig};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

/// Scanner backed by a local Chrome/Chromium install and an axe-core build.
#[derive(Debug, Clone)]
pub struct ChromiumScanner {
    config: BrowserConfig,
    request_timeout: Duration,
}

impl ChromiumScanner {
    pub fn new(config: BrowserConfig, request_timeout: Duration) -> Self {
        Self {
            config,
            request_timeout,
        }
    }

    async fn load_axe_script(&self) -> Result<Arc<String>> {
        let path = self.config.axe_script_path.as_ref().ok_or_else(|| {
            BrowserError::Script("no axe-core script configured (browser.axe_script_path)".to_string())
        })?;

        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BrowserError::Script(format!("{}: {e}", path.display())))?;
        Ok(Arc::new(source))
    }

    fn launch_config(&self) -> Result<LaunchConfig> {
        let mut builder = LaunchConfig::builder()
            .no_sandbox()
            .request_timeout(self.request_timeout)
            .window_size(self.config.window_width, self.config.window_height)
            .arg(format!("--user-agent={}", self.config.user_agent))
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--mute-audio");

        if let Some(executable) = &self.config.chrome_executable {
            builder = builder.chrome_executable(executable);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }

        builder.build().map_err(BrowserError::ChromiumError)
    }
}

#[async_trait]
impl PageScanner for ChromiumScanner {
    async fn open_session(&self, standard: AuditStandard) -> Result<Box<dyn ScanSession>> {
        let axe_script = self.load_axe_script().await?;
        let config = self.launch_config()?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::trace!("Browser handler event error: {}", e);
                }
            }
        });

        tracing::debug!("Launched browser session for {}", standard);

        Ok(Box::new(ChromiumSession {
            browser,
            handler_task,
            axe_script,
            run_expression: run_expression(&standard),
            page_timeout: self.request_timeout,
        }))
    }
}

struct ChromiumSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    axe_script: Arc<String>,
    run_expression: String,
    page_timeout: Duration,
}

const TAB_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Run `work` until `deadline`, then run `cleanup` whatever the outcome.
async fn until_deadline<T>(
    deadline: Instant,
    url: &Url,
    work: impl Future<Output = Result<T>>,
    cleanup: impl Future<Output = ()>,
) -> Result<T> {
    let result = tokio::time::timeout_at(deadline, work)
        .await
        .unwrap_or_else(|_| Err(BrowserError::Timeout(url.to_string())));
    cleanup.await;
    result
}

impl ChromiumSession {
    async fn audit(&self, page: &chromiumoxide::Page, url: &Url) -> Result<PageScan> {
        page.goto(url.as_str())
            .await
            .map_err(|e| BrowserError::NavigationError(format!("{url}: {e}")))?;

        let html = page
            .content()
            .await
            .map_err(|e| BrowserError::ChromiumError(format!("reading {url}: {e}")))?;

        // redirects change the base that relative links resolve against
        let base = page
            .url()
            .await
            .ok()
            .flatten()
            .and_then(|landed| Url::parse(&landed).ok())
            .unwrap_or_else(|| url.clone());
        let links = extract_links(&html, &base);

        page.evaluate(self.axe_script.as_str())
            .await
            .map_err(|e| BrowserError::Script(format!("injecting axe-core into {url}: {e}")))?;

        let params = EvaluateParams::builder()
            .expression(self.run_expression.clone())
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(BrowserError::Audit)?;

        let value: serde_json::Value = page
            .evaluate(params)
            .await
            .map_err(|e| BrowserError::Audit(format!("running axe on {url}: {e}")))?
            .into_value()
            .map_err(|e| BrowserError::Audit(format!("decoding axe result for {url}: {e}")))?;

        Ok(PageScan {
            links,
            violations: parse_violations(value)?,
        })
    }
}

#[async_trait]
impl ScanSession for ChromiumSession {
    async fn scan(&mut self, url: &Url) -> Result<PageScan> {
        let deadline = Instant::now() + self.page_timeout;

        // open blank and navigate inside the deadline so a slow page never
        // leaves a tab we have no handle to
        let page = tokio::time::timeout_at(deadline, self.browser.new_page("about:blank"))
            .await
            .map_err(|_| BrowserError::Timeout(format!("opening a tab for {url}")))?
            .map_err(|e| BrowserError::ChromiumError(format!("opening a tab for {url}: {e}")))?;

        let close_tab = async {
            match tokio::time::timeout(TAB_CLOSE_TIMEOUT, page.clone().close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("Failed to close tab for {}: {}", url, e),
                Err(_) => tracing::debug!("Closing tab for {} timed out", url),
            }
        };

        until_deadline(deadline, url, self.audit(&page, url), close_tab).await
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        let closed = self
            .browser
            .close()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()));
        if let Err(e) = self.browser.wait().await {
            tracing::debug!("Browser process did not exit cleanly: {}", e);
        }
        self.handler_task.abort();

        tracing::debug!("Browser session closed");
        closed.map(|_| ())
    }
}
