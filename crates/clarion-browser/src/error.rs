use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium error: {0}")]
    ChromiumError(String),

    #[error("navigation failed: {0}")]
    NavigationError(String),

    #[error("audit failed: {0}")]
    Audit(String),

    #[error("audit script unavailable: {0}")]
    Script(String),

    #[error("page timed out: {0}")]
    Timeout(String),
}
