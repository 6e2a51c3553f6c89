use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("schedule store error: {0}")]
    Store(String),

    #[error("failed to submit scheduled job: {0}")]
    Submit(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
