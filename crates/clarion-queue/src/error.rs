use clarion_core::JobId;
use clarion_db::DatabaseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("persistence error: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("crawl job {0} not found")]
    NotFound(JobId),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid submission: {0}")]
    Validation(String),

    #[error("queue manager is shut down")]
    ShutDown,
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        Self::Persistence(DatabaseError::from(e))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
