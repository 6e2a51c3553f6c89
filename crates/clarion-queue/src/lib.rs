//! Clarion Queue - Admission control for crawl jobs.
//!
//! [`QueueManager`] keeps a dense FIFO backlog of pending jobs in the
//! database and runs at most `max_concurrent` of them at once through a
//! [`JobRunner`]. It also owns cancellation, recovery of jobs that stopped
//! making progress, and the submission boundary used by callers and by the
//! scheduler.
//!
//! # Example
//!
//! ```rust,ignore
//! use clarion_queue::{QueueManager, SubmitRequest};
//!
//! let queue = QueueManager::start(db, Arc::new(engine), &config.queue);
//! let job_id = queue.submit(request).await?;
//! println!("position {:?}", queue.position(&job_id).await?);
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod error;
pub mod manager;
pub mod runner;

pub use error::{QueueError, Result};
pub use manager::{QueueManager, SubmitRequest};
pub use runner::JobRunner;
