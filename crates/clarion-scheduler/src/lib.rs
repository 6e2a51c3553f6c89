pub mod error;
pub mod jobs;
pub mod scheduler;

pub use error::{Result, SchedulerError};
pub use jobs::{Frequency, JobTemplate, ScheduleDefinition};
pub use scheduler::{is_due, next_run_after, JobSink, ScheduleStore, Scheduler, TickReport};
