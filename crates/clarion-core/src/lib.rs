//! Clarion Core - Foundation crate for the Clarion crawl orchestrator.
//!
//! This crate provides shared types, error handling and configuration
//! management that all other Clarion crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared identifiers and enums (`JobId`, `JobStatus`, `ImpactLevel`, `CrawlBounds`)
//!
//! # Example
//!
//! ```rust
//! use clarion_core::{AppConfig, CrawlBounds};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! let bounds = CrawlBounds::new(2, 50, 30)?;
//! assert_eq!(config.queue.max_concurrent, 3);
//! assert_eq!(bounds.page_interval().as_secs(), 2);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, BrowserConfig, CrawlConfig, DatabaseConfig, QueueConfig, SchedulerConfig,
};
pub use error::{ClarionError, ConfigError, ConfigResult, Result};
pub use types::{
    AffectedNode, AuditStandard, AuditViolation, ConformanceLevel, CrawlBounds, EntryStatus, ImpactCounts, ImpactLevel, JobId,
    JobStatus, ScheduleId, WcagVersion,
};
