//! Clarion Crawler - Breadth-first site crawling and score aggregation.
//!
//! [`CrawlEngine::run`] drives one job from its root URL through a per-run
//! [`Frontier`], handing every scanned page to the [`Aggregator`], which
//! updates the job's counters and running score in one guarded transaction.
//!
//! # Example
//!
//! ```rust,ignore
//! use clarion_crawler::CrawlEngine;
//! use tokio_util::sync::CancellationToken;
//!
//! let engine = CrawlEngine::new(scanner, db, Duration::from_secs(30));
//! let status = engine.run(&job, CancellationToken::new()).await?;
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod aggregator;
pub mod engine;
pub mod error;
pub mod frontier;
pub mod scope;

pub use aggregator::{page_deduction, page_score, Aggregator, PageRecord};
pub use engine::{CrawlEngine, TerminalStatus};
pub use error::{CrawlError, Result};
pub use frontier::Frontier;
