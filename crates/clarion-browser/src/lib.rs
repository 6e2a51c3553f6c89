//! Page scanning for accessibility audits.
//!
//! A [`PageScanner`] opens one [`ScanSession`] per crawl; each scan navigates
//! to a page, collects its outbound links and runs the rule engine against
//! the audit standard the session was opened with.

pub mod audit;
pub mod chromium;
pub mod error;
pub mod links;
pub mod scanner;

pub use chromium::ChromiumScanner;
pub use clarion_core::{AffectedNode, AuditViolation};
pub use error::{BrowserError, Result};
pub use links::extract_links;
pub use scanner::{PageScan, PageScanner, ScanSession};
