//! Shared types used across the Clarion workspace.
//!
//! This module defines the identifiers, status enums and bounded crawl
//! parameters that every other crate agrees on.

use crate::error::ClarionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a crawl job (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new random `JobId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ClarionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|source| ClarionError::InvalidId {
                kind: "job",
                value: s.to_string(),
                source,
            })
    }
}

/// Identifier of a recurring schedule definition (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(Uuid);

impl ScheduleId {
    /// Create a new random `ScheduleId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ScheduleId {
    type Err = ClarionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|source| ClarionError::InvalidId {
                kind: "schedule",
                value: s.to_string(),
                source,
            })
    }
}

/// Lifecycle status of a crawl job.
///
/// Transitions only move forward: `Pending -> Queued -> InProgress` and then
/// into one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet admitted to the backlog
    Pending,
    /// Waiting in the backlog for a free slot
    Queued,
    /// A crawl is running for this job
    InProgress,
    /// Crawl finished normally
    Completed,
    /// Crawl aborted by an unrecoverable error or stuck-job recovery
    Failed,
    /// Cancelled by a caller
    Cancelled,
}

impl JobStatus {
    /// Database/wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ClarionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ClarionError::UnknownVariant {
                kind: "job status",
                value: other.to_string(),
            }),
        }
    }
}

/// Status of a backlog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting for dispatch; carries a dense position
    Queued,
    /// Dispatched to a crawl engine
    Processing,
    /// Crawl ended normally or was cancelled
    Completed,
    /// Crawl failed
    Failed,
}

impl EntryStatus {
    /// Database/wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = ClarionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ClarionError::UnknownVariant {
                kind: "queue entry status",
                value: other.to_string(),
            }),
        }
    }
}

/// Accessibility severity classification of a rule violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    /// Blocks access for some users
    Critical,
    /// Severely degrades access
    Serious,
    /// Noticeable barrier
    Moderate,
    /// Annoyance
    Minor,
}

impl ImpactLevel {
    /// All levels, most severe first.
    pub const ALL: [ImpactLevel; 4] = [
        ImpactLevel::Critical,
        ImpactLevel::Serious,
        ImpactLevel::Moderate,
        ImpactLevel::Minor,
    ];

    /// Score deduction weight per affected node.
    #[must_use]
    pub fn weight(&self) -> u64 {
        match self {
            Self::Critical => 5,
            Self::Serious => 3,
            Self::Moderate => 2,
            Self::Minor => 1,
        }
    }

    /// Database/wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Serious => "serious",
            Self::Moderate => "moderate",
            Self::Minor => "minor",
        }
    }

    /// Parse a rule engine impact string; missing or unknown impacts count as minor.
    #[must_use]
    pub fn parse_lenient(s: Option<&str>) -> Self {
        s.and_then(|s| s.parse().ok()).unwrap_or(Self::Minor)
    }
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImpactLevel {
    type Err = ClarionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "serious" => Ok(Self::Serious),
            "moderate" => Ok(Self::Moderate),
            "minor" => Ok(Self::Minor),
            other => Err(ClarionError::UnknownVariant {
                kind: "impact level",
                value: other.to_string(),
            }),
        }
    }
}

/// Node-level violation counts per impact level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactCounts {
    /// Critical nodes
    pub critical: u64,
    /// Serious nodes
    pub serious: u64,
    /// Moderate nodes
    pub moderate: u64,
    /// Minor nodes
    pub minor: u64,
}

impl ImpactCounts {
    /// Add `n` nodes at the given level.
    pub fn add(&mut self, level: ImpactLevel, n: u64) {
        match level {
            ImpactLevel::Critical => self.critical += n,
            ImpactLevel::Serious => self.serious += n,
            ImpactLevel::Moderate => self.moderate += n,
            ImpactLevel::Minor => self.minor += n,
        }
    }

    /// Count at the given level.
    #[must_use]
    pub fn get(&self, level: ImpactLevel) -> u64 {
        match level {
            ImpactLevel::Critical => self.critical,
            ImpactLevel::Serious => self.serious,
            ImpactLevel::Moderate => self.moderate,
            ImpactLevel::Minor => self.minor,
        }
    }

    /// Total nodes across all levels.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.critical + self.serious + self.moderate + self.minor
    }

    /// Weighted sum of all counts.
    #[must_use]
    pub fn weighted_sum(&self) -> u64 {
        ImpactLevel::ALL
            .iter()
            .map(|level| self.get(*level) * level.weight())
            .sum()
    }
}

/// DOM node a rule fired against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedNode {
    /// Outer HTML snippet of the node
    pub html: String,
    /// CSS selector path identifying the node
    pub target: Vec<String>,
    /// Rule engine's failure summary
    pub summary: Option<String>,
}

/// One audit rule firing on one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditViolation {
    /// Severity of the violation
    pub impact: ImpactLevel,
    /// Rule identifier, e.g. `color-contrast`
    pub rule_id: String,
    /// Human-readable rule description
    pub help: String,
    /// Nodes the rule fired against
    pub nodes: Vec<AffectedNode>,
}

impl AuditViolation {
    /// Node-level impact counts for a set of violations.
    #[must_use]
    pub fn impact_counts(violations: &[AuditViolation]) -> ImpactCounts {
        let mut counts = ImpactCounts::default();
        for violation in violations {
            counts.add(violation.impact, violation.nodes.len() as u64);
        }
        counts
    }
}

/// WCAG version an audit is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WcagVersion {
    /// WCAG 2.0
    #[serde(rename = "2.0")]
    V2_0,
    /// WCAG 2.1
    #[serde(rename = "2.1")]
    V2_1,
    /// WCAG 2.2
    #[serde(rename = "2.2")]
    V2_2,
}

impl WcagVersion {
    /// Database/wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V2_0 => "2.0",
            Self::V2_1 => "2.1",
            Self::V2_2 => "2.2",
        }
    }

    fn tag_prefixes(self) -> &'static [&'static str] {
        match self {
            Self::V2_0 => &["wcag2"],
            Self::V2_1 => &["wcag2", "wcag21"],
            Self::V2_2 => &["wcag2", "wcag21", "wcag22"],
        }
    }
}

impl FromStr for WcagVersion {
    type Err = ClarionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2.0" => Ok(Self::V2_0),
            "2.1" => Ok(Self::V2_1),
            "2.2" => Ok(Self::V2_2),
            other => Err(ClarionError::UnknownVariant {
                kind: "WCAG version",
                value: other.to_string(),
            }),
        }
    }
}

/// WCAG conformance level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConformanceLevel {
    /// Level A
    A,
    /// Level AA
    AA,
    /// Level AAA
    AAA,
}

impl ConformanceLevel {
    /// Database/wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::AA => "AA",
            Self::AAA => "AAA",
        }
    }

    fn tag_suffixes(self) -> &'static [&'static str] {
        match self {
            Self::A => &["a"],
            Self::AA => &["a", "aa"],
            Self::AAA => &["a", "aa", "aaa"],
        }
    }
}

impl FromStr for ConformanceLevel {
    type Err = ClarionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "AA" => Ok(Self::AA),
            "AAA" => Ok(Self::AAA),
            other => Err(ClarionError::UnknownVariant {
                kind: "conformance level",
                value: other.to_string(),
            }),
        }
    }
}

/// Accessibility standard an audit is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditStandard {
    /// WCAG version
    pub version: WcagVersion,
    /// Conformance level
    pub level: ConformanceLevel,
}

impl AuditStandard {
    /// Rule engine tags covering this standard, e.g. 2.1 AA gives
    /// `wcag2a, wcag2aa, wcag21a, wcag21aa`.
    #[must_use]
    pub fn rule_tags(&self) -> Vec<String> {
        self.version
            .tag_prefixes()
            .iter()
            .flat_map(|prefix| {
                self.level
                    .tag_suffixes()
                    .iter()
                    .map(move |suffix| format!("{prefix}{suffix}"))
            })
            .collect()
    }
}

impl Default for AuditStandard {
    fn default() -> Self {
        Self {
            version: WcagVersion::V2_1,
            level: ConformanceLevel::AA,
        }
    }
}

impl fmt::Display for AuditStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WCAG {} {}", self.version.as_str(), self.level.as_str())
    }
}

/// Depth, page and rate limits of one crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlBounds {
    /// Maximum link depth, root is depth 1 (1-5)
    pub depth_limit: u32,
    /// Maximum pages to scan (1-1000)
    pub page_limit: u32,
    /// Pages per minute (1-60)
    pub crawl_rate: u32,
}

impl CrawlBounds {
    /// Allowed range for `depth_limit`.
    pub const DEPTH_RANGE: std::ops::RangeInclusive<u32> = 1..=5;
    /// Allowed range for `page_limit`.
    pub const PAGE_RANGE: std::ops::RangeInclusive<u32> = 1..=1000;
    /// Allowed range for `crawl_rate`.
    pub const RATE_RANGE: std::ops::RangeInclusive<u32> = 1..=60;

    /// Create bounds, validating every field.
    pub fn new(depth_limit: u32, page_limit: u32, crawl_rate: u32) -> Result<Self, ClarionError> {
        let bounds = Self {
            depth_limit,
            page_limit,
            crawl_rate,
        };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), ClarionError> {
        check_range("depth_limit", self.depth_limit, &Self::DEPTH_RANGE)?;
        check_range("page_limit", self.page_limit, &Self::PAGE_RANGE)?;
        check_range("crawl_rate", self.crawl_rate, &Self::RATE_RANGE)
    }

    /// Delay between consecutive page scans.
    #[must_use]
    pub fn page_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(60.0 / f64::from(self.crawl_rate.max(1)))
    }
}

fn check_range(
    field: &'static str,
    value: u32,
    range: &std::ops::RangeInclusive<u32>,
) -> Result<(), ClarionError> {
    if range.contains(&value) {
        return Ok(());
    }
    Err(ClarionError::OutOfRange {
        field,
        value,
        min: *range.start(),
        max: *range.end(),
    })
}
