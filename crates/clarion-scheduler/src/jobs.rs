//! Schedule definition types.

use chrono::{DateTime, Utc};
use clarion_core::{AuditStandard, ClarionError, CrawlBounds, JobId, ScheduleId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = ClarionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(ClarionError::UnknownVariant {
                kind: "schedule frequency",
                value: other.to_string(),
            }),
        }
    }
}

/// Parameters copied into every job materialized from a schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobTemplate {
    pub root_url: String,
    pub bounds: CrawlBounds,
    pub standard: AuditStandard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub id: ScheduleId,
    pub template: JobTemplate,
    pub frequency: Frequency,
    pub next_scheduled_run: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    /// Job the schedule was created from
    pub origin_job_id: Option<JobId>,
    pub enabled: bool,
}
