//! Schedule driver: finds due definitions and re-enqueues their template jobs.

use crate::error::Result;
use crate::jobs::{Frequency, ScheduleDefinition};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Months, Utc};
use clarion_core::{JobId, ScheduleId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Returns true if `next_run_at` is at or before `now`.
pub fn is_due(next_run_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    next_run_at <= now
}

/// Next run for `frequency`, measured from `now` rather than from the missed
/// target, so a delayed tick pushes every later run back by the same delay.
pub fn next_run_after(frequency: Frequency, now: DateTime<Utc>) -> DateTime<Utc> {
    match frequency {
        Frequency::Daily => now + Duration::days(1),
        Frequency::Weekly => now + Duration::days(7),
        // chrono clamps to the last day of a shorter month
        Frequency::Monthly => now
            .checked_add_months(Months::new(1))
            .unwrap_or_else(|| now + Duration::days(30)),
    }
}

/// Storage seam for schedule definitions.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Enabled definitions with `next_scheduled_run <= now`.
    async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleDefinition>>;

    /// Persist the next run and the time of this run.
    async fn record_run(
        &self,
        id: &ScheduleId,
        next_run: DateTime<Utc>,
        ran_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Submission seam: materializes a pending job from a template and admits it.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn submit_scheduled(&self, schedule: &ScheduleDefinition) -> Result<JobId>;
}

/// Outcome of one tick.
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    pub due: usize,
    pub enqueued: Vec<JobId>,
    pub failed: usize,
}

pub struct Scheduler {
    store: Arc<dyn ScheduleStore>,
    sink: Arc<dyn JobSink>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn ScheduleStore>, sink: Arc<dyn JobSink>) -> Self {
        Self { store, sink }
    }

    /// Process every definition due at `now`.
    ///
    /// A failure on one definition is logged and counted; the remaining
    /// definitions are still processed. The next run is persisted whether or
    /// not the job could be enqueued.
    ///
    /// # Errors
    /// Returns `SchedulerError::Store` only when the due definitions cannot be listed.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let due = self.store.due_schedules(now).await?;
        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        for schedule in due {
            let next_run = next_run_after(schedule.frequency, now);

            match self.sink.submit_scheduled(&schedule).await {
                Ok(job_id) => {
                    info!(
                        schedule_id = %schedule.id,
                        %job_id,
                        "Enqueued scheduled crawl of {}",
                        schedule.template.root_url
                    );
                    report.enqueued.push(job_id);
                }
                Err(e) => {
                    error!(schedule_id = %schedule.id, "Failed to enqueue scheduled crawl: {}", e);
                    report.failed += 1;
                }
            }

            if let Err(e) = self.store.record_run(&schedule.id, next_run, now).await {
                error!(schedule_id = %schedule.id, "Failed to persist next run: {}", e);
            }
        }

        Ok(report)
    }

    /// Run `tick` every `interval` until `shutdown` is cancelled.
    pub fn start(
        self: Arc<Self>,
        interval: std::time::Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        info!("Scheduler stopped");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                match self.tick(Utc::now()).await {
                    Ok(report) if report.due > 0 => info!(
                        "Scheduler tick: {} due, {} enqueued, {} failed",
                        report.due,
                        report.enqueued.len(),
                        report.failed
                    ),
                    Ok(_) => {}
                    Err(e) => error!("Scheduler tick failed: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;
    use crate::jobs::JobTemplate;
    use chrono::TimeZone;
    use clarion_core::{AuditStandard, CrawlBounds};
    use std::sync::Mutex;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    fn definition(frequency: Frequency, next_run: DateTime<Utc>, root_url: &str) -> ScheduleDefinition {
        ScheduleDefinition {
            id: ScheduleId::generate(),
            template: JobTemplate {
                root_url: root_url.to_string(),
                bounds: CrawlBounds::new(2, 20, 30).expect("valid bounds"),
                standard: AuditStandard::default(),
            },
            frequency,
            next_scheduled_run: next_run,
            last_run_at: None,
            origin_job_id: None,
            enabled: true,
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        schedules: Mutex<Vec<ScheduleDefinition>>,
    }

    #[async_trait]
    impl ScheduleStore for MemoryStore {
        async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleDefinition>> {
            Ok(self
                .schedules
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.enabled && is_due(s.next_scheduled_run, now))
                .cloned()
                .collect())
        }

        async fn record_run(
            &self,
            id: &ScheduleId,
            next_run: DateTime<Utc>,
            ran_at: DateTime<Utc>,
        ) -> Result<()> {
            let mut schedules = self.schedules.lock().unwrap();
            let schedule = schedules
                .iter_mut()
                .find(|s| &s.id == id)
                .ok_or_else(|| SchedulerError::Store(format!("schedule {id} not found")))?;
            schedule.next_scheduled_run = next_run;
            schedule.last_run_at = Some(ran_at);
            Ok(())
        }
    }

    /// Rejects templates whose root URL contains "broken".
    #[derive(Default)]
    struct RecordingSink {
        submitted: Mutex<Vec<JobTemplate>>,
    }

    #[async_trait]
    impl JobSink for RecordingSink {
        async fn submit_scheduled(&self, schedule: &ScheduleDefinition) -> Result<JobId> {
            if schedule.template.root_url.contains("broken") {
                return Err(SchedulerError::Submit("store unavailable".to_string()));
            }
            self.submitted.lock().unwrap().push(schedule.template.clone());
            Ok(JobId::generate())
        }
    }

    #[test]
    fn test_job_is_due_past_next_run() {
        let now = at("2026-02-17T12:00:00Z");
        assert!(is_due(at("2026-02-17T11:00:00Z"), now));
        assert!(is_due(now, now));
    }

    #[test]
    fn test_job_not_due_future_next_run() {
        let now = at("2026-02-17T12:00:00Z");
        assert!(!is_due(at("2026-02-17T13:00:00Z"), now));
    }

    #[test]
    fn test_next_run_daily_and_weekly() {
        let now = at("2026-02-17T12:30:00Z");
        assert_eq!(next_run_after(Frequency::Daily, now), at("2026-02-18T12:30:00Z"));
        assert_eq!(next_run_after(Frequency::Weekly, now), at("2026-02-24T12:30:00Z"));
    }

    #[test]
    fn test_next_run_monthly_clamps_to_month_end() {
        let now = Utc.with_ymd_and_hms(2026, 1, 31, 8, 0, 0).unwrap();
        assert_eq!(
            next_run_after(Frequency::Monthly, now),
            Utc.with_ymd_and_hms(2026, 2, 28, 8, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_weekly_tick_enqueues_template_and_advances_from_now() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        let schedule = definition(Frequency::Weekly, at("2026-03-01T00:00:00Z"), "https://example.com");
        let schedule_id = schedule.id;
        store.schedules.lock().unwrap().push(schedule.clone());

        let scheduler = Scheduler::new(store.clone(), sink.clone());
        let tick_at = at("2026-03-02T09:00:00Z");
        let report = scheduler.tick(tick_at).await.expect("tick");

        assert_eq!(report.due, 1);
        assert_eq!(report.enqueued.len(), 1);
        assert_eq!(sink.submitted.lock().unwrap()[0], schedule.template);

        let schedules = store.schedules.lock().unwrap();
        let updated = schedules.iter().find(|s| s.id == schedule_id).unwrap();
        // measured from the tick, not from the missed 2026-03-01 target
        assert_eq!(updated.next_scheduled_run, at("2026-03-09T09:00:00Z"));
        assert_eq!(updated.last_run_at, Some(tick_at));
    }

    #[tokio::test]
    async fn test_failed_definition_does_not_block_others() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        let due_at = at("2026-03-01T00:00:00Z");
        {
            let mut schedules = store.schedules.lock().unwrap();
            schedules.push(definition(Frequency::Daily, due_at, "https://broken.example"));
            schedules.push(definition(Frequency::Daily, due_at, "https://ok.example"));
        }

        let scheduler = Scheduler::new(store.clone(), sink.clone());
        let tick_at = at("2026-03-01T00:15:00Z");
        let report = scheduler.tick(tick_at).await.expect("tick");

        assert_eq!(report.due, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.enqueued.len(), 1);

        // both definitions advance, including the one that failed
        let schedules = store.schedules.lock().unwrap();
        assert!(schedules
            .iter()
            .all(|s| s.next_scheduled_run == at("2026-03-02T00:15:00Z")));
    }

    #[tokio::test]
    async fn test_not_due_and_disabled_are_skipped() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        {
            let mut schedules = store.schedules.lock().unwrap();
            schedules.push(definition(Frequency::Daily, at("2026-04-01T00:00:00Z"), "https://later.example"));
            let mut disabled = definition(Frequency::Daily, at("2026-01-01T00:00:00Z"), "https://off.example");
            disabled.enabled = false;
            schedules.push(disabled);
        }

        let scheduler = Scheduler::new(store, sink.clone());
        let report = scheduler.tick(at("2026-03-01T00:00:00Z")).await.expect("tick");

        assert_eq!(report.due, 0);
        assert!(sink.submitted.lock().unwrap().is_empty());
    }
}
