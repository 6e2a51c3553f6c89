//! Admission control and dispatch.
//!
//! One supervisor task owns the live crawls in a `JoinSet`. It dispatches
//! whenever it is woken (admission, completion, recovery) and on a fallback
//! poll tick, and it is the only place a finished run releases its slot.

use crate::error::{QueueError, Result};
use crate::runner::JobRunner;
use async_trait::async_trait;
use chrono::Utc;
use clarion_core::{AuditStandard, CrawlBounds, EntryStatus, JobId, JobStatus, QueueConfig};
use clarion_crawler::{scope::parse_root, CrawlError, TerminalStatus};
use clarion_db::{
    crawl_jobs, queue_entries, schedules, violations, CrawlJob, Database, NewCrawlJob, QueueEntry,
    ViolationRecord,
};
use clarion_scheduler::{next_run_after, Frequency, JobSink, JobTemplate, ScheduleDefinition, SchedulerError};
use sqlx::{Sqlite, Transaction};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

const NON_TERMINAL: [JobStatus; 3] = [JobStatus::Pending, JobStatus::Queued, JobStatus::InProgress];

type RunOutcome = std::result::Result<std::result::Result<TerminalStatus, CrawlError>, JoinError>;

/// A new crawl as submitted by a caller.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub root_url: String,
    pub bounds: CrawlBounds,
    pub standard: AuditStandard,
    /// Also create a recurring schedule from this job
    pub schedule: Option<Frequency>,
}

struct ActiveRun {
    cancel: CancellationToken,
    abort: AbortHandle,
}

struct Inner {
    db: Database,
    runner: Arc<dyn JobRunner>,
    max_concurrent: usize,
    dispatch_poll: Duration,
    active: Mutex<HashMap<JobId, ActiveRun>>,
    wake: Notify,
    shutdown: CancellationToken,
}

/// Handle to the queue. Clones share one supervisor.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
    supervisor: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl QueueManager {
    /// Start the supervisor. Must be called inside a tokio runtime.
    pub fn start(db: Database, runner: Arc<dyn JobRunner>, config: &QueueConfig) -> Self {
        let inner = Arc::new(Inner::new(db, runner, config));

        let supervisor = tokio::spawn(Arc::clone(&inner).supervise());
        info!(max_concurrent = inner.max_concurrent, "Queue manager started");

        Self {
            inner,
            supervisor: Arc::new(Mutex::new(Some(supervisor))),
        }
    }

    /// Admit a pending job to the backlog.
    ///
    /// Returns the existing entry if the job is already queued or running.
    /// Any other failure marks the job failed before it is returned.
    pub async fn add_job(&self, job_id: &JobId) -> Result<QueueEntry> {
        self.inner.ensure_running()?;

        match self.inner.admit(job_id).await {
            Ok(entry) => {
                self.inner.kick();
                Ok(entry)
            }
            Err(QueueError::Persistence(e)) if e.is_unique_violation() => {
                // lost a race with a concurrent admission of the same job
                queue_entries::live_for_job(self.inner.db.pool(), job_id)
                    .await?
                    .ok_or(QueueError::Persistence(e))
            }
            Err(e @ QueueError::NotFound(_)) => Err(e),
            Err(e) => {
                self.inner
                    .fail_admission(job_id, &[JobStatus::Pending, JobStatus::Queued], &e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    /// Cancel a job that has not finished yet.
    ///
    /// A queued job leaves the backlog immediately; a running one is asked to
    /// stop and keeps its slot until its crawl returns.
    pub async fn cancel(&self, job_id: &JobId) -> Result<bool> {
        let mut tx = self.inner.begin().await?;

        if !crawl_jobs::transition(&mut *tx, job_id, &NON_TERMINAL, JobStatus::Cancelled).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(entry) = queue_entries::live_for_job(&mut *tx, job_id).await? {
            if entry.status == EntryStatus::Queued {
                queue_entries::delete(&mut *tx, &entry.id).await?;
                queue_entries::compact_after(&mut *tx, entry.position).await?;
            }
        }
        tx.commit().await?;

        if let Some(run) = self.inner.lock_active().get(job_id) {
            run.cancel.cancel();
        }

        info!(%job_id, "Job cancelled");
        self.inner.kick();
        Ok(true)
    }

    /// Fail running jobs that have not written anything for `stale_after`.
    ///
    /// Their live runs stop counting against capacity right away and are
    /// cancelled and aborted.
    pub async fn recover_stuck(&self, stale_after: Duration) -> Result<usize> {
        self.inner.recover_stuck(stale_after).await
    }

    /// Drop tracked runs whose job is no longer `in_progress`.
    pub async fn reset_capacity_accounting(&self) -> Result<usize> {
        let tracked: Vec<JobId> = self.inner.lock_active().keys().copied().collect();
        let mut dropped = 0;

        for job_id in tracked {
            let Some(job) = crawl_jobs::find(self.inner.db.pool(), &job_id).await? else {
                if self.inner.lock_active().remove(&job_id).is_some() {
                    dropped += 1;
                }
                continue;
            };
            if job.status == JobStatus::InProgress {
                continue;
            }

            let Some(run) = self.inner.lock_active().remove(&job_id) else {
                continue;
            };
            run.cancel.cancel();
            let entry_status = if job.status == JobStatus::Failed {
                EntryStatus::Failed
            } else {
                EntryStatus::Completed
            };
            queue_entries::finish_for_job(self.inner.db.pool(), &job_id, entry_status).await?;
            warn!(%job_id, "Dropped {} job from capacity accounting", job.status);
            dropped += 1;
        }

        self.inner.kick();
        Ok(dropped)
    }

    /// Backlog position of a queued job.
    pub async fn position(&self, job_id: &JobId) -> Result<Option<i64>> {
        Ok(queue_entries::position_of(self.inner.db.pool(), job_id).await?)
    }

    /// Validate, store and admit a new crawl.
    pub async fn submit(&self, request: SubmitRequest) -> Result<JobId> {
        self.inner.ensure_running()?;

        let root = parse_root(&request.root_url).map_err(|e| QueueError::Validation(e.to_string()))?;
        request
            .bounds
            .validate()
            .map_err(|e| QueueError::Validation(e.to_string()))?;

        let job = crawl_jobs::create(
            self.inner.db.pool(),
            NewCrawlJob {
                root_url: root.to_string(),
                bounds: request.bounds,
                standard: request.standard,
                schedule_id: None,
            },
        )
        .await?;

        if let Some(frequency) = request.schedule {
            let template = JobTemplate {
                root_url: job.root_url.clone(),
                bounds: job.bounds,
                standard: job.standard,
            };
            let next_run = next_run_after(frequency, Utc::now());
            schedules::create(self.inner.db.pool(), template, frequency, next_run, Some(job.id))
                .await?;
        }

        self.add_job(&job.id).await?;
        Ok(job.id)
    }

    /// Materialize a pending job from a schedule definition and admit it.
    pub async fn submit_from_schedule(&self, schedule: &ScheduleDefinition) -> Result<JobId> {
        self.inner.ensure_running()?;

        let job = crawl_jobs::create(
            self.inner.db.pool(),
            NewCrawlJob {
                root_url: schedule.template.root_url.clone(),
                bounds: schedule.template.bounds,
                standard: schedule.template.standard,
                schedule_id: Some(schedule.id),
            },
        )
        .await?;

        self.add_job(&job.id).await?;
        Ok(job.id)
    }

    pub async fn status(&self, job_id: &JobId) -> Result<CrawlJob> {
        crawl_jobs::find(self.inner.db.pool(), job_id)
            .await?
            .ok_or(QueueError::NotFound(*job_id))
    }

    /// Running entries first, then the backlog in dispatch order.
    pub async fn queue_snapshot(&self) -> Result<Vec<QueueEntry>> {
        Ok(queue_entries::snapshot(self.inner.db.pool()).await?)
    }

    pub async fn violations(&self, job_id: &JobId) -> Result<Vec<ViolationRecord>> {
        Ok(violations::list_for_job(self.inner.db.pool(), job_id).await?)
    }

    /// Number of runs the supervisor is tracking.
    pub fn live_runs(&self) -> usize {
        self.inner.lock_active().len()
    }

    /// Run stuck-job recovery every `interval` until shutdown.
    pub fn spawn_maintenance(&self, interval: Duration, stale_after: Duration) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match inner.recover_stuck(stale_after).await {
                    Ok(0) => {}
                    Ok(n) => warn!("Recovered {} stuck jobs", n),
                    Err(e) => error!("Stuck-job recovery failed: {}", e),
                }
            }
            debug!("Queue maintenance stopped");
        })
    }

    /// Cancel every live run, wait for them to finish and stop the supervisor.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Queue supervisor ended abnormally: {}", e);
            }
        }
        info!("Queue manager stopped");
    }
}

#[async_trait]
impl JobSink for QueueManager {
    async fn submit_scheduled(&self, schedule: &ScheduleDefinition) -> clarion_scheduler::Result<JobId> {
        self.submit_from_schedule(schedule)
            .await
            .map_err(|e| SchedulerError::Submit(e.to_string()))
    }
}

impl Inner {
    fn new(db: Database, runner: Arc<dyn JobRunner>, config: &QueueConfig) -> Self {
        Self {
            db,
            runner,
            max_concurrent: config.max_concurrent.max(1),
            dispatch_poll: Duration::from_secs(config.dispatch_poll_secs.max(1)),
            active: Mutex::new(HashMap::new()),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn kick(&self) {
        self.wake.notify_one();
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            Err(QueueError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, ActiveRun>> {
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.db.begin_write().await?)
    }

    async fn admit(&self, job_id: &JobId) -> Result<QueueEntry> {
        let mut tx = self.begin().await?;

        let Some(job) = crawl_jobs::find(&mut *tx, job_id).await? else {
            return Err(QueueError::NotFound(*job_id));
        };

        if let Some(entry) = queue_entries::live_for_job(&mut *tx, job_id).await? {
            tx.commit().await?;
            debug!(%job_id, "Job already has a {} backlog entry", entry.status);
            return Ok(entry);
        }

        if job.status != JobStatus::Pending {
            return Err(QueueError::InvalidState(format!(
                "job {job_id} is {}, only pending jobs can be queued",
                job.status
            )));
        }

        let entry = queue_entries::insert_at_tail(&mut *tx, job_id).await?;
        if !crawl_jobs::transition(&mut *tx, job_id, &[JobStatus::Pending], JobStatus::Queued).await? {
            return Err(QueueError::InvalidState(format!("job {job_id} left pending during admission")));
        }
        tx.commit().await?;

        info!(%job_id, position = entry.position, "Job queued");
        Ok(entry)
    }

    async fn supervise(self: Arc<Self>) {
        let mut runs: JoinSet<(JobId, RunOutcome)> = JoinSet::new();
        let mut poll = tokio::time::interval(self.dispatch_poll);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.dispatch(&mut runs).await;

            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = self.wake.notified() => {}
                _ = poll.tick() => {}
                Some(joined) = runs.join_next(), if !runs.is_empty() => {
                    self.finish(joined).await;
                }
            }
        }

        self.drain(&mut runs).await;
        debug!("Queue supervisor stopped");
    }

    /// Wait for live runs after shutdown; their tokens are children of `shutdown`.
    async fn drain(&self, runs: &mut JoinSet<(JobId, RunOutcome)>) {
        if tokio::time::timeout(SHUTDOWN_GRACE, self.finish_all(runs)).await.is_ok() {
            return;
        }

        warn!("{} crawls ignored cancellation, aborting them", runs.len());
        for run in self.lock_active().values() {
            run.abort.abort();
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, self.finish_all(runs)).await.is_err() {
            // only runs already dropped from accounting are left
            runs.abort_all();
        }
    }

    async fn finish_all(&self, runs: &mut JoinSet<(JobId, RunOutcome)>) {
        while let Some(joined) = runs.join_next().await {
            self.finish(joined).await;
        }
    }

    async fn running(&self) -> Result<usize> {
        let in_store = crawl_jobs::count_with_status(self.db.pool(), JobStatus::InProgress).await?;
        let in_store = usize::try_from(in_store).unwrap_or(usize::MAX);
        Ok(in_store.max(self.lock_active().len()))
    }

    async fn dispatch(&self, runs: &mut JoinSet<(JobId, RunOutcome)>) {
        while !self.shutdown.is_cancelled() {
            match self.running().await {
                Ok(running) if running >= self.max_concurrent => return,
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to count running jobs: {}", e);
                    return;
                }
            }

            match self.claim_next().await {
                Ok(Some(job)) => self.launch(job, runs).await,
                Ok(None) => return,
                Err(e) => {
                    error!("Dispatch stopped: {}", e);
                    return;
                }
            }
        }
    }

    async fn claim_next(&self) -> Result<Option<CrawlJob>> {
        loop {
            let Some(entry) = queue_entries::head(self.db.pool()).await? else {
                return Ok(None);
            };

            match self.claim(&entry).await {
                Ok(Some(job)) => return Ok(Some(job)),
                Ok(None) => {}
                Err(e) => {
                    self.fail_admission(
                        &entry.job_id,
                        &[JobStatus::Queued, JobStatus::InProgress],
                        &format!("dispatch failed: {e}"),
                    )
                    .await;
                    return Err(e);
                }
            }
        }
    }

    /// Move the head entry to `processing` and its job to `in_progress`.
    ///
    /// `None` means the entry was stale and has been dropped.
    async fn claim(&self, entry: &QueueEntry) -> Result<Option<CrawlJob>> {
        let mut tx = self.begin().await?;

        if !queue_entries::set_status(&mut *tx, &entry.id, EntryStatus::Queued, EntryStatus::Processing)
            .await?
        {
            tx.rollback().await?;
            return Ok(None);
        }
        queue_entries::compact_after(&mut *tx, entry.position).await?;

        if !crawl_jobs::transition(&mut *tx, &entry.job_id, &[JobStatus::Queued], JobStatus::InProgress)
            .await?
        {
            queue_entries::delete(&mut *tx, &entry.id).await?;
            tx.commit().await?;
            debug!(job_id = %entry.job_id, "Dropped backlog entry of a job that left the queue");
            return Ok(None);
        }
        tx.commit().await?;

        Ok(Some(crawl_jobs::get(self.db.pool(), &entry.job_id).await?))
    }

    async fn launch(&self, job: CrawlJob, runs: &mut JoinSet<(JobId, RunOutcome)>) {
        let job_id = job.id;
        let cancel = self.shutdown.child_token();
        let runner = Arc::clone(&self.runner);

        let crawl = tokio::spawn({
            let cancel = cancel.clone();
            async move { runner.run(job, cancel).await }
        });

        self.lock_active().insert(
            job_id,
            ActiveRun {
                cancel,
                abort: crawl.abort_handle(),
            },
        );
        runs.spawn(async move { (job_id, crawl.await) });

        // cancel() looks the run up only after its commit, so a cancel that
        // committed before the insert above is visible here
        match crawl_jobs::find(self.db.pool(), &job_id).await {
            Ok(Some(current)) if current.status == JobStatus::InProgress => {}
            Ok(_) => {
                if let Some(run) = self.lock_active().get(&job_id) {
                    run.cancel.cancel();
                }
                debug!(%job_id, "Job left in_progress before its crawl started");
            }
            Err(e) => warn!(%job_id, "Could not re-check job after dispatch: {}", e),
        }

        info!(%job_id, "Dispatched crawl");
    }

    async fn finish(&self, joined: std::result::Result<(JobId, RunOutcome), JoinError>) {
        let (job_id, outcome) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!("Crawl supervisor task failed: {}", e);
                return;
            }
        };

        if self.lock_active().remove(&job_id).is_none() {
            debug!(%job_id, "Ignoring completion of a reclaimed run");
            return;
        }

        let (to, message) = match outcome {
            Ok(Ok(status)) => (status.job_status(), None),
            Ok(Err(e)) => (JobStatus::Failed, Some(e.to_string())),
            Err(e) if e.is_panic() => (JobStatus::Failed, Some("crawl task panicked".to_string())),
            Err(_) => (JobStatus::Cancelled, None),
        };

        match &message {
            Some(reason) => error!(%job_id, "Crawl failed: {}", reason),
            None => info!(%job_id, "Crawl finished as {}", to),
        }

        if let Err(e) = self.complete(&job_id, to, message.as_deref()).await {
            error!(%job_id, "Failed to record crawl completion: {}", e);
        }
        self.kick();
    }

    async fn complete(&self, job_id: &JobId, to: JobStatus, message: Option<&str>) -> Result<()> {
        let mut tx = self.begin().await?;

        let applied = match message {
            Some(reason) => crawl_jobs::fail(&mut *tx, job_id, &[JobStatus::InProgress], reason).await?,
            None => crawl_jobs::transition(&mut *tx, job_id, &[JobStatus::InProgress], to).await?,
        };
        if !applied {
            debug!(%job_id, "Job already left in_progress");
        }

        let entry_status = if to == JobStatus::Failed {
            EntryStatus::Failed
        } else {
            EntryStatus::Completed
        };
        queue_entries::finish_for_job(&mut *tx, job_id, entry_status).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Best effort: mark the job failed and take it out of the backlog.
    async fn fail_admission(&self, job_id: &JobId, from: &[JobStatus], reason: &str) {
        match self.try_fail(job_id, from, reason).await {
            Ok(true) => error!(%job_id, "Job failed: {}", reason),
            Ok(false) => {}
            Err(e) => error!(%job_id, "Could not mark job failed ({}): {}", reason, e),
        }
    }

    async fn try_fail(&self, job_id: &JobId, from: &[JobStatus], reason: &str) -> Result<bool> {
        let mut tx = self.begin().await?;
        let failed = crawl_jobs::fail(&mut *tx, job_id, from, reason).await?;
        if let Some(entry) = queue_entries::live_for_job(&mut *tx, job_id).await? {
            if entry.status == EntryStatus::Queued {
                queue_entries::delete(&mut *tx, &entry.id).await?;
                queue_entries::compact_after(&mut *tx, entry.position).await?;
            } else {
                queue_entries::finish_for_job(&mut *tx, job_id, EntryStatus::Failed).await?;
            }
        }
        tx.commit().await?;
        Ok(failed)
    }

    async fn recover_stuck(&self, stale_after: Duration) -> Result<usize> {
        let threshold = chrono::Duration::from_std(stale_after)
            .map_err(|e| QueueError::Validation(format!("stale threshold: {e}")))?;
        let reason = format!("stuck: no progress within {}", describe(stale_after));

        let stale = crawl_jobs::stale_in_progress(self.db.pool(), Utc::now() - threshold).await?;
        let mut recovered = 0;

        for job_id in stale {
            let mut tx = self.begin().await?;
            if !crawl_jobs::fail(&mut *tx, &job_id, &[JobStatus::InProgress], &reason).await? {
                tx.rollback().await?;
                continue;
            }
            queue_entries::finish_for_job(&mut *tx, &job_id, EntryStatus::Failed).await?;
            tx.commit().await?;

            if let Some(run) = self.lock_active().remove(&job_id) {
                run.cancel.cancel();
                run.abort.abort();
            }
            warn!(%job_id, "Recovered stuck job");
            recovered += 1;
        }

        if recovered > 0 {
            self.kick();
        }
        Ok(recovered)
    }
}

fn describe(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} minutes", secs / 60)
    } else {
        format!("{secs} seconds")
    }
}
