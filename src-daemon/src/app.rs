//! Service wiring for the daemon and the one-shot commands.

use crate::cli::CrawlArgs;
use anyhow::Context;
use clarion_browser::ChromiumScanner;
use clarion_core::{AppConfig, AuditStandard, CrawlBounds, ImpactLevel, JobId};
use clarion_crawler::CrawlEngine;
use clarion_db::{crawl_jobs, violations, CrawlJob, Database};
use clarion_queue::{QueueManager, SubmitRequest};
use clarion_scheduler::Scheduler;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const STATUS_POLL: Duration = Duration::from_secs(1);

struct Services {
    db: Database,
    queue: QueueManager,
}

async fn open_database(config: &AppConfig) -> anyhow::Result<Database> {
    let db = Database::from_config(&config.database)
        .await
        .with_context(|| format!("opening database {}", config.database.path.display()))?;
    db.run_migrations().await.context("running migrations")?;
    Ok(db)
}

async fn start(config: &AppConfig) -> anyhow::Result<Services> {
    let db = open_database(config).await?;

    let scanner = ChromiumScanner::new(config.browser.clone(), config.crawl.page_timeout());
    let engine = CrawlEngine::new(Arc::new(scanner), db.clone(), config.crawl.page_timeout());
    let queue = QueueManager::start(db.clone(), Arc::new(engine), &config.queue);

    let recovered = queue
        .recover_stuck(config.queue.stale_after())
        .await
        .context("recovering stuck jobs")?;
    if recovered > 0 {
        warn!("Failed {} jobs left running by an earlier process", recovered);
    }

    Ok(Services { db, queue })
}

/// Run until ctrl-c.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let Services { db, queue } = start(&config).await?;
    let shutdown = CancellationToken::new();

    let maintenance = queue.spawn_maintenance(
        Duration::from_secs(config.queue.recovery_interval_secs.max(1)),
        config.queue.stale_after(),
    );

    let scheduler = if config.scheduler.enabled {
        let scheduler = Arc::new(Scheduler::new(Arc::new(db.clone()), Arc::new(queue.clone())));
        Some(scheduler.start(config.scheduler.tick_interval(), shutdown.clone()))
    } else {
        info!("Scheduler disabled");
        None
    };

    info!(
        max_concurrent = config.queue.max_concurrent,
        "Clarion is running, press ctrl-c to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    info!("Shutting down");
    shutdown.cancel();
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
    }
    queue.shutdown().await;
    if let Err(e) = maintenance.await {
        error!("Maintenance task ended abnormally: {}", e);
    }
    db.close().await;
    Ok(())
}

/// Submit one crawl, wait for it and print the outcome.
pub async fn crawl_once(config: AppConfig, args: CrawlArgs) -> anyhow::Result<()> {
    let defaults = config.crawl.default_bounds();
    let bounds = CrawlBounds::new(
        args.depth.unwrap_or(defaults.depth_limit),
        args.pages.unwrap_or(defaults.page_limit),
        args.rate.unwrap_or(defaults.crawl_rate),
    )?;

    let Services { db, queue } = start(&config).await?;

    let job_id = queue
        .submit(SubmitRequest {
            root_url: args.url,
            bounds,
            standard: AuditStandard {
                version: args.wcag,
                level: args.level,
            },
            schedule: args.every,
        })
        .await?;

    if let Some(position) = queue.position(&job_id).await? {
        println!("Job {job_id} queued at position {position}");
    }

    let job = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for ctrl-c")?;
                queue.cancel(&job_id).await?;
            }
            () = tokio::time::sleep(STATUS_POLL) => {}
        }

        let job = queue.status(&job_id).await?;
        if job.status.is_terminal() {
            break job;
        }
    };

    print_job(&db, &job).await?;

    queue.shutdown().await;
    db.close().await;
    Ok(())
}

/// Print a stored job without starting the queue.
pub async fn show_status(config: AppConfig, job_id: JobId) -> anyhow::Result<()> {
    let db = open_database(&config).await?;
    let job = crawl_jobs::find(db.pool(), &job_id)
        .await?
        .with_context(|| format!("no crawl job {job_id}"))?;
    print_job(&db, &job).await?;
    db.close().await;
    Ok(())
}

async fn print_job(db: &Database, job: &CrawlJob) -> anyhow::Result<()> {
    println!("{} ({})", job.root_url, job.standard);
    println!("  status:  {}", job.status);
    println!(
        "  pages:   {} of at most {}",
        job.pages_scanned, job.bounds.page_limit
    );
    println!("  score:   {:.1}", job.accessibility_score);
    if let Some(reason) = &job.error_message {
        println!("  error:   {reason}");
    }

    let counts = job.violations_by_impact;
    println!(
        "  nodes:   {} ({} critical, {} serious, {} moderate, {} minor)",
        counts.total(),
        counts.get(ImpactLevel::Critical),
        counts.get(ImpactLevel::Serious),
        counts.get(ImpactLevel::Moderate),
        counts.get(ImpactLevel::Minor)
    );

    let mut by_rule: BTreeMap<(ImpactLevel, String), usize> = BTreeMap::new();
    for record in violations::list_for_job(db.pool(), &job.id).await? {
        *by_rule.entry((record.impact, record.rule_id)).or_default() += record.nodes.len();
    }
    for ((impact, rule_id), nodes) in by_rule {
        println!("    [{impact}] {rule_id}: {nodes} nodes");
    }
    Ok(())
}
