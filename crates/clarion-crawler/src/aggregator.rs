//! Accessibility score aggregation.
//!
//! Each page scores `100 - 2 * deduction`, clamped to `0..=100`, where the
//! deduction weights every affected node by its impact (critical 5,
//! serious 3, moderate 2, minor 1). The job score is the running average of
//! its page scores.

use clarion_core::{AuditViolation, ImpactCounts, JobId};
use clarion_db::{crawl_jobs, violations, Database, DatabaseError};
use tracing::debug;

/// Weighted node count of one page.
pub fn page_deduction(counts: &ImpactCounts) -> u64 {
    counts.weighted_sum()
}

/// Score of one page, 0-100.
#[allow(clippy::cast_precision_loss)]
pub fn page_score(counts: &ImpactCounts) -> f64 {
    let penalty = page_deduction(counts).saturating_mul(2);
    (100.0 - penalty as f64).clamp(0.0, 100.0)
}

/// What recording one page did to its job.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRecord {
    /// Score of this page
    pub page_score: f64,
    /// Node-level counts of this page
    pub counts: ImpactCounts,
    /// Job's page count including this page
    pub pages_scanned: u32,
    /// Job's running average after this page
    pub accessibility_score: f64,
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    db: Database,
}

impl Aggregator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Fold one scanned page into the job and store its violations.
    ///
    /// Runs in one transaction. `None` means the job no longer accepts pages
    /// (not `in_progress`, or at its page limit); nothing was written.
    pub async fn record_page(
        &self,
        job_id: &JobId,
        page_url: &str,
        found: &[AuditViolation],
    ) -> Result<Option<PageRecord>, DatabaseError> {
        let counts = AuditViolation::impact_counts(found);
        let score = page_score(&counts);

        let mut tx = self.db.begin_write().await?;

        let Some(totals) = crawl_jobs::apply_page(&mut *tx, job_id, score, &counts).await? else {
            tx.rollback().await?;
            debug!(%job_id, "Page {} refused by store", page_url);
            return Ok(None);
        };

        for violation in found {
            violations::insert(&mut *tx, job_id, page_url, violation).await?;
        }

        tx.commit().await?;

        debug!(
            %job_id,
            page_score = score,
            pages_scanned = totals.pages_scanned,
            "Recorded {} violations on {}",
            found.len(),
            page_url
        );

        Ok(Some(PageRecord {
            page_score: score,
            counts,
            pages_scanned: totals.pages_scanned,
            accessibility_score: totals.accessibility_score,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clarion_core::{AffectedNode, AuditStandard, CrawlBounds, ImpactLevel, JobStatus};
    use clarion_db::NewCrawlJob;

    fn counts(critical: u64, serious: u64, moderate: u64, minor: u64) -> ImpactCounts {
        ImpactCounts {
            critical,
            serious,
            moderate,
            minor,
        }
    }

    fn violation(impact: ImpactLevel, nodes: usize) -> AuditViolation {
        AuditViolation {
            impact,
            rule_id: format!("{impact}-rule"),
            help: "help".to_string(),
            nodes: (0..nodes)
                .map(|i| AffectedNode {
                    html: format!("<div id=n{i}>"),
                    target: vec![format!("#n{i}")],
                    summary: None,
                })
                .collect(),
        }
    }

    async fn running_job(db: &Database, page_limit: u32) -> JobId {
        let job = crawl_jobs::create(
            db.pool(),
            NewCrawlJob {
                root_url: "https://example.com".to_string(),
                bounds: CrawlBounds::new(2, page_limit, 60).unwrap(),
                standard: AuditStandard::default(),
                schedule_id: None,
            },
        )
        .await
        .unwrap();
        crawl_jobs::transition(db.pool(), &job.id, &[JobStatus::Pending], JobStatus::InProgress)
            .await
            .unwrap();
        job.id
    }

    async fn setup_test_db() -> Database {
        let db = Database::new(":memory:", 1).await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    #[test]
    fn test_single_critical_node_scores_90() {
        let c = counts(1, 0, 0, 0);
        assert_eq!(page_deduction(&c), 5);
        assert!((page_score(&c) - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_page_score_weights_and_clamp() {
        assert!((page_score(&counts(0, 0, 0, 0)) - 100.0).abs() < f64::EPSILON);
        // 3 + 2 + 1 = 6, doubled = 12
        assert!((page_score(&counts(0, 1, 1, 1)) - 88.0).abs() < f64::EPSILON);
        assert!(page_score(&counts(20, 0, 0, 0)).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_first_page_score_is_job_score() {
        let db = setup_test_db().await;
        let job_id = running_job(&db, 5).await;
        let aggregator = Aggregator::new(db.clone());

        let record = aggregator
            .record_page(&job_id, "https://example.com/", &[violation(ImpactLevel::Critical, 1)])
            .await
            .unwrap()
            .expect("page accepted");

        assert_eq!(record.pages_scanned, 1);
        assert!((record.page_score - 90.0).abs() < f64::EPSILON);
        assert!((record.accessibility_score - 90.0).abs() < f64::EPSILON);

        let job = crawl_jobs::get(db.pool(), &job_id).await.unwrap();
        assert!((job.accessibility_score - 90.0).abs() < f64::EPSILON);
        assert_eq!(job.violations_by_impact.critical, 1);
        assert_eq!(job.violations_found, 1);
        assert_eq!(violations::count_for_job(db.pool(), &job_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_counts_are_node_level_and_average_runs() {
        let db = setup_test_db().await;
        let job_id = running_job(&db, 5).await;
        let aggregator = Aggregator::new(db.clone());

        // 3 serious nodes: 100 - 2 * 9 = 82
        aggregator
            .record_page(&job_id, "https://example.com/a", &[violation(ImpactLevel::Serious, 3)])
            .await
            .unwrap()
            .expect("page accepted");
        let second = aggregator
            .record_page(&job_id, "https://example.com/b", &[])
            .await
            .unwrap()
            .expect("page accepted");

        assert!((second.accessibility_score - 91.0).abs() < 1e-9);

        let job = crawl_jobs::get(db.pool(), &job_id).await.unwrap();
        assert_eq!(job.violations_by_impact.serious, 3);
        assert_eq!(job.violations_found, 3);
        assert_eq!(violations::count_for_job(db.pool(), &job_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_refused_page_writes_nothing() {
        let db = setup_test_db().await;
        let job_id = running_job(&db, 1).await;
        let aggregator = Aggregator::new(db.clone());

        aggregator
            .record_page(&job_id, "https://example.com/", &[])
            .await
            .unwrap()
            .expect("first page accepted");

        let refused = aggregator
            .record_page(&job_id, "https://example.com/x", &[violation(ImpactLevel::Minor, 2)])
            .await
            .unwrap();
        assert!(refused.is_none());

        let job = crawl_jobs::get(db.pool(), &job_id).await.unwrap();
        assert_eq!(job.pages_scanned, 1);
        assert_eq!(job.violations_by_impact.minor, 0);
        assert_eq!(violations::count_for_job(db.pool(), &job_id).await.unwrap(), 0);
    }
}
