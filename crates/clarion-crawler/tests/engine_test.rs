use async_trait::async_trait;
use clarion_browser::{BrowserError, PageScan, PageScanner, ScanSession};
use clarion_core::{
    AffectedNode, AuditStandard, AuditViolation, CrawlBounds, ImpactLevel, JobStatus,
};
use clarion_crawler::{CrawlEngine, CrawlError, TerminalStatus};
use clarion_db::{crawl_jobs, violations, CrawlJob, Database, NewCrawlJob};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// In-memory site: page URL -> outbound links and violations.
#[derive(Default)]
struct Site {
    links: HashMap<String, Vec<String>>,
    violations: HashMap<String, Vec<AuditViolation>>,
    failing: HashSet<String>,
}

impl Site {
    fn page(mut self, url: &str, links: &[&str]) -> Self {
        self.links
            .insert(url.to_string(), links.iter().map(|l| (*l).to_string()).collect());
        self
    }

    fn violation(mut self, url: &str, impact: ImpactLevel, nodes: usize) -> Self {
        self.violations
            .entry(url.to_string())
            .or_default()
            .push(AuditViolation {
                impact,
                rule_id: "image-alt".to_string(),
                help: "Images must have alternate text".to_string(),
                nodes: (0..nodes)
                    .map(|i| AffectedNode {
                        html: format!("<img id=i{i}>"),
                        target: vec![format!("#i{i}")],
                        summary: None,
                    })
                    .collect(),
            });
        self
    }

    fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }
}

#[derive(Clone, Default)]
struct Probe {
    visits: Arc<Mutex<Vec<(String, Instant)>>>,
    closed: Arc<AtomicUsize>,
}

impl Probe {
    fn visited(&self) -> Vec<String> {
        self.visits.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }
}

struct FakeScanner {
    site: Arc<Site>,
    probe: Probe,
    cancel_after: Option<(usize, CancellationToken)>,
    unavailable: bool,
}

impl FakeScanner {
    fn new(site: Site, probe: &Probe) -> Self {
        Self {
            site: Arc::new(site),
            probe: probe.clone(),
            cancel_after: None,
            unavailable: false,
        }
    }
}

#[async_trait]
impl PageScanner for FakeScanner {
    async fn open_session(
        &self,
        _standard: AuditStandard,
    ) -> clarion_browser::Result<Box<dyn ScanSession>> {
        if self.unavailable {
            return Err(BrowserError::ChromiumError("no chrome binary".to_string()));
        }
        Ok(Box::new(FakeSession {
            site: self.site.clone(),
            probe: self.probe.clone(),
            cancel_after: self.cancel_after.clone(),
        }))
    }
}

struct FakeSession {
    site: Arc<Site>,
    probe: Probe,
    cancel_after: Option<(usize, CancellationToken)>,
}

#[async_trait]
impl ScanSession for FakeSession {
    async fn scan(&mut self, url: &Url) -> clarion_browser::Result<PageScan> {
        let visited = {
            let mut visits = self.probe.visits.lock().unwrap();
            visits.push((url.to_string(), Instant::now()));
            visits.len()
        };
        if let Some((after, token)) = &self.cancel_after {
            if visited == *after {
                token.cancel();
            }
        }

        if self.site.failing.contains(url.as_str()) {
            return Err(BrowserError::NavigationError(format!("{url}: net::ERR_CONNECTION_RESET")));
        }

        Ok(PageScan {
            links: self
                .site
                .links
                .get(url.as_str())
                .map(|links| links.iter().map(|l| Url::parse(l).unwrap()).collect())
                .unwrap_or_default(),
            violations: self.site.violations.get(url.as_str()).cloned().unwrap_or_default(),
        })
    }

    async fn close(self: Box<Self>) -> clarion_browser::Result<()> {
        self.probe.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn setup_test_db() -> Database {
    let db = Database::new(":memory:", 1).await.expect("create database");
    db.run_migrations().await.expect("run migrations");
    db
}

async fn running_job(db: &Database, depth: u32, pages: u32, rate: u32) -> CrawlJob {
    let job = crawl_jobs::create(
        db.pool(),
        NewCrawlJob {
            root_url: "https://example.com/".to_string(),
            bounds: CrawlBounds::new(depth, pages, rate).expect("valid bounds"),
            standard: AuditStandard::default(),
            schedule_id: None,
        },
    )
    .await
    .expect("create job");
    crawl_jobs::transition(db.pool(), &job.id, &[JobStatus::Pending], JobStatus::InProgress)
        .await
        .expect("start job");
    crawl_jobs::get(db.pool(), &job.id).await.expect("reload job")
}

fn engine(scanner: FakeScanner, db: &Database) -> CrawlEngine {
    CrawlEngine::new(Arc::new(scanner), db.clone(), Duration::from_secs(5))
}

fn child_links(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("https://example.com/p{i}")).collect()
}

#[tokio::test]
async fn test_depth_limit_one_scans_only_root() {
    let db = setup_test_db().await;
    let job = running_job(&db, 1, 100, 60).await;
    let links = child_links(10);
    let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();
    let probe = Probe::default();
    let scanner = FakeScanner::new(Site::default().page("https://example.com/", &link_refs), &probe);

    let status = engine(scanner, &db)
        .run(&job, CancellationToken::new())
        .await
        .expect("crawl");

    assert_eq!(status, TerminalStatus::Completed);
    assert_eq!(probe.visited(), vec!["https://example.com/"]);
    let job = crawl_jobs::get(db.pool(), &job.id).await.unwrap();
    assert_eq!(job.pages_scanned, 1);
    assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_page_limit_caps_pages_and_admission() {
    let db = setup_test_db().await;
    let job = running_job(&db, 3, 3, 60).await;
    let links = child_links(10);
    let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();
    let probe = Probe::default();
    let scanner = FakeScanner::new(Site::default().page("https://example.com/", &link_refs), &probe);

    let status = engine(scanner, &db)
        .run(&job, CancellationToken::new())
        .await
        .expect("crawl");

    assert_eq!(status, TerminalStatus::Completed);
    assert_eq!(
        probe.visited(),
        vec![
            "https://example.com/",
            "https://example.com/p0",
            "https://example.com/p1",
        ]
    );
    let job = crawl_jobs::get(db.pool(), &job.id).await.unwrap();
    assert_eq!(job.pages_scanned, 3);
}

#[tokio::test]
async fn test_crawl_rate_spaces_page_scans() {
    let db = setup_test_db().await;
    let job = running_job(&db, 2, 2, 30).await;
    let probe = Probe::default();
    let scanner = FakeScanner::new(
        Site::default().page("https://example.com/", &["https://example.com/next"]),
        &probe,
    );

    engine(scanner, &db)
        .run(&job, CancellationToken::new())
        .await
        .expect("crawl");

    let visits = probe.visits.lock().unwrap().clone();
    assert_eq!(visits.len(), 2);
    let gap = visits[1].1.duration_since(visits[0].1);
    assert!(gap >= Duration::from_millis(1900), "gap too short: {gap:?}");
    assert!(gap < Duration::from_secs(3), "gap too long: {gap:?}");
}

#[tokio::test]
async fn test_cancel_after_first_page_stops_crawl() {
    let db = setup_test_db().await;
    let job = running_job(&db, 2, 5, 60).await;
    let links = child_links(4);
    let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();
    let mut site = Site::default().page("https://example.com/", &link_refs);
    site = site.violation("https://example.com/", ImpactLevel::Minor, 1);
    for link in &links {
        site = site.violation(link, ImpactLevel::Minor, 1);
    }

    let token = CancellationToken::new();
    let probe = Probe::default();
    let mut scanner = FakeScanner::new(site, &probe);
    scanner.cancel_after = Some((1, token.clone()));

    let status = engine(scanner, &db).run(&job, token).await.expect("crawl");

    assert_eq!(status, TerminalStatus::Cancelled);
    assert_eq!(probe.visited().len(), 1);
    assert_eq!(probe.closed.load(Ordering::SeqCst), 1);

    let job = crawl_jobs::get(db.pool(), &job.id).await.unwrap();
    assert_eq!(job.pages_scanned, 1);
    assert_eq!(violations::count_for_job(db.pool(), &job.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_single_critical_node_gives_score_90() {
    let db = setup_test_db().await;
    let job = running_job(&db, 1, 1, 60).await;
    let probe = Probe::default();
    let scanner = FakeScanner::new(
        Site::default()
            .page("https://example.com/", &[])
            .violation("https://example.com/", ImpactLevel::Critical, 1),
        &probe,
    );

    engine(scanner, &db)
        .run(&job, CancellationToken::new())
        .await
        .expect("crawl");

    let job = crawl_jobs::get(db.pool(), &job.id).await.unwrap();
    assert_eq!(job.pages_scanned, 1);
    assert_eq!(job.violations_by_impact.critical, 1);
    assert!((job.accessibility_score - 90.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_scope_rules_and_page_failures() {
    let db = setup_test_db().await;
    let job = running_job(&db, 2, 10, 60).await;
    let probe = Probe::default();
    let scanner = FakeScanner::new(
        Site::default()
            .page(
                "https://example.com/",
                &[
                    "https://other.org/elsewhere",
                    "https://example.com/deep/er/page",
                    "https://www.example.com/broken",
                    "https://EXAMPLE.com/ok#section",
                    "https://example.com/",
                ],
            )
            .failing("https://www.example.com/broken"),
        &probe,
    );

    let status = engine(scanner, &db)
        .run(&job, CancellationToken::new())
        .await
        .expect("page failures do not fail the crawl");

    assert_eq!(status, TerminalStatus::Completed);
    assert_eq!(
        probe.visited(),
        vec![
            "https://example.com/",
            "https://www.example.com/broken",
            "https://example.com/ok#section",
        ]
    );
    let job = crawl_jobs::get(db.pool(), &job.id).await.unwrap();
    assert_eq!(job.pages_scanned, 2);
}

#[tokio::test]
async fn test_unavailable_scanner_is_an_error() {
    let db = setup_test_db().await;
    let job = running_job(&db, 1, 1, 60).await;
    let probe = Probe::default();
    let mut scanner = FakeScanner::new(Site::default(), &probe);
    scanner.unavailable = true;

    let result = engine(scanner, &db).run(&job, CancellationToken::new()).await;

    assert!(matches!(result, Err(CrawlError::ScannerUnavailable(_))));
    assert!(probe.visited().is_empty());
}

#[tokio::test]
async fn test_job_no_longer_running_stops_crawl() {
    let db = setup_test_db().await;
    let job = running_job(&db, 1, 1, 60).await;
    crawl_jobs::fail(db.pool(), &job.id, &[JobStatus::InProgress], "stuck")
        .await
        .unwrap();
    let probe = Probe::default();
    let scanner = FakeScanner::new(Site::default().page("https://example.com/", &[]), &probe);

    let result = engine(scanner, &db).run(&job, CancellationToken::new()).await;

    assert!(matches!(result, Err(CrawlError::Refused(_))));
    assert_eq!(probe.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_before_start_opens_no_session() {
    let db = setup_test_db().await;
    let job = running_job(&db, 1, 1, 60).await;
    let probe = Probe::default();
    let scanner = FakeScanner::new(Site::default().page("https://example.com/", &[]), &probe);
    let token = CancellationToken::new();
    token.cancel();

    let status = engine(scanner, &db).run(&job, token).await.expect("crawl");

    assert_eq!(status, TerminalStatus::Cancelled);
    assert!(probe.visited().is_empty());
    assert_eq!(probe.closed.load(Ordering::SeqCst), 0);
}
