//! One scraping run over every configured source.
//!
//! Domains are scraped concurrently, bounded by a semaphore of
//! `max_concurrent_domains` permits; requests within a domain are further
//! limited by the [`RateLimiter`](crate::control::rate_limiter::RateLimiter).
//! Each domain goes through: registry scrape (with fallback) → URL/content
//! dedupe against everything seen this run → analysis.

use crate::analysis::{AnalyzedArticle, ArticleAnalyzer};
use crate::control::cache::CacheStats;
use crate::control::fetch::ScrapeContext;
use crate::control::monitor::DomainReport;
use crate::control::rate_limiter::RateLimitStats;
use crate::control::registry::{ExtractorStats, ScraperRegistry};
use crate::models::{AuditAction, NewsSource, SourceCompliance};
use crate::utils::{content_hash, normalize_url};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rand::{Rng, rng};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

/// What happened to one domain during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainResult {
    pub domain: String,
    pub extractor: Option<String>,
    pub used_fallback: bool,
    pub articles: usize,
    pub duplicates: usize,
    pub error: Option<String>,
    /// robots.txt outcome for the source's base URL.
    pub compliance: SourceCompliance,
}

/// Everything a run produced, written as the run JSON.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub domains: Vec<DomainResult>,
    pub articles: Vec<AnalyzedArticle>,
    pub extractor_stats: Vec<ExtractorStats>,
    pub performance: Vec<DomainReport>,
    pub rate_limits: Vec<RateLimitStats>,
    pub cache: CacheStats,
    pub audit_entries: usize,
}

impl RunReport {
    pub fn failed_domains(&self) -> usize {
        self.domains.iter().filter(|d| d.error.is_some()).count()
    }
}

/// `20250304T101500Z-3fa9`: sortable, unique enough for one host.
pub fn new_run_id(now: DateTime<Utc>) -> String {
    let suffix: u16 = rng().random();
    format!("{}-{suffix:04x}", now.format("%Y%m%dT%H%M%SZ"))
}

#[derive(Default)]
struct SeenSet {
    urls: HashSet<String>,
    hashes: HashSet<String>,
}

pub struct Pipeline {
    registry: Arc<ScraperRegistry>,
    ctx: Arc<ScrapeContext>,
    analyzer: ArticleAnalyzer,
    max_concurrent_domains: usize,
    next_id: AtomicU64,
    seen: Mutex<SeenSet>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("max_concurrent_domains", &self.max_concurrent_domains)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        registry: Arc<ScraperRegistry>,
        ctx: Arc<ScrapeContext>,
        analyzer: ArticleAnalyzer,
        max_concurrent_domains: usize,
    ) -> Self {
        Self {
            registry,
            ctx,
            analyzer,
            max_concurrent_domains: max_concurrent_domains.max(1),
            next_id: AtomicU64::new(1),
            seen: Mutex::new(SeenSet::default()),
        }
    }

    /// Whether the article is new to this run; records it if so.
    fn first_sighting(&self, url: &str, hash: &str) -> bool {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if seen.urls.contains(url) || seen.hashes.contains(hash) {
            return false;
        }
        seen.urls.insert(url.to_string());
        seen.hashes.insert(hash.to_string());
        true
    }

    #[instrument(level = "info", skip_all, fields(domain = %source.domain))]
    async fn run_domain(&self, source: &NewsSource) -> (DomainResult, Vec<AnalyzedArticle>) {
        let mut result = DomainResult {
            domain: source.domain.clone(),
            extractor: None,
            used_fallback: false,
            articles: 0,
            duplicates: 0,
            error: None,
            compliance: source.compliance.clone(),
        };

        if !self.ctx.config().is_enabled(&source.domain) {
            info!("Domain disabled; skipping");
            result.error = Some("disabled".to_string());
            return (result, Vec::new());
        }

        if self.ctx.config().for_domain(&source.domain).respect_robots_txt {
            let mut checked = source.clone();
            match self.ctx.check_source(&mut checked).await {
                Ok(()) => result.compliance = checked.compliance,
                Err(e) => warn!(error = %e, "Compliance check failed"),
            }
        }

        let outcome = match self.registry.scrape(&self.ctx, source).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Domain scrape failed; skipping");
                result.error = Some(e.to_string());
                return (result, Vec::new());
            }
        };
        result.extractor = Some(outcome.extractor.clone());
        result.used_fallback = outcome.used_fallback;

        let mut analyzed = Vec::with_capacity(outcome.articles.len());
        for scraped in outcome.articles {
            let url = normalize_url(&scraped.url);
            if !self.first_sighting(&url, &content_hash(&scraped.content)) {
                debug!(%url, "Duplicate article skipped");
                result.duplicates += 1;
                self.ctx
                    .audit()
                    .record(&source.domain, AuditAction::ArticleSkipped, Some(&url), "duplicate", None)
                    .await;
                continue;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            analyzed.push(self.analyzer.analyze(id, source.id, &outcome.extractor, scraped));
        }

        result.articles = analyzed.len();
        info!(
            extractor = %outcome.extractor,
            articles = result.articles,
            duplicates = result.duplicates,
            "Domain complete"
        );
        (result, analyzed)
    }

    /// Scrape and analyze every source; failures are recorded, not returned.
    ///
    /// At most `max_concurrent_domains` sources are in flight at once.
    ///
    /// # Returns
    ///
    /// The [`RunReport`] with one [`DomainResult`] per source, sorted by
    /// domain, and the new articles ordered by id.
    #[instrument(level = "info", skip_all, fields(sources = sources.len(), max_concurrent_domains = self.max_concurrent_domains))]
    pub async fn run(&self, sources: &[NewsSource]) -> RunReport {
        let started_at = Utc::now();
        let run_id = new_run_id(started_at);
        info!(%run_id, "Run starting");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_domains));
        let mut outcomes: Vec<(DomainResult, Vec<AnalyzedArticle>)> = stream::iter(sources)
            .map(|source| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(e) => {
                            warn!(error = %e, "Semaphore closed; running unbounded");
                            None
                        }
                    };
                    self.run_domain(source).await
                }
            })
            .buffer_unordered(sources.len().max(1))
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.0.domain.cmp(&b.0.domain));

        let mut domains = Vec::with_capacity(outcomes.len());
        let mut articles = Vec::new();
        for (result, analyzed) in outcomes {
            domains.push(result);
            articles.extend(analyzed);
        }
        articles.sort_by_key(|a| a.article.id);

        self.ctx.monitor().log_summary();
        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            domains,
            articles,
            extractor_stats: self.registry.stats(),
            performance: self.ctx.monitor().report(),
            rate_limits: self.ctx.limiter().all_stats(),
            cache: self.ctx.cache().stats().await,
            audit_entries: self.ctx.audit().entries().len(),
        };
        info!(
            run_id = %report.run_id,
            domains = report.domains.len(),
            failed = report.failed_domains(),
            articles = report.articles.len(),
            cache_hit_ratio = report.cache.hit_ratio,
            "Run finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::fetch::testing::{StubSource, context};
    use crate::error::ScraperError;
    use crate::models::ScrapedArticle;
    use crate::scrapers::Extractor;
    use crate::scrapers::feed::FeedExtractor;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Records how many domains are inside `extract` at once.
    #[derive(Default)]
    struct GaugedExtractor {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Extractor for GaugedExtractor {
        fn name(&self) -> &str {
            "gauged"
        }

        async fn extract(&self, _ctx: &ScrapeContext, source: &NewsSource) -> Result<Vec<ScrapedArticle>, ScraperError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![ScrapedArticle {
                url: format!("https://{}/story", source.domain),
                title: "Screening update".to_string(),
                summary: None,
                content: format!("{} reports on breast cancer screening.", source.domain),
                published_at: None,
            }])
        }
    }

    fn source(id: u32, domain: &str) -> NewsSource {
        NewsSource {
            id,
            name: domain.to_string(),
            base_url: format!("https://{domain}"),
            domain: domain.to_string(),
            language: "en".to_string(),
            country: "US".to_string(),
            compliance: SourceCompliance::default(),
        }
    }

    fn rss(items: &[(&str, &str)]) -> String {
        let items: String = items
            .iter()
            .map(|(title, link)| {
                format!("<item><title>{title}</title><link>{link}</link><description>{title} and breast cancer screening.</description></item>")
            })
            .collect();
        format!("<rss><channel>{items}</channel></rss>")
    }

    #[test]
    fn test_run_id_format() {
        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2025, 3, 4, 10, 15, 0).unwrap();
        let id = new_run_id(now);
        assert!(id.starts_with("20250304T101500Z-"));
        assert_eq!(id.len(), "20250304T101500Z-".len() + 4);
    }

    #[tokio::test]
    async fn test_run_dedupes_and_records_failures() {
        let stub = Arc::new(
            StubSource::new()
                .with(
                    "https://a.test/rss",
                    200,
                    &rss(&[("Mammogram study", "https://a.test/1"), ("Shared story", "https://shared.test/x")]),
                )
                .with(
                    "https://b.test/rss",
                    200,
                    &rss(&[("Shared story", "https://shared.test/x/"), ("Exercise trial", "https://b.test/2")]),
                ),
        );
        let ctx = Arc::new(context(stub));
        let registry = Arc::new(ScraperRegistry::new());
        registry
            .register("a.test", Arc::new(FeedExtractor::new("a.test/rss", "https://a.test/rss", false)), 20)
            .await;
        registry
            .register("b.test", Arc::new(FeedExtractor::new("b.test/rss", "https://b.test/rss", false)), 20)
            .await;

        let pipeline = Pipeline::new(registry, ctx, ArticleAnalyzer::default(), 2);
        let sources = vec![source(1, "a.test"), source(2, "b.test"), source(3, "c.test")];
        let report = pipeline.run(&sources).await;

        assert_eq!(report.domains.len(), 3);
        assert_eq!(report.failed_domains(), 1);
        let c = report.domains.iter().find(|d| d.domain == "c.test").unwrap();
        assert!(c.error.as_deref().unwrap().contains("no extractor"));

        // the shared story is kept once
        assert_eq!(report.articles.len(), 3);
        let duplicates: usize = report.domains.iter().map(|d| d.duplicates).sum();
        assert_eq!(duplicates, 1);

        let urls: HashSet<&str> = report.articles.iter().map(|a| a.article.url.as_str()).collect();
        assert_eq!(urls.len(), 3);
        let ids: Vec<u64> = report.articles.iter().map(|a| a.article.id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(report.extractor_stats.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_domain_is_skipped() {
        let stub = Arc::new(StubSource::new());
        let ctx = Arc::new(context(Arc::clone(&stub)));
        ctx.config().set_override(
            "a.test",
            crate::config::DomainOverride {
                enabled: Some(false),
                ..Default::default()
            },
        );
        let registry = Arc::new(ScraperRegistry::new());
        registry
            .register("a.test", Arc::new(FeedExtractor::new("a.test/rss", "https://a.test/rss", false)), 20)
            .await;

        let pipeline = Pipeline::new(registry, ctx, ArticleAnalyzer::default(), 1);
        let report = pipeline.run(&[source(1, "a.test")]).await;
        assert_eq!(report.domains[0].error.as_deref(), Some("disabled"));
        assert!(stub.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_domains_are_bounded() {
        let ctx = Arc::new(context(Arc::new(StubSource::new())));
        let gauge = Arc::new(GaugedExtractor::default());
        let registry = Arc::new(ScraperRegistry::new());
        let domains = ["a.test", "b.test", "c.test", "d.test", "e.test"];
        for domain in domains {
            registry.register(domain, Arc::clone(&gauge) as Arc<dyn Extractor>, 10).await;
        }
        let sources: Vec<NewsSource> = domains
            .iter()
            .enumerate()
            .map(|(i, d)| source(i as u32 + 1, d))
            .collect();

        let pipeline = Pipeline::new(registry, ctx, ArticleAnalyzer::default(), 2);
        let report = pipeline.run(&sources).await;

        assert_eq!(report.articles.len(), 5);
        assert_eq!(report.failed_domains(), 0);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
        assert_eq!(gauge.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_records_robots_compliance() {
        let stub = Arc::new(
            StubSource::new()
                .with("https://a.test/robots.txt", 200, "User-agent: *\nDisallow: /private\n")
                .with("https://a.test/rss", 200, &rss(&[("Mammogram study", "https://a.test/1")])),
        );
        let ctx = Arc::new(context(Arc::clone(&stub)));
        let registry = Arc::new(ScraperRegistry::new());
        registry
            .register("a.test", Arc::new(FeedExtractor::new("a.test/rss", "https://a.test/rss", false)), 20)
            .await;

        let pipeline = Pipeline::new(registry, ctx, ArticleAnalyzer::default(), 1);
        let report = pipeline.run(&[source(1, "a.test")]).await;

        let compliance = &report.domains[0].compliance;
        assert_eq!(compliance.robots_txt_url.as_deref(), Some("https://a.test/robots.txt"));
        assert_eq!(compliance.scraping_allowed, Some(true));
        assert!(compliance.robots_checked_at.is_some());
        // robots.txt fetched once for the check and the feed
        assert_eq!(stub.count("https://a.test/robots.txt"), 1);
    }
}
