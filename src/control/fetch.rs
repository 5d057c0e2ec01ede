//! HTTP access for extractors.
//!
//! Extractors never talk to the network directly. They call
//! [`ScrapeContext::fetch_page`] / [`ScrapeContext::fetch_feed`], which run
//! every request through the same sequence:
//!
//! 1. robots.txt check (fetched once per domain per run)
//! 2. cache lookup by URL hash
//! 3. [`RateLimiter::acquire`]
//! 4. HTTP GET with the domain's user agent and timeout
//! 5. [`RateLimiter::release`] plus a [`PerformanceMonitor`] sample
//! 6. cache store on success

use crate::config::ScraperConfigManager;
use crate::control::cache::{CacheManager, ContentType};
use crate::control::compliance::{ComplianceAuditLog, RobotsRules};
use crate::control::monitor::PerformanceMonitor;
use crate::control::rate_limiter::RateLimiter;
use crate::error::ScraperError;
use crate::models::{AuditAction, NewsSource};
use crate::utils::{normalize_domain, robots_url_of};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Raw HTTP response as seen by the scraping layer.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Transport used by [`ScrapeContext`]; swapped for a stub in tests.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn get(&self, url: &str, user_agent: &str, timeout: Duration) -> Result<FetchedPage, ScraperError>;
}

/// `reqwest`-backed [`PageSource`].
#[derive(Debug, Clone, Default)]
pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn get(&self, url: &str, user_agent: &str, timeout: Duration) -> Result<FetchedPage, ScraperError> {
        let http_err = |source| ScraperError::Http {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml,application/rss+xml,application/xml;q=0.9,*/*;q=0.8")
            .timeout(timeout)
            .send()
            .await
            .map_err(http_err)?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(http_err)?;
        Ok(FetchedPage {
            url: final_url,
            status,
            body,
        })
    }
}

/// Whether a response should count against the domain's health.
/// Throttling and server errors do; ordinary 4xx answers do not.
fn counts_as_failure(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Outcome of one robots.txt lookup, kept for the rest of the run.
#[derive(Debug, Clone)]
pub struct RobotsCheck {
    pub robots_url: String,
    pub rules: RobotsRules,
    pub checked_at: DateTime<Utc>,
}

/// Shared, policy-enforcing fetcher handed to every extractor.
pub struct ScrapeContext {
    source: Arc<dyn PageSource>,
    config: Arc<ScraperConfigManager>,
    limiter: Arc<RateLimiter>,
    cache: Arc<CacheManager>,
    monitor: Arc<PerformanceMonitor>,
    audit: Arc<ComplianceAuditLog>,
    robots: Mutex<HashMap<String, Arc<tokio::sync::OnceCell<RobotsCheck>>>>,
}

impl std::fmt::Debug for ScrapeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrapeContext").finish_non_exhaustive()
    }
}

impl ScrapeContext {
    pub fn new(
        source: Arc<dyn PageSource>,
        config: Arc<ScraperConfigManager>,
        limiter: Arc<RateLimiter>,
        cache: Arc<CacheManager>,
        monitor: Arc<PerformanceMonitor>,
        audit: Arc<ComplianceAuditLog>,
    ) -> Self {
        Self {
            source,
            config,
            limiter,
            cache,
            monitor,
            audit,
            robots: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ScraperConfigManager {
        &self.config
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn audit(&self) -> &ComplianceAuditLog {
        &self.audit
    }

    /// Fetch an HTML page through robots, cache and rate-limit checks.
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL of the page
    ///
    /// # Returns
    ///
    /// The response body, from the cache when a fresh copy exists.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - robots.txt disallows the URL
    /// - The rate limiter denies the request
    /// - The request fails or answers with a non-2xx status
    pub async fn fetch_page(&self, url: &str) -> Result<String, ScraperError> {
        self.fetch(url, ContentType::PageHtml).await
    }

    /// Like [`fetch_page`](Self::fetch_page), cached with the feed TTL.
    pub async fn fetch_feed(&self, url: &str) -> Result<String, ScraperError> {
        self.fetch(url, ContentType::Feed).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str, content_type: ContentType) -> Result<String, ScraperError> {
        let parsed = Url::parse(url)?;
        let domain = normalize_domain(parsed.host_str().unwrap_or_default());
        let cfg = self.config.for_domain(&domain);

        if cfg.respect_robots_txt {
            let rules = self.robots_for(&parsed).await;
            if !rules.is_url_allowed(url) {
                self.audit
                    .record(&domain, AuditAction::UrlBlocked, Some(url), "blocked", Some("robots.txt".to_string()))
                    .await;
                return Err(ScraperError::RobotsDisallowed {
                    url: url.to_string(),
                });
            }
        }

        let cached = match content_type {
            ContentType::Feed => self.cache.get_feed(url).await,
            _ => self.cache.get_page(url).await,
        };
        if let Some(body) = cached {
            self.monitor.record_cache_hit(&domain);
            return Ok(body);
        }

        self.limiter.acquire(&domain).await?;
        let user_agent = cfg.user_agent.clone().unwrap_or_default();
        let t0 = Instant::now();
        let result = self.source.get(url, &user_agent, cfg.timeout()).await;
        let elapsed = t0.elapsed();

        match result {
            Ok(page) if (200..300).contains(&page.status) => {
                self.limiter.release(&domain, true);
                self.monitor
                    .record_request(&domain, url, elapsed, page.body.len(), true);
                match content_type {
                    ContentType::Feed => self.cache.put_feed(url, &page.body).await,
                    _ => self.cache.put_page(url, &page.body).await,
                }
                debug!(%url, bytes = page.body.len(), elapsed_ms = elapsed.as_millis() as u64, "Fetched");
                Ok(page.body)
            }
            Ok(page) => {
                self.limiter.release(&domain, !counts_as_failure(page.status));
                self.monitor.record_request(&domain, url, elapsed, page.body.len(), false);
                warn!(%url, status = page.status, "Non-success status");
                Err(ScraperError::Status {
                    url: url.to_string(),
                    status: page.status,
                })
            }
            Err(e) => {
                self.limiter.release(&domain, false);
                self.monitor.record_request(&domain, url, elapsed, 0, false);
                warn!(%url, error = %e, "Request failed");
                Err(e)
            }
        }
    }

    /// robots.txt rules for the URL's origin, fetched once per domain.
    ///
    /// Missing or 4xx robots.txt allows everything; 5xx disallows everything;
    /// a transport error is treated as missing.
    pub async fn robots_for(&self, url: &Url) -> RobotsRules {
        self.robots_check(url).await.rules
    }

    /// Check robots.txt for a source and record the result on its
    /// compliance metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::InvalidUrl`] if `base_url` does not parse. An
    /// unreachable robots.txt is not an error.
    #[instrument(level = "debug", skip_all, fields(domain = %source.domain))]
    pub async fn check_source(&self, source: &mut NewsSource) -> Result<(), ScraperError> {
        let base = Url::parse(&source.base_url)?;
        let check = self.robots_check(&base).await;
        let allowed = check.rules.is_url_allowed(&source.base_url);
        if !allowed {
            warn!(base_url = %source.base_url, "robots.txt disallows the source's base URL");
        }
        source.compliance.robots_txt_url = Some(check.robots_url);
        source.compliance.robots_checked_at = Some(check.checked_at);
        source.compliance.scraping_allowed = Some(allowed);
        Ok(())
    }

    async fn robots_check(&self, url: &Url) -> RobotsCheck {
        let domain = normalize_domain(url.host_str().unwrap_or_default());
        let cell = {
            let mut cells = match self.robots.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(cells.entry(domain.clone()).or_default())
        };
        // concurrent callers for the same domain wait on the first fetch
        cell.get_or_init(|| self.fetch_robots(&domain, url)).await.clone()
    }

    async fn fetch_robots(&self, domain: &str, url: &Url) -> RobotsCheck {
        let robots_url = robots_url_of(url);
        let cfg = self.config.for_domain(domain);
        let user_agent = cfg.user_agent.clone().unwrap_or_default();

        let fetched = match self.limiter.acquire(domain).await {
            Ok(()) => {
                let t0 = Instant::now();
                let result = self.source.get(&robots_url, &user_agent, cfg.timeout()).await;
                let elapsed = t0.elapsed();
                let (ok, bytes) = match &result {
                    Ok(page) => (!counts_as_failure(page.status), page.body.len()),
                    Err(_) => (false, 0),
                };
                self.limiter.release(domain, ok);
                self.monitor.record_request(domain, &robots_url, elapsed, bytes, ok);
                result
            }
            Err(e) => Err(e),
        };

        let (rules, outcome) = match fetched {
            Ok(page) if (200..300).contains(&page.status) => {
                (RobotsRules::parse(&page.body, &user_agent), "parsed".to_string())
            }
            Ok(page) if page.status >= 500 => (RobotsRules::disallow_all(), format!("status {}; disallow all", page.status)),
            Ok(page) => (RobotsRules::allow_all(), format!("status {}; allow all", page.status)),
            Err(e) => {
                warn!(%robots_url, error = %e, "robots.txt unavailable; treating as allow-all");
                (RobotsRules::allow_all(), "unreachable; allow all".to_string())
            }
        };

        if let Some(delay) = rules.crawl_delay() {
            self.config.apply_crawl_delay(domain, delay);
        }
        info!(%domain, %outcome, "robots.txt checked");
        self.audit
            .record(domain, AuditAction::RobotsChecked, Some(&robots_url), &outcome, None)
            .await;

        RobotsCheck {
            robots_url,
            rules,
            checked_at: Utc::now(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{StubSource, context};
    use super::*;

    #[tokio::test]
    async fn test_fetch_page_uses_cache_on_second_call() {
        let stub = Arc::new(StubSource::new().with("https://www.cancer.gov/news", 200, "<html>news</html>"));
        let ctx = context(Arc::clone(&stub));

        assert_eq!(ctx.fetch_page("https://www.cancer.gov/news").await.unwrap(), "<html>news</html>");
        assert_eq!(ctx.fetch_page("https://www.cancer.gov/news/").await.unwrap(), "<html>news</html>");
        assert_eq!(stub.count("https://www.cancer.gov/news"), 1);

        // robots.txt + the page
        let report = ctx.monitor().domain_report("cancer.gov").unwrap();
        assert_eq!(report.total_requests, 2);
        assert_eq!(report.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_robots_fetched_once_and_blocks() {
        let stub = Arc::new(
            StubSource::new()
                .with("https://www.webmd.com/robots.txt", 200, "User-agent: *\nDisallow: /search\n")
                .with("https://www.webmd.com/breast-cancer", 200, "ok"),
        );
        let ctx = context(Arc::clone(&stub));

        assert!(ctx.fetch_page("https://www.webmd.com/breast-cancer").await.is_ok());
        let err = ctx.fetch_page("https://www.webmd.com/search?q=x").await.unwrap_err();
        assert!(matches!(err, ScraperError::RobotsDisallowed { .. }));
        assert_eq!(stub.count("https://www.webmd.com/robots.txt"), 1);
        assert_eq!(stub.count("https://www.webmd.com/search?q=x"), 0);

        let actions: Vec<AuditAction> = ctx.audit().entries().into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::RobotsChecked, AuditAction::UrlBlocked]);
    }

    #[tokio::test]
    async fn test_robots_fetch_is_shared_and_rate_limited() {
        let stub = Arc::new(
            StubSource::new()
                .with("https://news.google.com/rss/a", 200, "a")
                .with("https://news.google.com/rss/b", 200, "b"),
        );
        let ctx = context(Arc::clone(&stub));

        let (a, b) = tokio::join!(
            ctx.fetch_feed("https://news.google.com/rss/a"),
            ctx.fetch_feed("https://news.google.com/rss/b"),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(stub.count("https://news.google.com/robots.txt"), 1);

        let stats = ctx.limiter().stats("news.google.com");
        assert_eq!(stats.total_admitted, 3);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(ctx.monitor().domain_report("news.google.com").unwrap().total_requests, 3);
    }

    #[tokio::test]
    async fn test_unbounded_crawl_delay_does_not_abort() {
        let robots = |delay: &str| {
            StubSource::new()
                .with("https://example.org/robots.txt", 200, &format!("User-agent: *\nCrawl-delay: {delay}\n"))
                .with("https://example.org/a", 200, "ok")
        };

        // not a finite number: ignored
        let ctx = context(Arc::new(robots("inf")));
        assert_eq!(ctx.fetch_page("https://example.org/a").await.unwrap(), "ok");
        assert_eq!(ctx.config().for_domain("example.org").min_delay_seconds, 0.0);

        // finite but absurd: capped at a day, so the page waits too long and is denied
        let ctx = context(Arc::new(robots("1e30")));
        let err = ctx.fetch_page("https://example.org/a").await.unwrap_err();
        assert!(matches!(err, ScraperError::RateLimited { .. }));
        assert_eq!(
            ctx.config().for_domain("example.org").min_delay_seconds,
            crate::config::MAX_SETTING_SECONDS
        );
    }

    #[tokio::test]
    async fn test_check_source_records_compliance() {
        let stub = Arc::new(StubSource::new().with("https://www.webmd.com/robots.txt", 200, "User-agent: *\nDisallow: /search\n"));
        let ctx = context(Arc::clone(&stub));
        let mut source = crate::models::NewsSource {
            id: 3,
            name: "WebMD".to_string(),
            base_url: "https://www.webmd.com/breast-cancer".to_string(),
            domain: "webmd.com".to_string(),
            language: "en".to_string(),
            country: "US".to_string(),
            compliance: Default::default(),
        };
        ctx.check_source(&mut source).await.unwrap();
        assert_eq!(source.compliance.robots_txt_url.as_deref(), Some("https://www.webmd.com/robots.txt"));
        assert_eq!(source.compliance.scraping_allowed, Some(true));
        assert!(source.compliance.robots_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_robots_server_error_disallows() {
        let stub = Arc::new(StubSource::new().with("https://example.org/robots.txt", 503, ""));
        let ctx = context(Arc::clone(&stub));
        let err = ctx.fetch_page("https://example.org/a").await.unwrap_err();
        assert!(matches!(err, ScraperError::RobotsDisallowed { .. }));
    }

    #[tokio::test]
    async fn test_crawl_delay_raises_min_delay() {
        let stub = Arc::new(StubSource::new().with("https://example.org/robots.txt", 200, "User-agent: *\nCrawl-delay: 7\n"));
        let ctx = context(Arc::clone(&stub));
        let url = Url::parse("https://example.org/").unwrap();
        ctx.robots_for(&url).await;
        assert_eq!(ctx.config().for_domain("example.org").min_delay_seconds, 7.0);
    }

    #[tokio::test]
    async fn test_server_errors_feed_backoff() {
        let stub = Arc::new(StubSource::new().with("https://example.org/a", 503, "down"));
        let ctx = context(Arc::clone(&stub));
        for _ in 0..2 {
            let err = ctx.fetch_page("https://example.org/a").await.unwrap_err();
            assert!(matches!(err, ScraperError::Status { status: 503, .. }));
        }
        assert_eq!(ctx.limiter().stats("example.org").consecutive_failures, 2);
        assert_eq!(ctx.limiter().stats("example.org").in_flight, 0);
    }

    #[tokio::test]
    async fn test_not_found_does_not_count_as_failure() {
        let stub = Arc::new(StubSource::new());
        let ctx = context(Arc::clone(&stub));
        let err = ctx.fetch_page("https://example.org/missing").await.unwrap_err();
        assert!(matches!(err, ScraperError::Status { status: 404, .. }));
        assert_eq!(ctx.limiter().stats("example.org").consecutive_failures, 0);
    }
}
