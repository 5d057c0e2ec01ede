//! Per-domain extractor chains with ordered fallback.
//!
//! Each domain holds a list of extractors sorted by priority (lower runs
//! first). [`ScraperRegistry::scrape`] walks the list until one extractor
//! returns at least one article. Every attempt is counted per
//! `(domain, extractor)` pair.

use super::fetch::ScrapeContext;
use crate::error::ScraperError;
use crate::models::{AuditAction, NewsSource, ScrapedArticle};
use crate::scrapers::Extractor;
use crate::utils::normalize_domain;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

struct Registration {
    name: String,
    priority: u32,
    extractor: Arc<dyn Extractor>,
}

/// Counters for one extractor on one domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractorStats {
    pub domain: String,
    pub extractor: String,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub articles: u64,
    /// Successful runs where this extractor was not the primary.
    pub fallback_uses: u64,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
    pub total_duration_ms: u64,
}

/// Result of a successful [`ScraperRegistry::scrape`].
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub domain: String,
    pub extractor: String,
    pub used_fallback: bool,
    pub articles: Vec<ScrapedArticle>,
}

#[derive(Default)]
pub struct ScraperRegistry {
    chains: RwLock<HashMap<String, Vec<Registration>>>,
    stats: Mutex<HashMap<(String, String), ExtractorStats>>,
}

impl std::fmt::Debug for ScraperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScraperRegistry").finish_non_exhaustive()
    }
}

impl ScraperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `extractor` to the domain's chain. An extractor with the same
    /// name is replaced. Equal priorities keep registration order.
    ///
    /// # Arguments
    ///
    /// * `domain` - Domain the chain belongs to; `www.` is ignored
    /// * `extractor` - The extractor to add
    /// * `priority` - Lower values run first
    pub async fn register(&self, domain: &str, extractor: Arc<dyn Extractor>, priority: u32) {
        let domain = normalize_domain(domain);
        let name = extractor.name().to_string();
        let mut chains = self.chains.write().await;
        let chain = chains.entry(domain).or_default();
        chain.retain(|r| r.name != name);
        chain.push(Registration {
            name,
            priority,
            extractor,
        });
        chain.sort_by_key(|r| r.priority);
    }

    /// Remove an extractor; returns whether it was registered.
    pub async fn unregister(&self, domain: &str, name: &str) -> bool {
        let domain = normalize_domain(domain);
        let mut chains = self.chains.write().await;
        let Some(chain) = chains.get_mut(&domain) else {
            return false;
        };
        let before = chain.len();
        chain.retain(|r| r.name != name);
        let removed = chain.len() != before;
        if chain.is_empty() {
            chains.remove(&domain);
        }
        removed
    }

    /// Registered domains, sorted.
    pub async fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.chains.read().await.keys().cloned().collect();
        domains.sort();
        domains
    }

    /// Extractor names for a domain in execution order.
    pub async fn extractors_for(&self, domain: &str) -> Vec<String> {
        self.chains
            .read()
            .await
            .get(&normalize_domain(domain))
            .map(|chain| chain.iter().map(|r| r.name.clone()).collect())
            .unwrap_or_default()
    }

    fn update_stats(&self, domain: &str, extractor: &str, f: impl FnOnce(&mut ExtractorStats)) {
        let mut stats = match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = stats
            .entry((domain.to_string(), extractor.to_string()))
            .or_insert_with(|| ExtractorStats {
                domain: domain.to_string(),
                extractor: extractor.to_string(),
                ..ExtractorStats::default()
            });
        f(entry);
    }

    pub fn stats_for(&self, domain: &str, extractor: &str) -> Option<ExtractorStats> {
        let stats = match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        stats
            .get(&(normalize_domain(domain), extractor.to_string()))
            .cloned()
    }

    /// All stats sorted by domain then extractor.
    pub fn stats(&self) -> Vec<ExtractorStats> {
        let stats = match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut all: Vec<ExtractorStats> = stats.values().cloned().collect();
        all.sort_by(|a, b| (&a.domain, &a.extractor).cmp(&(&b.domain, &b.extractor)));
        all
    }

    /// Run the source's extractor chain until one yields articles.
    ///
    /// An extractor that errors or returns nothing hands over to the next
    /// one in priority order.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No extractor is registered for the domain
    /// - Every extractor in the chain failed or came back empty
    #[instrument(level = "info", skip_all, fields(domain = %source.domain))]
    pub async fn scrape(&self, ctx: &ScrapeContext, source: &NewsSource) -> Result<ScrapeOutcome, ScraperError> {
        let domain = normalize_domain(&source.domain);
        let chain: Vec<(String, Arc<dyn Extractor>)> = self
            .chains
            .read()
            .await
            .get(&domain)
            .map(|chain| {
                chain
                    .iter()
                    .map(|r| (r.name.clone(), Arc::clone(&r.extractor)))
                    .collect()
            })
            .unwrap_or_default();

        if chain.is_empty() {
            return Err(ScraperError::NoExtractor { domain });
        }

        ctx.audit()
            .record(&domain, AuditAction::ScrapeStarted, Some(&source.base_url), "started", None)
            .await;

        let mut last_error = String::new();
        for (position, (name, extractor)) in chain.iter().enumerate() {
            let t0 = Instant::now();
            let result = extractor.extract(ctx, source).await;
            let elapsed_ms = t0.elapsed().as_millis() as u64;

            let error = match result {
                Ok(articles) if !articles.is_empty() => {
                    let used_fallback = position > 0;
                    self.update_stats(&domain, name, |s| {
                        s.attempts += 1;
                        s.successes += 1;
                        s.articles += articles.len() as u64;
                        s.total_duration_ms += elapsed_ms;
                        s.last_success = Some(Utc::now());
                        if used_fallback {
                            s.fallback_uses += 1;
                        }
                    });
                    ctx.monitor().record_articles(&domain, articles.len());
                    info!(extractor = %name, count = articles.len(), used_fallback, elapsed_ms, "Scrape succeeded");
                    ctx.audit()
                        .record(
                            &domain,
                            AuditAction::ScrapeCompleted,
                            Some(&source.base_url),
                            "completed",
                            Some(format!("{name}: {} articles", articles.len())),
                        )
                        .await;
                    return Ok(ScrapeOutcome {
                        domain,
                        extractor: name.clone(),
                        used_fallback,
                        articles,
                    });
                }
                Ok(_) => "no articles extracted".to_string(),
                Err(e) => e.to_string(),
            };

            warn!(extractor = %name, error = %error, elapsed_ms, "Extractor failed; trying next");
            self.update_stats(&domain, name, |s| {
                s.attempts += 1;
                s.failures += 1;
                s.total_duration_ms += elapsed_ms;
                s.last_error = Some(error.clone());
            });
            last_error = error;
        }

        ctx.audit()
            .record(
                &domain,
                AuditAction::ScrapeFailed,
                Some(&source.base_url),
                "failed",
                Some(last_error.clone()),
            )
            .await;
        Err(ScraperError::AllExtractorsFailed {
            domain,
            attempts: chain.len(),
            last_error,
        })
    }
}
