//! URL-keyed cache for fetched pages, feeds and extracted articles.
//!
//! Entries are keyed by `"{content_type}:{sha256(normalized url)}"` so the
//! same story reached through `/story/` and `/story#comments` is stored once.
//! Each content type has its own TTL:
//!
//! | Content type | Default TTL |
//! |--------------|-------------|
//! | article      | 1 week      |
//! | page HTML    | 6 hours     |
//! | feed / index | 1 hour      |
//!
//! Values are stored as JSON strings so any serializable type fits.

use crate::config::CacheSettings;
use crate::models::ScrapedArticle;
use crate::utils::url_hash;
use moka::Expiry;
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Article,
    PageHtml,
    Feed,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [Self::Article, Self::PageHtml, Self::Feed];

    fn prefix(&self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::PageHtml => "page",
            Self::Feed => "feed",
        }
    }
}

#[derive(Clone)]
struct CacheEntry {
    data: Arc<String>,
    ttl: Duration,
}

/// Per-entry expiry: each entry carries the TTL of its content type.
struct EntryTtl;

impl Expiry<String, CacheEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub hit_ratio: f64,
}

#[derive(Debug, Clone, Copy)]
struct Ttls {
    article: Duration,
    page: Duration,
    feed: Duration,
}

/// Process-local cache shared by every scraping task.
pub struct CacheManager {
    cache: Cache<String, CacheEntry>,
    ttls: Ttls,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("entry_count", &self.cache.entry_count())
            .field("ttls", &self.ttls)
            .finish()
    }
}

impl CacheManager {
    /// Build the cache from the `cache` config section.
    ///
    /// # Arguments
    ///
    /// * `settings` - Capacity and per-type TTLs in seconds
    ///
    /// # Returns
    ///
    /// An empty cache with zeroed hit/miss counters.
    pub fn new(settings: &CacheSettings) -> Self {
        Self::with_ttls(
            settings.max_capacity,
            Duration::from_secs(settings.article_ttl_seconds),
            Duration::from_secs(settings.page_ttl_seconds),
            Duration::from_secs(settings.feed_ttl_seconds),
        )
    }

    pub fn with_ttls(max_capacity: u64, article: Duration, page: Duration, feed: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryTtl)
            .build();
        Self {
            cache,
            ttls: Ttls {
                article,
                page,
                feed,
            },
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl_for(&self, content_type: ContentType) -> Duration {
        match content_type {
            ContentType::Article => self.ttls.article,
            ContentType::PageHtml => self.ttls.page,
            ContentType::Feed => self.ttls.feed,
        }
    }

    pub fn key(content_type: ContentType, url: &str) -> String {
        format!("{}:{}", content_type.prefix(), url_hash(url))
    }

    async fn get_json<T: DeserializeOwned>(&self, content_type: ContentType, url: &str) -> Option<T> {
        let key = Self::key(content_type, url);
        match self.cache.get(&key).await {
            Some(entry) => match serde_json::from_str(&entry.data) {
                Ok(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(%url, ?content_type, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    warn!(%url, error = %e, "Dropping undecodable cache entry");
                    self.cache.invalidate(&key).await;
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn put_json<T: Serialize>(&self, content_type: ContentType, url: &str, value: &T) {
        let data = match serde_json::to_string(value) {
            Ok(data) => data,
            Err(e) => {
                warn!(%url, error = %e, "Failed to serialize cache value");
                return;
            }
        };
        let entry = CacheEntry {
            data: Arc::new(data),
            ttl: self.ttl_for(content_type),
        };
        self.cache.insert(Self::key(content_type, url), entry).await;
    }

    pub async fn get_page(&self, url: &str) -> Option<String> {
        self.get_json(ContentType::PageHtml, url).await
    }

    pub async fn put_page(&self, url: &str, html: &str) {
        self.put_json(ContentType::PageHtml, url, &html).await
    }

    pub async fn get_feed(&self, url: &str) -> Option<String> {
        self.get_json(ContentType::Feed, url).await
    }

    pub async fn put_feed(&self, url: &str, body: &str) {
        self.put_json(ContentType::Feed, url, &body).await
    }

    pub async fn get_article(&self, url: &str) -> Option<ScrapedArticle> {
        self.get_json(ContentType::Article, url).await
    }

    pub async fn put_article(&self, article: &ScrapedArticle) {
        self.put_json(ContentType::Article, &article.url, article).await
    }

    /// Whether an article for `url` was stored within its TTL.
    /// Does not count towards hit/miss stats.
    pub fn seen_article(&self, url: &str) -> bool {
        self.cache.contains_key(&Self::key(ContentType::Article, url))
    }

    /// Drop every cached representation of `url`.
    pub async fn invalidate(&self, url: &str) {
        for content_type in ContentType::ALL {
            self.cache.invalidate(&Self::key(content_type, url)).await;
        }
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.run_pending_tasks().await;
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            entries: self.cache.entry_count(),
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}
