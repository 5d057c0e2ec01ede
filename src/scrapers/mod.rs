//! Per-site article extractors.
//!
//! Every site gets a chain of extractors registered in the
//! [`ScraperRegistry`](crate::control::registry::ScraperRegistry):
//!
//! | Kind | Module | Method | Notes |
//! |------|--------|--------|-------|
//! | HTML | [`html`] | CSS selectors on an index page | Primary for most sites |
//! | RSS/Atom | [`feed`] | Site feed | First fallback where a feed exists |
//! | News search | [`feed`] | Google News RSS, `site:` scoped | Last resort; summaries only |
//!
//! Extractors fetch exclusively through [`ScrapeContext`], so rate limiting,
//! caching, robots.txt and timing apply to all of them alike. Article pages
//! that fail are logged and skipped; an extractor only errors when it could
//! not produce a single article.

pub mod feed;
pub mod html;
pub mod sites;

use crate::control::fetch::ScrapeContext;
use crate::error::ScraperError;
use crate::models::{NewsSource, ScrapedArticle};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// One way of pulling articles out of a site.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Stable identifier, unique per domain (e.g. `cancer.gov/html`).
    fn name(&self) -> &str;

    async fn extract(
        &self,
        ctx: &ScrapeContext,
        source: &NewsSource,
    ) -> Result<Vec<ScrapedArticle>, ScraperError>;
}

/// Parse the date formats seen in article metadata and feeds.
///
/// Handles RFC 3339, RFC 2822, `YYYY-MM-DD[ HH:MM:SS]` and long-form English
/// dates such as `March 4, 2025`. Naive values are taken as UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}
