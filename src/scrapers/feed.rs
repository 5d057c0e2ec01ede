//! RSS/Atom feed extraction and the news-search fallback.

use super::html::readable_text;
use super::{Extractor, parse_date};
use crate::control::fetch::ScrapeContext;
use crate::error::ScraperError;
use crate::models::{NewsSource, ScrapedArticle};
use crate::utils::{collapse_whitespace, normalize_url};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use scraper::Html;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<String>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    summary: Option<String>,
    content: Option<String>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// One feed entry, format-independent.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub summary: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Text content of an HTML snippet (feed descriptions are often HTML).
pub fn strip_html(snippet: &str) -> String {
    let fragment = Html::parse_fragment(snippet);
    collapse_whitespace(&fragment.root_element().text().collect::<Vec<_>>().join(" "))
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| strip_html(&s)).filter(|s| !s.is_empty())
}

/// Parse an RSS 2.0 or Atom document. Entries without a title or link are dropped.
pub fn parse_feed(body: &str, url: &str) -> Result<Vec<FeedItem>, ScraperError> {
    let feed_err = |source| ScraperError::Feed {
        url: url.to_string(),
        source,
    };
    let head: String = body.chars().take(1024).collect();
    let is_atom = head.contains("<feed") && !head.contains("<rss");

    let items: Vec<FeedItem> = if is_atom {
        let feed: AtomFeed = quick_xml::de::from_str(body).map_err(feed_err)?;
        feed.entries
            .into_iter()
            .filter_map(|e| {
                let link = e
                    .links
                    .iter()
                    .find(|l| l.rel.as_deref().is_none_or(|r| r == "alternate"))
                    .or(e.links.first())
                    .map(|l| l.href.trim().to_string())?;
                Some(FeedItem {
                    title: non_empty(e.title)?,
                    link,
                    summary: non_empty(e.summary).or_else(|| non_empty(e.content)),
                    published_at: e
                        .published
                        .or(e.updated)
                        .and_then(|d| parse_date(&d)),
                })
            })
            .collect()
    } else {
        let rss: Rss = quick_xml::de::from_str(body).map_err(feed_err)?;
        rss.channel
            .items
            .into_iter()
            .filter_map(|item| {
                Some(FeedItem {
                    title: non_empty(item.title)?,
                    link: item.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty())?,
                    summary: non_empty(item.description),
                    published_at: item.pub_date.and_then(|d| parse_date(&d)),
                })
            })
            .collect()
    };
    Ok(items)
}

/// Body text of a fetched article page.
fn page_text(html: &str) -> Option<String> {
    readable_text(&Html::parse_document(html))
}

fn item_to_article(item: FeedItem, content: Option<String>) -> ScrapedArticle {
    let content = content
        .or_else(|| item.summary.clone())
        .unwrap_or_else(|| item.title.clone());
    ScrapedArticle {
        url: normalize_url(&item.link),
        title: item.title,
        summary: item.summary,
        content,
        published_at: item.published_at,
    }
}

/// Extractor reading a site's own RSS or Atom feed.
///
/// With `full_text` set, each linked page is fetched and its main text
/// replaces the feed summary; pages that fail keep the summary.
#[derive(Debug, Clone)]
pub struct FeedExtractor {
    name: String,
    feed_url: String,
    full_text: bool,
}

impl FeedExtractor {
    pub fn new(name: impl Into<String>, feed_url: impl Into<String>, full_text: bool) -> Self {
        Self {
            name: name.into(),
            feed_url: feed_url.into(),
            full_text,
        }
    }

    async fn article_for(&self, ctx: &ScrapeContext, item: FeedItem) -> ScrapedArticle {
        let url = normalize_url(&item.link);
        if let Some(cached) = ctx.cache().get_article(&url).await {
            return cached;
        }
        let content = if self.full_text {
            match ctx.fetch_page(&url).await {
                Ok(html) => page_text(&html),
                Err(e) => {
                    warn!(error = %e, %url, "Full-text fetch failed; using feed summary");
                    None
                }
            }
        } else {
            None
        };
        let article = item_to_article(item, content);
        ctx.cache().put_article(&article).await;
        article
    }
}

#[async_trait]
impl Extractor for FeedExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(level = "info", skip_all, fields(extractor = %self.name, domain = %source.domain))]
    async fn extract(&self, ctx: &ScrapeContext, source: &NewsSource) -> Result<Vec<ScrapedArticle>, ScraperError> {
        let body = ctx.fetch_feed(&self.feed_url).await?;
        let max_articles = ctx.config().for_domain(&source.domain).max_articles;
        let items: Vec<FeedItem> = parse_feed(&body, &self.feed_url)?
            .into_iter()
            .unique_by(|i| normalize_url(&i.link))
            .take(max_articles)
            .collect();
        info!(count = items.len(), feed = %self.feed_url, "Parsed feed");

        if items.is_empty() {
            return Err(ScraperError::NoContent {
                url: self.feed_url.clone(),
            });
        }

        let articles: Vec<ScrapedArticle> = stream::iter(items)
            .then(|item| self.article_for(ctx, item))
            .collect()
            .await;
        Ok(articles)
    }
}

/// Google News RSS search scoped to one site.
pub fn news_search_url(domain: &str, query: &str) -> String {
    let q = format!("site:{domain} {query}");
    format!(
        "https://news.google.com/rss/search?q={}&hl=en-US&gl=US&ceid=US:en",
        urlencoding::encode(&q)
    )
}

/// Last-resort extractor: headlines and snippets from a news search feed.
///
/// Links point at the search provider's redirect, so article pages are not
/// fetched; summaries become the content.
#[derive(Debug, Clone)]
pub struct SearchFeedExtractor {
    name: String,
    query: String,
}

impl SearchFeedExtractor {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
        }
    }
}

#[async_trait]
impl Extractor for SearchFeedExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(level = "info", skip_all, fields(extractor = %self.name, domain = %source.domain))]
    async fn extract(&self, ctx: &ScrapeContext, source: &NewsSource) -> Result<Vec<ScrapedArticle>, ScraperError> {
        let url = news_search_url(&source.domain, &self.query);
        let body = ctx.fetch_feed(&url).await?;
        let max_articles = ctx.config().for_domain(&source.domain).max_articles;

        let articles: Vec<ScrapedArticle> = parse_feed(&body, &url)?
            .into_iter()
            .unique_by(|i| normalize_url(&i.link))
            .take(max_articles)
            .map(|item| item_to_article(item, None))
            .collect();
        debug!(count = articles.len(), "Search results");

        if articles.is_empty() {
            return Err(ScraperError::NoContent { url });
        }
        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::fetch::testing::{StubSource, context};
    use crate::models::SourceCompliance;
    use chrono::Datelike;
    use std::sync::Arc;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>Medical Xpress - breast cancer</title>
    <link>https://medicalxpress.com/</link>
    <item>
      <title>AI model spots &amp; ranks mammogram findings</title>
      <link>https://medicalxpress.com/news/2025-03-ai-mammogram.html</link>
      <description><![CDATA[<p>A new <b>deep learning</b> model improves screening.</p>]]></description>
      <pubDate>Tue, 04 Mar 2025 10:30:00 GMT</pubDate>
    </item>
    <item>
      <title>Exercise after chemotherapy</title>
      <link>https://medicalxpress.com/news/2025-03-exercise.html</link>
    </item>
    <item>
      <title></title>
      <link>https://medicalxpress.com/news/untitled.html</link>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Cure Today</title>
  <entry>
    <title>Survivorship care plans</title>
    <link rel="alternate" href="https://www.curetoday.com/view/survivorship"/>
    <summary>Plans help patients after treatment.</summary>
    <updated>2025-01-15T08:00:00Z</updated>
  </entry>
</feed>"#;

    fn source() -> NewsSource {
        NewsSource {
            id: 4,
            name: "Medical Xpress".to_string(),
            base_url: "https://medicalxpress.com/".to_string(),
            domain: "medicalxpress.com".to_string(),
            language: "en".to_string(),
            country: "US".to_string(),
            compliance: SourceCompliance::default(),
        }
    }

    #[test]
    fn test_parse_rss() {
        let items = parse_feed(RSS, "https://medicalxpress.com/rss").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "AI model spots & ranks mammogram findings");
        assert_eq!(items[0].summary.as_deref(), Some("A new deep learning model improves screening."));
        assert_eq!(items[0].published_at.unwrap().day(), 4);
        assert_eq!(items[1].summary, None);
    }

    #[test]
    fn test_parse_atom() {
        let items = parse_feed(ATOM, "https://www.curetoday.com/feed").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].link, "https://www.curetoday.com/view/survivorship");
        assert_eq!(items[0].published_at.unwrap().month(), 1);
    }

    #[test]
    fn test_parse_garbage_is_feed_error() {
        let err = parse_feed("<rss><channel><item>", "https://x.test/rss").unwrap_err();
        assert!(matches!(err, ScraperError::Feed { .. }));
    }

    #[test]
    fn test_news_search_url_is_site_scoped() {
        let url = news_search_url("cancer.gov", "breast cancer");
        assert!(url.starts_with("https://news.google.com/rss/search?q="));
        assert!(url.contains("site%3Acancer.gov%20breast%20cancer"));
    }

    #[tokio::test]
    async fn test_feed_extractor_full_text_falls_back_to_summary() {
        let body = format!("<html><body><article><p>{}</p></article></body></html>", "Aerobic exercise helps. ".repeat(20));
        let stub = Arc::new(
            StubSource::new()
                .with("https://medicalxpress.com/rss", 200, RSS)
                .with("https://medicalxpress.com/news/2025-03-exercise.html", 200, &body),
        );
        let ctx = context(stub);
        let extractor = FeedExtractor::new("medicalxpress.com/rss", "https://medicalxpress.com/rss", true);

        let articles = extractor.extract(&ctx, &source()).await.unwrap();
        assert_eq!(articles.len(), 2);
        // first page 404s, summary is kept
        assert_eq!(articles[0].content, "A new deep learning model improves screening.");
        assert!(articles[1].content.starts_with("Aerobic exercise helps."));
    }

    #[tokio::test]
    async fn test_search_extractor_uses_snippets() {
        let url = news_search_url("medicalxpress.com", "breast cancer");
        let stub = Arc::new(StubSource::new().with(&url, 200, RSS));
        let ctx = context(Arc::clone(&stub));
        let extractor = SearchFeedExtractor::new("medicalxpress.com/news-search", "breast cancer");

        let articles = extractor.extract(&ctx, &source()).await.unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[1].content, "Exercise after chemotherapy");
        assert_eq!(stub.requests().len(), 2); // robots.txt + feed
    }

    #[tokio::test]
    async fn test_empty_feed_is_no_content() {
        let stub = Arc::new(StubSource::new().with("https://medicalxpress.com/rss", 200, "<rss><channel></channel></rss>"));
        let ctx = context(stub);
        let extractor = FeedExtractor::new("medicalxpress.com/rss", "https://medicalxpress.com/rss", false);
        let err = extractor.extract(&ctx, &source()).await.unwrap_err();
        assert!(matches!(err, ScraperError::NoContent { .. }));
    }
}
