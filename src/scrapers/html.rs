//! CSS-selector driven extraction from a site's listing page.
//!
//! The listing (index) page is scanned for article links; each article page
//! is then parsed for title, body text, summary and publication date.
//! Missing pieces fall back to page metadata:
//!
//! - title: selector → `og:title` → first `<h1>` → `<title>`
//! - body: selector → `article`, `main`, `.entry-content`, `.post-content`,
//!   `#content` → every `<p>`
//! - date: selector (`datetime` attribute or text) → `article:published_time`
//!   → JSON-LD `datePublished`

use super::{Extractor, parse_date};
use crate::control::fetch::ScrapeContext;
use crate::error::ScraperError;
use crate::models::{NewsSource, ScrapedArticle};
use crate::utils::{collapse_whitespace, normalize_url};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Body shorter than this is treated as a failed extraction.
const MIN_BODY_CHARS: usize = 200;

static FALLBACK_BODY_SELECTORS: &[&str] = &["article", "main", ".entry-content", ".post-content", "#content"];

static JSON_LD_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""datePublished"\s*:\s*"([^"]+)""#).expect("valid regex"));

/// Selectors describing one site's layout.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteSelectors {
    pub index_url: String,
    /// Anchors on the index page that point to articles.
    pub link: String,
    /// Only links whose path matches are kept.
    pub link_pattern: Option<String>,
    pub title: String,
    pub body: String,
    pub date: Option<String>,
}

fn selector(raw: &str) -> Result<Selector, ScraperError> {
    Selector::parse(raw).map_err(|_| ScraperError::Selector {
        selector: raw.to_string(),
    })
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

fn meta_content(doc: &Html, names: &[&str]) -> Option<String> {
    let sel = Selector::parse("meta").ok()?;
    doc.select(&sel).find_map(|m| {
        let key = m
            .value()
            .attr("property")
            .or_else(|| m.value().attr("name"))?
            .to_lowercase();
        if names.contains(&key.as_str()) {
            m.value()
                .attr("content")
                .map(collapse_whitespace)
                .filter(|c| !c.is_empty())
        } else {
            None
        }
    })
}

fn first_text(doc: &Html, raw_selector: &str) -> Option<String> {
    let sel = Selector::parse(raw_selector).ok()?;
    doc.select(&sel)
        .map(element_text)
        .find(|t| !t.is_empty())
}

/// Paragraph-aware text of the first matching container.
fn container_text(doc: &Html, raw_selector: &str) -> Option<String> {
    let sel = Selector::parse(raw_selector).ok()?;
    let p = Selector::parse("p").ok()?;
    for container in doc.select(&sel) {
        let paragraphs: Vec<String> = container
            .select(&p)
            .map(element_text)
            .filter(|t| !t.is_empty())
            .collect();
        let text = if paragraphs.is_empty() {
            element_text(container)
        } else {
            paragraphs.join("\n\n")
        };
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

/// Best-effort main text of a page when no site selector matched.
pub fn readable_text(doc: &Html) -> Option<String> {
    for raw in FALLBACK_BODY_SELECTORS {
        if let Some(text) = container_text(doc, raw) {
            if text.len() >= MIN_BODY_CHARS {
                return Some(text);
            }
        }
    }
    let p = Selector::parse("p").ok()?;
    let all = doc
        .select(&p)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .join("\n\n");
    (!all.is_empty()).then_some(all)
}

/// Collect article URLs from a listing page.
pub fn parse_index(html: &str, base: &Url, selectors: &SiteSelectors) -> Result<Vec<String>, ScraperError> {
    let document = Html::parse_document(html);
    let link_selector = selector(&selectors.link)?;
    let pattern = match &selectors.link_pattern {
        Some(p) => Some(Regex::new(p).map_err(|_| ScraperError::Selector { selector: p.clone() })?),
        None => None,
    };

    let urls = document
        .select(&link_selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .filter(|u| pattern.as_ref().is_none_or(|re| re.is_match(u.path())))
        .map(|u| normalize_url(u.as_str()))
        .filter(|u| u != &normalize_url(base.as_str()))
        .unique()
        .collect();
    Ok(urls)
}

/// Parse a single article page. Returns `None` when no usable body is found.
pub fn parse_article(html: &str, url: &str, selectors: &SiteSelectors) -> Option<ScrapedArticle> {
    let document = Html::parse_document(html);

    let title = first_text(&document, &selectors.title)
        .or_else(|| meta_content(&document, &["og:title", "twitter:title"]))
        .or_else(|| first_text(&document, "h1"))
        .or_else(|| first_text(&document, "title"))?;

    let content = container_text(&document, &selectors.body)
        .filter(|t| t.len() >= MIN_BODY_CHARS)
        .or_else(|| readable_text(&document))?;

    let published_at = selectors
        .date
        .as_deref()
        .and_then(|raw| Selector::parse(raw).ok())
        .and_then(|sel| {
            document.select(&sel).find_map(|el| {
                el.value()
                    .attr("datetime")
                    .and_then(parse_date)
                    .or_else(|| parse_date(&element_text(el)))
            })
        })
        .or_else(|| meta_content(&document, &["article:published_time", "pubdate", "date"]).and_then(|d| parse_date(&d)))
        .or_else(|| {
            JSON_LD_DATE
                .captures(html)
                .and_then(|c| c.get(1))
                .and_then(|m| parse_date(m.as_str()))
        });

    let summary = meta_content(&document, &["description", "og:description", "twitter:description"]);

    Some(ScrapedArticle {
        url: url.to_string(),
        title,
        summary,
        content,
        published_at,
    })
}

/// Extractor for sites with a stable listing page layout.
#[derive(Debug, Clone)]
pub struct SelectorExtractor {
    name: String,
    selectors: SiteSelectors,
}

impl SelectorExtractor {
    pub fn new(name: impl Into<String>, selectors: SiteSelectors) -> Self {
        Self {
            name: name.into(),
            selectors,
        }
    }

    async fn fetch_article(&self, ctx: &ScrapeContext, url: &str) -> Result<Option<ScrapedArticle>, ScraperError> {
        if let Some(article) = ctx.cache().get_article(url).await {
            return Ok(Some(article));
        }
        let body = ctx.fetch_page(url).await?;
        let article = parse_article(&body, url, &self.selectors);
        if let Some(article) = &article {
            ctx.cache().put_article(article).await;
        }
        Ok(article)
    }
}

#[async_trait]
impl Extractor for SelectorExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(level = "info", skip_all, fields(extractor = %self.name, domain = %source.domain))]
    async fn extract(&self, ctx: &ScrapeContext, source: &NewsSource) -> Result<Vec<ScrapedArticle>, ScraperError> {
        let base = Url::parse(&self.selectors.index_url)?;
        let index_html = ctx.fetch_page(base.as_str()).await?;
        let max_articles = ctx.config().for_domain(&source.domain).max_articles;

        let mut urls = parse_index(&index_html, &base, &self.selectors)?;
        urls.truncate(max_articles);
        info!(count = urls.len(), index = %base, "Indexed article URLs");
        debug!(urls = ?urls, "Article URLs");

        if urls.is_empty() {
            return Err(ScraperError::NoContent { url: base.to_string() });
        }

        let articles: Vec<ScrapedArticle> = stream::iter(urls)
            .then(|url: String| async move {
                match self.fetch_article(ctx, &url).await {
                    Ok(Some(article)) => {
                        debug!(%url, "Fetched article");
                        Some(article)
                    }
                    Ok(None) => {
                        warn!(%url, "Article page produced no content");
                        None
                    }
                    Err(e) => {
                        warn!(error = %e, %url, "Article fetch failed");
                        None
                    }
                }
            })
            .filter_map(std::future::ready)
            .collect()
            .await;

        info!(count = articles.len(), "Extracted articles");
        if articles.is_empty() {
            return Err(ScraperError::NoContent { url: base.to_string() });
        }
        Ok(articles)
    }
}
