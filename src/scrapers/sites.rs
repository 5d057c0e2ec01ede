//! Built-in news sources and their extractor chains.

use super::feed::{FeedExtractor, SearchFeedExtractor};
use super::html::{SelectorExtractor, SiteSelectors};
use crate::control::registry::ScraperRegistry;
use crate::models::{NewsSource, SourceCompliance};
use crate::utils::{domain_of, normalize_domain};
use std::sync::Arc;
use tracing::info;

pub const HTML_PRIORITY: u32 = 10;
pub const FEED_PRIORITY: u32 = 20;
pub const SEARCH_PRIORITY: u32 = 90;

/// Topic query appended to site-scoped news searches.
pub const SEARCH_QUERY: &str = "breast cancer";

/// A source plus how to scrape it.
#[derive(Debug, Clone)]
pub struct SiteDefinition {
    pub source: NewsSource,
    pub selectors: Option<SiteSelectors>,
    pub feed_url: Option<String>,
}

struct Site {
    name: &'static str,
    base_url: &'static str,
    index_url: &'static str,
    link: &'static str,
    link_pattern: &'static str,
    title: &'static str,
    body: &'static str,
    date: &'static str,
    feed_url: Option<&'static str>,
}

const SITES: &[Site] = &[
    Site {
        name: "Breastcancer.org",
        base_url: "https://www.breastcancer.org",
        index_url: "https://www.breastcancer.org/research-news",
        link: "a[href*='/research-news/']",
        link_pattern: r"^/research-news/[^/]+$",
        title: "h1",
        body: ".article-body, .content-body",
        date: "time",
        feed_url: None,
    },
    Site {
        name: "National Cancer Institute",
        base_url: "https://www.cancer.gov",
        index_url: "https://www.cancer.gov/news-events/cancer-currents-blog",
        link: "a[href*='/news-events/cancer-currents-blog/20']",
        link_pattern: r"^/news-events/cancer-currents-blog/\d{4}/",
        title: "h1",
        body: "#cgvBody, .cgdp-article-body",
        date: ".document-dates time, time",
        feed_url: Some("https://www.cancer.gov/syndication/rss"),
    },
    Site {
        name: "WebMD",
        base_url: "https://www.webmd.com",
        index_url: "https://www.webmd.com/breast-cancer/news-features",
        link: "a[href*='/breast-cancer/news/']",
        link_pattern: r"^/breast-cancer/news/\d{8}/",
        title: "h1",
        body: ".article-body, .article__body",
        date: ".article-info time, time",
        feed_url: None,
    },
    Site {
        name: "Medical Xpress",
        base_url: "https://medicalxpress.com",
        index_url: "https://medicalxpress.com/cancer-news/breast-cancer/",
        link: "article h2 a, h3 a",
        link_pattern: r"^/news/\d{4}-\d{2}-",
        title: "h1",
        body: ".article-main, .article__content",
        date: "p.article__info-item, time",
        feed_url: Some("https://medicalxpress.com/rss-feed/breaking/cancer-news/"),
    },
    Site {
        name: "ScienceDaily",
        base_url: "https://www.sciencedaily.com",
        index_url: "https://www.sciencedaily.com/news/health_medicine/breast_cancer/",
        link: "#featured_blurbs a, #headlines a",
        link_pattern: r"^/releases/\d{4}/\d{2}/",
        title: "h1#headline",
        body: "#story_text, #text",
        date: "#date_posted",
        feed_url: Some("https://www.sciencedaily.com/rss/health_medicine/breast_cancer.xml"),
    },
    Site {
        name: "News-Medical",
        base_url: "https://www.news-medical.net",
        index_url: "https://www.news-medical.net/condition/Breast-Cancer",
        link: "h3 a, .posts a",
        link_pattern: r"^/news/\d{8}/",
        title: "h1",
        body: ".content, .article-content",
        date: ".article-meta-date, time",
        feed_url: Some("https://www.news-medical.net/syndication.axd?format=rss"),
    },
    Site {
        name: "CURE",
        base_url: "https://www.curetoday.com",
        index_url: "https://www.curetoday.com/clinical/breast-cancer",
        link: "a[href^='/view/']",
        link_pattern: r"^/view/",
        title: "h1",
        body: "#block-content, .article-body",
        date: "time",
        feed_url: Some("https://www.curetoday.com/rss"),
    },
    Site {
        name: "Healthline",
        base_url: "https://www.healthline.com",
        index_url: "https://www.healthline.com/health/breast-cancer",
        link: "a[href*='/health/breast-cancer/']",
        link_pattern: r"^/health/breast-cancer/[^/]+$",
        title: "h1",
        body: "article, .article-body",
        date: "time",
        feed_url: None,
    },
];

/// Definitions for every built-in site, ids starting at 1.
pub fn builtin_sites() -> Vec<SiteDefinition> {
    SITES
        .iter()
        .enumerate()
        .map(|(i, site)| {
            let domain = domain_of(site.base_url).unwrap_or_else(|| normalize_domain(site.base_url));
            let source = NewsSource {
                id: i as u32 + 1,
                name: site.name.to_string(),
                base_url: site.base_url.to_string(),
                domain,
                language: "en".to_string(),
                country: "US".to_string(),
                compliance: SourceCompliance {
                    robots_txt_url: Some(format!("{}/robots.txt", site.base_url)),
                    legal_basis: "fair use; public health research".to_string(),
                    ..SourceCompliance::default()
                },
            };
            SiteDefinition {
                source,
                selectors: Some(SiteSelectors {
                    index_url: site.index_url.to_string(),
                    link: site.link.to_string(),
                    link_pattern: Some(site.link_pattern.to_string()),
                    title: site.title.to_string(),
                    body: site.body.to_string(),
                    date: Some(site.date.to_string()),
                }),
                feed_url: site.feed_url.map(str::to_string),
            }
        })
        .collect()
}

/// Register the extractor chain for each site: selectors first, then the
/// site feed, then the news-search fallback.
pub async fn register_sites(registry: &ScraperRegistry, sites: &[SiteDefinition]) {
    for site in sites {
        let domain = &site.source.domain;
        if let Some(selectors) = &site.selectors {
            registry
                .register(
                    domain,
                    Arc::new(SelectorExtractor::new(format!("{domain}/html"), selectors.clone())),
                    HTML_PRIORITY,
                )
                .await;
        }
        if let Some(feed_url) = &site.feed_url {
            registry
                .register(
                    domain,
                    Arc::new(FeedExtractor::new(format!("{domain}/rss"), feed_url.clone(), true)),
                    FEED_PRIORITY,
                )
                .await;
        }
        registry
            .register(
                domain,
                Arc::new(SearchFeedExtractor::new(format!("{domain}/news-search"), SEARCH_QUERY)),
                SEARCH_PRIORITY,
            )
            .await;
    }
    info!(sites = sites.len(), "Registered built-in extractors");
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;
    use crate::utils::robots_url_of;

    #[test]
    fn test_builtin_sites_are_well_formed() {
        let sites = builtin_sites();
        assert_eq!(sites.len(), 8);
        let domains: Vec<&str> = sites.iter().map(|s| s.source.domain.as_str()).collect();
        assert!(domains.contains(&"cancer.gov"));
        assert!(domains.contains(&"breastcancer.org"));
        for site in &sites {
            let sel = site.selectors.as_ref().unwrap();
            for raw in [&sel.link, &sel.title, &sel.body] {
                assert!(Selector::parse(raw).is_ok(), "bad selector {raw}");
            }
            assert!(regex::Regex::new(sel.link_pattern.as_deref().unwrap()).is_ok());
            let base = url::Url::parse(&site.source.base_url).unwrap();
            assert_eq!(robots_url_of(&base), format!("{}/robots.txt", site.source.base_url));
        }
    }

    #[tokio::test]
    async fn test_register_sites_builds_chains() {
        let registry = ScraperRegistry::new();
        register_sites(&registry, &builtin_sites()).await;
        assert_eq!(registry.domains().await.len(), 8);
        assert_eq!(
            registry.extractors_for("cancer.gov").await,
            vec!["cancer.gov/html", "cancer.gov/rss", "cancer.gov/news-search"]
        );
        assert_eq!(
            registry.extractors_for("webmd.com").await,
            vec!["webmd.com/html", "webmd.com/news-search"]
        );
    }
}
