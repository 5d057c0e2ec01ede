//! Typed error hierarchy.
//!
//! [`PreventiaError`] is the root; each subsystem has its own enum so call
//! sites can match on the failures they actually handle (a rate-limit denial
//! is retried later, a robots.txt block is audited and skipped, and so on).

use std::time::Duration;
use thiserror::Error;

/// Errors raised while fetching or extracting articles.
#[derive(Debug, Error)]
pub enum ScraperError {
    /// Transport-level failure (DNS, TLS, connection reset, timeout).
    #[error("HTTP error for {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status.
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    /// Rate limiter denied the request because the required wait was too long.
    #[error("rate limited on {domain}; retry after {retry_after:?}")]
    RateLimited { domain: String, retry_after: Duration },

    /// robots.txt disallows the URL for our user agent.
    #[error("robots.txt disallows {url}")]
    RobotsDisallowed { url: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid selector `{selector}`")]
    Selector { selector: String },

    #[error("failed to parse feed from {url}: {source}")]
    Feed {
        url: String,
        #[source]
        source: quick_xml::DeError,
    },

    /// Extractor ran but produced nothing usable.
    #[error("no content extracted from {url}")]
    NoContent { url: String },

    #[error("no extractor registered for {domain}")]
    NoExtractor { domain: String },

    /// Primary and every fallback failed.
    #[error("all {attempts} extractors failed for {domain}: {last_error}")]
    AllExtractorsFailed {
        domain: String,
        attempts: usize,
        last_error: String,
    },
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

/// Errors raised while generating or publishing a newsletter.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("LLM request failed: {0}")]
    Llm(String),

    #[error("LLM returned an empty completion")]
    EmptyCompletion,

    #[error("WordPress request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WordPress rejected the post with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("publisher is not configured: missing {0}")]
    NotConfigured(&'static str),

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Root error type for the application.
#[derive(Debug, Error)]
pub enum PreventiaError {
    #[error(transparent)]
    Scraper(#[from] ScraperError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_message_names_domain() {
        let err = ScraperError::RateLimited {
            domain: "cancer.gov".to_string(),
            retry_after: Duration::from_secs(3),
        };
        assert!(err.to_string().contains("cancer.gov"));
    }

    #[test]
    fn test_scraper_error_converts_to_root() {
        let err: PreventiaError = ScraperError::NoExtractor {
            domain: "webmd.com".to_string(),
        }
        .into();
        assert!(matches!(err, PreventiaError::Scraper(_)));
        assert_eq!(err.to_string(), "no extractor registered for webmd.com");
    }
}
