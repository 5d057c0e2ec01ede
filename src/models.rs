//! Data models for news sources, scraped articles and their analysis.
//!
//! This module defines the core data structures used throughout the application:
//! - [`NewsSource`]: A monitored site with its compliance metadata
//! - [`ScrapedArticle`]: Raw article data as returned by an extractor
//! - [`Article`]: Normalized, analyzed article record
//! - [`ArticleKeyword`]: Keyword hits attached to an article
//! - [`ComplianceAuditEntry`]: One row of the append-only compliance log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Legal/robots metadata tracked per source.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SourceCompliance {
    pub robots_txt_url: Option<String>,
    pub robots_checked_at: Option<DateTime<Utc>>,
    pub scraping_allowed: Option<bool>,
    pub terms_of_service_url: Option<String>,
    pub legal_basis: String,
}

/// A news site the pipeline scrapes.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NewsSource {
    pub id: u32,
    pub name: String,
    pub base_url: String,
    /// Normalized host, used as the key for all per-domain state.
    pub domain: String,
    pub language: String,
    pub country: String,
    pub compliance: SourceCompliance,
}

/// An article as produced by an extractor, before analysis.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScrapedArticle {
    pub url: String,
    pub title: String,
    pub summary: Option<String>,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Analyzed,
    Failed,
    /// Soft-deleted or excluded from downstream use.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicCategory {
    Treatment,
    Diagnosis,
    Research,
    Prevention,
    Genetics,
    Surgery,
    Lifestyle,
    General,
}

impl TopicCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Treatment => "treatment",
            Self::Diagnosis => "diagnosis",
            Self::Research => "research",
            Self::Prevention => "prevention",
            Self::Genetics => "genetics",
            Self::Surgery => "surgery",
            Self::Lifestyle => "lifestyle",
            Self::General => "general",
        }
    }
}

impl fmt::Display for TopicCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized, analyzed article.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Article {
    pub id: u64,
    pub source_id: u32,
    pub title: String,
    /// Unique across the article set.
    pub url: String,
    pub summary: Option<String>,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub scraped_at: DateTime<Utc>,
    pub sentiment_score: Option<f64>,
    pub sentiment_label: Option<SentimentLabel>,
    pub topic_category: Option<TopicCategory>,
    pub processing_status: ProcessingStatus,
    pub content_hash: String,
    /// Name of the extractor that produced the article.
    pub extractor: String,
}

/// Keyword occurrences for one article.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ArticleKeyword {
    pub article_id: u64,
    pub keyword: String,
    pub category: TopicCategory,
    pub occurrences: usize,
    /// Weighted score contribution of this keyword.
    pub relevance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    RobotsChecked,
    UrlBlocked,
    ScrapeStarted,
    ScrapeCompleted,
    ScrapeFailed,
    ArticleSkipped,
}

/// One entry in the compliance audit log.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ComplianceAuditEntry {
    pub timestamp: DateTime<Utc>,
    pub domain: String,
    pub action: AuditAction,
    pub url: Option<String>,
    pub outcome: String,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_article() -> Article {
        Article {
            id: 1,
            source_id: 2,
            title: "New trial for HER2-positive breast cancer".to_string(),
            url: "https://www.cancer.gov/news-events/trial".to_string(),
            summary: None,
            content: "Body".to_string(),
            published_at: None,
            scraped_at: Utc::now(),
            sentiment_score: Some(0.42),
            sentiment_label: Some(SentimentLabel::Positive),
            topic_category: Some(TopicCategory::Treatment),
            processing_status: ProcessingStatus::Analyzed,
            content_hash: "abc".to_string(),
            extractor: "cancer.gov/html".to_string(),
        }
    }

    #[test]
    fn test_article_serialization_uses_snake_case_enums() {
        let json = serde_json::to_string(&sample_article()).unwrap();
        assert!(json.contains(r#""sentiment_label":"positive""#));
        assert!(json.contains(r#""topic_category":"treatment""#));
        assert!(json.contains(r#""processing_status":"analyzed""#));
    }

    #[test]
    fn test_article_deserialization() {
        let json = serde_json::to_string(&sample_article()).unwrap();
        let back: Article = serde_json::from_str(&json).unwrap();
        assert_eq!(back.url, "https://www.cancer.gov/news-events/trial");
        assert_eq!(back.topic_category, Some(TopicCategory::Treatment));
    }

    #[test]
    fn test_audit_action_serialization() {
        let json = serde_json::to_string(&AuditAction::RobotsChecked).unwrap();
        assert_eq!(json, r#""robots_checked""#);
    }

    #[test]
    fn test_topic_category_display() {
        assert_eq!(TopicCategory::Genetics.to_string(), "genetics");
    }
}
