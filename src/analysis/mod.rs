//! Per-article scoring: sentiment plus keyword relevance and topic.

pub mod keywords;
pub mod sentiment;

use crate::config::AnalysisSettings;
use crate::models::{Article, ArticleKeyword, ProcessingStatus, ScrapedArticle};
use crate::utils::{collapse_whitespace, content_hash, normalize_url};
use chrono::Utc;
use keywords::KeywordAnalyzer;
use sentiment::{SentimentAnalyzer, SentimentScore};
use serde::Serialize;
use tracing::debug;

/// An article together with everything the analysis produced for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzedArticle {
    pub article: Article,
    pub keywords: Vec<ArticleKeyword>,
    /// Keyword occurrences, title hits counted double.
    pub keyword_hits: usize,
    pub keyword_score: f64,
    pub sentiment: SentimentScore,
}

#[derive(Debug, Clone, Default)]
pub struct ArticleAnalyzer {
    sentiment: SentimentAnalyzer,
    keywords: KeywordAnalyzer,
}

impl ArticleAnalyzer {
    pub fn new(settings: &AnalysisSettings) -> Self {
        Self {
            sentiment: SentimentAnalyzer::new(settings),
            keywords: KeywordAnalyzer::new(),
        }
    }

    pub fn analyze(&self, id: u64, source_id: u32, extractor: &str, scraped: ScrapedArticle) -> AnalyzedArticle {
        let title = collapse_whitespace(&scraped.title);
        let (sentiment, label) = self.sentiment.analyze_article(&title, &scraped.content);
        let keyword_analysis = self.keywords.analyze(&title, &scraped.content);

        let keywords: Vec<ArticleKeyword> = keyword_analysis
            .hits
            .iter()
            .map(|hit| ArticleKeyword {
                article_id: id,
                keyword: hit.keyword.clone(),
                category: hit.category,
                occurrences: hit.occurrences(),
                relevance: hit.relevance,
            })
            .collect();

        debug!(
            id,
            compound = sentiment.compound,
            %label,
            topic = %keyword_analysis.topic,
            hits = keyword_analysis.weighted_hits,
            "Analyzed article"
        );

        let article = Article {
            id,
            source_id,
            content_hash: content_hash(&scraped.content),
            url: normalize_url(&scraped.url),
            title,
            summary: scraped.summary,
            content: scraped.content,
            published_at: scraped.published_at,
            scraped_at: Utc::now(),
            sentiment_score: Some(sentiment.compound),
            sentiment_label: Some(label),
            topic_category: Some(keyword_analysis.topic),
            processing_status: ProcessingStatus::Analyzed,
            extractor: extractor.to_string(),
        };

        AnalyzedArticle {
            article,
            keywords,
            keyword_hits: keyword_analysis.weighted_hits,
            keyword_score: keyword_analysis.score,
            sentiment,
        }
    }
}
