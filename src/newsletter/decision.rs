//! Threshold gate deciding which articles make the newsletter.

use crate::analysis::AnalyzedArticle;
use crate::config::NewsletterSettings;
use crate::models::{ProcessingStatus, SentimentLabel};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionReason {
    Selected,
    NotAnalyzed,
    BelowKeywordThreshold { hits: usize, required: usize },
    NegativeSentiment,
    /// Passed the gate but ranked below the article cap.
    OverLimit { limit: usize },
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Selected => f.write_str("selected"),
            Self::NotAnalyzed => f.write_str("article was not analyzed"),
            Self::BelowKeywordThreshold { hits, required } => {
                write!(f, "{hits} keyword hits, {required} required")
            }
            Self::NegativeSentiment => f.write_str("negative sentiment excluded"),
            Self::OverLimit { limit } => write!(f, "ranked below the top {limit}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub article_id: u64,
    pub url: String,
    pub include: bool,
    pub reason: DecisionReason,
}

/// Decisions for every candidate plus the selected articles in order.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    pub selected: Vec<&'a AnalyzedArticle>,
    pub decisions: Vec<Decision>,
}

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    min_keyword_hits: usize,
    exclude_negative: bool,
    max_articles: usize,
}

impl DecisionEngine {
    pub fn new(settings: &NewsletterSettings) -> Self {
        Self {
            min_keyword_hits: settings.min_keyword_hits,
            exclude_negative: settings.exclude_negative,
            max_articles: settings.max_articles,
        }
    }

    /// Gate a single article, ignoring the article cap.
    pub fn evaluate(&self, candidate: &AnalyzedArticle) -> DecisionReason {
        if candidate.article.processing_status != ProcessingStatus::Analyzed {
            return DecisionReason::NotAnalyzed;
        }
        if candidate.keyword_hits < self.min_keyword_hits {
            return DecisionReason::BelowKeywordThreshold {
                hits: candidate.keyword_hits,
                required: self.min_keyword_hits,
            };
        }
        if self.exclude_negative && candidate.article.sentiment_label == Some(SentimentLabel::Negative) {
            return DecisionReason::NegativeSentiment;
        }
        DecisionReason::Selected
    }

    /// Gate every article and keep the best `max_articles`, ordered by
    /// keyword score then recency.
    pub fn select<'a>(&self, candidates: &'a [AnalyzedArticle]) -> Selection<'a> {
        let mut passed: Vec<&AnalyzedArticle> = Vec::new();
        let mut decisions: Vec<Decision> = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            match self.evaluate(candidate) {
                DecisionReason::Selected => passed.push(candidate),
                reason => {
                    debug!(id = candidate.article.id, %reason, "Article rejected");
                    decisions.push(decision(candidate, false, reason));
                }
            }
        }

        passed.sort_by(|a, b| rank(a, b));
        let overflow = passed.split_off(passed.len().min(self.max_articles));
        for candidate in &passed {
            decisions.push(decision(candidate, true, DecisionReason::Selected));
        }
        for candidate in overflow {
            decisions.push(decision(
                candidate,
                false,
                DecisionReason::OverLimit {
                    limit: self.max_articles,
                },
            ));
        }

        info!(
            candidates = candidates.len(),
            selected = passed.len(),
            min_keyword_hits = self.min_keyword_hits,
            "Newsletter selection"
        );
        Selection {
            selected: passed,
            decisions,
        }
    }
}

fn decision(candidate: &AnalyzedArticle, include: bool, reason: DecisionReason) -> Decision {
    Decision {
        article_id: candidate.article.id,
        url: candidate.article.url.clone(),
        include,
        reason,
    }
}

fn rank(a: &AnalyzedArticle, b: &AnalyzedArticle) -> Ordering {
    b.keyword_score
        .total_cmp(&a.keyword_score)
        .then_with(|| b.article.published_at.cmp(&a.article.published_at))
        .then_with(|| a.article.id.cmp(&b.article.id))
}
