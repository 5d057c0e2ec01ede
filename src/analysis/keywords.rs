//! Weighted breast-cancer keyword dictionary and topic classification.

use crate::models::TopicCategory;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Title occurrences count this many times.
const TITLE_MULTIPLIER: usize = 2;

static DICTIONARY: &[(TopicCategory, &[(&str, f64)])] = &[
    (
        TopicCategory::General,
        &[
            ("breast cancer", 3.0),
            ("breast tumor", 2.5),
            ("oncology", 1.5),
            ("oncologist", 1.5),
            ("carcinoma", 2.0),
            ("tumor", 1.0),
            ("cancer", 1.0),
        ],
    ),
    (
        TopicCategory::Treatment,
        &[
            ("chemotherapy", 2.0),
            ("radiation therapy", 2.0),
            ("radiotherapy", 2.0),
            ("immunotherapy", 2.0),
            ("hormone therapy", 2.0),
            ("endocrine therapy", 2.0),
            ("targeted therapy", 2.0),
            ("tamoxifen", 2.5),
            ("aromatase inhibitor", 2.5),
            ("trastuzumab", 2.5),
            ("herceptin", 2.5),
            ("cdk4/6", 2.5),
            ("treatment", 1.0),
            ("therapy", 1.0),
            ("drug", 1.0),
        ],
    ),
    (
        TopicCategory::Diagnosis,
        &[
            ("mammogram", 2.5),
            ("mammography", 2.5),
            ("screening", 2.0),
            ("biopsy", 2.0),
            ("ultrasound", 1.5),
            ("mri", 1.5),
            ("diagnosis", 1.5),
            ("diagnosed", 1.5),
            ("early detection", 2.5),
            ("dense breasts", 2.0),
            ("breast density", 2.0),
        ],
    ),
    (
        TopicCategory::Research,
        &[
            ("clinical trial", 2.5),
            ("study", 1.0),
            ("researchers", 1.0),
            ("research", 1.0),
            ("trial", 1.5),
            ("phase iii", 2.0),
            ("phase 3", 2.0),
            ("cohort", 1.5),
            ("meta-analysis", 2.0),
            ("published", 0.5),
        ],
    ),
    (
        TopicCategory::Prevention,
        &[
            ("prevention", 2.0),
            ("prevent", 1.5),
            ("risk reduction", 2.0),
            ("risk factor", 1.5),
            ("risk factors", 1.5),
            ("self-exam", 2.0),
            ("vaccine", 2.0),
        ],
    ),
    (
        TopicCategory::Genetics,
        &[
            ("brca1", 3.0),
            ("brca2", 3.0),
            ("brca", 3.0),
            ("genetic testing", 2.5),
            ("gene", 1.5),
            ("genetic", 1.5),
            ("mutation", 2.0),
            ("hereditary", 2.0),
            ("her2", 2.0),
            ("triple-negative", 2.0),
        ],
    ),
    (
        TopicCategory::Surgery,
        &[
            ("mastectomy", 3.0),
            ("lumpectomy", 3.0),
            ("reconstruction", 2.0),
            ("surgery", 2.0),
            ("surgeon", 1.5),
            ("lymph node", 1.5),
        ],
    ),
    (
        TopicCategory::Lifestyle,
        &[
            ("exercise", 2.0),
            ("diet", 2.0),
            ("nutrition", 2.0),
            ("alcohol", 1.5),
            ("obesity", 1.5),
            ("weight", 1.0),
            ("physical activity", 2.0),
            ("survivorship", 2.0),
            ("quality of life", 2.0),
        ],
    ),
];

struct KeywordRule {
    keyword: &'static str,
    category: TopicCategory,
    weight: f64,
    pattern: Regex,
}

static RULES: Lazy<Vec<KeywordRule>> = Lazy::new(|| {
    DICTIONARY
        .iter()
        .flat_map(|(category, words)| {
            words.iter().filter_map(move |(keyword, weight)| {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(keyword));
                Regex::new(&pattern).ok().map(|pattern| KeywordRule {
                    keyword,
                    category: *category,
                    weight: *weight,
                    pattern,
                })
            })
        })
        .collect()
});

/// Rule indices, longest keyword first.
static RULES_BY_LENGTH: Lazy<Vec<usize>> = Lazy::new(|| {
    let mut order: Vec<usize> = (0..RULES.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(RULES[i].keyword.chars().count()));
    order
});

/// Occurrences of every rule in `text`, indexed like [`RULES`].
///
/// Longer keywords claim their span first, so "breast cancer" is not
/// counted again as "cancer".
fn count_matches(text: &str) -> Vec<usize> {
    let mut counts = vec![0; RULES.len()];
    let mut claimed: Vec<(usize, usize)> = Vec::new();
    for &i in RULES_BY_LENGTH.iter() {
        for m in RULES[i].pattern.find_iter(text) {
            if claimed.iter().any(|&(start, end)| m.start() < end && start < m.end()) {
                continue;
            }
            claimed.push((m.start(), m.end()));
            counts[i] += 1;
        }
    }
    counts
}

/// One keyword found in an article.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordHit {
    pub keyword: String,
    pub category: TopicCategory,
    pub title_occurrences: usize,
    pub content_occurrences: usize,
    /// `weight * weighted occurrences`.
    pub relevance: f64,
}

impl KeywordHit {
    pub fn occurrences(&self) -> usize {
        self.title_occurrences + self.content_occurrences
    }

    pub fn weighted_occurrences(&self) -> usize {
        self.title_occurrences * TITLE_MULTIPLIER + self.content_occurrences
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordAnalysis {
    pub hits: Vec<KeywordHit>,
    /// Occurrences with title hits counted double.
    pub weighted_hits: usize,
    /// Sum of relevance over all hits.
    pub score: f64,
    pub topic: TopicCategory,
    pub category_scores: BTreeMap<TopicCategory, f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordAnalyzer;

impl KeywordAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, title: &str, content: &str) -> KeywordAnalysis {
        let title_counts = count_matches(title);
        let content_counts = count_matches(content);
        let hits: Vec<KeywordHit> = RULES
            .iter()
            .enumerate()
            .filter_map(|(i, rule)| {
                let title_occurrences = title_counts[i];
                let content_occurrences = content_counts[i];
                if title_occurrences + content_occurrences == 0 {
                    return None;
                }
                let weighted = title_occurrences * TITLE_MULTIPLIER + content_occurrences;
                Some(KeywordHit {
                    keyword: rule.keyword.to_string(),
                    category: rule.category,
                    title_occurrences,
                    content_occurrences,
                    relevance: rule.weight * weighted as f64,
                })
            })
            .collect();

        let mut category_scores: BTreeMap<TopicCategory, f64> = BTreeMap::new();
        for hit in &hits {
            *category_scores.entry(hit.category).or_default() += hit.relevance;
        }

        // General terms count towards relevance but never decide the topic;
        // ties go to the category declared first.
        let topic = category_scores
            .iter()
            .filter(|(category, _)| **category != TopicCategory::General)
            .fold(None::<(TopicCategory, f64)>, |best, (category, score)| match best {
                Some((_, best_score)) if best_score >= *score => best,
                _ => Some((*category, *score)),
            })
            .map_or(TopicCategory::General, |(category, _)| category);

        KeywordAnalysis {
            weighted_hits: hits.iter().map(KeywordHit::weighted_occurrences).sum(),
            score: hits.iter().map(|h| h.relevance).sum(),
            hits,
            topic,
            category_scores,
        }
    }
}
