//! Lexicon-based sentiment scoring in the VADER style.
//!
//! Each token with a lexicon valence contributes its score, adjusted by:
//!
//! - booster words in the three preceding tokens (`very`, `slightly`, ...)
//! - negation in the three preceding tokens (valence scaled by -0.74)
//! - ALL-CAPS emphasis when the text mixes cases
//! - a contrastive `but` (before: ×0.5, after: ×1.5)
//!
//! Exclamation and question marks amplify the summed valence, which is then
//! squashed into `[-1, 1]` with `x / sqrt(x² + 15)`.

use crate::config::AnalysisSettings;
use crate::models::SentimentLabel;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;

const BOOST_INCR: f64 = 0.293;
const BOOST_DECR: f64 = -0.293;
const CAPS_INCR: f64 = 0.733;
const NEGATION_SCALAR: f64 = -0.74;
const NORMALIZATION_ALPHA: f64 = 15.0;

static GENERAL_LEXICON: &[(&str, f64)] = &[
    ("good", 1.9),
    ("great", 3.1),
    ("excellent", 2.7),
    ("best", 3.2),
    ("better", 1.9),
    ("happy", 2.7),
    ("hope", 1.9),
    ("hopeful", 2.3),
    ("promising", 1.7),
    ("positive", 2.6),
    ("benefit", 2.0),
    ("benefits", 1.9),
    ("success", 2.7),
    ("successful", 2.8),
    ("improve", 1.9),
    ("improved", 2.1),
    ("improves", 1.8),
    ("improvement", 2.0),
    ("effective", 2.1),
    ("safe", 1.9),
    ("safer", 1.8),
    ("support", 1.7),
    ("win", 2.8),
    ("breakthrough", 2.3),
    ("encouraging", 2.4),
    ("relief", 2.1),
    ("love", 3.2),
    ("strong", 2.3),
    ("strength", 2.2),
    ("celebrate", 2.7),
    ("bad", -2.5),
    ("worse", -2.1),
    ("worst", -3.1),
    ("poor", -2.1),
    ("fail", -2.5),
    ("failed", -2.3),
    ("failure", -2.3),
    ("fear", -2.2),
    ("afraid", -2.0),
    ("risk", -1.1),
    ("risks", -1.1),
    ("threat", -2.4),
    ("danger", -2.4),
    ("dangerous", -2.1),
    ("harm", -2.5),
    ("harmful", -2.6),
    ("pain", -2.3),
    ("painful", -2.4),
    ("sad", -2.1),
    ("loss", -1.3),
    ("problem", -1.7),
    ("problems", -1.7),
    ("concern", -1.4),
    ("concerns", -1.4),
    ("worry", -1.9),
    ("anxiety", -2.0),
    ("crisis", -3.1),
    ("shortage", -1.6),
    ("warning", -1.4),
    ("struggle", -1.8),
];

/// Terms that carry sentiment in oncology news but not in everyday text.
static MEDICAL_LEXICON: &[(&str, f64)] = &[
    ("remission", 2.6),
    ("cure", 2.8),
    ("cured", 2.8),
    ("survival", 1.6),
    ("survivor", 1.8),
    ("survivors", 1.8),
    ("recovery", 2.1),
    ("recovered", 2.0),
    ("approved", 1.8),
    ("approval", 1.7),
    ("early detection", 1.9),
    ("curable", 2.3),
    ("treatable", 1.8),
    ("well-tolerated", 2.0),
    ("prevent", 1.2),
    ("prevents", 1.3),
    ("shrink", 1.2),
    ("shrank", 1.3),
    ("cancer-free", 2.7),
    ("metastatic", -1.9),
    ("metastasis", -2.1),
    ("recurrence", -2.0),
    ("relapse", -2.3),
    ("mortality", -2.2),
    ("death", -2.9),
    ("deaths", -2.9),
    ("died", -2.6),
    ("fatal", -3.0),
    ("deadly", -3.0),
    ("aggressive", -1.6),
    ("toxicity", -2.1),
    ("toxic", -2.4),
    ("side effects", -1.4),
    ("adverse", -1.9),
    ("terminal", -2.7),
    ("incurable", -2.9),
    ("misdiagnosis", -2.2),
    ("delay", -1.3),
    ("delays", -1.3),
    ("disparities", -1.5),
    ("resistance", -1.2),
    ("resistant", -1.3),
];

static BOOSTERS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    [
        ("absolutely", BOOST_INCR),
        ("completely", BOOST_INCR),
        ("extremely", BOOST_INCR),
        ("highly", BOOST_INCR),
        ("hugely", BOOST_INCR),
        ("incredibly", BOOST_INCR),
        ("really", BOOST_INCR),
        ("remarkably", BOOST_INCR),
        ("significantly", BOOST_INCR),
        ("substantially", BOOST_INCR),
        ("very", BOOST_INCR),
        ("dramatically", BOOST_INCR),
        ("barely", BOOST_DECR),
        ("hardly", BOOST_DECR),
        ("marginally", BOOST_DECR),
        ("partly", BOOST_DECR),
        ("slightly", BOOST_DECR),
        ("somewhat", BOOST_DECR),
        ("modestly", BOOST_DECR),
    ]
    .into_iter()
    .collect()
});

static NEGATIONS: &[&str] = &[
    "not", "no", "never", "none", "nor", "neither", "nothing", "nobody", "nowhere", "without", "cannot", "rarely",
    "seldom",
];

fn is_negation(token: &str) -> bool {
    NEGATIONS.contains(&token) || token.ends_with("n't")
}

/// Compound score plus the share of positive, negative and neutral tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SentimentScore {
    pub compound: f64,
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
}

pub fn normalize(score: f64) -> f64 {
    (score / (score * score + NORMALIZATION_ALPHA).sqrt()).clamp(-1.0, 1.0)
}

struct Token<'a> {
    raw: &'a str,
    lower: String,
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != '-'))
        .filter(|w| w.chars().count() > 1 || w.chars().any(char::is_alphanumeric))
        .map(|raw| Token {
            raw,
            lower: raw.to_lowercase(),
        })
        .collect()
}

fn is_all_caps(word: &str) -> bool {
    word.chars().any(char::is_alphabetic) && !word.chars().any(char::is_lowercase)
}

fn punctuation_emphasis(text: &str) -> f64 {
    let exclamations = text.matches('!').count().min(4) as f64 * 0.292;
    let questions = match text.matches('?').count() {
        0 | 1 => 0.0,
        n @ 2..=3 => n as f64 * 0.18,
        _ => 0.96,
    };
    exclamations + questions
}

/// Scores text and maps the compound score to a label.
#[derive(Debug, Clone)]
pub struct SentimentAnalyzer {
    lexicon: HashMap<String, f64>,
    positive_threshold: f64,
    negative_threshold: f64,
}

impl Default for SentimentAnalyzer {
    fn default() -> Self {
        Self::new(&AnalysisSettings::default())
    }
}

impl SentimentAnalyzer {
    pub fn new(settings: &AnalysisSettings) -> Self {
        let lexicon = GENERAL_LEXICON
            .iter()
            .chain(MEDICAL_LEXICON)
            .map(|(word, valence)| (word.to_string(), *valence))
            .collect();
        Self {
            lexicon,
            positive_threshold: settings.positive_threshold,
            negative_threshold: settings.negative_threshold,
        }
    }

    pub fn label(&self, compound: f64) -> SentimentLabel {
        if compound >= self.positive_threshold {
            SentimentLabel::Positive
        } else if compound <= self.negative_threshold {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }

    pub fn analyze(&self, text: &str) -> SentimentScore {
        let tokens = tokenize(text);
        let mixed_case = tokens.iter().any(|t| is_all_caps(t.raw)) && tokens.iter().any(|t| !is_all_caps(t.raw));

        let mut valences: Vec<f64> = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            // two-word entries first ("side effects", "early detection")
            let bigram = tokens
                .get(i + 1)
                .map(|next| format!("{} {}", tokens[i].lower, next.lower))
                .and_then(|b| self.lexicon.get(&b).copied());
            let (base, width) = match bigram {
                Some(v) => (Some(v), 2),
                None => (self.lexicon.get(&tokens[i].lower).copied(), 1),
            };

            let Some(mut valence) = base.filter(|_| !BOOSTERS.contains_key(tokens[i].lower.as_str())) else {
                valences.push(0.0);
                i += 1;
                continue;
            };

            if mixed_case && is_all_caps(tokens[i].raw) {
                valence += CAPS_INCR * valence.signum();
            }

            for (distance, prev) in (1..=3).filter_map(|d| i.checked_sub(d).map(|j| (d, &tokens[j]))) {
                if let Some(boost) = BOOSTERS.get(prev.lower.as_str()) {
                    let mut scalar = boost * valence.signum();
                    if mixed_case && is_all_caps(prev.raw) {
                        scalar += CAPS_INCR * valence.signum();
                    }
                    scalar *= match distance {
                        1 => 1.0,
                        2 => 0.95,
                        _ => 0.9,
                    };
                    valence += scalar;
                }
            }

            let negated = (1..=3)
                .filter_map(|d| i.checked_sub(d))
                .any(|j| is_negation(&tokens[j].lower));
            if negated {
                valence *= NEGATION_SCALAR;
            }

            valences.push(valence);
            for _ in 1..width {
                valences.push(0.0);
            }
            i += width;
        }

        if let Some(but) = tokens.iter().position(|t| t.lower == "but" || t.lower == "however") {
            for (idx, v) in valences.iter_mut().enumerate() {
                if idx < but {
                    *v *= 0.5;
                } else if idx > but {
                    *v *= 1.5;
                }
            }
        }

        let sum: f64 = valences.iter().sum();
        let emphasis = punctuation_emphasis(text);
        let adjusted = if sum > 0.0 {
            sum + emphasis
        } else if sum < 0.0 {
            sum - emphasis
        } else {
            0.0
        };
        let compound = normalize(adjusted);

        let mut pos: f64 = valences.iter().filter(|v| **v > 0.0).map(|v| v + 1.0).sum();
        let mut neg: f64 = valences.iter().filter(|v| **v < 0.0).map(|v| v - 1.0).sum();
        let neu = valences.iter().filter(|v| **v == 0.0).count() as f64;
        if pos > neg.abs() {
            pos += emphasis;
        } else if pos < neg.abs() {
            neg -= emphasis;
        }
        let total = pos + neg.abs() + neu;
        if total == 0.0 {
            return SentimentScore {
                compound: 0.0,
                positive: 0.0,
                negative: 0.0,
                neutral: 1.0,
            };
        }

        SentimentScore {
            compound: round4(compound),
            positive: round4(pos / total),
            negative: round4(neg.abs() / total),
            neutral: round4(neu / total),
        }
    }

    /// Score an article; the title is weighted like one more sentence.
    pub fn analyze_article(&self, title: &str, content: &str) -> (SentimentScore, SentimentLabel) {
        let text = format!("{title}. {content}");
        let score = self.analyze(&text);
        (score, self.label(score.compound))
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
