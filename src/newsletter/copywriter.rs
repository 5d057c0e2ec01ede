//! Newsletter copy generation.
//!
//! With an API key configured, an OpenAI-compatible chat completion writes
//! the introduction and per-article blurbs. Calls go through [`RetryAsk`],
//! which retries with exponential backoff and jitter:
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```
//!
//! Without a key, or when the model keeps failing, a deterministic template
//! renders the same structure from the article metadata.

use crate::analysis::AnalyzedArticle;
use crate::config::NewsletterSettings;
use crate::error::PublishError;
use crate::utils::{looks_truncated, truncate_for_log, upcase};
use chrono::NaiveDate;
use itertools::Itertools;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

const SYSTEM_PROMPT: &str = "You write a short, accurate newsletter about breast cancer news for patients and caregivers. \
Never give medical advice. Reply with JSON only: \
{\"intro\": string, \"summaries\": [{\"article_id\": number, \"summary\": string}]}. \
Each summary is 2-3 plain sentences.";

const SUMMARY_CHARS: usize = 400;

/// Send text to a language model and get its reply.
pub trait AskAsync {
    type Response;

    async fn ask(&self, text: &str) -> Result<Self::Response, PublishError>;
}

/// Adds exponential backoff retry to any [`AskAsync`].
pub struct RetryAsk<T> {
    inner: T,
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    pub fn new(inner: T, max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync,
{
    type Response = T::Response;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, PublishError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64;
                    let elapsed_ms_total = total_t0.elapsed().as_millis() as u64;

                    if attempt >= self.max_attempts {
                        error!(
                            attempt,
                            max = self.max_attempts,
                            elapsed_ms_attempt,
                            elapsed_ms_total,
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    let exp = u32::try_from(attempt - 1).unwrap_or(u32::MAX).min(16);
                    let delay = self.base_delay.saturating_mul(1 << exp).min(self.max_delay);
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + Duration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_attempts,
                        elapsed_ms_attempt,
                        elapsed_ms_total,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Minimal OpenAI-compatible `/chat/completions` client.
#[derive(Clone)]
pub struct ChatCompletionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl fmt::Debug for ChatCompletionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionClient {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

impl AskAsync for ChatCompletionClient {
    type Response = String;

    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn ask(&self, text: &str) -> Result<String, PublishError> {
        let t0 = Instant::now();
        let body = json!({
            "model": self.model,
            "temperature": 0.4,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": text},
            ],
        });
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PublishError::Llm(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(elapsed_ms = t0.elapsed().as_millis() as u64, %status, "API call failed");
            return Err(PublishError::Llm(format!(
                "status {status}: {}",
                truncate_for_log(&body, 300)
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PublishError::Llm(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(PublishError::EmptyCompletion)?;
        info!(elapsed_ms = t0.elapsed().as_millis() as u64, chars = content.len(), "Completion received");
        Ok(content)
    }
}

#[derive(Debug, Deserialize)]
struct LlmCopy {
    intro: String,
    #[serde(default)]
    summaries: Vec<LlmSummary>,
}

#[derive(Debug, Deserialize)]
struct LlmSummary {
    article_id: u64,
    summary: String,
}

/// One newsletter entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsletterItem {
    pub article_id: u64,
    pub title: String,
    pub url: String,
    pub topic: String,
    pub sentiment: String,
    pub published: Option<NaiveDate>,
    pub blurb: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CopySource {
    Llm,
    Template,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Newsletter {
    pub title: String,
    pub date: NaiveDate,
    pub intro: String,
    pub items: Vec<NewsletterItem>,
    pub generated_by: CopySource,
}

impl Newsletter {
    pub fn to_markdown(&self) -> String {
        let mut md = format!("# {}\n\n{}\n", self.title, self.intro);
        for item in &self.items {
            md.push_str(&format!("\n## [{}]({})\n\n", item.title, item.url));
            let mut meta = vec![upcase(&item.topic), item.sentiment.clone()];
            if let Some(date) = item.published {
                meta.push(date.format("%B %-d, %Y").to_string());
            }
            md.push_str(&format!("*{}*\n\n{}\n", meta.join(" · "), item.blurb));
        }
        md
    }

    pub fn to_html(&self) -> String {
        let mut html = format!("<p>{}</p>\n", escape_html(&self.intro));
        for item in &self.items {
            html.push_str(&format!(
                "<h2><a href=\"{}\">{}</a></h2>\n<p><em>{} · {}</em></p>\n<p>{}</p>\n",
                escape_html(&item.url),
                escape_html(&item.title),
                escape_html(&upcase(&item.topic)),
                escape_html(&item.sentiment),
                escape_html(&item.blurb)
            ));
        }
        html
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn template_blurb(candidate: &AnalyzedArticle) -> String {
    let article = &candidate.article;
    let source = article
        .summary
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&article.content);
    if source.chars().count() <= SUMMARY_CHARS {
        return source.trim().to_string();
    }
    let cut: String = source.chars().take(SUMMARY_CHARS).collect();
    // end on a word boundary
    let cut = cut.rsplit_once(' ').map_or(cut.as_str(), |(head, _)| head);
    format!("{}…", cut.trim_end_matches(|c: char| c.is_ascii_punctuation()))
}

fn template_intro(articles: &[&AnalyzedArticle]) -> String {
    if articles.is_empty() {
        return "No articles met this edition's selection criteria.".to_string();
    }
    let topics = articles
        .iter()
        .filter_map(|a| a.article.topic_category)
        .unique()
        .map(|t| t.to_string())
        .join(", ");
    let noun = if articles.len() == 1 { "story" } else { "stories" };
    format!("This edition brings {} {noun} on breast cancer, covering {topics}.", articles.len())
}

fn prompt_for(articles: &[&AnalyzedArticle]) -> String {
    let mut prompt = String::from("Write the newsletter for these articles:\n");
    for a in articles {
        prompt.push_str(&format!(
            "\narticle_id: {}\ntitle: {}\ntopic: {}\ntext: {}\n",
            a.article.id,
            a.article.title,
            a.article.topic_category.map(|t| t.to_string()).unwrap_or_default(),
            truncate_for_log(&a.article.content, 1_500)
        ));
    }
    prompt
}

/// Turns selected articles into a [`Newsletter`].
#[derive(Debug)]
pub struct Copywriter<A> {
    llm: Option<A>,
    title_prefix: String,
}

impl Copywriter<RetryAsk<ChatCompletionClient>> {
    pub fn template_only(settings: &NewsletterSettings) -> Self {
        Self::new(settings, None)
    }
}

impl<A> Copywriter<A>
where
    A: AskAsync<Response = String>,
{
    pub fn new(settings: &NewsletterSettings, llm: Option<A>) -> Self {
        Self {
            llm,
            title_prefix: settings.title_prefix.clone(),
        }
    }

    async fn ask_copy(&self, llm: &A, prompt: &str) -> Result<LlmCopy, PublishError> {
        let raw = llm.ask(prompt).await?;
        match serde_json::from_str::<LlmCopy>(strip_code_fence(&raw)) {
            Ok(copy) => Ok(copy),
            Err(e) if looks_truncated(&e) => {
                warn!(error = %e, "Completion looks truncated; asking once more");
                let raw = llm.ask(prompt).await?;
                serde_json::from_str(strip_code_fence(&raw)).map_err(|e| PublishError::Llm(e.to_string()))
            }
            Err(e) => Err(PublishError::Llm(format!(
                "unparseable completion ({e}): {}",
                truncate_for_log(&raw, 200)
            ))),
        }
    }

    #[instrument(level = "info", skip_all, fields(articles = articles.len(), %date))]
    pub async fn write(&self, articles: &[&AnalyzedArticle], date: NaiveDate) -> Newsletter {
        let title = format!("{}: {}", self.title_prefix, date.format("%B %-d, %Y"));

        let llm_copy = match (&self.llm, articles.is_empty()) {
            (Some(llm), false) => match self.ask_copy(llm, &prompt_for(articles)).await {
                Ok(copy) => Some(copy),
                Err(e) => {
                    warn!(error = %e, "LLM copy failed; falling back to template");
                    None
                }
            },
            _ => None,
        };

        let (intro, blurbs, generated_by) = match llm_copy {
            Some(copy) => {
                let blurbs: HashMap<u64, String> = copy
                    .summaries
                    .into_iter()
                    .filter(|s| !s.summary.trim().is_empty())
                    .map(|s| (s.article_id, s.summary.trim().to_string()))
                    .collect();
                (copy.intro.trim().to_string(), blurbs, CopySource::Llm)
            }
            None => (template_intro(articles), HashMap::new(), CopySource::Template),
        };

        let items = articles
            .iter()
            .map(|a| NewsletterItem {
                article_id: a.article.id,
                title: a.article.title.clone(),
                url: a.article.url.clone(),
                topic: a.article.topic_category.map(|t| t.to_string()).unwrap_or_default(),
                sentiment: a.article.sentiment_label.map(|l| l.to_string()).unwrap_or_default(),
                published: a.article.published_at.map(|d| d.date_naive()),
                // the model may skip an article; the template fills the gap
                blurb: blurbs.get(&a.article.id).cloned().unwrap_or_else(|| template_blurb(a)),
            })
            .collect();

        info!(?generated_by, "Newsletter copy ready");
        Newsletter {
            title,
            date,
            intro,
            items,
            generated_by,
        }
    }
}

/// Models sometimes wrap JSON in a Markdown code fence.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
