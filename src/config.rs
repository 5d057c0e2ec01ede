//! Configuration loading and per-domain scraper settings.
//!
//! Settings are layered: built-in defaults, then the YAML file passed with
//! `--config`, then a couple of environment overrides. Per-domain tuning
//! lives under `domains:` and only needs to name the fields it changes:
//!
//! ```yaml
//! scraper:
//!   max_concurrent_domains: 5
//!   defaults:
//!     requests_per_minute: 30
//!     min_delay_seconds: 2.0
//! domains:
//!   webmd.com:
//!     requests_per_minute: 10
//!     min_delay_seconds: 5.0
//!   healthline.com:
//!     enabled: false
//! ```

use crate::error::ConfigError;
use crate::utils::normalize_domain;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Ceiling for every delay, window and wait setting: one day.
pub const MAX_SETTING_SECONDS: f64 = 86_400.0;

pub const DEFAULT_USER_AGENT: &str =
    "PreventIA-NewsBot/0.1 (+https://preventia.example/bot; research use)";

/// Effective scraping policy for one domain.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DomainConfig {
    pub requests_per_minute: u32,
    /// Minimum gap between two admissions for the same domain.
    pub min_delay_seconds: f64,
    pub burst_limit: u32,
    pub burst_window_seconds: f64,
    /// Cap on in-flight requests against the domain.
    pub max_concurrent: usize,
    pub backoff_base_seconds: f64,
    pub max_backoff_seconds: f64,
    /// Longest `acquire` will block before denying.
    pub max_wait_seconds: f64,
    pub timeout_seconds: u64,
    pub max_articles: usize,
    pub enabled: bool,
    pub respect_robots_txt: bool,
    pub user_agent: Option<String>,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            min_delay_seconds: 2.0,
            burst_limit: 5,
            burst_window_seconds: 10.0,
            max_concurrent: 2,
            backoff_base_seconds: 2.0,
            max_backoff_seconds: 300.0,
            max_wait_seconds: 120.0,
            timeout_seconds: 30,
            max_articles: 20,
            enabled: true,
            respect_robots_txt: true,
            user_agent: None,
        }
    }
}

impl DomainConfig {
    pub fn min_delay(&self) -> Duration {
        secs(self.min_delay_seconds)
    }

    pub fn burst_window(&self) -> Duration {
        secs(self.burst_window_seconds)
    }

    pub fn max_backoff(&self) -> Duration {
        secs(self.max_backoff_seconds)
    }

    pub fn backoff_base(&self) -> Duration {
        secs(self.backoff_base_seconds)
    }

    pub fn max_wait(&self) -> Duration {
        secs(self.max_wait_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    fn validate(&self, scope: &str) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::Invalid {
            field: format!("{scope}.{field}"),
            reason: reason.to_string(),
        };
        if self.requests_per_minute == 0 {
            return Err(invalid("requests_per_minute", "must be greater than zero"));
        }
        if self.burst_limit == 0 {
            return Err(invalid("burst_limit", "must be greater than zero"));
        }
        if self.max_concurrent == 0 {
            return Err(invalid("max_concurrent", "must be greater than zero"));
        }
        for (field, value) in [
            ("min_delay_seconds", self.min_delay_seconds),
            ("burst_window_seconds", self.burst_window_seconds),
            ("backoff_base_seconds", self.backoff_base_seconds),
            ("max_backoff_seconds", self.max_backoff_seconds),
            ("max_wait_seconds", self.max_wait_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, "must be a non-negative number"));
            }
            if value > MAX_SETTING_SECONDS {
                return Err(invalid(field, "must be at most 86400 seconds"));
            }
        }
        Ok(())
    }
}

/// Seconds to a `Duration`, clamped to `0..=MAX_SETTING_SECONDS`.
fn secs(value: f64) -> Duration {
    if value.is_nan() {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_SETTING_SECONDS)).unwrap_or(Duration::ZERO)
}

/// Partial per-domain override; unset fields inherit the defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DomainOverride {
    pub requests_per_minute: Option<u32>,
    pub min_delay_seconds: Option<f64>,
    pub burst_limit: Option<u32>,
    pub burst_window_seconds: Option<f64>,
    pub max_concurrent: Option<usize>,
    pub backoff_base_seconds: Option<f64>,
    pub max_backoff_seconds: Option<f64>,
    pub max_wait_seconds: Option<f64>,
    pub timeout_seconds: Option<u64>,
    pub max_articles: Option<usize>,
    pub enabled: Option<bool>,
    pub respect_robots_txt: Option<bool>,
    pub user_agent: Option<String>,
}

impl DomainOverride {
    fn apply(&self, base: &mut DomainConfig) {
        macro_rules! merge {
            ($($field:ident),+) => {
                $(if let Some(v) = &self.$field { base.$field = v.clone(); })+
            };
        }
        merge!(
            requests_per_minute,
            min_delay_seconds,
            burst_limit,
            burst_window_seconds,
            max_concurrent,
            backoff_base_seconds,
            max_backoff_seconds,
            max_wait_seconds,
            timeout_seconds,
            max_articles,
            enabled,
            respect_robots_txt
        );
        if self.user_agent.is_some() {
            base.user_agent = self.user_agent.clone();
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScraperSettings {
    /// Number of domains scraped at the same time.
    pub max_concurrent_domains: usize,
    pub user_agent: String,
    pub slow_request_ms: u64,
    pub defaults: DomainConfig,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            max_concurrent_domains: 5,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            slow_request_ms: 5_000,
            defaults: DomainConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_capacity: u64,
    pub article_ttl_seconds: u64,
    pub page_ttl_seconds: u64,
    pub feed_ttl_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            article_ttl_seconds: 7 * 24 * 3600,
            page_ttl_seconds: 6 * 3600,
            feed_ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub positive_threshold: f64,
    pub negative_threshold: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            positive_threshold: 0.05,
            negative_threshold: -0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NewsletterSettings {
    /// Minimum weighted keyword hits for an article to make the newsletter.
    pub min_keyword_hits: usize,
    pub exclude_negative: bool,
    pub max_articles: usize,
    pub title_prefix: String,
    pub model: String,
    pub llm_base_url: String,
    /// WordPress post status: `draft` or `publish`.
    pub post_status: String,
}

impl Default for NewsletterSettings {
    fn default() -> Self {
        Self {
            min_keyword_hits: 3,
            exclude_negative: false,
            max_articles: 5,
            title_prefix: "PreventIA Breast Health Digest".to_string(),
            model: "gpt-4o-mini".to_string(),
            llm_base_url: "https://api.openai.com/v1".to_string(),
            post_status: "draft".to_string(),
        }
    }
}

/// Top-level application configuration as read from YAML.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub scraper: ScraperSettings,
    pub domains: HashMap<String, DomainOverride>,
    pub cache: CacheSettings,
    pub analysis: AnalysisSettings,
    pub newsletter: NewsletterSettings,
}

impl AppConfig {
    /// Load configuration from an optional YAML file and apply environment
    /// overrides.
    #[instrument(level = "info")]
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_string(),
                    source,
                })?;
                let parsed = Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
                    path: path.to_string(),
                    source,
                })?;
                info!(path, domains = parsed.domains.len(), "Loaded configuration file");
                parsed
            }
            None => {
                debug!("No config file given; using built-in defaults");
                Self::default()
            }
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        let mut config: Self = serde_yaml::from_str(raw)?;
        config.domains = config
            .domains
            .into_iter()
            .map(|(domain, o)| (normalize_domain(&domain), o))
            .collect();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("PREVENTIA_MAX_CONCURRENT_DOMAINS") {
            match value.parse::<usize>() {
                Ok(n) => self.scraper.max_concurrent_domains = n,
                Err(e) => warn!(%value, error = %e, "Ignoring invalid PREVENTIA_MAX_CONCURRENT_DOMAINS"),
            }
        }
        if let Ok(ua) = std::env::var("PREVENTIA_USER_AGENT") {
            if !ua.trim().is_empty() {
                self.scraper.user_agent = ua;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scraper.max_concurrent_domains == 0 {
            return Err(ConfigError::Invalid {
                field: "scraper.max_concurrent_domains".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        self.scraper.defaults.validate("scraper.defaults")?;
        for (domain, o) in &self.domains {
            let mut merged = self.scraper.defaults.clone();
            o.apply(&mut merged);
            merged.validate(&format!("domains.{domain}"))?;
        }
        if self.analysis.negative_threshold > self.analysis.positive_threshold {
            return Err(ConfigError::Invalid {
                field: "analysis.negative_threshold".to_string(),
                reason: "must not exceed positive_threshold".to_string(),
            });
        }
        Ok(())
    }
}

/// Resolves the effective [`DomainConfig`] for each domain.
///
/// Shared between the rate limiter, the fetch context and the pipeline.
/// Crawl-delay values discovered in robots.txt are folded in at runtime.
#[derive(Debug)]
pub struct ScraperConfigManager {
    settings: ScraperSettings,
    overrides: RwLock<HashMap<String, DomainOverride>>,
}

impl ScraperConfigManager {
    pub fn new(settings: ScraperSettings, overrides: HashMap<String, DomainOverride>) -> Self {
        Self {
            settings,
            overrides: RwLock::new(overrides),
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self::new(config.scraper.clone(), config.domains.clone())
    }

    pub fn settings(&self) -> &ScraperSettings {
        &self.settings
    }

    /// Merged configuration for `domain`. Unknown domains get the defaults.
    pub fn for_domain(&self, domain: &str) -> DomainConfig {
        let mut config = self.settings.defaults.clone();
        let key = normalize_domain(domain);
        if let Ok(overrides) = self.overrides.read() {
            if let Some(o) = overrides.get(&key) {
                o.apply(&mut config);
            }
        }
        if config.user_agent.is_none() {
            config.user_agent = Some(self.settings.user_agent.clone());
        }
        config
    }

    pub fn is_enabled(&self, domain: &str) -> bool {
        self.for_domain(domain).enabled
    }

    pub fn set_override(&self, domain: &str, o: DomainOverride) {
        if let Ok(mut overrides) = self.overrides.write() {
            overrides.insert(normalize_domain(domain), o);
        }
    }

    /// Raise the domain's minimum delay to honor a robots.txt `Crawl-delay`.
    /// Never lowers an existing, stricter delay.
    pub fn apply_crawl_delay(&self, domain: &str, crawl_delay: Duration) {
        let current = self.for_domain(domain).min_delay_seconds;
        let wanted = crawl_delay.as_secs_f64();
        if wanted <= current {
            return;
        }
        if let Ok(mut overrides) = self.overrides.write() {
            let entry = overrides.entry(normalize_domain(domain)).or_default();
            entry.min_delay_seconds = Some(wanted);
            info!(domain, crawl_delay_secs = wanted, "Applied robots.txt crawl-delay");
        }
    }
}
