//! # PreventIA News
//!
//! A breast-cancer news pipeline: scrapes medical news sources under strict
//! per-domain rate limits and robots.txt compliance, scores every article for
//! sentiment and topic keywords, and optionally turns the most relevant ones
//! into a newsletter posted to WordPress.
//!
//! ## Usage
//!
//! ```sh
//! preventia_news -j ./json -m ./markdown --newsletter
//! ```
//!
//! ## Architecture
//!
//! 1. **Control**: rate limiter, cache, performance monitor and compliance
//!    audit shared through a [`ScrapeContext`]
//! 2. **Scraping**: per-domain extractor chains in the [`ScraperRegistry`],
//!    falling back from site selectors to the RSS feed to news search
//! 3. **Analysis**: sentiment and keyword scoring of each new article
//! 4. **Output**: run JSON, a Markdown digest and the runs index
//! 5. **Newsletter** (optional): decision engine → copywriter → publisher

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod analysis;
mod cli;
mod config;
mod control;
mod error;
mod models;
mod newsletter;
mod outputs;
mod pipeline;
mod scrapers;
mod utils;

use analysis::ArticleAnalyzer;
use cli::Cli;
use config::{AppConfig, ScraperConfigManager};
use control::cache::CacheManager;
use control::compliance::ComplianceAuditLog;
use control::fetch::{HttpPageSource, ScrapeContext};
use control::monitor::PerformanceMonitor;
use control::rate_limiter::RateLimiter;
use control::registry::ScraperRegistry;
use error::PreventiaError;
use newsletter::copywriter::{ChatCompletionClient, Copywriter, RetryAsk};
use newsletter::decision::DecisionEngine;
use newsletter::publisher::{PostStatus, PublishOutcome, Publisher, WordPressConfig};
use outputs::{json, markdown};
use pipeline::{Pipeline, RunReport};
use scrapers::sites::{builtin_sites, register_sites};
use utils::{ensure_writable_dir, normalize_domain};

const LLM_MAX_ATTEMPTS: usize = 5;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("preventia_news starting up");

    let args = Cli::parse();
    debug!(?args.json_output_dir, ?args.markdown_output_dir, ?args.domains, "Parsed CLI arguments");

    let app_config = load_config(&args)?;

    for dir in [&args.json_output_dir, &args.markdown_output_dir] {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(path = %dir, error = %e, "Output directory is not writable (fix perms or choose a different path)");
            return Err(e);
        }
    }

    // ---- Control plane ----
    let client = reqwest::Client::builder()
        .user_agent(app_config.scraper.user_agent.clone())
        .build()?;
    let scraper_config = Arc::new(ScraperConfigManager::from_app_config(&app_config));
    let ctx = Arc::new(ScrapeContext::new(
        Arc::new(HttpPageSource::new(client.clone())),
        Arc::clone(&scraper_config),
        Arc::new(RateLimiter::new(Arc::clone(&scraper_config))),
        Arc::new(CacheManager::new(&app_config.cache)),
        Arc::new(PerformanceMonitor::new(Duration::from_millis(
            app_config.scraper.slow_request_ms,
        ))),
        Arc::new(ComplianceAuditLog::new(args.audit_log.as_ref().map(PathBuf::from))),
    ));

    // ---- Sources and extractors ----
    let wanted: Vec<String> = args.domains.iter().map(|d| normalize_domain(d)).collect();
    let sites: Vec<_> = builtin_sites()
        .into_iter()
        .filter(|s| wanted.is_empty() || wanted.contains(&s.source.domain))
        .collect();
    for domain in &wanted {
        if !sites.iter().any(|s| &s.source.domain == domain) {
            warn!(%domain, "No built-in source for requested domain; ignoring");
        }
    }
    if sites.is_empty() {
        warn!("No sources selected; nothing to do");
        return Ok(());
    }

    let registry = Arc::new(ScraperRegistry::new());
    register_sites(&registry, &sites).await;
    let sources: Vec<_> = sites.into_iter().map(|s| s.source).collect();

    // ---- Scrape and analyze ----
    let pipeline = Pipeline::new(
        Arc::clone(&registry),
        Arc::clone(&ctx),
        ArticleAnalyzer::new(&app_config.analysis),
        app_config.scraper.max_concurrent_domains,
    );
    let report = pipeline.run(&sources).await;

    // ---- Outputs ----
    if let Err(e) = json::write_run_report(&report, &args.json_output_dir).await {
        error!(error = %e, "Failed to write run JSON");
    }
    if let Err(e) = markdown::write_run_digest(&report, &args.markdown_output_dir).await {
        error!(error = %e, "Failed to write run digest");
    }
    if let Err(e) = markdown::update_runs_index(&report, &args.markdown_output_dir).await {
        error!(error = %e, "Failed to update runs index");
    }

    // ---- Newsletter ----
    if args.newsletter {
        if let Err(e) = run_newsletter(&args, &app_config, client, &report).await {
            error!(error = %e, "Newsletter stage failed");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        run_id = %report.run_id,
        articles = report.articles.len(),
        failed_domains = report.failed_domains(),
        elapsed_secs = elapsed.as_secs_f64(),
        "preventia_news completed successfully"
    );
    Ok(())
}

/// File and environment configuration with CLI overrides applied.
fn load_config(args: &Cli) -> Result<AppConfig, PreventiaError> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(n) = args.max_concurrent_domains {
        config.scraper.max_concurrent_domains = n;
    }
    if let Some(model) = &args.model {
        config.newsletter.model = model.clone();
    }
    if let Some(base_url) = &args.openai_base_url {
        config.newsletter.llm_base_url = base_url.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Select, write and publish (or dry-run) the newsletter for a finished run.
#[instrument(level = "info", skip_all, fields(run_id = %report.run_id, publish = args.publish))]
async fn run_newsletter(
    args: &Cli,
    app_config: &AppConfig,
    client: reqwest::Client,
    report: &RunReport,
) -> Result<(), PreventiaError> {
    let settings = &app_config.newsletter;
    let selection = DecisionEngine::new(settings).select(&report.articles);
    for d in selection.decisions.iter().filter(|d| !d.include) {
        debug!(article_id = d.article_id, reason = %d.reason, "Article left out of newsletter");
    }
    info!(
        candidates = selection.decisions.len(),
        selected = selection.selected.len(),
        "Newsletter selection complete"
    );
    if selection.selected.is_empty() {
        warn!("No article cleared the newsletter threshold; skipping");
        return Ok(());
    }

    let copywriter = match args.openai_api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        Some(api_key) => {
            info!(model = %settings.model, base_url = %settings.llm_base_url, "Using LLM copywriter");
            let llm = ChatCompletionClient::new(client.clone(), &settings.llm_base_url, api_key, &settings.model);
            Copywriter::new(settings, Some(RetryAsk::new(llm, LLM_MAX_ATTEMPTS, Duration::from_secs(1))))
        }
        None => {
            info!("No API key; using template copy");
            Copywriter::template_only(settings)
        }
    };
    let newsletter = copywriter.write(&selection.selected, Utc::now().date_naive()).await;

    let status: PostStatus = settings.post_status.parse()?;
    let target = if args.publish {
        Some(WordPressConfig::from_parts(
            args.wordpress_url.as_deref(),
            args.wordpress_user.as_deref(),
            args.wordpress_app_password.as_deref(),
            status,
        )?)
    } else {
        None
    };

    let publisher = Publisher::new(client, target, &args.markdown_output_dir);
    match publisher.publish(&newsletter, !args.publish).await? {
        PublishOutcome::Posted(post) => {
            info!(id = post.id, link = post.link.as_deref().unwrap_or(""), "Newsletter published")
        }
        PublishOutcome::DryRun { path } => info!(path = %path.display(), "Newsletter written (dry run)"),
    }
    Ok(())
}
