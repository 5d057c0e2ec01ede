//! Command-line interface definitions for PreventIA News.
//!
//! Every option can also come from the environment. Values given here
//! override the YAML config file.

use clap::Parser;

/// Command-line arguments for a PreventIA scraping run.
///
/// # Examples
///
/// ```sh
/// # Scrape every built-in source
/// preventia_news -j ./json -m ./markdown
///
/// # Two sources only, then draft a newsletter locally
/// preventia_news -j ./json -m ./markdown -d cancer.gov -d webmd.com --newsletter
///
/// # Draft with the LLM and post to WordPress
/// OPENAI_API_KEY=... WORDPRESS_URL=https://blog.example \
///   preventia_news -j ./json -m ./markdown --newsletter --publish
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Output directory for the run JSON
    #[arg(short, long, env = "PREVENTIA_JSON_OUTPUT_DIR")]
    pub json_output_dir: String,

    /// Output directory for the Markdown digest and dry-run newsletters
    #[arg(short, long, env = "PREVENTIA_MARKDOWN_OUTPUT_DIR")]
    pub markdown_output_dir: String,

    /// Optional path to config.yaml file
    #[arg(short, long, env = "PREVENTIA_CONFIG")]
    pub config: Option<String>,

    /// Only scrape these domains (repeatable)
    #[arg(short, long = "domain", value_name = "DOMAIN")]
    pub domains: Vec<String>,

    /// Upper bound on domains scraped at once
    #[arg(long)]
    pub max_concurrent_domains: Option<usize>,

    /// Build a newsletter from this run's articles
    #[arg(long)]
    pub newsletter: bool,

    /// Post the newsletter to WordPress instead of writing it locally
    #[arg(long, requires = "newsletter")]
    pub publish: bool,

    /// API key for the chat-completions endpoint; without it copy is templated
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Chat-completions base URL
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,

    /// Model used for newsletter copy
    #[arg(long, env = "PREVENTIA_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "WORDPRESS_URL")]
    pub wordpress_url: Option<String>,

    #[arg(long, env = "WORDPRESS_USER")]
    pub wordpress_user: Option<String>,

    #[arg(long, env = "WORDPRESS_APP_PASSWORD", hide_env_values = true)]
    pub wordpress_app_password: Option<String>,

    /// Append compliance audit entries to this JSONL file
    #[arg(long, env = "PREVENTIA_AUDIT_LOG")]
    pub audit_log: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "preventia_news",
            "--json-output-dir",
            "./json",
            "--markdown-output-dir",
            "./markdown",
        ]);

        assert_eq!(cli.json_output_dir, "./json");
        assert_eq!(cli.markdown_output_dir, "./markdown");
        assert!(cli.domains.is_empty());
        assert!(!cli.newsletter);
        assert!(!cli.publish);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from([
            "preventia_news",
            "-j",
            "/tmp/json",
            "-m",
            "/tmp/markdown",
            "-d",
            "cancer.gov",
            "-d",
            "webmd.com",
        ]);

        assert_eq!(cli.json_output_dir, "/tmp/json");
        assert_eq!(cli.markdown_output_dir, "/tmp/markdown");
        assert_eq!(cli.domains, vec!["cancer.gov", "webmd.com"]);
    }

    #[test]
    fn test_publish_requires_newsletter() {
        let res = Cli::try_parse_from(["preventia_news", "-j", "j", "-m", "m", "--publish"]);
        assert!(res.is_err());

        let cli = Cli::try_parse_from([
            "preventia_news",
            "-j",
            "j",
            "-m",
            "m",
            "--newsletter",
            "--publish",
            "--max-concurrent-domains",
            "2",
        ])
        .unwrap();
        assert!(cli.publish);
        assert_eq!(cli.max_concurrent_domains, Some(2));
    }
}
