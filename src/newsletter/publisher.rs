//! WordPress publishing, or a local Markdown file in dry-run mode.

use super::copywriter::Newsletter;
use crate::error::PublishError;
use crate::utils::truncate_for_log;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Publish,
}

impl FromStr for PostStatus {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "publish" => Ok(Self::Publish),
            _ => Err(PublishError::NotConfigured("post status (draft|publish)")),
        }
    }
}

/// Credentials for the WordPress REST API (application password).
#[derive(Clone)]
pub struct WordPressConfig {
    pub base_url: String,
    pub user: String,
    pub app_password: String,
    pub status: PostStatus,
}

impl fmt::Debug for WordPressConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WordPressConfig")
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl WordPressConfig {
    /// Build from optional parts; every part must be present.
    pub fn from_parts(
        base_url: Option<&str>,
        user: Option<&str>,
        app_password: Option<&str>,
        status: PostStatus,
    ) -> Result<Self, PublishError> {
        let present = |v: Option<&str>, what| {
            v.map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(PublishError::NotConfigured(what))
        };
        Ok(Self {
            base_url: present(base_url, "WordPress URL")?,
            user: present(user, "WordPress user")?,
            app_password: present(app_password, "WordPress application password")?,
            status,
        })
    }

    pub fn posts_endpoint(&self) -> String {
        format!("{}/wp-json/wp/v2/posts", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct NewPost<'a> {
    title: &'a str,
    content: &'a str,
    status: PostStatus,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PublishedPost {
    pub id: u64,
    #[serde(default)]
    pub link: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublishOutcome {
    Posted(PublishedPost),
    DryRun { path: PathBuf },
}

/// Markdown file name for a newsletter edition.
pub fn dry_run_path(dir: &Path, newsletter: &Newsletter) -> PathBuf {
    dir.join(format!("newsletter-{}.md", newsletter.date.format("%Y-%m-%d")))
}

#[derive(Debug)]
pub struct Publisher {
    client: reqwest::Client,
    target: Option<WordPressConfig>,
    markdown_dir: PathBuf,
}

impl Publisher {
    pub fn new(client: reqwest::Client, target: Option<WordPressConfig>, markdown_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            target,
            markdown_dir: markdown_dir.into(),
        }
    }

    /// Post to WordPress, or write Markdown locally when `dry_run` is set.
    #[instrument(level = "info", skip_all, fields(title = %newsletter.title, dry_run))]
    pub async fn publish(&self, newsletter: &Newsletter, dry_run: bool) -> Result<PublishOutcome, PublishError> {
        if dry_run {
            return self.write_markdown(newsletter).await;
        }
        let target = self
            .target
            .as_ref()
            .ok_or(PublishError::NotConfigured("WordPress URL"))?;

        let t0 = Instant::now();
        let html = newsletter.to_html();
        let response = self
            .client
            .post(target.posts_endpoint())
            .basic_auth(&target.user, Some(&target.app_password))
            .json(&NewPost {
                title: &newsletter.title,
                content: &html,
                status: target.status,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "WordPress rejected the post");
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                body: truncate_for_log(&body, 500),
            });
        }

        let post: PublishedPost = response.json().await?;
        info!(
            id = post.id,
            link = post.link.as_deref().unwrap_or(""),
            status = %post.status,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Newsletter posted"
        );
        Ok(PublishOutcome::Posted(post))
    }

    async fn write_markdown(&self, newsletter: &Newsletter) -> Result<PublishOutcome, PublishError> {
        let path = dry_run_path(&self.markdown_dir, newsletter);
        let io_err = |source| PublishError::Io {
            path: path.display().to_string(),
            source,
        };
        tokio::fs::create_dir_all(&self.markdown_dir).await.map_err(io_err)?;
        tokio::fs::write(&path, newsletter.to_markdown()).await.map_err(io_err)?;
        info!(path = %path.display(), "Dry run: newsletter written locally");
        Ok(PublishOutcome::DryRun { path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newsletter::copywriter::CopySource;
    use chrono::NaiveDate;

    fn newsletter() -> Newsletter {
        Newsletter {
            title: "PreventIA Breast Health Digest: March 4, 2025".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            intro: "Quiet week.".to_string(),
            items: Vec::new(),
            generated_by: CopySource::Template,
        }
    }

    #[test]
    fn test_post_status_parsing() {
        assert_eq!("Draft".parse::<PostStatus>().unwrap(), PostStatus::Draft);
        assert_eq!("publish".parse::<PostStatus>().unwrap(), PostStatus::Publish);
        assert!("scheduled".parse::<PostStatus>().is_err());
    }

    #[test]
    fn test_wordpress_config_requires_every_part() {
        let ok = WordPressConfig::from_parts(Some("https://blog.example/"), Some("editor"), Some("abcd efgh"), PostStatus::Draft)
            .unwrap();
        assert_eq!(ok.posts_endpoint(), "https://blog.example/wp-json/wp/v2/posts");
        assert!(!format!("{ok:?}").contains("abcd"));

        let missing = WordPressConfig::from_parts(Some("https://blog.example"), None, Some("x"), PostStatus::Draft);
        assert!(matches!(missing, Err(PublishError::NotConfigured("WordPress user"))));
    }

    #[test]
    fn test_new_post_payload() {
        let post = NewPost {
            title: "t",
            content: "<p>c</p>",
            status: PostStatus::Publish,
        };
        assert_eq!(
            serde_json::to_string(&post).unwrap(),
            r#"{"title":"t","content":"<p>c</p>","status":"publish"}"#
        );
    }

    #[tokio::test]
    async fn test_dry_run_writes_markdown() {
        let tmp = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(reqwest::Client::new(), None, tmp.path().join("md"));
        let outcome = publisher.publish(&newsletter(), true).await.unwrap();

        let PublishOutcome::DryRun { path } = outcome else {
            panic!("expected dry run");
        };
        assert!(path.ends_with("newsletter-2025-03-04.md"));
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(written.starts_with("# PreventIA Breast Health Digest"));
    }

    #[tokio::test]
    async fn test_publish_without_target_is_not_configured() {
        let tmp = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(reqwest::Client::new(), None, tmp.path());
        let err = publisher.publish(&newsletter(), false).await.unwrap_err();
        assert!(matches!(err, PublishError::NotConfigured(_)));
    }
}
