//! Markdown digest of a run, plus a running index of every run.
//!
//! ```text
//! markdown_output_dir/
//! ├── runs.md                         # index, newest date first
//! └── 2025-03-04/
//!     └── 20250304T060000Z-1c2d.md    # one digest per run
//! ```
//!
//! The index uses insert semantics so several runs per day nest under a
//! single date heading.

use crate::analysis::AnalyzedArticle;
use crate::models::TopicCategory;
use crate::pipeline::RunReport;
use crate::utils::{slugify_title, upcase};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

const INDEX_HEADING: &str = "# PreventIA Run Index";

fn run_date(report: &RunReport) -> String {
    report.started_at.format("%Y-%m-%d").to_string()
}

/// Render the digest for one run.
pub fn render_digest(report: &RunReport) -> Result<String, std::fmt::Error> {
    let mut md = String::new();
    writeln!(md, "# Run {}\n", report.run_id)?;
    writeln!(
        md,
        "Started {} · finished {} · {} articles from {} domains ({} failed)\n",
        report.started_at.format("%Y-%m-%d %H:%M:%SZ"),
        report.finished_at.format("%H:%M:%SZ"),
        report.articles.len(),
        report.domains.len(),
        report.failed_domains(),
    )?;

    writeln!(md, "## Domains\n")?;
    writeln!(md, "| Domain | Extractor | robots.txt | Articles | Duplicates | Status |")?;
    writeln!(md, "|---|---|---|---|---|---|")?;
    for d in &report.domains {
        let extractor = match (&d.extractor, d.used_fallback) {
            (Some(name), true) => format!("{name} (fallback)"),
            (Some(name), false) => name.clone(),
            (None, _) => "-".to_string(),
        };
        let robots = match d.compliance.scraping_allowed {
            Some(true) => "allowed",
            Some(false) => "disallowed",
            None => "unchecked",
        };
        let status = d.error.as_deref().unwrap_or("ok");
        writeln!(
            md,
            "| {} | {} | {} | {} | {} | {} |",
            d.domain, extractor, robots, d.articles, d.duplicates, status
        )?;
    }
    writeln!(md)?;

    let mut by_topic: BTreeMap<TopicCategory, Vec<&AnalyzedArticle>> = BTreeMap::new();
    for a in &report.articles {
        by_topic
            .entry(a.article.topic_category.unwrap_or(TopicCategory::General))
            .or_default()
            .push(a);
    }

    if !by_topic.is_empty() {
        writeln!(md, "## Topics\n")?;
        for (topic, articles) in &by_topic {
            writeln!(md, "- [{}](#{}) ({})", upcase(topic.as_str()), topic_anchor(*topic), articles.len())?;
        }
        writeln!(md)?;
    }

    for (topic, articles) in by_topic {
        writeln!(md, "## {}\n", upcase(topic.as_str()))?;
        for a in articles {
            let label = a
                .article
                .sentiment_label
                .map(|l| l.to_string())
                .unwrap_or_else(|| "unscored".to_string());
            writeln!(md, "### {}\n", a.article.title)?;
            writeln!(
                md,
                "<small>`{}` · {} ({:+.3}) · {} keyword hits</small>\n",
                a.article.extractor, label, a.sentiment.compound, a.keyword_hits
            )?;
            if let Some(summary) = a.article.summary.as_deref().filter(|s| !s.is_empty()) {
                writeln!(md, "{summary}\n")?;
            }
            writeln!(md, "[Read more]({})\n", a.article.url)?;
        }
    }
    Ok(md)
}

/// Write the digest to `{markdown_output_dir}/{date}/{run_id}.md`.
#[instrument(level = "info", skip_all, fields(%markdown_output_dir, run_id = %report.run_id))]
pub async fn write_run_digest(report: &RunReport, markdown_output_dir: &str) -> Result<PathBuf, Box<dyn Error>> {
    let dir = Path::new(markdown_output_dir).join(run_date(report));
    if let Err(e) = fs::create_dir_all(&dir).await {
        error!(dir = %dir.display(), error = %e, "Failed to create Markdown dir");
        return Err(e.into());
    }
    let path = dir.join(format!("{}.md", report.run_id));
    fs::write(&path, render_digest(report)?).await?;
    info!(path = %path.display(), "Wrote run digest");
    Ok(path)
}

/// Add this run to `{markdown_output_dir}/runs.md`.
///
/// Dates are listed newest first; re-adding a run already listed is a no-op.
#[instrument(level = "info", skip_all, fields(%markdown_output_dir, run_id = %report.run_id))]
pub async fn update_runs_index(report: &RunReport, markdown_output_dir: &str) -> Result<(), Box<dyn Error>> {
    let index_path = Path::new(markdown_output_dir).join("runs.md");
    let content = if index_path.exists() {
        fs::read_to_string(&index_path).await?
    } else {
        format!("{INDEX_HEADING}\n")
    };

    let date = run_date(report);
    let date_heading = format!("- **{date}**");
    let run_entry = format!(
        "    - [{}](./{}/{}.md) ({} articles, {} failed domains)",
        report.run_id,
        date,
        report.run_id,
        report.articles.len(),
        report.failed_domains()
    );
    let run_link = format!("[{}]", report.run_id);

    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    if lines.iter().any(|l| l.contains(&run_link)) {
        info!("Run already indexed");
        return Ok(());
    }

    if let Some(i) = lines.iter().position(|l| l.trim() == date_heading) {
        let mut j = i + 1;
        while j < lines.len() && lines[j].starts_with("    - ") {
            j += 1;
        }
        lines.insert(j, run_entry);
    } else {
        let at = lines
            .iter()
            .position(|l| l.starts_with(INDEX_HEADING))
            .map(|pos| pos + 1)
            .unwrap_or(0);
        lines.insert(at, String::new());
        lines.insert(at + 1, date_heading);
        lines.insert(at + 2, run_entry);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    fs::write(&index_path, out).await?;
    info!(path = %index_path.display(), "Updated runs index");
    Ok(())
}

/// Anchor of a topic section inside a digest.
pub fn topic_anchor(topic: TopicCategory) -> String {
    slugify_title(topic.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ArticleAnalyzer;
    use crate::models::{ScrapedArticle, SourceCompliance};
    use crate::outputs::json::tests::empty_report;
    use crate::pipeline::DomainResult;

    fn report() -> RunReport {
        let mut report = empty_report();
        report.domains = vec![
            DomainResult {
                domain: "cancer.gov".to_string(),
                extractor: Some("cancer.gov/rss".to_string()),
                used_fallback: true,
                articles: 1,
                duplicates: 0,
                error: None,
                compliance: SourceCompliance {
                    scraping_allowed: Some(true),
                    ..Default::default()
                },
            },
            DomainResult {
                domain: "webmd.com".to_string(),
                extractor: None,
                used_fallback: false,
                articles: 0,
                duplicates: 0,
                error: Some("robots.txt disallows".to_string()),
                compliance: SourceCompliance {
                    scraping_allowed: Some(false),
                    ..Default::default()
                },
            },
        ];
        let scraped = ScrapedArticle {
            url: "https://www.cancer.gov/news/trial".to_string(),
            title: "New therapy trial improves survival".to_string(),
            summary: Some("A chemotherapy trial reports improved survival.".to_string()),
            content: "Breast cancer patients on the new chemotherapy regimen saw improved survival.".to_string(),
            published_at: None,
        };
        report.articles = vec![ArticleAnalyzer::default().analyze(1, 2, "cancer.gov/rss", scraped)];
        report
    }

    #[test]
    fn test_render_digest() {
        let md = render_digest(&report()).unwrap();
        assert!(md.starts_with("# Run 20250304T060000Z-1c2d"));
        assert!(md.contains("| cancer.gov | cancer.gov/rss (fallback) | allowed | 1 | 0 | ok |"));
        assert!(md.contains("| webmd.com | - | disallowed | 0 | 0 | robots.txt disallows |"));
        let topic = upcase(report().articles[0].article.topic_category.unwrap().as_str());
        assert!(md.contains(&format!("- [{topic}](#{}) (1)", topic.to_lowercase())));
        assert!(md.contains("### New therapy trial improves survival"));
        assert!(md.contains("[Read more](https://www.cancer.gov/news/trial)"));
    }

    #[test]
    fn test_topic_anchor() {
        assert_eq!(topic_anchor(TopicCategory::Treatment), "treatment");
    }

    #[tokio::test]
    async fn test_runs_index_groups_by_date() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_str().unwrap();

        let first = report();
        let mut second = report();
        second.run_id = "20250304T180000Z-9e41".to_string();

        update_runs_index(&first, dir).await.unwrap();
        update_runs_index(&second, dir).await.unwrap();
        update_runs_index(&second, dir).await.unwrap();

        let index = tokio::fs::read_to_string(tmp.path().join("runs.md")).await.unwrap();
        assert!(index.starts_with(INDEX_HEADING));
        assert_eq!(index.matches("- **2025-03-04**").count(), 1);
        assert_eq!(index.matches("20250304T180000Z-9e41](").count(), 1);
        let first_pos = index.find("1c2d](").unwrap();
        let second_pos = index.find("9e41](").unwrap();
        assert!(first_pos < second_pos);
    }

    #[tokio::test]
    async fn test_write_run_digest() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_run_digest(&report(), tmp.path().to_str().unwrap()).await.unwrap();
        assert!(path.ends_with("2025-03-04/20250304T060000Z-1c2d.md"));
    }
}
