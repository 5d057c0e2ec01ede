//! JSON output of a run.
//!
//! Files are organized by UTC date with one file per run:
//! ```text
//! json_output_dir/
//! └── 2025-03-04/
//!     ├── 20250304T060000Z-1c2d.json
//!     └── 20250304T180000Z-9e41.json
//! ```

use crate::pipeline::RunReport;
use std::error::Error;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

/// `{json_output_dir}/{date}/{run_id}.json` for a report.
pub fn report_path(report: &RunReport, json_output_dir: &str) -> PathBuf {
    PathBuf::from(json_output_dir)
        .join(report.started_at.format("%Y-%m-%d").to_string())
        .join(format!("{}.json", report.run_id))
}

/// Write a [`RunReport`] as pretty-printed JSON.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir, run_id = %report.run_id))]
pub async fn write_run_report(report: &RunReport, json_output_dir: &str) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;
    let path = report_path(report, json_output_dir);

    if let Some(dir) = path.parent() {
        info!(dir = %dir.display(), "Ensuring JSON directory exists");
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create JSON dir");
            return Err(e.into());
        }
    }

    fs::write(&path, json).await?;
    info!(path = %path.display(), articles = report.articles.len(), "Wrote run JSON");
    Ok(path)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::control::cache::CacheStats;
    use chrono::{TimeZone, Utc};

    pub(crate) fn empty_report() -> RunReport {
        let started_at = Utc.with_ymd_and_hms(2025, 3, 4, 6, 0, 0).unwrap();
        RunReport {
            run_id: "20250304T060000Z-1c2d".to_string(),
            started_at,
            finished_at: started_at,
            domains: Vec::new(),
            articles: Vec::new(),
            extractor_stats: Vec::new(),
            performance: Vec::new(),
            rate_limits: Vec::new(),
            cache: CacheStats {
                hits: 0,
                misses: 0,
                entries: 0,
                hit_ratio: 0.0,
            },
            audit_entries: 0,
        }
    }

    #[tokio::test]
    async fn test_write_run_report() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_str().unwrap();
        let path = write_run_report(&empty_report(), dir).await.unwrap();

        assert!(path.ends_with("2025-03-04/20250304T060000Z-1c2d.json"));
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["run_id"], "20250304T060000Z-1c2d");
        assert!(value["articles"].as_array().unwrap().is_empty());
    }
}
