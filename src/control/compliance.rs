//! robots.txt handling and the compliance audit log.
//!
//! Rules follow RFC 9309: the most specific user-agent group wins, falling
//! back to `*`; inside a group the longest matching `Allow`/`Disallow` path
//! wins and ties go to `Allow`. `*` and a trailing `$` are supported in paths.

use crate::config::MAX_SETTING_SECONDS;
use crate::models::{AuditAction, ComplianceAuditEntry};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Clone, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
    crawl_delay: Option<f64>,
}

/// Rules from one robots.txt that apply to our user agent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RobotsRules {
    rules: Vec<Rule>,
    crawl_delay: Option<f64>,
    disallow_all: bool,
}

impl RobotsRules {
    /// Everything allowed (robots.txt missing or 4xx).
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Everything disallowed (robots.txt unreachable with a 5xx).
    pub fn disallow_all() -> Self {
        Self {
            disallow_all: true,
            ..Self::default()
        }
    }

    /// Parse a robots.txt body for `user_agent`.
    pub fn parse(body: &str, user_agent: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut current = Group::default();
        let mut in_agent_block = false;

        for raw in body.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    if !in_agent_block && (!current.agents.is_empty() || !current.rules.is_empty()) {
                        groups.push(std::mem::take(&mut current));
                    }
                    current.agents.push(value.to_lowercase());
                    in_agent_block = true;
                }
                "allow" | "disallow" => {
                    in_agent_block = false;
                    // an empty Disallow means "allow everything"
                    if !value.is_empty() {
                        current.rules.push(Rule {
                            allow: field == "allow",
                            pattern: value.to_string(),
                        });
                    }
                }
                "crawl-delay" => {
                    in_agent_block = false;
                    current.crawl_delay = value
                        .parse::<f64>()
                        .ok()
                        .filter(|d| d.is_finite() && *d >= 0.0)
                        .map(|d| d.min(MAX_SETTING_SECONDS));
                }
                _ => {}
            }
        }
        if !current.agents.is_empty() {
            groups.push(current);
        }

        let product = user_agent
            .split('/')
            .next()
            .unwrap_or(user_agent)
            .trim()
            .to_lowercase();

        let specific = groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a != "*" && product.contains(a.as_str())))
            .max_by_key(|g| {
                g.agents
                    .iter()
                    .filter(|a| product.contains(a.as_str()))
                    .map(|a| a.len())
                    .max()
                    .unwrap_or(0)
            });
        let chosen = specific.or_else(|| groups.iter().find(|g| g.agents.iter().any(|a| a == "*")));

        match chosen {
            Some(group) => Self {
                rules: group.rules.clone(),
                crawl_delay: group.crawl_delay,
                disallow_all: false,
            },
            None => Self::allow_all(),
        }
    }

    /// `Crawl-delay` for our group, capped at one day.
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay.and_then(|d| Duration::try_from_secs_f64(d).ok())
    }

    /// Whether `path` (path plus optional query) may be fetched.
    pub fn is_allowed(&self, path: &str) -> bool {
        if self.disallow_all {
            return false;
        }
        let path = if path.is_empty() { "/" } else { path };
        let mut best: Option<(usize, bool)> = None;
        for rule in &self.rules {
            if pattern_matches(&rule.pattern, path) {
                let specificity = rule.pattern.len();
                best = match best {
                    Some((len, allow)) if len > specificity => Some((len, allow)),
                    Some((len, allow)) if len == specificity => Some((len, allow || rule.allow)),
                    _ => Some((specificity, rule.allow)),
                };
            }
        }
        best.is_none_or(|(_, allow)| allow)
    }

    /// Convenience wrapper taking a full URL.
    pub fn is_url_allowed(&self, url: &str) -> bool {
        match url::Url::parse(url) {
            Ok(u) => {
                let mut target = u.path().to_string();
                if let Some(q) = u.query() {
                    target.push('?');
                    target.push_str(q);
                }
                self.is_allowed(&target)
            }
            Err(_) => false,
        }
    }
}

/// Prefix match with `*` wildcards and an optional `$` end anchor.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    let parts: Vec<&str> = pattern.split('*').collect();
    let Some(first) = parts.first() else {
        return true;
    };
    if !path.starts_with(first) {
        return false;
    }
    let mut pos = first.len();
    for (i, part) in parts.iter().enumerate().skip(1) {
        let is_last = i == parts.len() - 1;
        if is_last && anchored {
            return path.len() >= pos + part.len() && path.ends_with(part);
        }
        match path[pos..].find(part) {
            Some(idx) => pos += idx + part.len(),
            None => return false,
        }
    }
    !anchored || pos == path.len()
}

/// Append-only record of compliance-relevant actions.
///
/// Entries are kept in memory for the run report and, when a path is given,
/// appended to a JSON Lines file.
#[derive(Debug)]
pub struct ComplianceAuditLog {
    path: Option<PathBuf>,
    entries: Mutex<Vec<ComplianceAuditEntry>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl ComplianceAuditLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            entries: Mutex::new(Vec::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[instrument(level = "debug", skip(self, detail))]
    pub async fn record(
        &self,
        domain: &str,
        action: AuditAction,
        url: Option<&str>,
        outcome: &str,
        detail: Option<String>,
    ) {
        let entry = ComplianceAuditEntry {
            timestamp: Utc::now(),
            domain: domain.to_string(),
            action,
            url: url.map(str::to_string),
            outcome: outcome.to_string(),
            detail,
        };

        if let Some(path) = &self.path {
            match serde_json::to_string(&entry) {
                Ok(mut line) => {
                    line.push('\n');
                    let _guard = self.write_lock.lock().await;
                    let written = async {
                        let mut file = tokio::fs::OpenOptions::new()
                            .create(true)
                            .append(true)
                            .open(path)
                            .await?;
                        file.write_all(line.as_bytes()).await?;
                        file.flush().await
                    }
                    .await;
                    if let Err(e) = written {
                        warn!(path = %path.display(), error = %e, "Failed to append audit entry");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize audit entry"),
            }
        }

        debug!(domain, ?action, outcome, "Audit entry recorded");
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }

    pub fn entries(&self) -> Vec<ComplianceAuditEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UA: &str = "PreventIA-NewsBot/0.1 (+https://preventia.example/bot)";

    #[test]
    fn test_wildcard_group() {
        let robots = "User-agent: *\nDisallow: /search\nAllow: /search/about\nCrawl-delay: 5\n";
        let rules = RobotsRules::parse(robots, UA);
        assert!(rules.is_allowed("/news/breast-cancer"));
        assert!(!rules.is_allowed("/search?q=x"));
        assert!(rules.is_allowed("/search/about"));
        assert_eq!(rules.crawl_delay(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_crawl_delay_rejects_infinite_and_caps_huge() {
        let rules = RobotsRules::parse("User-agent: *\nCrawl-delay: inf\n", UA);
        assert_eq!(rules.crawl_delay(), None);
        let rules = RobotsRules::parse("User-agent: *\nCrawl-delay: NaN\n", UA);
        assert_eq!(rules.crawl_delay(), None);
        let rules = RobotsRules::parse("User-agent: *\nCrawl-delay: 1e30\n", UA);
        assert_eq!(rules.crawl_delay(), Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn test_specific_agent_group_wins() {
        let robots = "\
User-agent: *
Disallow: /

User-agent: preventia-newsbot
Disallow: /private
";
        let rules = RobotsRules::parse(robots, UA);
        assert!(rules.is_allowed("/news"));
        assert!(!rules.is_allowed("/private/x"));
    }

    #[test]
    fn test_grouped_user_agents_share_rules() {
        let robots = "User-agent: googlebot\nUser-agent: *\nDisallow: /tmp\n";
        let rules = RobotsRules::parse(robots, UA);
        assert!(!rules.is_allowed("/tmp/file"));
    }

    #[test]
    fn test_empty_disallow_allows_all() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow:\n", UA);
        assert!(rules.is_allowed("/anything"));
    }

    #[test]
    fn test_wildcards_and_anchor() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /*.pdf$\nDisallow: /print/*/full\n", UA);
        assert!(!rules.is_allowed("/files/report.pdf"));
        assert!(rules.is_allowed("/files/report.pdf?download=1"));
        assert!(!rules.is_allowed("/print/2024/full"));
        assert!(rules.is_allowed("/print/2024"));
    }

    #[test]
    fn test_equal_length_tie_goes_to_allow() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /page\nAllow: /page\n", UA);
        assert!(rules.is_allowed("/page"));
    }

    #[test]
    fn test_disallow_all_and_urls() {
        let rules = RobotsRules::disallow_all();
        assert!(!rules.is_url_allowed("https://www.webmd.com/"));
        let open = RobotsRules::allow_all();
        assert!(open.is_url_allowed("https://www.webmd.com/breast-cancer"));
        assert!(!open.is_url_allowed("not a url"));
    }

    #[tokio::test]
    async fn test_audit_log_appends_json_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audit.jsonl");
        let log = ComplianceAuditLog::new(Some(path.clone()));
        log.record("cancer.gov", AuditAction::RobotsChecked, Some("https://www.cancer.gov/robots.txt"), "allowed", None)
            .await;
        log.record("cancer.gov", AuditAction::UrlBlocked, Some("https://www.cancer.gov/search"), "blocked", Some("robots.txt".to_string()))
            .await;

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: ComplianceAuditEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.action, AuditAction::UrlBlocked);
        assert_eq!(log.entries().len(), 2);
    }
}
