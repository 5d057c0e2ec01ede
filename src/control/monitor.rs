//! Per-domain request timing and outcome counters.

use crate::utils::normalize_domain;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

/// Duration samples kept per domain for percentile estimates.
const SAMPLE_WINDOW: usize = 100;

#[derive(Debug, Default)]
struct DomainMetrics {
    total: u64,
    successes: u64,
    failures: u64,
    cache_hits: u64,
    bytes: u64,
    articles: u64,
    sum: Duration,
    min: Option<Duration>,
    max: Duration,
    samples: VecDeque<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainReport {
    pub domain: String,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub bytes: u64,
    pub articles: u64,
    pub success_rate: f64,
    pub mean_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p95_ms: u64,
}

impl DomainMetrics {
    fn report(&self, domain: &str) -> DomainReport {
        let mean_ms = if self.total == 0 {
            0.0
        } else {
            self.sum.as_secs_f64() * 1_000.0 / self.total as f64
        };
        DomainReport {
            domain: domain.to_string(),
            total_requests: self.total,
            successes: self.successes,
            failures: self.failures,
            cache_hits: self.cache_hits,
            bytes: self.bytes,
            articles: self.articles,
            success_rate: if self.total == 0 {
                0.0
            } else {
                self.successes as f64 / self.total as f64
            },
            mean_ms: mean_ms.round() as u64,
            min_ms: self.min.unwrap_or_default().as_millis() as u64,
            max_ms: self.max.as_millis() as u64,
            p95_ms: percentile(&self.samples, 0.95).as_millis() as u64,
        }
    }
}

fn percentile(samples: &VecDeque<Duration>, q: f64) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    let mut sorted: Vec<Duration> = samples.iter().copied().collect();
    sorted.sort();
    let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

/// Collects timing for every HTTP request the scrapers make.
#[derive(Debug)]
pub struct PerformanceMonitor {
    slow_threshold: Duration,
    metrics: Mutex<HashMap<String, DomainMetrics>>,
}

impl PerformanceMonitor {
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            slow_threshold,
            metrics: Mutex::new(HashMap::new()),
        }
    }

    fn with_metrics<R>(&self, domain: &str, f: impl FnOnce(&mut DomainMetrics) -> R) -> R {
        let mut guard = match self.metrics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(guard.entry(normalize_domain(domain)).or_default())
    }

    pub fn record_request(&self, domain: &str, url: &str, elapsed: Duration, bytes: usize, success: bool) {
        if elapsed > self.slow_threshold {
            warn!(
                domain,
                url,
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.slow_threshold.as_millis() as u64,
                "Slow request"
            );
        }
        self.with_metrics(domain, |m| {
            m.total += 1;
            if success {
                m.successes += 1;
            } else {
                m.failures += 1;
            }
            m.bytes += bytes as u64;
            m.sum += elapsed;
            m.min = Some(m.min.map_or(elapsed, |min| min.min(elapsed)));
            m.max = m.max.max(elapsed);
            if m.samples.len() == SAMPLE_WINDOW {
                m.samples.pop_front();
            }
            m.samples.push_back(elapsed);
        });
    }

    pub fn record_cache_hit(&self, domain: &str) {
        self.with_metrics(domain, |m| m.cache_hits += 1);
    }

    pub fn record_articles(&self, domain: &str, count: usize) {
        self.with_metrics(domain, |m| m.articles += count as u64);
    }

    pub fn domain_report(&self, domain: &str) -> Option<DomainReport> {
        let key = normalize_domain(domain);
        let guard = match self.metrics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(&key).map(|m| m.report(&key))
    }

    /// Reports for every domain, sorted by domain.
    pub fn report(&self) -> Vec<DomainReport> {
        let guard = match self.metrics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut reports: Vec<DomainReport> = guard.iter().map(|(d, m)| m.report(d)).collect();
        reports.sort_by(|a, b| a.domain.cmp(&b.domain));
        reports
    }

    pub fn log_summary(&self) {
        for r in self.report() {
            info!(
                domain = %r.domain,
                requests = r.total_requests,
                failures = r.failures,
                cache_hits = r.cache_hits,
                articles = r.articles,
                mean_ms = r.mean_ms,
                p95_ms = r.p95_ms,
                "Domain performance"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_aggregates_requests() {
        let monitor = PerformanceMonitor::new(Duration::from_secs(5));
        monitor.record_request("www.cancer.gov", "https://www.cancer.gov/a", Duration::from_millis(100), 1_000, true);
        monitor.record_request("cancer.gov", "https://www.cancer.gov/b", Duration::from_millis(300), 500, false);
        monitor.record_cache_hit("cancer.gov");
        monitor.record_articles("cancer.gov", 4);

        let r = monitor.domain_report("cancer.gov").unwrap();
        assert_eq!(r.total_requests, 2);
        assert_eq!(r.successes, 1);
        assert_eq!(r.failures, 1);
        assert_eq!(r.bytes, 1_500);
        assert_eq!(r.cache_hits, 1);
        assert_eq!(r.articles, 4);
        assert_eq!(r.mean_ms, 200);
        assert_eq!(r.min_ms, 100);
        assert_eq!(r.max_ms, 300);
        assert!((r.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_mean_rounds_instead_of_truncating() {
        let monitor = PerformanceMonitor::new(Duration::from_secs(5));
        for ms in [1, 2, 2] {
            monitor.record_request("webmd.com", "u", Duration::from_millis(ms), 0, true);
        }
        // 5 ms over 3 requests
        assert_eq!(monitor.domain_report("webmd.com").unwrap().mean_ms, 2);
    }

    #[test]
    fn test_p95_uses_recent_window() {
        let monitor = PerformanceMonitor::new(Duration::from_secs(60));
        for ms in 1..=100u64 {
            monitor.record_request("webmd.com", "u", Duration::from_millis(ms), 0, true);
        }
        assert_eq!(monitor.domain_report("webmd.com").unwrap().p95_ms, 95);

        // push 100 slow samples; the fast ones fall out of the window
        for _ in 0..100 {
            monitor.record_request("webmd.com", "u", Duration::from_millis(1_000), 0, true);
        }
        let r = monitor.domain_report("webmd.com").unwrap();
        assert_eq!(r.p95_ms, 1_000);
        assert_eq!(r.min_ms, 1);
    }

    #[test]
    fn test_report_sorted_by_domain() {
        let monitor = PerformanceMonitor::new(Duration::from_secs(5));
        monitor.record_request("webmd.com", "u", Duration::ZERO, 0, true);
        monitor.record_request("cancer.gov", "u", Duration::ZERO, 0, true);
        let domains: Vec<String> = monitor.report().into_iter().map(|r| r.domain).collect();
        assert_eq!(domains, vec!["cancer.gov", "webmd.com"]);
    }

    #[test]
    fn test_unknown_domain_has_no_report() {
        let monitor = PerformanceMonitor::new(Duration::from_secs(5));
        assert!(monitor.domain_report("nowhere.test").is_none());
    }
}
