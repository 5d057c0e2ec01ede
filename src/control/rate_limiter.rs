//! Per-domain admission control for outgoing requests.
//!
//! Every request to a site goes through [`RateLimiter::acquire`] and is
//! settled with [`RateLimiter::release`]. A request is admitted only when
//! all of these hold for its domain:
//!
//! - no failure backoff is active
//! - the minimum delay since the previous admission has passed
//! - fewer than `requests_per_minute` admissions in the last 60 seconds
//! - fewer than `burst_limit` admissions in the last `burst_window_seconds`
//! - fewer than `max_concurrent` requests are in flight
//!
//! # Backoff Strategy
//!
//! After [`FAILURE_THRESHOLD`] consecutive failures the domain is paused:
//! ```text
//! backoff = min(backoff_base * 2^(failures - 3), max_backoff)
//! ```
//! A successful release clears the counter and the pause.
//!
//! State is process-local; nothing is shared between processes.

use crate::config::{DomainConfig, ScraperConfigManager};
use crate::error::ScraperError;
use crate::utils::normalize_domain;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, instrument, warn};

/// Consecutive failures before backoff kicks in.
pub const FAILURE_THRESHOLD: u32 = 3;

const MINUTE: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct DomainState {
    /// Admission times, oldest first, pruned to the longest window in use.
    recent: VecDeque<Instant>,
    last_request: Option<Instant>,
    in_flight: usize,
    consecutive_failures: u32,
    backoff_until: Option<Instant>,
    total_admitted: u64,
    total_denied: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitReason {
    Backoff,
    MinDelay,
    PerMinute,
    Burst,
    Concurrency,
}

#[derive(Debug)]
enum Admission {
    Granted,
    /// `wait` is `None` when only the concurrency cap blocks; that clears on
    /// the next release rather than after a known delay.
    Wait {
        wait: Option<Duration>,
        reason: WaitReason,
    },
}

impl DomainState {
    fn prune(&mut self, now: Instant, cfg: &DomainConfig) {
        let horizon = MINUTE.max(cfg.burst_window());
        while let Some(&oldest) = self.recent.front() {
            if now.duration_since(oldest) >= horizon {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    fn check(&mut self, now: Instant, cfg: &DomainConfig) -> Admission {
        self.prune(now, cfg);

        let mut longest: Option<(Duration, WaitReason)> = None;
        let mut consider = |wait: Duration, reason: WaitReason| {
            if wait.is_zero() {
                return;
            }
            if longest.is_none_or(|(w, _)| wait > w) {
                longest = Some((wait, reason));
            }
        };

        if let Some(until) = self.backoff_until {
            consider(until.saturating_duration_since(now), WaitReason::Backoff);
        }

        if let Some(last) = self.last_request {
            let ready_at = last + cfg.min_delay();
            consider(ready_at.saturating_duration_since(now), WaitReason::MinDelay);
        }

        let rpm = cfg.requests_per_minute as usize;
        let in_minute: Vec<Instant> = self
            .recent
            .iter()
            .copied()
            .filter(|t| now.duration_since(*t) < MINUTE)
            .collect();
        if in_minute.len() >= rpm {
            // the admission that has to age out before a slot frees up
            let gate = in_minute[in_minute.len() - rpm];
            consider((gate + MINUTE).saturating_duration_since(now), WaitReason::PerMinute);
        }

        let burst = cfg.burst_limit as usize;
        let window = cfg.burst_window();
        let in_burst: Vec<Instant> = self
            .recent
            .iter()
            .copied()
            .filter(|t| now.duration_since(*t) < window)
            .collect();
        if in_burst.len() >= burst {
            let gate = in_burst[in_burst.len() - burst];
            consider((gate + window).saturating_duration_since(now), WaitReason::Burst);
        }

        match longest {
            Some((wait, reason)) => Admission::Wait {
                wait: Some(wait),
                reason,
            },
            None if self.in_flight >= cfg.max_concurrent => Admission::Wait {
                wait: None,
                reason: WaitReason::Concurrency,
            },
            None => {
                self.recent.push_back(now);
                self.last_request = Some(now);
                self.in_flight += 1;
                self.total_admitted += 1;
                Admission::Granted
            }
        }
    }
}

/// Backoff applied after `failures` consecutive failures, or `None` below
/// the threshold.
pub fn backoff_for(failures: u32, cfg: &DomainConfig) -> Option<Duration> {
    if failures < FAILURE_THRESHOLD {
        return None;
    }
    let exponent = (failures - FAILURE_THRESHOLD).min(20) as i32;
    let delay = cfg.backoff_base().mul_f64(2f64.powi(exponent));
    Some(delay.min(cfg.max_backoff()))
}

/// Point-in-time view of one domain's limiter state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    pub domain: String,
    pub in_flight: usize,
    pub requests_last_minute: usize,
    pub consecutive_failures: u32,
    pub backoff_remaining_ms: Option<u64>,
    pub total_admitted: u64,
    pub total_denied: u64,
}

/// Async, per-domain rate limiter with failure backoff.
#[derive(Debug)]
pub struct RateLimiter {
    config: Arc<ScraperConfigManager>,
    state: Mutex<HashMap<String, DomainState>>,
    released: Notify,
}

impl RateLimiter {
    pub fn new(config: Arc<ScraperConfigManager>) -> Self {
        Self {
            config,
            state: Mutex::new(HashMap::new()),
            released: Notify::new(),
        }
    }

    fn with_state<R>(&self, domain: &str, f: impl FnOnce(&mut DomainState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(guard.entry(domain.to_string()).or_default())
    }

    /// Wait until a request to `domain` may be sent.
    ///
    /// Every successful call must be paired with [`release`](Self::release).
    ///
    /// # Arguments
    ///
    /// * `domain` - Host or domain of the request; normalized before lookup
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::RateLimited`] with a `retry_after` hint when the
    /// domain's `max_wait_seconds` would be exceeded.
    #[instrument(level = "debug", skip(self))]
    pub async fn acquire(&self, domain: &str) -> Result<(), ScraperError> {
        let key = normalize_domain(domain);
        let started = Instant::now();

        loop {
            let cfg = self.config.for_domain(&key);
            let notified = self.released.notified();
            tokio::pin!(notified);
            // register before checking so a release between check and wait is not lost
            notified.as_mut().enable();

            let now = Instant::now();
            let admission = self.with_state(&key, |s| s.check(now, &cfg));
            let (wait, reason) = match admission {
                Admission::Granted => return Ok(()),
                Admission::Wait { wait, reason } => (wait, reason),
            };

            let remaining = cfg.max_wait().saturating_sub(started.elapsed());
            let too_long = match wait {
                Some(w) => w > remaining,
                None => remaining.is_zero(),
            };
            if too_long {
                let retry_after = wait.unwrap_or_else(|| cfg.min_delay());
                self.with_state(&key, |s| s.total_denied += 1);
                warn!(domain = %key, ?reason, ?retry_after, "Rate limiter denied request");
                return Err(ScraperError::RateLimited {
                    domain: key,
                    retry_after,
                });
            }

            debug!(domain = %key, ?reason, ?wait, "Rate limiter waiting");
            match wait {
                Some(w) => sleep(w).await,
                None => {
                    // woken by release(); the loop re-checks either way
                    let _ = timeout(remaining, notified).await;
                }
            }
        }
    }

    /// Admit immediately or deny; never waits.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the request was admitted (and must be released), otherwise
    /// [`ScraperError::RateLimited`] with the wait that would have been needed.
    pub fn try_acquire(&self, domain: &str) -> Result<(), ScraperError> {
        let key = normalize_domain(domain);
        let cfg = self.config.for_domain(&key);
        let now = Instant::now();
        match self.with_state(&key, |s| s.check(now, &cfg)) {
            Admission::Granted => Ok(()),
            Admission::Wait { wait, .. } => {
                self.with_state(&key, |s| s.total_denied += 1);
                Err(ScraperError::RateLimited {
                    domain: key,
                    retry_after: wait.unwrap_or_else(|| cfg.min_delay()),
                })
            }
        }
    }

    /// Settle a request admitted by [`acquire`](Self::acquire).
    ///
    /// # Arguments
    ///
    /// * `domain` - The domain passed to `acquire`
    /// * `success` - `false` counts towards the consecutive-failure backoff
    #[instrument(level = "debug", skip(self))]
    pub fn release(&self, domain: &str, success: bool) {
        let key = normalize_domain(domain);
        let cfg = self.config.for_domain(&key);
        let now = Instant::now();
        self.with_state(&key, |s| {
            s.in_flight = s.in_flight.saturating_sub(1);
            if success {
                s.consecutive_failures = 0;
                s.backoff_until = None;
            } else {
                s.consecutive_failures += 1;
                if let Some(backoff) = backoff_for(s.consecutive_failures, &cfg) {
                    s.backoff_until = Some(now + backoff);
                    warn!(
                        domain = %key,
                        failures = s.consecutive_failures,
                        ?backoff,
                        "Consecutive failures; backing off"
                    );
                }
            }
        });
        self.released.notify_waiters();
    }

    pub fn stats(&self, domain: &str) -> RateLimitStats {
        let key = normalize_domain(domain);
        let now = Instant::now();
        self.with_state(&key, |s| RateLimitStats {
            domain: key.clone(),
            in_flight: s.in_flight,
            requests_last_minute: s
                .recent
                .iter()
                .filter(|t| now.duration_since(**t) < MINUTE)
                .count(),
            consecutive_failures: s.consecutive_failures,
            backoff_remaining_ms: s
                .backoff_until
                .map(|until| until.saturating_duration_since(now).as_millis() as u64)
                .filter(|ms| *ms > 0),
            total_admitted: s.total_admitted,
            total_denied: s.total_denied,
        })
    }

    /// Snapshot of every domain seen so far, sorted by domain.
    pub fn all_stats(&self) -> Vec<RateLimitStats> {
        let mut domains: Vec<String> = match self.state.lock() {
            Ok(guard) => guard.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        };
        domains.sort();
        domains.iter().map(|d| self.stats(d)).collect()
    }

    /// Forget all state for `domain`.
    pub fn reset(&self, domain: &str) {
        let key = normalize_domain(domain);
        if let Ok(mut guard) = self.state.lock() {
            guard.remove(&key);
        }
        self.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScraperSettings;

    fn limiter(cfg: DomainConfig) -> Arc<RateLimiter> {
        let settings = ScraperSettings {
            defaults: cfg,
            ..ScraperSettings::default()
        };
        let manager = Arc::new(ScraperConfigManager::new(settings, HashMap::new()));
        Arc::new(RateLimiter::new(manager))
    }

    fn relaxed() -> DomainConfig {
        DomainConfig {
            requests_per_minute: 1_000,
            min_delay_seconds: 0.0,
            burst_limit: 1_000,
            burst_window_seconds: 1.0,
            max_concurrent: 100,
            max_wait_seconds: 600.0,
            ..DomainConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_delay_between_requests() {
        let rl = limiter(DomainConfig {
            min_delay_seconds: 2.0,
            ..relaxed()
        });
        let t0 = Instant::now();
        rl.acquire("cancer.gov").await.unwrap();
        rl.release("cancer.gov", true);
        rl.acquire("cancer.gov").await.unwrap();
        assert!(t0.elapsed() >= Duration::from_secs(2));
        assert!(t0.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_domains_are_independent() {
        let rl = limiter(DomainConfig {
            min_delay_seconds: 5.0,
            ..relaxed()
        });
        let t0 = Instant::now();
        rl.acquire("cancer.gov").await.unwrap();
        rl.acquire("webmd.com").await.unwrap();
        assert!(t0.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_www_prefix_shares_bucket() {
        let rl = limiter(DomainConfig {
            min_delay_seconds: 5.0,
            ..relaxed()
        });
        rl.acquire("www.webmd.com").await.unwrap();
        assert!(rl.try_acquire("webmd.com").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_per_minute() {
        let rl = limiter(DomainConfig {
            requests_per_minute: 3,
            ..relaxed()
        });
        let t0 = Instant::now();
        for _ in 0..3 {
            rl.acquire("webmd.com").await.unwrap();
            rl.release("webmd.com", true);
        }
        assert!(t0.elapsed() < Duration::from_secs(1));
        rl.acquire("webmd.com").await.unwrap();
        assert!(t0.elapsed() >= Duration::from_secs(60));
        assert_eq!(rl.stats("webmd.com").requests_last_minute, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_limit() {
        let rl = limiter(DomainConfig {
            burst_limit: 2,
            burst_window_seconds: 10.0,
            ..relaxed()
        });
        let t0 = Instant::now();
        rl.acquire("medicalxpress.com").await.unwrap();
        rl.acquire("medicalxpress.com").await.unwrap();
        rl.acquire("medicalxpress.com").await.unwrap();
        let elapsed = t0.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_waits_for_release() {
        let rl = limiter(DomainConfig {
            max_concurrent: 1,
            ..relaxed()
        });
        rl.acquire("curetoday.com").await.unwrap();

        let waiter = {
            let rl = Arc::clone(&rl);
            tokio::spawn(async move { rl.acquire("curetoday.com").await })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!waiter.is_finished());
        assert_eq!(rl.stats("curetoday.com").in_flight, 1);

        rl.release("curetoday.com", true);
        waiter.await.unwrap().unwrap();
        assert_eq!(rl.stats("curetoday.com").in_flight, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_after_three_failures() {
        let rl = limiter(DomainConfig {
            backoff_base_seconds: 4.0,
            max_backoff_seconds: 10.0,
            ..relaxed()
        });
        for _ in 0..2 {
            rl.acquire("sciencedaily.com").await.unwrap();
            rl.release("sciencedaily.com", false);
        }
        assert_eq!(rl.stats("sciencedaily.com").backoff_remaining_ms, None);

        rl.acquire("sciencedaily.com").await.unwrap();
        rl.release("sciencedaily.com", false);
        let stats = rl.stats("sciencedaily.com");
        assert_eq!(stats.consecutive_failures, 3);
        assert_eq!(stats.backoff_remaining_ms, Some(4_000));

        let t0 = Instant::now();
        rl.acquire("sciencedaily.com").await.unwrap();
        assert!(t0.elapsed() >= Duration::from_secs(4));

        // fourth failure doubles, fifth hits the cap
        rl.release("sciencedaily.com", false);
        assert_eq!(rl.stats("sciencedaily.com").backoff_remaining_ms, Some(8_000));
        rl.acquire("sciencedaily.com").await.unwrap();
        rl.release("sciencedaily.com", false);
        assert_eq!(rl.stats("sciencedaily.com").backoff_remaining_ms, Some(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_backoff() {
        let rl = limiter(relaxed());
        for _ in 0..3 {
            rl.acquire("healthline.com").await.unwrap();
            rl.release("healthline.com", false);
        }
        assert!(rl.stats("healthline.com").backoff_remaining_ms.is_some());
        rl.acquire("healthline.com").await.unwrap();
        rl.release("healthline.com", true);
        let stats = rl.stats("healthline.com");
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.backoff_remaining_ms, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_forgets_domain() {
        let rl = limiter(relaxed());
        for _ in 0..3 {
            rl.acquire("webmd.com").await.unwrap();
            rl.release("webmd.com", false);
        }
        rl.reset("www.webmd.com");
        let stats = rl.stats("webmd.com");
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.backoff_remaining_ms, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_denies_when_wait_exceeds_max() {
        let rl = limiter(DomainConfig {
            min_delay_seconds: 30.0,
            max_wait_seconds: 5.0,
            ..relaxed()
        });
        rl.acquire("webmd.com").await.unwrap();
        let err = rl.acquire("webmd.com").await.unwrap_err();
        match err {
            ScraperError::RateLimited { domain, retry_after } => {
                assert_eq!(domain, "webmd.com");
                assert_eq!(retry_after, Duration::from_secs(30));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(rl.stats("webmd.com").total_denied, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_never_waits() {
        let rl = limiter(DomainConfig {
            max_concurrent: 1,
            ..relaxed()
        });
        assert!(rl.try_acquire("breastcancer.org").is_ok());
        assert!(matches!(
            rl.try_acquire("breastcancer.org"),
            Err(ScraperError::RateLimited { .. })
        ));
        rl.release("breastcancer.org", true);
        assert!(rl.try_acquire("breastcancer.org").is_ok());
    }

    #[test]
    fn test_backoff_for_is_capped() {
        let cfg = DomainConfig {
            backoff_base_seconds: 2.0,
            max_backoff_seconds: 300.0,
            ..DomainConfig::default()
        };
        assert_eq!(backoff_for(2, &cfg), None);
        assert_eq!(backoff_for(3, &cfg), Some(Duration::from_secs(2)));
        assert_eq!(backoff_for(5, &cfg), Some(Duration::from_secs(8)));
        assert_eq!(backoff_for(50, &cfg), Some(Duration::from_secs(300)));
    }
}
