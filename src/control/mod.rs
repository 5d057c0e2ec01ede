//! Scraper execution control: everything between "scrape this domain" and
//! the network.
//!
//! - [`rate_limiter`]: per-domain admission (rate, delay, burst, concurrency, backoff)
//! - [`cache`]: URL-hash keyed cache with per-content-type TTLs
//! - [`registry`]: extractor chains with priority and fallback
//! - [`monitor`]: request timing and outcome counters
//! - [`compliance`]: robots.txt and the audit log
//! - [`fetch`]: the context that ties the above together for extractors

pub mod cache;
pub mod compliance;
pub mod fetch;
pub mod monitor;
pub mod rate_limiter;
pub mod registry;
