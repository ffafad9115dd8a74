// ABOUTME: Per-IP rate limiting for the dynamic client registration endpoint
// ABOUTME: Fixed-window counters in a sharded concurrent map with lazy cleanup
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use crate::config::RegistrationConfig;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of one rate-limit check
#[derive(Debug, Clone, Copy)]
pub struct RateLimitStatus {
    pub is_limited: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after_seconds: Option<u64>,
}

/// Registration rate limiter with per-IP tracking
///
/// `DashMap` gives sharded locking so the hot path never takes a global
/// mutex; stale entries are swept lazily once the map grows past the
/// configured threshold.
#[derive(Clone)]
pub struct RegistrationRateLimiter {
    state: Arc<DashMap<IpAddr, (u32, Instant)>>,
    limit: u32,
    window: Duration,
    cleanup_threshold: usize,
}

impl RegistrationRateLimiter {
    #[must_use]
    pub fn new(config: &RegistrationConfig) -> Self {
        Self {
            state: Arc::new(DashMap::new()),
            limit: config.max_clients_per_ip,
            window: Duration::from_secs(config.rate_limit_window_secs),
            cleanup_threshold: config.rate_limit_cleanup_threshold,
        }
    }

    /// Check and count one registration attempt from an IP
    #[must_use]
    pub fn check(&self, client_ip: IpAddr) -> RateLimitStatus {
        let now = Instant::now();

        let mut entry = self.state.entry(client_ip).or_insert((0, now));
        let (count, window_start) = entry.value_mut();

        if now.duration_since(*window_start) >= self.window {
            *count = 0;
            *window_start = now;
        }

        let is_limited = *count >= self.limit;
        if !is_limited {
            *count += 1;
        }
        let remaining = self.limit.saturating_sub(*count);
        let retry_after = if is_limited {
            Some(
                self.window
                    .saturating_sub(now.duration_since(*window_start))
                    .as_secs()
                    .max(1),
            )
        } else {
            None
        };
        drop(entry);

        if self.state.len() > self.cleanup_threshold {
            self.cleanup_stale(now);
        }

        RateLimitStatus {
            is_limited,
            limit: self.limit,
            remaining,
            retry_after_seconds: retry_after,
        }
    }

    fn cleanup_stale(&self, now: Instant) {
        let window = self.window;
        self.state
            .retain(|_ip, (_count, start)| now.duration_since(*start) < window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32) -> RegistrationRateLimiter {
        RegistrationRateLimiter::new(&RegistrationConfig {
            max_clients_per_ip: limit,
            rate_limit_window_secs: 3600,
            ..RegistrationConfig::default()
        })
    }

    #[test]
    fn allows_up_to_the_limit_then_rejects() {
        let limiter = limiter(3);
        let ip: IpAddr = "198.51.100.7".parse().unwrap();

        for _ in 0..3 {
            assert!(!limiter.check(ip).is_limited);
        }
        let status = limiter.check(ip);
        assert!(status.is_limited);
        assert!(status.retry_after_seconds.is_some());
    }

    #[test]
    fn tracks_ips_independently() {
        let limiter = limiter(1);
        let first: IpAddr = "198.51.100.7".parse().unwrap();
        let second: IpAddr = "198.51.100.8".parse().unwrap();

        assert!(!limiter.check(first).is_limited);
        assert!(limiter.check(first).is_limited);
        assert!(!limiter.check(second).is_limited);
    }
}
