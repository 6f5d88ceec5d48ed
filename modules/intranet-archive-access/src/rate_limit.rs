//! Per-IP sliding-window rate limiting for grant requests. State lives in
//! memory and resets on restart.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window: Duration::from_secs(60),
        }
    }
}

/// Sliding-window check: drops entries older than the window and records
/// `now` when under the limit.
pub fn check_rate_limit(entries: &mut Vec<Instant>, now: Instant, config: &RateLimitConfig) -> bool {
    entries.retain(|t| now.duration_since(*t) < config.window);
    if entries.len() >= config.max_requests {
        return false;
    }
    entries.push(now);
    true
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    config: RateLimitConfig,
    entries: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now()).await
    }

    pub async fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut guard = self.entries.lock().await;
        let allowed = check_rate_limit(guard.entry(ip).or_default(), now, &self.config);
        // Forget idle clients so the map does not grow without bound.
        let window = self.config.window;
        guard.retain(|_, times| times.last().is_some_and(|t| now.duration_since(*t) < window));
        allowed
    }
}
