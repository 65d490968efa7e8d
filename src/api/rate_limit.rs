use hyper::Method;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::RateLimitConfig;

pub const API_KEY_HEADER: &str = "x-api-key";

const HEALTH_MULTIPLIER: u32 = 5;

struct Record {
    count: u32,
    first_seen: Instant,
    last_seen: Instant,
}

#[derive(Default)]
struct Records {
    by_ip: HashMap<String, Record>,
    by_key: HashMap<String, Record>,
}

/// Fixed-window request counters per client ip and per api key.
///
/// The per-ip limit depends on the route: health checks get five times the
/// base, writes get half of it. Development doubles the base.
pub struct RateLimiter {
    config: RateLimitConfig,
    records: Mutex<Records>,
}

impl RateLimiter {
    pub fn new(mut config: RateLimitConfig, development: bool) -> Self {
        if development {
            config.per_ip = config.per_ip.saturating_mul(2);
        }
        Self {
            config,
            records: Mutex::new(Records::default()),
        }
    }

    pub fn window(&self) -> Duration {
        self.config.window
    }

    /// Per-ip limit for a request to `path` with `method`.
    pub fn limit_for(&self, method: &Method, path: &str) -> u32 {
        let base = self.config.per_ip;
        if path == "/health" || path == "/api/v1/health" {
            return base.saturating_mul(HEALTH_MULTIPLIER);
        }
        match *method {
            Method::POST | Method::PUT | Method::DELETE => (base / 2).max(1),
            _ => base,
        }
    }

    pub fn allow(&self, client_ip: &str, api_key: Option<&str>, ip_limit: u32) -> bool {
        self.allow_at(client_ip, api_key, ip_limit, Instant::now())
    }

    fn allow_at(
        &self,
        client_ip: &str,
        api_key: Option<&str>,
        ip_limit: u32,
        now: Instant,
    ) -> bool {
        let window = self.config.window;
        let mut records = self.records.lock();

        if !check_limit(&mut records.by_ip, client_ip, ip_limit, window, now) {
            return false;
        }
        match api_key {
            Some(key) if !key.is_empty() => {
                check_limit(&mut records.by_key, key, self.config.per_api_key, window, now)
            }
            _ => true,
        }
    }

    /// Drops records idle for more than two windows. Returns how many went.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    fn cleanup_at(&self, now: Instant) -> usize {
        let expiry = self.config.window * 2;
        let mut records = self.records.lock();
        let before = records.by_ip.len() + records.by_key.len();
        records
            .by_ip
            .retain(|_, r| now.saturating_duration_since(r.last_seen) <= expiry);
        records
            .by_key
            .retain(|_, r| now.saturating_duration_since(r.last_seen) <= expiry);
        before - (records.by_ip.len() + records.by_key.len())
    }

    pub fn tracked(&self) -> (usize, usize) {
        let records = self.records.lock();
        (records.by_ip.len(), records.by_key.len())
    }

    pub async fn run_cleanup(self: Arc<Self>) {
        info!(
            interval = ?self.config.cleanup_interval,
            "Starting rate limit cleanup loop..."
        );
        let mut interval = tokio::time::interval(self.config.cleanup_interval);
        loop {
            interval.tick().await;
            let removed = self.cleanup();
            if removed > 0 {
                let (ips, keys) = self.tracked();
                debug!(
                    removed = removed,
                    ips = ips,
                    api_keys = keys,
                    "expired rate limit records removed"
                );
            }
        }
    }
}

fn check_limit(
    records: &mut HashMap<String, Record>,
    identifier: &str,
    limit: u32,
    window: Duration,
    now: Instant,
) -> bool {
    let record = records
        .entry(identifier.to_string())
        .or_insert_with(|| Record {
            count: 0,
            first_seen: now,
            last_seen: now,
        });

    if record.count == 0 || now.saturating_duration_since(record.first_seen) > window {
        *record = Record {
            count: 1,
            first_seen: now,
            last_seen: now,
        };
        return true;
    }
    if record.count >= limit {
        return false;
    }
    record.count += 1;
    record.last_seen = now;
    true
}
