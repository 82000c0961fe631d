//! Sliding-window rate limiting for relay requests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum distinct container names tracked before the least recently
/// active one is evicted.
const MAX_TRACKED_CONTAINERS: usize = 100;

/// Global cap across all containers, per hour.
const GLOBAL_LIMIT_PER_HOUR: usize = 30;

const PER_MINUTE: usize = 3;
const PER_TEN_MINUTES: usize = 10;
const PER_HOUR: usize = 20;

#[derive(Default)]
struct Windows {
    /// Container → request epoch seconds, oldest first.
    requests: HashMap<String, VecDeque<u64>>,
    global: VecDeque<u64>,
}

/// Per-container rate limiter with sliding windows (3/min, 10/10 min,
/// 20/hour) plus a global hourly cap. Entries older than an hour are
/// pruned lazily inside [`check`](RateLimiter::check).
#[derive(Default)]
pub struct RateLimiter {
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a request from `container` is allowed, recording
    /// it if so.
    pub fn check(&self, container: &str) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.check_at(container, now)
    }

    fn check_at(&self, container: &str, now: u64) -> bool {
        let mut guard = self.windows.lock().expect("rate limiter poisoned");
        let windows = &mut *guard;
        let hour_ago = now.saturating_sub(3600);

        while windows.global.front().is_some_and(|&t| t < hour_ago) {
            windows.global.pop_front();
        }
        if windows.global.len() >= GLOBAL_LIMIT_PER_HOUR {
            return false;
        }

        // Cap tracked containers: evict the least recently active.
        if !windows.requests.contains_key(container)
            && windows.requests.len() >= MAX_TRACKED_CONTAINERS
        {
            if let Some(oldest) = windows
                .requests
                .iter()
                .min_by_key(|(_, q)| q.back().copied().unwrap_or(0))
                .map(|(k, _)| k.clone())
            {
                windows.requests.remove(&oldest);
            }
        }

        let queue = windows.requests.entry(container.to_owned()).or_default();
        while queue.front().is_some_and(|&t| t < hour_ago) {
            queue.pop_front();
        }

        let last_minute = queue.iter().filter(|&&t| t > now.saturating_sub(60)).count();
        let last_ten = queue.iter().filter(|&&t| t > now.saturating_sub(600)).count();
        if last_minute >= PER_MINUTE || last_ten >= PER_TEN_MINUTES || queue.len() >= PER_HOUR {
            return false;
        }

        queue.push_back(now);
        windows.global.push_back(now);
        true
    }

    /// Seed a request timestamp directly (tests).
    #[cfg(test)]
    fn seed(&self, container: &str, at: u64) {
        let mut windows = self.windows.lock().unwrap();
        windows
            .requests
            .entry(container.to_owned())
            .or_default()
            .push_back(at);
    }
}
