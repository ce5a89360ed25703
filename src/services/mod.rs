use crate::config::{API_KEY_HEADER, RATE_LIMIT_MAX, RATE_LIMIT_WINDOW_MS, UNKNOWN_CLIENT};
use crate::models::RateLimitEntry;
use async_trait::async_trait;
use hyper::HeaderMap;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;


pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Per-client request budget. Implementations decide where the counters live.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Records the request and returns whether it is within the limit.
    async fn check_and_increment(&self, client_id: &str) -> bool;
}

/// Fixed-window counters kept in process memory. Lost on restart.
pub struct InMemoryRateLimiter {
    entries: Mutex<HashMap<String, RateLimitEntry>>,
    max_requests: u32,
    window_ms: u64,
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_MAX, RATE_LIMIT_WINDOW_MS)
    }
}

impl InMemoryRateLimiter {
    pub fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_requests,
            window_ms,
        }
    }

    pub async fn check_and_increment_at(&self, client_id: &str, now_ms: u64) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(client_id) {
            Some(entry) if now_ms.saturating_sub(entry.window_start_ms) <= self.window_ms => {
                if entry.count >= self.max_requests {
                    return false;
                }
                entry.count += 1;
                true
            }
            _ => {
                entries.insert(client_id.to_string(), RateLimitEntry::new(now_ms));
                true
            }
        }
    }

    /// Drops entries whose window has already elapsed; returns how many went.
    pub async fn purge_expired(&self, now_ms: u64) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| now_ms.saturating_sub(entry.window_start_ms) <= self.window_ms);
        before - entries.len()
    }

    pub async fn entry(&self, client_id: &str) -> Option<RateLimitEntry> {
        self.entries.lock().await.get(client_id).copied()
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check_and_increment(&self, client_id: &str) -> bool {
        self.check_and_increment_at(client_id, now_millis()).await
    }
}

/// Reads the edge-injected client IP header; callers without one share a bucket.
pub fn client_identifier(headers: &HeaderMap, header_name: &str) -> String {
    headers
        .get(header_name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

fn secure_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

pub fn is_authenticated(headers: &HeaderMap, api_key: Option<&str>) -> bool {
    let Some(expected) = api_key else {
        return false;
    };
    headers
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|presented| secure_compare(presented, expected))
        .unwrap_or(false)
}
