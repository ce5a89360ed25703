use std::sync::Arc;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::UploadConfig;
use crate::services::RateLimiter;
use crate::storage::UploadStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start_ms: u64,
}

impl RateLimitEntry {
    pub fn new(now_ms: u64) -> Self {
        Self {
            count: 1,
            window_start_ms: now_ms,
        }
    }
}

/// The single `file` part of an upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

pub struct AppState {
    pub config: UploadConfig,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub storage: Arc<dyn UploadStorage>,
}

impl AppState {
    pub fn new(
        config: UploadConfig,
        rate_limiter: Arc<dyn RateLimiter>,
        storage: Arc<dyn UploadStorage>,
    ) -> Self {
        Self {
            config,
            rate_limiter,
            storage,
        }
    }
}
