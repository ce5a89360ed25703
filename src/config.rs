use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use lazy_static::lazy_static;
use thiserror::Error;

pub const RATE_LIMIT_MAX: u32 = 20; // requests per window
pub const RATE_LIMIT_WINDOW_MS: u64 = 60_000; // window size in milliseconds
pub const STORAGE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024; // edge platform body limit
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3030";
pub const DEFAULT_CLIENT_IP_HEADER: &str = "cf-connecting-ip";
pub const DEFAULT_S3_REGION: &str = "auto";

pub const API_KEY_HEADER: &str = "x-upload-api-key";
pub const FILE_FIELD: &str = "file";
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Accepted MIME types and the extension each one is stored under.
pub const ALLOWED_TYPES: [(&str, &str); 5] = [
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
];

lazy_static! {
    pub static ref ALLOWED_TYPES_HINT: String = ALLOWED_TYPES
        .iter()
        .map(|(mime, _)| *mime)
        .collect::<Vec<_>>()
        .join(", ");
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    S3 {
        bucket: String,
        region: String,
        endpoint: Option<String>,
    },
    Memory,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub bind_addr: SocketAddr,
    /// `None` rejects every upload with 401.
    pub api_key: Option<String>,
    /// `None` accepts any origin and echoes it back.
    pub allowed_origin: Option<String>,
    pub public_base_url: String,
    pub client_ip_header: String,
    pub max_upload_bytes: u64,
    pub storage_timeout: Duration,
    pub storage: StorageBackend,
}

impl UploadConfig {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3030)),
            api_key: None,
            allowed_origin: None,
            public_base_url: public_base_url.into(),
            client_ip_header: DEFAULT_CLIENT_IP_HEADER.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            storage_timeout: Duration::from_secs(STORAGE_TIMEOUT_SECS),
            storage: StorageBackend::Memory,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = non_empty(Some(api_key.into()));
        self
    }

    pub fn with_allowed_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origin = non_empty(Some(origin.into()));
        self
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: u64) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = get("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                name: "BIND_ADDR",
                reason: e.to_string(),
            })?;

        let public_base_url = non_empty(get("PUBLIC_BASE_URL"))
            .ok_or(ConfigError::Missing("PUBLIC_BASE_URL"))?;

        let max_upload_bytes = match non_empty(get("MAX_UPLOAD_BYTES")) {
            Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                name: "MAX_UPLOAD_BYTES",
                reason: e.to_string(),
            })?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let storage = match non_empty(get("STORAGE_BACKEND"))
            .unwrap_or_else(|| "s3".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "s3" => StorageBackend::S3 {
                bucket: non_empty(get("S3_BUCKET"))
                    .ok_or(ConfigError::Missing("S3_BUCKET"))?,
                region: non_empty(get("S3_REGION"))
                    .unwrap_or_else(|| DEFAULT_S3_REGION.to_string()),
                endpoint: non_empty(get("S3_ENDPOINT")),
            },
            "memory" => StorageBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    name: "STORAGE_BACKEND",
                    reason: format!("expected `s3` or `memory`, got `{}`", other),
                })
            }
        };

        Ok(Self {
            bind_addr,
            api_key: non_empty(get("UPLOAD_API_KEY")),
            allowed_origin: non_empty(get("ALLOWED_ORIGIN")),
            public_base_url,
            client_ip_header: non_empty(get("CLIENT_IP_HEADER"))
                .map(|h| h.to_ascii_lowercase())
                .unwrap_or_else(|| DEFAULT_CLIENT_IP_HEADER.to_string()),
            max_upload_bytes,
            storage_timeout: Duration::from_secs(STORAGE_TIMEOUT_SECS),
            storage,
        })
    }
}

/// Trims the value and treats an empty result as unset.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
