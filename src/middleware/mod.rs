use hyper::{HeaderMap, header::{HeaderName, HeaderValue, VARY}};
use tracing::debug;

use crate::errors::UploadError;


pub const CORS_ALLOW_METHODS: &str = "POST, OPTIONS";
pub const CORS_ALLOW_HEADERS: &str = "Content-Type, X-Upload-Api-Key";
pub const CORS_MAX_AGE_SECS: &str = "86400";

/// The `Access-Control-Allow-Origin` value chosen for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsHeaders {
    allow_origin: String,
    echoed: bool,
}

impl CorsHeaders {
    /// The configured origin wins; otherwise echo the caller, or `*` without one.
    pub fn resolve(allowed_origin: Option<&str>, request_origin: Option<&str>) -> Self {
        match (allowed_origin, request_origin) {
            (Some(allowed), _) => Self { allow_origin: allowed.to_string(), echoed: false },
            (None, Some(origin)) => Self { allow_origin: origin.to_string(), echoed: true },
            (None, None) => Self::wildcard(),
        }
    }

    pub fn wildcard() -> Self {
        Self { allow_origin: "*".to_string(), echoed: false }
    }

    pub fn allow_origin(&self) -> &str {
        &self.allow_origin
    }
}

pub fn add_cors_headers(headers: &mut HeaderMap, cors: &CorsHeaders) {
    let allow_origin = match HeaderValue::from_str(cors.allow_origin()) {
        Ok(value) => value,
        Err(_) => {
            debug!(origin = %cors.allow_origin(), "origin is not a valid header value, using *");
            HeaderValue::from_static("*")
        }
    };
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        allow_origin,
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );
    headers.insert(
        HeaderName::from_static("access-control-max-age"),
        HeaderValue::from_static(CORS_MAX_AGE_SECS),
    );
    if cors.echoed {
        headers.insert(VARY, HeaderValue::from_static("Origin"));
    }
}

pub fn check_origin(allowed_origin: Option<&str>, request_origin: Option<&str>) -> Result<(), UploadError> {
    match allowed_origin {
        None => Ok(()),
        Some(allowed) if request_origin == Some(allowed) => Ok(()),
        Some(_) => Err(UploadError::Forbidden),
    }
}
