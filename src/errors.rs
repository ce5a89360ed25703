use std::time::Duration;
use hyper::StatusCode;
use thiserror::Error;

use crate::config::{ALLOWED_TYPES_HINT, FILE_FIELD};
use crate::middleware::CorsHeaders;

/// Every way an upload can fail. `Display` is the message sent to the client.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Origin not allowed")]
    Forbidden,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Too many requests. Please try again later.")]
    TooManyRequests,
    #[error("No file provided. Send a multipart/form-data body with a \"{}\" field.", FILE_FIELD)]
    MalformedUpload,
    #[error("Unsupported file type \"{0}\". Allowed types: {hint}", hint = *ALLOWED_TYPES_HINT)]
    UnsupportedType(String),
    #[error("File exceeds the maximum upload size of {0} bytes")]
    PayloadTooLarge(u64),
    // The source is logged, never rendered.
    #[error("Failed to store file")]
    Storage(#[source] StorageError),
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::MalformedUpload | Self::UnsupportedType(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Storage(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object store error: {0}")]
    Backend(#[from] object_store::Error),
    #[error("storage write did not finish within {0:?}")]
    Timeout(Duration),
    #[error("storage configuration error: {0}")]
    Config(String),
}

/// A pipeline failure together with the CORS headers computed for the request,
/// so the rejection handler can still answer the browser.
#[derive(Debug)]
pub struct UploadRejection {
    pub error: UploadError,
    pub cors: CorsHeaders,
}

impl warp::reject::Reject for UploadRejection {}
