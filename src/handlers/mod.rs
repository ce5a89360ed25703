use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use bytes::{Buf, Bytes};
use futures::{Stream, TryStreamExt};
use hyper::{Body, HeaderMap, Method, Response, StatusCode, header::{CONTENT_TYPE, ORIGIN}};
use multer::{Constraints, Multipart, SizeLimit};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use warp::{Filter, Rejection, Reply};

use crate::config::FILE_FIELD;
use crate::errors::{StorageError, UploadError, UploadRejection};
use crate::middleware::{add_cors_headers, check_origin, CorsHeaders};
use crate::models::{AppState, ErrorBody, UploadResponse, UploadedFile};
use crate::services::{client_identifier, is_authenticated, now_millis};
use crate::storage::{extension_for, generate_storage_key, public_url};


enum Outcome {
    Preflight,
    Uploaded(UploadResponse),
}

/// The single upload endpoint: every path, routed by method only.
pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let state_filter = warp::any().map(move || state.clone());

    warp::any()
        .and(warp::method())
        .and(warp::header::headers_cloned())
        .and(warp::body::stream())
        .and(state_filter)
        .and_then(handle_upload)
        .recover(handle_rejection)
}

pub async fn handle_upload<S, B>(
    method: Method,
    headers: HeaderMap,
    body: S,
    state: Arc<AppState>,
) -> Result<Response<Body>, Rejection>
where
    S: Stream<Item = Result<B, warp::Error>> + Send + 'static,
    B: Buf + Send + 'static,
{
    let start_time = Instant::now();
    let cors = CorsHeaders::resolve(
        state.config.allowed_origin.as_deref(),
        request_origin(&headers),
    );
    let body = body.map_ok(|mut buf| buf.copy_to_bytes(buf.remaining()));

    let outcome = process_upload(&method, &headers, body, &state).await;
    let status = match &outcome {
        Ok(Outcome::Preflight) => StatusCode::NO_CONTENT,
        Ok(Outcome::Uploaded(_)) => StatusCode::OK,
        Err(e) => e.status(),
    };
    info!(
        method = %method,
        status = status.as_u16(),
        duration_ms = start_time.elapsed().as_millis() as u64,
        "upload request handled"
    );

    match outcome {
        Ok(Outcome::Preflight) => {
            let mut response = StatusCode::NO_CONTENT.into_response();
            add_cors_headers(response.headers_mut(), &cors);
            Ok(response)
        }
        Ok(Outcome::Uploaded(uploaded)) => Ok(json_response(StatusCode::OK, &uploaded, &cors)),
        Err(error) => Err(warp::reject::custom(UploadRejection { error, cors })),
    }
}

async fn process_upload<S>(
    method: &Method,
    headers: &HeaderMap,
    body: S,
    state: &AppState,
) -> Result<Outcome, UploadError>
where
    S: Stream<Item = Result<Bytes, warp::Error>> + Send + 'static,
{
    let config = &state.config;

    if method == Method::OPTIONS {
        return Ok(Outcome::Preflight);
    }
    if method != Method::POST {
        return Err(UploadError::MethodNotAllowed);
    }

    check_origin(config.allowed_origin.as_deref(), request_origin(headers))?;

    if !is_authenticated(headers, config.api_key.as_deref()) {
        return Err(UploadError::Unauthorized);
    }

    let client_id = client_identifier(headers, &config.client_ip_header);
    if !state.rate_limiter.check_and_increment(&client_id).await {
        warn!(client_id = %client_id, "rate limit exceeded");
        return Err(UploadError::TooManyRequests);
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    let file = parse_upload(content_type, body, config.max_upload_bytes).await?;

    let extension = extension_for(&file.content_type)
        .ok_or_else(|| UploadError::UnsupportedType(file.content_type.clone()))?;
    let key = generate_storage_key(extension, now_millis());
    debug!(
        key = %key,
        file_name = %file.file_name,
        size_bytes = file.bytes.len(),
        "storing upload"
    );

    let write = state.storage.put(&key, file.bytes, &file.content_type);
    match timeout(config.storage_timeout, write).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(error = %e, key = %key, "storage write failed");
            return Err(UploadError::Storage(e));
        }
        Err(_) => {
            let e = StorageError::Timeout(config.storage_timeout);
            error!(error = %e, key = %key, "storage write timed out");
            return Err(UploadError::Storage(e));
        }
    }

    Ok(Outcome::Uploaded(UploadResponse {
        url: public_url(&config.public_base_url, &key),
    }))
}

/// Pulls the single `file` part out of a multipart body.
pub async fn parse_upload<S, O, E>(
    content_type: &str,
    body: S,
    max_bytes: u64,
) -> Result<UploadedFile, UploadError>
where
    S: Stream<Item = Result<O, E>> + Send + 'static,
    O: Into<Bytes> + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    let boundary = multer::parse_boundary(content_type).map_err(|e| {
        debug!(error = %e, content_type = %content_type, "not a multipart body");
        UploadError::MalformedUpload
    })?;
    let constraints = Constraints::new()
        .size_limit(SizeLimit::new().whole_stream(max_bytes).per_field(max_bytes));
    let mut multipart = Multipart::with_constraints(body, boundary, constraints);

    let mut file = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        if file.is_some() {
            debug!("more than one file part");
            return Err(UploadError::MalformedUpload);
        }
        // A part without a file name is a plain form value.
        let Some(file_name) = field.file_name().map(str::to_string) else {
            debug!("file part is not a file");
            return Err(UploadError::MalformedUpload);
        };
        // Unparseable types keep their raw header text for the error message.
        let content_type = match field.content_type() {
            Some(mime) => mime.essence_str().to_string(),
            None => field
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|h| h.to_str().ok())
                .map(|raw| raw.trim().to_string())
                .unwrap_or_default(),
        };
        let bytes = field.bytes().await.map_err(multipart_error)?;

        file = Some(UploadedFile {
            file_name,
            content_type,
            bytes,
        });
    }

    file.ok_or(UploadError::MalformedUpload)
}

fn multipart_error(err: multer::Error) -> UploadError {
    match err {
        multer::Error::StreamSizeExceeded { limit }
        | multer::Error::FieldSizeExceeded { limit, .. } => UploadError::PayloadTooLarge(limit),
        other => {
            debug!(error = %other, "multipart parse failed");
            UploadError::MalformedUpload
        }
    }
}

fn request_origin(headers: &HeaderMap) -> Option<&str> {
    headers.get(ORIGIN).and_then(|h| h.to_str().ok())
}

fn json_response<T: Serialize>(status: StatusCode, body: &T, cors: &CorsHeaders) -> Response<Body> {
    let mut response = warp::reply::with_status(warp::reply::json(body), status).into_response();
    add_cors_headers(response.headers_mut(), cors);
    response
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    if let Some(rejection) = err.find::<UploadRejection>() {
        let body = ErrorBody {
            error: rejection.error.to_string(),
        };
        return Ok(json_response(rejection.error.status(), &body, &rejection.cors));
    }

    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found")
    } else {
        error!(rejection = ?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(json_response(
        code,
        &ErrorBody { error: message.to_string() },
        &CorsHeaders::wildcard(),
    ))
}
