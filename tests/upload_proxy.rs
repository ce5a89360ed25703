use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path;
use object_store::ObjectStore;
use serde_json::Value;
use upload_proxy::{
    AppState,
    BucketStorage,
    InMemoryRateLimiter,
    StorageError,
    UploadConfig,
    UploadStorage,
    routes,
};
use warp::http::Response;

const API_KEY: &str = "test-upload-key";
const PUBLIC_BASE: &str = "https://pub-abc123.r2.dev/";
const BOUNDARY: &str = "UPLOAD-TEST-BOUNDARY";

struct FailingStorage;

#[async_trait]
impl UploadStorage for FailingStorage {
    async fn put(&self, _key: &str, _bytes: Bytes, _content_type: &str) -> Result<(), StorageError> {
        Err(StorageError::Config("AccessDenied: bucket quota exceeded for account 42".to_string()))
    }
}

struct SlowStorage;

#[async_trait]
impl UploadStorage for SlowStorage {
    async fn put(&self, _key: &str, _bytes: Bytes, _content_type: &str) -> Result<(), StorageError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }
}

fn config() -> UploadConfig {
    UploadConfig::new(PUBLIC_BASE).with_api_key(API_KEY)
}

fn state_with(config: UploadConfig, storage: Arc<dyn UploadStorage>) -> Arc<AppState> {
    Arc::new(AppState::new(config, Arc::new(InMemoryRateLimiter::default()), storage))
}

fn multipart_body(file_name: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: {c}\r\n\r\n",
        b = BOUNDARY,
        f = file_name,
        c = content_type
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(file_name: &str, content_type: &str, data: &[u8]) -> warp::test::RequestBuilder {
    warp::test::request()
        .method("POST")
        .path("/")
        .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
        .header("x-upload-api-key", API_KEY)
        .body(multipart_body(file_name, content_type, data))
}

fn json_body(response: &Response<Bytes>) -> Value {
    serde_json::from_slice(response.body()).unwrap()
}

fn error_message(response: &Response<Bytes>) -> String {
    json_body(response)["error"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_upload_png_returns_public_url() {
    let storage = BucketStorage::in_memory();
    let filter = routes(state_with(config(), Arc::new(storage.clone())));

    let resp = upload_request("photo.png", "image/png", b"\x89PNG\r\n\x1a\n")
        .header("origin", "https://editor.example")
        .reply(&filter)
        .await;

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "application/json");
    assert_eq!(resp.headers()["access-control-allow-origin"], "https://editor.example");

    let url = json_body(&resp)["url"].as_str().unwrap().to_string();
    let key = url.strip_prefix("https://pub-abc123.r2.dev/").unwrap();
    let name = key.strip_prefix("uploads/").unwrap();
    let (ts, rest) = name.split_once('-').unwrap();
    assert_eq!(ts.len(), 13);
    assert!(ts.chars().all(|c| c.is_ascii_digit()));
    let uuid = rest.strip_suffix(".png").unwrap();
    assert!(uuid::Uuid::parse_str(uuid).is_ok());

    let stored = storage.store().get(&Path::from(key)).await.unwrap();
    assert_eq!(stored.bytes().await.unwrap(), Bytes::from_static(b"\x89PNG\r\n\x1a\n"));
}

#[tokio::test]
async fn test_extension_follows_declared_type() {
    let filter = routes(state_with(config(), Arc::new(BucketStorage::in_memory())));

    for (content_type, ext) in [
        ("image/jpeg", ".jpg"),
        ("image/gif", ".gif"),
        ("image/webp", ".webp"),
        ("image/svg+xml", ".svg"),
    ] {
        let resp = upload_request("upload", content_type, b"data").reply(&filter).await;
        assert_eq!(resp.status(), 200, "{}", content_type);
        let url = json_body(&resp)["url"].as_str().unwrap().to_string();
        assert!(url.ends_with(ext), "{} -> {}", content_type, url);
    }
}

#[tokio::test]
async fn test_unsupported_type() {
    let filter = routes(state_with(config(), Arc::new(BucketStorage::in_memory())));

    let resp = upload_request("report.pdf", "application/pdf", b"%PDF-1.4").reply(&filter).await;

    assert_eq!(resp.status(), 400);
    assert_eq!(
        resp.body().as_ref(),
        br#"{"error":"Unsupported file type \"application/pdf\". Allowed types: image/jpeg, image/png, image/gif, image/webp, image/svg+xml"}"#
    );
}

#[tokio::test]
async fn test_unparseable_type_is_named_in_error() {
    let filter = routes(state_with(config(), Arc::new(BucketStorage::in_memory())));

    let resp = upload_request("x", "image", b"data").reply(&filter).await;

    assert_eq!(resp.status(), 400);
    assert_eq!(
        resp.body().as_ref(),
        br#"{"error":"Unsupported file type \"image\". Allowed types: image/jpeg, image/png, image/gif, image/webp, image/svg+xml"}"#
    );
}

#[tokio::test]
async fn test_missing_or_wrong_api_key() {
    let filter = routes(state_with(config(), Arc::new(BucketStorage::in_memory())));

    let missing = warp::test::request()
        .method("POST")
        .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
        .body(multipart_body("photo.png", "image/png", b"data"))
        .reply(&filter)
        .await;
    assert_eq!(missing.status(), 401);
    assert_eq!(error_message(&missing), "Unauthorized");

    let wrong = upload_request("photo.png", "image/png", b"data")
        .header("x-upload-api-key", "not-the-key")
        .reply(&filter)
        .await;
    assert_eq!(wrong.status(), 401);

    // Even a garbage body is rejected as unauthenticated first
    let garbage = warp::test::request()
        .method("POST")
        .header("x-upload-api-key", "nope")
        .body("not multipart")
        .reply(&filter)
        .await;
    assert_eq!(garbage.status(), 401);
}

#[tokio::test]
async fn test_unconfigured_api_key_rejects_everything() {
    let config = UploadConfig::new(PUBLIC_BASE);
    let filter = routes(state_with(config, Arc::new(BucketStorage::in_memory())));

    let resp = upload_request("photo.png", "image/png", b"data").reply(&filter).await;
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_preflight() {
    let filter = routes(state_with(config(), Arc::new(BucketStorage::in_memory())));

    let resp = warp::test::request()
        .method("OPTIONS")
        .path("/anything")
        .header("origin", "https://editor.example")
        .reply(&filter)
        .await;

    assert_eq!(resp.status(), 204);
    assert!(resp.body().is_empty());
    assert_eq!(resp.headers()["access-control-allow-origin"], "https://editor.example");
    assert_eq!(resp.headers()["access-control-allow-methods"], "POST, OPTIONS");
    assert_eq!(resp.headers()["access-control-allow-headers"], "Content-Type, X-Upload-Api-Key");
    assert_eq!(resp.headers()["access-control-max-age"], "86400");
}

#[tokio::test]
async fn test_other_methods_not_allowed() {
    let filter = routes(state_with(config(), Arc::new(BucketStorage::in_memory())));

    for method in ["GET", "PUT", "DELETE", "PATCH"] {
        let resp = warp::test::request()
            .method(method)
            .header("x-upload-api-key", API_KEY)
            .reply(&filter)
            .await;
        assert_eq!(resp.status(), 405, "{}", method);
        assert_eq!(error_message(&resp), "Method not allowed");
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    }
}

#[tokio::test]
async fn test_origin_restriction() {
    let config = config().with_allowed_origin("https://a.example");
    let filter = routes(state_with(config, Arc::new(BucketStorage::in_memory())));

    let blocked = upload_request("photo.png", "image/png", b"data")
        .header("origin", "https://b.example")
        .reply(&filter)
        .await;
    assert_eq!(blocked.status(), 403);
    assert_eq!(error_message(&blocked), "Origin not allowed");
    assert_eq!(blocked.headers()["access-control-allow-origin"], "https://a.example");

    // Origin is checked before the key
    let blocked_without_key = warp::test::request()
        .method("POST")
        .header("origin", "https://b.example")
        .reply(&filter)
        .await;
    assert_eq!(blocked_without_key.status(), 403);

    let allowed = upload_request("photo.png", "image/png", b"data")
        .header("origin", "https://a.example")
        .reply(&filter)
        .await;
    assert_eq!(allowed.status(), 200);
    assert_eq!(allowed.headers()["access-control-allow-origin"], "https://a.example");
}

#[tokio::test]
async fn test_wildcard_cors_without_origin() {
    let filter = routes(state_with(config(), Arc::new(BucketStorage::in_memory())));

    let resp = upload_request("photo.png", "image/png", b"data").reply(&filter).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn test_rate_limiting() {
    let filter = routes(state_with(config(), Arc::new(BucketStorage::in_memory())));

    for i in 1..=20 {
        let resp = upload_request("photo.png", "image/png", b"data")
            .header("cf-connecting-ip", "203.0.113.9")
            .reply(&filter)
            .await;
        assert_eq!(resp.status(), 200, "request {}", i);
    }

    let limited = upload_request("photo.png", "image/png", b"data")
        .header("cf-connecting-ip", "203.0.113.9")
        .reply(&filter)
        .await;
    assert_eq!(limited.status(), 429);
    assert_eq!(error_message(&limited), "Too many requests. Please try again later.");

    // A different client is unaffected
    let other = upload_request("photo.png", "image/png", b"data")
        .header("cf-connecting-ip", "198.51.100.4")
        .reply(&filter)
        .await;
    assert_eq!(other.status(), 200);
}

#[tokio::test]
async fn test_unauthenticated_requests_do_not_spend_budget() {
    let filter = routes(state_with(config(), Arc::new(BucketStorage::in_memory())));

    for _ in 0..30 {
        let resp = upload_request("photo.png", "image/png", b"data")
            .header("x-upload-api-key", "wrong")
            .reply(&filter)
            .await;
        assert_eq!(resp.status(), 401);
    }

    let resp = upload_request("photo.png", "image/png", b"data").reply(&filter).await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_malformed_body() {
    let filter = routes(state_with(config(), Arc::new(BucketStorage::in_memory())));

    let resp = warp::test::request()
        .method("POST")
        .header("x-upload-api-key", API_KEY)
        .header("content-type", "application/json")
        .body(r#"{"file":"photo.png"}"#)
        .reply(&filter)
        .await;

    assert_eq!(resp.status(), 400);
    assert_eq!(
        error_message(&resp),
        "No file provided. Send a multipart/form-data body with a \"file\" field."
    );
}

#[tokio::test]
async fn test_oversized_upload() {
    let config = config().with_max_upload_bytes(1024);
    let filter = routes(state_with(config, Arc::new(BucketStorage::in_memory())));

    let resp = upload_request("big.png", "image/png", &[7u8; 8192]).reply(&filter).await;
    assert_eq!(resp.status(), 413);
}

#[tokio::test]
async fn test_storage_failure_is_bad_gateway() {
    let filter = routes(state_with(config(), Arc::new(FailingStorage)));

    let resp = upload_request("photo.png", "image/png", b"data").reply(&filter).await;

    assert_eq!(resp.status(), 502);
    assert_eq!(error_message(&resp), "Failed to store file");
    let raw = String::from_utf8_lossy(resp.body());
    assert!(!raw.contains("AccessDenied"));
    assert!(!raw.contains("quota"));
}

#[tokio::test]
async fn test_storage_timeout_is_bad_gateway() {
    let config = config().with_storage_timeout(Duration::from_millis(50));
    let filter = routes(state_with(config, Arc::new(SlowStorage)));

    let resp = upload_request("photo.png", "image/png", b"data").reply(&filter).await;

    assert_eq!(resp.status(), 502);
    assert_eq!(error_message(&resp), "Failed to store file");
}
