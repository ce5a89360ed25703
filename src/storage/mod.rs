mod bucket;

pub use bucket::BucketStorage;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::config::ALLOWED_TYPES;
use crate::errors::StorageError;


#[async_trait]
pub trait UploadStorage: Send + Sync {
    /// Writes the whole payload under `key`, tagging it with `content_type`.
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), StorageError>;
}

pub fn extension_for(content_type: &str) -> Option<&'static str> {
    ALLOWED_TYPES
        .iter()
        .find(|(mime, _)| *mime == content_type)
        .map(|(_, ext)| *ext)
}

pub fn generate_storage_key(extension: &str, now_ms: u64) -> String {
    format!("uploads/{}-{}.{}", now_ms, Uuid::new_v4(), extension)
}

pub fn public_url(base: &str, key: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}
