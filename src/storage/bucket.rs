use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload};

use super::UploadStorage;
use crate::config::StorageBackend;
use crate::errors::StorageError;

#[derive(Clone)]
pub struct BucketStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl BucketStorage {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory")
    }

    /// S3-compatible bucket. Credentials come from the usual `AWS_*` variables.
    pub fn s3(bucket: &str, region: &str, endpoint: Option<&str>) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(region);

        if let Some(endpoint) = endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self::new(Arc::new(store), bucket))
    }

    pub fn from_backend(backend: &StorageBackend) -> Result<Self, StorageError> {
        match backend {
            StorageBackend::S3 { bucket, region, endpoint } => {
                Self::s3(bucket, region, endpoint.as_deref())
            }
            StorageBackend::Memory => Ok(Self::in_memory()),
        }
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }
}

#[async_trait]
impl UploadStorage for BucketStorage {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), StorageError> {
        let size = bytes.len();
        let location = Path::from(key);
        let start = Instant::now();

        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        );
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&location, PutPayload::from(bytes), options)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "object put failed"
                );
                StorageError::Backend(e)
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            content_type = %content_type,
            size_bytes = size,
            duration_ms = start.elapsed().as_millis() as u64,
            "object stored"
        );

        Ok(())
    }
}
