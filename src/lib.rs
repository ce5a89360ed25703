pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod storage;

pub use config::UploadConfig;
pub use errors::{StorageError, UploadError};
pub use handlers::routes;
pub use models::{AppState, RateLimitEntry, UploadedFile};
pub use services::{InMemoryRateLimiter, RateLimiter};
pub use storage::{BucketStorage, UploadStorage};
