use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use tracing_subscriber::EnvFilter;
use upload_proxy::{
    AppState,
    BucketStorage,
    InMemoryRateLimiter,
    UploadConfig,
    routes,
    services::now_millis,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real deployments set the environment directly.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = UploadConfig::from_env().context("failed to load configuration")?;
    if config.api_key.is_none() {
        tracing::warn!("UPLOAD_API_KEY is not set, every upload will be rejected");
    }

    let storage = BucketStorage::from_backend(&config.storage)
        .context("failed to initialise object storage")?;
    let rate_limiter = Arc::new(InMemoryRateLimiter::default());

    let purge_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(purge_limiter.window_ms()));
        loop {
            interval.tick().await;
            let removed = purge_limiter.purge_expired(now_millis()).await;
            if removed > 0 {
                tracing::debug!(removed, "purged expired rate-limit entries");
            }
        }
    });

    let bind_addr = config.bind_addr;
    tracing::info!(
        bind_addr = %bind_addr,
        allowed_origin = config.allowed_origin.as_deref().unwrap_or("*"),
        storage = ?config.storage,
        "upload proxy starting"
    );

    let state = Arc::new(AppState::new(config, rate_limiter, Arc::new(storage)));

    let (addr, server) = warp::serve(routes(state))
        .try_bind_with_graceful_shutdown(bind_addr, async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .context("failed to bind listener")?;

    tracing::info!("Upload proxy running on http://{}", addr);
    server.await;

    Ok(())
}
