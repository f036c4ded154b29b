use anyhow::{Context, bail};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sat_tile_gateway::admission::AdmissionControl;
use sat_tile_gateway::catalog::StacCatalog;
use sat_tile_gateway::config::{Config, DeliveryMode};
use sat_tile_gateway::orchestrator::Orchestrator;
use sat_tile_gateway::processor::RasterProcessor;
use sat_tile_gateway::quota::QuotaTracker;
use sat_tile_gateway::rate_limit::RateLimiter;
use sat_tile_gateway::state::AppState;
use sat_tile_gateway::storage::DeferredStorage;
use sat_tile_gateway::store::InMemoryWindowStore;
use sat_tile_gateway::sweeper::window_sweeper;
use sat_tile_gateway::turnstile::TurnstileVerifier;
use sat_tile_gateway::worker::ProcessingQueue;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sat_tile_gateway=info,tower_http=info")),
        )
        .init();

    // parse cli arguments
    let config = Config::parse();
    let client = reqwest::Client::builder()
        .user_agent(concat!("sat-tile-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;

    let verifier = TurnstileVerifier::new(
        client.clone(),
        config.turnstile_secret_key.clone(),
        config.turnstile_verify_url.clone(),
    );
    if !verifier.is_enabled() {
        warn!("TURNSTILE_SECRET_KEY not set, bot verification is disabled");
    }

    let admission = Arc::new(AdmissionControl::new(
        Arc::new(verifier),
        RateLimiter::new(Arc::new(InMemoryWindowStore::new()), config.rate_limit, config.rate_window()),
        QuotaTracker::new(
            Arc::new(InMemoryWindowStore::new()),
            config.quota_bytes(),
            config.quota_window(),
            config.max_file_size_bytes(),
        ),
    ));

    let catalog = StacCatalog::new(
        client.clone(),
        &config.stac_url,
        Some(config.sas_url.as_str()),
        config.upstream_timeout(),
    );
    let processor = RasterProcessor::new(
        client.clone(),
        config.max_file_size_bytes(),
        config.max_source_size_bytes(),
        config.upstream_timeout(),
    );
    let queue = ProcessingQueue::spawn(
        Arc::new(processor),
        config.processing_workers as usize,
        config.processing_queue as usize,
    );

    let storage = match config.delivery_mode {
        DeliveryMode::Stream => None,
        DeliveryMode::Deferred => Some(deferred_storage(&config).await?),
    };

    let orchestrator = Orchestrator::new(
        admission.clone(),
        Arc::new(catalog),
        queue,
        storage,
        config.max_file_size_bytes(),
    );

    // creating shared state
    let state = Arc::new(AppState {
        orchestrator,
        trust_forwarded_for: config.trust_forwarded_for,
        allowed_origins: config.origins(),
    });

    // spawn the window sweeper
    tokio::spawn(window_sweeper(
        admission,
        Duration::from_secs(config.sweep_interval_secs),
    ));

    let app = sat_tile_gateway::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!(addr = %addr, "sat-tile-gateway listening");
    info!(stac = %config.stac_url, "catalog");
    info!(
        rate_limit = config.rate_limit,
        rate_window_secs = config.rate_window_secs,
        quota_mb = config.quota_mb,
        quota_window_secs = config.quota_window_secs,
        max_file_size_mb = config.max_file_size_mb,
        "limits (per instance)"
    );
    info!(mode = ?config.delivery_mode, "delivery");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shut down");
    Ok(())
}

#[cfg(feature = "s3")]
async fn deferred_storage(config: &Config) -> anyhow::Result<DeferredStorage> {
    use sat_tile_gateway::storage::s3::S3ObjectStore;

    let Some(bucket) = config.s3_bucket.clone() else {
        bail!("DELIVERY_MODE=deferred requires S3_BUCKET");
    };
    info!(bucket = %bucket, region = %config.s3_region, "deferred delivery via S3");

    let store = S3ObjectStore::new(bucket, config.s3_region.clone(), config.s3_endpoint.clone()).await;
    Ok(DeferredStorage::new(
        Arc::new(store),
        Duration::from_secs(config.presigned_url_expiry_secs),
        Duration::from_secs(config.object_retention_secs),
    ))
}

#[cfg(not(feature = "s3"))]
async fn deferred_storage(_config: &Config) -> anyhow::Result<DeferredStorage> {
    bail!("DELIVERY_MODE=deferred needs a build with the `s3` feature")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
