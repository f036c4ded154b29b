pub mod admission;
pub mod catalog;
pub mod client;
pub mod collections;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod processor;
pub mod quota;
pub mod rate_limit;
pub mod raster;
pub mod state;
pub mod storage;
pub mod store;
pub mod sweeper;
pub mod turnstile;
pub mod worker;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::handlers::{
    collection_assets_handler, collections_handler, download_handler, health_handler, metrics_handler,
    stats_handler,
};
use crate::state::AppState;

fn cors(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([header::CONTENT_DISPOSITION, header::CONTENT_LENGTH, header::RETRY_AFTER])
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors(&state.allowed_origins);

    Router::new()
        .route("/health", get(health_handler))
        .route("/collections", get(collections_handler))
        .route("/collections/{collection_id}/assets", get(collection_assets_handler))
        .route("/download", post(download_handler))
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
