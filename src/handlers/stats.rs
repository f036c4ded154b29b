use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::client::ClientId;
use crate::quota::BYTES_PER_MB;
use crate::state::AppState;

// Usage of the calling client in its current windows
pub async fn stats_handler(State(state): State<Arc<AppState>>, client: ClientId) -> impl IntoResponse {
    let now = Instant::now();
    let admission = state.admission();
    let rate = admission.rate_limiter();
    let quota = admission.quota();
    let usage = quota.usage(&client, now);

    Json(json!({
        "ip": client.as_str(),
        "usage": {
            "requests_in_window": rate.requests_in_window(&client, now),
            "bytes_in_window": usage.bytes_consumed,
            "mb_in_window": (usage.bytes_consumed as f64 / BYTES_PER_MB as f64 * 100.0).round() / 100.0,
            "bytes_reserved": usage.bytes_reserved,
        },
        "limits": {
            "requests_per_window": rate.limit(),
            "rate_window_secs": rate.window().as_secs(),
            "quota_mb": quota.byte_limit() / BYTES_PER_MB,
            "quota_window_secs": quota.window().as_secs(),
        },
    }))
}
