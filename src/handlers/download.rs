use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::info;

use crate::client::ClientId;
use crate::error::DownloadError;
use crate::metrics::{OUTCOMES, REQUESTS_TOTAL};
use crate::models::DownloadRequest;
use crate::orchestrator::Delivery;
use crate::state::AppState;

pub async fn download_handler(
    State(state): State<Arc<AppState>>,
    client: ClientId,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Response, DownloadError> {
    REQUESTS_TOTAL.inc();

    let result = async {
        let Json(payload) = payload.map_err(|e| DownloadError::InvalidRequest(e.body_text()))?;
        let request = payload.validate()?;
        state.orchestrator.handle(&client, request).await
    }
    .await;

    // successful outcomes are counted by the usage meter once the body is done
    result.map(respond).map_err(|e| {
        OUTCOMES.with_label_values(&[e.kind()]).inc();
        info!(client = %client, kind = e.kind(), error = %e, "download refused");
        e
    })
}

fn respond(delivery: Delivery) -> Response {
    match delivery {
        Delivery::Stored(stored) => Json(stored).into_response(),
        Delivery::Stream(artifact) => {
            let content_type = artifact.content_type();
            let length = artifact.len();
            let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", artifact.filename()))
                .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

            (
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
                    (header::CONTENT_LENGTH, HeaderValue::from(length)),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                artifact.into_body(),
            )
                .into_response()
        }
    }
}
