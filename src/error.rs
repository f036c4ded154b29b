//! Error kinds surfaced by the download pipeline.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Every way a download can be refused or fail.
///
/// All variants are one-shot: nothing is retried inside the gateway, the
/// caller decides whether to resubmit.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("security verification failed, refresh and try again")]
    AuthFailed,

    #[error("too many requests, retry in {} second(s)", retry_secs(.retry_after))]
    RateLimited { retry_after: Duration },

    #[error("download quota exceeded, resets in {} second(s)", retry_secs(.resets_in))]
    QuotaExceeded { resets_in: Duration },

    #[error("{0}")]
    AssetNotFound(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("output exceeds maximum allowed size ({limit_mb} MB)")]
    TooLarge { limit_mb: u64 },

    #[error("processing failed: {0}")]
    ProcessingFailed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

// Round up so a client never retries a moment too early.
fn retry_secs(d: &Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 { secs + 1 } else { secs.max(1) }
}

impl DownloadError {
    /// Machine-readable kind, also used as the metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadError::AuthFailed => "auth_failed",
            DownloadError::RateLimited { .. } => "rate_limited",
            DownloadError::QuotaExceeded { .. } => "quota_exceeded",
            DownloadError::AssetNotFound(_) => "asset_not_found",
            DownloadError::UpstreamUnavailable(_) => "upstream_unavailable",
            DownloadError::TooLarge { .. } => "too_large",
            DownloadError::ProcessingFailed(_) => "processing_failed",
            DownloadError::InvalidRequest(_) => "invalid_request",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DownloadError::AuthFailed => StatusCode::FORBIDDEN,
            DownloadError::RateLimited { .. } | DownloadError::QuotaExceeded { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            DownloadError::AssetNotFound(_) => StatusCode::NOT_FOUND,
            DownloadError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            DownloadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DownloadError::ProcessingFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DownloadError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Seconds a client should wait before trying again, if the refusal is
    /// time-bound.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            DownloadError::RateLimited { retry_after } => Some(retry_secs(retry_after)),
            DownloadError::QuotaExceeded { resets_in } => Some(retry_secs(resets_in)),
            _ => None,
        }
    }

    /// Whether the failure came from a collaborator and may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, DownloadError::UpstreamUnavailable(_))
    }
}

impl IntoResponse for DownloadError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.retry_after();

        let mut error = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let Some(secs) = retry_after {
            error["retry_after_secs"] = json!(secs);
        }

        let mut response = (status, Json(json!({ "error": error }))).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_kinds() {
        assert_eq!(DownloadError::AuthFailed.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            DownloadError::QuotaExceeded { resets_in: Duration::from_secs(5) }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            DownloadError::TooLarge { limit_mb: 1 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            DownloadError::UpstreamUnavailable("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn retry_after_rounds_up() {
        let err = DownloadError::RateLimited { retry_after: Duration::from_millis(1500) };
        assert_eq!(err.retry_after(), Some(2));

        let err = DownloadError::RateLimited { retry_after: Duration::ZERO };
        assert_eq!(err.retry_after(), Some(1));
    }

    #[test]
    fn rate_limited_response_carries_header() {
        let response = DownloadError::RateLimited { retry_after: Duration::from_secs(30) }
            .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "30");
    }

    #[test]
    fn only_upstream_is_transient() {
        assert!(DownloadError::UpstreamUnavailable("timeout".into()).is_transient());
        assert!(!DownloadError::AssetNotFound("gone".into()).is_transient());
    }
}
