//! Admission control: everything that must pass before a download is allowed
//! to cost anything.
//!
//! Checks run in a fixed order (token, then rate, then quota) and stop at the
//! first refusal. A failed token check touches no counters; a rate denial does
//! not count toward the window. Passing the quota check reserves headroom that
//! the caller must hand back through [`AdmissionControl::settle`].

use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::client::ClientId;
use crate::error::DownloadError;
use crate::quota::QuotaTracker;
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::turnstile::TokenVerifier;

pub struct AdmissionControl {
    verifier: Arc<dyn TokenVerifier>,
    rate_limiter: RateLimiter,
    quota: QuotaTracker,
}

impl AdmissionControl {
    pub fn new(verifier: Arc<dyn TokenVerifier>, rate_limiter: RateLimiter, quota: QuotaTracker) -> Self {
        Self { verifier, rate_limiter, quota }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    /// RECEIVED -> VERIFIED
    pub async fn verify(&self, client: &ClientId, token: &str) -> Result<(), DownloadError> {
        if self.verifier.verify(token, client.as_str()).await {
            Ok(())
        } else {
            warn!(client = %client, "rejected: verification failed");
            Err(DownloadError::AuthFailed)
        }
    }

    /// VERIFIED -> RATE_OK -> QUOTA_OK. Returns the bytes reserved.
    pub fn check_limits(&self, client: &ClientId, now: Instant) -> Result<u64, DownloadError> {
        if let RateDecision::Denied { retry_after } = self.rate_limiter.check_and_increment(client, now) {
            warn!(client = %client, ?retry_after, "rejected: rate limit exceeded");
            return Err(DownloadError::RateLimited { retry_after });
        }

        self.quota.try_reserve(client, now).map_err(|usage| {
            warn!(
                client = %client,
                bytes = usage.bytes_consumed,
                reserved = usage.bytes_reserved,
                "rejected: download quota exceeded"
            );
            DownloadError::QuotaExceeded { resets_in: usage.resets_in }
        })
    }

    pub async fn admit(&self, client: &ClientId, token: &str, now: Instant) -> Result<u64, DownloadError> {
        self.verify(client, token).await?;
        self.check_limits(client, now)
    }

    /// Release an admission's reservation and charge what was actually sent.
    pub fn settle(&self, client: &ClientId, reserved: u64, sent: u64) {
        self.quota.settle(client, Instant::now(), reserved, sent);
    }

    /// Charge bytes outside any admission.
    pub fn record_usage(&self, client: &ClientId, bytes: u64) {
        self.quota.record_usage(client, Instant::now(), bytes);
    }

    /// Evict expired windows from both stores.
    pub fn sweep(&self, now: Instant) -> usize {
        self.rate_limiter.sweep(now) + self.quota.sweep(now)
    }

    pub fn tracked_clients(&self) -> usize {
        self.rate_limiter.tracked_clients().max(self.quota.tracked_clients())
    }
}
