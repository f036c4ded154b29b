//! Cloudflare Turnstile verification for bot protection.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info, warn};

pub const TURNSTILE_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Pass/fail only. Anything other than an explicit pass is a fail.
    async fn verify(&self, token: &str, client_ip: &str) -> bool;
}

#[derive(Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

pub struct TurnstileVerifier {
    client: reqwest::Client,
    secret: Option<String>,
    verify_url: String,
    timeout: Duration,
}

impl TurnstileVerifier {
    /// `secret = None` turns verification off (development mode).
    pub fn new(client: reqwest::Client, secret: Option<String>, verify_url: impl Into<String>) -> Self {
        Self {
            client,
            secret: secret.filter(|s| !s.is_empty()),
            verify_url: verify_url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }
}

#[async_trait]
impl TokenVerifier for TurnstileVerifier {
    async fn verify(&self, token: &str, client_ip: &str) -> bool {
        let Some(secret) = &self.secret else {
            return true;
        };

        if token.is_empty() {
            warn!(client = %client_ip, "no turnstile token provided");
            return false;
        }

        let form = [
            ("secret", secret.as_str()),
            ("response", token),
            ("remoteip", client_ip),
        ];

        let response = match self
            .client
            .post(&self.verify_url)
            .form(&form)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(res) if res.status().is_success() => res,
            Ok(res) => {
                warn!(status = %res.status(), "turnstile endpoint returned an error status");
                return false;
            }
            // fail closed
            Err(e) => {
                error!(error = %e, "turnstile verification error");
                return false;
            }
        };

        match response.json::<SiteVerifyResponse>().await {
            Ok(body) if body.success => {
                info!(client = %client_ip, "turnstile verification passed");
                true
            }
            Ok(body) => {
                warn!(client = %client_ip, codes = ?body.error_codes, "turnstile verification failed");
                false
            }
            Err(e) => {
                error!(error = %e, "unreadable turnstile response");
                false
            }
        }
    }
}
