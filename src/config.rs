use clap::{Parser, ValueEnum};
use std::time::Duration;

use crate::catalog::{MPC_SAS_URL, MPC_STAC_URL};
use crate::quota::BYTES_PER_MB;
use crate::turnstile::TURNSTILE_VERIFY_URL;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Stream the file in the response body
    Stream,
    /// Upload to object storage and return a presigned link
    Deferred,
}

// CLI argument structure, every option can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "sat-tile-gateway")]
#[command(about = "Rate-limited download gateway for satellite imagery tiles")]
#[command(
    after_help = "Rate limits and quotas are kept in memory and enforced per process. \
                  Running N instances behind a load balancer allows up to N times the configured limits."
)]
pub struct Config {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    // Turnstile secret, verification is disabled when unset
    #[arg(long, env = "TURNSTILE_SECRET_KEY", hide_env_values = true)]
    pub turnstile_secret_key: Option<String>,

    #[arg(long, env = "TURNSTILE_VERIFY_URL", default_value = TURNSTILE_VERIFY_URL)]
    pub turnstile_verify_url: String,

    // Comma-separated CORS origins, "*" for any
    #[arg(long, env = "ALLOWED_ORIGINS", default_value = "*")]
    pub allowed_origins: String,

    // Largest file handed to a client
    #[arg(long, env = "MAX_FILE_SIZE_MB", default_value_t = 1500, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_file_size_mb: u64,

    // Largest source asset read into memory for cropping/rendering
    #[arg(long, env = "MAX_SOURCE_SIZE_MB", default_value_t = 2048, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_source_size_mb: u64,

    #[arg(long, env = "MPC_STAC_URL", default_value = MPC_STAC_URL)]
    pub stac_url: String,

    // SAS token endpoint, empty disables href signing
    #[arg(long, env = "MPC_SAS_URL", default_value = MPC_SAS_URL)]
    pub sas_url: String,

    // Rate limit max requests per window
    #[arg(long, env = "RATE_LIMIT", default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub rate_limit: u64,

    // Rate limit window in seconds
    #[arg(long, env = "RATE_WINDOW_SECS", default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub rate_window_secs: u64,

    // Download quota per client per quota window
    #[arg(long, env = "QUOTA_MB", default_value_t = 5000, value_parser = clap::value_parser!(u64).range(1..))]
    pub quota_mb: u64,

    #[arg(long, env = "QUOTA_WINDOW_SECS", default_value_t = 3600, value_parser = clap::value_parser!(u64).range(1..))]
    pub quota_window_secs: u64,

    // How often expired windows are evicted
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub sweep_interval_secs: u64,

    // Concurrent raster jobs
    #[arg(long, env = "PROCESSING_WORKERS", default_value_t = 4, value_parser = clap::value_parser!(u64).range(1..=256))]
    pub processing_workers: u64,

    // Jobs allowed to wait for a worker
    #[arg(long, env = "PROCESSING_QUEUE", default_value_t = 32, value_parser = clap::value_parser!(u64).range(1..))]
    pub processing_queue: u64,

    // Timeout for catalog and asset requests
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    pub upstream_timeout_secs: u64,

    // Key clients by the first X-Forwarded-For hop (only behind a trusted proxy)
    #[arg(long, env = "TRUST_FORWARDED_FOR")]
    pub trust_forwarded_for: bool,

    #[arg(long, env = "DELIVERY_MODE", value_enum, default_value_t = DeliveryMode::Stream)]
    pub delivery_mode: DeliveryMode,

    #[arg(long, env = "S3_BUCKET")]
    pub s3_bucket: Option<String>,

    #[arg(long, env = "S3_REGION", default_value = "us-west-2")]
    pub s3_region: String,

    // Custom endpoint for S3-compatible storage (MinIO, LocalStack)
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[arg(long, env = "PRESIGNED_URL_EXPIRY_SECS", default_value_t = 3600, value_parser = clap::value_parser!(u64).range(1..=604_800))]
    pub presigned_url_expiry_secs: u64,

    // Stored objects are deleted after this long
    #[arg(long, env = "OBJECT_RETENTION_SECS", default_value_t = 7200, value_parser = clap::value_parser!(u64).range(1..))]
    pub object_retention_secs: u64,
}

impl Config {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * BYTES_PER_MB
    }

    pub fn max_source_size_bytes(&self) -> u64 {
        self.max_source_size_mb * BYTES_PER_MB
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_mb * BYTES_PER_MB
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    pub fn quota_window(&self) -> Duration {
        Duration::from_secs(self.quota_window_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn origins(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect()
    }
}
