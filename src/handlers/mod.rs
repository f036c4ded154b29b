mod collections;
mod download;
mod health;
mod metrics;
mod stats;

pub use collections::{collection_assets_handler, collections_handler};
pub use download::download_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use stats::stats_handler;
