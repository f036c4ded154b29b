use lazy_static::lazy_static;
use prometheus::{
    Histogram, IntCounter, IntCounterVec, IntGauge, register_histogram, register_int_counter,
    register_int_counter_vec, register_int_gauge,
};

lazy_static! {
    pub static ref REQUESTS_TOTAL: IntCounter =
        register_int_counter!("tile_download_requests_total", "Total download requests received").unwrap();
    pub static ref OUTCOMES: IntCounterVec = register_int_counter_vec!(
        "tile_download_outcomes_total",
        "Download outcomes by kind: delivered, aborted mid-transfer, or an error kind",
        &["kind"]
    )
    .unwrap();
    pub static ref BYTES_DELIVERED: IntCounter =
        register_int_counter!("tile_bytes_delivered_total", "Bytes handed to clients or storage").unwrap();
    pub static ref PROCESSING_LATENCY: Histogram = register_histogram!(
        "tile_processing_latency_seconds",
        "Time spent fetching and processing an asset",
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .unwrap();
    pub static ref TRACKED_CLIENTS: IntGauge =
        register_int_gauge!("tile_tracked_clients", "Clients with live rate or quota windows").unwrap();
}
