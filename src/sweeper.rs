use std::sync::Arc;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval};
use tracing::{debug, info};

use crate::admission::AdmissionControl;
use crate::metrics::TRACKED_CLIENTS;

// Evict expired rate/quota windows so idle clients don't accumulate forever.
pub async fn window_sweeper(admission: Arc<AdmissionControl>, every: Duration) {
    let mut interval = interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval = ?every, "window sweeper started");

    loop {
        interval.tick().await;

        let evicted = admission.sweep(Instant::now().into_std());
        let tracked = admission.tracked_clients();
        TRACKED_CLIENTS.set(tracked as i64);

        if evicted > 0 {
            debug!(evicted, tracked, "swept expired windows");
        }
    }
}
