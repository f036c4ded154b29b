use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::catalog::ResolvedAsset;
use crate::error::{DownloadError, DownloadResult};
use crate::metrics::PROCESSING_LATENCY;
use crate::models::TileRequest;
use crate::processor::{Artifact, TileProcessor};

/// Shared flag telling in-flight processing that nobody is waiting anymore.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// sets the flag when the submitting future is dropped mid-way
struct CancelOnDrop(Option<CancelFlag>);

impl CancelOnDrop {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(flag) = self.0.take() {
            flag.cancel();
        }
    }
}

// Queued job - the asset to process + channel for the result
pub struct ProcessingJob {
    pub asset: ResolvedAsset,
    pub request: TileRequest,
    pub cancel: CancelFlag,
    pub response_tx: oneshot::Sender<DownloadResult<Artifact>>,
}

#[derive(Clone)]
pub struct ProcessingQueue {
    tx: mpsc::Sender<ProcessingJob>,
}

impl ProcessingQueue {
    /// Start the worker loop. `capacity` jobs may wait; `workers` run at once.
    pub fn spawn(processor: Arc<dyn TileProcessor>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(processing_worker(rx, processor, workers));
        Self { tx }
    }

    pub async fn submit(&self, asset: ResolvedAsset, request: TileRequest) -> DownloadResult<Artifact> {
        let cancel = CancelFlag::new();
        let mut guard = CancelOnDrop(Some(cancel.clone()));
        let (response_tx, response_rx) = oneshot::channel();

        let job = ProcessingJob {
            asset,
            request,
            cancel,
            response_tx,
        };
        self.tx
            .send(job)
            .await
            .map_err(|_| DownloadError::ProcessingFailed("processing queue is closed".to_string()))?;

        let result = response_rx
            .await
            .map_err(|_| DownloadError::ProcessingFailed("worker failed to respond".to_string()))?;

        guard.disarm();
        result
    }
}

pub async fn processing_worker(
    mut rx: mpsc::Receiver<ProcessingJob>,
    processor: Arc<dyn TileProcessor>,
    workers: usize,
) {
    info!(workers, "processing worker started");
    let permits = Arc::new(Semaphore::new(workers.max(1)));

    // keep receiving jobs from the queue
    while let Some(mut job) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };

        // client gave up while the job was queued
        if job.cancel.is_cancelled() || job.response_tx.is_closed() {
            debug!(item = %job.request.item_id, "skipping abandoned job");
            continue;
        }

        let processor = processor.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let started = Instant::now();

            let outcome = tokio::select! {
                result = processor.process(&job.asset, &job.request, &job.cancel) => Some(result),
                _ = job.response_tx.closed() => None,
            };

            match outcome {
                Some(result) => {
                    PROCESSING_LATENCY.observe(started.elapsed().as_secs_f64());
                    if let Err(e) = &result {
                        warn!(item = %job.request.item_id, asset = %job.request.asset_key, error = %e, "processing failed");
                    }
                    // Send result back to the handler
                    let _ = job.response_tx.send(result);
                }
                None => {
                    job.cancel.cancel();
                    info!(item = %job.request.item_id, "client went away, processing abandoned");
                }
            }
        });
    }

    info!("processing worker stopped");
}
