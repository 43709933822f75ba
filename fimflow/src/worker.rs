//! Worker pool: a fixed set of claim-loop workers.
//!
//! Each worker loops claim → supervise → repeat, sleeping for the poll
//! interval when nothing is claimable. FIFO ordering among accepted jobs is
//! the store's responsibility; the pool adds no scheduling policy of its
//! own.

use crate::config::Settings;
use crate::store::JobStore;
use crate::supervisor::Supervisor;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    token: CancellationToken,
    size: usize,
}

impl WorkerPool {
    /// Starts `settings.workers` workers against the store.
    pub fn start(store: JobStore, supervisor: Supervisor, settings: &Settings) -> Self {
        let token = CancellationToken::new();
        let size = settings.workers;
        let poll_interval = settings.poll_interval;
        let mut handles = Vec::with_capacity(size);
        for worker_id in 0..size {
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                store.clone(),
                supervisor.clone(),
                poll_interval,
                token.clone(),
            )));
        }
        info!(workers = size, "worker pool started");
        Self {
            handles,
            token,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Stops claiming, waits up to `grace` for in-flight jobs, then aborts.
    pub async fn shutdown(mut self, grace: Duration) {
        self.token.cancel();
        let drain = async {
            for handle in self.handles.drain(..) {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("worker pool shutdown grace elapsed; aborting workers");
            for handle in &self.handles {
                handle.abort();
            }
        }
        info!("worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    store: JobStore,
    supervisor: Supervisor,
    poll_interval: Duration,
    token: CancellationToken,
) {
    debug!(worker_id, "worker started");
    loop {
        if token.is_cancelled() {
            break;
        }
        match store.claim(worker_id) {
            Ok(Some(job)) => {
                supervisor.supervise(job).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = token.cancelled() => break,
                }
            }
            Err(e) => {
                warn!(worker_id, "claim failed: {e}");
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = token.cancelled() => break,
                }
            }
        }
    }
    debug!(worker_id, "worker stopped");
}
