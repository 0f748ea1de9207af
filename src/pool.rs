use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::fetch::CertFetcher;
use crate::sink::Sink;
use crate::types::{CertificateRecord, DialTarget, ScanResult, ScanSummary};

/// Upper bound on concurrent handshake workers.
pub const MAX_CONCURRENCY: usize = 5_000;

/// Lifecycle of a pool. There is no pause or resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Workers active, intake open.
    Running,
    /// Intake closed, workers finishing in-flight fetches.
    Draining,
    /// Every worker has returned and dropped its sink.
    Stopped,
}

/// Counters shared by all workers; readable while the pool runs.
#[derive(Clone, Debug, Default)]
pub struct ScanProgress {
    pub dispatched: Arc<AtomicU64>,
    pub succeeded: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
}

impl ScanProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ScanSummary {
        ScanSummary {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            persisted: 0,
        }
    }
}

/// Fixed set of handshake workers pulling from one shared intake.
///
/// Each worker loops: take a target, fetch, wrap as `ScanResult`, hand it to
/// the sink. Targets are never retried. The pool is stopped once the intake
/// has been closed and every worker has drained it.
pub struct WorkerPool {
    intake: Option<mpsc::Sender<DialTarget>>,
    workers: JoinSet<()>,
    progress: ScanProgress,
    state: watch::Sender<PoolState>,
    concurrency: usize,
}

impl WorkerPool {
    /// Spawn `concurrency` workers (clamped to `1..=MAX_CONCURRENCY`).
    pub fn start<F: CertFetcher>(fetcher: Arc<F>, sink: Sink, concurrency: usize) -> Self {
        let concurrency = concurrency.clamp(1, MAX_CONCURRENCY);
        let (tx, rx) = mpsc::channel(concurrency);
        let rx = Arc::new(Mutex::new(rx));
        let progress = ScanProgress::new();
        let (state, _) = watch::channel(PoolState::Running);

        let mut workers = JoinSet::new();
        for id in 0..concurrency {
            workers.spawn(worker_loop(
                id,
                fetcher.clone(),
                rx.clone(),
                sink.clone(),
                progress.clone(),
            ));
        }
        debug!(concurrency, "worker pool started");

        Self {
            intake: Some(tx),
            workers,
            progress,
            state,
            concurrency,
        }
    }

    /// Sending side of the intake, until `close_intake` is called.
    pub fn intake(&self) -> Option<&mpsc::Sender<DialTarget>> {
        self.intake.as_ref()
    }

    /// Signal that no more targets are coming. Workers drain what is queued.
    pub fn close_intake(&mut self) {
        if self.intake.take().is_some() {
            self.state.send_replace(PoolState::Draining);
            debug!("intake closed, pool draining");
        }
    }

    pub fn state(&self) -> PoolState {
        *self.state.borrow()
    }

    /// Completion signal: observes `Stopped` once `join` has finished.
    pub fn subscribe(&self) -> watch::Receiver<PoolState> {
        self.state.subscribe()
    }

    pub fn progress(&self) -> &ScanProgress {
        &self.progress
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Close the intake (if still open) and wait for every worker to return.
    pub async fn join(mut self) -> ScanSummary {
        self.close_intake();
        while let Some(res) = self.workers.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "worker task failed");
            }
        }
        self.state.send_replace(PoolState::Stopped);
        self.progress.snapshot()
    }
}

async fn worker_loop<F: CertFetcher>(
    id: usize,
    fetcher: Arc<F>,
    intake: Arc<Mutex<mpsc::Receiver<DialTarget>>>,
    sink: Sink,
    progress: ScanProgress,
) {
    loop {
        let next = intake.lock().await.recv().await;
        let Some(target) = next else {
            break;
        };
        progress.dispatched.fetch_add(1, Ordering::Relaxed);

        let result = match fetcher.fetch(&target).await {
            Ok(identity) => {
                progress.succeeded.fetch_add(1, Ordering::Relaxed);
                let record = CertificateRecord::from_identity(&target, identity);
                ScanResult::Success { ip: target, record }
            }
            Err(error) => {
                progress.failed.fetch_add(1, Ordering::Relaxed);
                ScanResult::Failure { ip: target, error }
            }
        };

        if let Err(e) = sink.accept(result).await {
            debug!(worker = id, error = %e, "result dropped");
        }
    }
    debug!(worker = id, "worker finished");
}
