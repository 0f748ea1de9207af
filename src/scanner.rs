use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::ScanError;
use crate::fetch::{CertFetcher, TlsFetcher};
use crate::pool::WorkerPool;
use crate::sink::{OutputFormat, Sink, StreamSink};
use crate::store::CertStore;
use crate::targets::TargetSpec;
use crate::types::{ScanResult, ScanSummary};
use crate::writer::{StoreWriter, WRITE_QUEUE_CAPACITY};

pub const DEFAULT_CONCURRENCY: usize = 100;
pub const DEFAULT_TIMEOUT_SECS: u64 = 4;

/// Knobs shared by every scan entry point.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub concurrency: usize,
    /// Per-attempt bound on connect + handshake.
    pub timeout: Duration,
    pub show_failures: bool,
    pub format: OutputFormat,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            show_failures: false,
            format: OutputFormat::Plain,
        }
    }
}

/// Run one scan to completion: start the pool, feed every target, close the
/// intake and wait for the workers.
///
/// `cancel` only stops the feeding of new targets; fetches already queued or
/// in flight finish normally.
pub async fn run_scan<F: CertFetcher>(
    spec: &TargetSpec,
    fetcher: Arc<F>,
    sink: Sink,
    concurrency: usize,
    cancel: &CancellationToken,
) -> ScanSummary {
    info!(
        items = spec.items().len(),
        ports = spec.ports().len(),
        concurrency,
        "scan starting"
    );
    let mut pool = WorkerPool::start(fetcher, sink, concurrency);
    let fed = match pool.intake() {
        Some(intake) => spec.feed(intake, cancel).await,
        None => 0,
    };
    pool.close_intake();
    let summary = pool.join().await;
    info!(
        fed,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "scan finished"
    );
    summary
}

/// Print every result as it arrives.
pub async fn stream_with<F: CertFetcher>(
    spec: &TargetSpec,
    fetcher: Arc<F>,
    config: &ScanConfig,
    out: StreamSink,
) -> ScanSummary {
    run_scan(
        spec,
        fetcher,
        Sink::Stream(out),
        config.concurrency,
        &CancellationToken::new(),
    )
    .await
}

/// Persist successful results through the single store writer. With
/// `show_failures` set, failed targets are printed to stdout.
///
/// A store failure stops target feeding and is returned once the pool has
/// drained; rows written before the failure stay in the store.
pub async fn persist_with<F: CertFetcher>(
    spec: &TargetSpec,
    fetcher: Arc<F>,
    config: &ScanConfig,
    store: CertStore,
) -> Result<ScanSummary, ScanError> {
    let failures = config
        .show_failures
        .then(|| StreamSink::stdout(config.format, true));
    persist_reporting(spec, fetcher, config, store, failures).await
}

/// Like `persist_with`, printing failed targets to `failures` instead.
pub async fn persist_reporting<F: CertFetcher>(
    spec: &TargetSpec,
    fetcher: Arc<F>,
    config: &ScanConfig,
    store: CertStore,
    failures: Option<StreamSink>,
) -> Result<ScanSummary, ScanError> {
    let cancel = CancellationToken::new();
    let writer = StoreWriter::spawn(store, WRITE_QUEUE_CAPACITY, cancel.clone());
    let sink = Sink::Persist {
        writer: writer.handle(),
        failures,
    };
    let mut summary = run_scan(spec, fetcher, sink, config.concurrency, &cancel).await;
    let report = writer.join().await?;
    summary.persisted = report.written;
    Ok(summary)
}

/// Collect every result in memory, in completion order.
pub async fn collect_with<F: CertFetcher>(
    spec: &TargetSpec,
    fetcher: Arc<F>,
    concurrency: usize,
) -> (ScanSummary, Vec<ScanResult>) {
    let (tx, mut rx) = mpsc::channel(concurrency.max(1));
    let collector = tokio::spawn(async move {
        let mut out = Vec::new();
        while let Some(r) = rx.recv().await {
            out.push(r);
        }
        out
    });
    let summary = run_scan(
        spec,
        fetcher,
        Sink::Channel(tx),
        concurrency,
        &CancellationToken::new(),
    )
    .await;
    let results = collector.await.unwrap_or_else(|e| {
        warn!(error = %e, "result collector failed");
        Vec::new()
    });
    (summary, results)
}

/// Stream scan over real TLS connections.
pub async fn scan_to_stream(
    spec: &TargetSpec,
    config: &ScanConfig,
    out: StreamSink,
) -> Result<ScanSummary, ScanError> {
    let fetcher = Arc::new(TlsFetcher::new(config.timeout)?);
    Ok(stream_with(spec, fetcher, config, out).await)
}

/// Store scan over real TLS connections.
pub async fn scan_to_store(
    spec: &TargetSpec,
    config: &ScanConfig,
    store: CertStore,
) -> Result<ScanSummary, ScanError> {
    let fetcher = Arc::new(TlsFetcher::new(config.timeout)?);
    persist_with(spec, fetcher, config, store).await
}
