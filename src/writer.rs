use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::StoreError;
use crate::store::CertStore;
use crate::types::StoredCertificate;

/// Capacity of the buffered queue feeding the writer.
pub const WRITE_QUEUE_CAPACITY: usize = 100;

/// Cloneable sending side of the write queue, held by workers.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    tx: mpsc::Sender<StoredCertificate>,
}

impl WriterHandle {
    /// Queue a row for upsert. Fails once the writer has stopped accepting writes.
    pub async fn submit(&self, row: StoredCertificate) -> Result<(), StoreError> {
        self.tx
            .send(row)
            .await
            .map_err(|_| StoreError::Writer("write queue is closed".into()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub written: u64,
}

/// The only owner of the store during a scan. Upserts run one at a time on a
/// dedicated blocking thread fed by a buffered queue.
pub struct StoreWriter {
    handle: WriterHandle,
    task: JoinHandle<Result<WriterReport, StoreError>>,
}

impl StoreWriter {
    /// Move `store` onto the writer thread. `cancel` is fired if an upsert fails
    /// so the caller can stop producing work.
    pub fn spawn(store: CertStore, capacity: usize, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::task::spawn_blocking(move || write_loop(store, rx, cancel));
        Self {
            handle: WriterHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    /// Wait until every queued row is written (or the first failure) and the
    /// store handle is released. All other handles must be dropped first.
    pub async fn join(self) -> Result<WriterReport, StoreError> {
        let Self { handle, task } = self;
        drop(handle);
        task.await
            .map_err(|e| StoreError::Writer(e.to_string()))?
    }
}

fn write_loop(
    store: CertStore,
    mut rx: mpsc::Receiver<StoredCertificate>,
    cancel: CancellationToken,
) -> Result<WriterReport, StoreError> {
    let mut report = WriterReport::default();
    while let Some(row) = rx.blocking_recv() {
        if let Err(e) = store.upsert(&row) {
            error!(ip = %row.ip, error = %e, "upsert failed, refusing further writes");
            cancel.cancel();
            rx.close();
            return Err(e);
        }
        report.written += 1;
    }
    debug!(written = report.written, "store writer drained");
    drop(store);
    Ok(report)
}
