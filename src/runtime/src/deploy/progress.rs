//! Upload progress accounting.

use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ova_import_core::event::{events, percent, ProgressEvent, ProgressSink};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::endpoint::{DeploymentEndpoint, Lease};

/// Byte counter shared between an upload and the progress updater.
///
/// Counts are monotonic across all files of a lease.
#[derive(Debug, Clone, Default)]
pub struct UploadProgress {
    bytes: Arc<AtomicU64>,
}

impl UploadProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Wrap a reader so every byte read is counted.
    pub fn wrap<R: Read>(&self, inner: R) -> ProgressReader<R> {
        ProgressReader {
            inner,
            progress: self.clone(),
        }
    }
}

/// Reader that feeds an [`UploadProgress`].
pub struct ProgressReader<R> {
    inner: R,
    progress: UploadProgress,
}

impl<R> ProgressReader<R> {
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.progress.add(n as u64);
        Ok(n)
    }
}

/// Periodically reports lease progress to the endpoint and a sink.
///
/// Attached while a lease is uploading. `stop` must be awaited before the
/// orchestrator leaves the upload stage; dropping the updater aborts the
/// task as a fallback.
pub struct ProgressUpdater {
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProgressUpdater {
    pub fn start(
        endpoint: Arc<dyn DeploymentEndpoint>,
        lease: Lease,
        progress: UploadProgress,
        sink: Arc<dyn ProgressSink>,
        interval: Duration,
    ) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let total = Some(lease.total_bytes()).filter(|t| *t > 0);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut last_percent: Option<u8> = None;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let done = progress.bytes_done();
                sink.report(
                    ProgressEvent::new(events::LEASE_PROGRESS, &lease.id).with_bytes(done, total),
                );

                let Some(pct) = total.and_then(|t| percent(done, t)) else {
                    continue;
                };
                if last_percent == Some(pct) {
                    continue;
                }
                last_percent = Some(pct);

                if let Err(e) = endpoint.report_progress(&lease, pct).await {
                    tracing::warn!(lease = %lease.id, error = %e, "Failed to report lease progress");
                }
            }

            tracing::debug!(lease = %lease.id, "Progress updater stopped");
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop the updater and wait for its task to finish.
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Progress updater task failed");
            }
        }
    }
}

impl Drop for ProgressUpdater {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
