use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Upload progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Event key (e.g., "upload.file.started", "lease.progress")
    pub key: String,

    /// Lease the transfer belongs to
    pub lease: String,

    /// File being transferred, if the event concerns a single file
    pub file: Option<String>,

    /// Bytes transferred so far across the whole lease
    pub bytes_done: u64,

    /// Total bytes expected across the whole lease, when known
    pub bytes_total: Option<u64>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ProgressEvent {
    /// Create a new event
    pub fn new(key: impl Into<String>, lease: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            lease: lease.into(),
            file: None,
            bytes_done: 0,
            bytes_total: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_bytes(mut self, done: u64, total: Option<u64>) -> Self {
        self.bytes_done = done;
        self.bytes_total = total;
        self
    }

    /// Completion percentage (0-100), when the total is known.
    pub fn percent(&self) -> Option<u8> {
        percent(self.bytes_done, self.bytes_total?)
    }
}

/// Percentage of `done` over `total`, clamped to 0-100.
pub fn percent(done: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let pct = (done.min(total) as u128 * 100 / total as u128) as u8;
    Some(pct)
}

/// Destination for progress events. Where events render is up to the
/// implementation.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Progress sink that fans events out over a broadcast channel
#[derive(Clone)]
pub struct ProgressEmitter {
    sender: Arc<broadcast::Sender<ProgressEvent>>,
}

impl ProgressEmitter {
    /// Create a new emitter
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl ProgressSink for ProgressEmitter {
    fn report(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }
}

/// Progress sink that writes events to the tracing subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, event: ProgressEvent) {
        tracing::info!(
            key = %event.key,
            lease = %event.lease,
            file = ?event.file,
            bytes_done = event.bytes_done,
            percent = ?event.percent(),
            "Upload progress"
        );
    }
}

/// Event catalog - predefined event keys
pub mod events {
    pub const UPLOAD_FILE_STARTED: &str = "upload.file.started";
    pub const UPLOAD_FILE_COMPLETED: &str = "upload.file.completed";
    pub const LEASE_PROGRESS: &str = "lease.progress";
}
