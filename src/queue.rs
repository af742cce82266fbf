//! Retry queue: ordered, durable storage for requests awaiting replay.
//!
//! Semantics:
//! - `push_request_at_tail` appends a newly intercepted failure.
//! - `pop_from_head` removes and returns the oldest entry; an empty queue yields `Ok(None)`.
//! - `push_to_head` re-inserts an entry so it is the next one popped.
//!
//! Every operation takes the queue's own lock for its full duration (including persistence),
//! so the interception path and the drain path can share one queue without external locking.
//!
//! Entries older than the configured retention are discarded when they reach the head.

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::QueueError;
use crate::request::CapturedRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Metadata threaded through the queue alongside each request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    /// Correlates queue store events across the entry's lifetime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_queue_id: Option<String>,
}

/// A pending request in the retry queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub request: CapturedRequest,
    /// Creation time, epoch milliseconds.
    pub timestamp: u64,
    #[serde(default)]
    pub metadata: EntryMetadata,
}

impl QueueEntry {
    pub fn new(id: impl Into<String>, request: CapturedRequest, timestamp: u64) -> Self {
        Self {
            request,
            timestamp,
            metadata: EntryMetadata { refresh_queue_id: Some(id.into()) },
        }
    }

    /// Build an entry that carries no store id.
    pub fn anonymous(request: CapturedRequest, timestamp: u64) -> Self {
        Self { request, timestamp, metadata: EntryMetadata::default() }
    }

    /// The refresh queue id, if the entry was enqueued with one.
    pub fn id(&self) -> Option<&str> {
        self.metadata.refresh_queue_id.as_deref()
    }
}

/// Ordered FIFO of pending requests shared by the interception and drain paths.
#[async_trait]
pub trait RetryQueue: Send + Sync {
    /// Name used as the `queue` telemetry label.
    fn name(&self) -> &str;

    /// Append an entry at the tail.
    async fn push_request_at_tail(&self, entry: QueueEntry) -> Result<(), QueueError>;

    /// Remove and return the head entry, or `None` when the queue is empty.
    async fn pop_from_head(&self) -> Result<Option<QueueEntry>, QueueError>;

    /// Re-insert an entry at the head.
    async fn push_to_head(&self, entry: QueueEntry) -> Result<(), QueueError>;

    /// Copy of the current entries, head first.
    async fn entries(&self) -> Result<Vec<QueueEntry>, QueueError>;

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.entries().await?.len())
    }

    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }
}

#[async_trait]
impl<Q> RetryQueue for Arc<Q>
where
    Q: RetryQueue + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn push_request_at_tail(&self, entry: QueueEntry) -> Result<(), QueueError> {
        (**self).push_request_at_tail(entry).await
    }

    async fn pop_from_head(&self) -> Result<Option<QueueEntry>, QueueError> {
        (**self).pop_from_head().await
    }

    async fn push_to_head(&self, entry: QueueEntry) -> Result<(), QueueError> {
        (**self).push_to_head(entry).await
    }

    async fn entries(&self) -> Result<Vec<QueueEntry>, QueueError> {
        (**self).entries().await
    }
}

/// Drops entries older than `max_age` when they reach the head.
#[derive(Debug, Clone)]
pub struct Retention {
    max_age: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl Default for Retention {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Retention {
    /// Keep entries forever.
    pub fn unbounded() -> Self {
        Self { max_age: None, clock: Arc::new(SystemClock) }
    }

    pub fn new(max_age: Duration) -> Self {
        Self { max_age: Some(max_age), clock: Arc::new(SystemClock) }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    fn is_expired(&self, entry: &QueueEntry) -> bool {
        match self.max_age {
            Some(max_age) => {
                let age = self.clock.now_millis().saturating_sub(entry.timestamp);
                u128::from(age) > max_age.as_millis()
            }
            None => false,
        }
    }

    /// Pop the first live entry, discarding expired ones ahead of it.
    fn pop_live(&self, queue_name: &str, entries: &mut VecDeque<QueueEntry>) -> Option<QueueEntry> {
        while let Some(entry) = entries.pop_front() {
            if self.is_expired(&entry) {
                warn!(
                    queue = queue_name,
                    id = entry.id().unwrap_or("-"),
                    timestamp = entry.timestamp,
                    "discarding queue entry past retention"
                );
                continue;
            }
            return Some(entry);
        }
        None
    }
}

/// Process-local retry queue; state is lost when the process exits.
#[derive(Debug, Clone)]
pub struct InMemoryRetryQueue {
    name: String,
    entries: Arc<Mutex<VecDeque<QueueEntry>>>,
    retention: Retention,
}

impl InMemoryRetryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Arc::new(Mutex::new(VecDeque::new())),
            retention: Retention::unbounded(),
        }
    }

    /// Named after `config.queue_name`, discarding entries older than `max_retention_minutes`.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.queue_name.clone()).with_retention(config.retention())
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }
}

#[async_trait]
impl RetryQueue for InMemoryRetryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push_request_at_tail(&self, entry: QueueEntry) -> Result<(), QueueError> {
        self.entries.lock().await.push_back(entry);
        Ok(())
    }

    async fn pop_from_head(&self) -> Result<Option<QueueEntry>, QueueError> {
        let mut guard = self.entries.lock().await;
        Ok(self.retention.pop_live(&self.name, &mut guard))
    }

    async fn push_to_head(&self, entry: QueueEntry) -> Result<(), QueueError> {
        self.entries.lock().await.push_front(entry);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<QueueEntry>, QueueError> {
        Ok(self.entries.lock().await.iter().cloned().collect())
    }
}

const FILE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct QueueFile {
    version: u32,
    entries: VecDeque<QueueEntry>,
}

/// Retry queue persisted as a JSON document that survives process restarts.
///
/// Every mutation rewrites the document to a sibling temporary file and renames it over the
/// original, so a crash mid-write leaves the previous state intact.
#[derive(Debug, Clone)]
pub struct FileRetryQueue {
    name: String,
    path: PathBuf,
    entries: Arc<Mutex<VecDeque<QueueEntry>>>,
    retention: Retention,
}

impl FileRetryQueue {
    /// Open (or create) the queue stored at `path`.
    pub async fn open(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<QueueFile>(&bytes)?.entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => return Err(e.into()),
        };
        let name = name.into();
        debug!(queue = %name, path = %path.display(), entries = entries.len(), "opened retry queue");
        Ok(Self {
            name,
            path,
            entries: Arc::new(Mutex::new(entries)),
            retention: Retention::unbounded(),
        })
    }

    /// Open the queue at `path` with the name and retention from `config`.
    pub async fn open_with_config(
        path: impl AsRef<Path>,
        config: &SyncConfig,
    ) -> Result<Self, QueueError> {
        Ok(Self::open(config.queue_name.clone(), path).await?.with_retention(config.retention()))
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &VecDeque<QueueEntry>) -> Result<(), QueueError> {
        let doc = QueueFile { version: FILE_FORMAT_VERSION, entries: entries.clone() };
        let bytes = serde_json::to_vec(&doc)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RetryQueue for FileRetryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push_request_at_tail(&self, entry: QueueEntry) -> Result<(), QueueError> {
        let mut guard = self.entries.lock().await;
        guard.push_back(entry);
        if let Err(e) = self.persist(&guard).await {
            guard.pop_back();
            return Err(e);
        }
        Ok(())
    }

    async fn pop_from_head(&self) -> Result<Option<QueueEntry>, QueueError> {
        let mut guard = self.entries.lock().await;
        let before = guard.clone();
        let popped = self.retention.pop_live(&self.name, &mut guard);
        if guard.len() != before.len() {
            if let Err(e) = self.persist(&guard).await {
                *guard = before;
                return Err(e);
            }
        }
        Ok(popped)
    }

    /// The entry has already been removed from disk by `pop_from_head`, so it stays queued in
    /// memory even when the write fails; the next successful mutation persists it.
    async fn push_to_head(&self, entry: QueueEntry) -> Result<(), QueueError> {
        let mut guard = self.entries.lock().await;
        guard.push_front(entry);
        if let Err(e) = self.persist(&guard).await {
            warn!(queue = %self.name, path = %self.path.display(), error = %e, "head entry kept in memory only");
            return Err(e);
        }
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<QueueEntry>, QueueError> {
        Ok(self.entries.lock().await.iter().cloned().collect())
    }
}
