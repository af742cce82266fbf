#![allow(dead_code)]

use async_trait::async_trait;
use refresh_sync::error::{QueueError, ReplayError, StoreError};
use refresh_sync::queue::{InMemoryRetryQueue, QueueEntry, RetryQueue};
use refresh_sync::request::CapturedRequest;
use refresh_sync::store::QueueStore;
use refresh_sync::telemetry::TelemetryEvent;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

/// Every store, queue and telemetry call in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Enqueue { id: String },
    Attempt { id: String },
    Success { id: String },
    Failure { id: String, error: ReplayError, timestamp: u64 },
    PushToHead { id: Option<String> },
    Telemetry { name: String, correlation_id: Option<String> },
}

#[derive(Debug, Clone, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn attempts(&self) -> usize {
        self.count(|c| matches!(c, Call::Attempt { .. }))
    }

    pub fn successes(&self) -> usize {
        self.count(|c| matches!(c, Call::Success { .. }))
    }

    pub fn failures(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| matches!(c, Call::Failure { .. })).collect()
    }

    pub fn push_to_heads(&self) -> usize {
        self.count(|c| matches!(c, Call::PushToHead { .. }))
    }

    pub fn telemetry(&self) -> usize {
        self.count(|c| matches!(c, Call::Telemetry { .. }))
    }
}

/// Queue store that writes every call to the journal.
#[derive(Debug, Clone)]
pub struct JournalStore {
    journal: Journal,
    fail: bool,
}

impl JournalStore {
    pub fn new(journal: Journal) -> Self {
        Self { journal, fail: false }
    }

    /// Journal every call, then report an adapter failure.
    pub fn failing(journal: Journal) -> Self {
        Self { journal, fail: true }
    }

    fn outcome(&self) -> Result<(), StoreError> {
        if self.fail {
            Err(StoreError::Adapter("disk full".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl QueueStore for JournalStore {
    async fn record_enqueue(&self, id: &str, _: &CapturedRequest, _: u64) -> Result<(), StoreError> {
        self.journal.push(Call::Enqueue { id: id.into() });
        self.outcome()
    }

    async fn record_attempt(&self, id: &str) -> Result<(), StoreError> {
        self.journal.push(Call::Attempt { id: id.into() });
        self.outcome()
    }

    async fn record_success(&self, id: &str) -> Result<(), StoreError> {
        self.journal.push(Call::Success { id: id.into() });
        self.outcome()
    }

    async fn record_failure(
        &self,
        id: &str,
        error: &ReplayError,
        timestamp: u64,
    ) -> Result<(), StoreError> {
        self.journal.push(Call::Failure { id: id.into(), error: error.clone(), timestamp });
        self.outcome()
    }
}

/// In-memory queue that journals `push_to_head`.
#[derive(Debug, Clone)]
pub struct JournalQueue {
    inner: InMemoryRetryQueue,
    journal: Journal,
}

impl JournalQueue {
    pub fn new(name: &str, journal: Journal) -> Self {
        Self { inner: InMemoryRetryQueue::new(name), journal }
    }

    pub async fn urls(&self) -> Vec<String> {
        self.entries().await.unwrap().into_iter().map(|e| e.request.url).collect()
    }
}

#[async_trait]
impl RetryQueue for JournalQueue {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn push_request_at_tail(&self, entry: QueueEntry) -> Result<(), QueueError> {
        self.inner.push_request_at_tail(entry).await
    }

    async fn pop_from_head(&self) -> Result<Option<QueueEntry>, QueueError> {
        self.inner.pop_from_head().await
    }

    async fn push_to_head(&self, entry: QueueEntry) -> Result<(), QueueError> {
        self.journal.push(Call::PushToHead { id: entry.id().map(str::to_string) });
        self.inner.push_to_head(entry).await
    }

    async fn entries(&self) -> Result<Vec<QueueEntry>, QueueError> {
        self.inner.entries().await
    }
}

/// Telemetry sink that journals event names and correlation ids.
#[derive(Debug, Clone)]
pub struct JournalSink {
    journal: Journal,
}

impl JournalSink {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

impl tower::Service<TelemetryEvent> for JournalSink {
    type Response = ();
    type Error = Infallible;
    type Future = futures::future::Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: TelemetryEvent) -> Self::Future {
        self.journal.push(Call::Telemetry { name: event.name, correlation_id: event.correlation_id });
        futures::future::ready(Ok(()))
    }
}

pub fn refresh_post(url: &str, request_id: Option<&str>) -> CapturedRequest {
    let request = CapturedRequest::post(url)
        .with_header("content-type", "application/json")
        .with_body(r#"{"scope":"all"}"#);
    match request_id {
        Some(id) => request.with_header("x-request-id", id),
        None => request,
    }
}
