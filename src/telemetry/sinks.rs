//! Built-in sinks. Each one finishes its work inside `call`, so the returned future is already
//! resolved.

use super::events::TelemetryEvent;
use futures::future::{ready, Ready};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tower::Service;

/// A telemetry sink that consumes refresh queue events.
pub trait TelemetrySink:
    tower::Service<TelemetryEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Wait for `sink` to be ready and hand it `event`. Readiness and call errors are logged at
/// debug level and dropped.
pub async fn emit_best_effort<S>(sink: S, event: TelemetryEvent)
where
    S: tower::Service<TelemetryEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    match sink.ready_oneshot().await {
        Ok(mut ready) => {
            if let Err(e) = ready.call(event).await {
                tracing::debug!(error = %e, "telemetry sink rejected event");
            }
        }
        Err(e) => tracing::debug!(error = %e, "telemetry sink not ready; event dropped"),
    }
}

type Accepted = Ready<Result<(), Infallible>>;

/// Discards every event.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<TelemetryEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Accepted;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: TelemetryEvent) -> Self::Future {
        ready(Ok(()))
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Writes each event as one `info!` record under the `refresh_sync::telemetry` target.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<TelemetryEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Accepted;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: TelemetryEvent) -> Self::Future {
        tracing::info!(
            target: "refresh_sync::telemetry",
            name = %event.name,
            correlation_id = event.correlation_id.as_deref().unwrap_or("-"),
            payload = %serde_json::Value::Object(event.payload),
            "telemetry"
        );
        ready(Ok(()))
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps the most recent events in memory; the oldest is evicted once `capacity` is reached.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Holds up to 10,000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot of all events received so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.lock().clone()
    }

    /// Events with the given name, in emission order.
    pub fn named(&self, name: &str) -> Vec<TelemetryEvent> {
        self.lock().iter().filter(|e| e.name == name).cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TelemetryEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<TelemetryEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Accepted;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: TelemetryEvent) -> Self::Future {
        let mut events = self.lock();
        if events.len() == self.capacity {
            events.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        events.push(event);
        ready(Ok(()))
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

/// Offloads emission to a bounded channel drained by a background task.
///
/// `call` never waits on the wrapped sink; when the channel is full the event is dropped and
/// counted. Must be constructed inside a tokio runtime.
#[derive(Clone)]
pub struct NonBlockingSink {
    tx: tokio::sync::mpsc::Sender<TelemetryEvent>,
    dropped: Arc<AtomicU64>,
}

impl NonBlockingSink {
    pub fn with_capacity<S>(sink: S, capacity: usize) -> Self
    where
        S: tower::Service<TelemetryEvent, Response = ()> + Send + Clone + 'static,
        S::Error: std::error::Error + Send + 'static,
        S::Future: Send + 'static,
    {
        let (tx, mut rx) = tokio::sync::mpsc::channel(capacity.max(1));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                emit_best_effort(sink.clone(), event).await;
            }
        });
        Self { tx, dropped: Arc::new(AtomicU64::new(0)) }
    }

    /// How many events were dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for NonBlockingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonBlockingSink").field("dropped", &self.dropped()).finish()
    }
}

impl Service<TelemetryEvent> for NonBlockingSink {
    type Response = ();
    type Error = Infallible;
    type Future = Accepted;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: TelemetryEvent) -> Self::Future {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        ready(Ok(()))
    }
}

impl TelemetrySink for NonBlockingSink {
    type SinkError = Infallible;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::names;
    use serde_json::json;
    use std::time::Duration;

    fn event(name: &str) -> TelemetryEvent {
        TelemetryEvent::new(name, json!({"queue": "refresh-queue"}))
    }

    #[tokio::test]
    async fn memory_sink_evicts_oldest() {
        let mut sink = MemorySink::with_capacity(2);
        assert!(sink.is_empty());

        sink.call(event("a")).await.unwrap();
        sink.call(event("b")).await.unwrap();
        sink.call(event("c")).await.unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.evicted(), 1);
        let names: Vec<_> = sink.events().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["b", "c"]);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn memory_sink_filters_by_name() {
        let sink = MemorySink::new();
        emit_best_effort(sink.clone(), event(names::SYNC_RETRY)).await;
        emit_best_effort(sink.clone(), event(names::SYNC_FAILED)).await;
        assert_eq!(sink.named(names::SYNC_FAILED).len(), 1);
    }

    #[tokio::test]
    async fn emit_best_effort_swallows_errors() {
        #[derive(Clone)]
        struct Fails;
        impl Service<TelemetryEvent> for Fails {
            type Response = ();
            type Error = std::io::Error;
            type Future = Ready<Result<(), std::io::Error>>;
            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }
            fn call(&mut self, _req: TelemetryEvent) -> Self::Future {
                ready(Err(std::io::Error::new(std::io::ErrorKind::Other, "sink offline")))
            }
        }

        emit_best_effort(Fails, event(names::SYNC_FAILED)).await;
    }

    #[tokio::test]
    async fn non_blocking_sink_forwards_in_background() {
        let memory = MemorySink::new();
        let mut sink = NonBlockingSink::with_capacity(memory.clone(), 8);
        sink.call(event(names::SYNC_SUCCEEDED)).await.unwrap();

        for _ in 0..50 {
            if memory.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(memory.len(), 1);
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn null_and_log_sinks_accept_events() {
        NullSink.call(event("x")).await.unwrap();
        LogSink.call(event("x")).await.unwrap();
    }
}
