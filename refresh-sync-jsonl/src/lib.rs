//! JSONL sink for `refresh-sync`. Writes one telemetry event per line.
//! Always appends; bring your own path.

use refresh_sync::telemetry::{TelemetryEvent, TelemetrySink};
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Mutex;

/// Appends events as `{"name", "payload", "correlationId"}` objects, one per line.
///
/// Clones share a write lock so concurrent emits never interleave within a line.
#[derive(Clone, Debug)]
pub struct JsonlSink {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonlSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into(), write_lock: Arc::new(Mutex::new(())) }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl tower_service::Service<TelemetryEvent> for JsonlSink {
    type Response = ();
    type Error = io::Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: TelemetryEvent) -> Self::Future {
        let path = self.path.clone();
        let lock = self.write_lock.clone();
        let line = serde_json::to_string(&event).map(|json| json + "\n");
        Box::pin(async move {
            use tokio::io::AsyncWriteExt;
            let line = line.map_err(io::Error::other)?;
            let _guard = lock.lock().await;
            let mut file =
                tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            tracing::trace!(path = %path.display(), event = %event.name, "telemetry line written");
            Ok(())
        })
    }
}

impl TelemetrySink for JsonlSink {
    type SinkError = io::Error;
}
