//! Offline refresh walkthrough: a refresh POST fails, is queued, and is replayed once the
//! simulated server comes back.
use refresh_sync::prelude::*;
use refresh_sync::telemetry::NonBlockingSink;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for LogSink
    tracing_subscriber::fmt::init();

    let config = SyncConfig::from_env();

    // The server answers 503 for the first four replays, then recovers.
    let replays = Arc::new(AtomicUsize::new(0));
    let counter = replays.clone();
    let replayer = replay_fn(move |req: CapturedRequest| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            println!("  replay #{} {} {}", n + 1, req.method, req.url);
            if n < 4 {
                Ok::<_, ReplayError>(ReplayResponse::new(503))
            } else {
                Ok(ReplayResponse::new(204))
            }
        }
    });

    let telemetry = NonBlockingSink::with_capacity(LogSink, 256);
    let store = RecordingQueueStore::new(InMemoryStoreAdapter::new());
    let controller = RefreshQueueController::builder(replayer, telemetry)
        .configure(&config)
        .backoff(Backoff::exponential(Duration::from_millis(50)))
        .store(store.clone())
        .build()?;
    let queue = Arc::new(InMemoryRetryQueue::from_config(&config));
    let sync = BackgroundSync::new(queue.clone(), controller, config);

    println!("=== install ===");
    println!("{:?}", sync.handle(LifecycleEvent::Installed).await?);

    println!("=== offline: refresh POST fails ===");
    let request = CapturedRequest::post("https://app.test/api/refresh")
        .with_header("content-type", "application/json")
        .with_header("x-request-id", "req-demo-1")
        .with_body(r#"{"scope":"all"}"#);
    let transition = sync.handle(LifecycleEvent::RequestFailed(request)).await?;
    let id = match &transition {
        Transition::Enqueued(entry) => entry.id().map(str::to_string),
        _ => None,
    };
    println!("{transition:?}");

    println!("=== periodic sync: server still down ===");
    match sync.handle(LifecycleEvent::SyncTriggered(SyncTrigger::PeriodicSync)).await {
        Ok(t) => println!("{t:?}"),
        Err(e) => println!("drain failed: {e}"),
    }
    if let Some(id) = id.as_deref() {
        println!("store record: {:?}", store.record(id).await?);
    }

    println!("=== connectivity restored ===");
    let drained = sync
        .handle(LifecycleEvent::SyncTriggered(SyncTrigger::ConnectivityRestored))
        .await?;
    println!("{drained:?}; queue length {}", queue.len().await?);

    // Let the background telemetry worker flush.
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(())
}
