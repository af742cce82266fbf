//! Convenient re-exports for common refresh-sync types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    config::SyncConfig,
    controller::{RefreshQueueController, DEFAULT_MAX_ATTEMPTS},
    error::{BuildError, DrainError, QueueError, ReplayError, StoreError},
    jitter::Jitter,
    lifecycle::{BackgroundSync, LifecycleEvent, SyncTrigger, Transition},
    queue::{FileRetryQueue, InMemoryRetryQueue, QueueEntry, RetryQueue},
    replay::{replay_fn, ReplayResponse, Replayer},
    request::CapturedRequest,
    routes::{Destination, RouteRequest, RouteTable, Strategy},
    store::{InMemoryStoreAdapter, QueueStore, RecordingQueueStore},
    telemetry::{LogSink, MemorySink, TelemetryEvent},
};
