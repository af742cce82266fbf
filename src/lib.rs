#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # refresh-sync
//!
//! Offline background sync for failed refresh requests: a durable FIFO retry queue, a drain
//! controller with a bounded retry ceiling, a diagnostic queue store, best-effort telemetry and
//! the route strategy table that decides which requests get queued at all.
//!
//! ## Features
//!
//! - **Retry queue** with push-at-tail, pop-from-head and push-to-head, in memory or on disk
//! - **Drain controller** with a per-entry attempt ceiling, injectable backoff and correlated
//!   telemetry
//! - **Queue store** recording enqueue, attempt, success and failure per entry
//! - **Telemetry sinks** as `tower::Service`s
//! - **Route strategy table** as a closed enum selected by an ordered predicate list
//!
//! ## Quick Start
//!
//! ```rust
//! use refresh_sync::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let replayer = replay_fn(|_req: CapturedRequest| async {
//!         Ok::<_, ReplayError>(ReplayResponse::new(204))
//!     });
//!     let controller = RefreshQueueController::builder(replayer, LogSink)
//!         .max_attempts(3)
//!         .backoff(Backoff::exponential(std::time::Duration::from_millis(200)))
//!         .build()
//!         .unwrap();
//!
//!     let queue = InMemoryRetryQueue::new("refresh-queue");
//!     let request = CapturedRequest::post("https://app.test/api/refresh")
//!         .with_header("x-request-id", "req-1");
//!     controller.enqueue_failed(&queue, request).await.unwrap();
//!
//!     // Later, when connectivity comes back:
//!     controller.process_refresh_queue(&queue).await.unwrap();
//! }
//! ```

pub mod backoff;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod jitter;
pub mod lifecycle;
pub mod prelude;
pub mod queue;
pub mod replay;
pub mod request;
pub mod routes;
pub mod sleeper;
pub mod store;
pub mod telemetry;

// Re-exports
pub use backoff::Backoff;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use controller::{RefreshQueueController, RefreshQueueControllerBuilder};
pub use error::{BuildError, ConfigError, DrainError, LifecycleError, QueueError, ReplayError, StoreError};
pub use jitter::Jitter;
pub use lifecycle::{BackgroundSync, LifecycleEvent, SyncTrigger, Transition};
pub use queue::{FileRetryQueue, InMemoryRetryQueue, QueueEntry, Retention, RetryQueue};
pub use replay::{ReplayResponse, Replayer};
pub use request::CapturedRequest;
pub use routes::{RouteTable, Strategy};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use store::{NullQueueStore, QueueStore, RecordingQueueStore};
