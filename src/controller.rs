//! Refresh queue controller: enqueue on failure, drain with bounded retry.
//!
//! Drain semantics:
//! - Entries are popped from the head and replayed one at a time, in FIFO order.
//! - Each entry gets up to `max_attempts` replays (default 3) within a drain. A replay fails when
//!   the transport rejects or the response status is >= 500; any other status is delivered.
//! - Between attempts the controller waits `jitter(backoff.delay(failed_so_far))`.
//! - When the ceiling is hit the entry is pushed back to the head, the failure is recorded and
//!   the drain returns `DrainError::Replay`. The host retries on its next sync trigger.
//! - If the queue cannot persist the restored entry the failure is still recorded and reported,
//!   then the drain returns `DrainError::Queue`.
//! - An empty queue resolves immediately without touching the store or telemetry.
//!
//! Invariants:
//! - A popped entry is either delivered or back at the head before any error is returned.
//! - Store and telemetry failures are logged and never alter the drain outcome.
//! - Overlapping drains through one controller are serialized.
//!
//! ```rust
//! use refresh_sync::replay::{replay_fn, ReplayResponse};
//! use refresh_sync::telemetry::MemorySink;
//! use refresh_sync::{CapturedRequest, InMemoryRetryQueue, InstantSleeper, RefreshQueueController, ReplayError};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let replayer = replay_fn(|_req: CapturedRequest| async { Ok::<_, ReplayError>(ReplayResponse::new(204)) });
//! let controller = RefreshQueueController::builder(replayer, MemorySink::new())
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//!
//! let queue = InMemoryRetryQueue::new("refresh-queue");
//! controller
//!     .enqueue_failed(&queue, CapturedRequest::post("https://example.test/api/refresh"))
//!     .await
//!     .unwrap();
//! assert_eq!(controller.process_refresh_queue(&queue).await.unwrap(), 1);
//! # });
//! ```

use crate::backoff::Backoff;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::{BuildError, DrainError, QueueError, ReplayError};
use crate::jitter::Jitter;
use crate::queue::{QueueEntry, RetryQueue};
use crate::replay::Replayer;
use crate::request::CapturedRequest;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::store::{NullQueueStore, QueueStore};
use crate::telemetry::{emit_best_effort, names, TelemetryEvent};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

/// Default replay ceiling per entry per drain.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Drains a retry queue by replaying its entries.
pub struct RefreshQueueController<R, T> {
    replayer: R,
    telemetry: T,
    store: Arc<dyn QueueStore>,
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    drain_lock: tokio::sync::Mutex<()>,
}

impl<R, T> std::fmt::Debug for RefreshQueueController<R, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshQueueController")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &self.sleeper)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<R, T> RefreshQueueController<R, T>
where
    R: Replayer,
    R::Future: Send,
    T: tower::Service<TelemetryEvent, Response = ()> + Clone + Send + Sync + 'static,
    T::Error: std::error::Error + Send + 'static,
    T::Future: Send + 'static,
{
    pub fn builder(replayer: R, telemetry: T) -> RefreshQueueControllerBuilder<R, T> {
        RefreshQueueControllerBuilder::new(replayer, telemetry)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// The sink drain events are sent to.
    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    /// Capture a request that failed at the network layer and append it to `queue`.
    ///
    /// Assigns a fresh id, records the enqueue in the store, then pushes at the tail.
    pub async fn enqueue_failed<Q>(
        &self,
        queue: &Q,
        request: CapturedRequest,
    ) -> Result<QueueEntry, QueueError>
    where
        Q: RetryQueue + ?Sized,
    {
        let id = uuid::Uuid::new_v4().to_string();
        let entry = QueueEntry::new(id.clone(), request, self.clock.now_millis());

        if let Err(e) = self.store.record_enqueue(&id, &entry.request, entry.timestamp).await {
            warn!(queue = queue.name(), id = %id, error = %e, "failed to record enqueue");
        }
        queue.push_request_at_tail(entry.clone()).await?;
        debug!(
            queue = queue.name(),
            id = %id,
            url = %entry.request.url,
            request_id = entry.request.request_id().unwrap_or("-"),
            "queued failed request"
        );
        Ok(entry)
    }

    /// Drain `queue`, returning how many entries were delivered.
    pub async fn process_refresh_queue<Q>(&self, queue: &Q) -> Result<usize, DrainError>
    where
        Q: RetryQueue + ?Sized,
    {
        let _drain = self.drain_lock.lock().await;
        let queue_name = queue.name();
        let mut delivered = 0;

        while let Some(entry) = queue.pop_from_head().await? {
            let (attempts, failure) = match self.replay_with_retries(queue_name, &entry).await {
                Ok(()) => {
                    delivered += 1;
                    continue;
                }
                Err(exhausted) => exhausted,
            };

            let id = entry.id().map(str::to_string);
            let request_id = entry.request.request_id().map(str::to_string);
            let restored = queue.push_to_head(entry).await;
            if let Err(e) = &restored {
                error!(
                    queue = queue_name,
                    id = id.as_deref().unwrap_or("-"),
                    error = %e,
                    "failed to persist entry at queue head"
                );
            }

            if let Some(id) = id.as_deref() {
                let failed_at = self.clock.now_millis();
                if let Err(e) = self.store.record_failure(id, &failure, failed_at).await {
                    warn!(queue = queue_name, id, error = %e, "failed to record failure");
                }
            }
            self.emit(
                TelemetryEvent::new(
                    names::SYNC_FAILED,
                    json!({ "attempt": attempts, "queue": queue_name }),
                )
                .correlated(request_id.as_deref()),
            )
            .await;
            error!(
                queue = queue_name,
                id = id.as_deref().unwrap_or("-"),
                request_id = request_id.as_deref().unwrap_or("-"),
                attempts,
                error = %failure,
                "replay exhausted; entry kept at queue head"
            );

            restored?;
            return Err(DrainError::Replay {
                id,
                attempts,
                source: failure,
            });
        }

        if delivered > 0 {
            info!(queue = queue_name, delivered, "refresh queue drained");
        }
        Ok(delivered)
    }

    async fn replay_with_retries(
        &self,
        queue_name: &str,
        entry: &QueueEntry,
    ) -> Result<(), (usize, ReplayError)> {
        let id = entry.id();
        let request_id = entry.request.request_id();
        let mut attempt = 1;

        loop {
            if let Some(id) = id {
                if let Err(e) = self.store.record_attempt(id).await {
                    warn!(queue = queue_name, id, error = %e, "failed to record attempt");
                }
            }
            debug!(queue = queue_name, id = id.unwrap_or("-"), attempt, "replaying queued request");

            match self.replay(&entry.request).await {
                Ok(status) => {
                    if let Some(id) = id {
                        if let Err(e) = self.store.record_success(id).await {
                            warn!(queue = queue_name, id, error = %e, "failed to record success");
                        }
                    }
                    self.emit(
                        TelemetryEvent::new(names::SYNC_SUCCEEDED, json!({ "queue": queue_name }))
                            .correlated(request_id),
                    )
                    .await;
                    info!(queue = queue_name, id = id.unwrap_or("-"), attempt, status, "replay delivered");
                    return Ok(());
                }
                Err(failure) if attempt >= self.max_attempts => return Err((attempt, failure)),
                Err(failure) => {
                    let delay = self.jitter.apply(self.backoff.delay(attempt));
                    warn!(
                        queue = queue_name,
                        id = id.unwrap_or("-"),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "replay failed; retrying"
                    );
                    attempt += 1;
                    self.emit(
                        TelemetryEvent::new(names::SYNC_RETRY, json!({ "attempt": attempt }))
                            .correlated(request_id),
                    )
                    .await;
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }

    /// One replay; 5xx statuses become `ReplayError::Server`.
    async fn replay(&self, request: &CapturedRequest) -> Result<u16, ReplayError> {
        let response = self.replayer.clone().oneshot(request.clone()).await?;
        if response.is_server_error() {
            return Err(ReplayError::Server { status: response.status });
        }
        Ok(response.status)
    }

    async fn emit(&self, event: TelemetryEvent) {
        emit_best_effort(self.telemetry.clone(), event).await;
    }
}

/// Builder for `RefreshQueueController`.
pub struct RefreshQueueControllerBuilder<R, T> {
    replayer: R,
    telemetry: T,
    store: Arc<dyn QueueStore>,
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
}

impl<R, T> RefreshQueueControllerBuilder<R, T> {
    /// Defaults: 3 attempts, exponential backoff from 200ms, no jitter, no store.
    pub fn new(replayer: R, telemetry: T) -> Self {
        Self {
            replayer,
            telemetry,
            store: Arc::new(NullQueueStore),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
            jitter: Jitter::None,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
        }
    }

    /// Apply the retry settings from a loaded configuration.
    pub fn configure(self, config: &SyncConfig) -> Self {
        self.max_attempts(config.max_attempts).backoff(config.backoff())
    }

    pub fn store<S>(mut self, store: S) -> Self
    where
        S: QueueStore + 'static,
    {
        self.store = Arc::new(store);
        self
    }

    /// Share a store with other components.
    pub fn shared_store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = store;
        self
    }

    /// Set total attempts per entry per drain. Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> Result<RefreshQueueController<R, T>, BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        Ok(RefreshQueueController {
            replayer: self.replayer,
            telemetry: self.telemetry,
            store: self.store,
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            sleeper: self.sleeper,
            clock: self.clock,
            drain_lock: tokio::sync::Mutex::new(()),
        })
    }
}
