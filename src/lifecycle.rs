//! Host lifecycle events mapped to explicit queue transitions.
//!
//! `BackgroundSync` owns the retry queue and the controller. The host feeds it one event at a
//! time and acts on the returned `Transition`:
//!
//! - `RequestFailed`: the request is queued when the route table sends it through the
//!   network-only-with-queue strategy, otherwise it is ignored.
//! - `SyncTriggered`: the queue is drained.
//! - `Installed`: `sw.install` telemetry is emitted; the transition tells the host whether to
//!   activate immediately.
//! - `SkipWaitingRequested`: a client asked the waiting worker to activate.

use crate::config::SyncConfig;
use crate::controller::RefreshQueueController;
use crate::error::LifecycleError;
use crate::queue::{QueueEntry, RetryQueue};
use crate::replay::Replayer;
use crate::request::CapturedRequest;
use crate::routes::{RouteRequest, RouteTable};
use crate::telemetry::{emit_best_effort, names, TelemetryEvent};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Why the host is asking for a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    ConnectivityRestored,
    PeriodicSync,
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncTrigger::ConnectivityRestored => "connectivity-restored",
            SyncTrigger::PeriodicSync => "periodic-sync",
            SyncTrigger::Manual => "manual",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Installed,
    /// An intercepted request failed at the network layer.
    RequestFailed(CapturedRequest),
    SyncTriggered(SyncTrigger),
    SkipWaitingRequested,
}

/// What handling an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The failed request was appended to the retry queue.
    Enqueued(QueueEntry),
    /// The failed request is not queued by its route; the host surfaces the failure.
    Ignored { strategy: &'static str },
    /// A drain ran to completion.
    Drained { delivered: usize },
    /// Install finished. `skip_waiting` asks the host to activate now; otherwise clients are
    /// told `version` is waiting.
    Installed { skip_waiting: bool, version: String },
    ActivateNow,
}

/// Owns the queue, the controller and the route table for one worker.
pub struct BackgroundSync<R, T> {
    queue: Arc<dyn RetryQueue>,
    controller: RefreshQueueController<R, T>,
    routes: RouteTable,
    config: SyncConfig,
}

impl<R, T> fmt::Debug for BackgroundSync<R, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundSync")
            .field("queue", &self.queue.name())
            .field("routes", &self.routes)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<R, T> BackgroundSync<R, T>
where
    R: Replayer,
    R::Future: Send,
    T: tower::Service<TelemetryEvent, Response = ()> + Clone + Send + Sync + 'static,
    T::Error: std::error::Error + Send + 'static,
    T::Future: Send + 'static,
{
    /// Wire up with the standard route table for `config`.
    pub fn new(
        queue: Arc<dyn RetryQueue>,
        controller: RefreshQueueController<R, T>,
        config: SyncConfig,
    ) -> Self {
        let routes = RouteTable::for_config(&config);
        Self { queue, controller, routes, config }
    }

    pub fn with_routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    pub fn queue(&self) -> &Arc<dyn RetryQueue> {
        &self.queue
    }

    pub fn controller(&self) -> &RefreshQueueController<R, T> {
        &self.controller
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub async fn handle(&self, event: LifecycleEvent) -> Result<Transition, LifecycleError> {
        match event {
            LifecycleEvent::Installed => Ok(self.installed().await),
            LifecycleEvent::RequestFailed(request) => self.request_failed(request).await,
            LifecycleEvent::SyncTriggered(trigger) => {
                debug!(queue = self.queue.name(), %trigger, "sync triggered");
                let delivered = self.controller.process_refresh_queue(&*self.queue).await?;
                Ok(Transition::Drained { delivered })
            }
            LifecycleEvent::SkipWaitingRequested => Ok(Transition::ActivateNow),
        }
    }

    async fn request_failed(&self, request: CapturedRequest) -> Result<Transition, LifecycleError> {
        let strategy = self.routes.classify(&RouteRequest::from(&request));
        if strategy.retry_queue().is_none() {
            debug!(method = %request.method, url = %request.url, strategy = strategy.name(), "failure not queued");
            return Ok(Transition::Ignored { strategy: strategy.name() });
        }
        let entry = self
            .controller
            .enqueue_failed(&*self.queue, request)
            .await
            .map_err(LifecycleError::Enqueue)?;
        Ok(Transition::Enqueued(entry))
    }

    async fn installed(&self) -> Transition {
        let event =
            TelemetryEvent::new(names::INSTALL, json!({ "appVersion": self.config.app_version }));
        emit_best_effort(self.controller.telemetry().clone(), event).await;
        info!(
            version = %self.config.app_version,
            skip_waiting = self.config.force_update,
            "worker installed"
        );
        Transition::Installed {
            skip_waiting: self.config.force_update,
            version: self.config.app_version.clone(),
        }
    }
}
