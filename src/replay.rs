//! Replaying captured requests.
//!
//! A replayer is any `tower::Service<CapturedRequest>` answering with a `ReplayResponse` or a
//! `ReplayError::Network`. Status classification (5xx vs. everything else) is done by the
//! controller, not the replayer, so fakes only need to report what the transport saw.

use crate::error::ReplayError;
use crate::request::CapturedRequest;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tower::util::ServiceFn;

/// Status line of a completed replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayResponse {
    pub status: u16,
}

impl ReplayResponse {
    pub fn new(status: u16) -> Self {
        Self { status }
    }

    /// 5xx responses count as failed replays; every other status, 4xx included, is delivered.
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

/// Services that can replay a captured request.
///
/// Blanket-implemented; callers additionally require `Self::Future: Send`.
pub trait Replayer:
    tower::Service<CapturedRequest, Response = ReplayResponse, Error = ReplayError>
    + Clone
    + Send
    + Sync
    + 'static
{
}

impl<S> Replayer for S where
    S: tower::Service<CapturedRequest, Response = ReplayResponse, Error = ReplayError>
        + Clone
        + Send
        + Sync
        + 'static
{
}

/// Wrap an async closure as a replayer.
///
/// ```rust
/// use refresh_sync::replay::{replay_fn, ReplayResponse};
/// use refresh_sync::{CapturedRequest, ReplayError};
///
/// let replayer = replay_fn(|_req: CapturedRequest| async {
///     Ok::<_, ReplayError>(ReplayResponse::new(204))
/// });
/// # let _ = replayer;
/// ```
pub fn replay_fn<F, Fut>(f: F) -> ServiceFn<F>
where
    F: FnMut(CapturedRequest) -> Fut,
    Fut: Future<Output = Result<ReplayResponse, ReplayError>>,
{
    tower::service_fn(f)
}

/// Test replayer that plays back a fixed script of outcomes.
///
/// Once the script runs out every further replay gets `fallback` (200 unless changed).
#[derive(Debug, Clone)]
pub struct ScriptedReplayer {
    script: Arc<Mutex<VecDeque<Result<u16, ReplayError>>>>,
    fallback: Result<u16, ReplayError>,
    seen: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl ScriptedReplayer {
    pub fn new<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = Result<u16, ReplayError>>,
    {
        Self {
            script: Arc::new(Mutex::new(outcomes.into_iter().collect())),
            fallback: Ok(200),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every replay gets the same outcome.
    pub fn always(outcome: Result<u16, ReplayError>) -> Self {
        Self::new([]).with_fallback(outcome)
    }

    pub fn with_fallback(mut self, outcome: Result<u16, ReplayError>) -> Self {
        self.fallback = outcome;
        self
    }

    /// Number of replays performed so far.
    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Requests replayed so far, in order.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl tower::Service<CapturedRequest> for ScriptedReplayer {
    type Response = ReplayResponse;
    type Error = ReplayError;
    type Future = futures::future::Ready<Result<ReplayResponse, ReplayError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: CapturedRequest) -> Self::Future {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).push(request);
        let outcome = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        futures::future::ready(outcome.map(ReplayResponse::new))
    }
}

#[cfg(feature = "http")]
pub use http::HttpReplayer;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use futures::future::BoxFuture;

    /// Replays captured requests over HTTP with `reqwest`.
    #[derive(Debug, Clone, Default)]
    pub struct HttpReplayer {
        client: reqwest::Client,
    }

    impl HttpReplayer {
        pub fn new(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    impl tower::Service<CapturedRequest> for HttpReplayer {
        type Response = ReplayResponse;
        type Error = ReplayError;
        type Future = BoxFuture<'static, Result<ReplayResponse, ReplayError>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, request: CapturedRequest) -> Self::Future {
            let client = self.client.clone();
            Box::pin(async move {
                let method = reqwest::Method::from_bytes(request.method.as_bytes())
                    .map_err(ReplayError::network)?;
                let mut builder = client.request(method, &request.url);
                for (name, value) in request.headers() {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                if let Some(body) = request.body() {
                    builder = builder.body(body.to_vec());
                }
                let response = builder.send().await.map_err(ReplayError::network)?;
                Ok(ReplayResponse::new(response.status().as_u16()))
            })
        }
    }
}
