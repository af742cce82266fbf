//! Route strategy table: classify an intercepted request into exactly one caching strategy.
//!
//! Routes are evaluated in declaration order and the first match wins. The default table is:
//!
//! | Predicate | Strategy |
//! |---|---|
//! | destination is style, script, image or font | stale-while-revalidate, cache `static` |
//! | `GET` and path starts with `/api/` | network-first, cache `api`, 4s network timeout |
//! | `POST /api/refresh` | network-only; failures are handed to the retry queue |
//! | everything else | precache-and-serve from the install manifest |
//!
//! ```rust
//! use refresh_sync::routes::{Destination, RouteRequest, RouteTable, Strategy};
//!
//! let table = RouteTable::default();
//! let strategy = table.classify(&RouteRequest::new("POST", "https://app.test/api/refresh"));
//! assert!(matches!(strategy, Strategy::NetworkOnlyWithQueue { .. }));
//!
//! let font = RouteRequest::new("GET", "https://app.test/f.woff2").with_destination(Destination::Font);
//! assert_eq!(table.classify(&font).name(), "stale-while-revalidate");
//! ```

use crate::config::SyncConfig;
use crate::request::{split_url, CapturedRequest};
use crate::telemetry::{names, TelemetryEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

pub const STATIC_CACHE: &str = "static";
pub const API_CACHE: &str = "api";
pub const API_NETWORK_TIMEOUT: Duration = Duration::from_secs(4);
pub const REFRESH_PATH: &str = "/api/refresh";

/// Opaque responses report status 0.
pub const CACHEABLE_STATUSES: [u16; 2] = [0, 200];

/// What the host is fetching the resource for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Destination {
    /// No destination (`fetch()` / XHR).
    #[default]
    Empty,
    Document,
    Style,
    Script,
    Image,
    Font,
    Worker,
    Other,
}

impl Destination {
    /// Parse a host destination string; unknown values map to `Other`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "" => Destination::Empty,
            "document" => Destination::Document,
            "style" => Destination::Style,
            "script" => Destination::Script,
            "image" => Destination::Image,
            "font" => Destination::Font,
            "worker" => Destination::Worker,
            _ => Destination::Other,
        }
    }
}

/// The parts of an intercepted request the table looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteRequest<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub destination: Destination,
}

impl<'a> RouteRequest<'a> {
    pub fn new(method: &'a str, url: &'a str) -> Self {
        Self { method, url, destination: Destination::Empty }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn path(&self) -> &'a str {
        split_url(self.url).0
    }

    pub fn query(&self) -> &'a str {
        split_url(self.url).1
    }
}

impl<'a> From<&'a CapturedRequest> for RouteRequest<'a> {
    fn from(request: &'a CapturedRequest) -> Self {
        RouteRequest::new(&request.method, &request.url)
    }
}

/// Entry cap and age limit for a named cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiration {
    pub max_entries: usize,
    pub max_age: Duration,
}

/// How cache keys are derived from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKeyPolicy {
    /// The request URL as-is.
    Url,
    /// API requests are keyed by method, path, query, schema version and data epoch, so a
    /// schema bump or data reload never serves stale shapes. Other URLs keep the URL.
    Versioned { schema_version: String, data_epoch: String },
}

/// A named runtime cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub name: String,
    pub expiration: Expiration,
    pub key_policy: CacheKeyPolicy,
}

impl CacheConfig {
    pub fn new(name: impl Into<String>, expiration: Expiration) -> Self {
        Self { name: name.into(), expiration, key_policy: CacheKeyPolicy::Url }
    }

    pub fn with_key_policy(mut self, key_policy: CacheKeyPolicy) -> Self {
        self.key_policy = key_policy;
        self
    }

    /// Only 200 and opaque responses are written to runtime caches.
    pub fn is_cacheable(&self, status: u16) -> bool {
        CACHEABLE_STATUSES.contains(&status)
    }

    pub fn cache_key(&self, request: &RouteRequest<'_>) -> String {
        match &self.key_policy {
            CacheKeyPolicy::Url => request.url.to_string(),
            CacheKeyPolicy::Versioned { schema_version, data_epoch } => {
                api_cache_key(request, schema_version, data_epoch)
            }
        }
    }

    /// `sw.fetch.cache_hit` event for a response served from this cache.
    pub fn hit_event(&self, request: &CapturedRequest) -> TelemetryEvent {
        cache_hit_event(&self.name, request)
    }
}

/// Caching behavior selected for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Serve from the install-time manifest.
    Precache,
    /// Serve cached immediately and refresh the cache in the background.
    StaleWhileRevalidate { cache: CacheConfig },
    /// Try the network; fall back to the cache once `network_timeout` passes or the fetch fails.
    NetworkFirst { cache: CacheConfig, network_timeout: Duration },
    /// Never cache; a request that fails at the network layer is queued on `queue_name`.
    NetworkOnlyWithQueue { queue_name: String },
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Precache => "precache",
            Strategy::StaleWhileRevalidate { .. } => "stale-while-revalidate",
            Strategy::NetworkFirst { .. } => "network-first",
            Strategy::NetworkOnlyWithQueue { .. } => "network-only",
        }
    }

    pub fn cache(&self) -> Option<&CacheConfig> {
        match self {
            Strategy::StaleWhileRevalidate { cache } | Strategy::NetworkFirst { cache, .. } => {
                Some(cache)
            }
            Strategy::Precache | Strategy::NetworkOnlyWithQueue { .. } => None,
        }
    }

    /// The retry queue failed requests are handed to, if this strategy queues them.
    pub fn retry_queue(&self) -> Option<&str> {
        match self {
            Strategy::NetworkOnlyWithQueue { queue_name } => Some(queue_name.as_str()),
            _ => None,
        }
    }
}

/// Predicate half of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    Destinations(Vec<Destination>),
    /// Method (case-insensitive) and path prefix.
    PathPrefix { method: String, prefix: String },
    /// Method (case-insensitive) and exact path.
    Path { method: String, path: String },
    Any,
}

impl Matcher {
    pub fn matches(&self, request: &RouteRequest<'_>) -> bool {
        match self {
            Matcher::Destinations(destinations) => destinations.contains(&request.destination),
            Matcher::PathPrefix { method, prefix } => {
                request.method.eq_ignore_ascii_case(method) && request.path().starts_with(prefix.as_str())
            }
            Matcher::Path { method, path } => {
                request.method.eq_ignore_ascii_case(method) && request.path() == path
            }
            Matcher::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub matcher: Matcher,
    pub strategy: Strategy,
}

/// Ordered routes plus the strategy used when none match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<Route>,
    fallback: Strategy,
}

impl RouteTable {
    /// A table with no routes, so every request falls back to `Precache`.
    ///
    /// Start here to build a custom table; `RouteTable::default()` is the standard one.
    pub fn empty() -> Self {
        Self { routes: Vec::new(), fallback: Strategy::Precache }
    }

    /// Append a route; earlier routes take precedence.
    pub fn route(mut self, matcher: Matcher, strategy: Strategy) -> Self {
        self.routes.push(Route { matcher, strategy });
        self
    }

    pub fn fallback(mut self, strategy: Strategy) -> Self {
        self.fallback = strategy;
        self
    }

    /// The standard table, with API cache keys versioned by `config`.
    pub fn for_config(config: &SyncConfig) -> Self {
        let static_cache = CacheConfig::new(
            STATIC_CACHE,
            Expiration { max_entries: 60, max_age: Duration::from_secs(60 * 60 * 24) },
        );
        let api_cache = CacheConfig::new(
            API_CACHE,
            Expiration { max_entries: 50, max_age: Duration::from_secs(60) },
        )
        .with_key_policy(CacheKeyPolicy::Versioned {
            schema_version: config.schema_version.clone(),
            data_epoch: config.data_epoch.clone(),
        });

        Self::empty()
            .route(
                Matcher::Destinations(vec![
                    Destination::Style,
                    Destination::Script,
                    Destination::Image,
                    Destination::Font,
                ]),
                Strategy::StaleWhileRevalidate { cache: static_cache },
            )
            .route(
                Matcher::PathPrefix { method: "GET".into(), prefix: "/api/".into() },
                Strategy::NetworkFirst { cache: api_cache, network_timeout: API_NETWORK_TIMEOUT },
            )
            .route(
                Matcher::Path { method: "POST".into(), path: REFRESH_PATH.into() },
                Strategy::NetworkOnlyWithQueue { queue_name: config.queue_name.clone() },
            )
    }

    /// First matching route's strategy, or the fallback.
    pub fn classify(&self, request: &RouteRequest<'_>) -> &Strategy {
        self.routes
            .iter()
            .find(|route| route.matcher.matches(request))
            .map(|route| &route.strategy)
            .unwrap_or(&self.fallback)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

/// The standard four-route table for `SyncConfig::default()`, not an empty one.
impl Default for RouteTable {
    fn default() -> Self {
        Self::for_config(&SyncConfig::default())
    }
}

/// Versioned cache key for `/api/` requests: `api:<method>:<path><query>:v<schema>:e<epoch>`.
///
/// The method is lowercased. Non-API URLs are returned unchanged.
pub fn api_cache_key(request: &RouteRequest<'_>, schema_version: &str, data_epoch: &str) -> String {
    let path = request.path();
    if !path.starts_with("/api/") {
        return request.url.to_string();
    }
    format!(
        "api:{}:{}{}:v{}:e{}",
        request.method.to_ascii_lowercase(),
        path,
        request.query(),
        schema_version,
        data_epoch
    )
}

/// `sw.fetch.cache_hit` with `{cacheName, url}`, correlated by `x-request-id`.
pub fn cache_hit_event(cache_name: &str, request: &CapturedRequest) -> TelemetryEvent {
    TelemetryEvent::new(names::CACHE_HIT, json!({ "cacheName": cache_name, "url": request.url }))
        .correlated(request.request_id())
}

/// One install-time precache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecacheEntry {
    pub url: String,
    pub revision: Option<String>,
}

impl PrecacheEntry {
    /// Revisioned entries are keyed with a `__WB_REVISION__` query parameter.
    pub fn cache_key(&self) -> String {
        match &self.revision {
            Some(revision) => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}__WB_REVISION__={}", self.url, sep, revision)
            }
            None => self.url.clone(),
        }
    }
}

/// Assets served by the `Precache` strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrecacheManifest {
    entries: Vec<PrecacheEntry>,
}

impl PrecacheManifest {
    pub fn new(entries: Vec<PrecacheEntry>) -> Self {
        Self { entries }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Find the entry for `url`, ignoring query and fragment.
    pub fn lookup(&self, url: &str) -> Option<&PrecacheEntry> {
        let path = split_url(url).0;
        self.entries.iter().find(|entry| entry.url == url || split_url(&entry.url).0 == path)
    }

    pub fn entries(&self) -> &[PrecacheEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
