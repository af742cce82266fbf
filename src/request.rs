//! Captured outbound requests.
//!
//! A `CapturedRequest` is the verbatim copy of a request that failed at the network layer. It
//! is what the retry queue persists and what the replayer re-issues. Header names are stored
//! lowercased so lookups behave like HTTP header maps.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Header carrying the correlation id joined across telemetry events.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Method, URL, headers and body of a request to be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub method: String,
    pub url: String,
    #[serde(default, deserialize_with = "lowercase_headers")]
    headers: BTreeMap<String, String>,
    #[serde(default, with = "body_base64")]
    body: Option<Vec<u8>>,
}

impl CapturedRequest {
    /// Capture a request with the given method and absolute URL.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Convenience constructor for `POST` requests.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    /// Convenience constructor for `GET` requests.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Add a header; names are case-insensitive.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Attach a body. `GET`/`HEAD` bodies and empty bodies are dropped.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        self.body = if body.is_empty() || self.is_bodyless_method() { None } else { Some(body) };
        self
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// All headers, lowercased names in sorted order.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Body encoded the way the queue store records it.
    pub fn body_base64(&self) -> Option<String> {
        self.body.as_ref().map(|b| STANDARD.encode(b))
    }

    /// Correlation id from `x-request-id`, if present and non-empty.
    pub fn request_id(&self) -> Option<&str> {
        self.header(REQUEST_ID_HEADER).filter(|v| !v.is_empty())
    }

    /// Path component of the URL, without query or fragment.
    pub fn path(&self) -> &str {
        split_url(&self.url).0
    }

    /// Query component of the URL including the leading `?`, or an empty string.
    pub fn query(&self) -> &str {
        split_url(&self.url).1
    }

    fn is_bodyless_method(&self) -> bool {
        self.method == "GET" || self.method == "HEAD"
    }
}

/// Split an absolute or relative URL into `(path, query)`.
pub(crate) fn split_url(url: &str) -> (&str, &str) {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let after_scheme = match without_fragment.find("://") {
        Some(idx) => &without_fragment[idx + 3..],
        None => without_fragment,
    };
    let path_and_query = if without_fragment.len() != after_scheme.len() {
        match after_scheme.find('/') {
            Some(idx) => &after_scheme[idx..],
            None => "/",
        }
    } else {
        after_scheme
    };
    match path_and_query.find('?') {
        Some(idx) => (&path_and_query[..idx], &path_and_query[idx..]),
        None => (path_and_query, ""),
    }
}

/// Documents written by other producers may carry mixed-case header names.
fn lowercase_headers<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, String>, D::Error> {
    let raw = BTreeMap::<String, String>::deserialize(d)?;
    Ok(raw.into_iter().map(|(name, value)| (name.to_ascii_lowercase(), value)).collect())
}

mod body_base64 {
    use super::*;

    pub fn serialize<S: Serializer>(body: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match body {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|text| STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}
