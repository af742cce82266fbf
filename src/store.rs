//! Queue store: diagnostic log of each entry's enqueue/attempt/success/failure.
//!
//! The controller only ever writes here; nothing in the drain path reads the store back.
//! `RecordingQueueStore` keeps one `RefreshQueueRecord` per entry on top of a pluggable
//! key-value `StoreAdapter`, so hosts can back it with whatever durable storage they have.

use crate::error::{ReplayError, StoreError};
use crate::request::CapturedRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

/// Write-only sink for queue lifecycle events.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn record_enqueue(
        &self,
        id: &str,
        request: &CapturedRequest,
        timestamp: u64,
    ) -> Result<(), StoreError>;

    async fn record_attempt(&self, id: &str) -> Result<(), StoreError>;

    async fn record_success(&self, id: &str) -> Result<(), StoreError>;

    async fn record_failure(
        &self,
        id: &str,
        error: &ReplayError,
        timestamp: u64,
    ) -> Result<(), StoreError>;
}

/// Store that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullQueueStore;

#[async_trait]
impl QueueStore for NullQueueStore {
    async fn record_enqueue(&self, _: &str, _: &CapturedRequest, _: u64) -> Result<(), StoreError> {
        Ok(())
    }

    async fn record_attempt(&self, _: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn record_success(&self, _: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn record_failure(&self, _: &str, _: &ReplayError, _: u64) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Per-entry diagnostic record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshQueueRecord {
    pub id: String,
    pub url: String,
    pub method: String,
    /// Base64-encoded request body.
    pub body: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub created_at: u64,
    pub attempt: u32,
    pub last_failure_at: Option<u64>,
    pub last_failure_message: Option<String>,
    pub failed_at: Option<u64>,
    pub last_error: Option<String>,
}

/// Key-value storage behind `RecordingQueueStore`.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    async fn put(&self, record: RefreshQueueRecord) -> Result<(), StoreError>;
    async fn get(&self, id: &str) -> Result<Option<RefreshQueueRecord>, StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// In-memory adapter (tests / defaults).
#[derive(Debug, Default, Clone)]
pub struct InMemoryStoreAdapter {
    records: Arc<Mutex<HashMap<String, RefreshQueueRecord>>>,
}

impl InMemoryStoreAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StoreAdapter for InMemoryStoreAdapter {
    async fn put(&self, record: RefreshQueueRecord) -> Result<(), StoreError> {
        let mut guard = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        guard.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<RefreshQueueRecord>, StoreError> {
        let guard = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).remove(id);
        Ok(())
    }
}

/// Queue store that maintains one `RefreshQueueRecord` per entry.
///
/// - enqueue writes a fresh record with `attempt = 0`
/// - attempt increments `attempt`
/// - success deletes the record
/// - failure stamps the failure time and message, keeping the record for the next drain
///
/// Attempt and failure events for unknown ids are ignored.
#[derive(Debug, Clone)]
pub struct RecordingQueueStore<A> {
    adapter: A,
}

impl<A: StoreAdapter> RecordingQueueStore<A> {
    pub fn new(adapter: A) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Read back a record (diagnostics only).
    pub async fn record(&self, id: &str) -> Result<Option<RefreshQueueRecord>, StoreError> {
        self.adapter.get(id).await
    }
}

#[async_trait]
impl<A: StoreAdapter> QueueStore for RecordingQueueStore<A> {
    async fn record_enqueue(
        &self,
        id: &str,
        request: &CapturedRequest,
        timestamp: u64,
    ) -> Result<(), StoreError> {
        let record = RefreshQueueRecord {
            id: id.to_string(),
            url: request.url.clone(),
            method: request.method.clone(),
            body: request.body_base64(),
            headers: request.headers().clone(),
            created_at: timestamp,
            attempt: 0,
            last_failure_at: None,
            last_failure_message: None,
            failed_at: None,
            last_error: None,
        };
        self.adapter.put(record).await
    }

    async fn record_attempt(&self, id: &str) -> Result<(), StoreError> {
        let Some(mut record) = self.adapter.get(id).await? else {
            return Ok(());
        };
        record.attempt = record.attempt.saturating_add(1);
        self.adapter.put(record).await
    }

    async fn record_success(&self, id: &str) -> Result<(), StoreError> {
        self.adapter.delete(id).await
    }

    async fn record_failure(
        &self,
        id: &str,
        error: &ReplayError,
        timestamp: u64,
    ) -> Result<(), StoreError> {
        let Some(mut record) = self.adapter.get(id).await? else {
            return Ok(());
        };
        let message = error.to_string();
        record.last_failure_at = Some(timestamp);
        record.last_failure_message = Some(message.clone());
        record.failed_at = Some(timestamp);
        record.last_error = Some(message);
        self.adapter.put(record).await
    }
}
