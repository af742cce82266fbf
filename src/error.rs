//! Error types for the refresh queue.
//!
//! Replay failures (`ReplayError`) are the only errors that drive retry decisions. Storage
//! failures from the retry queue abort a drain; failures from the queue store and the telemetry
//! sink are logged and never change the outcome of a drain.
use std::io;
use thiserror::Error;

/// A single failed replay of a captured request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    /// The network call itself rejected (connectivity failure, DNS, reset, ...).
    #[error("{0}")]
    Network(String),
    /// The server answered with a 5xx status.
    #[error("Server error: {status}")]
    Server { status: u16 },
}

impl ReplayError {
    /// Build a network failure from any displayable cause.
    pub fn network(cause: impl std::fmt::Display) -> Self {
        ReplayError::Network(cause.to_string())
    }

    /// Check if this failure came from a server status rather than the transport.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ReplayError::Server { .. })
    }

    /// The 5xx status, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ReplayError::Server { status } => Some(*status),
            ReplayError::Network(_) => None,
        }
    }
}

/// Errors raised by retry queue storage.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue storage i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("queue storage is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by a queue store adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("queue store adapter failed: {0}")]
    Adapter(String),
}

/// Outcome of a drain that did not complete.
#[derive(Debug, Error)]
pub enum DrainError {
    /// An entry failed every attempt; it was restored to the head of the queue.
    ///
    /// `id` is `None` for entries queued without a refresh queue id.
    #[error(
        "replay of entry {} failed after {attempts} attempts: {source}",
        .id.as_deref().unwrap_or("-")
    )]
    Replay {
        id: Option<String>,
        attempts: usize,
        #[source]
        source: ReplayError,
    },
    /// The retry queue itself could not be read or written.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl DrainError {
    /// The replay failure that ended the drain, if the drain ended on a replay.
    pub fn replay_error(&self) -> Option<&ReplayError> {
        match self {
            DrainError::Replay { source, .. } => Some(source),
            DrainError::Queue(_) => None,
        }
    }

    /// Check if the drain ended because an entry exhausted its attempts.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, DrainError::Replay { .. })
    }
}

/// Errors surfaced while handling a host lifecycle event.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A failed request could not be queued.
    #[error("failed to queue request: {0}")]
    Enqueue(#[source] QueueError),
    #[error(transparent)]
    Drain(#[from] DrainError),
}

/// Errors produced while building a controller or route table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// `max_attempts` must be > 0.
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    /// Queue names are used as telemetry labels and must be non-empty.
    #[error("queue name must not be empty")]
    EmptyQueueName,
}

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] BuildError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn server_error_display_matches_wire_message() {
        let err = ReplayError::Server { status: 503 };
        assert_eq!(err.to_string(), "Server error: 503");
        assert!(err.is_server_error());
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn network_error_displays_cause_verbatim() {
        let err = ReplayError::network("network failed");
        assert_eq!(err.to_string(), "network failed");
        assert!(!err.is_server_error());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn drain_error_exposes_replay_source() {
        let err = DrainError::Replay {
            id: Some("entry-1".into()),
            attempts: 3,
            source: ReplayError::Server { status: 500 },
        };
        assert!(err.is_exhausted());
        assert_eq!(err.replay_error(), Some(&ReplayError::Server { status: 500 }));
        assert_eq!(err.source().map(|s| s.to_string()), Some("Server error: 500".to_string()));
        assert!(err.to_string().contains("entry-1"));
    }

    #[test]
    fn drain_error_without_id_uses_placeholder() {
        let err = DrainError::Replay {
            id: None,
            attempts: 3,
            source: ReplayError::network("offline"),
        };
        assert_eq!(err.to_string(), "replay of entry - failed after 3 attempts: offline");
    }

    #[test]
    fn queue_errors_are_not_replay_failures() {
        let err = DrainError::from(QueueError::Io(io::Error::new(io::ErrorKind::Other, "disk")));
        assert!(!err.is_exhausted());
        assert!(err.replay_error().is_none());
        assert!(err.to_string().contains("disk"));
    }

    #[test]
    fn build_error_display() {
        assert_eq!(BuildError::InvalidMaxAttempts(0).to_string(), "max_attempts must be > 0 (got 0)");
    }
}
