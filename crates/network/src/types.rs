//! Core types for roster connections: configuration, errors and stats

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::identity::PublicKey;
use crate::roster::CollectiveKey;
use crate::transport::TransportError;

/// Errors building a roster from configuration
#[derive(Debug, Error)]
pub enum RosterError {
    #[error("roster has no members")]
    Empty,

    #[error("roster lists {0} more than once")]
    DuplicateMember(PublicKey),

    #[error("declared collective key {declared} does not match derived key {derived}")]
    CollectiveKeyMismatch {
        declared: CollectiveKey,
        derived: CollectiveKey,
    },

    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid roster description: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from a request/response exchange with one or more servers
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Nothing reached the server; retrying elsewhere is always safe
    #[error("{server} unreachable: {source}")]
    Unreachable {
        server: String,
        #[source]
        source: TransportError,
    },

    /// The request went out but no reply came back
    #[error("no reply from {server}: {source}")]
    NoReply {
        server: String,
        #[source]
        source: TransportError,
    },

    /// The server replied with something that is not a valid response
    #[error("protocol error from {server}: {reason}")]
    Protocol { server: String, reason: String },

    /// A non-idempotent request may or may not have been delivered
    #[error("delivery to {server} is indeterminate")]
    Indeterminate {
        server: String,
        #[source]
        source: Box<ConnectionError>,
    },

    #[error("all {attempts} attempted roster members failed")]
    Exhausted {
        attempts: usize,
        #[source]
        last: Box<ConnectionError>,
    },

    #[error("failed to encode request: {0}")]
    Encode(String),
}

impl ConnectionError {
    /// Whether the server may have received and acted on the request
    pub fn may_have_been_delivered(&self) -> bool {
        match self {
            ConnectionError::Unreachable { .. } | ConnectionError::Encode(_) => false,
            ConnectionError::NoReply { .. }
            | ConnectionError::Protocol { .. }
            | ConnectionError::Indeterminate { .. } => true,
            ConnectionError::Exhausted { last, .. } => last.may_have_been_delivered(),
        }
    }

    /// Whether the error came from waiting too long on a server
    pub fn is_timeout(&self) -> bool {
        match self {
            ConnectionError::Unreachable { source, .. } | ConnectionError::NoReply { source, .. } => {
                *source == TransportError::Timeout
            }
            ConnectionError::Exhausted { last, .. } => last.is_timeout(),
            _ => false,
        }
    }
}

/// Failover behaviour of a roster connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Deadline for a single server contact (dial + send + reply), in milliseconds
    pub timeout_ms: u64,
    /// Maximum servers tried per call; capped at the roster size
    pub max_attempts: Option<usize>,
    /// Pause before moving on to the next server, in milliseconds
    pub retry_delay_ms: u64,
}

impl ConnectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Attempts allowed for a roster of `roster_len` members
    pub fn attempts_for(&self, roster_len: usize) -> usize {
        match self.max_attempts {
            Some(max) => max.clamp(1, roster_len.max(1)),
            None => roster_len.max(1),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_attempts: None,
            retry_delay_ms: 0,
        }
    }
}

/// Stats about a roster connection
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStats {
    pub calls: u64,
    pub attempts: u64,
    pub failovers: u64,
    pub leader_changes: u64,
    pub exhausted: u64,
}
