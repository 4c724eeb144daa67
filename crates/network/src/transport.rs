//! Transport adapter - one bidirectional message channel to one server
//!
//! Connections never touch sockets directly. A [`Dialer`] opens a channel to a
//! server for a given service path, and the [`Transport`] it returns carries
//! opaque frames in both directions.

use async_trait::async_trait;
use thiserror::Error;

use crate::identity::ServerIdentity;

/// Transport-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("timed out")]
    Timeout,

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("unexpected end of stream")]
    Eof,

    #[error("cancelled")]
    Cancelled,

    #[error("transport failure: {0}")]
    Other(String),
}

/// A message channel to a single server
#[async_trait]
pub trait Transport: Send {
    /// Send one frame
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Wait for the next frame
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Close the channel; errors on close are not interesting to callers
    async fn close(&mut self) {}
}

/// Opens transports to servers
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a channel to `server` for the service endpoint `path`
    /// (e.g. `Ledger/GetProof`)
    async fn dial(
        &self,
        server: &ServerIdentity,
        path: &str,
    ) -> Result<Box<dyn Transport>, TransportError>;
}
