//! Typed request/response exchange with one server

use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use std::sync::Arc;
use std::time::Duration;

use crate::identity::ServerIdentity;
use crate::transport::{Dialer, TransportError};
use crate::types::ConnectionError;

/// A wire request with a typed response
pub trait Request: BorshSerialize + Send + Sync {
    type Response: BorshDeserialize + Send;

    /// Service endpoint, `Service/Method`
    const PATH: &'static str;

    /// Whether sending the request twice is harmless. Non-idempotent requests
    /// are never re-sent once they may have reached a server.
    const IDEMPOTENT: bool = true;

    /// Reject a decoded response that does not answer this request
    fn check_response(&self, _response: &Self::Response) -> Result<(), String> {
        Ok(())
    }
}

/// Something that can carry a request to the roster and bring back the answer
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send<R: Request>(&self, request: &R) -> Result<R::Response, ConnectionError>;
}

/// Connection to exactly one server, with a per-call deadline
#[derive(Clone)]
pub struct NodeConnection {
    server: ServerIdentity,
    dialer: Arc<dyn Dialer>,
    timeout: Duration,
}

impl NodeConnection {
    pub fn new(server: ServerIdentity, dialer: Arc<dyn Dialer>, timeout: Duration) -> Self {
        Self {
            server,
            dialer,
            timeout,
        }
    }

    pub fn server(&self) -> &ServerIdentity {
        &self.server
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Dial, send one frame and wait for one frame back.
    ///
    /// `sent` is set as soon as the frame is handed to the transport, so the
    /// caller can tell "never left" from "left, no answer".
    async fn round_trip(
        &self,
        path: &str,
        frame: Vec<u8>,
        sent: &mut bool,
    ) -> Result<Vec<u8>, TransportError> {
        let mut transport = self.dialer.dial(&self.server, path).await?;
        *sent = true;
        transport.send(frame).await?;
        let reply = transport.recv().await;
        transport.close().await;
        reply
    }
}

#[async_trait]
impl Connection for NodeConnection {
    async fn send<R: Request>(&self, request: &R) -> Result<R::Response, ConnectionError> {
        let frame = borsh::to_vec(request).map_err(|e| ConnectionError::Encode(e.to_string()))?;
        let server = self.server.to_string();

        let mut sent = false;
        let outcome = tokio::time::timeout(self.timeout, self.round_trip(R::PATH, frame, &mut sent)).await;
        let reply = match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(source)) => return Err(transport_failure(server, source, sent)),
            Err(_) => return Err(transport_failure(server, TransportError::Timeout, sent)),
        };

        let response = R::Response::try_from_slice(&reply).map_err(|e| ConnectionError::Protocol {
            server: server.clone(),
            reason: format!("malformed {} response: {}", R::PATH, e),
        })?;
        request
            .check_response(&response)
            .map_err(|reason| ConnectionError::Protocol { server, reason })?;

        Ok(response)
    }
}

fn transport_failure(server: String, source: TransportError, sent: bool) -> ConnectionError {
    if sent {
        ConnectionError::NoReply { server, source }
    } else {
        ConnectionError::Unreachable { server, source }
    }
}
