//! In-process transport
//!
//! Routes frames to handler closures registered per server address. Used to
//! embed a simulated cluster in the same process, and lets each server be
//! made unreachable, silent or flaky at will.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::identity::ServerIdentity;
use crate::transport::{Dialer, Transport, TransportError};

/// Handles one request frame for a service path and produces the reply frame
pub type MemoryHandler =
    Arc<dyn Fn(&str, Vec<u8>) -> Result<Vec<u8>, TransportError> + Send + Sync>;

/// Simulated failure mode of a registered server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeFault {
    /// Answers normally
    #[default]
    Healthy,
    /// Refuses connections
    Unreachable,
    /// Accepts requests and never answers
    Silent,
    /// Accepts requests, then drops the connection without answering
    DropAfterSend,
}

struct MemoryNode {
    handler: MemoryHandler,
    fault: NodeFault,
    dials: usize,
    /// Paths of the requests that reached the handler
    delivered: Vec<String>,
}

/// Dialer over an in-process registry of servers, keyed by address
#[derive(Clone, Default)]
pub struct MemoryDialer {
    nodes: Arc<DashMap<String, MemoryNode>>,
}

impl MemoryDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler serving `address`
    pub fn register(&self, address: impl Into<String>, handler: MemoryHandler) {
        self.nodes.insert(
            address.into(),
            MemoryNode {
                handler,
                fault: NodeFault::Healthy,
                dials: 0,
                delivered: Vec::new(),
            },
        );
    }

    pub fn set_fault(&self, address: &str, fault: NodeFault) {
        if let Some(mut node) = self.nodes.get_mut(address) {
            node.fault = fault;
        }
    }

    /// Number of times `address` was dialed
    pub fn dial_count(&self, address: &str) -> usize {
        self.nodes.get(address).map(|n| n.dials).unwrap_or(0)
    }

    /// Paths of every request that reached the handler at `address`
    pub fn delivered(&self, address: &str) -> Vec<String> {
        self.nodes
            .get(address)
            .map(|n| n.delivered.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(
        &self,
        server: &ServerIdentity,
        path: &str,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let (handler, fault) = {
            let mut node = self
                .nodes
                .get_mut(server.address())
                .ok_or_else(|| TransportError::Refused(server.address().to_string()))?;
            node.dials += 1;
            (node.handler.clone(), node.fault)
        };

        if fault == NodeFault::Unreachable {
            return Err(TransportError::Refused(server.address().to_string()));
        }

        Ok(Box::new(MemoryTransport {
            nodes: self.nodes.clone(),
            address: server.address().to_string(),
            path: path.to_string(),
            handler,
            fault,
            pending: None,
        }))
    }
}

struct MemoryTransport {
    nodes: Arc<DashMap<String, MemoryNode>>,
    address: String,
    path: String,
    handler: MemoryHandler,
    fault: NodeFault,
    pending: Option<Vec<u8>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.pending.is_some() {
            return Err(TransportError::Other("one request per channel".to_string()));
        }
        self.pending = Some(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let frame = self
            .pending
            .take()
            .ok_or_else(|| TransportError::Other("nothing was sent".to_string()))?;

        if let Some(mut node) = self.nodes.get_mut(&self.address) {
            node.delivered.push(self.path.clone());
        }

        match self.fault {
            NodeFault::Silent => std::future::pending().await,
            NodeFault::DropAfterSend => Err(TransportError::Eof),
            _ => (self.handler)(&self.path, frame),
        }
    }
}
