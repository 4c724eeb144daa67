//! Resilient roster connection - failover across the members of a roster
//!
//! A call starts at the member that answered last (the leader) and walks the
//! roster in list order, wrapping around, until a member answers or the
//! attempt budget is spent. Requests that may already have reached a member
//! are only re-sent when they are idempotent.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::connection::{Connection, NodeConnection, Request};
use crate::identity::ServerIdentity;
use crate::roster::Roster;
use crate::transport::Dialer;
use crate::types::{ConnectionConfig, ConnectionError, ConnectionStats};

/// Connection to a whole roster with leader affinity and failover
pub struct RosterConnection {
    roster: Arc<Roster>,
    nodes: Vec<NodeConnection>,
    config: ConnectionConfig,
    /// Index of the member that answered last
    leader: AtomicUsize,
    stats: RwLock<ConnectionStats>,
}

impl RosterConnection {
    /// Create a connection whose initial leader is the first roster member
    pub fn new(roster: Arc<Roster>, dialer: Arc<dyn Dialer>, config: ConnectionConfig) -> Self {
        let nodes = roster
            .list()
            .iter()
            .map(|server| NodeConnection::new(server.clone(), dialer.clone(), config.timeout()))
            .collect();

        Self {
            roster,
            nodes,
            config,
            leader: AtomicUsize::new(0),
            stats: RwLock::new(ConnectionStats::default()),
        }
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn leader_index(&self) -> usize {
        self.leader.load(Ordering::Acquire)
    }

    pub fn leader(&self) -> &ServerIdentity {
        self.nodes[self.leader_index()].server()
    }

    /// Prefer `index` for the next call. Out-of-range indices are ignored.
    pub fn set_leader(&self, index: usize) -> bool {
        if index >= self.nodes.len() {
            return false;
        }
        self.leader.store(index, Ordering::Release);
        true
    }

    pub fn node(&self, index: usize) -> Option<&NodeConnection> {
        self.nodes.get(index)
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats.read().clone()
    }

    /// Run the failover loop with at most `budget` contacts, optionally
    /// skipping one member that the caller already tried.
    pub(crate) async fn dispatch<R: Request>(
        &self,
        request: &R,
        skip: Option<usize>,
        budget: usize,
    ) -> Result<R::Response, ConnectionError> {
        let n = self.nodes.len();
        let start = self.leader_index();
        let order: Vec<usize> = (0..n)
            .map(|offset| (start + offset) % n)
            .filter(|index| Some(*index) != skip)
            .take(budget)
            .collect();

        self.stats.write().calls += 1;
        let mut last_error = None;

        for (attempt, &index) in order.iter().enumerate() {
            if attempt > 0 && !self.config.retry_delay().is_zero() {
                tokio::time::sleep(self.config.retry_delay()).await;
            }

            let node = &self.nodes[index];
            self.stats.write().attempts += 1;
            tracing::debug!(
                "{} attempt {}/{} via {}",
                R::PATH,
                attempt + 1,
                order.len(),
                node.server()
            );

            match node.send(request).await {
                Ok(response) => {
                    let previous = self.leader.swap(index, Ordering::AcqRel);
                    if previous != index {
                        self.stats.write().leader_changes += 1;
                        tracing::info!("Leader moved from member {} to {} ({})", previous, index, node.server());
                    }
                    return Ok(response);
                }
                Err(err) if !R::IDEMPOTENT && err.may_have_been_delivered() => {
                    tracing::warn!("{} to {} has unknown delivery status: {}", R::PATH, node.server(), err);
                    return Err(ConnectionError::Indeterminate {
                        server: node.server().to_string(),
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    tracing::warn!("{} failed on {}: {}", R::PATH, node.server(), err);
                    self.stats.write().failovers += 1;
                    last_error = Some(err);
                }
            }
        }

        self.stats.write().exhausted += 1;
        let attempts = order.len();
        match last_error {
            Some(last) => Err(ConnectionError::Exhausted {
                attempts,
                last: Box::new(last),
            }),
            // Nothing was left to try
            None => Err(ConnectionError::Exhausted {
                attempts,
                last: Box::new(ConnectionError::Unreachable {
                    server: self.leader().to_string(),
                    source: crate::transport::TransportError::Other("no member left to try".to_string()),
                }),
            }),
        }
    }
}

#[async_trait]
impl Connection for RosterConnection {
    async fn send<R: Request>(&self, request: &R) -> Result<R::Response, ConnectionError> {
        self.dispatch(request, None, self.config.attempts_for(self.nodes.len())).await
    }
}
