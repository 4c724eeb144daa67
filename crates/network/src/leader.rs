//! Leader connection - sends to one preferred member, falls back to the roster

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::connection::{Connection, Request};
use crate::failover::RosterConnection;
use crate::identity::ServerIdentity;
use crate::types::ConnectionError;

/// Sends every call to the tracked leader first.
///
/// When the leader fails, the call is handed to the wrapped
/// [`RosterConnection`] (skipping the member that just failed), and whichever
/// member answers there becomes the new leader.
pub struct LeaderConnection {
    roster_conn: Arc<RosterConnection>,
    leader: AtomicUsize,
}

impl LeaderConnection {
    /// Track the roster connection's current leader
    pub fn new(roster_conn: Arc<RosterConnection>) -> Self {
        let leader = AtomicUsize::new(roster_conn.leader_index());
        Self {
            roster_conn,
            leader,
        }
    }

    /// Start from an explicit roster member
    pub fn with_leader(roster_conn: Arc<RosterConnection>, index: usize) -> Self {
        let index = if index < roster_conn.roster().len() { index } else { 0 };
        Self {
            roster_conn,
            leader: AtomicUsize::new(index),
        }
    }

    pub fn leader_index(&self) -> usize {
        self.leader.load(Ordering::Acquire)
    }

    pub fn leader(&self) -> &ServerIdentity {
        &self.roster_conn.roster().list()[self.leader_index()]
    }

    pub fn roster_connection(&self) -> &Arc<RosterConnection> {
        &self.roster_conn
    }
}

#[async_trait]
impl Connection for LeaderConnection {
    async fn send<R: Request>(&self, request: &R) -> Result<R::Response, ConnectionError> {
        let index = self.leader_index();
        let Some(node) = self.roster_conn.node(index) else {
            return self.roster_conn.send(request).await;
        };

        let err = match node.send(request).await {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };

        if !R::IDEMPOTENT && err.may_have_been_delivered() {
            return Err(ConnectionError::Indeterminate {
                server: node.server().to_string(),
                source: Box::new(err),
            });
        }

        // The failed leader used one attempt of the budget
        let n = self.roster_conn.roster().len();
        let remaining = self.roster_conn.config().attempts_for(n).saturating_sub(1);
        if remaining == 0 {
            return Err(ConnectionError::Exhausted {
                attempts: 1,
                last: Box::new(err),
            });
        }

        tracing::warn!("Leader {} failed ({}), falling back to roster", node.server(), err);
        let skip = (n > 1).then_some(index);
        let response = match self.roster_conn.dispatch(request, skip, remaining).await {
            Ok(response) => response,
            Err(ConnectionError::Exhausted { attempts, last }) => {
                return Err(ConnectionError::Exhausted {
                    attempts: attempts + 1,
                    last,
                })
            }
            Err(err) => return Err(err),
        };

        let new_leader = self.roster_conn.leader_index();
        self.leader.store(new_leader, Ordering::Release);
        tracing::info!("Leader is now {}", self.leader());
        Ok(response)
    }
}
