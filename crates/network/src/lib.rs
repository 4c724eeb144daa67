//! Quorum Network - talking to a roster of untrusted servers
//!
//! Architecture:
//! - A roster is an immutable, ordered list of server identities plus the
//!   collective key derived from their public keys
//! - Transports carry opaque frames to one server (websocket or in-process)
//! - A node connection does one typed request/response with a deadline
//! - A roster connection fails over across members and remembers the leader
//! - A leader connection pins one member and falls back to the roster

pub mod types;
pub mod identity;
pub mod roster;
pub mod transport;
pub mod connection;
pub mod failover;
pub mod leader;
pub mod memory;
pub mod websocket;

pub use types::*;
pub use identity::{PublicKey, ServerIdentity, ServiceIdentity};
pub use roster::{CollectiveKey, Roster, RosterConfig};
pub use transport::{Dialer, Transport, TransportError};
pub use connection::{Connection, NodeConnection, Request};
pub use failover::RosterConnection;
pub use leader::LeaderConnection;
pub use memory::{MemoryDialer, MemoryHandler, NodeFault};
pub use websocket::{WebSocketDialer, WebSocketTransport};
