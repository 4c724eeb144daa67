//! Quorum Ledger - transactions and verified reads against a BFT ledger
//!
//! This crate provides:
//! - Instructions and client transactions with counter-bound signatures
//! - Inclusion/exclusion proofs checked against the roster's collective signature
//! - Wire messages of the ledger service
//! - The RPC orchestrator that submits, waits for inclusion and verifies

pub mod collective;
pub mod config;
pub mod error;
pub mod instance;
pub mod instruction;
pub mod messages;
pub mod proof;
pub mod rpc;
pub mod signer;
pub mod transaction;

#[cfg(test)]
mod tests;

pub use collective::{CollectiveSignature, CollectiveVerifier, SignatureShare, ThresholdVerifier};
pub use config::{ChainConfig, RpcConfig};
pub use error::{RpcError, SignatureError, TransactionError, VerificationError};
pub use instance::{Instance, InstanceId};
pub use instruction::{Action, ActionKind, Argument, Instruction};
pub use messages::TxStatus;
pub use proof::{BlockHeader, Hash, PolicyId, Proof, ProofLeaf, ProofVerifier, StateChangeBody, VerifiedState};
pub use rpc::{LedgerRpc, Stage, TransactionOutcome};
pub use signer::Signer;
pub use transaction::{ClientTransaction, TransactionBuilder};

/// Name of the ledger service; members may advertise a per-service key under it
pub const SERVICE_NAME: &str = "Ledger";

/// Wire protocol version spoken by this client
pub const PROTOCOL_VERSION: u16 = 1;

/// Contract of the config instance
pub const CONFIG_CONTRACT: &str = "config";
