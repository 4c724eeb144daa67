//! Ledger client errors

use quorum_network::{ConnectionError, PublicKey};
use thiserror::Error;

use crate::rpc::Stage;

/// Local validation failures of a client transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Transaction has no instructions")]
    Empty,

    #[error("Instruction {index} has no signers")]
    NoSigners { index: usize },

    #[error("Instruction {index} lists {signers} signers but {counters} counters")]
    CounterMismatch {
        index: usize,
        signers: usize,
        counters: usize,
    },

    #[error("Instruction {index} lists signer {signer} twice")]
    DuplicateSigner { index: usize, signer: PublicKey },

    #[error("Instruction {index} has no counter for signer {signer}")]
    MissingCounter { index: usize, signer: PublicKey },

    #[error("Counter for {signer} at instruction {index} is {found}, expected {expected}")]
    NonSequentialCounter {
        index: usize,
        signer: PublicKey,
        expected: u64,
        found: u64,
    },

    #[error("No signing key supplied for {0}")]
    MissingSigner(PublicKey),

    #[error("Instruction {index} is not fully signed")]
    Unsigned { index: usize },

    #[error("Invalid signature from {signer} on instruction {index}")]
    BadSignature { index: usize, signer: PublicKey },

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,
}

/// Collective signature failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Roster member {0} has an invalid public key")]
    InvalidKey(u32),

    #[error("Share from member {0} is malformed")]
    Malformed(u32),

    #[error("Share from member {0} does not verify")]
    Mismatch(u32),

    #[error("Share from unknown member {0}")]
    UnknownSigner(u32),

    #[error("Member {0} signed twice")]
    DuplicateShare(u32),

    #[error("Only {valid} valid shares, {required} required")]
    BelowThreshold { valid: usize, required: usize },
}

/// Reasons a proof is not trusted. Every variant is an authenticity failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Malformed proof path: {0}")]
    MalformedPath(String),

    #[error("Proof is for key {found}, requested {requested}")]
    KeyMismatch { requested: String, found: String },

    #[error("Recomputed root {computed} does not match signed root {signed}")]
    RootMismatch { computed: String, signed: String },

    #[error("Header is for chain {found}, expected {expected}")]
    WrongChain { expected: String, found: String },

    #[error("Header is signed by another roster")]
    RosterMismatch,

    #[error("Header signature rejected: {0}")]
    Signature(#[from] SignatureError),

    #[error("State change body does not decode: {0}")]
    MalformedBody(String),

    #[error("Proof claims the instance is absent")]
    Absent,

    #[error("Proof height {found} is older than {required}")]
    StaleState { required: u64, found: u64 },
}

/// Failures of the submit-and-verify orchestration, each terminal and distinct
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] TransactionError),

    #[error("Ledger rejected the transaction: {0}")]
    Rejected(String),

    /// Submission may or may not have reached the ledger; the caller decides
    /// whether resubmitting is safe
    #[error("Submission outcome unknown: {0}")]
    Indeterminate(#[source] ConnectionError),

    /// The transaction may still be included later
    #[error("Transaction not observed after {waited_ms}ms")]
    InclusionTimeout { waited_ms: u64 },

    #[error("Authenticity failure: {0}")]
    Authenticity(#[from] VerificationError),

    #[error("Roster unreachable: {0}")]
    Unreachable(#[source] ConnectionError),

    #[error("Cancelled during {stage:?}")]
    Cancelled { stage: Stage },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl RpcError {
    /// Map a connection failure, keeping submission ambiguity distinct
    pub fn from_connection(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Indeterminate { .. } => RpcError::Indeterminate(err),
            other => RpcError::Unreachable(other),
        }
    }

    /// Map a failed non-idempotent submission. Anything that may have reached
    /// a server is indeterminate, whichever connection reported it.
    pub fn from_submission(err: ConnectionError) -> Self {
        if err.may_have_been_delivered() {
            RpcError::Indeterminate(err)
        } else {
            RpcError::Unreachable(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_network::TransportError;

    fn no_reply() -> ConnectionError {
        ConnectionError::NoReply {
            server: "node-0".to_string(),
            source: TransportError::Eof,
        }
    }

    fn refused() -> ConnectionError {
        ConnectionError::Unreachable {
            server: "node-0".to_string(),
            source: TransportError::Refused("node-0".to_string()),
        }
    }

    #[test]
    fn test_submission_errors_keep_ambiguity() {
        assert!(matches!(RpcError::from_submission(no_reply()), RpcError::Indeterminate(_)));
        assert!(matches!(RpcError::from_submission(refused()), RpcError::Unreachable(_)));

        let exhausted = ConnectionError::Exhausted {
            attempts: 2,
            last: Box::new(no_reply()),
        };
        assert!(matches!(RpcError::from_submission(exhausted), RpcError::Indeterminate(_)));
    }

    #[test]
    fn test_reads_are_never_ambiguous() {
        assert!(matches!(RpcError::from_connection(no_reply()), RpcError::Unreachable(_)));
        assert!(matches!(RpcError::from_connection(refused()), RpcError::Unreachable(_)));
    }
}
