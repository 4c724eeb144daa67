//! Proofs - authenticated presence or absence of an instance in the state trie
//!
//! The ledger state is a sparse binary trie keyed by instance ID bits, most
//! significant bit first. A key's leaf sits at the shallowest depth where no
//! other key shares its prefix. A proof carries the leaf found along the
//! requested key's path and the sibling hash at every depth above it, plus a
//! block header that commits to the root and is signed by the roster.
//!
//! Node hashes:
//! - empty subtree: `H(0x00)`
//! - leaf: `H(0x01 || key || H(value))`
//! - interior: `H(0x02 || left || right)`

use borsh::{BorshDeserialize, BorshSerialize};
use quorum_network::{CollectiveKey, Roster};
use std::sync::Arc;

use crate::collective::{CollectiveSignature, CollectiveVerifier, ThresholdVerifier};
use crate::error::VerificationError;
use crate::instance::InstanceId;

pub type Hash = [u8; 32];

/// Identifier of the access policy owning an instance
pub type PolicyId = [u8; 32];

const EMPTY_TAG: u8 = 0x00;
const LEAF_TAG: u8 = 0x01;
const INTERIOR_TAG: u8 = 0x02;
const HEADER_DOMAIN: &str = "quorum.block-header.v1";

pub fn empty_hash() -> Hash {
    *blake3::hash(&[EMPTY_TAG]).as_bytes()
}

pub fn value_hash(value: &[u8]) -> Hash {
    *blake3::hash(value).as_bytes()
}

pub fn leaf_hash(key: &InstanceId, value_hash: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[LEAF_TAG]);
    hasher.update(key.as_bytes());
    hasher.update(value_hash);
    *hasher.finalize().as_bytes()
}

pub fn interior_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[INTERIOR_TAG]);
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

/// State of one instance after the transactions of a block
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct StateChangeBody {
    pub contract_id: String,
    pub policy_id: PolicyId,
    /// Strictly increasing per instance
    pub version: u64,
    pub value: Vec<u8>,
}

/// What the proof found at the end of the requested key's path
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub enum ProofLeaf {
    /// The requested key, with its encoded `StateChangeBody`
    Present { key: InstanceId, value: Vec<u8> },
    /// Another key occupies the slot, so the requested key is absent
    Neighbor { key: InstanceId, value_hash: Hash },
    /// The slot is empty, so the requested key is absent
    Empty,
}

/// Block header the roster signs; commits to the state root
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub chain_id: Hash,
    pub height: u64,
    pub state_root: Hash,
    /// Collective key of the roster that produced the block
    pub roster_key: CollectiveKey,
    /// Milliseconds since the unix epoch
    pub timestamp: u64,
}

impl BlockHeader {
    /// Exact message the roster signs
    pub fn signing_message(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(HEADER_DOMAIN.as_bytes());
        hasher.update(&self.chain_id);
        hasher.update(&self.height.to_le_bytes());
        hasher.update(&self.state_root);
        hasher.update(&self.roster_key.0);
        hasher.update(&self.timestamp.to_le_bytes());
        *hasher.finalize().as_bytes()
    }
}

/// Inclusion or exclusion proof for one key
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct Proof {
    /// Requested key
    pub key: InstanceId,
    pub leaf: ProofLeaf,
    /// Sibling hash at each depth, root first
    pub siblings: Vec<Hash>,
    pub header: BlockHeader,
    pub signature: CollectiveSignature,
}

impl Proof {
    /// Whether the proof claims the requested key is present
    pub fn claims_presence(&self) -> bool {
        matches!(&self.leaf, ProofLeaf::Present { key, .. } if *key == self.key)
    }

    /// Check the path is well-formed and fold it up to the root
    pub fn compute_root(&self) -> Result<Hash, VerificationError> {
        let depth = self.siblings.len();
        if depth > InstanceId::BITS {
            return Err(VerificationError::MalformedPath(format!(
                "{} siblings for a {}-bit key",
                depth,
                InstanceId::BITS
            )));
        }

        let mut hash = match &self.leaf {
            ProofLeaf::Present { key, value } => {
                if *key != self.key {
                    return Err(VerificationError::KeyMismatch {
                        requested: self.key.to_string(),
                        found: key.to_string(),
                    });
                }
                leaf_hash(key, &value_hash(value))
            }
            ProofLeaf::Neighbor { key, value_hash } => {
                if *key == self.key {
                    return Err(VerificationError::MalformedPath(
                        "neighbor leaf carries the requested key".to_string(),
                    ));
                }
                if (0..depth).any(|i| key.bit(i) != self.key.bit(i)) {
                    return Err(VerificationError::MalformedPath(
                        "neighbor leaf is not on the requested path".to_string(),
                    ));
                }
                leaf_hash(key, value_hash)
            }
            ProofLeaf::Empty => empty_hash(),
        };

        for (i, sibling) in self.siblings.iter().enumerate().rev() {
            hash = if self.key.bit(i) {
                interior_hash(sibling, &hash)
            } else {
                interior_hash(&hash, sibling)
            };
        }
        Ok(hash)
    }

    /// Decode the state change body of a present leaf. Does not check authenticity.
    pub fn state_change_body(&self) -> Result<Option<StateChangeBody>, VerificationError> {
        match &self.leaf {
            ProofLeaf::Present { value, .. } if self.claims_presence() => StateChangeBody::try_from_slice(value)
                .map(Some)
                .map_err(|e| VerificationError::MalformedBody(e.to_string())),
            _ => Ok(None),
        }
    }
}

/// State of a key the roster vouched for
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedState {
    pub key: InstanceId,
    pub height: u64,
    pub timestamp: u64,
    /// `None` when the proof certifies absence
    pub state: Option<StateChangeBody>,
}

impl VerifiedState {
    pub fn is_present(&self) -> bool {
        self.state.is_some()
    }

    pub fn version(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.version)
    }
}

/// Verifies proofs against one roster and one chain
#[derive(Clone)]
pub struct ProofVerifier {
    roster: Arc<Roster>,
    chain_id: Hash,
    collective: Arc<dyn CollectiveVerifier>,
}

impl ProofVerifier {
    pub fn new(roster: Arc<Roster>, chain_id: Hash) -> Self {
        Self {
            roster,
            chain_id,
            collective: Arc::new(ThresholdVerifier::default()),
        }
    }

    pub fn with_collective_verifier(mut self, collective: Arc<dyn CollectiveVerifier>) -> Self {
        self.collective = collective;
        self
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    pub fn chain_id(&self) -> &Hash {
        &self.chain_id
    }

    /// Accept `proof` as the state of `key`, or reject it outright
    pub fn verify(&self, key: &InstanceId, proof: &Proof) -> Result<VerifiedState, VerificationError> {
        let result = self.check(key, proof);
        if let Err(e) = &result {
            tracing::error!("Rejected proof for {} at height {}: {}", key, proof.header.height, e);
        }
        result
    }

    fn check(&self, key: &InstanceId, proof: &Proof) -> Result<VerifiedState, VerificationError> {
        if proof.key != *key {
            return Err(VerificationError::KeyMismatch {
                requested: key.to_string(),
                found: proof.key.to_string(),
            });
        }

        let computed = proof.compute_root()?;
        if computed != proof.header.state_root {
            return Err(VerificationError::RootMismatch {
                computed: hex::encode(computed),
                signed: hex::encode(proof.header.state_root),
            });
        }

        if proof.header.chain_id != self.chain_id {
            return Err(VerificationError::WrongChain {
                expected: hex::encode(self.chain_id),
                found: hex::encode(proof.header.chain_id),
            });
        }
        if proof.header.roster_key != *self.roster.collective_key() {
            return Err(VerificationError::RosterMismatch);
        }

        self.collective
            .verify(&self.roster, &proof.header.signing_message(), &proof.signature)?;

        let state = proof.state_change_body()?;
        tracing::debug!(
            "Verified {} proof for {} at height {}",
            if state.is_some() { "inclusion" } else { "exclusion" },
            key,
            proof.header.height
        );

        Ok(VerifiedState {
            key: *key,
            height: proof.header.height,
            timestamp: proof.header.timestamp,
            state,
        })
    }
}
