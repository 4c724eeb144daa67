//! Instructions - one state mutation targeting one instance

use borsh::{BorshDeserialize, BorshSerialize};
use quorum_network::PublicKey;
use std::fmt;

use crate::instance::InstanceId;
use crate::proof::Hash;

const INSTRUCTION_DOMAIN: &str = "quorum.instruction.v1";
const SIGNING_DOMAIN: &str = "quorum.instruction.signing.v1";
const DERIVE_DOMAIN: &str = "quorum.instance-id.v1";

/// Signer/counter pairs of every instruction of a transaction, in order
pub type BatchCounters = Vec<Vec<(PublicKey, u64)>>;

/// Named opaque argument passed to a contract
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct Argument {
    pub name: String,
    pub value: Vec<u8>,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// What an instruction does to its target instance
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Create a new instance of `contract_id`; the target is the instance
    /// whose contract authorises the spawn
    Spawn {
        contract_id: String,
        args: Vec<Argument>,
    },

    /// Run `command` on the target instance
    Invoke {
        contract_id: String,
        command: String,
        args: Vec<Argument>,
    },

    /// Remove the target instance
    Delete { contract_id: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Spawn,
    Invoke,
    Delete,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Spawn => write!(f, "spawn"),
            ActionKind::Invoke => write!(f, "invoke"),
            ActionKind::Delete => write!(f, "delete"),
        }
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Spawn { .. } => ActionKind::Spawn,
            Action::Invoke { .. } => ActionKind::Invoke,
            Action::Delete { .. } => ActionKind::Delete,
        }
    }

    pub fn contract_id(&self) -> &str {
        match self {
            Action::Spawn { contract_id, .. }
            | Action::Invoke { contract_id, .. }
            | Action::Delete { contract_id } => contract_id,
        }
    }

    pub fn args(&self) -> &[Argument] {
        match self {
            Action::Spawn { args, .. } | Action::Invoke { args, .. } => args,
            Action::Delete { .. } => &[],
        }
    }

    fn hash_into(&self, hasher: &mut blake3::Hasher) {
        let tag: u8 = match self.kind() {
            ActionKind::Spawn => 0,
            ActionKind::Invoke => 1,
            ActionKind::Delete => 2,
        };
        hasher.update(&[tag]);
        hash_bytes(hasher, self.contract_id().as_bytes());
        if let Action::Invoke { command, .. } = self {
            hash_bytes(hasher, command.as_bytes());
        }
        hasher.update(&(self.args().len() as u64).to_le_bytes());
        for arg in self.args() {
            hash_bytes(hasher, arg.name.as_bytes());
            hash_bytes(hasher, &arg.value);
        }
    }
}

/// One step of a client transaction.
///
/// Target, action and arguments are fixed at construction. Signers and their
/// counters are attached next, and signatures last, once the whole
/// transaction is assembled.
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    instance_id: InstanceId,
    action: Action,
    signer_ids: Vec<PublicKey>,
    signer_counters: Vec<u64>,
    signatures: Vec<Vec<u8>>,
}

impl Instruction {
    pub fn new(instance_id: InstanceId, action: Action) -> Self {
        Self {
            instance_id,
            action,
            signer_ids: Vec::new(),
            signer_counters: Vec::new(),
            signatures: Vec::new(),
        }
    }

    pub fn spawn(instance_id: InstanceId, contract_id: impl Into<String>, args: Vec<Argument>) -> Self {
        Self::new(
            instance_id,
            Action::Spawn {
                contract_id: contract_id.into(),
                args,
            },
        )
    }

    pub fn invoke(
        instance_id: InstanceId,
        contract_id: impl Into<String>,
        command: impl Into<String>,
        args: Vec<Argument>,
    ) -> Self {
        Self::new(
            instance_id,
            Action::Invoke {
                contract_id: contract_id.into(),
                command: command.into(),
                args,
            },
        )
    }

    pub fn delete(instance_id: InstanceId, contract_id: impl Into<String>) -> Self {
        Self::new(
            instance_id,
            Action::Delete {
                contract_id: contract_id.into(),
            },
        )
    }

    /// Require a signature from `signer`; its counter is filled in later
    pub fn with_signer(mut self, signer: PublicKey) -> Self {
        self.signer_ids.push(signer);
        self.signatures.clear();
        self
    }

    /// Require a signature from `signer` at a known counter
    pub fn with_signer_counter(mut self, signer: PublicKey, counter: u64) -> Self {
        self.signer_ids.push(signer);
        self.signer_counters.push(counter);
        self.signatures.clear();
        self
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }

    /// Look up an argument by name
    pub fn argument(&self, name: &str) -> Option<&[u8]> {
        self.action
            .args()
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_slice())
    }

    pub fn signer_ids(&self) -> &[PublicKey] {
        &self.signer_ids
    }

    pub fn signer_counters(&self) -> &[u64] {
        &self.signer_counters
    }

    pub fn signatures(&self) -> &[Vec<u8>] {
        &self.signatures
    }

    /// Signer/counter pairs of this instruction
    pub fn counter_pairs(&self) -> Vec<(PublicKey, u64)> {
        self.signer_ids
            .iter()
            .copied()
            .zip(self.signer_counters.iter().copied())
            .collect()
    }

    /// Whether every required signer has attached a signature
    pub fn is_signed(&self) -> bool {
        !self.signer_ids.is_empty()
            && self.signatures.len() == self.signer_ids.len()
            && self.signatures.iter().all(|s| !s.is_empty())
    }

    pub(crate) fn set_counters(&mut self, counters: Vec<u64>) {
        self.signer_counters = counters;
        self.signatures.clear();
    }

    pub(crate) fn set_signatures(&mut self, signatures: Vec<Vec<u8>>) {
        self.signatures = signatures;
    }

    /// Hash of target, action and arguments
    pub fn content_hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(INSTRUCTION_DOMAIN.as_bytes());
        hasher.update(self.instance_id.as_bytes());
        self.action.hash_into(&mut hasher);
        *hasher.finalize().as_bytes()
    }

    /// Hash of the content plus this instruction's signers and counters
    pub fn hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.content_hash());
        hash_pairs(&mut hasher, &self.counter_pairs());
        *hasher.finalize().as_bytes()
    }

    /// Digest every signer of this instruction signs.
    ///
    /// Covers the instruction content and the signer/counter pairs of all
    /// instructions of the transaction in order, so a signature is only valid
    /// for this exact batch in this exact order.
    pub fn signing_digest(&self, batch: &[Vec<(PublicKey, u64)>]) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(SIGNING_DOMAIN.as_bytes());
        hasher.update(&self.content_hash());
        hasher.update(&(batch.len() as u64).to_le_bytes());
        for pairs in batch {
            hash_pairs(&mut hasher, pairs);
        }
        *hasher.finalize().as_bytes()
    }

    /// ID of an instance created by this instruction.
    ///
    /// Depends on the signer counters, so spawning the same content twice
    /// yields two different instances.
    pub fn derive_id(&self, tag: &str) -> InstanceId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DERIVE_DOMAIN.as_bytes());
        hasher.update(&self.hash());
        hash_bytes(&mut hasher, tag.as_bytes());
        InstanceId(*hasher.finalize().as_bytes())
    }
}

fn hash_bytes(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn hash_pairs(hasher: &mut blake3::Hasher, pairs: &[(PublicKey, u64)]) {
    hasher.update(&(pairs.len() as u64).to_le_bytes());
    for (signer, counter) in pairs {
        hasher.update(signer.as_bytes());
        hasher.update(&counter.to_le_bytes());
    }
}
