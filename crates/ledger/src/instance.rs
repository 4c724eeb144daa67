//! Instances - named, versioned units of ledger state

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::VerificationError;
use crate::proof::{PolicyId, VerifiedState};

/// Fixed-size identifier of an instance; also its key in the state trie
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshSerialize, BorshDeserialize)]
pub struct InstanceId(pub [u8; 32]);

impl InstanceId {
    pub const LEN: usize = 32;

    /// Instance holding the chain configuration
    pub const CONFIG: InstanceId = InstanceId([0u8; 32]);

    /// Number of key bits, i.e. the depth of the state trie
    pub const BITS: usize = Self::LEN * 8;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Bit `i` of the key, most significant bit first
    pub fn bit(&self, i: usize) -> bool {
        (self.0[i / 8] >> (7 - (i % 8))) & 1 == 1
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", &hex::encode(self.0)[..16])
    }
}

impl FromStr for InstanceId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for InstanceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for InstanceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Decoded view of an instance read from a verified proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    pub id: InstanceId,
    pub contract_id: String,
    pub policy_id: PolicyId,
    pub version: u64,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    /// Ledger height the state was read at
    pub height: u64,
}

impl Instance {
    /// Build the view from verified state; fails if the proof claims absence
    pub fn from_verified(state: &VerifiedState) -> Result<Self, VerificationError> {
        let body = state.state.as_ref().ok_or(VerificationError::Absent)?;
        Ok(Self {
            id: state.key,
            contract_id: body.contract_id.clone(),
            policy_id: body.policy_id,
            version: body.version,
            data: body.value.clone(),
            height: state.height,
        })
    }
}

mod hex_bytes {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }
}
