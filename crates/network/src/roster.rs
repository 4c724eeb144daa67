//! Rosters - ordered consensus groups and their collective key

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::identity::{PublicKey, ServerIdentity};
use crate::types::RosterError;

/// Domain separator for the collective key derivation
const COLLECTIVE_KEY_DOMAIN: &[u8] = b"quorum.roster.collective-key.v1";

/// Aggregate key of a roster.
///
/// Commits to every member key in roster order, so two rosters with the same
/// members in a different order have different collective keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, BorshSerialize, BorshDeserialize)]
pub struct CollectiveKey(pub [u8; 32]);

impl CollectiveKey {
    /// Derive the collective key from an ordered member list
    pub fn derive(list: &[ServerIdentity]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(COLLECTIVE_KEY_DOMAIN);
        hasher.update(&(list.len() as u32).to_le_bytes());
        for server in list {
            hasher.update(server.public_key().as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for CollectiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for CollectiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectiveKey({})", &self.to_string()[..16])
    }
}

impl FromStr for CollectiveKey {
    type Err = RosterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)
            .map_err(|e| RosterError::InvalidKey(format!("collective key {}: {}", s, e)))?;
        Ok(Self(out))
    }
}

impl Serialize for CollectiveKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CollectiveKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// On-disk / on-wire description of a roster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterConfig {
    /// Members in priority order
    pub servers: Vec<ServerIdentity>,
    /// Collective key declared by whoever published the roster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collective_key: Option<CollectiveKey>,
}

/// An immutable, ordered consensus group.
///
/// Order defines failover priority: the first member is the initial leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RosterConfig", into = "RosterConfig")]
pub struct Roster {
    list: Vec<ServerIdentity>,
    collective_key: CollectiveKey,
}

impl Roster {
    /// Create a roster, deriving its collective key
    pub fn new(list: Vec<ServerIdentity>) -> Result<Self, RosterError> {
        if list.is_empty() {
            return Err(RosterError::Empty);
        }

        let mut seen = HashSet::with_capacity(list.len());
        for server in &list {
            if !seen.insert(*server.public_key()) {
                return Err(RosterError::DuplicateMember(*server.public_key()));
            }
        }

        let collective_key = CollectiveKey::derive(&list);
        Ok(Self {
            list,
            collective_key,
        })
    }

    /// Create a roster and check it against a declared collective key
    pub fn with_declared_key(
        list: Vec<ServerIdentity>,
        declared: CollectiveKey,
    ) -> Result<Self, RosterError> {
        let roster = Self::new(list)?;
        if roster.collective_key != declared {
            return Err(RosterError::CollectiveKeyMismatch {
                declared,
                derived: roster.collective_key,
            });
        }
        Ok(roster)
    }

    /// Parse a roster from its JSON description
    pub fn from_json(json: &str) -> Result<Self, RosterError> {
        let config: RosterConfig = serde_json::from_str(json)?;
        Self::try_from(config)
    }

    pub fn list(&self) -> &[ServerIdentity] {
        &self.list
    }

    pub fn get(&self, index: usize) -> Option<&ServerIdentity> {
        self.list.get(index)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn collective_key(&self) -> &CollectiveKey {
        &self.collective_key
    }

    /// Position of the member with the given key
    pub fn index_of(&self, key: &PublicKey) -> Option<usize> {
        self.list.iter().position(|s| s.public_key() == key)
    }

    /// Number of members that may be faulty: `f` in `n = 3f + 1`
    pub fn max_faulty(&self) -> usize {
        (self.list.len() - 1) / 3
    }

    /// Number of member signatures a collective signature needs
    pub fn threshold(&self) -> usize {
        self.list.len() - self.max_faulty()
    }
}

impl TryFrom<RosterConfig> for Roster {
    type Error = RosterError;

    fn try_from(config: RosterConfig) -> Result<Self, Self::Error> {
        match config.collective_key {
            Some(declared) => Self::with_declared_key(config.servers, declared),
            None => Self::new(config.servers),
        }
    }
}

impl From<Roster> for RosterConfig {
    fn from(roster: Roster) -> Self {
        Self {
            collective_key: Some(roster.collective_key),
            servers: roster.list,
        }
    }
}

// Only the member list goes on the wire; the collective key is re-derived.
impl BorshSerialize for Roster {
    fn serialize<W: borsh::io::Write>(&self, writer: &mut W) -> borsh::io::Result<()> {
        BorshSerialize::serialize(&self.list, writer)
    }
}

impl BorshDeserialize for Roster {
    fn deserialize_reader<R: borsh::io::Read>(reader: &mut R) -> borsh::io::Result<Self> {
        let list = Vec::<ServerIdentity>::deserialize_reader(reader)?;
        Self::new(list).map_err(|e| borsh::io::Error::new(borsh::io::ErrorKind::InvalidData, e.to_string()))
    }
}
