//! Server identities
//!
//! A server is known by its public key and the address it listens on. The
//! identity is created from configuration and never mutated afterwards.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::types::RosterError;

/// An ed25519 public key, rendered as base58
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshSerialize, BorshDeserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub const LEN: usize = 32;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = self.to_string();
        write!(f, "PublicKey({})", &full[..full.len().min(8)])
    }
}

impl FromStr for PublicKey {
    type Err = RosterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| RosterError::InvalidKey(format!("{}: {}", s, e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| RosterError::InvalidKey(format!("{}: expected 32 bytes, got {}", s, v.len())))?;
        Ok(Self(bytes))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A per-service key advertised by a server
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ServiceIdentity {
    /// Service name, e.g. `Ledger`
    pub name: String,
    /// Key the server uses when signing on behalf of this service
    pub public_key: PublicKey,
}

/// A single member of a roster
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ServerIdentity {
    public_key: PublicKey,
    /// Network address, `tcp://host:port` or `tls://host:port`
    address: String,
    /// Explicit websocket URL, overriding the one derived from `address`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    /// Human readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    services: Vec<ServiceIdentity>,
}

impl ServerIdentity {
    pub fn new(public_key: PublicKey, address: impl Into<String>) -> Self {
        Self {
            public_key,
            address: address.into(),
            url: None,
            description: None,
            services: Vec::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_service(mut self, name: impl Into<String>, public_key: PublicKey) -> Self {
        self.services.push(ServiceIdentity {
            name: name.into(),
            public_key,
        });
        self
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn services(&self) -> &[ServiceIdentity] {
        &self.services
    }

    /// Key used to check signatures produced for `service`.
    ///
    /// Falls back to the server key when no service key is advertised.
    pub fn service_key(&self, service: &str) -> &PublicKey {
        self.services
            .iter()
            .find(|s| s.name == service)
            .map(|s| &s.public_key)
            .unwrap_or(&self.public_key)
    }

    /// Websocket endpoint of this server.
    ///
    /// Servers listen for websocket clients on the port right above their
    /// node-to-node port, so `tcp://10.0.0.1:7770` becomes
    /// `ws://10.0.0.1:7771`.
    pub fn websocket_url(&self) -> Result<String, RosterError> {
        if let Some(url) = &self.url {
            return Ok(url.trim_end_matches('/').to_string());
        }

        let invalid = || RosterError::InvalidAddress(self.address.clone());
        let (scheme, rest) = self.address.split_once("://").ok_or_else(invalid)?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;
        let port = port.checked_add(1).ok_or_else(invalid)?;

        let ws_scheme = match scheme {
            "tcp" => "ws",
            "tls" => "wss",
            _ => return Err(invalid()),
        };
        Ok(format!("{}://{}:{}", ws_scheme, host, port))
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(desc) => write!(f, "{} ({})", desc, self.address),
            None => f.write_str(&self.address),
        }
    }
}
