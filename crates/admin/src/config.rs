//! Admin Configuration

use anyhow::{Context, Result};
use quorum_ledger::{Hash, RpcConfig};
use quorum_network::{ConnectionConfig, Roster};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything needed to reach one ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Hex-encoded chain ID
    pub chain_id: String,
    pub roster: Roster,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
}

impl AdminConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn chain_id(&self) -> Result<Hash> {
        let mut chain_id = [0u8; 32];
        hex::decode_to_slice(&self.chain_id, &mut chain_id).context("chain_id must be 32 hex-encoded bytes")?;
        Ok(chain_id)
    }
}
