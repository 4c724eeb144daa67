//! Client and chain configuration

use borsh::{BorshDeserialize, BorshSerialize};
use quorum_network::Roster;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::VerificationError;
use crate::proof::VerifiedState;
use crate::{CONFIG_CONTRACT, PROTOCOL_VERSION};

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Delay between inclusion polls, in milliseconds
    pub poll_interval_ms: u64,
    /// Budget for observing inclusion after submission, in milliseconds
    pub max_wait_ms: u64,
    /// Blocks a node may wait for inclusion before answering a submission
    pub inclusion_wait_blocks: u32,
    pub protocol_version: u16,
}

impl RpcConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_wait_ms: 30_000,
            inclusion_wait_blocks: 0,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

/// Chain parameters, stored in the config instance
#[derive(BorshSerialize, BorshDeserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub block_interval_ms: u64,
    pub max_block_size: u32,
    pub roster: Roster,
}

impl ChainConfig {
    /// Decode the chain config from the verified state of the config instance
    pub fn from_state(state: &VerifiedState) -> Result<Self, VerificationError> {
        let body = state.state.as_ref().ok_or(VerificationError::Absent)?;
        if body.contract_id != CONFIG_CONTRACT {
            return Err(VerificationError::MalformedBody(format!(
                "config instance holds a {} contract",
                body.contract_id
            )));
        }
        ChainConfig::try_from_slice(&body.value).map_err(|e| VerificationError::MalformedBody(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceId;
    use crate::proof::StateChangeBody;
    use quorum_network::{PublicKey, ServerIdentity};

    fn state(contract_id: &str, value: Vec<u8>) -> VerifiedState {
        VerifiedState {
            key: InstanceId::CONFIG,
            height: 1,
            timestamp: 0,
            state: Some(StateChangeBody {
                contract_id: contract_id.into(),
                policy_id: [0; 32],
                version: 0,
                value,
            }),
        }
    }

    #[test]
    fn test_chain_config_from_state() {
        let roster = Roster::new(vec![ServerIdentity::new(PublicKey([1; 32]), "tcp://a:1")]).unwrap();
        let config = ChainConfig {
            block_interval_ms: 5_000,
            max_block_size: 4_000_000,
            roster,
        };
        let encoded = borsh::to_vec(&config).unwrap();

        assert_eq!(ChainConfig::from_state(&state(CONFIG_CONTRACT, encoded.clone())).unwrap(), config);
        assert!(matches!(
            ChainConfig::from_state(&state("value", encoded)),
            Err(VerificationError::MalformedBody(_))
        ));
        assert!(matches!(
            ChainConfig::from_state(&state(CONFIG_CONTRACT, vec![1])),
            Err(VerificationError::MalformedBody(_))
        ));
    }

    #[test]
    fn test_partial_rpc_config() {
        let config: RpcConfig = serde_json::from_str(r#"{"poll_interval_ms": 20}"#).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(20));
        assert_eq!(config.max_wait(), Duration::from_secs(30));
        assert_eq!(config.protocol_version, PROTOCOL_VERSION);
    }
}
