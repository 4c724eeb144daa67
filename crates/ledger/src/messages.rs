//! Wire messages of the ledger service

use borsh::{BorshDeserialize, BorshSerialize};
use quorum_network::{PublicKey, Request};

use crate::instance::InstanceId;
use crate::proof::{Hash, Proof};
use crate::transaction::ClientTransaction;

/// Submit a transaction
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug)]
pub struct AddTxRequest {
    pub version: u16,
    pub chain_id: Hash,
    pub transaction: ClientTransaction,
    /// Blocks the node may wait for inclusion before answering; 0 answers on acceptance
    pub inclusion_wait: u32,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub enum TxStatus {
    /// Accepted for consensus; may still be dropped
    Accepted,
    /// Included in the block at `height`
    Included { height: u64 },
    Rejected { reason: String },
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug)]
pub struct AddTxResponse {
    pub version: u16,
    pub status: TxStatus,
}

impl Request for AddTxRequest {
    type Response = AddTxResponse;
    const PATH: &'static str = "Ledger/AddTx";
    const IDEMPOTENT: bool = false;

    fn check_response(&self, response: &AddTxResponse) -> Result<(), String> {
        check_version(self.version, response.version)
    }
}

/// Fetch the proof of a key at a height, or at the latest block
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug)]
pub struct GetProofRequest {
    pub version: u16,
    pub chain_id: Hash,
    pub key: InstanceId,
    pub height: Option<u64>,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug)]
pub struct GetProofResponse {
    pub version: u16,
    pub proof: Proof,
}

impl Request for GetProofRequest {
    type Response = GetProofResponse;
    const PATH: &'static str = "Ledger/GetProof";

    fn check_response(&self, response: &GetProofResponse) -> Result<(), String> {
        check_version(self.version, response.version)?;
        if response.proof.key != self.key {
            return Err(format!("proof for {} answers request for {}", response.proof.key, self.key));
        }
        Ok(())
    }
}

/// Fetch the latest counter of each signer
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug)]
pub struct GetSignerCountersRequest {
    pub version: u16,
    pub chain_id: Hash,
    pub signer_ids: Vec<PublicKey>,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug)]
pub struct GetSignerCountersResponse {
    pub version: u16,
    /// Same order as the request; 0 for signers that never signed
    pub counters: Vec<u64>,
    /// Height the counters were read at
    pub height: u64,
}

impl Request for GetSignerCountersRequest {
    type Response = GetSignerCountersResponse;
    const PATH: &'static str = "Ledger/GetSignerCounters";

    fn check_response(&self, response: &GetSignerCountersResponse) -> Result<(), String> {
        check_version(self.version, response.version)?;
        if response.counters.len() != self.signer_ids.len() {
            return Err(format!(
                "{} counters for {} signers",
                response.counters.len(),
                self.signer_ids.len()
            ));
        }
        Ok(())
    }
}

fn check_version(expected: u16, found: u16) -> Result<(), String> {
    if expected != found {
        return Err(format!("protocol version {} does not match {}", found, expected));
    }
    Ok(())
}
