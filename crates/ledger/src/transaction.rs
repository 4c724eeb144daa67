//! Client transactions - atomic, ordered batches of signed instructions

use borsh::{BorshDeserialize, BorshSerialize};
use quorum_network::PublicKey;
use std::collections::HashMap;

use crate::error::TransactionError;
use crate::instruction::{BatchCounters, Instruction};
use crate::proof::Hash;
use crate::signer::{verify_signature, Signer};

const TRANSACTION_DOMAIN: &str = "quorum.transaction.v1";

/// Ordered instructions applied by the ledger all together or not at all
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct ClientTransaction {
    instructions: Vec<Instruction>,
}

impl ClientTransaction {
    /// Wrap already-signed instructions; nothing is checked until `validate`
    pub fn from_instructions(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn batch_counters(&self) -> BatchCounters {
        self.instructions.iter().map(Instruction::counter_pairs).collect()
    }

    /// Transaction identifier: the instructions with their counters, without signatures
    pub fn hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(TRANSACTION_DOMAIN.as_bytes());
        hasher.update(&(self.instructions.len() as u64).to_le_bytes());
        for instruction in &self.instructions {
            hasher.update(&instruction.hash());
        }
        *hasher.finalize().as_bytes()
    }

    /// Highest counter used by each signer in this transaction
    pub fn signer_counters(&self) -> HashMap<PublicKey, u64> {
        let mut latest = HashMap::new();
        for instruction in &self.instructions {
            for (signer, counter) in instruction.counter_pairs() {
                let entry = latest.entry(signer).or_insert(counter);
                *entry = (*entry).max(counter);
            }
        }
        latest
    }

    /// Local checks a transaction must pass before it is submitted
    pub fn validate(&self) -> Result<(), TransactionError> {
        self.validate_structure()?;
        self.validate_counters()?;
        self.verify_signatures()
    }

    fn validate_structure(&self) -> Result<(), TransactionError> {
        if self.instructions.is_empty() {
            return Err(TransactionError::Empty);
        }

        for (index, instruction) in self.instructions.iter().enumerate() {
            let signers = instruction.signer_ids();
            if signers.is_empty() {
                return Err(TransactionError::NoSigners { index });
            }
            if signers.len() != instruction.signer_counters().len() {
                return Err(TransactionError::CounterMismatch {
                    index,
                    signers: signers.len(),
                    counters: instruction.signer_counters().len(),
                });
            }
            for (i, signer) in signers.iter().enumerate() {
                if signers[..i].contains(signer) {
                    return Err(TransactionError::DuplicateSigner {
                        index,
                        signer: *signer,
                    });
                }
            }
        }
        Ok(())
    }

    /// Each signer's counter must go up by exactly one from one of its
    /// instructions to the next
    fn validate_counters(&self) -> Result<(), TransactionError> {
        let mut previous: HashMap<PublicKey, u64> = HashMap::new();

        for (index, instruction) in self.instructions.iter().enumerate() {
            for (signer, counter) in instruction.counter_pairs() {
                if let Some(last) = previous.get(&signer) {
                    let expected = last.checked_add(1).ok_or(TransactionError::ArithmeticOverflow)?;
                    if counter != expected {
                        return Err(TransactionError::NonSequentialCounter {
                            index,
                            signer,
                            expected,
                            found: counter,
                        });
                    }
                }
                previous.insert(signer, counter);
            }
        }
        Ok(())
    }

    /// Every instruction must carry a valid signature from each of its signers
    pub fn verify_signatures(&self) -> Result<(), TransactionError> {
        let batch = self.batch_counters();

        for (index, instruction) in self.instructions.iter().enumerate() {
            if !instruction.is_signed() {
                return Err(TransactionError::Unsigned { index });
            }
            let digest = instruction.signing_digest(&batch);
            for (signer, signature) in instruction.signer_ids().iter().zip(instruction.signatures()) {
                if !verify_signature(signer, &digest, signature) {
                    return Err(TransactionError::BadSignature {
                        index,
                        signer: *signer,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Assembles instructions, then fills counters and signs once the batch is complete
#[derive(Default, Clone, Debug)]
pub struct TransactionBuilder {
    instructions: Vec<Instruction>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    pub fn push(&mut self, instruction: Instruction) -> &mut Self {
        self.instructions.push(instruction);
        self
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Distinct signers in order of first appearance
    pub fn signers(&self) -> Vec<PublicKey> {
        let mut signers = Vec::new();
        for signer in self.instructions.iter().flat_map(|i| i.signer_ids()) {
            if !signers.contains(signer) {
                signers.push(*signer);
            }
        }
        signers
    }

    /// Assign counters from the latest value the ledger holds for each
    /// signer: the first instruction of a signer gets `latest + 1`, the next
    /// `latest + 2`, and so on.
    pub fn fill_counters(&mut self, latest: &HashMap<PublicKey, u64>) -> Result<(), TransactionError> {
        let mut next: HashMap<PublicKey, u64> = HashMap::new();

        for (index, instruction) in self.instructions.iter_mut().enumerate() {
            let mut counters = Vec::with_capacity(instruction.signer_ids().len());
            for signer in instruction.signer_ids() {
                let counter = match next.get(signer) {
                    Some(counter) => *counter,
                    None => *latest.get(signer).ok_or(TransactionError::MissingCounter {
                        index,
                        signer: *signer,
                    })?,
                }
                .checked_add(1)
                .ok_or(TransactionError::ArithmeticOverflow)?;
                next.insert(*signer, counter);
                counters.push(counter);
            }
            instruction.set_counters(counters);
        }
        Ok(())
    }

    /// Sign every instruction with the matching signer and return the
    /// finished, validated transaction
    pub fn sign(mut self, signers: &[&dyn Signer]) -> Result<ClientTransaction, TransactionError> {
        let batch: BatchCounters = self.instructions.iter().map(Instruction::counter_pairs).collect();

        for instruction in &mut self.instructions {
            let digest = instruction.signing_digest(&batch);
            let mut signatures = Vec::with_capacity(instruction.signer_ids().len());
            for id in instruction.signer_ids() {
                let signer = signers
                    .iter()
                    .find(|s| s.public_key() == *id)
                    .ok_or(TransactionError::MissingSigner(*id))?;
                signatures.push(signer.sign(&digest));
            }
            instruction.set_signatures(signatures);
        }

        let tx = ClientTransaction::from_instructions(self.instructions);
        tx.validate()?;
        Ok(tx)
    }

    /// Fill counters from `latest`, then sign
    pub fn fill_and_sign(
        mut self,
        latest: &HashMap<PublicKey, u64>,
        signers: &[&dyn Signer],
    ) -> Result<ClientTransaction, TransactionError> {
        self.fill_counters(latest)?;
        self.sign(signers)
    }
}
