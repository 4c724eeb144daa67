//! Collective signatures - a threshold of roster members vouching for one message

use borsh::{BorshDeserialize, BorshSerialize};
use quorum_network::Roster;

use crate::error::SignatureError;
use crate::signer::{verify_signature, Signer};
use crate::SERVICE_NAME;

/// Signature of one roster member, identified by its index in the roster
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct SignatureShare {
    pub index: u32,
    pub signature: Vec<u8>,
}

/// Shares of the roster members that signed
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectiveSignature {
    pub shares: Vec<SignatureShare>,
}

impl CollectiveSignature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the share of roster member `index`
    pub fn add_share(&mut self, index: u32, signer: &dyn Signer, message: &[u8]) {
        self.shares.push(SignatureShare {
            index,
            signature: signer.sign(message),
        });
    }

    pub fn signers(&self) -> impl Iterator<Item = u32> + '_ {
        self.shares.iter().map(|s| s.index)
    }
}

/// Checks a collective signature against a roster
pub trait CollectiveVerifier: Send + Sync {
    fn verify(
        &self,
        roster: &Roster,
        message: &[u8],
        signature: &CollectiveSignature,
    ) -> Result<(), SignatureError>;
}

/// Accepts a message once `roster.threshold()` distinct members have signed it.
///
/// Member keys are the per-service keys for `service` when the member
/// advertises one, else the member's own key. Any share that does not
/// verify rejects the whole signature.
#[derive(Debug, Clone)]
pub struct ThresholdVerifier {
    service: Option<String>,
}

impl ThresholdVerifier {
    pub fn new(service: Option<String>) -> Self {
        Self { service }
    }
}

impl Default for ThresholdVerifier {
    fn default() -> Self {
        Self::new(Some(SERVICE_NAME.to_string()))
    }
}

impl CollectiveVerifier for ThresholdVerifier {
    fn verify(
        &self,
        roster: &Roster,
        message: &[u8],
        signature: &CollectiveSignature,
    ) -> Result<(), SignatureError> {
        let mut seen = vec![false; roster.len()];

        for share in &signature.shares {
            let index = share.index as usize;
            let member = roster
                .get(index)
                .ok_or(SignatureError::UnknownSigner(share.index))?;
            if seen[index] {
                return Err(SignatureError::DuplicateShare(share.index));
            }
            seen[index] = true;

            if share.signature.len() != ed25519_dalek::SIGNATURE_LENGTH {
                return Err(SignatureError::Malformed(share.index));
            }
            let key = match &self.service {
                Some(service) => member.service_key(service),
                None => member.public_key(),
            };
            if ed25519_dalek::VerifyingKey::from_bytes(key.as_bytes()).is_err() {
                return Err(SignatureError::InvalidKey(share.index));
            }
            if !verify_signature(key, message, &share.signature) {
                return Err(SignatureError::Mismatch(share.index));
            }
        }

        let valid = signature.shares.len();
        let required = roster.threshold();
        if valid < required {
            return Err(SignatureError::BelowThreshold { valid, required });
        }
        Ok(())
    }
}
