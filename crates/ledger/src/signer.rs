//! Signer abstraction over the signature primitive

use ed25519_dalek::{Signature, SigningKey, Verifier as _, VerifyingKey};
use quorum_network::PublicKey;

/// Something holding a private key that can sign digests.
///
/// Key generation and storage live with the caller.
pub trait Signer: Send + Sync {
    fn public_key(&self) -> PublicKey;

    fn sign(&self, message: &[u8]) -> Vec<u8>;
}

impl Signer for SigningKey {
    fn public_key(&self) -> PublicKey {
        PublicKey(self.verifying_key().to_bytes())
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        ed25519_dalek::Signer::sign(self, message).to_bytes().to_vec()
    }
}

/// Check an ed25519 signature; malformed keys or signatures never verify
pub fn verify_signature(key: &PublicKey, message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(key.as_bytes()) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}
