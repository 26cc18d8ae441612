//! Participant identity using Ed25519 keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ed25519 public key identifying a session participant.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Creates a public key from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Creates a public key from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// An Ed25519 signing key together with its public key.
///
/// Used by hosting actors to sign approvals and commits, and by tests and
/// devnet tooling to derive deterministic identities.
pub struct Keypair {
    secret: ed25519_consensus::SigningKey,
    public: PublicKey,
}

impl Keypair {
    /// Creates a keypair from a 32-byte secret.
    pub fn from_secret(secret: [u8; 32]) -> Self {
        let secret = ed25519_consensus::SigningKey::from(secret);
        let public = PublicKey(secret.verification_key().to_bytes());
        Self { secret, public }
    }

    /// Derives a deterministic keypair from a numeric seed.
    ///
    /// The seed is written little-endian into the first eight bytes of the secret.
    pub fn from_seed(seed: u64) -> Self {
        let mut secret = [0u8; 32];
        secret[..8].copy_from_slice(&seed.to_le_bytes());
        Self::from_secret(secret)
    }

    /// Returns the public key.
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Signs an arbitrary payload, returning the 64-byte signature.
    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        self.secret.sign(payload).to_bytes().to_vec()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_from_seed_deterministic() {
        let a = Keypair::from_seed(7);
        let b = Keypair::from_seed(7);
        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), Keypair::from_seed(8).public_key());
    }

    #[test]
    fn test_public_key_hex_roundtrip() {
        let key = Keypair::from_seed(1).public_key();
        assert_eq!(PublicKey::from_hex(&key.to_hex()).unwrap(), key);
    }

    #[test]
    fn test_public_key_serialization() {
        let key = Keypair::from_seed(2).public_key();
        let json = serde_json::to_string(&key).unwrap();
        let parsed: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_signature_length() {
        let sig = Keypair::from_seed(3).sign(b"payload");
        assert_eq!(sig.len(), 64);
    }
}
