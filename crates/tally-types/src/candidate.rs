//! Block candidate identity.

use crate::hash::Hash256;
use crate::NAMESPACE;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity of a block candidate within a round.
///
/// Derived from the producing source index and the candidate's three hashes.
/// The all-zero value is reserved for the "skip this round" candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateId([u8; 32]);

impl CandidateId {
    /// The all-zero id.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Returns the all-zero id.
    pub const fn zero() -> Self {
        Self::ZERO
    }

    /// Returns the id of the skip candidate. Always equal to [`CandidateId::zero`].
    pub const fn skip() -> Self {
        Self::ZERO
    }

    /// Returns true for the skip candidate.
    pub fn is_skip(&self) -> bool {
        *self == Self::ZERO
    }

    /// Derives the id of a candidate produced by `src`.
    pub fn derive(
        src: u32,
        root_hash: &Hash256,
        file_hash: &Hash256,
        collated_data_hash: &Hash256,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(NAMESPACE);
        hasher.update(b"candidate");
        hasher.update(src.to_le_bytes());
        hasher.update(root_hash.as_bytes());
        hasher.update(file_hash.as_bytes());
        hasher.update(collated_data_hash.as_bytes());
        let mut id = [0u8; 32];
        id.copy_from_slice(&hasher.finalize());
        Self(id)
    }

    /// Creates an id from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Creates an id from a hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Default for CandidateId {
    fn default() -> Self {
        Self::skip()
    }
}

impl std::fmt::Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_skip() {
            write!(f, "skip")
        } else {
            write!(f, "{}", &self.to_hex()[..16])
        }
    }
}
