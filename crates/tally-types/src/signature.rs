//! Signature verification contract.
//!
//! The session core never performs cryptography itself: it calls a
//! [`SignatureVerifier`] and only consumes its pass/fail answer.

use crate::error::SignatureError;
use crate::hash::Hash256;
use crate::identity::PublicKey;
use crate::{SignedKind, NAMESPACE};

/// Pure predicates checking approve and commit signatures.
pub trait SignatureVerifier: Send + Sync {
    /// Checks a signature approving the candidate with the given hashes.
    fn check_approve_signature(
        &self,
        root_hash: &Hash256,
        file_hash: &Hash256,
        signer: &PublicKey,
        signature: &[u8],
    ) -> Result<(), SignatureError>;

    /// Checks a commit signature on the block with the given hashes.
    fn check_commit_signature(
        &self,
        root_hash: &Hash256,
        file_hash: &Hash256,
        signer: &PublicKey,
        signature: &[u8],
    ) -> Result<(), SignatureError>;
}

fn payload(kind: SignedKind, root_hash: &Hash256, file_hash: &Hash256) -> Vec<u8> {
    let tag = kind.tag();
    let mut data = Vec::with_capacity(NAMESPACE.len() + tag.len() + 64);
    data.extend_from_slice(NAMESPACE);
    data.extend_from_slice(tag);
    data.extend_from_slice(root_hash.as_bytes());
    data.extend_from_slice(file_hash.as_bytes());
    data
}

/// Returns the payload signed by an approval.
pub fn approve_payload(root_hash: &Hash256, file_hash: &Hash256) -> Vec<u8> {
    payload(SignedKind::Approve, root_hash, file_hash)
}

/// Returns the payload signed by a commit.
pub fn commit_payload(root_hash: &Hash256, file_hash: &Hash256) -> Vec<u8> {
    payload(SignedKind::Commit, root_hash, file_hash)
}

/// Ed25519 verifier over the domain-separated approve/commit payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    /// Creates a new verifier.
    pub fn new() -> Self {
        Self
    }

    fn verify(
        &self,
        signer: &PublicKey,
        signature: &[u8],
        payload: &[u8],
    ) -> Result<(), SignatureError> {
        let key = ed25519_consensus::VerificationKey::try_from(*signer.as_bytes())
            .map_err(|_| SignatureError::MalformedKey)?;
        let bytes: [u8; 64] =
            signature
                .try_into()
                .map_err(|_| SignatureError::MalformedSignature {
                    expected: 64,
                    got: signature.len(),
                })?;
        let signature = ed25519_consensus::Signature::from(bytes);
        key.verify(&signature, payload)
            .map_err(|_| SignatureError::Invalid)
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn check_approve_signature(
        &self,
        root_hash: &Hash256,
        file_hash: &Hash256,
        signer: &PublicKey,
        signature: &[u8],
    ) -> Result<(), SignatureError> {
        self.verify(signer, signature, &approve_payload(root_hash, file_hash))
    }

    fn check_commit_signature(
        &self,
        root_hash: &Hash256,
        file_hash: &Hash256,
        signer: &PublicKey,
        signature: &[u8],
    ) -> Result<(), SignatureError> {
        self.verify(signer, signature, &commit_payload(root_hash, file_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    #[test]
    fn test_approve_signature_verifies() {
        let key = Keypair::from_seed(11);
        let root = Hash256::compute(b"root");
        let file = Hash256::compute(b"file");
        let sig = key.sign(&approve_payload(&root, &file));

        let verifier = Ed25519Verifier::new();
        assert!(verifier
            .check_approve_signature(&root, &file, &key.public_key(), &sig)
            .is_ok());
    }

    #[test]
    fn test_commit_signature_not_valid_as_approve() {
        let key = Keypair::from_seed(12);
        let root = Hash256::compute(b"root");
        let file = Hash256::compute(b"file");
        let sig = key.sign(&commit_payload(&root, &file));

        let verifier = Ed25519Verifier::new();
        assert_eq!(
            verifier.check_approve_signature(&root, &file, &key.public_key(), &sig),
            Err(SignatureError::Invalid)
        );
        assert!(verifier
            .check_commit_signature(&root, &file, &key.public_key(), &sig)
            .is_ok());
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let key = Keypair::from_seed(13);
        let other = Keypair::from_seed(14);
        let root = Hash256::compute(b"root");
        let file = Hash256::compute(b"file");
        let sig = key.sign(&commit_payload(&root, &file));

        let verifier = Ed25519Verifier::new();
        assert!(verifier
            .check_commit_signature(&root, &file, &other.public_key(), &sig)
            .is_err());
    }

    #[test]
    fn test_malformed_signature() {
        let key = Keypair::from_seed(15);
        let verifier = Ed25519Verifier::new();
        let result =
            verifier.check_commit_signature(&Hash256::ZERO, &Hash256::ZERO, &key.public_key(), &[1, 2]);
        assert_eq!(
            result,
            Err(SignatureError::MalformedSignature {
                expected: 64,
                got: 2
            })
        );
    }
}
