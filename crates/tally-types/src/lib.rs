//! Common types used throughout `tally`.
//!
//! This crate provides the value types shared between the validator-session
//! core and the actor hosting it: fixed-size hashes, candidate identities,
//! participant keys, and the signature-verification contract.

mod candidate;
mod error;
mod hash;
mod identity;
mod signature;

pub use candidate::CandidateId;
pub use error::SignatureError;
pub use hash::Hash256;
pub use identity::{Keypair, PublicKey};
pub use signature::{
    approve_payload, commit_payload, Ed25519Verifier, SignatureVerifier,
};

/// Domain prefix mixed into every hash and signed payload produced by tally.
pub const NAMESPACE: &[u8] = b"tally:";

/// Message types that carry a signature, used for payload domain separation.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedKind {
    /// Approval of a block candidate.
    Approve = 0,
    /// Commit signature on a precommitted block.
    Commit = 1,
}

impl SignedKind {
    /// Converts a u8 to a `SignedKind`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Approve),
            1 => Some(Self::Commit),
            _ => None,
        }
    }

    /// Returns the domain tag used in signed payloads.
    pub fn tag(&self) -> &'static [u8] {
        match self {
            Self::Approve => b"approve",
            Self::Commit => b"commit",
        }
    }
}
