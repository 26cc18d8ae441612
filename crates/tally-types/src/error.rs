//! Signature error types.

use thiserror::Error;

/// Errors returned by a [`SignatureVerifier`](crate::SignatureVerifier).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// The public key bytes do not decode to a valid key.
    #[error("malformed public key")]
    MalformedKey,

    /// The signature bytes have the wrong length or encoding.
    #[error("malformed signature: expected {expected} bytes, got {got}")]
    MalformedSignature {
        /// Required length.
        expected: usize,
        /// Received length.
        got: usize,
    },

    /// The signature does not verify against the payload.
    #[error("signature verification failed")]
    Invalid,
}
