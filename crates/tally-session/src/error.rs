//! Session error types.

use thiserror::Error;

/// Errors that can escape a session operation.
///
/// Rejected protocol messages are not errors: they are logged and leave the
/// state unchanged. These variants cover broken invariants and configuration.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A scratch handle was resolved after the scratch region was cleared.
    #[error("stale {kind} handle used after the scratch region was cleared")]
    StaleHandle {
        /// Object kind.
        kind: &'static str,
    },

    /// A handle does not resolve in its region.
    #[error("dangling {kind} handle at index {index}")]
    DanglingHandle {
        /// Object kind.
        kind: &'static str,
        /// Pool index.
        index: u32,
    },

    /// An invariant that holds under an honest quorum was violated.
    #[error("internal inconsistency: {0}")]
    Inconsistent(String),

    /// Invalid session options.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Invalid genesis configuration.
    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),

    /// Not enough participants.
    #[error("not enough participants: have {have}, need {need}")]
    NotEnoughParticipants {
        /// Current participant count.
        have: usize,
        /// Required participant count.
        need: usize,
    },

    /// Reading or writing a configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization failed.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A specialized Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
