//! Session options.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};

/// Tunables shared by every participant of a session.
///
/// All participants must run with identical options, otherwise their merged
/// states diverge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Number of sources allowed to submit a candidate in each round.
    pub round_candidates: u32,

    /// Length of one attempt, in seconds.
    pub attempt_duration_secs: u32,

    /// Attempts a source spends in a round before switching to slow mode.
    /// Zero disables slow mode.
    pub max_round_attempts: u32,

    /// The intern cache holds `2^intern_cache_bits` slots.
    pub intern_cache_bits: u32,

    /// Minimum number of participants.
    pub min_participants: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            round_candidates: 3,
            attempt_duration_secs: 16,
            max_round_attempts: 4,
            intern_cache_bits: 16,
            min_participants: 1,
        }
    }
}

impl SessionOptions {
    /// Smallest accepted cache size, in bits.
    pub const MIN_CACHE_BITS: u32 = 4;

    /// Largest accepted cache size, in bits.
    pub const MAX_CACHE_BITS: u32 = 24;

    /// Validates the options.
    pub fn validate(&self) -> Result<()> {
        if self.round_candidates == 0 {
            return Err(SessionError::InvalidOptions(
                "round_candidates must be positive".into(),
            ));
        }
        if self.attempt_duration_secs == 0 {
            return Err(SessionError::InvalidOptions(
                "attempt_duration_secs must be positive".into(),
            ));
        }
        if !(Self::MIN_CACHE_BITS..=Self::MAX_CACHE_BITS).contains(&self.intern_cache_bits) {
            return Err(SessionError::InvalidOptions(format!(
                "intern_cache_bits must be within [{}, {}], got {}",
                Self::MIN_CACHE_BITS,
                Self::MAX_CACHE_BITS,
                self.intern_cache_bits
            )));
        }
        Ok(())
    }
}
