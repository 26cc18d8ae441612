//! Participant set management.
//!
//! Participants are the weighted nodes of a session. Their order is fixed for
//! the lifetime of the session: every per-source vector in the state is
//! indexed by position in this set.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tally_types::PublicKey;

/// A participant in the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    /// Participant's public key (identity).
    pub public_key: PublicKey,

    /// Human-readable name.
    pub name: String,

    /// Voting weight.
    pub weight: u64,
}

impl Participant {
    /// Creates a new participant.
    pub fn new(public_key: PublicKey, name: impl Into<String>, weight: u64) -> Self {
        Self {
            public_key,
            name: name.into(),
            weight,
        }
    }
}

/// The ordered, weighted participant set of a session.
#[derive(Debug, Clone)]
pub struct ParticipantSet {
    participants: Vec<Participant>,
    total_weight: u64,
    cutoff_weight: u64,

    /// Index for fast lookup by public key.
    index: HashMap<PublicKey, u32>,
}

impl ParticipantSet {
    /// Creates a participant set.
    pub fn new(participants: Vec<Participant>, min_participants: usize) -> Result<Self> {
        if participants.len() < min_participants.max(1) {
            return Err(SessionError::NotEnoughParticipants {
                have: participants.len(),
                need: min_participants.max(1),
            });
        }
        if u32::try_from(participants.len()).is_err() {
            return Err(SessionError::InvalidGenesis(
                "participant count exceeds u32".into(),
            ));
        }

        let mut index = HashMap::with_capacity(participants.len());
        for (i, p) in participants.iter().enumerate() {
            if p.weight == 0 {
                return Err(SessionError::InvalidGenesis(format!(
                    "participant {} has zero weight",
                    p.name
                )));
            }
            if index.insert(p.public_key, i as u32).is_some() {
                return Err(SessionError::InvalidGenesis(format!(
                    "duplicate participant key: {}",
                    p.public_key
                )));
            }
        }

        let total_weight = participants
            .iter()
            .try_fold(0u64, |acc, p| acc.checked_add(p.weight))
            .ok_or_else(|| SessionError::InvalidGenesis("total weight overflows".into()))?;
        let cutoff_weight = (total_weight as u128 * 2 / 3) as u64 + 1;

        Ok(Self {
            participants,
            total_weight,
            cutoff_weight,
            index,
        })
    }

    /// Returns all participants in session order.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Returns the number of participants.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Returns true if there are no participants.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Gets a participant by index.
    pub fn get(&self, idx: u32) -> Option<&Participant> {
        self.participants.get(idx as usize)
    }

    /// Returns the weight of a participant, zero for unknown indices.
    pub fn weight(&self, idx: u32) -> u64 {
        self.get(idx).map(|p| p.weight).unwrap_or(0)
    }

    /// Finds a participant's index by public key.
    pub fn index_of(&self, public_key: &PublicKey) -> Option<u32> {
        self.index.get(public_key).copied()
    }

    /// Returns the total voting weight.
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Returns the weight that certifies a decision: `floor(2 * total / 3) + 1`.
    pub fn cutoff_weight(&self) -> u64 {
        self.cutoff_weight
    }

    /// Sums the weight of the given indices.
    pub fn weight_of(&self, signers: impl IntoIterator<Item = u32>) -> u64 {
        signers.into_iter().map(|i| self.weight(i)).sum()
    }

    /// Checks whether the given indices reach the cutoff weight.
    ///
    /// Stops reading the iterator as soon as the cutoff is reached.
    pub fn has_quorum(&self, signers: impl IntoIterator<Item = u32>) -> bool {
        let mut weight = 0u64;
        for i in signers {
            weight += self.weight(i);
            if weight >= self.cutoff_weight {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_types::Keypair;

    fn test_participants(count: u64, weight: u64) -> Vec<Participant> {
        (0..count)
            .map(|i| {
                Participant::new(
                    Keypair::from_seed(i).public_key(),
                    format!("node-{}", i),
                    weight,
                )
            })
            .collect()
    }

    #[test]
    fn test_cutoff_weight() {
        let set = ParticipantSet::new(test_participants(4, 1), 1).unwrap();
        assert_eq!(set.total_weight(), 4);
        // floor(8 / 3) + 1
        assert_eq!(set.cutoff_weight(), 3);

        let set = ParticipantSet::new(test_participants(4, 100), 1).unwrap();
        assert_eq!(set.cutoff_weight(), 267);
    }

    #[test]
    fn test_has_quorum() {
        let set = ParticipantSet::new(test_participants(4, 1), 1).unwrap();
        assert!(set.has_quorum([0, 1, 2]));
        assert!(!set.has_quorum([0, 1]));
        assert!(!set.has_quorum([0, 9]));
    }

    #[test]
    fn test_lookup() {
        let participants = test_participants(3, 1);
        let key = participants[2].public_key;
        let set = ParticipantSet::new(participants, 1).unwrap();
        assert_eq!(set.index_of(&key), Some(2));
        assert_eq!(set.get(2).unwrap().name, "node-2");
    }

    #[test]
    fn test_too_few() {
        let result = ParticipantSet::new(test_participants(2, 1), 4);
        assert!(matches!(
            result,
            Err(SessionError::NotEnoughParticipants { have: 2, need: 4 })
        ));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut participants = test_participants(3, 1);
        participants[1].public_key = participants[0].public_key;
        assert!(matches!(
            ParticipantSet::new(participants, 1),
            Err(SessionError::InvalidGenesis(msg)) if msg.contains("duplicate")
        ));
    }

    #[test]
    fn test_zero_weight_rejected() {
        let participants = test_participants(3, 0);
        assert!(ParticipantSet::new(participants, 1).is_err());
    }
}
