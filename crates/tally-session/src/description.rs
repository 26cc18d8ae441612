//! Immutable session description.
//!
//! Everything a state transition needs to know besides the state itself:
//! participants and their weights, options, the priority function, the clock
//! mapping, and the signature verifier.

use crate::error::Result;
use crate::options::SessionOptions;
use crate::participant::{Participant, ParticipantSet};
use crate::priority::{RoundPriority, RoundRobin};
use std::fmt;
use tally_types::{CandidateId, Hash256, PublicKey, SignatureError, SignatureVerifier};

/// Session-wide configuration and external collaborators.
pub struct Description {
    participants: ParticipantSet,
    options: SessionOptions,
    verifier: Box<dyn SignatureVerifier>,
    priority: Box<dyn RoundPriority>,
}

impl Description {
    /// Creates a description with round-robin priority.
    pub fn new(
        participants: Vec<Participant>,
        options: SessionOptions,
        verifier: impl SignatureVerifier + 'static,
    ) -> Result<Self> {
        options.validate()?;
        let participants = ParticipantSet::new(participants, options.min_participants)?;
        let priority = RoundRobin::new(participants.len() as u32, options.round_candidates);
        Ok(Self {
            participants,
            options,
            verifier: Box::new(verifier),
            priority: Box::new(priority),
        })
    }

    /// Replaces the priority function.
    pub fn with_priority(mut self, priority: impl RoundPriority + 'static) -> Self {
        self.priority = Box::new(priority);
        self
    }

    /// Returns the participant set.
    pub fn participants(&self) -> &ParticipantSet {
        &self.participants
    }

    /// Returns the options.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Number of participants.
    pub fn total_nodes(&self) -> u32 {
        self.participants.len() as u32
    }

    /// Weight of one participant.
    pub fn node_weight(&self, src: u32) -> u64 {
        self.participants.weight(src)
    }

    /// Total participant weight.
    pub fn total_weight(&self) -> u64 {
        self.participants.total_weight()
    }

    /// Weight required to approve, vote, precommit or commit.
    pub fn cutoff_weight(&self) -> u64 {
        self.participants.cutoff_weight()
    }

    /// Public key of a participant.
    pub fn public_key(&self, src: u32) -> Option<&PublicKey> {
        self.participants.get(src).map(|p| &p.public_key)
    }

    /// Submission priority of `src` in `round`.
    pub fn node_priority(&self, src: u32, round: u32) -> Option<u32> {
        self.priority.priority(src, round)
    }

    /// Largest submission priority.
    pub fn max_priority(&self) -> u32 {
        self.priority.max_priority()
    }

    /// Rank used when picking between candidates; the skip candidate ranks last.
    pub fn candidate_rank(&self, src: Option<u32>, round: u32) -> Option<u32> {
        match src {
            None => Some(self.max_priority().saturating_add(1)),
            Some(src) => self.node_priority(src, round),
        }
    }

    /// The source allowed to send `VOTE_FOR` in `attempt`.
    pub fn vote_for_author(&self, attempt: u32) -> u32 {
        attempt % self.total_nodes()
    }

    /// Attempt number covering the given unix time (seconds), saturating at
    /// `u32::MAX`.
    pub fn attempt_seqno(&self, unix_secs: u64) -> u32 {
        u32::try_from(unix_secs / u64::from(self.options.attempt_duration_secs)).unwrap_or(u32::MAX)
    }

    /// Unix time (seconds) at which `attempt` starts.
    pub fn attempt_start(&self, attempt: u32) -> u64 {
        u64::from(attempt) * u64::from(self.options.attempt_duration_secs)
    }

    /// Returns true once `src` has spent its fast-mode budget in this round.
    ///
    /// `first_attempt` is the first attempt in which the round saw `src`; an
    /// unseen source is treated as starting now.
    pub fn is_slow_mode(&self, first_attempt: Option<u32>, attempt: u32) -> bool {
        let budget = self.options.max_round_attempts;
        if budget == 0 {
            return false;
        }
        let first = first_attempt.unwrap_or(attempt);
        attempt >= first.saturating_add(budget)
    }

    /// Derives the id of a candidate.
    pub fn candidate_id(
        &self,
        src: u32,
        root_hash: &Hash256,
        file_hash: &Hash256,
        collated_data_hash: &Hash256,
    ) -> CandidateId {
        CandidateId::derive(src, root_hash, file_hash, collated_data_hash)
    }

    /// Checks an approve signature from participant `src`.
    pub fn check_approve_signature(
        &self,
        root_hash: &Hash256,
        file_hash: &Hash256,
        src: u32,
        signature: &[u8],
    ) -> std::result::Result<(), SignatureError> {
        let key = self.public_key(src).ok_or(SignatureError::MalformedKey)?;
        self.verifier
            .check_approve_signature(root_hash, file_hash, key, signature)
    }

    /// Checks a commit signature from participant `src`.
    pub fn check_commit_signature(
        &self,
        root_hash: &Hash256,
        file_hash: &Hash256,
        src: u32,
        signature: &[u8],
    ) -> std::result::Result<(), SignatureError> {
        let key = self.public_key(src).ok_or(SignatureError::MalformedKey)?;
        self.verifier
            .check_commit_signature(root_hash, file_hash, key, signature)
    }
}

impl fmt::Debug for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Description")
            .field("participants", &self.participants.len())
            .field("total_weight", &self.total_weight())
            .field("cutoff_weight", &self.cutoff_weight())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
