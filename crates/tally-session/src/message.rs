//! Round messages.
//!
//! Every event the hosting actor feeds into the state machines is one of
//! these. Round-level messages (`Submit`, `Approve`, `Reject`, `Commit`) are
//! handled by the round; attempt-scoped ones (`Vote`, `VoteFor`, `Precommit`,
//! `Empty`) are forwarded to the attempt they name.

use bytes::Bytes;
use tally_types::{CandidateId, Hash256};

/// A message applied to the session state on behalf of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundMessage {
    /// Submission of a new candidate by its producer.
    Submit {
        /// Round number.
        round: u32,
        /// Root hash of the block.
        root_hash: Hash256,
        /// Hash of the block file.
        file_hash: Hash256,
        /// Hash of the collated data.
        collated_data_hash: Hash256,
    },

    /// Approval of a candidate after validation.
    Approve {
        /// Round number.
        round: u32,
        /// Approved candidate.
        candidate: CandidateId,
        /// Approve signature, empty for the skip candidate.
        signature: Bytes,
    },

    /// Notice that validation of a candidate failed.
    Reject {
        /// Round number.
        round: u32,
        /// Rejected candidate.
        candidate: CandidateId,
        /// Free-form reason.
        reason: Bytes,
    },

    /// Commit signature on the precommitted block.
    Commit {
        /// Round number.
        round: u32,
        /// Committed candidate.
        candidate: CandidateId,
        /// Commit signature, empty for the skip candidate.
        signature: Bytes,
    },

    /// Vote in an attempt.
    Vote {
        /// Round number.
        round: u32,
        /// Attempt number.
        attempt: u32,
        /// Candidate voted for.
        candidate: CandidateId,
    },

    /// Fallback candidate chosen by the attempt author for slow mode.
    VoteFor {
        /// Round number.
        round: u32,
        /// Attempt number.
        attempt: u32,
        /// Candidate to vote for.
        candidate: CandidateId,
    },

    /// Precommit of the attempt's vote-quorum candidate.
    Precommit {
        /// Round number.
        round: u32,
        /// Attempt number.
        attempt: u32,
        /// Candidate precommitted.
        candidate: CandidateId,
    },

    /// Nothing to say in this attempt.
    Empty {
        /// Round number.
        round: u32,
        /// Attempt number.
        attempt: u32,
    },
}

impl RoundMessage {
    /// Returns the message type as a string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            RoundMessage::Submit { .. } => "submit",
            RoundMessage::Approve { .. } => "approve",
            RoundMessage::Reject { .. } => "reject",
            RoundMessage::Commit { .. } => "commit",
            RoundMessage::Vote { .. } => "vote",
            RoundMessage::VoteFor { .. } => "vote_for",
            RoundMessage::Precommit { .. } => "precommit",
            RoundMessage::Empty { .. } => "empty",
        }
    }

    /// Returns the round the message belongs to.
    pub fn round(&self) -> u32 {
        match self {
            RoundMessage::Submit { round, .. }
            | RoundMessage::Approve { round, .. }
            | RoundMessage::Reject { round, .. }
            | RoundMessage::Commit { round, .. }
            | RoundMessage::Vote { round, .. }
            | RoundMessage::VoteFor { round, .. }
            | RoundMessage::Precommit { round, .. }
            | RoundMessage::Empty { round, .. } => *round,
        }
    }

    /// Returns the attempt of an attempt-scoped message.
    pub fn attempt(&self) -> Option<u32> {
        match self {
            RoundMessage::Vote { attempt, .. }
            | RoundMessage::VoteFor { attempt, .. }
            | RoundMessage::Precommit { attempt, .. }
            | RoundMessage::Empty { attempt, .. } => Some(*attempt),
            RoundMessage::Submit { .. }
            | RoundMessage::Approve { .. }
            | RoundMessage::Reject { .. }
            | RoundMessage::Commit { .. } => None,
        }
    }

    /// Returns true for messages handled by an attempt.
    pub fn is_attempt_scoped(&self) -> bool {
        self.attempt().is_some()
    }

    /// Returns the candidate the message refers to, if any.
    pub fn candidate(&self) -> Option<CandidateId> {
        match self {
            RoundMessage::Approve { candidate, .. }
            | RoundMessage::Reject { candidate, .. }
            | RoundMessage::Commit { candidate, .. }
            | RoundMessage::Vote { candidate, .. }
            | RoundMessage::VoteFor { candidate, .. }
            | RoundMessage::Precommit { candidate, .. } => Some(*candidate),
            RoundMessage::Submit { .. } | RoundMessage::Empty { .. } => None,
        }
    }
}
