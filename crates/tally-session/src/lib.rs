//! Tally Validator Session
//!
//! This crate is the agreement core of a BFT block-production session: a
//! fixed, weighted set of participants decides, round by round, exactly one
//! candidate block (or an explicit skip) per round.
//!
//! # Architecture
//!
//! The core is a persistent, purely functional state machine:
//!
//! - **Arena**: every state object is immutable and hash-consed into a
//!   two-region arena (scratch and durable) behind typed [`Handle`]s.
//! - **Persistent containers**: copy-on-write vectors, bitsets and sorted
//!   vectors with subsumption-aware merges.
//! - **State machines**: [`AttemptState`] (votes and precommits of one timed
//!   sub-round), [`RoundState`] (submissions, approvals, commits) and
//!   [`SessionState`] (current round plus archive).
//! - **Merge**: two views built from different delivery orders of the same
//!   events reconcile deterministically. Merge is idempotent, commutative and
//!   associative, so content hashes converge regardless of order.
//!
//! The core never performs I/O. Transport, block generation and validation,
//! wire formats, persistence and timers belong to the hosting actor.
//!
//! # Lifecycle of a round
//!
//! ```text
//! ┌──────────┐     ┌──────────┐     ┌──────────┐     ┌──────────┐
//! │  SUBMIT  │────▶│ APPROVE  │────▶│   VOTE   │────▶│PRECOMMIT │
//! │ producer │     │  (2f+1)  │     │  (2f+1)  │     │  (2f+1)  │
//! └──────────┘     └──────────┘     └──────────┘     └────┬─────┘
//!                                                         │
//!                  ┌──────────┐     ┌──────────┐          │
//!                  │ archive, │◀────│  COMMIT  │◀─────────┘
//!                  │next round│     │  (2f+1)  │
//!                  └──────────┘     └──────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use tally_session::{generate_devnet_genesis, Context, RoundMessage, SessionState};
//! use tally_types::{CandidateId, Ed25519Verifier};
//!
//! let desc = generate_devnet_genesis(4)
//!     .into_description(Ed25519Verifier::new())
//!     .unwrap();
//! let mut ctx = Context::new(desc);
//!
//! let state = ctx.step(SessionState::create).unwrap();
//! let approve = RoundMessage::Approve {
//!     round: 0,
//!     candidate: CandidateId::skip(),
//!     signature: Default::default(),
//! };
//! let state = ctx
//!     .step(|ctx| SessionState::action(ctx, state, 0, 0, &approve))
//!     .unwrap();
//! assert_eq!(SessionState::current_round_seqno(&ctx, state).unwrap(), 0);
//! ```

mod archive;
mod arena;
mod attempt;
mod candidate;
mod context;
mod description;
mod error;
mod genesis;
mod message;
mod options;
mod participant;
mod persistent;
mod priority;
mod round;
mod session;

#[cfg(test)]
mod test_support;

pub use archive::ArchivedRound;
pub use arena::{Arena, ArenaStats, ContentHasher, Element, Handle, Object, Region};
pub use attempt::AttemptState;
pub use candidate::{
    empty_signatures, has_signature_quorum, is_signed_by, merge_signatures, signers,
    BlockCandidate, CandidateRef, SentBlock, Signature, SignatureVector, VoteCandidate,
};
pub use context::Context;
pub use description::Description;
pub use error::{Result, SessionError};
pub use genesis::{generate_devnet_genesis, GenesisParticipant, SessionGenesis};
pub use message::RoundMessage;
pub use options::SessionOptions;
pub use participant::{Participant, ParticipantSet};
pub use persistent::{
    merge_optional, Keyed, PersistentBitset, PersistentSortedVector, PersistentVector, SortKey,
};
pub use priority::{RoundPriority, RoundRobin};
pub use round::{AttemptMarkers, RoundState};
pub use session::{ArchivedRounds, SessionState};

/// Returns the memoized content hash behind a handle.
///
/// Two states built from the same events hash identically, whatever the
/// order the events were applied and merged in.
pub fn content_hash<T: Object>(handle: Handle<T>) -> u64 {
    handle.content_hash()
}
