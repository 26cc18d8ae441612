//! Attempt state machine.
//!
//! An attempt is one timed sub-round of voting. It records who voted for
//! which candidate, who precommitted, and the fallback candidate the attempt
//! author picked for slow mode. Every query that needs round-level knowledge
//! (approvals, earlier attempts, precommit pins) receives the owning
//! [`RoundState`] as a parameter.

use crate::arena::{Arena, ContentHasher, Element, Handle, Object};
use crate::candidate::{CandidateRef, VoteCandidate};
use crate::context::Context;
use crate::error::{Result, SessionError};
use crate::message::RoundMessage;
use crate::persistent::{Keyed, PersistentBitset, PersistentSortedVector};
use crate::round::RoundState;
use tally_types::CandidateId;
use tracing::{debug, warn};

/// State of one attempt of a round.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptState {
    /// Attempt number.
    pub seqno: u32,
    /// One entry per candidate with at least one vote.
    pub votes: Handle<PersistentSortedVector<VoteCandidate>>,
    /// Sources that precommitted in this attempt.
    pub precommitted: Handle<PersistentBitset>,
    /// Fallback candidate for slow mode, once the author set it.
    pub vote_for: Option<CandidateRef>,
}

impl Object for AttemptState {
    const KIND: &'static str = "attempt";

    fn hash_fields(&self, hasher: &mut ContentHasher) {
        hasher.write_u32(self.seqno);
        hasher.write_handle(&self.votes);
        hasher.write_handle(&self.precommitted);
        self.vote_for.hash_into(hasher);
    }

    fn promote_children(&self, arena: &mut Arena) -> Result<Self> {
        Ok(Self {
            seqno: self.seqno,
            votes: arena.promote(self.votes)?,
            precommitted: arena.promote(self.precommitted)?,
            vote_for: self.vote_for.promote(arena)?,
        })
    }
}

impl Keyed for AttemptState {
    type Key = u32;

    fn key(&self) -> u32 {
        self.seqno
    }
}

impl AttemptState {
    /// Interns an attempt nobody acted in.
    pub fn create(ctx: &mut Context, seqno: u32) -> Result<Handle<Self>> {
        let votes = PersistentSortedVector::empty(ctx)?;
        let n = ctx.desc.total_nodes();
        let precommitted = PersistentBitset::create(ctx, n)?;
        ctx.arena.create(Self {
            seqno,
            votes,
            precommitted,
            vote_for: None,
        })
    }

    /// The candidate holding vote quorum, if any.
    ///
    /// Under an honest quorum at most one candidate can get there; if several
    /// do, the smallest id is reported so every participant agrees.
    pub fn voted_block(ctx: &Context, attempt: Handle<Self>) -> Result<Option<CandidateRef>> {
        let votes = ctx.get(ctx.get(attempt)?.votes)?;
        for (_, entry) in votes.iter() {
            if VoteCandidate::is_voted(ctx, entry)? {
                return Ok(Some(ctx.get(entry)?.candidate));
            }
        }
        Ok(None)
    }

    /// Returns true if `src` voted for any candidate in this attempt.
    pub fn has_voted(ctx: &Context, attempt: Handle<Self>, src: u32) -> Result<bool> {
        let votes = ctx.get(ctx.get(attempt)?.votes)?;
        for (_, entry) in votes.iter() {
            if VoteCandidate::is_voted_by(ctx, entry, src)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns true if `src` voted for `candidate` in this attempt.
    pub fn has_voted_for(
        ctx: &Context,
        attempt: Handle<Self>,
        src: u32,
        candidate: CandidateId,
    ) -> Result<bool> {
        match PersistentSortedVector::get(ctx, ctx.get(attempt)?.votes, candidate)? {
            Some(entry) => VoteCandidate::is_voted_by(ctx, entry, src),
            None => Ok(false),
        }
    }

    /// Returns true if `src` precommitted in this attempt.
    pub fn has_precommitted(ctx: &Context, attempt: Handle<Self>, src: u32) -> Result<bool> {
        Ok(ctx.get(ctx.get(attempt)?.precommitted)?.get(src))
    }

    /// Returns true once the precommitters reach the cutoff weight.
    pub fn has_precommit_quorum(ctx: &Context, attempt: Handle<Self>) -> Result<bool> {
        let set = ctx.get(ctx.get(attempt)?.precommitted)?;
        Ok(ctx.desc.participants().has_quorum(set.iter_set()))
    }

    /// Applies an attempt-scoped message from `src`.
    ///
    /// Returns `None` when the message is rejected; the caller keeps its state.
    pub fn action(
        ctx: &mut Context,
        attempt: Handle<Self>,
        round: &RoundState,
        src: u32,
        message: &RoundMessage,
    ) -> Result<Option<Handle<Self>>> {
        let state = ctx.get(attempt)?.clone();
        let att = state.seqno;
        match *message {
            RoundMessage::Vote { candidate, .. } => {
                if Self::has_voted(ctx, attempt, src)? {
                    warn!(src, round = round.seqno, attempt = att, %candidate, "duplicate vote");
                    return Ok(None);
                }
                let Some(approved) = round.approved_candidate(ctx, candidate)? else {
                    warn!(src, round = round.seqno, attempt = att, %candidate, "vote for unapproved candidate");
                    return Ok(None);
                };
                let entry = match PersistentSortedVector::get(ctx, state.votes, candidate)? {
                    Some(entry) => entry,
                    None => VoteCandidate::create(ctx, approved)?,
                };
                let entry = VoteCandidate::vote(ctx, entry, src)?;
                let votes = PersistentSortedVector::push(ctx, state.votes, entry)?;
                if VoteCandidate::is_voted(ctx, entry)? {
                    debug!(round = round.seqno, attempt = att, %candidate, "vote quorum");
                }
                ctx.arena
                    .create_or_reuse(Self { votes, ..state }, &[attempt])
                    .map(Some)
            }
            RoundMessage::VoteFor { candidate, .. } => {
                if src != ctx.desc.vote_for_author(att) {
                    warn!(src, round = round.seqno, attempt = att, %candidate, "vote_for from non-author");
                    return Ok(None);
                }
                if state.vote_for.is_some() {
                    warn!(src, round = round.seqno, attempt = att, %candidate, "duplicate vote_for");
                    return Ok(None);
                }
                let Some(approved) = round.approved_candidate(ctx, candidate)? else {
                    warn!(src, round = round.seqno, attempt = att, %candidate, "vote_for unapproved candidate");
                    return Ok(None);
                };
                ctx.arena
                    .create(Self {
                        vote_for: Some(approved),
                        ..state
                    })
                    .map(Some)
            }
            RoundMessage::Precommit { candidate, .. } => {
                let Some(voted) = Self::voted_block(ctx, attempt)? else {
                    warn!(src, round = round.seqno, attempt = att, %candidate, "precommit without vote quorum");
                    return Ok(None);
                };
                if voted.id != candidate {
                    warn!(
                        src,
                        round = round.seqno,
                        attempt = att,
                        %candidate,
                        voted = %voted.id,
                        "precommit for a block other than the voted one"
                    );
                    return Ok(None);
                }
                if Self::has_precommitted(ctx, attempt, src)? {
                    warn!(src, round = round.seqno, attempt = att, %candidate, "duplicate precommit");
                    return Ok(None);
                }
                let precommitted = PersistentBitset::change(ctx, state.precommitted, src, true)?;
                ctx.arena
                    .create(Self {
                        precommitted,
                        ..state
                    })
                    .map(Some)
            }
            RoundMessage::Empty { .. } => Ok(Some(attempt)),
            RoundMessage::Submit { .. }
            | RoundMessage::Approve { .. }
            | RoundMessage::Reject { .. }
            | RoundMessage::Commit { .. } => {
                warn!(src, round = round.seqno, attempt = att, kind = message.kind(), "round message routed to attempt");
                Ok(None)
            }
        }
    }

    /// What `src` should say next in attempt `att`.
    ///
    /// In order: the author's `VOTE_FOR` in slow mode, a vote, a precommit of
    /// the voted block, and finally `EMPTY`.
    pub fn create_action(
        ctx: &Context,
        attempt: Option<Handle<Self>>,
        round: &RoundState,
        src: u32,
        att: u32,
    ) -> Result<RoundMessage> {
        let seqno = round.seqno;
        let vote_for_set = match attempt {
            Some(a) => ctx.get(a)?.vote_for.is_some(),
            None => false,
        };
        if !vote_for_set
            && src == ctx.desc.vote_for_author(att)
            && round.is_slow_mode(ctx, src, att)?
        {
            if let Some(candidate) = Self::pick_vote_for(ctx, round, att)? {
                return Ok(RoundMessage::VoteFor {
                    round: seqno,
                    attempt: att,
                    candidate: candidate.id,
                });
            }
        }

        let voted = match attempt {
            Some(a) => Self::has_voted(ctx, a, src)?,
            None => false,
        };
        if !voted {
            if let Some(candidate) = Self::choose_block_to_vote(ctx, attempt, round, src, att)? {
                return Ok(RoundMessage::Vote {
                    round: seqno,
                    attempt: att,
                    candidate: candidate.id,
                });
            }
        }

        if let Some(a) = attempt {
            if let Some(block) = Self::voted_block(ctx, a)? {
                if !Self::has_precommitted(ctx, a, src)?
                    && Self::has_voted_for(ctx, a, src, block.id)?
                {
                    return Ok(RoundMessage::Precommit {
                        round: seqno,
                        attempt: att,
                        candidate: block.id,
                    });
                }
            }
        }

        Ok(RoundMessage::Empty {
            round: seqno,
            attempt: att,
        })
    }

    /// The candidate `src` must vote for in attempt `att`.
    ///
    /// A source that precommitted earlier in the round keeps voting for that
    /// block. In slow mode it echoes the author's `VOTE_FOR` once set. In fast
    /// mode it prefers a block that already reached vote quorum in this round,
    /// then the best-ranked approved candidate.
    pub fn choose_block_to_vote(
        ctx: &Context,
        attempt: Option<Handle<Self>>,
        round: &RoundState,
        src: u32,
        att: u32,
    ) -> Result<Option<CandidateRef>> {
        if let Some(pinned) = round.precommit_pin(ctx, src)? {
            return Ok(Some(pinned));
        }
        if round.is_slow_mode(ctx, src, att)? {
            return match attempt {
                Some(a) => Ok(ctx.get(a)?.vote_for),
                None => Ok(None),
            };
        }
        if let Some(voted) = round.latest_voted_block(ctx, att)? {
            return Ok(Some(voted));
        }
        round.best_approved_candidate(ctx)
    }

    fn pick_vote_for(ctx: &Context, round: &RoundState, att: u32) -> Result<Option<CandidateRef>> {
        let approved = round.approved_candidates(ctx)?;
        if approved.is_empty() {
            return Ok(None);
        }
        let mut hasher = ContentHasher::new("vote_for_pick");
        hasher.write_u32(round.seqno);
        hasher.write_u32(att);
        let idx = (hasher.finish() % approved.len() as u64) as usize;
        Ok(approved.get(idx).copied())
    }

    /// Unions two views of the same attempt.
    ///
    /// Conflicting `VOTE_FOR` choices resolve to the smaller candidate id.
    pub fn merge(ctx: &mut Context, left: Handle<Self>, right: Handle<Self>) -> Result<Handle<Self>> {
        if left == right {
            return Ok(left);
        }
        let l = ctx.get(left)?.clone();
        let r = ctx.get(right)?.clone();
        if l.seqno != r.seqno {
            return Err(SessionError::Inconsistent(format!(
                "merging attempts {} and {}",
                l.seqno, r.seqno
            )));
        }
        let votes = PersistentSortedVector::merge(ctx, l.votes, r.votes, VoteCandidate::merge)?;
        let precommitted = PersistentBitset::merge(ctx, l.precommitted, r.precommitted)?;
        let vote_for = match (l.vote_for, r.vote_for) {
            (Some(a), Some(b)) => Some(if b.id < a.id { b } else { a }),
            (a, b) => a.or(b),
        };
        ctx.arena.create_or_reuse(
            Self {
                seqno: l.seqno,
                votes,
                precommitted,
                vote_for,
            },
            &[left, right],
        )
    }
}
