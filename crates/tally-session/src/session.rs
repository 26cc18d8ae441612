//! Session state: the entry point of the core.
//!
//! A session is the sequence of rounds decided so far plus the round being
//! decided. The hosting actor feeds it actions, merges it with states built
//! from other delivery orders, and asks it what the local node should say.
//!
//! ```text
//!   action(src, att, msg)
//!          │
//!          ▼
//!   msg.round == current ──▶ RoundState::action ──▶ signed? ──▶ archive, open next round
//!   msg.round <  current ──▶ ArchivedRound::action (late approve/commit only)
//!   msg.round >  current ──▶ ignored
//! ```

use crate::archive::ArchivedRound;
use crate::arena::{Arena, ContentHasher, Handle, Object};
use crate::candidate::{CandidateRef, SignatureVector};
use crate::context::Context;
use crate::error::{Result, SessionError};
use crate::message::RoundMessage;
use crate::persistent::{PersistentSortedVector, PersistentVector};
use crate::round::RoundState;
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// Archived rounds, indexed by round number.
pub type ArchivedRounds = PersistentVector<Handle<ArchivedRound>>;

/// The full consensus state of one participant's view.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Latest attempt each source was seen acting in.
    pub att: Handle<PersistentVector<u32>>,
    /// Finished rounds.
    pub old_rounds: Handle<ArchivedRounds>,
    /// The round being decided.
    pub current: Handle<RoundState>,
}

impl Object for SessionState {
    const KIND: &'static str = "session";

    fn hash_fields(&self, hasher: &mut ContentHasher) {
        hasher.write_handle(&self.att);
        hasher.write_handle(&self.old_rounds);
        hasher.write_handle(&self.current);
    }

    fn promote_children(&self, arena: &mut Arena) -> Result<Self> {
        Ok(Self {
            att: arena.promote(self.att)?,
            old_rounds: arena.promote(self.old_rounds)?,
            current: arena.promote(self.current)?,
        })
    }
}

impl SessionState {
    /// Interns the initial state: round zero, nothing seen.
    pub fn create(ctx: &mut Context) -> Result<Handle<Self>> {
        let n = ctx.desc.total_nodes() as usize;
        let att = PersistentVector::create(ctx, vec![0u32; n])?;
        let old_rounds = PersistentVector::create(ctx, Vec::new())?;
        let current = RoundState::create(ctx, 0)?;
        ctx.arena.create(Self {
            att,
            old_rounds,
            current,
        })
    }

    /// Applies one action of `src`, sent in attempt `att`.
    ///
    /// Invalid, stale or duplicate messages are logged and leave the rounds
    /// unchanged. Any message for the current or an archived round still
    /// advances the last-seen attempt of `src`; when nothing changes at all,
    /// `state` itself is returned.
    pub fn action(
        ctx: &mut Context,
        state: Handle<Self>,
        src: u32,
        att: u32,
        message: &RoundMessage,
    ) -> Result<Handle<Self>> {
        let value = ctx.get(state)?.clone();
        if src >= ctx.desc.total_nodes() {
            warn!(src, kind = message.kind(), "action from unknown source");
            return Ok(state);
        }
        let current_seqno = ctx.get(value.current)?.seqno;
        let round = message.round();

        let mut next = value.clone();
        match round.cmp(&current_seqno) {
            Ordering::Equal => {
                next.current = RoundState::action(ctx, value.current, src, att, message)?;
            }
            Ordering::Less => {
                if message.is_attempt_scoped() {
                    warn!(
                        src,
                        round,
                        current = current_seqno,
                        kind = message.kind(),
                        "attempt message for archived round"
                    );
                } else {
                    let slot = ctx
                        .get(value.old_rounds)?
                        .at(round as usize)
                        .copied()
                        .ok_or_else(|| SessionError::Inconsistent(format!("round {round} not archived")))?;
                    let archived = ArchivedRound::action(ctx, slot, src, message)?;
                    if archived != slot {
                        next.old_rounds =
                            PersistentVector::change(ctx, value.old_rounds, round as usize, archived)?;
                    }
                }
            }
            Ordering::Greater => {
                warn!(
                    src,
                    round,
                    current = current_seqno,
                    kind = message.kind(),
                    "message for a future round"
                );
                return Ok(state);
            }
        }

        let seen = ctx.get(next.att)?.at(src as usize).copied().unwrap_or(0);
        if att > seen {
            next.att = PersistentVector::change(ctx, next.att, src as usize, att)?;
        }
        if next == value {
            return Ok(state);
        }
        let next = Self::archive_if_signed(ctx, next)?;
        ctx.arena.create_or_reuse(next, &[state])
    }

    /// Moves a signed current round into the archive and opens the next one.
    fn archive_if_signed(ctx: &mut Context, mut value: Self) -> Result<Self> {
        while RoundState::is_signed(ctx, value.current)? {
            let seqno = ctx.get(value.current)?.seqno;
            let archived = ArchivedRound::from_round(ctx, value.current)?;
            let block = ctx.get(archived)?.block;
            value.old_rounds =
                PersistentVector::push(ctx, value.old_rounds, seqno as usize, archived)?;
            value.current = RoundState::create(ctx, seqno + 1)?;
            info!(round = seqno, candidate = %block.id, "round archived");
        }
        Ok(value)
    }

    /// Merges two views of the session.
    ///
    /// When one side is behind, its round can no longer change on that side,
    /// so it is folded into the other side's archive of the same round.
    pub fn merge(ctx: &mut Context, left: Handle<Self>, right: Handle<Self>) -> Result<Handle<Self>> {
        if left == right {
            return Ok(left);
        }
        let l = ctx.get(left)?.clone();
        let r = ctx.get(right)?.clone();
        let att = PersistentVector::merge(ctx, l.att, r.att, |_, a, b| Ok(*a.max(b)))?;
        let mut old_rounds =
            PersistentVector::merge(ctx, l.old_rounds, r.old_rounds, |ctx, a, b| {
                ArchivedRound::merge(ctx, *a, *b)
            })?;

        let l_seqno = ctx.get(l.current)?.seqno;
        let r_seqno = ctx.get(r.current)?.seqno;
        let current = match l_seqno.cmp(&r_seqno) {
            Ordering::Equal => RoundState::merge(ctx, l.current, r.current)?,
            Ordering::Less => {
                old_rounds = Self::fold_behind(ctx, old_rounds, l.current)?;
                r.current
            }
            Ordering::Greater => {
                old_rounds = Self::fold_behind(ctx, old_rounds, r.current)?;
                l.current
            }
        };

        let merged = Self::archive_if_signed(
            ctx,
            Self {
                att,
                old_rounds,
                current,
            },
        )?;
        ctx.arena.create_or_reuse(merged, &[left, right])
    }

    fn fold_behind(
        ctx: &mut Context,
        old_rounds: Handle<ArchivedRounds>,
        round: Handle<RoundState>,
    ) -> Result<Handle<ArchivedRounds>> {
        let seqno = ctx.get(round)?.seqno;
        let slot = ctx
            .get(old_rounds)?
            .at(seqno as usize)
            .copied()
            .ok_or_else(|| SessionError::Inconsistent(format!("round {seqno} not archived")))?;
        let folded = ArchivedRound::merge_round(ctx, slot, round)?;
        PersistentVector::change(ctx, old_rounds, seqno as usize, folded)
    }

    /// Applies the vote or precommit `src` would send now, if any.
    ///
    /// Returns the new state and whether anything changed.
    pub fn make_one(
        ctx: &mut Context,
        state: Handle<Self>,
        src: u32,
        att: u32,
    ) -> Result<(Handle<Self>, bool)> {
        let message = Self::create_action(ctx, state, src, att)?;
        match message {
            RoundMessage::Vote { .. } | RoundMessage::Precommit { .. } => {
                let next = Self::action(ctx, state, src, att, &message)?;
                Ok((next, next != state))
            }
            _ => Ok((state, false)),
        }
    }

    /// Runs [`SessionState::make_one`] for `src` until it stops progressing.
    ///
    /// Only `src`'s own actions are replayed; quorums still need the other
    /// sources' messages to arrive through [`SessionState::action`].
    pub fn make_all(ctx: &mut Context, state: Handle<Self>, src: u32, att: u32) -> Result<Handle<Self>> {
        let mut state = state;
        let mut made_actions = 0u32;
        loop {
            let (next, made) = Self::make_one(ctx, state, src, att)?;
            state = next;
            if !made {
                break;
            }
            made_actions += 1;
        }
        debug!(src, attempt = att, made_actions, "make_all settled");
        Ok(state)
    }

    /// What `src` should say next in attempt `att` of the current round.
    pub fn create_action(ctx: &Context, state: Handle<Self>, src: u32, att: u32) -> Result<RoundMessage> {
        RoundState::create_action(ctx, ctx.get(state)?.current, src, att)
    }

    /// The candidate `src` should vote for in attempt `att`.
    pub fn choose_block_to_vote(
        ctx: &Context,
        state: Handle<Self>,
        src: u32,
        att: u32,
    ) -> Result<Option<CandidateRef>> {
        RoundState::choose_block_to_vote(ctx, ctx.get(state)?.current, src, att)
    }

    /// The block `src` should sign a commit for, if any.
    pub fn choose_block_to_sign(ctx: &Context, state: Handle<Self>, src: u32) -> Result<Option<CandidateRef>> {
        RoundState::choose_block_to_sign(ctx, ctx.get(state)?.current, src)
    }

    /// Candidates `src` should validate and approve, best first.
    pub fn choose_blocks_to_approve(ctx: &Context, state: Handle<Self>, src: u32) -> Result<Vec<CandidateRef>> {
        RoundState::choose_blocks_to_approve(ctx, ctx.get(state)?.current, src)
    }

    /// Number of the round being decided.
    pub fn current_round_seqno(ctx: &Context, state: Handle<Self>) -> Result<u32> {
        Ok(ctx.get(ctx.get(state)?.current)?.seqno)
    }

    /// Latest attempt `src` was seen acting in.
    pub fn last_seen_attempt(ctx: &Context, state: Handle<Self>, src: u32) -> Result<u32> {
        Ok(ctx
            .get(ctx.get(state)?.att)?
            .at(src as usize)
            .copied()
            .unwrap_or(0))
    }

    fn archived(ctx: &Context, state: Handle<Self>, round: u32) -> Result<Option<&ArchivedRound>> {
        match ctx.get(ctx.get(state)?.old_rounds)?.at(round as usize) {
            Some(slot) => ctx.get(*slot).map(Some),
            None => Ok(None),
        }
    }

    /// The block committed in `round`, once archived.
    pub fn get_committed_block(ctx: &Context, state: Handle<Self>, round: u32) -> Result<Option<CandidateRef>> {
        Ok(Self::archived(ctx, state, round)?.map(|a| a.block))
    }

    /// Commit signatures of `round`, once archived.
    pub fn get_committed_signatures(
        ctx: &Context,
        state: Handle<Self>,
        round: u32,
    ) -> Result<Option<Handle<SignatureVector>>> {
        Ok(Self::archived(ctx, state, round)?.map(|a| a.signatures))
    }

    /// Approve signatures of the block committed in `round`, once archived.
    pub fn get_approve_signatures(
        ctx: &Context,
        state: Handle<Self>,
        round: u32,
    ) -> Result<Option<Handle<SignatureVector>>> {
        Ok(Self::archived(ctx, state, round)?.map(|a| a.approve_signatures))
    }

    /// Approve signatures collected so far for `candidate` in the current round.
    pub fn current_approvals(
        ctx: &Context,
        state: Handle<Self>,
        candidate: tally_types::CandidateId,
    ) -> Result<Option<Handle<SignatureVector>>> {
        let round = ctx.get(ctx.get(state)?.current)?;
        match PersistentSortedVector::get(ctx, round.sent_blocks, candidate)? {
            Some(entry) => Ok(Some(ctx.get(entry)?.approved_by)),
            None => Ok(None),
        }
    }
}
