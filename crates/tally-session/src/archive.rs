//! Frozen snapshots of finished rounds.

use crate::arena::{Arena, ContentHasher, Element, Handle, Object};
use crate::candidate::{
    empty_signatures, is_signed_by, merge_signatures, CandidateRef, Signature, SignatureVector,
};
use crate::context::Context;
use crate::error::{Result, SessionError};
use crate::message::RoundMessage;
use crate::persistent::{PersistentSortedVector, PersistentVector};
use crate::round::RoundState;
use tracing::{debug, warn};

/// A round that reached commit quorum.
///
/// Only the committed block and its signatures survive archival. Late
/// approvals and commits for that block are still folded in.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedRound {
    /// Round number.
    pub seqno: u32,
    /// The committed block, possibly skip.
    pub block: CandidateRef,
    /// Commit signatures.
    pub signatures: Handle<SignatureVector>,
    /// Approve signatures of the committed block.
    pub approve_signatures: Handle<SignatureVector>,
}

impl Object for ArchivedRound {
    const KIND: &'static str = "archived_round";

    fn hash_fields(&self, hasher: &mut ContentHasher) {
        hasher.write_u32(self.seqno);
        self.block.hash_into(hasher);
        hasher.write_handle(&self.signatures);
        hasher.write_handle(&self.approve_signatures);
    }

    fn promote_children(&self, arena: &mut Arena) -> Result<Self> {
        Ok(Self {
            seqno: self.seqno,
            block: self.block.promote(arena)?,
            signatures: arena.promote(self.signatures)?,
            approve_signatures: arena.promote(self.approve_signatures)?,
        })
    }
}

impl ArchivedRound {
    /// Freezes a precommitted round.
    pub fn from_round(ctx: &mut Context, round: Handle<RoundState>) -> Result<Handle<Self>> {
        let state = ctx.get(round)?.clone();
        let block = state.precommitted_block.ok_or_else(|| {
            SessionError::Inconsistent(format!("archiving round {} before precommit", state.seqno))
        })?;
        let approve_signatures = match PersistentSortedVector::get(ctx, state.sent_blocks, block.id)? {
            Some(entry) => ctx.get(entry)?.approved_by,
            None => empty_signatures(ctx)?,
        };
        ctx.arena.create(Self {
            seqno: state.seqno,
            block,
            signatures: state.signatures,
            approve_signatures,
        })
    }

    /// Folds a late approval or commit of the committed block.
    ///
    /// Everything else is a protocol violation: logged, and `archived` is
    /// returned unchanged.
    pub fn action(
        ctx: &mut Context,
        archived: Handle<Self>,
        src: u32,
        message: &RoundMessage,
    ) -> Result<Handle<Self>> {
        let state = ctx.get(archived)?.clone();
        let (candidate, signature, is_commit) = match message {
            RoundMessage::Approve {
                candidate,
                signature,
                ..
            } => (*candidate, signature, false),
            RoundMessage::Commit {
                candidate,
                signature,
                ..
            } => (*candidate, signature, true),
            _ => {
                warn!(src, round = state.seqno, kind = message.kind(), "message for archived round");
                return Ok(archived);
            }
        };
        if candidate != state.block.id {
            warn!(
                src,
                round = state.seqno,
                %candidate,
                committed = %state.block.id,
                kind = message.kind(),
                "late message for a block that was not committed"
            );
            return Ok(archived);
        }
        let slot = if is_commit {
            state.signatures
        } else {
            state.approve_signatures
        };
        if is_signed_by(ctx, slot, src)? {
            warn!(src, round = state.seqno, %candidate, kind = message.kind(), "duplicate late signature");
            return Ok(archived);
        }
        if let Some(block) = state.block.block {
            let header = ctx.get(block)?;
            let checked = if is_commit {
                ctx.desc
                    .check_commit_signature(&header.root_hash, &header.file_hash, src, signature)
            } else {
                ctx.desc
                    .check_approve_signature(&header.root_hash, &header.file_hash, src, signature)
            };
            if let Err(err) = checked {
                warn!(src, round = state.seqno, %candidate, %err, kind = message.kind(), "bad late signature");
                return Ok(archived);
            }
        }
        let sig = Signature::create(ctx, signature.clone())?;
        let slot = PersistentVector::change(ctx, slot, src as usize, Some(sig))?;
        debug!(src, round = state.seqno, kind = message.kind(), "late signature archived");
        let next = if is_commit {
            Self {
                signatures: slot,
                ..state
            }
        } else {
            Self {
                approve_signatures: slot,
                ..state
            }
        };
        ctx.arena.create_or_reuse(next, &[archived])
    }

    /// Unions two snapshots of the same round.
    pub fn merge(ctx: &mut Context, left: Handle<Self>, right: Handle<Self>) -> Result<Handle<Self>> {
        if left == right {
            return Ok(left);
        }
        let l = ctx.get(left)?.clone();
        let r = ctx.get(right)?.clone();
        if l.seqno != r.seqno || l.block.id != r.block.id {
            return Err(SessionError::Inconsistent(format!(
                "round {} archived with {} and round {} with {}",
                l.seqno, l.block.id, r.seqno, r.block.id
            )));
        }
        let signatures = merge_signatures(ctx, l.signatures, r.signatures)?;
        let approve_signatures = merge_signatures(ctx, l.approve_signatures, r.approve_signatures)?;
        ctx.arena.create_or_reuse(
            Self {
                seqno: l.seqno,
                block: l.block,
                signatures,
                approve_signatures,
            },
            &[left, right],
        )
    }

    /// Folds what a still-live view of the round knows about the committed
    /// block into the snapshot.
    pub fn merge_round(
        ctx: &mut Context,
        archived: Handle<Self>,
        round: Handle<RoundState>,
    ) -> Result<Handle<Self>> {
        let state = ctx.get(archived)?.clone();
        let live = ctx.get(round)?.clone();
        if live.seqno != state.seqno {
            return Err(SessionError::Inconsistent(format!(
                "merging round {} into archived round {}",
                live.seqno, state.seqno
            )));
        }
        let mut next = state.clone();
        if let Some(entry) = PersistentSortedVector::get(ctx, live.sent_blocks, state.block.id)? {
            let approved_by = ctx.get(entry)?.approved_by;
            next.approve_signatures = merge_signatures(ctx, state.approve_signatures, approved_by)?;
        }
        match live.precommitted_block {
            Some(block) if block.id == state.block.id => {
                next.signatures = merge_signatures(ctx, state.signatures, live.signatures)?;
            }
            Some(block) => {
                warn!(
                    round = state.seqno,
                    committed = %state.block.id,
                    precommitted = %block.id,
                    "live round precommitted a different block"
                );
            }
            None => {}
        }
        ctx.arena.create_or_reuse(next, &[archived])
    }
}
