//! Candidate and signature value objects.
//!
//! - [`Signature`]: an opaque signature payload.
//! - [`SentBlock`]: the header of a submitted candidate.
//! - [`CandidateRef`]: a candidate id plus its header, absent for skip.
//! - [`BlockCandidate`]: a candidate and who approved it in the round.
//! - [`VoteCandidate`]: a candidate and who voted for it in an attempt.

use crate::arena::{Arena, ContentHasher, Element, Handle, Object};
use crate::context::Context;
use crate::error::{Result, SessionError};
use crate::persistent::{merge_optional, Keyed, PersistentBitset, PersistentVector};
use bytes::Bytes;
use tally_types::{CandidateId, Hash256};

/// Per-source optional signatures, indexed by participant.
pub type SignatureVector = PersistentVector<Option<Handle<Signature>>>;

/// An opaque signature payload.
///
/// Signatures are ordered by their bytes so that merging two different valid
/// signatures of the same fact is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    payload: Bytes,
}

impl Object for Signature {
    const KIND: &'static str = "signature";

    fn hash_fields(&self, hasher: &mut ContentHasher) {
        hasher.write_bytes(&self.payload);
    }

    fn promote_children(&self, _arena: &mut Arena) -> Result<Self> {
        Ok(self.clone())
    }
}

impl Signature {
    /// Interns a signature.
    pub fn create(ctx: &mut Context, payload: impl Into<Bytes>) -> Result<Handle<Self>> {
        ctx.arena.create(Self {
            payload: payload.into(),
        })
    }

    /// Returns the raw payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Keeps the lexicographically smaller payload.
    pub fn merge(ctx: &mut Context, left: Handle<Self>, right: Handle<Self>) -> Result<Handle<Self>> {
        if left == right {
            return Ok(left);
        }
        let l = &ctx.get(left)?.payload;
        let r = &ctx.get(right)?.payload;
        Ok(if l <= r { left } else { right })
    }
}

/// Interns an all-empty signature vector with one slot per participant.
pub fn empty_signatures(ctx: &mut Context) -> Result<Handle<SignatureVector>> {
    let n = ctx.desc.total_nodes() as usize;
    PersistentVector::create(ctx, vec![None; n])
}

/// Slot-wise signature merge.
pub fn merge_signatures(
    ctx: &mut Context,
    left: Handle<SignatureVector>,
    right: Handle<SignatureVector>,
) -> Result<Handle<SignatureVector>> {
    PersistentVector::merge(ctx, left, right, |ctx, a, b| {
        merge_optional(ctx, *a, *b, Signature::merge)
    })
}

/// Sources holding a signature in `vec`, in increasing order.
pub fn signers(ctx: &Context, vec: Handle<SignatureVector>) -> Result<Vec<u32>> {
    Ok(ctx
        .get(vec)?
        .iter()
        .enumerate()
        .filter_map(|(idx, sig)| sig.map(|_| idx as u32))
        .collect())
}

/// Returns true once the signers of `vec` reach the cutoff weight.
pub fn has_signature_quorum(ctx: &Context, vec: Handle<SignatureVector>) -> Result<bool> {
    let value = ctx.get(vec)?;
    let signers = value
        .iter()
        .enumerate()
        .filter_map(|(idx, sig)| sig.map(|_| idx as u32));
    Ok(ctx.desc.participants().has_quorum(signers))
}

/// Returns true if `src` holds a signature in `vec`.
pub fn is_signed_by(ctx: &Context, vec: Handle<SignatureVector>, src: u32) -> Result<bool> {
    Ok(matches!(ctx.get(vec)?.at(src as usize), Some(Some(_))))
}

/// The header of a submitted block candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentBlock {
    /// Producing source.
    pub src: u32,
    /// Root hash of the block.
    pub root_hash: Hash256,
    /// Hash of the block file.
    pub file_hash: Hash256,
    /// Hash of the collated data.
    pub collated_data_hash: Hash256,
    /// Derived candidate id.
    pub id: CandidateId,
}

impl Object for SentBlock {
    const KIND: &'static str = "sent_block";

    fn hash_fields(&self, hasher: &mut ContentHasher) {
        hasher.write_u32(self.src);
        hasher.write_bytes(self.root_hash.as_bytes());
        hasher.write_bytes(self.file_hash.as_bytes());
        hasher.write_bytes(self.collated_data_hash.as_bytes());
        hasher.write_bytes(self.id.as_bytes());
    }

    fn promote_children(&self, _arena: &mut Arena) -> Result<Self> {
        Ok(self.clone())
    }
}

impl SentBlock {
    /// Interns a header, deriving its candidate id.
    pub fn create(
        ctx: &mut Context,
        src: u32,
        root_hash: Hash256,
        file_hash: Hash256,
        collated_data_hash: Hash256,
    ) -> Result<Handle<Self>> {
        let id = ctx
            .desc
            .candidate_id(src, &root_hash, &file_hash, &collated_data_hash);
        ctx.arena.create(Self {
            src,
            root_hash,
            file_hash,
            collated_data_hash,
            id,
        })
    }

    /// Id of an optional header; `None` is the skip candidate.
    pub fn id_of(block: Option<&SentBlock>) -> CandidateId {
        block.map(|b| b.id).unwrap_or_else(CandidateId::skip)
    }
}

/// A candidate as referenced from round and attempt state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateRef {
    /// Candidate id.
    pub id: CandidateId,
    /// Header, `None` for the skip candidate.
    pub block: Option<Handle<SentBlock>>,
}

impl CandidateRef {
    /// The skip candidate.
    pub fn skip() -> Self {
        Self {
            id: CandidateId::skip(),
            block: None,
        }
    }

    /// References a submitted header.
    pub fn sent(ctx: &Context, block: Handle<SentBlock>) -> Result<Self> {
        Ok(Self {
            id: ctx.get(block)?.id,
            block: Some(block),
        })
    }

    /// Returns true for the skip candidate.
    pub fn is_skip(&self) -> bool {
        self.block.is_none()
    }

    /// Producing source, `None` for skip.
    pub fn src(&self, ctx: &Context) -> Result<Option<u32>> {
        self.block.map(|b| ctx.get(b).map(|s| s.src)).transpose()
    }
}

impl Element for CandidateRef {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        hasher.write_bytes(self.id.as_bytes());
        self.block.hash_into(hasher);
    }

    fn promote(&self, arena: &mut Arena) -> Result<Self> {
        Ok(Self {
            id: self.id,
            block: self.block.promote(arena)?,
        })
    }
}

/// A round-scoped candidate with its approvals.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockCandidate {
    /// The candidate.
    pub candidate: CandidateRef,
    /// Approve signatures, one slot per participant.
    pub approved_by: Handle<SignatureVector>,
}

impl Object for BlockCandidate {
    const KIND: &'static str = "block_candidate";

    fn hash_fields(&self, hasher: &mut ContentHasher) {
        self.candidate.hash_into(hasher);
        hasher.write_handle(&self.approved_by);
    }

    fn promote_children(&self, arena: &mut Arena) -> Result<Self> {
        Ok(Self {
            candidate: self.candidate.promote(arena)?,
            approved_by: arena.promote(self.approved_by)?,
        })
    }
}

impl Keyed for BlockCandidate {
    type Key = CandidateId;

    fn key(&self) -> CandidateId {
        self.candidate.id
    }
}

impl BlockCandidate {
    /// Interns a candidate nobody approved yet.
    pub fn create(ctx: &mut Context, candidate: CandidateRef) -> Result<Handle<Self>> {
        let approved_by = empty_signatures(ctx)?;
        ctx.arena.create(Self {
            candidate,
            approved_by,
        })
    }

    /// Records the approval of `src`.
    pub fn approve(
        ctx: &mut Context,
        entry: Handle<Self>,
        src: u32,
        signature: Handle<Signature>,
    ) -> Result<Handle<Self>> {
        let current = ctx.get(entry)?.clone();
        let approved_by =
            PersistentVector::change(ctx, current.approved_by, src as usize, Some(signature))?;
        ctx.arena.create_or_reuse(
            Self {
                approved_by,
                ..current
            },
            &[entry],
        )
    }

    /// Returns true once the approvers reach the cutoff weight.
    pub fn is_approved(ctx: &Context, entry: Handle<Self>) -> Result<bool> {
        has_signature_quorum(ctx, ctx.get(entry)?.approved_by)
    }

    /// Returns true if `src` approved this candidate.
    pub fn is_approved_by(ctx: &Context, entry: Handle<Self>, src: u32) -> Result<bool> {
        is_signed_by(ctx, ctx.get(entry)?.approved_by, src)
    }

    /// Unions the approvals of two records of the same candidate.
    pub fn merge(ctx: &mut Context, left: Handle<Self>, right: Handle<Self>) -> Result<Handle<Self>> {
        if left == right {
            return Ok(left);
        }
        let l = ctx.get(left)?.clone();
        let r = ctx.get(right)?.clone();
        if l.candidate.id != r.candidate.id {
            return Err(SessionError::Inconsistent(format!(
                "merging approvals of {} and {}",
                l.candidate.id, r.candidate.id
            )));
        }
        let approved_by = merge_signatures(ctx, l.approved_by, r.approved_by)?;
        ctx.arena.create_or_reuse(
            Self {
                candidate: l.candidate,
                approved_by,
            },
            &[left, right],
        )
    }
}

/// An attempt-scoped candidate with its votes.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteCandidate {
    /// The candidate.
    pub candidate: CandidateRef,
    /// Voters, one bit per participant.
    pub voted_by: Handle<PersistentBitset>,
}

impl Object for VoteCandidate {
    const KIND: &'static str = "vote_candidate";

    fn hash_fields(&self, hasher: &mut ContentHasher) {
        self.candidate.hash_into(hasher);
        hasher.write_handle(&self.voted_by);
    }

    fn promote_children(&self, arena: &mut Arena) -> Result<Self> {
        Ok(Self {
            candidate: self.candidate.promote(arena)?,
            voted_by: arena.promote(self.voted_by)?,
        })
    }
}

impl Keyed for VoteCandidate {
    type Key = CandidateId;

    fn key(&self) -> CandidateId {
        self.candidate.id
    }
}

impl VoteCandidate {
    /// Interns a candidate nobody voted for yet.
    pub fn create(ctx: &mut Context, candidate: CandidateRef) -> Result<Handle<Self>> {
        let n = ctx.desc.total_nodes();
        let voted_by = PersistentBitset::create(ctx, n)?;
        ctx.arena.create(Self {
            candidate,
            voted_by,
        })
    }

    /// Records the vote of `src`.
    pub fn vote(ctx: &mut Context, entry: Handle<Self>, src: u32) -> Result<Handle<Self>> {
        let current = ctx.get(entry)?.clone();
        let voted_by = PersistentBitset::change(ctx, current.voted_by, src, true)?;
        ctx.arena.create_or_reuse(
            Self {
                voted_by,
                ..current
            },
            &[entry],
        )
    }

    /// Returns true once the voters reach the cutoff weight.
    pub fn is_voted(ctx: &Context, entry: Handle<Self>) -> Result<bool> {
        let voters = ctx.get(ctx.get(entry)?.voted_by)?;
        Ok(ctx.desc.participants().has_quorum(voters.iter_set()))
    }

    /// Returns true if `src` voted for this candidate.
    pub fn is_voted_by(ctx: &Context, entry: Handle<Self>, src: u32) -> Result<bool> {
        Ok(ctx.get(ctx.get(entry)?.voted_by)?.get(src))
    }

    /// Unions the votes of two records of the same candidate.
    pub fn merge(ctx: &mut Context, left: Handle<Self>, right: Handle<Self>) -> Result<Handle<Self>> {
        if left == right {
            return Ok(left);
        }
        let l = ctx.get(left)?.clone();
        let r = ctx.get(right)?.clone();
        if l.candidate.id != r.candidate.id {
            return Err(SessionError::Inconsistent(format!(
                "merging votes of {} and {}",
                l.candidate.id, r.candidate.id
            )));
        }
        let voted_by = PersistentBitset::merge(ctx, l.voted_by, r.voted_by)?;
        ctx.arena.create_or_reuse(
            Self {
                candidate: l.candidate,
                voted_by,
            },
            &[left, right],
        )
    }
}
