//! Round state machine.
//!
//! A round collects submitted candidates and their approvals, runs attempts
//! until one of them precommits a block, and gathers commit signatures on
//! that block. The owning session archives the round once the commit
//! signatures reach the cutoff weight.
//!
//! Two fields are derived from the attempts rather than merged directly:
//! the precommitted block (the vote-quorum block of the lowest attempt that
//! holds precommit quorum) and the per-source precommit pins. Recomputing
//! them from the attempt union after every action and merge keeps the merge
//! commutative and associative.

use crate::arena::{Arena, ContentHasher, Element, Handle, Object};
use crate::attempt::AttemptState;
use crate::candidate::{
    empty_signatures, has_signature_quorum, is_signed_by, merge_signatures, BlockCandidate,
    CandidateRef, SentBlock, Signature, SignatureVector,
};
use crate::context::Context;
use crate::error::{Result, SessionError};
use crate::message::RoundMessage;
use crate::persistent::{merge_markers, PersistentSortedVector, PersistentVector};
use bytes::Bytes;
use tally_types::{CandidateId, Hash256};
use tracing::{debug, info, warn};

/// Per-source optional attempt numbers.
pub type AttemptMarkers = PersistentVector<Option<u32>>;

/// State of the round currently being decided.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundState {
    /// Round number.
    pub seqno: u32,
    /// The block the round precommitted, once some attempt got there.
    pub precommitted_block: Option<CandidateRef>,
    /// First attempt in which each source acted in this round.
    pub first_attempt: Handle<AttemptMarkers>,
    /// Latest attempt in which each source precommitted, unless superseded.
    pub last_precommit: Handle<AttemptMarkers>,
    /// Submitted candidates (plus skip once approved) with their approvals.
    pub sent_blocks: Handle<PersistentSortedVector<BlockCandidate>>,
    /// Commit signatures on the precommitted block.
    pub signatures: Handle<SignatureVector>,
    /// Attempts in which at least one message was accepted.
    pub attempts: Handle<PersistentSortedVector<AttemptState>>,
}

impl Object for RoundState {
    const KIND: &'static str = "round";

    fn hash_fields(&self, hasher: &mut ContentHasher) {
        hasher.write_u32(self.seqno);
        self.precommitted_block.hash_into(hasher);
        hasher.write_handle(&self.first_attempt);
        hasher.write_handle(&self.last_precommit);
        hasher.write_handle(&self.sent_blocks);
        hasher.write_handle(&self.signatures);
        hasher.write_handle(&self.attempts);
    }

    fn promote_children(&self, arena: &mut Arena) -> Result<Self> {
        Ok(Self {
            seqno: self.seqno,
            precommitted_block: self.precommitted_block.promote(arena)?,
            first_attempt: arena.promote(self.first_attempt)?,
            last_precommit: arena.promote(self.last_precommit)?,
            sent_blocks: arena.promote(self.sent_blocks)?,
            signatures: arena.promote(self.signatures)?,
            attempts: arena.promote(self.attempts)?,
        })
    }
}

/// Per-attempt facts the derived fields are computed from.
struct AttemptSummary {
    seqno: u32,
    voted: Option<CandidateRef>,
    precommit_quorum: bool,
}

impl RoundState {
    /// Interns a fresh round.
    pub fn create(ctx: &mut Context, seqno: u32) -> Result<Handle<Self>> {
        let n = ctx.desc.total_nodes() as usize;
        let markers = PersistentVector::create(ctx, vec![None; n])?;
        let sent_blocks = PersistentSortedVector::empty(ctx)?;
        let signatures = empty_signatures(ctx)?;
        let attempts = PersistentSortedVector::empty(ctx)?;
        ctx.arena.create(Self {
            seqno,
            precommitted_block: None,
            first_attempt: markers,
            last_precommit: markers,
            sent_blocks,
            signatures,
            attempts,
        })
    }

    /// The attempt with number `att`, if anything happened in it.
    pub fn attempt(&self, ctx: &Context, att: u32) -> Result<Option<Handle<AttemptState>>> {
        PersistentSortedVector::get(ctx, self.attempts, att)
    }

    /// The candidate with id `id` if it holds approval quorum.
    pub fn approved_candidate(&self, ctx: &Context, id: CandidateId) -> Result<Option<CandidateRef>> {
        let Some(entry) = PersistentSortedVector::get(ctx, self.sent_blocks, id)? else {
            return Ok(None);
        };
        if !BlockCandidate::is_approved(ctx, entry)? {
            return Ok(None);
        }
        Ok(Some(ctx.get(entry)?.candidate))
    }

    /// Every approved candidate, ordered by id.
    pub fn approved_candidates(&self, ctx: &Context) -> Result<Vec<CandidateRef>> {
        let mut approved = Vec::new();
        for (_, entry) in ctx.get(self.sent_blocks)?.iter() {
            if BlockCandidate::is_approved(ctx, entry)? {
                approved.push(ctx.get(entry)?.candidate);
            }
        }
        Ok(approved)
    }

    /// The best-ranked approved candidate; skip ranks last, ties go to the
    /// smaller id.
    pub fn best_approved_candidate(&self, ctx: &Context) -> Result<Option<CandidateRef>> {
        let mut best: Option<(u32, CandidateRef)> = None;
        for candidate in self.approved_candidates(ctx)? {
            let Some(rank) = ctx.desc.candidate_rank(candidate.src(ctx)?, self.seqno) else {
                continue;
            };
            if best.map_or(true, |(r, c)| (rank, candidate.id) < (r, c.id)) {
                best = Some((rank, candidate));
            }
        }
        Ok(best.map(|(_, c)| c))
    }

    /// First attempt in which `src` acted in this round.
    pub fn first_attempt_of(&self, ctx: &Context, src: u32) -> Result<Option<u32>> {
        Ok(ctx.get(self.first_attempt)?.at(src as usize).copied().flatten())
    }

    /// Attempt of the pin left by the latest precommit of `src`.
    pub fn last_precommit_of(&self, ctx: &Context, src: u32) -> Result<Option<u32>> {
        Ok(ctx.get(self.last_precommit)?.at(src as usize).copied().flatten())
    }

    /// Returns true if `src` is past its fast-mode budget in attempt `att`.
    pub fn is_slow_mode(&self, ctx: &Context, src: u32, att: u32) -> Result<bool> {
        let first = self.first_attempt_of(ctx, src)?;
        Ok(ctx.desc.is_slow_mode(first, att))
    }

    /// The block `src` pinned itself to by precommitting it.
    pub fn precommit_pin(&self, ctx: &Context, src: u32) -> Result<Option<CandidateRef>> {
        let Some(att) = self.last_precommit_of(ctx, src)? else {
            return Ok(None);
        };
        match self.attempt(ctx, att)? {
            Some(attempt) => AttemptState::voted_block(ctx, attempt),
            None => Ok(None),
        }
    }

    /// The vote-quorum block of the latest attempt up to `att` that has one.
    pub fn latest_voted_block(&self, ctx: &Context, att: u32) -> Result<Option<CandidateRef>> {
        for (seqno, attempt) in ctx.get(self.attempts)?.iter().rev() {
            if seqno > att {
                continue;
            }
            if let Some(voted) = AttemptState::voted_block(ctx, attempt)? {
                return Ok(Some(voted));
            }
        }
        Ok(None)
    }

    /// Returns true if `src` approved any non-skip candidate other than `id`.
    fn approved_other(&self, ctx: &Context, src: u32, id: CandidateId) -> Result<bool> {
        for (key, entry) in ctx.get(self.sent_blocks)?.iter() {
            if key.is_skip() || key == id {
                continue;
            }
            if BlockCandidate::is_approved_by(ctx, entry, src)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns true once the round precommitted and its commit signatures
    /// reach the cutoff weight.
    pub fn is_signed(ctx: &Context, round: Handle<Self>) -> Result<bool> {
        let state = ctx.get(round)?;
        Ok(state.precommitted_block.is_some() && has_signature_quorum(ctx, state.signatures)?)
    }

    /// Applies a message of this round from `src`.
    ///
    /// Rejected messages are logged and return `round` itself.
    pub fn action(
        ctx: &mut Context,
        round: Handle<Self>,
        src: u32,
        att: u32,
        message: &RoundMessage,
    ) -> Result<Handle<Self>> {
        let state = ctx.get(round)?.clone();
        if src >= ctx.desc.total_nodes() {
            warn!(src, round = state.seqno, kind = message.kind(), "message from unknown source");
            return Ok(round);
        }
        if message.round() != state.seqno {
            warn!(
                src,
                round = state.seqno,
                message_round = message.round(),
                kind = message.kind(),
                "message for another round"
            );
            return Ok(round);
        }

        let next = match message {
            RoundMessage::Submit {
                root_hash,
                file_hash,
                collated_data_hash,
                ..
            } => state.on_submit(ctx, src, *root_hash, *file_hash, *collated_data_hash)?,
            RoundMessage::Approve {
                candidate,
                signature,
                ..
            } => state.on_approve(ctx, src, *candidate, signature)?,
            RoundMessage::Reject {
                candidate, reason, ..
            } => {
                info!(
                    src,
                    round = state.seqno,
                    %candidate,
                    reason = %String::from_utf8_lossy(reason),
                    "candidate rejected"
                );
                Some(state.clone())
            }
            RoundMessage::Commit {
                candidate,
                signature,
                ..
            } => state.on_commit(ctx, src, *candidate, signature)?,
            RoundMessage::Vote { attempt, .. }
            | RoundMessage::VoteFor { attempt, .. }
            | RoundMessage::Precommit { attempt, .. }
            | RoundMessage::Empty { attempt, .. } => {
                if *attempt != att {
                    warn!(
                        src,
                        round = state.seqno,
                        attempt = att,
                        message_attempt = *attempt,
                        kind = message.kind(),
                        "message for another attempt"
                    );
                    None
                } else {
                    state.on_attempt_message(ctx, src, att, message)?
                }
            }
        };

        let Some(mut next) = next else {
            return Ok(round);
        };
        let first = next.first_attempt_of(ctx, src)?;
        if first.map_or(true, |f| att < f) {
            next.first_attempt =
                PersistentVector::change(ctx, next.first_attempt, src as usize, Some(att))?;
        }
        ctx.arena.create_or_reuse(next, &[round])
    }

    fn on_submit(
        &self,
        ctx: &mut Context,
        src: u32,
        root_hash: Hash256,
        file_hash: Hash256,
        collated_data_hash: Hash256,
    ) -> Result<Option<Self>> {
        if ctx.desc.node_priority(src, self.seqno).is_none() {
            warn!(src, round = self.seqno, "submit from a source without priority");
            return Ok(None);
        }
        for (_, entry) in ctx.get(self.sent_blocks)?.iter() {
            if ctx.get(entry)?.candidate.src(ctx)? == Some(src) {
                warn!(src, round = self.seqno, "duplicate submit");
                return Ok(None);
            }
        }
        let block = SentBlock::create(ctx, src, root_hash, file_hash, collated_data_hash)?;
        let candidate = CandidateRef::sent(ctx, block)?;
        if PersistentSortedVector::get(ctx, self.sent_blocks, candidate.id)?.is_some() {
            warn!(src, round = self.seqno, candidate = %candidate.id, "candidate already submitted");
            return Ok(None);
        }
        let entry = BlockCandidate::create(ctx, candidate)?;
        let sent_blocks = PersistentSortedVector::push(ctx, self.sent_blocks, entry)?;
        debug!(src, round = self.seqno, candidate = %candidate.id, "candidate submitted");
        Ok(Some(Self {
            sent_blocks,
            ..self.clone()
        }))
    }

    fn on_approve(
        &self,
        ctx: &mut Context,
        src: u32,
        candidate: CandidateId,
        signature: &Bytes,
    ) -> Result<Option<Self>> {
        let existing = PersistentSortedVector::get(ctx, self.sent_blocks, candidate)?;
        let entry = match (existing, candidate.is_skip()) {
            (Some(entry), _) => entry,
            (None, true) => BlockCandidate::create(ctx, CandidateRef::skip())?,
            (None, false) => {
                warn!(src, round = self.seqno, %candidate, "approve of unknown candidate");
                return Ok(None);
            }
        };
        if BlockCandidate::is_approved_by(ctx, entry, src)? {
            warn!(src, round = self.seqno, %candidate, "duplicate approve");
            return Ok(None);
        }
        if !candidate.is_skip() && self.approved_other(ctx, src, candidate)? {
            warn!(src, round = self.seqno, %candidate, "source already approved another candidate");
            return Ok(None);
        }
        if let Some(block) = ctx.get(entry)?.candidate.block {
            let header = ctx.get(block)?;
            if let Err(err) = ctx.desc.check_approve_signature(
                &header.root_hash,
                &header.file_hash,
                src,
                signature,
            ) {
                warn!(src, round = self.seqno, %candidate, %err, "bad approve signature");
                return Ok(None);
            }
        }
        let sig = Signature::create(ctx, signature.clone())?;
        let entry = BlockCandidate::approve(ctx, entry, src, sig)?;
        if BlockCandidate::is_approved(ctx, entry)? {
            debug!(round = self.seqno, %candidate, "approval quorum");
        }
        let sent_blocks = PersistentSortedVector::push(ctx, self.sent_blocks, entry)?;
        Ok(Some(Self {
            sent_blocks,
            ..self.clone()
        }))
    }

    fn on_commit(
        &self,
        ctx: &mut Context,
        src: u32,
        candidate: CandidateId,
        signature: &Bytes,
    ) -> Result<Option<Self>> {
        let Some(block) = self.precommitted_block else {
            warn!(src, round = self.seqno, %candidate, "commit before precommit");
            return Ok(None);
        };
        if block.id != candidate {
            warn!(
                src,
                round = self.seqno,
                %candidate,
                precommitted = %block.id,
                "commit of a block other than the precommitted one"
            );
            return Ok(None);
        }
        if is_signed_by(ctx, self.signatures, src)? {
            warn!(src, round = self.seqno, %candidate, "duplicate commit");
            return Ok(None);
        }
        if let Some(header) = block.block {
            let header = ctx.get(header)?;
            if let Err(err) = ctx.desc.check_commit_signature(
                &header.root_hash,
                &header.file_hash,
                src,
                signature,
            ) {
                warn!(src, round = self.seqno, %candidate, %err, "bad commit signature");
                return Ok(None);
            }
        }
        let sig = Signature::create(ctx, signature.clone())?;
        let signatures = PersistentVector::change(ctx, self.signatures, src as usize, Some(sig))?;
        if has_signature_quorum(ctx, signatures)? {
            info!(round = self.seqno, %candidate, "commit quorum");
        }
        Ok(Some(Self {
            signatures,
            ..self.clone()
        }))
    }

    fn on_attempt_message(
        &self,
        ctx: &mut Context,
        src: u32,
        att: u32,
        message: &RoundMessage,
    ) -> Result<Option<Self>> {
        let attempt = match self.attempt(ctx, att)? {
            Some(attempt) => attempt,
            None => AttemptState::create(ctx, att)?,
        };
        let Some(updated) = AttemptState::action(ctx, attempt, self, src, message)? else {
            return Ok(None);
        };
        if updated == attempt {
            return Ok(Some(self.clone()));
        }
        let attempts = PersistentSortedVector::push(ctx, self.attempts, updated)?;
        let next = Self {
            attempts,
            ..self.clone()
        };
        next.settle(ctx).map(Some)
    }

    fn summarize(&self, ctx: &Context) -> Result<Vec<AttemptSummary>> {
        let mut summary = Vec::new();
        for (seqno, attempt) in ctx.get(self.attempts)?.iter() {
            let voted = AttemptState::voted_block(ctx, attempt)?;
            let precommit_quorum =
                voted.is_some() && AttemptState::has_precommit_quorum(ctx, attempt)?;
            summary.push(AttemptSummary {
                seqno,
                voted,
                precommit_quorum,
            });
        }
        Ok(summary)
    }

    /// Recomputes the precommitted block and the precommit pins.
    ///
    /// The pin of a source is the latest attempt it precommitted in. It is
    /// cleared when some attempt at or after it holds precommit quorum on a
    /// different block.
    fn settle(mut self, ctx: &mut Context) -> Result<Self> {
        let summary = self.summarize(ctx)?;

        let precommitted = summary
            .iter()
            .find(|s| s.precommit_quorum)
            .and_then(|s| s.voted);
        if let Some(block) = precommitted {
            for s in summary.iter().filter(|s| s.precommit_quorum) {
                if s.voted.map(|v| v.id) != Some(block.id) {
                    warn!(
                        round = self.seqno,
                        attempt = s.seqno,
                        precommitted = %block.id,
                        "conflicting precommit quorum ignored"
                    );
                }
            }
        }
        match (self.precommitted_block, precommitted) {
            (Some(old), Some(new)) if old.id == new.id => {}
            (_, new) => {
                if let Some(block) = new {
                    info!(round = self.seqno, candidate = %block.id, "round precommitted");
                }
                self.precommitted_block = new;
            }
        }

        let n = ctx.desc.total_nodes();
        let mut pins = vec![None; n as usize];
        for (src, pin) in pins.iter_mut().enumerate() {
            let src = src as u32;
            let mut latest = None;
            for (seqno, attempt) in ctx.get(self.attempts)?.iter() {
                if AttemptState::has_precommitted(ctx, attempt, src)? {
                    latest = Some(seqno);
                }
            }
            let Some(p) = latest else {
                continue;
            };
            let pinned = summary
                .iter()
                .find(|s| s.seqno == p)
                .and_then(|s| s.voted)
                .map(|v| v.id);
            let superseded = summary
                .iter()
                .any(|s| s.seqno >= p && s.precommit_quorum && s.voted.map(|v| v.id) != pinned);
            if superseded {
                debug!(src, round = self.seqno, attempt = p, "precommit pin cleared");
            } else {
                *pin = Some(p);
            }
        }
        let current: Vec<Option<u32>> = ctx.get(self.last_precommit)?.iter().copied().collect();
        if current != pins {
            self.last_precommit = PersistentVector::create(ctx, pins)?;
        }
        Ok(self)
    }

    /// Unions two views of the same round.
    pub fn merge(ctx: &mut Context, left: Handle<Self>, right: Handle<Self>) -> Result<Handle<Self>> {
        if left == right {
            return Ok(left);
        }
        let l = ctx.get(left)?.clone();
        let r = ctx.get(right)?.clone();
        if l.seqno != r.seqno {
            return Err(SessionError::Inconsistent(format!(
                "merging rounds {} and {}",
                l.seqno, r.seqno
            )));
        }
        let first_attempt = merge_markers(ctx, l.first_attempt, r.first_attempt, u32::min)?;
        let sent_blocks =
            PersistentSortedVector::merge(ctx, l.sent_blocks, r.sent_blocks, BlockCandidate::merge)?;
        let signatures = merge_signatures(ctx, l.signatures, r.signatures)?;
        let attempts = PersistentSortedVector::merge(ctx, l.attempts, r.attempts, AttemptState::merge)?;
        let merged = Self {
            seqno: l.seqno,
            precommitted_block: l.precommitted_block.or(r.precommitted_block),
            first_attempt,
            last_precommit: l.last_precommit,
            sent_blocks,
            signatures,
            attempts,
        }
        .settle(ctx)?;
        ctx.arena.create_or_reuse(merged, &[left, right])
    }

    /// What `src` should say next in attempt `att`.
    pub fn create_action(ctx: &Context, round: Handle<Self>, src: u32, att: u32) -> Result<RoundMessage> {
        let state = ctx.get(round)?.clone();
        let attempt = state.attempt(ctx, att)?;
        AttemptState::create_action(ctx, attempt, &state, src, att)
    }

    /// The candidate `src` should vote for in attempt `att`.
    pub fn choose_block_to_vote(
        ctx: &Context,
        round: Handle<Self>,
        src: u32,
        att: u32,
    ) -> Result<Option<CandidateRef>> {
        let state = ctx.get(round)?.clone();
        let attempt = state.attempt(ctx, att)?;
        AttemptState::choose_block_to_vote(ctx, attempt, &state, src, att)
    }

    /// The block `src` should sign a commit for, if any.
    pub fn choose_block_to_sign(ctx: &Context, round: Handle<Self>, src: u32) -> Result<Option<CandidateRef>> {
        let state = ctx.get(round)?;
        match state.precommitted_block {
            Some(block) if !is_signed_by(ctx, state.signatures, src)? => Ok(Some(block)),
            _ => Ok(None),
        }
    }

    /// Candidates `src` should validate and approve, best first.
    ///
    /// Submitted candidates are listed until `src` approved one of them; the
    /// skip candidate comes last unless `src` already approved it.
    pub fn choose_blocks_to_approve(
        ctx: &Context,
        round: Handle<Self>,
        src: u32,
    ) -> Result<Vec<CandidateRef>> {
        let state = ctx.get(round)?;
        let mut ranked = Vec::new();
        let mut approved_skip = false;
        let mut approved_block = false;
        for (id, entry) in ctx.get(state.sent_blocks)?.iter() {
            let approved = BlockCandidate::is_approved_by(ctx, entry, src)?;
            if id.is_skip() {
                approved_skip = approved;
                continue;
            }
            if approved {
                approved_block = true;
                continue;
            }
            let candidate = ctx.get(entry)?.candidate;
            if let Some(rank) = ctx.desc.candidate_rank(candidate.src(ctx)?, state.seqno) {
                ranked.push((rank, candidate));
            }
        }
        let mut out = Vec::with_capacity(ranked.len() + 1);
        if !approved_block {
            ranked.sort_by_key(|(rank, c)| (*rank, c.id));
            out.extend(ranked.into_iter().map(|(_, c)| c));
        }
        if !approved_skip {
            out.push(CandidateRef::skip());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{approve_signature, test_context};

    fn submit(round: u32, tag: &[u8]) -> RoundMessage {
        RoundMessage::Submit {
            round,
            root_hash: Hash256::compute(tag),
            file_hash: Hash256::compute(b"file"),
            collated_data_hash: Hash256::compute(b"collated"),
        }
    }

    fn submitted_id(src: u32, tag: &[u8]) -> CandidateId {
        CandidateId::derive(
            src,
            &Hash256::compute(tag),
            &Hash256::compute(b"file"),
            &Hash256::compute(b"collated"),
        )
    }

    #[test]
    fn test_submit_requires_priority() {
        let mut ctx = test_context(4);
        let round = RoundState::create(&mut ctx, 0).unwrap();
        // Round-robin with 3 candidates: source 3 has no slot in round 0.
        assert_eq!(RoundState::action(&mut ctx, round, 3, 0, &submit(0, b"a")).unwrap(), round);
        let next = RoundState::action(&mut ctx, round, 0, 0, &submit(0, b"a")).unwrap();
        assert_ne!(next, round);
    }

    #[test]
    fn test_second_submit_rejected() {
        let mut ctx = test_context(4);
        let round = RoundState::create(&mut ctx, 0).unwrap();
        let round = RoundState::action(&mut ctx, round, 1, 0, &submit(0, b"a")).unwrap();
        let again = RoundState::action(&mut ctx, round, 1, 0, &submit(0, b"b")).unwrap();
        assert_eq!(again, round);
    }

    #[test]
    fn test_approve_checks_signature() {
        let mut ctx = test_context(4);
        let round = RoundState::create(&mut ctx, 0).unwrap();
        let round = RoundState::action(&mut ctx, round, 0, 0, &submit(0, b"a")).unwrap();
        let id = submitted_id(0, b"a");

        let forged = RoundMessage::Approve {
            round: 0,
            candidate: id,
            signature: Bytes::from(vec![0u8; 64]),
        };
        assert_eq!(RoundState::action(&mut ctx, round, 1, 0, &forged).unwrap(), round);

        let valid = RoundMessage::Approve {
            round: 0,
            candidate: id,
            signature: approve_signature(1, &Hash256::compute(b"a"), &Hash256::compute(b"file")),
        };
        let approved = RoundState::action(&mut ctx, round, 1, 0, &valid).unwrap();
        assert_ne!(approved, round);
        assert_eq!(RoundState::action(&mut ctx, approved, 1, 0, &valid).unwrap(), approved);
    }

    #[test]
    fn test_skip_approval_creates_candidate() {
        let mut ctx = test_context(4);
        let round = RoundState::create(&mut ctx, 0).unwrap();
        let skip = RoundMessage::Approve {
            round: 0,
            candidate: CandidateId::skip(),
            signature: Bytes::new(),
        };
        let mut state = round;
        for src in 0..3 {
            state = RoundState::action(&mut ctx, state, src, 0, &skip).unwrap();
        }
        let value = ctx.get(state).unwrap().clone();
        assert_eq!(
            value.approved_candidate(&ctx, CandidateId::skip()).unwrap(),
            Some(CandidateRef::skip())
        );
        assert_eq!(value.first_attempt_of(&ctx, 2).unwrap(), Some(0));
        assert_eq!(value.first_attempt_of(&ctx, 3).unwrap(), None);
    }

    #[test]
    fn test_commit_requires_precommit() {
        let mut ctx = test_context(4);
        let round = RoundState::create(&mut ctx, 0).unwrap();
        let commit = RoundMessage::Commit {
            round: 0,
            candidate: CandidateId::skip(),
            signature: Bytes::new(),
        };
        assert_eq!(RoundState::action(&mut ctx, round, 0, 0, &commit).unwrap(), round);
    }

    #[test]
    fn test_attempt_mismatch_rejected() {
        let mut ctx = test_context(4);
        let round = RoundState::create(&mut ctx, 0).unwrap();
        let empty = RoundMessage::Empty {
            round: 0,
            attempt: 5,
        };
        assert_eq!(RoundState::action(&mut ctx, round, 0, 4, &empty).unwrap(), round);
        let recorded = RoundState::action(&mut ctx, round, 0, 5, &empty).unwrap();
        assert_eq!(ctx.get(recorded).unwrap().first_attempt_of(&ctx, 0).unwrap(), Some(5));
    }

    #[test]
    fn test_blocks_to_approve_order() {
        let mut ctx = test_context(4);
        let round = RoundState::create(&mut ctx, 0).unwrap();
        let round = RoundState::action(&mut ctx, round, 2, 0, &submit(0, b"c")).unwrap();
        let round = RoundState::action(&mut ctx, round, 0, 0, &submit(0, b"a")).unwrap();
        let list = RoundState::choose_blocks_to_approve(&ctx, round, 3).unwrap();
        let ids: Vec<CandidateId> = list.iter().map(|c| c.id).collect();
        assert_eq!(
            ids,
            vec![submitted_id(0, b"a"), submitted_id(2, b"c"), CandidateId::skip()]
        );
    }

    #[test]
    fn test_merge_rejects_different_rounds() {
        let mut ctx = test_context(4);
        let a = RoundState::create(&mut ctx, 0).unwrap();
        let b = RoundState::create(&mut ctx, 1).unwrap();
        assert!(matches!(
            RoundState::merge(&mut ctx, a, b),
            Err(SessionError::Inconsistent(_))
        ));
        assert_eq!(RoundState::merge(&mut ctx, a, a).unwrap(), a);
    }
}
