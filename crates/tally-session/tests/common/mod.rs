//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use bytes::Bytes;
use tally_session::{
    Context, Description, Participant, RoundMessage, RoundState, SessionOptions, SessionState,
};
use tally_types::{approve_payload, commit_payload, CandidateId, Ed25519Verifier, Hash256, Keypair};

/// A block header submitted by one source.
#[derive(Debug, Clone, Copy)]
pub struct TestBlock {
    pub src: u32,
    pub root_hash: Hash256,
    pub file_hash: Hash256,
    pub collated_data_hash: Hash256,
}

impl TestBlock {
    /// A distinct block for `src`, varied by `tag`.
    pub fn new(src: u32, tag: u8) -> Self {
        Self {
            src,
            root_hash: Hash256::compute(&[b'r', tag, src as u8]),
            file_hash: Hash256::compute(&[b'f', tag, src as u8]),
            collated_data_hash: Hash256::compute(&[b'c', tag, src as u8]),
        }
    }

    pub fn id(&self) -> CandidateId {
        CandidateId::derive(
            self.src,
            &self.root_hash,
            &self.file_hash,
            &self.collated_data_hash,
        )
    }

    pub fn submit(&self, round: u32) -> RoundMessage {
        RoundMessage::Submit {
            round,
            root_hash: self.root_hash,
            file_hash: self.file_hash,
            collated_data_hash: self.collated_data_hash,
        }
    }

    pub fn approve(&self, round: u32, signer: u32) -> RoundMessage {
        RoundMessage::Approve {
            round,
            candidate: self.id(),
            signature: approve_signature(signer, &self.root_hash, &self.file_hash),
        }
    }

    pub fn commit(&self, round: u32, signer: u32) -> RoundMessage {
        RoundMessage::Commit {
            round,
            candidate: self.id(),
            signature: commit_signature(signer, &self.root_hash, &self.file_hash),
        }
    }
}

/// Equally weighted participants whose keys derive from seeds `0..nodes`.
pub fn participants(nodes: u64) -> Vec<Participant> {
    (0..nodes)
        .map(|i| Participant::new(Keypair::from_seed(i).public_key(), format!("node-{i}"), 1))
        .collect()
}

pub fn context_with(nodes: u64, options: SessionOptions) -> Context {
    let desc = Description::new(participants(nodes), options, Ed25519Verifier::new())
        .expect("valid description");
    Context::new(desc)
}

pub fn context(nodes: u64) -> Context {
    context_with(nodes, SessionOptions::default())
}

pub fn approve_signature(signer: u32, root: &Hash256, file: &Hash256) -> Bytes {
    Bytes::from(Keypair::from_seed(u64::from(signer)).sign(&approve_payload(root, file)))
}

pub fn commit_signature(signer: u32, root: &Hash256, file: &Hash256) -> Bytes {
    Bytes::from(Keypair::from_seed(u64::from(signer)).sign(&commit_payload(root, file)))
}

pub fn approve_skip(round: u32) -> RoundMessage {
    RoundMessage::Approve {
        round,
        candidate: CandidateId::skip(),
        signature: Bytes::new(),
    }
}

pub fn commit_skip(round: u32) -> RoundMessage {
    RoundMessage::Commit {
        round,
        candidate: CandidateId::skip(),
        signature: Bytes::new(),
    }
}

pub fn vote(round: u32, attempt: u32, candidate: CandidateId) -> RoundMessage {
    RoundMessage::Vote {
        round,
        attempt,
        candidate,
    }
}

pub fn precommit(round: u32, attempt: u32, candidate: CandidateId) -> RoundMessage {
    RoundMessage::Precommit {
        round,
        attempt,
        candidate,
    }
}

/// Applies `(src, att, message)` events in order.
pub fn apply(
    ctx: &mut Context,
    mut state: tally_session::Handle<SessionState>,
    events: &[(u32, u32, RoundMessage)],
) -> tally_session::Handle<SessionState> {
    for (src, att, message) in events {
        state = SessionState::action(ctx, state, *src, *att, message).expect("action");
    }
    state
}

/// Every source replays its own votes and precommits for `att`, as if each
/// had acted on its view and broadcast the result, until nobody progresses.
pub fn every_source_acts(
    ctx: &mut Context,
    mut state: tally_session::Handle<SessionState>,
    att: u32,
) -> tally_session::Handle<SessionState> {
    let n = ctx.description().total_nodes();
    loop {
        let before = state;
        for src in 0..n {
            state = SessionState::make_all(ctx, state, src, att).expect("make_all");
        }
        if state == before {
            return state;
        }
    }
}

/// The current round of a session.
pub fn current_round(ctx: &Context, state: tally_session::Handle<SessionState>) -> RoundState {
    let current = ctx.get(state).expect("session").current;
    ctx.get(current).expect("round").clone()
}

/// Installs a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
