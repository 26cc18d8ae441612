//! Fixtures shared by the unit tests.

use crate::context::Context;
use crate::description::Description;
use crate::options::SessionOptions;
use crate::participant::Participant;
use bytes::Bytes;
use tally_types::{approve_payload, Ed25519Verifier, Hash256, Keypair};

pub(crate) fn test_context(nodes: u64) -> Context {
    let participants = (0..nodes)
        .map(|i| Participant::new(Keypair::from_seed(i).public_key(), format!("node-{i}"), 1))
        .collect();
    let desc = Description::new(participants, SessionOptions::default(), Ed25519Verifier::new())
        .expect("valid test description");
    Context::new(desc)
}

pub(crate) fn approve_signature(src: u64, root: &Hash256, file: &Hash256) -> Bytes {
    Bytes::from(Keypair::from_seed(src).sign(&approve_payload(root, file)))
}

