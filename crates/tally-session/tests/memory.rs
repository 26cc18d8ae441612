//! Arena lifetime tests: checkpoints, stale handles and sharing.

mod common;

use common::*;
use tally_session::{Region, SessionError, SessionState};

#[test]
fn test_checkpoint_invalidates_scratch_handles() {
    let mut ctx = context(4);
    let state = SessionState::create(&mut ctx).unwrap();
    let scratch = SessionState::action(&mut ctx, state, 0, 0, &approve_skip(0)).unwrap();
    assert_eq!(scratch.region(), Region::Scratch);

    let durable = ctx.checkpoint(scratch).unwrap();
    assert!(durable.is_durable());
    assert_eq!(durable.content_hash(), scratch.content_hash());
    assert!(matches!(
        ctx.get(scratch),
        Err(SessionError::StaleHandle { kind: "session" })
    ));

    let stats = ctx.stats();
    assert_eq!(stats.scratch_objects, 0);
    assert!(stats.durable_objects > 0);
}

#[test]
fn test_durable_state_keeps_working() {
    let mut ctx = context(4);
    let mut state = ctx.step(SessionState::create).unwrap();
    for src in 0..4 {
        state = ctx
            .step(|ctx| SessionState::action(ctx, state, src, 0, &approve_skip(0)))
            .unwrap();
    }
    for _ in 0..2 {
        for src in 0..4 {
            state = ctx.step(|ctx| SessionState::make_all(ctx, state, src, 0)).unwrap();
        }
    }
    for src in 0..3 {
        state = ctx
            .step(|ctx| SessionState::action(ctx, state, src, 0, &commit_skip(0)))
            .unwrap();
    }
    assert!(state.is_durable());
    assert_eq!(SessionState::current_round_seqno(&ctx, state).unwrap(), 1);
    assert!(SessionState::get_committed_block(&ctx, state, 0)
        .unwrap()
        .unwrap()
        .is_skip());
}

#[test]
fn test_checkpoint_of_durable_root_is_identity() {
    let mut ctx = context(4);
    let state = ctx.step(SessionState::create).unwrap();
    let epoch = ctx.stats().scratch_epoch;
    assert_eq!(ctx.checkpoint(state).unwrap(), state);
    assert_eq!(ctx.stats().scratch_epoch, epoch + 1);
}

#[test]
fn test_equal_states_share_one_object() {
    let mut ctx = context(4);
    let a = SessionState::create(&mut ctx).unwrap();
    let b = SessionState::create(&mut ctx).unwrap();
    assert_eq!(a, b);

    let a = SessionState::action(&mut ctx, a, 2, 0, &approve_skip(0)).unwrap();
    let b = SessionState::action(&mut ctx, b, 2, 0, &approve_skip(0)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_promotion_shares_common_subgraphs() {
    let mut ctx = context(4);
    let base = ctx.step(SessionState::create).unwrap();
    let before = ctx.stats().durable_objects;

    let one = SessionState::action(&mut ctx, base, 0, 0, &approve_skip(0)).unwrap();
    let one = ctx.checkpoint(one).unwrap();
    let after_one = ctx.stats().durable_objects;

    // Diverges from `one` in a single approval.
    let two = SessionState::action(&mut ctx, base, 1, 0, &approve_skip(0)).unwrap();
    let two = ctx.checkpoint(two).unwrap();
    let after_two = ctx.stats().durable_objects;

    assert_ne!(one, two);
    assert!(after_two - after_one <= after_one - before);

    // Rebuilding `one` from the same events lands on the durable original.
    let again = SessionState::action(&mut ctx, base, 0, 0, &approve_skip(0)).unwrap();
    let again = ctx.checkpoint(again).unwrap();
    assert_eq!(again, one);
    assert_eq!(ctx.stats().durable_objects, after_two);
}

#[test]
fn test_failed_step_leaves_durable_state_intact() {
    let mut ctx = context(4);
    let state = ctx.step(SessionState::create).unwrap();
    let result = ctx.step(|ctx| -> tally_session::Result<tally_session::Handle<SessionState>> {
        let _ = SessionState::action(ctx, state, 0, 0, &approve_skip(0))?;
        Err(SessionError::Inconsistent("abort".into()))
    });
    assert!(result.is_err());
    assert_eq!(SessionState::current_round_seqno(&ctx, state).unwrap(), 0);
}
