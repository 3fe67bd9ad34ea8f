// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Randomized exercise of the client FSM: external events arrive in
//! arbitrary interleavings and every observed state must keep the deal
//! accounting invariants.

use fvm_shared::econ::TokenAmount;
use num_traits::Zero;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use fil_retrieval_client::testing::check_client_state_invariants;
use fil_retrieval_client::{apply_client_event, handle_client_deal, ClientDealState, ClientEvent};
use fil_retrieval_runtime::{MessageAccumulator, TestContext};
use fil_retrieval_shared::DealStatus;

use harness::*;

/// Snapshot of the monotone counters of a client deal.
#[derive(Clone)]
struct Monotone {
    current_interval: u64,
    bytes_paid_for: u64,
    total_received: u64,
    funds_spent: TokenAmount,
}

impl Monotone {
    fn of(state: &ClientDealState) -> Self {
        Self {
            current_interval: state.current_interval,
            bytes_paid_for: state.bytes_paid_for,
            total_received: state.total_received,
            funds_spent: state.funds_spent.clone(),
        }
    }

    fn check_advance(&self, next: &Monotone, acc: &MessageAccumulator) {
        acc.require(next.current_interval >= self.current_interval, "interval went backwards");
        acc.require(next.bytes_paid_for >= self.bytes_paid_for, "bytes paid for went backwards");
        acc.require(next.total_received >= self.total_received, "total received went backwards");
        acc.require(next.funds_spent >= self.funds_spent, "funds spent went backwards");
    }
}

fn random_external_event(rng: &mut ChaCha8Rng, state: &ClientDealState) -> ClientEvent {
    match rng.gen_range(0..6) {
        0 => {
            let delta = rng.gen_range(0..2000u64);
            ClientEvent::BlocksReceived { total: state.total_received + delta }
        }
        1 => {
            // a demand somewhere around what is actually owed, sometimes
            // over, sometimes under
            let owed = state.amount_owed();
            let jitter = TokenAmount::from_atto(rng.gen_range(0..400_000i64));
            let owed = if rng.gen_bool(0.3) { owed + jitter } else { owed };
            ClientEvent::PaymentRequested { owed }
        }
        2 => ClientEvent::LastPaymentRequested { owed: state.amount_owed() },
        3 => ClientEvent::AllBlocksReceived,
        4 => ClientEvent::Complete,
        _ => {
            let delta = rng.gen_range(0..500u64);
            ClientEvent::BlocksReceived { total: state.total_received + delta }
        }
    }
}

/// Drive one deal with random external events, running the real handlers
/// in between, and check invariants after every reduction.
fn run_seed(seed: u64) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let environment = FakeEnvironment::new(TestRetrievalClientNode::new(TestNodeParams {
        lane: 5,
        ..Default::default()
    }));
    let mut state = make_deal_state(DealStatus::Ongoing);
    state.payment_requested = TokenAmount::zero();
    let acc = MessageAccumulator::default();

    for _ in 0..250 {
        if state.status.is_terminal() {
            break;
        }
        let before = Monotone::of(&state);
        let event = random_external_event(&mut rng, &state);
        apply_client_event(&mut state, event);
        before.check_advance(&Monotone::of(&state), &acc);
        check_client_state_invariants(&state, &acc);

        // let the machine react until it settles, as the driver would
        for _ in 0..8 {
            if state.status.is_terminal() {
                break;
            }
            let mut test_ctx = TestContext::new();
            handle_client_deal(test_ctx.ctx(), &environment, &state).unwrap();
            let prev = Monotone::of(&state);
            test_ctx.replay(&mut state, apply_client_event);
            prev.check_advance(&Monotone::of(&state), &acc);
            check_client_state_invariants(&state, &acc);
        }
        before.check_advance(&Monotone::of(&state), &acc);
        acc.assert_empty();
    }
}

#[test]
fn random_event_sequences_preserve_invariants() {
    for seed in 0..25 {
        run_seed(seed);
    }
}

#[test]
fn over_request_fails_but_never_overspends() {
    let mut state = make_deal_state(DealStatus::Ongoing);
    state.payment_requested = TokenAmount::zero();
    let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
    let acc = MessageAccumulator::default();

    // demand far beyond what is owed
    apply_client_event(
        &mut state,
        ClientEvent::PaymentRequested { owed: TokenAmount::from_atto(100_000_000) },
    );
    for _ in 0..8 {
        if state.status.is_terminal() {
            break;
        }
        let mut test_ctx = TestContext::new();
        handle_client_deal(test_ctx.ctx(), &environment, &state).unwrap();
        test_ctx.replay(&mut state, apply_client_event);
        check_client_state_invariants(&state, &acc);
    }
    acc.assert_empty();
    assert_eq!(state.status, DealStatus::Errored);
    assert_eq!(state.funds_spent, default_funds_spent());
}
