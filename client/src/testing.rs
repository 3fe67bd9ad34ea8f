// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fil_retrieval_runtime::MessageAccumulator;
use fil_retrieval_shared::DealStatus;

use crate::types::ClientDealState;

/// Checks internal invariants of a client deal state, accumulating any
/// violations.
pub fn check_client_state_invariants(state: &ClientDealState, acc: &MessageAccumulator) {
    let acc = acc.with_prefix(format!("client deal {}: ", state.proposal.id));

    acc.require(
        state.bytes_paid_for <= state.total_received,
        format!(
            "bytes paid for {} exceeds bytes received {}",
            state.bytes_paid_for, state.total_received
        ),
    );
    acc.require(
        state.funds_spent <= state.total_funds,
        format!("funds spent {} exceed total funds {}", state.funds_spent, state.total_funds),
    );
    acc.require(!state.funds_spent.is_negative(), "negative funds spent");
    acc.require(!state.payment_requested.is_negative(), "negative payment requested");
    acc.require(
        state.unseal_funds_paid <= state.proposal.params.unseal_price,
        "unseal funds paid exceed the unseal price",
    );
    acc.require(
        state.current_interval >= state.proposal.params.payment_interval,
        format!(
            "current interval {} below the first boundary {}",
            state.current_interval, state.proposal.params.payment_interval
        ),
    );
    if state.status == DealStatus::Errored {
        acc.require(!state.message.is_empty(), "errored deal carries no message");
    }
    if state.status == DealStatus::Completed {
        acc.require(state.all_blocks_received, "completed deal without all blocks received");
    }
}
