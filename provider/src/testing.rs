// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fil_retrieval_runtime::MessageAccumulator;
use fil_retrieval_shared::DealStatus;

use crate::types::ProviderDealState;

/// Checks internal invariants of a provider deal state, accumulating any
/// violations.
pub fn check_provider_state_invariants(state: &ProviderDealState, acc: &MessageAccumulator) {
    let acc = acc.with_prefix(format!("provider deal {}: ", state.identifier()));

    acc.require(
        state.interval_low_water <= state.total_sent,
        format!(
            "settled bytes {} exceed bytes sent {}",
            state.interval_low_water, state.total_sent
        ),
    );
    acc.require(!state.funds_received.is_negative(), "negative funds received");
    acc.require(
        state.unseal_price_paid <= state.proposal.params.unseal_price,
        "unseal fee overpaid",
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
    if !matches!(state.status, DealStatus::New | DealStatus::Rejected) {
        acc.require(state.channel_id.is_some(), "active deal without a transfer channel");
    }
}
