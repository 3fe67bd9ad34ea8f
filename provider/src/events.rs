// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use num_traits::{ToPrimitive, Zero};

use fvm_shared::econ::TokenAmount;

use fil_retrieval_shared::DealStatus;

use crate::types::{ProviderDealState, ProviderEvent};

/// Applies one event to a provider deal state: the synchronous reducer for
/// the provider FSM. Like its client counterpart, events that make no
/// sense from the current status are dropped.
pub fn apply_provider_event(state: &mut ProviderDealState, event: ProviderEvent) {
    use ProviderEvent::*;

    if state.status.is_terminal() {
        return;
    }

    match event {
        Open => {
            if state.status == DealStatus::New {
                state.status = DealStatus::Unsealing;
            }
        }
        PaymentRequested { total_sent } => {
            state.total_sent = state.total_sent.max(total_sent);
            if state.status == DealStatus::New {
                state.status = DealStatus::FundsNeededUnseal;
            }
        }
        UnsealError { error } => {
            state.message = error;
            state.status = DealStatus::Failing;
        }
        UnsealComplete => {
            if state.status == DealStatus::Unsealing {
                state.status = DealStatus::Unsealed;
            }
        }
        Unpaused => {
            if state.status == DealStatus::Unsealed {
                state.status = DealStatus::Ongoing;
            }
        }
        BlockSent { total_sent } => {
            state.total_sent = state.total_sent.max(total_sent);
        }
        BlocksCompleted => {
            if state.status == DealStatus::Ongoing {
                state.status = DealStatus::BlocksComplete;
            }
        }
        PartialPaymentReceived { amount } => {
            credit_unseal(state, &amount);
            state.funds_received += &amount;
        }
        PaymentReceived { amount } => {
            credit_unseal(state, &amount);
            state.funds_received += &amount;
            settle_bytes(state);
            if state.status == DealStatus::FundsNeededUnseal
                && state.unseal_price_paid >= state.proposal.params.unseal_price
            {
                state.status = DealStatus::Unsealing;
            }
        }
        SaveVoucherFailed { error } => {
            state.message = format!("save voucher: {}", error);
            state.status = DealStatus::Failing;
        }
        Complete => {
            if matches!(state.status, DealStatus::Ongoing | DealStatus::BlocksComplete) {
                state.status = DealStatus::Finalizing;
            }
        }
        CleanupComplete => {
            if state.status == DealStatus::Finalizing {
                state.status = DealStatus::Completed;
            }
        }
        DataTransferErrored { error } => {
            state.message = format!("data transfer: {}", error);
            state.status = DealStatus::Failing;
        }
        ClientCancelled => {
            state.message = "client cancelled retrieval".to_string();
            state.status = DealStatus::Failing;
        }
        CancelComplete => {
            if state.status == DealStatus::Failing {
                state.status = DealStatus::Errored;
            }
        }
        CloseDataTransferErrored { error } => {
            state.message = format!("error attempting to close data transfer: {}", error);
            state.status = DealStatus::Errored;
        }
    }
}

fn credit_unseal(state: &mut ProviderDealState, amount: &TokenAmount) {
    let mut unseal_owed = &state.proposal.params.unseal_price - &state.unseal_price_paid;
    if unseal_owed.is_negative() {
        unseal_owed = TokenAmount::zero();
    }
    let credit = std::cmp::min(unseal_owed, amount.clone());
    state.unseal_price_paid += credit;
}

/// Recomputes the settled-bytes mark from the funds received so far and
/// advances the interval boundary when the mark moved.
fn settle_bytes(state: &mut ProviderDealState) {
    let params = &state.proposal.params;
    if params.price_per_byte.is_zero() {
        return;
    }
    let funds_for_bytes = &state.funds_received - &state.unseal_price_paid;
    if funds_for_bytes.is_negative() {
        return;
    }
    let covered = (funds_for_bytes.atto() / params.price_per_byte.atto())
        .to_u64()
        .unwrap_or(u64::MAX)
        .min(state.total_sent);
    if covered > state.interval_low_water {
        state.interval_low_water = covered;
        state.current_interval = params.next_interval(state.current_interval);
    }
}
