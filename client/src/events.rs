// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use num_traits::{ToPrimitive, Zero};

use fvm_shared::econ::TokenAmount;

use fil_retrieval_shared::{DealStatus, PaymentInfo};

use crate::types::{ClientDealState, ClientEvent};

/// Applies one event to a client deal state: the synchronous reducer for
/// the client FSM. All settlement arithmetic lives here; handlers only
/// decide which events to fire.
///
/// Events that are meaningless from the current status are dropped rather
/// than applied, so a late or duplicated transport notification cannot
/// corrupt a deal.
pub fn apply_client_event(state: &mut ClientDealState, event: ClientEvent) {
    use ClientEvent::*;

    if state.status.is_terminal() {
        return;
    }

    match event {
        DealProposed { channel_id } => {
            if state.status == DealStatus::New {
                state.channel_id = Some(channel_id);
                state.status = DealStatus::WaitForAcceptance;
            }
        }
        WriteDealProposalErrored { error } => {
            state.message = format!("data transfer: {}", error);
            state.status = DealStatus::Errored;
        }
        DealRejected { message } => {
            state.message = format!("deal rejected: {}", message);
            state.status = DealStatus::Rejected;
        }
        DealNotFound { message } => {
            state.message = format!("deal not found: {}", message);
            state.status = DealStatus::DealNotFound;
        }
        DealAccepted => {
            if state.status == DealStatus::WaitForAcceptance {
                state.status = DealStatus::Accepted;
            }
        }
        UnknownResponseReceived => {
            state.message = "unexpected deal response".to_string();
            state.status = DealStatus::Failing;
        }
        PaymentChannelErrored { error } => {
            state.message = format!("get or create payment channel: {}", error);
            state.status = DealStatus::Failing;
        }
        PaymentChannelCreateInitiated { msg_cid } => {
            if state.status == DealStatus::Accepted {
                state.wait_msg_cid = Some(msg_cid);
                state.status = DealStatus::PaymentChannelCreating;
            }
        }
        PaymentChannelAddingFunds { pay_ch, msg_cid } => {
            if state.status == DealStatus::Accepted {
                state.wait_msg_cid = Some(msg_cid);
                state.payment_info = Some(PaymentInfo { pay_ch, lane: 0 });
                state.status = DealStatus::PaymentChannelAddingFunds;
            }
        }
        PaymentChannelSkipped => {
            if state.status == DealStatus::Accepted {
                state.status = DealStatus::Ongoing;
            }
        }
        PaymentChannelReady { pay_ch, lane } => {
            if matches!(
                state.status,
                DealStatus::PaymentChannelCreating | DealStatus::PaymentChannelAddingFunds
            ) {
                state.wait_msg_cid = None;
                state.payment_info = Some(PaymentInfo { pay_ch, lane });
                state.status = DealStatus::Ongoing;
            }
        }
        PaymentChannelAddFundsErrored { error } => {
            // the lane was never usable; clear the partial allocation
            if let Some(info) = state.payment_info.as_mut() {
                info.lane = 0;
            }
            state.message = format!("adding funds to payment channel: {}", error);
            state.status = DealStatus::Failing;
        }
        BlocksReceived { total } => {
            state.total_received = state.total_received.max(total);
        }
        AllBlocksReceived => {
            state.all_blocks_received = true;
        }
        PaymentRequested { owed } => {
            state.payment_requested = owed;
            if state.status == DealStatus::Ongoing {
                state.status = DealStatus::FundsNeeded;
            }
        }
        LastPaymentRequested { owed } => {
            state.payment_requested = owed;
            state.last_payment_requested = true;
            if matches!(state.status, DealStatus::Ongoing | DealStatus::FundsNeeded) {
                state.status = DealStatus::FundsNeededLastPayment;
            }
        }
        FundsNeeded { last } => {
            if state.status == DealStatus::Ongoing {
                state.status = if last {
                    DealStatus::FundsNeededLastPayment
                } else {
                    DealStatus::FundsNeeded
                };
            }
        }
        SendFunds => match state.status {
            DealStatus::FundsNeeded => state.status = DealStatus::SendFunds,
            DealStatus::FundsNeededLastPayment => {
                state.status = DealStatus::SendFundsLastPayment
            }
            _ => {}
        },
        PaymentSent { amount } => {
            if !matches!(
                state.status,
                DealStatus::SendFunds | DealStatus::SendFundsLastPayment
            ) {
                return;
            }
            settle_payment(state, &amount);
            state.status = if state.status == DealStatus::SendFundsLastPayment {
                DealStatus::Finalizing
            } else {
                DealStatus::Ongoing
            };
        }
        PaymentFailed { error } => {
            state.message = error;
            state.status = DealStatus::Failing;
        }
        WriteDealPaymentErrored { error } => {
            state.message = format!("writing deal payment: {}", error);
            state.status = DealStatus::Errored;
        }
        ProviderCancelled => {
            state.message = "provider cancelled retrieval".to_string();
            state.status = DealStatus::Failing;
        }
        Complete => {
            if matches!(
                state.status,
                DealStatus::Accepted
                    | DealStatus::Ongoing
                    | DealStatus::BlocksComplete
                    | DealStatus::Finalizing
                    | DealStatus::FundsNeeded
                    | DealStatus::FundsNeededLastPayment
                    | DealStatus::SendFunds
                    | DealStatus::SendFundsLastPayment
            ) {
                state.status = DealStatus::CheckComplete;
            }
        }
        CompleteVerified => {
            if state.status == DealStatus::CheckComplete {
                state.status = DealStatus::Completed;
            }
        }
        EarlyTermination => {
            state.message =
                "Provider sent complete status without sending all data".to_string();
            state.status = DealStatus::Errored;
        }
        DataTransferError { error } => {
            state.message = format!("data transfer: {}", error);
            state.status = DealStatus::Errored;
        }
        CancelComplete => {
            // keep whatever message put the deal into Failing
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

/// Credits a transmitted voucher against what the deal owes: the unseal
/// fee first, the remainder buying received bytes. The interval only
/// advances when the payment settles everything owed at this moment.
fn settle_payment(state: &mut ClientDealState, amount: &TokenAmount) {
    let params = state.proposal.params.clone();
    let owed = state.amount_owed();

    if amount == &owed {
        state.unseal_funds_paid = params.unseal_price.clone();
        // the interval tracks byte settlements; an unseal-only payment
        // leaves it where it is
        if state.bytes_paid_for < state.total_received {
            state.current_interval = params.next_interval(state.current_interval);
        }
        state.bytes_paid_for = state.total_received;
    } else {
        let mut unseal_owed = &params.unseal_price - &state.unseal_funds_paid;
        if unseal_owed.is_negative() {
            unseal_owed = TokenAmount::zero();
        }
        let unseal_credit = std::cmp::min(unseal_owed, amount.clone());
        state.unseal_funds_paid += &unseal_credit;

        let remainder = amount - &unseal_credit;
        if !params.price_per_byte.is_zero() {
            let bytes_owed = state.total_received - state.bytes_paid_for;
            let bytes = (remainder.atto() / params.price_per_byte.atto())
                .to_u64()
                .unwrap_or(u64::MAX)
                .min(bytes_owed);
            state.bytes_paid_for += bytes;
        }
    }

    state.funds_spent += amount;
    state.payment_requested = TokenAmount::zero();
}
