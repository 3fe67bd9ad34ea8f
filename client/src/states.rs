// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Per-status handlers for the client deal FSM. A handler observes a state
//! snapshot, performs external calls through the environment, and triggers
//! the events that encode the outcome; it returns `Err` only for framework
//! failures, never for deal failures.

use num_traits::Zero;

use fil_retrieval_runtime::{DealError, FsmCtx};
use fil_retrieval_shared::{
    ChannelId, DealPayment, DealProposal, DealStatus, PeerId, RetrievalClientNode,
    VoucherCreateError,
};

use crate::types::{ClientDealState, ClientEvent};

/// Capabilities a client handler may use: the payment gateway plus the
/// data-transfer operations it is allowed to perform. Holds no reference
/// back to the FSM.
pub trait ClientDealEnvironment: Send + Sync {
    fn node(&self) -> &dyn RetrievalClientNode;

    fn open_data_transfer(
        &self,
        to: &PeerId,
        proposal: &DealProposal,
    ) -> Result<ChannelId, DealError>;

    fn send_data_transfer_voucher(
        &self,
        channel: &ChannelId,
        payment: &DealPayment,
    ) -> Result<(), DealError>;

    /// Close the transfer channel, tolerating a transport that takes too
    /// long: a close that times out counts as closed.
    fn close_data_transfer(&self, channel: &ChannelId) -> Result<(), DealError>;
}

/// ProposeDeal opens the transfer channel, carrying the proposal to the
/// provider as the channel voucher.
pub fn propose_deal(
    ctx: &mut FsmCtx<ClientEvent>,
    environment: &impl ClientDealEnvironment,
    deal_state: &ClientDealState,
) -> Result<(), DealError> {
    match environment.open_data_transfer(&deal_state.sender, &deal_state.proposal) {
        Ok(channel_id) => ctx.trigger(ClientEvent::DealProposed { channel_id }),
        Err(e) => {
            ctx.trigger(ClientEvent::WriteDealProposalErrored { error: e.msg().to_string() })
        }
    }
    Ok(())
}

/// SetupPaymentChannelStart initiates payment channel creation, or an
/// add-funds operation when a channel to this provider already exists.
pub fn setup_payment_channel_start(
    ctx: &mut FsmCtx<ClientEvent>,
    environment: &impl ClientDealEnvironment,
    deal_state: &ClientDealState,
) -> Result<(), DealError> {
    if deal_state.total_funds.is_zero() {
        ctx.trigger(ClientEvent::PaymentChannelSkipped);
        return Ok(());
    }

    let setup = environment.node().get_or_create_payment_channel(
        &deal_state.client_wallet,
        &deal_state.miner_wallet,
        &deal_state.total_funds,
        ctx.cancel(),
    );
    match setup {
        Ok(setup) => match (setup.pay_ch, setup.wait_msg) {
            (Some(pay_ch), Some(msg_cid)) => {
                ctx.trigger(ClientEvent::PaymentChannelAddingFunds { pay_ch, msg_cid })
            }
            (None, Some(msg_cid)) => {
                ctx.trigger(ClientEvent::PaymentChannelCreateInitiated { msg_cid })
            }
            _ => ctx.trigger(ClientEvent::PaymentChannelErrored {
                error: "gateway returned no pending message".to_string(),
            }),
        },
        Err(e) => ctx.trigger(ClientEvent::PaymentChannelErrored { error: e.msg().to_string() }),
    }
    Ok(())
}

/// WaitForPaymentChannelCreate waits for the channel-creation message to
/// land, then allocates this deal's lane.
pub fn wait_for_payment_channel_create(
    ctx: &mut FsmCtx<ClientEvent>,
    environment: &impl ClientDealEnvironment,
    deal_state: &ClientDealState,
) -> Result<(), DealError> {
    let wait_msg_cid = match &deal_state.wait_msg_cid {
        Some(cid) => cid,
        None => {
            ctx.trigger(ClientEvent::PaymentChannelErrored {
                error: "no create message to wait for".to_string(),
            });
            return Ok(());
        }
    };

    match environment.node().wait_for_payment_channel_create(wait_msg_cid, ctx.cancel()) {
        Ok(pay_ch) => match environment.node().allocate_lane(&pay_ch) {
            Ok(lane) => ctx.trigger(ClientEvent::PaymentChannelReady { pay_ch, lane }),
            Err(e) => {
                ctx.trigger(ClientEvent::PaymentChannelErrored { error: e.msg().to_string() })
            }
        },
        Err(e) => ctx.trigger(ClientEvent::PaymentChannelErrored { error: e.msg().to_string() }),
    }
    Ok(())
}

/// WaitForPaymentChannelAddFunds is the add-funds counterpart of
/// [`wait_for_payment_channel_create`]. Failures clear the half-allocated
/// lane before the deal starts failing.
pub fn wait_for_payment_channel_add_funds(
    ctx: &mut FsmCtx<ClientEvent>,
    environment: &impl ClientDealEnvironment,
    deal_state: &ClientDealState,
) -> Result<(), DealError> {
    let (wait_msg_cid, pay_ch) = match (&deal_state.wait_msg_cid, &deal_state.payment_info) {
        (Some(cid), Some(info)) => (cid, info.pay_ch),
        _ => {
            ctx.trigger(ClientEvent::PaymentChannelAddFundsErrored {
                error: "no add-funds message to wait for".to_string(),
            });
            return Ok(());
        }
    };

    match environment.node().wait_for_payment_channel_add_funds(wait_msg_cid, ctx.cancel()) {
        Ok(()) => match environment.node().allocate_lane(&pay_ch) {
            Ok(lane) => ctx.trigger(ClientEvent::PaymentChannelReady { pay_ch, lane }),
            Err(e) => ctx.trigger(ClientEvent::PaymentChannelAddFundsErrored {
                error: e.msg().to_string(),
            }),
        },
        Err(e) => ctx.trigger(ClientEvent::PaymentChannelAddFundsErrored {
            error: e.msg().to_string(),
        }),
    }
    Ok(())
}

/// Ongoing decides whether an outstanding payment request needs handling.
pub fn ongoing(
    ctx: &mut FsmCtx<ClientEvent>,
    _environment: &impl ClientDealEnvironment,
    deal_state: &ClientDealState,
) -> Result<(), DealError> {
    if !deal_state.payment_requested.is_zero() {
        ctx.trigger(ClientEvent::FundsNeeded { last: deal_state.last_payment_requested });
    }
    Ok(())
}

/// ProcessPaymentRequested moves on to sending funds once something is
/// actually owed; a request for bytes not yet received just waits.
pub fn process_payment_requested(
    ctx: &mut FsmCtx<ClientEvent>,
    _environment: &impl ClientDealEnvironment,
    deal_state: &ClientDealState,
) -> Result<(), DealError> {
    let unseal_outstanding =
        deal_state.unseal_funds_paid < deal_state.proposal.params.unseal_price;
    if unseal_outstanding || deal_state.bytes_paid_for < deal_state.total_received {
        ctx.trigger(ClientEvent::SendFunds);
    }
    Ok(())
}

/// SendFunds checks the provider's demand against what is owed, creates a
/// voucher for it and transmits it.
pub fn send_funds(
    ctx: &mut FsmCtx<ClientEvent>,
    environment: &impl ClientDealEnvironment,
    deal_state: &ClientDealState,
) -> Result<(), DealError> {
    let owed = deal_state.amount_owed();

    if deal_state.payment_requested > owed {
        ctx.trigger(ClientEvent::PaymentFailed {
            error: "provider requested more than owed".to_string(),
        });
        return Ok(());
    }
    // the provider may ask for less than it could; pay what it asked
    let pay = std::cmp::min(deal_state.payment_requested.clone(), owed);

    if &deal_state.funds_spent + &pay > deal_state.total_funds {
        ctx.trigger(ClientEvent::PaymentFailed { error: "insufficient funds".to_string() });
        return Ok(());
    }

    // nothing to transmit for a zero demand
    if pay.is_zero() {
        ctx.trigger(ClientEvent::PaymentSent { amount: pay });
        return Ok(());
    }

    let (payment_info, channel_id) =
        match (&deal_state.payment_info, &deal_state.channel_id) {
            (Some(info), Some(channel)) => (info, channel),
            _ => {
                ctx.trigger(ClientEvent::PaymentFailed {
                    error: "no payment channel for deal".to_string(),
                });
                return Ok(());
            }
        };

    let voucher_amount = &deal_state.funds_spent + &pay;
    let voucher = match environment.node().create_payment_voucher(
        &payment_info.pay_ch,
        payment_info.lane,
        &voucher_amount,
        ctx.cancel(),
    ) {
        Ok(voucher) => voucher,
        Err(VoucherCreateError::Shortfall(shortfall)) => {
            ctx.trigger(ClientEvent::PaymentFailed {
                error: format!("not enough funds in payment channel (shortfall: {})", shortfall),
            });
            return Ok(());
        }
        Err(VoucherCreateError::Failed(e)) => {
            ctx.trigger(ClientEvent::PaymentFailed { error: e.msg().to_string() });
            return Ok(());
        }
    };

    let payment = DealPayment {
        id: deal_state.proposal.id,
        payment_channel: payment_info.pay_ch,
        payment_voucher: voucher,
    };
    match environment.send_data_transfer_voucher(channel_id, &payment) {
        Ok(()) => ctx.trigger(ClientEvent::PaymentSent { amount: pay }),
        Err(e) => ctx.trigger(ClientEvent::WriteDealPaymentErrored { error: e.msg().to_string() }),
    }
    Ok(())
}

/// CheckComplete verifies the provider's completion signal against what
/// actually arrived.
pub fn check_complete(
    ctx: &mut FsmCtx<ClientEvent>,
    _environment: &impl ClientDealEnvironment,
    deal_state: &ClientDealState,
) -> Result<(), DealError> {
    if deal_state.all_blocks_received {
        ctx.trigger(ClientEvent::CompleteVerified);
    } else {
        ctx.trigger(ClientEvent::EarlyTermination);
    }
    Ok(())
}

/// CancelDeal closes the transfer channel on the way from `Failing` to
/// `Errored`. A clean close preserves the failure message; a failed close
/// replaces it.
pub fn cancel_deal(
    ctx: &mut FsmCtx<ClientEvent>,
    environment: &impl ClientDealEnvironment,
    deal_state: &ClientDealState,
) -> Result<(), DealError> {
    match &deal_state.channel_id {
        Some(channel_id) => match environment.close_data_transfer(channel_id) {
            Ok(()) => ctx.trigger(ClientEvent::CancelComplete),
            Err(e) => ctx.trigger(ClientEvent::CloseDataTransferErrored {
                error: e.msg().to_string(),
            }),
        },
        None => ctx.trigger(ClientEvent::CancelComplete),
    }
    Ok(())
}

/// Dispatch table: which handler runs on entry to each status.
pub fn handle_client_deal(
    ctx: &mut FsmCtx<ClientEvent>,
    environment: &impl ClientDealEnvironment,
    deal_state: &ClientDealState,
) -> Result<(), DealError> {
    match deal_state.status {
        DealStatus::New => propose_deal(ctx, environment, deal_state),
        DealStatus::Accepted => setup_payment_channel_start(ctx, environment, deal_state),
        DealStatus::PaymentChannelCreating => {
            wait_for_payment_channel_create(ctx, environment, deal_state)
        }
        DealStatus::PaymentChannelAddingFunds => {
            wait_for_payment_channel_add_funds(ctx, environment, deal_state)
        }
        DealStatus::Ongoing => ongoing(ctx, environment, deal_state),
        DealStatus::FundsNeeded | DealStatus::FundsNeededLastPayment => {
            process_payment_requested(ctx, environment, deal_state)
        }
        DealStatus::SendFunds | DealStatus::SendFundsLastPayment => {
            send_funds(ctx, environment, deal_state)
        }
        DealStatus::CheckComplete => check_complete(ctx, environment, deal_state),
        DealStatus::Failing => cancel_deal(ctx, environment, deal_state),
        _ => Ok(()),
    }
}
