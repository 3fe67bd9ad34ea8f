// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Per-status handlers for the provider deal FSM.

use fil_retrieval_runtime::{DealError, FsmCtx};
use fil_retrieval_shared::{ChannelId, DealID, DealStatus, RetrievalProviderNode};

use crate::types::{ProviderDealState, ProviderEvent};

/// Capabilities a provider handler may use. Holds handles to the node,
/// registry and transport, never to the FSM.
pub trait ProviderDealEnvironment: Send + Sync {
    fn node(&self) -> &dyn RetrievalProviderNode;

    /// Unseal the piece if needed and bind a read-only blockstore over it
    /// to the deal.
    fn prepare_blockstore(
        &self,
        deal: &ProviderDealState,
        cancel: &fil_retrieval_runtime::CancelToken,
    ) -> Result<(), DealError>;

    /// Register the deal's channel with the payment metering.
    fn track_transfer(&self, deal: &ProviderDealState) -> Result<(), DealError>;

    fn untrack_transfer(&self, deal: &ProviderDealState) -> Result<(), DealError>;

    fn resume_data_transfer(&self, channel: &ChannelId) -> Result<(), DealError>;

    /// Close the transfer channel, tolerating a transport that takes too
    /// long: a close that times out counts as closed.
    fn close_data_transfer(&self, channel: &ChannelId) -> Result<(), DealError>;

    /// Release the blockstore bound to the deal. Idempotent.
    fn delete_store(&self, deal_id: DealID) -> Result<(), DealError>;
}

/// UnsealData makes the piece servable: unsealing happens inside the
/// blockstore mount, which only reads sealed sectors through the node.
pub fn unseal_data(
    ctx: &mut FsmCtx<ProviderEvent>,
    environment: &impl ProviderDealEnvironment,
    deal_state: &ProviderDealState,
) -> Result<(), DealError> {
    match environment.prepare_blockstore(deal_state, ctx.cancel()) {
        Ok(()) => ctx.trigger(ProviderEvent::UnsealComplete),
        Err(e) => ctx.trigger(ProviderEvent::UnsealError { error: e.msg().to_string() }),
    }
    Ok(())
}

/// UnpauseDeal starts metering and lets the paused transfer flow.
pub fn unpause_deal(
    ctx: &mut FsmCtx<ProviderEvent>,
    environment: &impl ProviderDealEnvironment,
    deal_state: &ProviderDealState,
) -> Result<(), DealError> {
    if let Err(e) = environment.track_transfer(deal_state) {
        ctx.trigger(ProviderEvent::DataTransferErrored { error: e.msg().to_string() });
        return Ok(());
    }
    let channel_id = match &deal_state.channel_id {
        Some(channel_id) => channel_id,
        None => {
            ctx.trigger(ProviderEvent::DataTransferErrored {
                error: "no transfer channel for deal".to_string(),
            });
            return Ok(());
        }
    };
    match environment.resume_data_transfer(channel_id) {
        Ok(()) => ctx.trigger(ProviderEvent::Unpaused),
        Err(e) => ctx.trigger(ProviderEvent::DataTransferErrored { error: e.msg().to_string() }),
    }
    Ok(())
}

/// CleanupDeal releases the deal's resources on the way to `Completed`.
pub fn cleanup_deal(
    ctx: &mut FsmCtx<ProviderEvent>,
    environment: &impl ProviderDealEnvironment,
    deal_state: &ProviderDealState,
) -> Result<(), DealError> {
    if let Err(e) = environment.untrack_transfer(deal_state) {
        log::warn!("untracking completed deal {}: {}", deal_state.proposal.id, e);
    }
    if let Err(e) = environment.delete_store(deal_state.proposal.id) {
        log::error!("releasing blockstore for deal {}: {}", deal_state.proposal.id, e);
    }
    ctx.trigger(ProviderEvent::CleanupComplete);
    Ok(())
}

/// CancelDeal releases resources and closes the channel on the way from
/// `Failing` to `Errored`. A clean close preserves the failure message; a
/// failed close replaces it.
pub fn cancel_deal(
    ctx: &mut FsmCtx<ProviderEvent>,
    environment: &impl ProviderDealEnvironment,
    deal_state: &ProviderDealState,
) -> Result<(), DealError> {
    if let Err(e) = environment.untrack_transfer(deal_state) {
        log::warn!("untracking failing deal {}: {}", deal_state.proposal.id, e);
    }
    if let Err(e) = environment.delete_store(deal_state.proposal.id) {
        log::error!("releasing blockstore for deal {}: {}", deal_state.proposal.id, e);
    }
    match &deal_state.channel_id {
        Some(channel_id) => match environment.close_data_transfer(channel_id) {
            Ok(()) => ctx.trigger(ProviderEvent::CancelComplete),
            Err(e) => ctx.trigger(ProviderEvent::CloseDataTransferErrored {
                error: e.msg().to_string(),
            }),
        },
        None => ctx.trigger(ProviderEvent::CancelComplete),
    }
    Ok(())
}

/// Dispatch table: which handler runs on entry to each status. `New`,
/// `FundsNeededUnseal`, `Ongoing` and `BlocksComplete` only move on
/// external events from the validator and the revalidator.
pub fn handle_provider_deal(
    ctx: &mut FsmCtx<ProviderEvent>,
    environment: &impl ProviderDealEnvironment,
    deal_state: &ProviderDealState,
) -> Result<(), DealError> {
    match deal_state.status {
        DealStatus::Unsealing => unseal_data(ctx, environment, deal_state),
        DealStatus::Unsealed => unpause_deal(ctx, environment, deal_state),
        DealStatus::Finalizing => cleanup_deal(ctx, environment, deal_state),
        DealStatus::Failing => cancel_deal(ctx, environment, deal_state),
        _ => Ok(()),
    }
}
