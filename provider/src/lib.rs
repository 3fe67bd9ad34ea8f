// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use fvm_ipld_encoding::to_vec;
use num_traits::Zero;

use fil_retrieval_piecestore::{
    piece_for_payload, Mount, PieceInfo, PieceStore, ReadOnlyBlockstores,
};
use fil_retrieval_runtime::{deal_error, CancelToken, DealError, MemoryJournal, StateGroup};
use fil_retrieval_shared::network::{DealStatusRequest, DealStatusResponse};
use fil_retrieval_shared::{
    Ask, ChannelId, DataTransfer, DealID, DealProposal, DealResponse, DealStatus, PeerId,
    ProviderDealIdentifier, RetrievalProviderNode, TransferSubscriber,
    CLOSE_DATA_TRANSFER_TIMEOUT,
};

pub use self::events::apply_provider_event;
pub use self::requestvalidation::{
    check_deal_params, PricingInput, ProviderRequestValidator, ValidationEnvironment,
};
pub use self::revalidator::{
    ProviderRevalidator, RevalidatorEnvironment, DEFAULT_PAYMENT_GRACE,
};
pub use self::states::{
    cancel_deal, cleanup_deal, handle_provider_deal, unpause_deal, unseal_data,
    ProviderDealEnvironment,
};
pub use self::types::{ProviderDealState, ProviderEvent};

pub mod dtutils;
pub mod testing;

mod events;
mod requestvalidation;
mod revalidator;
mod states;
mod types;

/// Deal FSM worker threads per provider.
const FSM_WORKERS: usize = 4;

/// Embedder veto over otherwise-acceptable deals.
pub type DealDecider = Box<dyn Fn(&ProviderDealState) -> (bool, String) + Send + Sync>;

/// Embedder pricing policy: derives the quoted ask for one proposal from
/// the posted ask. Must be pure.
pub type PricingFunc = Box<dyn Fn(PricingInput, Ask) -> Ask + Send + Sync>;

/// Construction-time knobs for a [`RetrievalProvider`].
pub struct ProviderConfig {
    pub deal_decider: Option<DealDecider>,
    pub pricing: Option<PricingFunc>,
    /// How long invalid vouchers are tolerated on an unpaid demand.
    pub payment_grace: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self { deal_decider: None, pricing: None, payment_grace: DEFAULT_PAYMENT_GRACE }
    }
}

type ProviderDeals = StateGroup<ProviderDealIdentifier, ProviderDealState, ProviderEvent>;

/// Late-bound handle to the deal FSM group. Environments reach the group
/// through this so none of them owns it.
#[derive(Default)]
struct DealsHandle {
    group: Mutex<Weak<ProviderDeals>>,
}

impl DealsHandle {
    fn bind(&self, group: &Arc<ProviderDeals>) {
        *self.group.lock().unwrap() = Arc::downgrade(group);
    }

    fn group(&self) -> Result<Arc<ProviderDeals>, DealError> {
        self.group
            .lock()
            .unwrap()
            .upgrade()
            .ok_or_else(|| deal_error!(external; "provider has shut down"))
    }

    fn begin(&self, deal: ProviderDealState) -> Result<(), DealError> {
        self.group()?.begin(deal.identifier(), deal)
    }

    fn send(&self, deal: &ProviderDealIdentifier, event: ProviderEvent) -> Result<(), DealError> {
        self.group()?.send(deal, event)
    }
}

fn piece_key(piece_cid: &[u8]) -> String {
    let mut key = String::with_capacity(piece_cid.len() * 2);
    for b in piece_cid {
        let _ = write!(key, "{:02x}", b);
    }
    key
}

struct ProviderRevalidatorEnv {
    node: Arc<dyn RetrievalProviderNode>,
    transport: Arc<dyn DataTransfer>,
    deals: Arc<DealsHandle>,
}

impl RevalidatorEnvironment for ProviderRevalidatorEnv {
    fn node(&self) -> &dyn RetrievalProviderNode {
        self.node.as_ref()
    }

    fn send_event(
        &self,
        deal: &ProviderDealIdentifier,
        event: ProviderEvent,
    ) -> Result<(), DealError> {
        self.deals.send(deal, event)
    }

    fn pause_channel(&self, channel: &ChannelId) -> Result<(), DealError> {
        self.transport.pause_channel(channel)
    }

    fn resume_channel(&self, channel: &ChannelId) -> Result<(), DealError> {
        self.transport.resume_channel(channel)
    }

    fn send_response(
        &self,
        channel: &ChannelId,
        response: DealResponse,
    ) -> Result<(), DealError> {
        self.transport.send_response(channel, &response)
    }
}

struct ProviderDealEnv<M: Mount> {
    node: Arc<dyn RetrievalProviderNode>,
    transport: Arc<dyn DataTransfer>,
    stores: Arc<ReadOnlyBlockstores<M>>,
    revalidator: Arc<ProviderRevalidator<ProviderRevalidatorEnv>>,
}

impl<M: Mount> ProviderDealEnvironment for ProviderDealEnv<M> {
    fn node(&self) -> &dyn RetrievalProviderNode {
        self.node.as_ref()
    }

    fn prepare_blockstore(
        &self,
        deal: &ProviderDealState,
        _cancel: &CancelToken,
    ) -> Result<(), DealError> {
        let piece_info = deal
            .piece_info
            .as_ref()
            .ok_or_else(|| deal_error!(precondition; "deal has no piece to serve"))?;
        let key = piece_key(&piece_info.piece_cid);
        self.stores.add(&deal.proposal.id.to_string(), &key)?;
        Ok(())
    }

    fn track_transfer(&self, deal: &ProviderDealState) -> Result<(), DealError> {
        self.revalidator.track_channel(deal)
    }

    fn untrack_transfer(&self, deal: &ProviderDealState) -> Result<(), DealError> {
        self.revalidator.untrack_channel(deal);
        Ok(())
    }

    fn resume_data_transfer(&self, channel: &ChannelId) -> Result<(), DealError> {
        self.transport.resume_channel(channel)
    }

    fn close_data_transfer(&self, channel: &ChannelId) -> Result<(), DealError> {
        match self.transport.close_channel(channel, CLOSE_DATA_TRANSFER_TIMEOUT) {
            Err(e) if e.is_cancelled() => {
                log::warn!(
                    "failed to send cancel on data transfer channel {} within {:?}",
                    channel.id,
                    CLOSE_DATA_TRANSFER_TIMEOUT
                );
                Ok(())
            }
            other => other,
        }
    }

    fn delete_store(&self, deal_id: DealID) -> Result<(), DealError> {
        self.stores.clean(&deal_id.to_string())
    }
}

struct ProviderValidationEnv {
    ask: Arc<Mutex<Ask>>,
    piece_store: Arc<dyn PieceStore>,
    node: Arc<dyn RetrievalProviderNode>,
    deals: Arc<DealsHandle>,
    revalidator: Arc<ProviderRevalidator<ProviderRevalidatorEnv>>,
    deal_decider: Option<DealDecider>,
    pricing: Option<PricingFunc>,
}

impl ValidationEnvironment for ProviderValidationEnv {
    fn get_ask(&self, input: PricingInput) -> Result<Ask, DealError> {
        let posted = self.ask.lock().unwrap().clone();
        Ok(match &self.pricing {
            Some(pricing) => pricing(input, posted),
            None => posted,
        })
    }

    fn get_piece(
        &self,
        payload_cid: &cid::Cid,
        piece_cid: Option<&cid::Cid>,
        cancel: &CancelToken,
    ) -> Result<(PieceInfo, bool), DealError> {
        piece_for_payload(
            self.piece_store.as_ref(),
            self.node.as_ref(),
            payload_cid,
            piece_cid,
            cancel,
        )
    }

    fn run_deal_decision_logic(&self, deal: &ProviderDealState) -> (bool, String) {
        match &self.deal_decider {
            Some(decider) => decider(deal),
            None => (true, String::new()),
        }
    }

    fn begin_tracking(&self, deal: ProviderDealState) -> Result<(), DealError> {
        let identifier = deal.identifier();
        let unseal_price = deal.proposal.params.unseal_price.clone();
        // the unseal voucher may arrive before streaming starts, so the
        // metering must know the channel from the outset
        self.revalidator.track_channel(&deal)?;
        self.deals.begin(deal)?;
        if unseal_price.is_zero() {
            self.deals.send(&identifier, ProviderEvent::Open)
        } else {
            self.deals.send(&identifier, ProviderEvent::PaymentRequested { total_sent: 0 })
        }
    }
}

/// Provider side of the retrieval market: validates incoming proposals,
/// serves accepted deals out of unsealed pieces, and meters payment as
/// bytes flow.
pub struct RetrievalProvider<M: Mount + 'static> {
    deals: Arc<ProviderDeals>,
    revalidator: Arc<ProviderRevalidator<ProviderRevalidatorEnv>>,
    validator: ProviderRequestValidator<ProviderValidationEnv>,
    ask: Arc<Mutex<Ask>>,
    node: Arc<dyn RetrievalProviderNode>,
    stores: Arc<ReadOnlyBlockstores<M>>,
}

impl<M: Mount + 'static> RetrievalProvider<M> {
    pub fn new(
        node: Arc<dyn RetrievalProviderNode>,
        transport: Arc<dyn DataTransfer>,
        piece_store: Arc<dyn PieceStore>,
        mount: M,
    ) -> Self {
        Self::with_config(node, transport, piece_store, mount, ProviderConfig::default())
    }

    pub fn with_config(
        node: Arc<dyn RetrievalProviderNode>,
        transport: Arc<dyn DataTransfer>,
        piece_store: Arc<dyn PieceStore>,
        mount: M,
        config: ProviderConfig,
    ) -> Self {
        let ask = Arc::new(Mutex::new(Ask::default()));
        let stores = Arc::new(ReadOnlyBlockstores::new(mount));
        let deals_handle = Arc::new(DealsHandle::default());

        let revalidator = Arc::new(ProviderRevalidator::with_grace(
            ProviderRevalidatorEnv {
                node: node.clone(),
                transport: transport.clone(),
                deals: deals_handle.clone(),
            },
            config.payment_grace,
        ));

        let deal_env = Arc::new(ProviderDealEnv {
            node: node.clone(),
            transport,
            stores: stores.clone(),
            revalidator: revalidator.clone(),
        });
        let deals = Arc::new(StateGroup::new(
            FSM_WORKERS,
            apply_provider_event,
            |state: &ProviderDealState| state.status.is_terminal(),
            Box::new(move |ctx, state| handle_provider_deal(ctx, deal_env.as_ref(), state)),
            Box::new(MemoryJournal::new()),
        ));
        deals_handle.bind(&deals);

        let validator = ProviderRequestValidator::new(ProviderValidationEnv {
            ask: ask.clone(),
            piece_store,
            node: node.clone(),
            deals: deals_handle,
            revalidator: revalidator.clone(),
            deal_decider: config.deal_decider,
            pricing: config.pricing,
        });

        Self { deals, revalidator, validator, ask, node, stores }
    }

    /// Handle a pull request opening a retrieval deal; the returned
    /// response goes back to the client out-of-band.
    pub fn handle_pull_request(
        &self,
        client: PeerId,
        proposal: &DealProposal,
        channel_id: ChannelId,
    ) -> DealResponse {
        log::info!(
            "received retrieval proposal {} for payload {} from {}",
            proposal.id,
            proposal.payload_cid,
            client
        );
        self.validator.validate_pull(client, proposal, channel_id, &CancelToken::new())
    }

    /// Answer a deal-status query with a signed snapshot.
    pub fn handle_deal_status_request(&self, request: &DealStatusRequest) -> DealStatusResponse {
        let proposal_cid = match &request.proposal {
            Some(cid) => *cid,
            None => {
                return DealStatusResponse {
                    message: "no proposal specified".to_string(),
                    ..Default::default()
                }
            }
        };
        let deal = self
            .deals
            .list()
            .into_iter()
            .find(|deal| deal.proposal.cid().map(|c| c == proposal_cid).unwrap_or(false));
        let mut response = match deal {
            Some(deal) => DealStatusResponse {
                status: deal.status,
                id: deal.proposal.id,
                total_sent: deal.total_sent,
                funds_received: deal.funds_received,
                message: deal.message,
                signature: None,
            },
            None => DealStatusResponse {
                status: DealStatus::DealNotFound,
                message: "no deal found for proposal".to_string(),
                ..Default::default()
            },
        };
        match to_vec(&response)
            .map_err(DealError::from)
            .and_then(|data| self.node.sign_bytes(&data, &CancelToken::new()))
        {
            Ok(signature) => response.signature = Some(signature),
            Err(e) => log::error!("failed to sign deal status response: {}", e),
        }
        response
    }

    /// Subscriber to register with the transport for this provider's
    /// channels.
    pub fn subscriber(&self) -> TransferSubscriber {
        dtutils::transfer_subscriber(self.revalidator.clone())
    }

    pub fn get_ask(&self) -> Ask {
        self.ask.lock().unwrap().clone()
    }

    pub fn set_ask(&self, ask: Ask) {
        *self.ask.lock().unwrap() = ask;
    }

    pub fn deal_state(&self, deal: &ProviderDealIdentifier) -> Option<ProviderDealState> {
        self.deals.get(deal)
    }

    pub fn list_deals(&self) -> Vec<ProviderDealState> {
        self.deals.list()
    }

    /// Blockstore registry backing this provider's deals.
    pub fn stores(&self) -> &ReadOnlyBlockstores<M> {
        &self.stores
    }

    /// Cancel external operations in flight for every deal.
    pub fn shutdown(&self) {
        self.deals.cancel_all();
    }

    /// Block until every deal's event queue has drained.
    pub fn wait_idle(&self) {
        self.deals.wait_idle();
    }
}
