// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cid::Cid;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;

use fil_retrieval_runtime::{DealError, MemoryJournal, StateGroup, StateJournal};
use fil_retrieval_shared::{
    ChannelId, DataTransfer, DealID, DealPayment, DealProposal, Params, PeerId,
    RetrievalClientNode, TransferSubscriber, CLOSE_DATA_TRANSFER_TIMEOUT,
};

pub use self::events::apply_client_event;
pub use self::states::{
    cancel_deal, check_complete, handle_client_deal, ongoing, process_payment_requested,
    propose_deal, send_funds, setup_payment_channel_start, wait_for_payment_channel_add_funds,
    wait_for_payment_channel_create, ClientDealEnvironment,
};
pub use self::types::{ClientDealState, ClientEvent};

pub mod dtutils;
pub mod testing;

mod events;
mod states;
mod types;

/// Deal FSM worker threads per client.
const FSM_WORKERS: usize = 4;

/// Environment handed to client deal handlers: the payment gateway and the
/// transfer operations, with no path back to the FSM.
struct ClientEnvironment {
    node: Arc<dyn RetrievalClientNode>,
    transport: Arc<dyn DataTransfer>,
    channels: Arc<Mutex<HashMap<ChannelId, DealID>>>,
}

impl ClientDealEnvironment for ClientEnvironment {
    fn node(&self) -> &dyn RetrievalClientNode {
        self.node.as_ref()
    }

    fn open_data_transfer(
        &self,
        to: &PeerId,
        proposal: &DealProposal,
    ) -> Result<ChannelId, DealError> {
        let channel = self.transport.open_pull_channel(to, proposal)?;
        self.channels.lock().unwrap().insert(channel.clone(), proposal.id);
        Ok(channel)
    }

    fn send_data_transfer_voucher(
        &self,
        channel: &ChannelId,
        payment: &DealPayment,
    ) -> Result<(), DealError> {
        self.transport.send_voucher(channel, payment)
    }

    fn close_data_transfer(&self, channel: &ChannelId) -> Result<(), DealError> {
        // closing also tells the peer to cancel; don't wait forever on it
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
}

/// Client side of the retrieval market: creates deals on request and
/// drives each through proposal, channel setup, incremental payment and
/// completion verification.
pub struct RetrievalClient {
    deals: Arc<StateGroup<DealID, ClientDealState, ClientEvent>>,
    channels: Arc<Mutex<HashMap<ChannelId, DealID>>>,
    next_deal_id: AtomicU64,
}

impl RetrievalClient {
    pub fn new(
        node: Arc<dyn RetrievalClientNode>,
        transport: Arc<dyn DataTransfer>,
    ) -> Self {
        Self::with_journal(node, transport, Box::new(MemoryJournal::new()))
    }

    pub fn with_journal(
        node: Arc<dyn RetrievalClientNode>,
        transport: Arc<dyn DataTransfer>,
        journal: Box<dyn StateJournal<DealID, ClientDealState>>,
    ) -> Self {
        let channels = Arc::new(Mutex::new(HashMap::new()));
        let environment = Arc::new(ClientEnvironment {
            node,
            transport,
            channels: channels.clone(),
        });
        let deals = Arc::new(StateGroup::new(
            FSM_WORKERS,
            apply_client_event,
            |state: &ClientDealState| state.status.is_terminal(),
            Box::new(move |ctx, state| handle_client_deal(ctx, environment.as_ref(), state)),
            journal,
        ));
        Self { deals, channels, next_deal_id: AtomicU64::new(1) }
    }

    /// Start retrieving `payload_cid` from `sender` under the given terms,
    /// spending at most `total_funds`. Returns the new deal's id; progress
    /// is observable through [`deal_state`](Self::deal_state).
    pub fn retrieve(
        &self,
        payload_cid: Cid,
        params: Params,
        total_funds: TokenAmount,
        sender: PeerId,
        client_wallet: Address,
        miner_wallet: Address,
    ) -> Result<DealID, DealError> {
        let id = DealID(self.next_deal_id.fetch_add(1, Ordering::SeqCst));
        let proposal = DealProposal { payload_cid, id, params };
        log::info!("proposing retrieval deal {} for payload {}", id, proposal.payload_cid);
        let state =
            ClientDealState::new(proposal, client_wallet, miner_wallet, sender, total_funds);
        self.deals.begin(id, state)?;
        Ok(id)
    }

    /// Subscriber to register with the transport for this client's
    /// channels.
    pub fn subscriber(&self) -> TransferSubscriber {
        dtutils::transfer_subscriber(self.deals.clone(), self.channels.clone())
    }

    pub fn deal_state(&self, id: DealID) -> Option<ClientDealState> {
        self.deals.get(&id)
    }

    pub fn list_deals(&self) -> Vec<ClientDealState> {
        self.deals.list()
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
