// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use num_traits::Zero;

use fil_retrieval_shared::{
    ChannelId, DealID, DealProposal, DealStatus, PaymentInfo, PeerId,
};

/// Everything the client tracks about a single retrieval deal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct ClientDealState {
    pub proposal: DealProposal,
    pub status: DealStatus,
    /// Peer serving the retrieval.
    pub sender: PeerId,
    pub client_wallet: Address,
    pub miner_wallet: Address,
    /// Ceiling on what this deal may spend, escrowed into the channel.
    pub total_funds: TokenAmount,
    pub funds_spent: TokenAmount,
    pub unseal_funds_paid: TokenAmount,
    /// Amount the provider is currently demanding; zero when none.
    pub payment_requested: TokenAmount,
    pub bytes_paid_for: u64,
    pub total_received: u64,
    /// Byte boundary at which the next payment comes due.
    pub current_interval: u64,
    pub last_payment_requested: bool,
    pub all_blocks_received: bool,
    pub payment_info: Option<PaymentInfo>,
    /// Chain message being waited on during channel setup.
    pub wait_msg_cid: Option<Cid>,
    pub channel_id: Option<ChannelId>,
    pub message: String,
}

impl ClientDealState {
    pub fn new(
        proposal: DealProposal,
        client_wallet: Address,
        miner_wallet: Address,
        sender: PeerId,
        total_funds: TokenAmount,
    ) -> Self {
        let current_interval = proposal.params.payment_interval;
        Self {
            proposal,
            status: DealStatus::New,
            sender,
            client_wallet,
            miner_wallet,
            total_funds,
            funds_spent: TokenAmount::zero(),
            unseal_funds_paid: TokenAmount::zero(),
            payment_requested: TokenAmount::zero(),
            bytes_paid_for: 0,
            total_received: 0,
            current_interval,
            last_payment_requested: false,
            all_blocks_received: false,
            payment_info: None,
            wait_msg_cid: None,
            channel_id: None,
            message: String::new(),
        }
    }

    pub fn id(&self) -> DealID {
        self.proposal.id
    }

    /// What the deal owes the provider right now: any outstanding unseal
    /// fee plus every received byte not yet paid for.
    pub fn amount_owed(&self) -> TokenAmount {
        let params = &self.proposal.params;
        let mut unseal_owed = &params.unseal_price - &self.unseal_funds_paid;
        if unseal_owed.is_negative() {
            unseal_owed = TokenAmount::zero();
        }
        unseal_owed + &params.price_per_byte * (self.total_received - self.bytes_paid_for)
    }
}

/// Events that drive the client deal FSM. Each is applied by
/// [`apply_client_event`](crate::apply_client_event).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// The proposal went out on a freshly opened transfer channel.
    DealProposed { channel_id: ChannelId },
    WriteDealProposalErrored { error: String },
    DealRejected { message: String },
    DealNotFound { message: String },
    DealAccepted,
    UnknownResponseReceived,
    /// Channel setup failed before or while waiting on chain.
    PaymentChannelErrored { error: String },
    PaymentChannelCreateInitiated { msg_cid: Cid },
    PaymentChannelAddingFunds { pay_ch: Address, msg_cid: Cid },
    /// Free retrievals need no channel at all.
    PaymentChannelSkipped,
    PaymentChannelReady { pay_ch: Address, lane: u64 },
    PaymentChannelAddFundsErrored { error: String },
    /// Cumulative bytes received on the transfer channel.
    BlocksReceived { total: u64 },
    AllBlocksReceived,
    PaymentRequested { owed: TokenAmount },
    LastPaymentRequested { owed: TokenAmount },
    /// Decision by the `Ongoing` handler that payment processing starts.
    FundsNeeded { last: bool },
    /// Decision that funds are actually owed and must be sent.
    SendFunds,
    /// A voucher worth `amount` was transmitted and accounted.
    PaymentSent { amount: TokenAmount },
    PaymentFailed { error: String },
    WriteDealPaymentErrored { error: String },
    ProviderCancelled,
    /// The provider marked the transfer complete.
    Complete,
    CompleteVerified,
    /// Completion arrived before all blocks did.
    EarlyTermination,
    DataTransferError { error: String },
    CancelComplete,
    CloseDataTransferErrored { error: String },
}
