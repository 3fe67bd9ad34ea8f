// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_ipld_encoding::tuple::*;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use num_traits::Zero;

use fil_retrieval_piecestore::PieceInfo;
use fil_retrieval_shared::{
    ChannelId, DealProposal, DealStatus, PeerId, ProviderDealIdentifier,
};

/// Everything the provider tracks about a single retrieval deal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct ProviderDealState {
    pub proposal: DealProposal,
    pub status: DealStatus,
    /// Peer the payload is being served to.
    pub receiver: PeerId,
    pub total_sent: u64,
    pub funds_received: TokenAmount,
    /// Byte boundary at which the next payment comes due.
    pub current_interval: u64,
    /// Bytes settled when the current interval was entered; bytes below
    /// this mark are never charged again.
    pub interval_low_water: u64,
    pub unseal_price_paid: TokenAmount,
    /// Channel the client's vouchers must draw on, fixed by the first
    /// accepted voucher.
    pub legal_payment_channel: Option<Address>,
    pub message: String,
    pub piece_info: Option<PieceInfo>,
    pub channel_id: Option<ChannelId>,
}

impl ProviderDealState {
    pub fn new(proposal: DealProposal, receiver: PeerId, channel_id: ChannelId) -> Self {
        let current_interval = proposal.params.payment_interval;
        Self {
            proposal,
            status: DealStatus::New,
            receiver,
            total_sent: 0,
            funds_received: TokenAmount::zero(),
            current_interval,
            interval_low_water: 0,
            unseal_price_paid: TokenAmount::zero(),
            legal_payment_channel: None,
            message: String::new(),
            piece_info: None,
            channel_id: Some(channel_id),
        }
    }

    pub fn identifier(&self) -> ProviderDealIdentifier {
        ProviderDealIdentifier { receiver: self.receiver.clone(), deal_id: self.proposal.id }
    }
}

/// Events that drive the provider deal FSM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The deal was accepted with nothing owed up front.
    Open,
    /// The revalidator demanded payment; `total_sent` is the byte count
    /// the demand covers.
    PaymentRequested { total_sent: u64 },
    UnsealError { error: String },
    UnsealComplete,
    /// Streaming was resumed after acceptance and unsealing.
    Unpaused,
    /// Cumulative bytes shipped on the transfer channel.
    BlockSent { total_sent: u64 },
    /// Every block selected by the transfer went out.
    BlocksCompleted,
    /// A voucher was credited but the demand is not fully covered yet.
    PartialPaymentReceived { amount: TokenAmount },
    /// A voucher settled everything demanded so far.
    PaymentReceived { amount: TokenAmount },
    SaveVoucherFailed { error: String },
    /// The deal is fully streamed and fully paid.
    Complete,
    CleanupComplete,
    DataTransferErrored { error: String },
    ClientCancelled,
    CancelComplete,
    CloseDataTransferErrored { error: String },
}
