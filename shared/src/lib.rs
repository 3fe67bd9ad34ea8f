// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::time::Duration;

pub use self::dealstatus::DealStatus;
pub use self::nodes::{ChannelSetup, RetrievalClientNode, RetrievalProviderNode, VoucherCreateError};
pub use self::transport::{ChannelId, DataTransfer, TransferEvent, TransferSubscriber};
pub use self::types::{
    Ask, DealID, DealPayment, DealProposal, DealResponse, Params, PaymentInfo, PeerId,
    ProviderDealIdentifier, RetrievalPeer, DEAL_PAYMENT_VOUCHER_TYPE, DEAL_PROPOSAL_VOUCHER_TYPE,
    DEAL_RESPONSE_VOUCHER_TYPE,
};
pub use self::voucher::SignedVoucher;

pub mod dealstatus;
pub mod network;
pub mod nodes;
pub mod transport;
pub mod types;
pub mod voucher;

/// How long a terminating deal waits for the transport to acknowledge a
/// channel close before giving up and completing termination anyway.
pub const CLOSE_DATA_TRANSFER_TIMEOUT: Duration = Duration::from_secs(5);
