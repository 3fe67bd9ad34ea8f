// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;
use std::time::Duration;

use fvm_ipld_encoding::tuple::*;

use fil_retrieval_runtime::DealError;

use crate::types::{DealPayment, DealProposal, DealResponse, PeerId};

/// Identifies a data-transfer channel between two peers. Channel numbers
/// are allocated by the initiating side, so the initiator is part of the
/// identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize_tuple, Deserialize_tuple)]
pub struct ChannelId {
    pub initiator: PeerId,
    pub responder: PeerId,
    pub id: u64,
}

/// Progress and lifecycle notifications surfaced by the transport.
/// Events for one channel arrive in order; no ordering is defined across
/// channels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferEvent {
    /// The sending side shipped `bytes` more bytes on this channel.
    DataSent { bytes: u64 },
    /// The receiving side has now seen `total` cumulative bytes.
    DataReceived { total: u64 },
    /// An out-of-band response voucher arrived from the responder.
    ResponseReceived { response: DealResponse },
    /// An out-of-band payment voucher arrived from the initiator.
    VoucherReceived { payment: DealPayment },
    /// All blocks selected by the transfer have been delivered.
    Completed,
    /// The transfer failed; the channel is unusable.
    Failed { message: String },
    /// The remote side cancelled the transfer.
    Cancelled,
}

/// Callback invoked by the transport for every channel event.
pub type TransferSubscriber = Arc<dyn Fn(&ChannelId, TransferEvent) + Send + Sync>;

/// Facade over the data-transfer transport. The core never moves bytes
/// itself; it opens, pauses, resumes and closes channels and exchanges
/// out-of-band vouchers over them.
pub trait DataTransfer: Send + Sync {
    /// Open a pull channel to `to`, carrying the proposal as the channel
    /// voucher. The transfer starts paused on the responder side until the
    /// proposal is accepted.
    fn open_pull_channel(&self, to: &PeerId, proposal: &DealProposal)
        -> Result<ChannelId, DealError>;

    /// Send a payment voucher to the channel's responder.
    fn send_voucher(&self, channel: &ChannelId, payment: &DealPayment) -> Result<(), DealError>;

    /// Send a response voucher to the channel's initiator.
    fn send_response(&self, channel: &ChannelId, response: &DealResponse)
        -> Result<(), DealError>;

    /// Stop sending data on the channel until it is resumed.
    fn pause_channel(&self, channel: &ChannelId) -> Result<(), DealError>;

    fn resume_channel(&self, channel: &ChannelId) -> Result<(), DealError>;

    /// Close the channel, notifying the remote peer. Implementations must
    /// give up once `timeout` elapses and return a cancelled error.
    fn close_channel(&self, channel: &ChannelId, timeout: Duration) -> Result<(), DealError>;
}
