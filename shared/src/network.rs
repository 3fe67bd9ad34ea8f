// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Fixed-shape messages exchanged over the market protocols. Every struct
//! here has a distinguishable "undefined" form (an explicit absence,
//! checked with `is_empty()`) rather than a magic zero value, so decoders
//! can reject ambiguous messages.

use cid::Cid;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::address::Address;
use fvm_shared::crypto::signature::Signature;
use fvm_shared::econ::TokenAmount;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::dealstatus::DealStatus;
use crate::types::{Ask, DealID, DealProposal, RetrievalPeer};

/// Data sent over the network from client to provider when proposing a
/// deal for publication.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct Proposal {
    pub deal_proposal: Option<DealProposal>,
    pub piece: Option<Cid>,
}

impl Proposal {
    pub fn is_empty(&self) -> bool {
        self.deal_proposal.is_none() && self.piece.is_none()
    }
}

/// A response to a proposal sent over the network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct Response {
    pub state: DealStatus,
    /// Set when the proposal was rejected.
    pub message: String,
    pub proposal: Option<Cid>,
    /// Set when the deal was accepted and published on chain.
    pub publish_message: Option<Cid>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            state: DealStatus::New,
            message: String::new(),
            proposal: None,
            publish_message: None,
        }
    }
}

impl Response {
    pub fn is_empty(&self) -> bool {
        self.proposal.is_none() && self.publish_message.is_none() && self.message.is_empty()
    }
}

/// A response that is signed by the provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct SignedResponse {
    pub response: Response,
    pub signature: Option<Signature>,
}

impl SignedResponse {
    pub fn is_empty(&self) -> bool {
        self.response.is_empty() && self.signature.is_none()
    }
}

/// A request for the current ask of a given provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct AskRequest {
    pub provider: Option<Address>,
}

impl AskRequest {
    pub fn is_empty(&self) -> bool {
        self.provider.is_none()
    }
}

/// An ask signed by the provider's wallet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct SignedAsk {
    pub ask: Option<Ask>,
    pub signature: Option<Signature>,
}

impl SignedAsk {
    pub fn is_empty(&self) -> bool {
        self.ask.is_none() && self.signature.is_none()
    }
}

/// The response sent over the network in response to an ask request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct AskResponse {
    pub ask: Option<SignedAsk>,
}

impl AskResponse {
    pub fn is_empty(&self) -> bool {
        self.ask.is_none()
    }
}

/// Sent by a client to query the status of a deal by proposal CID.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct DealStatusRequest {
    pub proposal: Option<Cid>,
    pub signature: Option<Signature>,
}

impl DealStatusRequest {
    pub fn is_empty(&self) -> bool {
        self.proposal.is_none() && self.signature.is_none()
    }
}

/// A provider's signed answer to a [`DealStatusRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct DealStatusResponse {
    pub status: DealStatus,
    pub id: DealID,
    pub total_sent: u64,
    pub funds_received: TokenAmount,
    pub message: String,
    pub signature: Option<Signature>,
}

impl Default for DealStatusResponse {
    fn default() -> Self {
        Self {
            status: DealStatus::New,
            id: DealID(0),
            total_sent: 0,
            funds_received: TokenAmount::zero(),
            message: String::new(),
            signature: None,
        }
    }
}

impl DealStatusResponse {
    pub fn is_empty(&self) -> bool {
        self.signature.is_none() && self.message.is_empty() && self.id == DealID(0)
    }
}

/// The voucher type used by the storage-deal publication subsystem on its
/// own transfer channels. Carried here because both markets share the wire
/// registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct StorageDataTransferVoucher {
    pub proposal: Cid,
}

/// Unique string identifier for a [`StorageDataTransferVoucher`].
pub const STORAGE_DATA_TRANSFER_VOUCHER_TYPE: &str = "StorageDataTransferVoucher";

/// Peers advertised as holding a payload. Serialized as a single-entry
/// CBOR map so fields can be added without breaking old decoders; any
/// change must preserve that envelope.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalPeers {
    #[serde(rename = "Peers")]
    pub peers: Vec<RetrievalPeer>,
}
