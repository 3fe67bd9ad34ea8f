// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;

use cid::Cid;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::{strict_bytes, to_vec, RawBytes, DAG_CBOR};
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use multihash_codetable::{Code, MultihashDigest};
use num_traits::Zero;

use fil_retrieval_runtime::DealError;

use crate::dealstatus::DealStatus;
use crate::voucher::SignedVoucher;

/// Identifier for a retrieval deal, allocated by the client proposing it.
/// Distinct from the storage-market deal ids referenced by piece metadata.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct DealID(pub u64);

impl fmt::Display for DealID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque libp2p peer identity. The transport hands these out; the core
/// only compares and prints them.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct PeerId(#[serde(with = "strict_bytes")] pub Vec<u8>);

impl PeerId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Identifies a provider-side deal: retrieval deal ids are only unique per
/// requesting peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize_tuple, Deserialize_tuple)]
pub struct ProviderDealIdentifier {
    pub receiver: PeerId,
    pub deal_id: DealID,
}

impl fmt::Display for ProviderDealIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.receiver, self.deal_id)
    }
}

/// Pricing and settlement terms under which a retrieval proceeds.
///
/// `payment_interval` is the first boundary, in bytes, at which a payment
/// comes due; after each fully settled payment the gap to the next boundary
/// grows by `payment_interval_increase`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct Params {
    /// Opaque DAG traversal selector; `None` retrieves the whole DAG.
    pub selector: Option<RawBytes>,
    /// Piece the client wants the payload served from, if it cares.
    pub piece_cid: Option<Cid>,
    pub price_per_byte: TokenAmount,
    pub payment_interval: u64,
    pub payment_interval_increase: u64,
    pub unseal_price: TokenAmount,
}

impl Params {
    pub fn new(
        price_per_byte: TokenAmount,
        payment_interval: u64,
        payment_interval_increase: u64,
    ) -> Self {
        Self {
            selector: None,
            piece_cid: None,
            price_per_byte,
            payment_interval,
            payment_interval_increase,
            unseal_price: TokenAmount::zero(),
        }
    }

    pub fn with_piece(mut self, piece_cid: Cid) -> Self {
        self.piece_cid = Some(piece_cid);
        self
    }

    pub fn with_selector(mut self, selector: RawBytes) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_unseal_price(mut self, unseal_price: TokenAmount) -> Self {
        self.unseal_price = unseal_price;
        self
    }

    /// Boundary following `current_interval` once a payment at or above it
    /// has fully settled.
    pub fn next_interval(&self, current_interval: u64) -> u64 {
        current_interval + self.payment_interval_increase
    }

    /// Whether any payment can ever come due under these terms.
    pub fn is_free(&self) -> bool {
        self.price_per_byte.is_zero() && self.unseal_price.is_zero()
    }
}

/// A proposal for a new retrieval deal, sent as the out-of-band voucher
/// when the client opens the data-transfer channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct DealProposal {
    pub payload_cid: Cid,
    pub id: DealID,
    pub params: Params,
}

/// Voucher-type identifier for [`DealProposal`] on the transfer channel.
pub const DEAL_PROPOSAL_VOUCHER_TYPE: &str = "RetrievalDealProposal";

impl DealProposal {
    /// Content identifier of the canonical CBOR encoding of this proposal.
    pub fn cid(&self) -> Result<Cid, DealError> {
        let data = to_vec(self)?;
        Ok(Cid::new_v1(DAG_CBOR, Code::Blake2b256.digest(&data)))
    }
}

/// A response to a retrieval deal proposal, carried back out-of-band on
/// the same channel. Also used to demand payments mid-transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct DealResponse {
    pub status: DealStatus,
    pub id: DealID,
    /// Set when the provider is waiting on funds before it continues.
    pub payment_owed: TokenAmount,
    pub message: String,
}

/// Voucher-type identifier for [`DealResponse`] results.
pub const DEAL_RESPONSE_VOUCHER_TYPE: &str = "RetrievalDealResponse";

/// A payment the client sends mid-transfer: a signed payment-channel
/// voucher covering everything owed so far.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct DealPayment {
    pub id: DealID,
    pub payment_channel: Address,
    pub payment_voucher: SignedVoucher,
}

/// Voucher-type identifier for [`DealPayment`] on the transfer channel.
pub const DEAL_PAYMENT_VOUCHER_TYPE: &str = "RetrievalDealPayment";

/// Payment-channel coordinates for a deal, populated lazily while the
/// channel is set up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct PaymentInfo {
    pub pay_ch: Address,
    pub lane: u64,
}

impl Default for PaymentInfo {
    fn default() -> Self {
        Self { pay_ch: Address::new_id(0), lane: 0 }
    }
}

/// A provider's posted terms for retrievals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct Ask {
    pub price_per_byte: TokenAmount,
    pub payment_interval: u64,
    pub payment_interval_increase: u64,
    pub unseal_price: TokenAmount,
}

impl Default for Ask {
    fn default() -> Self {
        Self {
            price_per_byte: TokenAmount::from_atto(2),
            payment_interval: 1 << 20,
            payment_interval_increase: 1 << 20,
            unseal_price: TokenAmount::zero(),
        }
    }
}

/// A peer known to serve retrievals, as advertised by discovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct RetrievalPeer {
    pub address: Address,
    pub id: PeerId,
}
