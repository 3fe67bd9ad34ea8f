// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_shared::address::Address;
use fvm_shared::crypto::signature::Signature;
use fvm_shared::econ::TokenAmount;
use fvm_shared::sector::SectorNumber;

use fil_retrieval_runtime::{CancelToken, DealError};

use crate::voucher::SignedVoucher;

/// Outcome of asking the payment gateway for a channel between two
/// wallets. Either an existing channel is reused (funds are merely added)
/// or creation is pending on the returned message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSetup {
    /// The channel address, when one already exists.
    pub pay_ch: Option<Address>,
    /// Message to wait on before the channel (or the added funds) is usable.
    pub wait_msg: Option<Cid>,
}

impl ChannelSetup {
    /// True when an existing channel is being topped up rather than created.
    pub fn add_funds_only(&self) -> bool {
        self.pay_ch.is_some()
    }
}

/// Voucher creation either yields a signed voucher or reports how much the
/// channel is short of covering the requested amount.
#[derive(Debug)]
pub enum VoucherCreateError {
    Shortfall(TokenAmount),
    Failed(DealError),
}

/// Client-side contract over the payment-channel actor and wallet.
///
/// Every method may block on chain traffic; all take a cancellation
/// handle, and cancelling must release any on-chain subscription held by
/// a pending wait.
pub trait RetrievalClientNode: Send + Sync {
    /// Get or create a payment channel from `client_wallet` to
    /// `miner_wallet`, ensuring it will hold at least `funds`.
    fn get_or_create_payment_channel(
        &self,
        client_wallet: &Address,
        miner_wallet: &Address,
        funds: &TokenAmount,
        cancel: &CancelToken,
    ) -> Result<ChannelSetup, DealError>;

    /// Wait for a pending channel-creation message and return the channel.
    fn wait_for_payment_channel_create(
        &self,
        wait_msg: &Cid,
        cancel: &CancelToken,
    ) -> Result<Address, DealError>;

    /// Wait for a pending add-funds message to land.
    fn wait_for_payment_channel_add_funds(
        &self,
        wait_msg: &Cid,
        cancel: &CancelToken,
    ) -> Result<(), DealError>;

    /// Allocate a fresh lane on the channel for this deal's vouchers.
    fn allocate_lane(&self, pay_ch: &Address) -> Result<u64, DealError>;

    /// Create and sign a voucher for the cumulative `amount` on the lane.
    fn create_payment_voucher(
        &self,
        pay_ch: &Address,
        lane: u64,
        amount: &TokenAmount,
        cancel: &CancelToken,
    ) -> Result<SignedVoucher, VoucherCreateError>;
}

/// Provider-side contract over the payment-channel actor and the sector
/// subsystem.
pub trait RetrievalProviderNode: Send + Sync {
    /// Verify the voucher is currently redeemable on the channel.
    fn check_voucher_spendable(
        &self,
        pay_ch: &Address,
        voucher: &SignedVoucher,
        cancel: &CancelToken,
    ) -> Result<bool, DealError>;

    /// Validate and persist a voucher, expecting it to be worth at least
    /// `expected` beyond what earlier vouchers on the lane redeemed.
    /// Returns the amount newly redeemed by this voucher.
    fn save_payment_voucher(
        &self,
        pay_ch: &Address,
        voucher: &SignedVoucher,
        expected: &TokenAmount,
        cancel: &CancelToken,
    ) -> Result<TokenAmount, DealError>;

    /// Whether the byte range is served by an unsealed copy of the sector.
    fn is_unsealed(
        &self,
        sector: SectorNumber,
        offset: u64,
        length: u64,
        cancel: &CancelToken,
    ) -> Result<bool, DealError>;

    /// Extract the byte range from a sealed sector so it can be served.
    fn unseal_sector(
        &self,
        sector: SectorNumber,
        offset: u64,
        length: u64,
        cancel: &CancelToken,
    ) -> Result<(), DealError>;

    /// Sign response bytes with the provider's worker wallet.
    fn sign_bytes(&self, data: &[u8], cancel: &CancelToken) -> Result<Signature, DealError>;
}
