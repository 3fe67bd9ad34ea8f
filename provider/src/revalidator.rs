// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Payment metering: turns per-channel byte counters into payment demands
//! and charges incoming vouchers against them. The channel pause at each
//! boundary is the provider's only backpressure on the payer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use num_traits::Zero;

use fil_retrieval_runtime::{CancelToken, DealError};
use fil_retrieval_shared::{
    ChannelId, DealPayment, DealResponse, DealStatus, ProviderDealIdentifier,
    RetrievalProviderNode,
};

use crate::types::{ProviderDealState, ProviderEvent};

/// How long an unsatisfied payment demand tolerates invalid vouchers
/// before the deal fails.
pub const DEFAULT_PAYMENT_GRACE: Duration = Duration::from_secs(30);

/// Capabilities the revalidator runs against. It may signal the FSM (by
/// identifier, not by reference) and steer the transport.
pub trait RevalidatorEnvironment: Send + Sync {
    fn node(&self) -> &dyn RetrievalProviderNode;

    fn send_event(
        &self,
        deal: &ProviderDealIdentifier,
        event: ProviderEvent,
    ) -> Result<(), DealError>;

    fn pause_channel(&self, channel: &ChannelId) -> Result<(), DealError>;

    fn resume_channel(&self, channel: &ChannelId) -> Result<(), DealError>;

    fn send_response(&self, channel: &ChannelId, response: DealResponse)
        -> Result<(), DealError>;
}

/// Per-channel metering state.
struct ChannelState {
    deal: ProviderDealIdentifier,
    price_per_byte: TokenAmount,
    interval_increase: u64,
    unseal_price: TokenAmount,
    unseal_paid: TokenAmount,
    current_interval: u64,
    total_sent: u64,
    /// Bytes covered by settled payments; never charged again.
    bytes_paid_for: u64,
    /// Bytes the outstanding demand covers.
    requested_for_bytes: u64,
    funds_received: TokenAmount,
    /// Outstanding demand; zero while streaming freely.
    owed: TokenAmount,
    /// The outstanding demand settles the deal.
    pending_last: bool,
    all_blocks_sent: bool,
    requested_at: Option<Instant>,
    lane: Option<u64>,
    payment_channel: Option<Address>,
}

impl ChannelState {
    fn from_deal(deal: &ProviderDealState) -> Self {
        let params = &deal.proposal.params;
        let unseal_owed = &params.unseal_price - &deal.unseal_price_paid;
        let owed =
            if unseal_owed.is_negative() { TokenAmount::zero() } else { unseal_owed };
        let requested_at = (!owed.is_zero()).then(Instant::now);
        Self {
            deal: deal.identifier(),
            price_per_byte: params.price_per_byte.clone(),
            interval_increase: params.payment_interval_increase,
            unseal_price: params.unseal_price.clone(),
            unseal_paid: deal.unseal_price_paid.clone(),
            current_interval: deal.current_interval,
            total_sent: deal.total_sent,
            bytes_paid_for: deal.interval_low_water,
            requested_for_bytes: deal.interval_low_water,
            funds_received: deal.funds_received.clone(),
            owed,
            pending_last: false,
            all_blocks_sent: false,
            requested_at,
            lane: None,
            payment_channel: deal.legal_payment_channel,
        }
    }

    /// Everything unpaid right now: unseal remainder plus unsettled bytes.
    fn outstanding(&self) -> TokenAmount {
        let mut unseal_owed = &self.unseal_price - &self.unseal_paid;
        if unseal_owed.is_negative() {
            unseal_owed = TokenAmount::zero();
        }
        unseal_owed + &self.price_per_byte * (self.total_sent - self.bytes_paid_for)
    }
}

/// Converts transfer progress into payment demands and validates the
/// vouchers that answer them.
pub struct ProviderRevalidator<E: RevalidatorEnvironment> {
    env: E,
    channels: Mutex<HashMap<ChannelId, ChannelState>>,
    grace: Duration,
}

impl<E: RevalidatorEnvironment> ProviderRevalidator<E> {
    pub fn new(env: E) -> Self {
        Self::with_grace(env, DEFAULT_PAYMENT_GRACE)
    }

    pub fn with_grace(env: E, grace: Duration) -> Self {
        Self { env, channels: Mutex::new(HashMap::new()), grace }
    }

    pub fn environment(&self) -> &E {
        &self.env
    }

    /// Begin metering a deal's channel. Re-tracking refreshes the pricing
    /// snapshot but keeps the lane and channel pinned by earlier vouchers.
    pub fn track_channel(&self, deal: &ProviderDealState) -> Result<(), DealError> {
        let channel_id = deal
            .channel_id
            .clone()
            .ok_or_else(|| DealError::precondition("deal has no transfer channel".to_string()))?;
        let mut channels = self.channels.lock().unwrap();
        let mut state = ChannelState::from_deal(deal);
        if let Some(prev) = channels.remove(&channel_id) {
            state.lane = prev.lane;
            state.payment_channel = state.payment_channel.or(prev.payment_channel);
        }
        channels.insert(channel_id, state);
        Ok(())
    }

    pub fn untrack_channel(&self, deal: &ProviderDealState) {
        if let Some(channel_id) = &deal.channel_id {
            self.channels.lock().unwrap().remove(channel_id);
        }
    }

    /// Deal owning a tracked channel, if any.
    pub fn deal_for(&self, channel_id: &ChannelId) -> Option<ProviderDealIdentifier> {
        self.channels.lock().unwrap().get(channel_id).map(|st| st.deal.clone())
    }

    /// Handle `bytes` more bytes going out on the channel. At each
    /// boundary crossing this demands payment and pauses the channel.
    pub fn on_data_sent(&self, channel_id: &ChannelId, bytes: u64) -> Result<(), DealError> {
        let mut channels = self.channels.lock().unwrap();
        let st = match channels.get_mut(channel_id) {
            Some(st) => st,
            None => return Ok(()),
        };
        st.total_sent += bytes;
        self.env.send_event(&st.deal, ProviderEvent::BlockSent { total_sent: st.total_sent })?;

        if !st.owed.is_zero() {
            // a demand is already outstanding; these bytes were in flight
            // before the pause landed and will be charged next boundary
            return Ok(());
        }
        if st.total_sent < st.current_interval {
            return Ok(());
        }
        let owed = &st.price_per_byte * (st.total_sent - st.bytes_paid_for);
        if owed.is_zero() {
            return Ok(());
        }

        st.owed = owed.clone();
        st.requested_for_bytes = st.total_sent;
        st.requested_at = Some(Instant::now());
        log::debug!(
            "deal {}: {} bytes sent, demanding {} and pausing",
            st.deal,
            st.total_sent,
            owed
        );
        self.env.pause_channel(channel_id)?;
        self.env
            .send_event(&st.deal, ProviderEvent::PaymentRequested { total_sent: st.total_sent })?;
        self.env.send_response(
            channel_id,
            DealResponse {
                status: DealStatus::FundsNeeded,
                id: st.deal.deal_id,
                payment_owed: owed,
                message: String::new(),
            },
        )
    }

    /// Handle a payment voucher arriving on the channel.
    pub fn on_voucher_received(
        &self,
        channel_id: &ChannelId,
        payment: &DealPayment,
        cancel: &CancelToken,
    ) -> Result<(), DealError> {
        let mut channels = self.channels.lock().unwrap();
        let st = match channels.get_mut(channel_id) {
            Some(st) => st,
            None => return Ok(()),
        };
        if st.owed.is_zero() {
            log::debug!("deal {}: ignoring unsolicited voucher", st.deal);
            return Ok(());
        }

        match self.process_payment(st, payment, cancel) {
            Ok(received) if received >= st.owed => {
                let settled_bytes = st.requested_for_bytes > st.bytes_paid_for;
                st.funds_received += &received;
                let mut unseal_owed = &st.unseal_price - &st.unseal_paid;
                if unseal_owed.is_negative() {
                    unseal_owed = TokenAmount::zero();
                }
                st.unseal_paid += std::cmp::min(unseal_owed, received.clone());
                st.bytes_paid_for = st.requested_for_bytes;
                if settled_bytes {
                    st.current_interval += st.interval_increase;
                }
                st.owed = TokenAmount::zero();
                st.requested_at = None;
                self.env
                    .send_event(&st.deal, ProviderEvent::PaymentReceived { amount: received })?;

                if st.pending_last && st.all_blocks_sent {
                    self.env.send_event(&st.deal, ProviderEvent::Complete)?;
                    self.env.send_response(
                        channel_id,
                        DealResponse {
                            status: DealStatus::Completed,
                            id: st.deal.deal_id,
                            payment_owed: TokenAmount::zero(),
                            message: String::new(),
                        },
                    )?;
                } else if settled_bytes {
                    self.env.resume_channel(channel_id)?;
                }
                Ok(())
            }
            Ok(received) => {
                // partial payment: credit it, stay paused, demand the rest
                st.funds_received += &received;
                let mut unseal_owed = &st.unseal_price - &st.unseal_paid;
                if unseal_owed.is_negative() {
                    unseal_owed = TokenAmount::zero();
                }
                st.unseal_paid += std::cmp::min(unseal_owed, received.clone());
                st.owed = &st.owed - &received;
                self.env.send_event(
                    &st.deal,
                    ProviderEvent::PartialPaymentReceived { amount: received },
                )?;
                self.env.send_response(
                    channel_id,
                    DealResponse {
                        status: if st.pending_last {
                            DealStatus::FundsNeededLastPayment
                        } else {
                            DealStatus::FundsNeeded
                        },
                        id: st.deal.deal_id,
                        payment_owed: st.owed.clone(),
                        message: String::new(),
                    },
                )
            }
            Err(e) => {
                let expired = st
                    .requested_at
                    .map(|at| at.elapsed() > self.grace)
                    .unwrap_or(true);
                if expired {
                    self.env.send_event(
                        &st.deal,
                        ProviderEvent::SaveVoucherFailed { error: e.msg().to_string() },
                    )
                } else {
                    log::warn!("deal {}: rejecting voucher: {}", st.deal, e.msg());
                    self.env.send_response(
                        channel_id,
                        DealResponse {
                            status: if st.pending_last {
                                DealStatus::FundsNeededLastPayment
                            } else {
                                DealStatus::FundsNeeded
                            },
                            id: st.deal.deal_id,
                            payment_owed: st.owed.clone(),
                            message: e.msg().to_string(),
                        },
                    )
                }
            }
        }
    }

    /// Validate the voucher and save it to the gateway, returning the
    /// amount it newly redeems.
    fn process_payment(
        &self,
        st: &mut ChannelState,
        payment: &DealPayment,
        cancel: &CancelToken,
    ) -> Result<TokenAmount, DealError> {
        let voucher = &payment.payment_voucher;

        if let Some(expected) = &st.payment_channel {
            if &payment.payment_channel != expected {
                return Err(DealError::protocol(format!(
                    "voucher for wrong channel: expected {}, got {}",
                    expected, payment.payment_channel
                )));
            }
        }
        if voucher.channel_addr != payment.payment_channel {
            return Err(DealError::protocol(
                "voucher channel does not match payment channel".to_string(),
            ));
        }
        if let Some(lane) = st.lane {
            if voucher.lane != lane {
                return Err(DealError::protocol(format!(
                    "voucher on wrong lane: expected {}, got {}",
                    lane, voucher.lane
                )));
            }
        }

        let node = self.env.node();
        if !node.check_voucher_spendable(&payment.payment_channel, voucher, cancel)? {
            return Err(DealError::protocol("voucher is not spendable".to_string()));
        }
        let expected = &st.funds_received + &st.owed;
        let received =
            node.save_payment_voucher(&payment.payment_channel, voucher, &expected, cancel)?;

        st.payment_channel = Some(payment.payment_channel);
        st.lane = Some(voucher.lane);
        Ok(received)
    }

    /// Handle the transport reporting the traversal finished: demand any
    /// remaining balance as the last payment, or complete outright.
    pub fn on_complete(&self, channel_id: &ChannelId) -> Result<(), DealError> {
        let mut channels = self.channels.lock().unwrap();
        let st = match channels.get_mut(channel_id) {
            Some(st) => st,
            None => return Ok(()),
        };
        st.all_blocks_sent = true;
        self.env.send_event(&st.deal, ProviderEvent::BlocksCompleted)?;

        if !st.owed.is_zero() {
            // fold the outstanding demand into the final settlement
            st.pending_last = true;
            st.owed = st.outstanding();
            st.requested_for_bytes = st.total_sent;
            return self.env.send_response(
                channel_id,
                DealResponse {
                    status: DealStatus::FundsNeededLastPayment,
                    id: st.deal.deal_id,
                    payment_owed: st.owed.clone(),
                    message: String::new(),
                },
            );
        }

        let outstanding = st.outstanding();
        if outstanding.is_zero() {
            self.env.send_event(&st.deal, ProviderEvent::Complete)?;
            return self.env.send_response(
                channel_id,
                DealResponse {
                    status: DealStatus::Completed,
                    id: st.deal.deal_id,
                    payment_owed: TokenAmount::zero(),
                    message: String::new(),
                },
            );
        }

        st.owed = outstanding.clone();
        st.requested_for_bytes = st.total_sent;
        st.pending_last = true;
        st.requested_at = Some(Instant::now());
        self.env
            .send_event(&st.deal, ProviderEvent::PaymentRequested { total_sent: st.total_sent })?;
        self.env.send_response(
            channel_id,
            DealResponse {
                status: DealStatus::FundsNeededLastPayment,
                id: st.deal.deal_id,
                payment_owed: outstanding,
                message: String::new(),
            },
        )
    }

    /// Route a transport failure or client cancel to the owning deal.
    pub fn on_transfer_failed(&self, channel_id: &ChannelId, event: ProviderEvent) {
        if let Some(deal) = self.deal_for(channel_id) {
            if let Err(e) = self.env.send_event(&deal, event) {
                log::error!("failed to signal transfer failure for deal {}: {}", deal, e);
            }
        }
    }
}
