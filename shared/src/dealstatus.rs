// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;

use fvm_ipld_encoding::repr::*;
use num_derive::FromPrimitive;

/// DealStatus is the status of a retrieval deal returned by getDealStatus
/// on both sides of the exchange. A single enum covers client-only and
/// provider-only statuses so responses carry one wire representation.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive, Serialize_repr, Deserialize_repr,
)]
#[repr(u64)]
pub enum DealStatus {
    /// New is a deal that nothing has happened with yet.
    New = 0,
    /// Unsealing means the provider is unsealing the sector the piece lives in.
    Unsealing = 1,
    /// Unsealed means the provider has unsealed the piece and can serve it.
    Unsealed = 2,
    /// WaitForAcceptance means the client is waiting for the provider's response.
    WaitForAcceptance = 3,
    /// PaymentChannelCreating is the status while a payment channel is being created.
    PaymentChannelCreating = 4,
    /// PaymentChannelAddingFunds is the status while funds are added to an existing channel.
    PaymentChannelAddingFunds = 5,
    /// Accepted means the provider accepted the proposal but streaming has not begun.
    Accepted = 6,
    /// FundsNeededUnseal means the provider is waiting on the unseal fee.
    FundsNeededUnseal = 7,
    /// Failing indicates something went wrong and the deal is being shut down orderly.
    Failing = 8,
    /// Rejected means the provider refused the proposal.
    Rejected = 9,
    /// FundsNeeded means the client owes the provider money for received bytes.
    FundsNeeded = 10,
    /// SendFunds means the client is about to send funds it owes.
    SendFunds = 11,
    /// SendFundsLastPayment means the client is sending the final payment.
    SendFundsLastPayment = 12,
    /// Ongoing means the data transfer is in progress.
    Ongoing = 13,
    /// FundsNeededLastPayment means the client owes the final payment.
    FundsNeededLastPayment = 14,
    /// Completed is a deal that succeeded.
    Completed = 15,
    /// DealNotFound means the provider could not locate the requested payload.
    DealNotFound = 16,
    /// Errored is a deal that failed irrecoverably.
    Errored = 17,
    /// BlocksComplete means all blocks have been sent but the deal is not settled.
    BlocksComplete = 18,
    /// Finalizing means the last payment has been handled and the deal is wrapping up.
    Finalizing = 19,
    /// CheckComplete means the transfer finished and the client is verifying it
    /// received everything it asked for.
    CheckComplete = 20,
}

impl DealStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DealStatus::Completed
                | DealStatus::Errored
                | DealStatus::Rejected
                | DealStatus::DealNotFound
        )
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DealStatus::New => "DealStatusNew",
            DealStatus::Unsealing => "DealStatusUnsealing",
            DealStatus::Unsealed => "DealStatusUnsealed",
            DealStatus::WaitForAcceptance => "DealStatusWaitForAcceptance",
            DealStatus::PaymentChannelCreating => "DealStatusPaymentChannelCreating",
            DealStatus::PaymentChannelAddingFunds => "DealStatusPaymentChannelAddingFunds",
            DealStatus::Accepted => "DealStatusAccepted",
            DealStatus::FundsNeededUnseal => "DealStatusFundsNeededUnseal",
            DealStatus::Failing => "DealStatusFailing",
            DealStatus::Rejected => "DealStatusRejected",
            DealStatus::FundsNeeded => "DealStatusFundsNeeded",
            DealStatus::SendFunds => "DealStatusSendFunds",
            DealStatus::SendFundsLastPayment => "DealStatusSendFundsLastPayment",
            DealStatus::Ongoing => "DealStatusOngoing",
            DealStatus::FundsNeededLastPayment => "DealStatusFundsNeededLastPayment",
            DealStatus::Completed => "DealStatusCompleted",
            DealStatus::DealNotFound => "DealStatusDealNotFound",
            DealStatus::Errored => "DealStatusErrored",
            DealStatus::BlocksComplete => "DealStatusBlocksComplete",
            DealStatus::Finalizing => "DealStatusFinalizing",
            DealStatus::CheckComplete => "DealStatusCheckComplete",
        };
        f.write_str(name)
    }
}
