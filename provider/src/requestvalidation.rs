// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Acceptance of incoming retrieval proposals: ask validation, the
//! embedder's deal decision hook, and handoff into the deal FSM.

use cid::Cid;
use num_traits::Zero;

use fil_retrieval_piecestore::PieceInfo;
use fil_retrieval_runtime::{CancelToken, DealError};
use fil_retrieval_shared::{
    Ask, ChannelId, DealProposal, DealResponse, DealStatus, Params, PeerId,
};

use crate::types::ProviderDealState;

/// Inputs to the embedder's pricing function for one proposal.
#[derive(Clone, Debug)]
pub struct PricingInput {
    pub payload_cid: Cid,
    /// Piece the payload would be served from.
    pub piece_cid: Vec<u8>,
    pub unsealed: bool,
    pub client: PeerId,
}

/// Capabilities proposal validation runs against.
pub trait ValidationEnvironment: Send + Sync {
    /// Terms to quote for this retrieval; pricing is a pure function of
    /// the input supplied by the embedder.
    fn get_ask(&self, input: PricingInput) -> Result<Ask, DealError>;

    /// Find the piece to serve the payload from, preferring unsealed
    /// copies, honoring a client-specified piece.
    fn get_piece(
        &self,
        payload_cid: &Cid,
        piece_cid: Option<&Cid>,
        cancel: &CancelToken,
    ) -> Result<(PieceInfo, bool), DealError>;

    /// Embedder veto over otherwise-acceptable deals. Returns acceptance
    /// and a reason when refused.
    fn run_deal_decision_logic(&self, deal: &ProviderDealState) -> (bool, String);

    /// Insert the accepted deal into the FSM store and fire its first
    /// event: a demand for the unseal fee when one is due, plain `Open`
    /// otherwise.
    fn begin_tracking(&self, deal: ProviderDealState) -> Result<(), DealError>;
}

/// Verifies the proposed params are acceptable against the quoted ask.
pub fn check_deal_params(ask: &Ask, params: &Params) -> Result<(), DealError> {
    if params.price_per_byte < ask.price_per_byte {
        return Err(DealError::precondition("Price per byte too low".to_string()));
    }
    if params.payment_interval > ask.payment_interval {
        return Err(DealError::precondition("Payment interval too large".to_string()));
    }
    if params.payment_interval_increase > ask.payment_interval_increase {
        return Err(DealError::precondition("Payment interval increase too large".to_string()));
    }
    if params.unseal_price < ask.unseal_price {
        return Err(DealError::precondition("Unseal price too small".to_string()));
    }
    Ok(())
}

/// Validates a pull request opening a retrieval deal and, when accepted,
/// hands the deal to the FSM. Always produces the response voucher to
/// return to the client.
pub struct ProviderRequestValidator<VE: ValidationEnvironment> {
    env: VE,
}

impl<VE: ValidationEnvironment> ProviderRequestValidator<VE> {
    pub fn new(env: VE) -> Self {
        Self { env }
    }

    pub fn validate_pull(
        &self,
        receiver: PeerId,
        proposal: &DealProposal,
        channel_id: ChannelId,
        cancel: &CancelToken,
    ) -> DealResponse {
        let id = proposal.id;
        let reject = |status: DealStatus, message: String| DealResponse {
            status,
            id,
            payment_owed: Zero::zero(),
            message,
        };

        let mut deal = ProviderDealState::new(proposal.clone(), receiver.clone(), channel_id);

        let (piece_info, unsealed) = match self.env.get_piece(
            &proposal.payload_cid,
            proposal.params.piece_cid.as_ref(),
            cancel,
        ) {
            Ok(found) => found,
            Err(e) => {
                log::info!("rejecting deal {}: {}", id, e.msg());
                return reject(DealStatus::DealNotFound, e.msg().to_string());
            }
        };

        let ask = match self.env.get_ask(PricingInput {
            payload_cid: proposal.payload_cid,
            piece_cid: piece_info.piece_cid.clone(),
            unsealed,
            client: receiver,
        }) {
            Ok(ask) => ask,
            Err(e) => return reject(DealStatus::Rejected, e.msg().to_string()),
        };

        if let Err(e) = check_deal_params(&ask, &proposal.params) {
            log::info!("rejecting deal {}: {}", id, e.msg());
            return reject(DealStatus::Rejected, e.msg().to_string());
        }

        deal.piece_info = Some(piece_info);

        let (accepted, reason) = self.env.run_deal_decision_logic(&deal);
        if !accepted {
            log::info!("deal decider refused deal {}: {}", id, reason);
            return reject(DealStatus::Rejected, reason);
        }

        let unseal_price = deal.proposal.params.unseal_price.clone();
        if let Err(e) = self.env.begin_tracking(deal) {
            return reject(DealStatus::Errored, e.msg().to_string());
        }

        if unseal_price.is_zero() {
            DealResponse { status: DealStatus::Accepted, id, payment_owed: Zero::zero(), message: String::new() }
        } else {
            // the client pays for unsealing before any bytes flow
            DealResponse {
                status: DealStatus::FundsNeededUnseal,
                id,
                payment_owed: unseal_price,
                message: String::new(),
            }
        }
    }
}
