// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Routing from transport events to client FSM events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use fil_retrieval_runtime::StateGroup;
use fil_retrieval_shared::{
    ChannelId, DealID, DealResponse, DealStatus, TransferEvent, TransferSubscriber,
};

use crate::types::{ClientDealState, ClientEvent};

/// Translate a provider response voucher into client events.
pub fn client_events_for_response(response: &DealResponse) -> Vec<ClientEvent> {
    match response.status {
        DealStatus::Accepted => vec![ClientEvent::DealAccepted],
        DealStatus::Rejected => {
            vec![ClientEvent::DealRejected { message: response.message.clone() }]
        }
        DealStatus::DealNotFound => {
            vec![ClientEvent::DealNotFound { message: response.message.clone() }]
        }
        // acceptance conditioned on the unseal fee being paid up front
        DealStatus::FundsNeededUnseal => vec![
            ClientEvent::DealAccepted,
            ClientEvent::PaymentRequested { owed: response.payment_owed.clone() },
        ],
        DealStatus::FundsNeeded => {
            vec![ClientEvent::PaymentRequested { owed: response.payment_owed.clone() }]
        }
        DealStatus::FundsNeededLastPayment => {
            vec![ClientEvent::LastPaymentRequested { owed: response.payment_owed.clone() }]
        }
        DealStatus::Completed => vec![ClientEvent::Complete],
        DealStatus::Ongoing => vec![],
        _ => vec![ClientEvent::UnknownResponseReceived],
    }
}

/// Subscriber feeding a client FSM group from its transfer channels.
/// `channels` maps open channels back to the deals that opened them.
pub fn transfer_subscriber(
    deals: Arc<StateGroup<DealID, ClientDealState, ClientEvent>>,
    channels: Arc<Mutex<HashMap<ChannelId, DealID>>>,
) -> TransferSubscriber {
    Arc::new(move |channel_id, event| {
        let deal_id = match &event {
            TransferEvent::ResponseReceived { response } => Some(response.id),
            _ => channels.lock().unwrap().get(channel_id).copied(),
        };
        let deal_id = match deal_id {
            Some(id) => id,
            None => {
                log::debug!("ignoring transfer event for unknown channel {}", channel_id.id);
                return;
            }
        };

        let events = match event {
            TransferEvent::DataReceived { total } => {
                vec![ClientEvent::BlocksReceived { total }]
            }
            TransferEvent::ResponseReceived { response } => {
                client_events_for_response(&response)
            }
            // the transport finished the traversal: everything arrived.
            // the deal itself completes on the provider's final response
            TransferEvent::Completed => vec![ClientEvent::AllBlocksReceived],
            TransferEvent::Failed { message } => {
                vec![ClientEvent::DataTransferError { error: message }]
            }
            TransferEvent::Cancelled => vec![ClientEvent::ProviderCancelled],
            // sender-side notifications are not ours
            TransferEvent::DataSent { .. } | TransferEvent::VoucherReceived { .. } => vec![],
        };
        for client_event in events {
            if let Err(e) = deals.send(&deal_id, client_event) {
                log::error!("failed to route transfer event to deal {}: {}", deal_id, e);
            }
        }
    })
}
