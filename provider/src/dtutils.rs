// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Routing from transport events to the revalidator and provider FSM.

use std::sync::Arc;

use fil_retrieval_runtime::CancelToken;
use fil_retrieval_shared::{TransferEvent, TransferSubscriber};

use crate::revalidator::{ProviderRevalidator, RevalidatorEnvironment};
use crate::types::ProviderEvent;

/// Subscriber feeding a provider's revalidator from its transfer
/// channels.
pub fn transfer_subscriber<E: RevalidatorEnvironment + 'static>(
    revalidator: Arc<ProviderRevalidator<E>>,
) -> TransferSubscriber {
    Arc::new(move |channel_id, event| {
        let cancel = CancelToken::new();
        let result = match event {
            TransferEvent::DataSent { bytes } => revalidator.on_data_sent(channel_id, bytes),
            TransferEvent::VoucherReceived { payment } => {
                revalidator.on_voucher_received(channel_id, &payment, &cancel)
            }
            TransferEvent::Completed => revalidator.on_complete(channel_id),
            TransferEvent::Failed { message } => {
                revalidator.on_transfer_failed(
                    channel_id,
                    ProviderEvent::DataTransferErrored { error: message },
                );
                Ok(())
            }
            TransferEvent::Cancelled => {
                revalidator.on_transfer_failed(channel_id, ProviderEvent::ClientCancelled);
                Ok(())
            }
            // receiver-side notifications are not ours
            TransferEvent::DataReceived { .. } | TransferEvent::ResponseReceived { .. } => Ok(()),
        };
        if let Err(e) = result {
            log::error!("handling transfer event on channel {}: {}", channel_id.id, e);
        }
    })
}
