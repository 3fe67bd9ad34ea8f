// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;

use fil_retrieval_runtime::{CancelToken, DealError};
use fil_retrieval_shared::RetrievalProviderNode;

use crate::store::PieceStore;
use crate::types::PieceInfo;

/// True when any sector holding the piece already has an unsealed copy of
/// the relevant range. Oracle failures are logged and treated as sealed.
pub fn piece_in_unsealed_sector(
    node: &dyn RetrievalProviderNode,
    piece_info: &PieceInfo,
    cancel: &CancelToken,
) -> bool {
    for di in &piece_info.deals {
        match node.is_unsealed(di.sector_id, di.offset, di.length, cancel) {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => {
                log::error!("failed to find out if sector {} is unsealed: {}", di.sector_id, e);
            }
        }
    }
    false
}

/// Find a piece to serve `payload_cid` from, returning its metadata and
/// whether it is already unsealed.
///
/// When the client named a piece, only that piece qualifies. Otherwise the
/// candidates are scanned in index order, preferring the first piece with
/// an unsealed sector and falling back to the first sealed one.
pub fn piece_for_payload(
    store: &dyn PieceStore,
    node: &dyn RetrievalProviderNode,
    payload_cid: &Cid,
    piece_cid: Option<&Cid>,
    cancel: &CancelToken,
) -> Result<(PieceInfo, bool), DealError> {
    let cid_info = store.get_cid_info(payload_cid).map_err(|e| e.wrap("get cid info"))?;

    let wanted_piece = piece_cid.map(|c| c.to_bytes());
    let mut last_err: Option<DealError> = None;
    let mut sealed_piece_info: Option<PieceInfo> = None;

    for location in &cid_info.piece_block_locations {
        let piece_info = match store.get_piece_info(&location.piece_cid) {
            Ok(info) => info,
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };

        match &wanted_piece {
            // the client wants this payload served from a specific piece
            Some(wanted) => {
                if &piece_info.piece_cid == wanted {
                    let unsealed = piece_in_unsealed_sector(node, &piece_info, cancel);
                    return Ok((piece_info, unsealed));
                }
            }
            // no preference: an unsealed piece wins, else remember the
            // first sealed one
            None => {
                if piece_in_unsealed_sector(node, &piece_info, cancel) {
                    return Ok((piece_info, true));
                }
                if sealed_piece_info.is_none() {
                    sealed_piece_info = Some(piece_info);
                }
            }
        }
    }

    if let Some(info) = sealed_piece_info {
        return Ok((info, false));
    }

    let cause = last_err.unwrap_or_else(|| match piece_cid {
        Some(c) => DealError::precondition(format!("unknown piece CID {}", c)),
        None => DealError::precondition(format!("no piece found for payload {}", payload_cid)),
    });
    Err(cause.wrap("could not locate piece"))
}
