// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::HashMap;
use std::sync::Mutex;

use cid::Cid;

use fil_retrieval_runtime::{deal_error, DealError};

use crate::types::{BlockLocation, CidInfo, DealInfo, PieceBlockLocation, PieceInfo};

/// Index of piece and payload-block metadata a provider can serve from.
pub trait PieceStore: Send + Sync {
    /// Record that a storage deal placed the piece into a sector.
    fn add_deal_for_piece(&self, piece_cid: &[u8], deal: DealInfo) -> Result<(), DealError>;

    /// Record where payload blocks sit inside a piece.
    fn add_piece_block_locations(
        &self,
        piece_cid: &[u8],
        locations: &[(Cid, BlockLocation)],
    ) -> Result<(), DealError>;

    /// Metadata for a piece by its piece CID.
    fn get_piece_info(&self, piece_cid: &[u8]) -> Result<PieceInfo, DealError>;

    /// All pieces containing a payload block.
    fn get_cid_info(&self, payload_cid: &Cid) -> Result<CidInfo, DealError>;
}

/// In-process `PieceStore`. Lists keep insertion order so lookups that
/// scan candidate pieces are deterministic.
#[derive(Default)]
pub struct MemoryPieceStore {
    pieces: Mutex<HashMap<Vec<u8>, PieceInfo>>,
    cids: Mutex<HashMap<Cid, CidInfo>>,
}

impl MemoryPieceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PieceStore for MemoryPieceStore {
    fn add_deal_for_piece(&self, piece_cid: &[u8], deal: DealInfo) -> Result<(), DealError> {
        let mut pieces = self.pieces.lock().unwrap();
        let info = pieces.entry(piece_cid.to_vec()).or_insert_with(|| PieceInfo {
            piece_cid: piece_cid.to_vec(),
            deals: Vec::new(),
        });
        if info.deals.iter().any(|d| d.deal_id == deal.deal_id) {
            return Err(deal_error!(precondition; "deal already exists for piece"));
        }
        info.deals.push(deal);
        Ok(())
    }

    fn add_piece_block_locations(
        &self,
        piece_cid: &[u8],
        locations: &[(Cid, BlockLocation)],
    ) -> Result<(), DealError> {
        let mut cids = self.cids.lock().unwrap();
        for (payload, location) in locations {
            let info = cids
                .entry(*payload)
                .or_insert_with(|| CidInfo { cid: *payload, piece_block_locations: Vec::new() });
            let entry = PieceBlockLocation {
                location: *location,
                piece_cid: piece_cid.to_vec(),
            };
            if !info.piece_block_locations.contains(&entry) {
                info.piece_block_locations.push(entry);
            }
        }
        Ok(())
    }

    fn get_piece_info(&self, piece_cid: &[u8]) -> Result<PieceInfo, DealError> {
        self.pieces
            .lock()
            .unwrap()
            .get(piece_cid)
            .cloned()
            .ok_or_else(|| deal_error!(precondition; "piece not found"))
    }

    fn get_cid_info(&self, payload_cid: &Cid) -> Result<CidInfo, DealError> {
        self.cids
            .lock()
            .unwrap()
            .get(payload_cid)
            .cloned()
            .ok_or_else(|| deal_error!(precondition, "payload CID not found: {}", payload_cid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fvm_ipld_encoding::DAG_CBOR;
    use multihash_codetable::{Code, MultihashDigest};

    fn cid(data: &[u8]) -> Cid {
        Cid::new_v1(DAG_CBOR, Code::Blake2b256.digest(data))
    }

    #[test]
    fn tracks_deals_per_piece() {
        let store = MemoryPieceStore::new();
        store
            .add_deal_for_piece(b"piece", DealInfo { deal_id: 1, sector_id: 2, offset: 0, length: 9 })
            .unwrap();
        store
            .add_deal_for_piece(b"piece", DealInfo { deal_id: 2, sector_id: 3, offset: 0, length: 9 })
            .unwrap();
        let info = store.get_piece_info(b"piece").unwrap();
        assert_eq!(info.deals.len(), 2);
        assert_eq!(info.deals[0].deal_id, 1);

        // duplicate deal ids are refused
        let dup = DealInfo { deal_id: 1, sector_id: 9, offset: 0, length: 9 };
        assert!(store.add_deal_for_piece(b"piece", dup).is_err());
    }

    #[test]
    fn block_locations_keep_insertion_order() {
        let store = MemoryPieceStore::new();
        let payload = cid(b"block");
        let location = BlockLocation { rel_offset: 0, block_size: 512 };
        store.add_piece_block_locations(b"piece-a", &[(payload, location)]).unwrap();
        store.add_piece_block_locations(b"piece-b", &[(payload, location)]).unwrap();
        // repeated registration is a no-op
        store.add_piece_block_locations(b"piece-a", &[(payload, location)]).unwrap();

        let info = store.get_cid_info(&payload).unwrap();
        assert_eq!(info.piece_block_locations.len(), 2);
        assert_eq!(info.piece_block_locations[0].piece_cid, b"piece-a".to_vec());
        assert_eq!(info.piece_block_locations[1].piece_cid, b"piece-b".to_vec());
    }

    #[test]
    fn missing_entries_error() {
        let store = MemoryPieceStore::new();
        assert!(store.get_piece_info(b"nope").is_err());
        assert!(store.get_cid_info(&cid(b"nope")).is_err());
    }
}
