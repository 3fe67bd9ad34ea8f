// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_encoding::strict_bytes;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::deal::DealID as StorageDealID;
use fvm_shared::sector::SectorNumber;

/// Identifies a storage deal placing a piece into a sector, and where in
/// the sector the piece lives.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct DealInfo {
    pub deal_id: StorageDealID,
    pub sector_id: SectorNumber,
    pub offset: u64,
    pub length: u64,
}

/// Metadata about a piece a provider may be storing based on its piece CID.
/// The piece CID is kept as raw bytes, exactly as committed on chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct PieceInfo {
    #[serde(with = "strict_bytes")]
    pub piece_cid: Vec<u8>,
    pub deals: Vec<DealInfo>,
}

impl PieceInfo {
    /// Whether this is the undefined sentinel rather than real metadata.
    pub fn is_empty(&self) -> bool {
        self.piece_cid.is_empty() && self.deals.is_empty()
    }
}

/// Offset and size of a block within the piece that contains it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct BlockLocation {
    pub rel_offset: u64,
    pub block_size: u64,
}

/// A block location coupled with the piece the block lives in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct PieceBlockLocation {
    pub location: BlockLocation,
    #[serde(with = "strict_bytes")]
    pub piece_cid: Vec<u8>,
}

/// Information about where a given payload block lives: one block may be
/// packed into many pieces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct CidInfo {
    pub cid: Cid,
    pub piece_block_locations: Vec<PieceBlockLocation>,
}

impl CidInfo {
    pub fn is_empty(&self) -> bool {
        self.piece_block_locations.is_empty()
    }
}
