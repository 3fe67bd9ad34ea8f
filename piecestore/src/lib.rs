// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub use self::lazy::LazyBlockstore;
pub use self::lookup::{piece_for_payload, piece_in_unsealed_sector};
pub use self::registry::{Mount, ReadOnlyBlockstores};
pub use self::store::{MemoryPieceStore, PieceStore};
pub use self::types::{BlockLocation, CidInfo, DealInfo, PieceBlockLocation, PieceInfo};

mod lazy;
mod lookup;
mod registry;
mod store;
mod types;
