// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT
use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use cid::Cid;

use fvm_ipld_blockstore::Blockstore;

/// Stats for a [MemoryBlockstore] this indicates the amount of read and written data
/// to the wrapped store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BSStats {
    /// Number of reads
    pub r: usize,
    /// Number of writes
    pub w: usize,
    /// Bytes Read
    pub br: usize,
    /// Bytes Written
    pub bw: usize,
}

/// In-memory `Blockstore` tracking reads and writes for verification.
/// Shared across threads in registry tests, hence the mutexes.
/// This struct should only be used for testing.
#[derive(Debug, Default)]
pub struct MemoryBlockstore {
    blocks: Mutex<HashMap<Cid, Vec<u8>>>,
    stats: Mutex<BSStats>,
}

impl MemoryBlockstore {
    pub fn new() -> Self {
        Self { blocks: Default::default(), stats: Default::default() }
    }

    pub fn stats(&self) -> BSStats {
        *self.stats.lock().unwrap()
    }
}

impl Blockstore for MemoryBlockstore {
    fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>> {
        let mut stats = self.stats.lock().unwrap();
        stats.r += 1;

        let bytes = self.blocks.lock().unwrap().get(cid).cloned();

        if let Some(bytes) = &bytes {
            stats.br += bytes.len();
        }
        Ok(bytes)
    }
    fn has(&self, cid: &Cid) -> Result<bool> {
        self.stats.lock().unwrap().r += 1;

        Ok(self.blocks.lock().unwrap().contains_key(cid))
    }

    fn put_keyed(&self, k: &Cid, block: &[u8]) -> Result<()> {
        let mut stats = self.stats.lock().unwrap();
        stats.w += 1;
        stats.bw += block.len();

        self.blocks.lock().unwrap().insert(*k, block.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fvm_ipld_blockstore::Block;
    use multihash_codetable::Code;

    #[test]
    fn basic_tracking_store() {
        let tr_store = MemoryBlockstore::new();
        assert_eq!(tr_store.stats(), BSStats::default());

        let block = Block::new(0x55, &b"foobar"[..]);
        tr_store.get(&block.cid(Code::Blake2b256)).unwrap();
        assert_eq!(tr_store.stats(), BSStats { r: 1, ..Default::default() });

        let put_cid = tr_store.put(Code::Blake2b256, &block).unwrap();
        assert_eq!(tr_store.get(&put_cid).unwrap().as_deref(), Some(block.data));
        assert_eq!(tr_store.stats(), BSStats { r: 2, br: block.len(), w: 1, bw: block.len() });
    }
}
