// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;

/// A read-only blockstore that defers resolving its backing store until
/// the first read. Lets a blockstore be handed to the transport before the
/// deal's store has finished registering.
pub struct LazyBlockstore<B> {
    inner: Mutex<Option<Arc<B>>>,
    load: Box<dyn Fn() -> Result<Arc<B>> + Send + Sync>,
}

impl<B> LazyBlockstore<B> {
    pub fn new(load: impl Fn() -> Result<Arc<B>> + Send + Sync + 'static) -> Self {
        Self { inner: Mutex::new(None), load: Box::new(load) }
    }

    fn init(&self) -> Result<Arc<B>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.is_none() {
            *inner = Some((self.load)()?);
        }
        Ok(inner.as_ref().cloned().expect("initialized above"))
    }
}

impl<B: Blockstore> Blockstore for LazyBlockstore<B> {
    fn get(&self, k: &Cid) -> Result<Option<Vec<u8>>> {
        self.init()?.get(k)
    }

    fn has(&self, k: &Cid) -> Result<bool> {
        self.init()?.has(k)
    }

    fn put_keyed(&self, _k: &Cid, _block: &[u8]) -> Result<()> {
        Err(anyhow!("cannot write to read-only blockstore"))
    }
}
