// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use fil_retrieval_runtime::{deal_error, DealError};
use fvm_ipld_blockstore::Blockstore;

/// Loads a read-only, content-addressed blockstore view over a piece.
///
/// Implementations open the underlying piece file once per load and build
/// or read its block index (CARv1 indexes are computed on demand, CARv2
/// files carry an embedded one).
pub trait Mount: Send + Sync {
    type Store: Blockstore + Send + Sync;

    fn load(&self, key: &str) -> anyhow::Result<Self::Store>;
}

type Cell<S> = Arc<OnceLock<Result<Arc<S>, String>>>;

/// Tracks the read-only blockstore bound to each deal.
///
/// `add` is serialized per deal: the first caller performs the mount load
/// and later callers for the same deal wait on it, while loads for other
/// deals proceed in parallel. `clean` releases the binding exactly once;
/// cleaning an unknown deal is not an error.
pub struct ReadOnlyBlockstores<M: Mount> {
    mount: M,
    stores: Mutex<HashMap<String, Cell<M::Store>>>,
}

impl<M: Mount> ReadOnlyBlockstores<M> {
    pub fn new(mount: M) -> Self {
        Self { mount, stores: Mutex::new(HashMap::new()) }
    }

    /// Bind `deal` to the blockstore over the piece at `key`, loading it
    /// if this is the first binding.
    pub fn add(&self, deal: &str, key: &str) -> Result<Arc<M::Store>, DealError> {
        let cell = {
            let mut stores = self.stores.lock().unwrap();
            stores.entry(deal.to_string()).or_insert_with(|| Arc::new(OnceLock::new())).clone()
        };

        let result = cell
            .get_or_init(|| match self.mount.load(key) {
                Ok(store) => Ok(Arc::new(store)),
                Err(e) => Err(e.to_string()),
            })
            .clone();

        match result {
            Ok(store) => Ok(store),
            Err(msg) => {
                // a failed load is not cached; drop the binding so a retry
                // can mount again
                let mut stores = self.stores.lock().unwrap();
                if let Some(current) = stores.get(deal) {
                    if Arc::ptr_eq(current, &cell) {
                        stores.remove(deal);
                    }
                }
                Err(deal_error!(external, "failed to load blockstore for piece {}: {}", key, msg))
            }
        }
    }

    /// The blockstore bound to `deal`, which must have been added.
    pub fn get(&self, deal: &str) -> Result<Arc<M::Store>, DealError> {
        let cell = self
            .stores
            .lock()
            .unwrap()
            .get(deal)
            .cloned()
            .ok_or_else(|| deal_error!(precondition, "no blockstore registered for deal {}", deal))?;
        match cell.get() {
            Some(Ok(store)) => Ok(store.clone()),
            Some(Err(msg)) => Err(deal_error!(external; msg)),
            None => Err(deal_error!(precondition, "blockstore for deal {} still loading", deal)),
        }
    }

    /// Release the binding for `deal`. Idempotent.
    pub fn clean(&self, deal: &str) -> Result<(), DealError> {
        self.stores.lock().unwrap().remove(deal);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stores.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fil_retrieval_runtime::test_blockstores::MemoryBlockstore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mount that counts loads and can be told to fail.
    struct TestMount {
        loads: AtomicUsize,
        fail: bool,
    }

    impl TestMount {
        fn new() -> Self {
            Self { loads: AtomicUsize::new(0), fail: false }
        }
    }

    impl Mount for TestMount {
        type Store = MemoryBlockstore;

        fn load(&self, _key: &str) -> anyhow::Result<Self::Store> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("mount exploded");
            }
            Ok(MemoryBlockstore::new())
        }
    }

    #[test]
    fn add_loads_once_per_deal() {
        let registry = ReadOnlyBlockstores::new(TestMount::new());
        let a = registry.add("deal-1", "piece-1").unwrap();
        let b = registry.add("deal-1", "piece-1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.mount.loads.load(Ordering::SeqCst), 1);

        registry.add("deal-2", "piece-1").unwrap();
        assert_eq!(registry.mount.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_adds_share_one_load() {
        let registry = Arc::new(ReadOnlyBlockstores::new(TestMount::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.add("deal-1", "piece-1").map(|_| ()))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(registry.mount.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clean_is_idempotent_and_get_errors_after() {
        let registry = ReadOnlyBlockstores::new(TestMount::new());
        registry.add("deal-1", "piece-1").unwrap();
        assert!(registry.get("deal-1").is_ok());

        registry.clean("deal-1").unwrap();
        registry.clean("deal-1").unwrap();
        assert!(registry.get("deal-1").is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn get_requires_prior_add() {
        let registry = ReadOnlyBlockstores::new(TestMount::new());
        assert!(registry.get("deal-1").is_err());
    }

    #[test]
    fn failed_load_is_retryable() {
        let mut mount = TestMount::new();
        mount.fail = true;
        let registry = ReadOnlyBlockstores::new(mount);
        assert!(registry.add("deal-1", "piece-1").is_err());
        assert!(registry.is_empty());
    }
}
