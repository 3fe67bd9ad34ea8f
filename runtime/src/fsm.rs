// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::{deal_error, CancelToken, DealError};

/// Handler-side context. Handlers inspect a state snapshot and queue
/// follow-up events here; they never mutate state directly. The framework
/// applies queued events through the reducer after the handler returns.
pub struct FsmCtx<E> {
    queued: Vec<E>,
    cancel: CancelToken,
}

impl<E> FsmCtx<E> {
    pub fn new() -> Self {
        Self::with_cancel(CancelToken::new())
    }

    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self { queued: Vec::new(), cancel }
    }

    /// Queue an event to be applied once the current handler returns.
    pub fn trigger(&mut self, event: E) {
        self.queued.push(event);
    }

    /// Cancellation handle handlers pass to external operations.
    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn into_events(self) -> Vec<E> {
        self.queued
    }
}

impl<E> Default for FsmCtx<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Synchronous replay context for handler tests: run a handler against a
/// state snapshot, then replay the triggered events through the reducer
/// without involving the driver.
pub struct TestContext<E> {
    ctx: FsmCtx<E>,
}

impl<E> TestContext<E> {
    pub fn new() -> Self {
        Self { ctx: FsmCtx::new() }
    }

    pub fn ctx(&mut self) -> &mut FsmCtx<E> {
        &mut self.ctx
    }

    pub fn replay<S>(self, state: &mut S, reduce: fn(&mut S, E)) {
        for event in self.ctx.queued {
            reduce(state, event);
        }
    }
}

impl<E> Default for TestContext<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Records every applied state transition before the handler for the new
/// state runs, so external effects never precede persistence.
pub trait StateJournal<K, S>: Send + Sync {
    fn record(&self, key: &K, state: &S) -> anyhow::Result<()>;
}

/// In-process journal; embedders substitute a durable implementation.
pub struct MemoryJournal<K, S> {
    entries: Mutex<Vec<(K, S)>>,
}

impl<K, S> MemoryJournal<K, S> {
    pub fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, S> Default for MemoryJournal<K, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Send, S: Clone + Send> StateJournal<K, S> for MemoryJournal<K, S> {
    fn record(&self, key: &K, state: &S) -> anyhow::Result<()> {
        self.entries.lock().unwrap().push((key.clone(), state.clone()));
        Ok(())
    }
}

impl<K: Clone + Send + 'static, S: Clone + Send + 'static> MemoryJournal<K, S> {
    pub fn snapshot(&self) -> Vec<(K, S)> {
        self.entries.lock().unwrap().clone()
    }
}

pub type Handler<S, E> = Box<dyn Fn(&mut FsmCtx<E>, &S) -> Result<(), DealError> + Send + Sync>;

enum Item<E> {
    /// Apply an event through the reducer, then dispatch the handler.
    Apply(E),
    /// Dispatch the handler for the current state without applying anything.
    Kick,
}

struct DealCell<S, E> {
    state: S,
    queue: VecDeque<Item<E>>,
    /// A worker currently owns this deal's queue; no second worker may
    /// pick it up until the owner drains it and clears the flag.
    busy: bool,
}

struct Inner<K, S, E> {
    deals: Mutex<HashMap<K, DealCell<S, E>>>,
    reduce: fn(&mut S, E),
    terminal: fn(&S) -> bool,
    handler: Handler<S, E>,
    journal: Box<dyn StateJournal<K, S>>,
    cancel: CancelToken,
}

/// A group of finite state machines sharing one reducer and one handler
/// table. Deals progress in parallel across worker threads, but events for
/// a single deal are applied strictly serially: the worker that claims a
/// deal drains its whole queue before releasing it.
pub struct StateGroup<K, S, E> {
    inner: Arc<Inner<K, S, E>>,
    work_tx: Option<Sender<K>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl<K, S, E> StateGroup<K, S, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    S: Clone + Send + 'static,
    E: Send + 'static,
{
    pub fn new(
        workers: usize,
        reduce: fn(&mut S, E),
        terminal: fn(&S) -> bool,
        handler: Handler<S, E>,
        journal: Box<dyn StateJournal<K, S>>,
    ) -> Self {
        let inner = Arc::new(Inner {
            deals: Mutex::new(HashMap::new()),
            reduce,
            terminal,
            handler,
            journal,
            cancel: CancelToken::new(),
        });
        let (work_tx, work_rx) = unbounded::<K>();
        let workers = (0..workers.max(1))
            .map(|_| {
                let inner = inner.clone();
                let work_rx: Receiver<K> = work_rx.clone();
                thread::spawn(move || {
                    while let Ok(key) = work_rx.recv() {
                        drain_deal(&inner, &key);
                    }
                })
            })
            .collect();
        Self { inner, work_tx: Some(work_tx), workers }
    }

    /// Insert a new deal and dispatch the handler for its initial state.
    pub fn begin(&self, key: K, state: S) -> Result<(), DealError> {
        {
            let mut deals = self.inner.deals.lock().unwrap();
            if deals.contains_key(&key) {
                return Err(deal_error!(precondition; "deal already tracked"));
            }
            self.inner
                .journal
                .record(&key, &state)
                .map_err(|e| DealError::external(e.to_string()).wrap("journal"))?;
            deals.insert(
                key.clone(),
                DealCell { state, queue: VecDeque::from([Item::Kick]), busy: true },
            );
        }
        self.kick(key);
        Ok(())
    }

    /// Enqueue an event for a deal. Returns an error for unknown deals;
    /// events for terminal deals are accepted and dropped.
    pub fn send(&self, key: &K, event: E) -> Result<(), DealError> {
        let claimed = {
            let mut deals = self.inner.deals.lock().unwrap();
            let cell = deals
                .get_mut(key)
                .ok_or_else(|| deal_error!(precondition; "deal not tracked"))?;
            cell.queue.push_back(Item::Apply(event));
            if cell.busy {
                false
            } else {
                cell.busy = true;
                true
            }
        };
        if claimed {
            self.kick(key.clone());
        }
        Ok(())
    }

    /// Snapshot of a deal's current state.
    pub fn get(&self, key: &K) -> Option<S> {
        self.inner.deals.lock().unwrap().get(key).map(|c| c.state.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.deals.lock().unwrap().contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.deals.lock().unwrap().keys().cloned().collect()
    }

    /// Snapshot of every tracked deal.
    pub fn list(&self) -> Vec<S> {
        self.inner.deals.lock().unwrap().values().map(|c| c.state.clone()).collect()
    }

    /// Block until the group is idle: every queue drained and no worker
    /// mid-handler. Intended for tests and orderly shutdown.
    pub fn wait_idle(&self) {
        loop {
            {
                let deals = self.inner.deals.lock().unwrap();
                if deals.values().all(|c| !c.busy && c.queue.is_empty()) {
                    return;
                }
            }
            thread::sleep(std::time::Duration::from_millis(5));
        }
    }

    fn kick(&self, key: K) {
        if let Some(tx) = &self.work_tx {
            // Receivers only disappear on Drop, so this cannot fail while
            // the group is alive.
            let _ = tx.send(key);
        }
    }

    /// Cancel every external operation in flight on this group's handlers.
    pub fn cancel_all(&self) {
        self.inner.cancel.cancel();
    }
}

fn drain_deal<K, S, E>(inner: &Inner<K, S, E>, key: &K)
where
    K: Eq + Hash + Clone + Send,
    S: Clone + Send,
    E: Send,
{
    loop {
        // Apply everything queued under the lock, then run the handler
        // once on the resulting state, outside the lock so other deals are
        // never blocked. Dispatching only after the queue is empty keeps a
        // handler from re-observing a state whose follow-up event is
        // already pending.
        let mut journaled = true;
        let snapshot = {
            let mut deals = inner.deals.lock().unwrap();
            let cell = match deals.get_mut(key) {
                Some(cell) => cell,
                None => return,
            };
            if cell.queue.is_empty() {
                cell.busy = false;
                return;
            }
            while let Some(item) = cell.queue.pop_front() {
                if let Item::Apply(event) = item {
                    if (inner.terminal)(&cell.state) {
                        // Terminal deals ignore late events.
                        continue;
                    }
                    (inner.reduce)(&mut cell.state, event);
                    if let Err(e) = inner.journal.record(key, &cell.state) {
                        log::error!("failed to journal state transition: {}", e);
                        journaled = false;
                    }
                }
            }
            cell.state.clone()
        };

        // no external effects for transitions that did not persist
        if !journaled || (inner.terminal)(&snapshot) {
            continue;
        }

        let mut ctx = FsmCtx::with_cancel(inner.cancel.clone());
        if let Err(e) = (inner.handler)(&mut ctx, &snapshot) {
            log::error!("deal handler failed: {}", e);
        }
        let events = ctx.into_events();
        if !events.is_empty() {
            let mut deals = inner.deals.lock().unwrap();
            if let Some(cell) = deals.get_mut(key) {
                cell.queue.extend(events.into_iter().map(Item::Apply));
            }
        }
    }
}

impl<K, S, E> Drop for StateGroup<K, S, E> {
    fn drop(&mut self) {
        self.work_tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Counter {
        value: u64,
        done: bool,
    }

    #[derive(Debug)]
    enum CounterEvent {
        Add(u64),
        Finish,
    }

    fn reduce(state: &mut Counter, event: CounterEvent) {
        match event {
            CounterEvent::Add(n) => state.value += n,
            CounterEvent::Finish => state.done = true,
        }
    }

    fn terminal(state: &Counter) -> bool {
        state.done
    }

    fn group(handler: Handler<Counter, CounterEvent>) -> StateGroup<u64, Counter, CounterEvent> {
        StateGroup::new(2, reduce, terminal, handler, Box::new(MemoryJournal::new()))
    }

    #[test]
    fn applies_events_in_order() {
        let group = group(Box::new(|_, _| Ok(())));
        group.begin(1, Counter { value: 0, done: false }).unwrap();
        for n in 1..=5 {
            group.send(&1, CounterEvent::Add(n)).unwrap();
        }
        group.wait_idle();
        assert_eq!(group.get(&1).unwrap().value, 15);
    }

    #[test]
    fn handler_triggered_events_chain() {
        // Handler keeps doubling until the value crosses a threshold.
        let group = group(Box::new(|ctx, state: &Counter| {
            if state.value > 0 && state.value < 64 {
                ctx.trigger(CounterEvent::Add(state.value));
            } else if state.value >= 64 {
                ctx.trigger(CounterEvent::Finish);
            }
            Ok(())
        }));
        group.begin(7, Counter { value: 0, done: false }).unwrap();
        group.send(&7, CounterEvent::Add(1)).unwrap();
        group.wait_idle();
        let state = group.get(&7).unwrap();
        assert_eq!(state.value, 64);
        assert!(state.done);
    }

    #[test]
    fn terminal_deals_drop_events() {
        let group = group(Box::new(|_, _| Ok(())));
        group.begin(3, Counter { value: 9, done: true }).unwrap();
        group.send(&3, CounterEvent::Add(1)).unwrap();
        group.wait_idle();
        assert_eq!(group.get(&3).unwrap().value, 9);
    }

    #[test]
    fn unknown_and_duplicate_deals_error() {
        let group = group(Box::new(|_, _| Ok(())));
        assert!(group.send(&2, CounterEvent::Finish).is_err());
        group.begin(2, Counter { value: 0, done: false }).unwrap();
        assert!(group.begin(2, Counter { value: 0, done: false }).is_err());
    }

    #[test]
    fn journal_records_every_transition() {
        let journal = Box::leak(Box::new(MemoryJournal::<u64, Counter>::new()));
        struct Passthrough(&'static MemoryJournal<u64, Counter>);
        impl StateJournal<u64, Counter> for Passthrough {
            fn record(&self, key: &u64, state: &Counter) -> anyhow::Result<()> {
                self.0.record(key, state)
            }
        }
        let group = StateGroup::new(
            1,
            reduce,
            terminal,
            Box::new(|_, _| Ok(())),
            Box::new(Passthrough(journal)),
        );
        group.begin(5, Counter { value: 0, done: false }).unwrap();
        group.send(&5, CounterEvent::Add(2)).unwrap();
        group.send(&5, CounterEvent::Add(3)).unwrap();
        group.wait_idle();
        // initial state + two transitions
        assert_eq!(journal.len(), 3);
        let last = journal.snapshot().pop().unwrap();
        assert_eq!(last.1.value, 5);
    }
}
