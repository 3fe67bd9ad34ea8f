// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cell::RefCell;
use std::rc::Rc;

/// Accumulates messages (e.g. invariant violations) for later reporting.
#[derive(Default, Debug, Clone)]
pub struct MessageAccumulator {
    /// Accumulated messages, shared between all clones of this accumulator.
    msgs: Rc<RefCell<Vec<String>>>,
    /// Optional prefix to note the level of nesting.
    prefix: String,
}

impl MessageAccumulator {
    /// Returns a new accumulator backed by the same collection, with a
    /// prefix appended to each new message.
    pub fn with_prefix(&self, prefix: impl AsRef<str>) -> Self {
        Self {
            msgs: self.msgs.clone(),
            prefix: format!("{}{}", self.prefix, prefix.as_ref()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.msgs.borrow().len()
    }

    pub fn messages(&self) -> Vec<String> {
        self.msgs.borrow().to_owned()
    }

    /// Adds a message to the accumulator.
    pub fn add(&self, msg: impl AsRef<str>) {
        self.msgs.borrow_mut().push(format!("{}{}", self.prefix, msg.as_ref()));
    }

    /// Adds a message to the accumulator if the predicate is false.
    pub fn require(&self, predicate: bool, msg: impl AsRef<str>) {
        if !predicate {
            self.add(msg);
        }
    }

    /// Adds a message if the result is an error.
    pub fn require_no_error<V, E: std::fmt::Display>(
        &self,
        result: Result<V, E>,
        msg: impl AsRef<str>,
    ) {
        if let Err(e) = result {
            self.add(format!("{}: {}", msg.as_ref(), e));
        }
    }

    /// Panics with all accumulated messages if any are present.
    pub fn assert_empty(&self) {
        assert!(self.is_empty(), "{}", self.messages().join("\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_with_prefix() {
        let acc = MessageAccumulator::default();
        acc.require(true, "not added");
        acc.require(false, "added");
        let nested = acc.with_prefix("deal 1: ");
        nested.add("bad interval");
        assert_eq!(acc.messages(), vec!["added".to_string(), "deal 1: bad interval".to_string()]);
        assert_eq!(acc.len(), nested.len());
    }
}
