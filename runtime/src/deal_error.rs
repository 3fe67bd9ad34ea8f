// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Classifies an error crossing a component boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The remote peer broke the retrieval protocol contract.
    Protocol,
    /// An external collaborator (payment gateway, transport, blockstore) failed.
    External,
    /// A local precondition did not hold.
    Precondition,
    /// The operation was cancelled or ran past its deadline.
    Cancelled,
}

/// The error type returned by deal handlers and their collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("DealError(kind: {kind:?}, msg: {msg})")]
pub struct DealError {
    kind: ErrorKind,
    /// Message surfaced into the deal state on failure transitions.
    msg: String,
}

impl DealError {
    pub fn new(kind: ErrorKind, msg: String) -> Self {
        Self { kind, msg }
    }

    pub fn protocol(msg: String) -> Self {
        Self { kind: ErrorKind::Protocol, msg }
    }

    pub fn external(msg: String) -> Self {
        Self { kind: ErrorKind::External, msg }
    }

    pub fn precondition(msg: String) -> Self {
        Self { kind: ErrorKind::Precondition, msg }
    }

    pub fn cancelled(msg: String) -> Self {
        Self { kind: ErrorKind::Cancelled, msg }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Message of the deal error, as recorded in `state.message`.
    pub fn msg(&self) -> &str {
        &self.msg
    }

    /// True when the underlying operation was cancelled or timed out.
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Prefix the error message with a string message.
    pub fn wrap(mut self, msg: impl AsRef<str>) -> Self {
        self.msg = format!("{}: {}", msg.as_ref(), self.msg);
        self
    }
}

/// A raw encoding failure means the peer sent bytes outside the contract.
impl From<fvm_ipld_encoding::Error> for DealError {
    fn from(e: fvm_ipld_encoding::Error) -> Self {
        Self { kind: ErrorKind::Protocol, msg: e.to_string() }
    }
}

impl From<anyhow::Error> for DealError {
    fn from(e: anyhow::Error) -> Self {
        Self { kind: ErrorKind::External, msg: e.to_string() }
    }
}

/// Convenience macro for generating deal errors.
#[macro_export]
macro_rules! deal_error {
    // Error with only one stringable expression
    ( $kind:ident; $msg:expr ) => { $crate::DealError::$kind($msg.to_string()) };

    // String with positional arguments
    ( $kind:ident; $msg:literal $(, $ex:expr)+ ) => {
        $crate::DealError::$kind(format!($msg, $($ex,)*))
    };

    // Error with only one stringable expression, with comma separator
    ( $kind:ident, $msg:expr ) => { $crate::deal_error!($kind; $msg) };

    // String with positional arguments, with comma separator
    ( $kind:ident, $msg:literal $(, $ex:expr)+ ) => {
        $crate::deal_error!($kind; $msg $(, $ex)*)
    };
}
