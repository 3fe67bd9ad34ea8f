// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub use self::cancel::CancelToken;
pub use self::deal_error::{DealError, ErrorKind};
pub use self::fsm::{
    FsmCtx, Handler, MemoryJournal, StateGroup, StateJournal, TestContext,
};
pub use self::message_accumulator::MessageAccumulator;

mod cancel;
mod deal_error;
mod fsm;
mod message_accumulator;
pub mod test_blockstores;
