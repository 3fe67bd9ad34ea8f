// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared::econ::TokenAmount;

use fil_retrieval_client::{
    apply_client_event, cancel_deal, check_complete, ongoing, process_payment_requested,
    propose_deal, send_funds, setup_payment_channel_start, wait_for_payment_channel_add_funds,
    wait_for_payment_channel_create, ClientDealState,
};
use fil_retrieval_runtime::TestContext;
use fil_retrieval_shared::DealStatus;

use harness::*;

type Handler = fn(
    &mut fil_retrieval_runtime::FsmCtx<fil_retrieval_client::ClientEvent>,
    &FakeEnvironment,
    &ClientDealState,
) -> Result<(), fil_retrieval_runtime::DealError>;

fn run(handler: Handler, environment: &FakeEnvironment, deal_state: &mut ClientDealState) {
    let mut test_ctx = TestContext::new();
    handler(test_ctx.ctx(), environment, deal_state).unwrap();
    test_ctx.replay(deal_state, apply_client_event);
}

mod propose_deal_tests {
    use super::*;

    #[test]
    fn it_works() {
        let mut deal_state = make_deal_state(DealStatus::New);
        let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        run(propose_deal, &environment, &mut deal_state);
        assert!(deal_state.message.is_empty());
        assert_eq!(deal_state.status, DealStatus::WaitForAcceptance);
        assert_eq!(deal_state.channel_id.as_ref().unwrap().responder, deal_state.sender);
    }

    #[test]
    fn data_transfer_error() {
        let mut deal_state = make_deal_state(DealStatus::New);
        let mut environment =
            FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        environment.open_error = Some("something went wrong".to_string());
        run(propose_deal, &environment, &mut deal_state);
        assert!(!deal_state.message.is_empty());
        assert_eq!(deal_state.status, DealStatus::Errored);
    }
}

mod setup_payment_channel_tests {
    use super::*;

    #[test]
    fn payment_channel_create_initiated() {
        let mut deal_state = make_deal_state(DealStatus::Accepted);
        let node = TestRetrievalClientNode::new(TestNodeParams {
            create_paych_msg: Some(gen_cid(b"create-msg")),
            ..Default::default()
        });
        run(setup_payment_channel_start, &FakeEnvironment::new(node), &mut deal_state);
        assert!(deal_state.message.is_empty());
        assert_eq!(deal_state.status, DealStatus::PaymentChannelCreating);
    }

    #[test]
    fn payment_channel_needs_funds_added() {
        let mut deal_state = make_deal_state(DealStatus::Accepted);
        let node = TestRetrievalClientNode::new(TestNodeParams {
            add_funds_only: true,
            pay_ch: Some(EXPECTED_PAY_CH),
            add_funds_msg: Some(gen_cid(b"add-funds-msg")),
            ..Default::default()
        });
        run(setup_payment_channel_start, &FakeEnvironment::new(node), &mut deal_state);
        assert!(deal_state.message.is_empty());
        assert_eq!(deal_state.status, DealStatus::PaymentChannelAddingFunds);
        assert_eq!(deal_state.payment_info.as_ref().unwrap().pay_ch, EXPECTED_PAY_CH);
    }

    #[test]
    fn free_retrieval_skips_the_channel() {
        let mut deal_state = make_deal_state(DealStatus::Accepted);
        deal_state.total_funds = zero();
        let node = TestRetrievalClientNode::new(Default::default());
        run(setup_payment_channel_start, &FakeEnvironment::new(node), &mut deal_state);
        assert!(deal_state.message.is_empty());
        assert_eq!(deal_state.status, DealStatus::Ongoing);
    }

    #[test]
    fn when_create_payment_channel_fails() {
        let mut deal_state = make_deal_state(DealStatus::Accepted);
        let node = TestRetrievalClientNode::new(TestNodeParams {
            paych_error: Some("Something went wrong".to_string()),
            ..Default::default()
        });
        run(setup_payment_channel_start, &FakeEnvironment::new(node), &mut deal_state);
        assert!(!deal_state.message.is_empty());
        assert_eq!(deal_state.status, DealStatus::Failing);
    }
}

mod wait_for_payment_channel_create_tests {
    use super::*;

    const EXPECTED_LANE: u64 = 10;

    fn creating_state() -> ClientDealState {
        let mut deal_state = make_deal_state(DealStatus::PaymentChannelCreating);
        deal_state.wait_msg_cid = Some(gen_cid(b"create-msg"));
        deal_state.payment_info = None;
        deal_state
    }

    #[test]
    fn it_works() {
        let mut deal_state = creating_state();
        let node = TestRetrievalClientNode::new(TestNodeParams {
            pay_ch: Some(EXPECTED_PAY_CH),
            lane: EXPECTED_LANE,
            ..Default::default()
        });
        run(wait_for_payment_channel_create, &FakeEnvironment::new(node), &mut deal_state);
        assert!(deal_state.message.is_empty());
        assert_eq!(deal_state.status, DealStatus::Ongoing);
        let info = deal_state.payment_info.as_ref().unwrap();
        assert_eq!(info.lane, EXPECTED_LANE);
        assert_eq!(info.pay_ch, EXPECTED_PAY_CH);
        assert!(deal_state.wait_msg_cid.is_none());
    }

    #[test]
    fn if_wait_fails() {
        let mut deal_state = creating_state();
        let node = TestRetrievalClientNode::new(TestNodeParams {
            pay_ch: Some(EXPECTED_PAY_CH),
            wait_for_create_error: Some("boom".to_string()),
            ..Default::default()
        });
        run(wait_for_payment_channel_create, &FakeEnvironment::new(node), &mut deal_state);
        assert!(deal_state.message.contains("boom"));
        assert_eq!(deal_state.status, DealStatus::Failing);
    }

    #[test]
    fn if_allocate_lane_fails() {
        let mut deal_state = creating_state();
        let node = TestRetrievalClientNode::new(TestNodeParams {
            pay_ch: Some(EXPECTED_PAY_CH),
            lane_error: Some("boom".to_string()),
            ..Default::default()
        });
        run(wait_for_payment_channel_create, &FakeEnvironment::new(node), &mut deal_state);
        assert!(deal_state.message.contains("boom"));
        assert_eq!(deal_state.status, DealStatus::Failing);
    }
}

mod wait_for_payment_channel_add_funds_tests {
    use super::*;
    use fil_retrieval_shared::PaymentInfo;

    const EXPECTED_LANE: u64 = 99;

    fn adding_funds_state() -> ClientDealState {
        let mut deal_state = make_deal_state(DealStatus::PaymentChannelAddingFunds);
        deal_state.payment_info = Some(PaymentInfo { pay_ch: EXPECTED_PAY_CH, lane: 0 });
        deal_state.wait_msg_cid = Some(gen_cid(b"add-funds-msg"));
        deal_state
    }

    #[test]
    fn it_works() {
        let mut deal_state = adding_funds_state();
        let node = TestRetrievalClientNode::new(TestNodeParams {
            add_funds_only: true,
            pay_ch: Some(EXPECTED_PAY_CH),
            lane: EXPECTED_LANE,
            ..Default::default()
        });
        run(wait_for_payment_channel_add_funds, &FakeEnvironment::new(node), &mut deal_state);
        assert!(deal_state.message.is_empty());
        assert_eq!(deal_state.status, DealStatus::Ongoing);
        let info = deal_state.payment_info.as_ref().unwrap();
        assert_eq!(info.lane, EXPECTED_LANE);
        assert_eq!(info.pay_ch, EXPECTED_PAY_CH);
    }

    #[test]
    fn if_wait_fails() {
        let mut deal_state = adding_funds_state();
        let node = TestRetrievalClientNode::new(TestNodeParams {
            add_funds_only: true,
            pay_ch: Some(EXPECTED_PAY_CH),
            wait_for_add_funds_error: Some("boom".to_string()),
            lane: EXPECTED_LANE,
            ..Default::default()
        });
        run(wait_for_payment_channel_add_funds, &FakeEnvironment::new(node), &mut deal_state);
        assert!(deal_state.message.contains("boom"));
        assert_eq!(deal_state.status, DealStatus::Failing);
        assert_eq!(deal_state.payment_info.as_ref().unwrap().lane, 0);
    }

    #[test]
    fn if_allocate_lane_fails() {
        let mut deal_state = adding_funds_state();
        let node = TestRetrievalClientNode::new(TestNodeParams {
            add_funds_only: true,
            pay_ch: Some(EXPECTED_PAY_CH),
            lane_error: Some("boom".to_string()),
            lane: EXPECTED_LANE,
            ..Default::default()
        });
        run(wait_for_payment_channel_add_funds, &FakeEnvironment::new(node), &mut deal_state);
        assert!(deal_state.message.contains("boom"));
        assert_eq!(deal_state.status, DealStatus::Failing);
        assert_eq!(deal_state.payment_info.as_ref().unwrap().lane, 0);
    }
}

mod ongoing_tests {
    use super::*;

    #[test]
    fn no_change_without_payment_request() {
        let mut deal_state = make_deal_state(DealStatus::Ongoing);
        deal_state.payment_requested = zero();
        let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        run(ongoing, &environment, &mut deal_state);
        assert_eq!(deal_state.status, DealStatus::Ongoing);
    }

    #[test]
    fn payment_requested() {
        let mut deal_state = make_deal_state(DealStatus::Ongoing);
        let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        run(ongoing, &environment, &mut deal_state);
        assert_eq!(deal_state.status, DealStatus::FundsNeeded);
    }

    #[test]
    fn last_payment_requested() {
        let mut deal_state = make_deal_state(DealStatus::Ongoing);
        deal_state.last_payment_requested = true;
        let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        run(ongoing, &environment, &mut deal_state);
        assert_eq!(deal_state.status, DealStatus::FundsNeededLastPayment);
    }
}

mod process_payment_requested_tests {
    use super::*;

    #[test]
    fn to_send_funds() {
        let mut deal_state = make_deal_state(DealStatus::FundsNeeded);
        let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        run(process_payment_requested, &environment, &mut deal_state);
        assert_eq!(deal_state.status, DealStatus::SendFunds);
    }

    #[test]
    fn to_send_funds_last_payment() {
        let mut deal_state = make_deal_state(DealStatus::FundsNeededLastPayment);
        deal_state.total_received = DEFAULT_BYTES_PAID_FOR + 500;
        deal_state.all_blocks_received = true;
        let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        run(process_payment_requested, &environment, &mut deal_state);
        assert_eq!(deal_state.status, DealStatus::SendFundsLastPayment);
    }

    #[test]
    fn no_change_when_nothing_owed() {
        let mut deal_state = make_deal_state(DealStatus::FundsNeeded);
        deal_state.bytes_paid_for = deal_state.total_received;
        let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        run(process_payment_requested, &environment, &mut deal_state);
        assert_eq!(deal_state.status, DealStatus::FundsNeeded);
    }
}

mod send_funds_tests {
    use super::*;

    #[test]
    fn it_works() {
        let mut deal_state = make_deal_state(DealStatus::SendFunds);
        let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        run(send_funds, &environment, &mut deal_state);
        assert!(deal_state.message.is_empty());
        assert_eq!(deal_state.payment_requested, zero());
        assert_eq!(
            deal_state.funds_spent,
            default_funds_spent() + default_payment_requested()
        );
        assert_eq!(deal_state.bytes_paid_for, DEFAULT_TOTAL_RECEIVED);
        assert_eq!(
            deal_state.current_interval,
            DEFAULT_CURRENT_INTERVAL + DEFAULT_INTERVAL_INCREASE
        );
        assert_eq!(deal_state.status, DealStatus::Ongoing);
    }

    #[test]
    fn last_payment() {
        let mut deal_state = make_deal_state(DealStatus::SendFundsLastPayment);
        let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        run(send_funds, &environment, &mut deal_state);
        assert!(deal_state.message.is_empty());
        assert_eq!(deal_state.payment_requested, zero());
        assert_eq!(
            deal_state.funds_spent,
            default_funds_spent() + default_payment_requested()
        );
        assert_eq!(deal_state.bytes_paid_for, DEFAULT_TOTAL_RECEIVED);
        assert_eq!(
            deal_state.current_interval,
            DEFAULT_CURRENT_INTERVAL + DEFAULT_INTERVAL_INCREASE
        );
        assert_eq!(deal_state.status, DealStatus::Finalizing);
    }

    #[test]
    fn not_enough_funds_left() {
        let mut deal_state = make_deal_state(DealStatus::SendFunds);
        deal_state.funds_spent = default_total_funds();
        let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        run(send_funds, &environment, &mut deal_state);
        assert!(!deal_state.message.is_empty());
        assert_eq!(deal_state.status, DealStatus::Failing);
    }

    #[test]
    fn more_bytes_than_interval_can_charge_more() {
        let mut deal_state = make_deal_state(DealStatus::SendFunds);
        deal_state.bytes_paid_for = DEFAULT_BYTES_PAID_FOR - 500;
        let larger_payment_requested = TokenAmount::from_atto(750_000);
        deal_state.payment_requested = larger_payment_requested.clone();
        let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        run(send_funds, &environment, &mut deal_state);
        assert!(deal_state.message.is_empty());
        assert_eq!(deal_state.payment_requested, zero());
        assert_eq!(deal_state.funds_spent, default_funds_spent() + larger_payment_requested);
        assert_eq!(deal_state.bytes_paid_for, DEFAULT_TOTAL_RECEIVED);
        assert_eq!(
            deal_state.current_interval,
            DEFAULT_CURRENT_INTERVAL + DEFAULT_INTERVAL_INCREASE
        );
        assert_eq!(deal_state.status, DealStatus::Ongoing);
    }

    #[test]
    fn too_much_payment_requested() {
        let mut deal_state = make_deal_state(DealStatus::SendFunds);
        deal_state.payment_requested = TokenAmount::from_atto(750_000);
        let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        run(send_funds, &environment, &mut deal_state);
        assert!(!deal_state.message.is_empty());
        assert_eq!(deal_state.status, DealStatus::Failing);
    }

    #[test]
    fn too_little_payment_requested_records_correctly() {
        let mut deal_state = make_deal_state(DealStatus::SendFunds);
        let smaller_payment_requested = TokenAmount::from_atto(250_000);
        deal_state.payment_requested = smaller_payment_requested.clone();
        let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        run(send_funds, &environment, &mut deal_state);
        assert!(deal_state.message.is_empty());
        assert_eq!(deal_state.payment_requested, zero());
        assert_eq!(deal_state.funds_spent, default_funds_spent() + smaller_payment_requested);
        // only records change for those bytes paid for
        assert_eq!(deal_state.bytes_paid_for, DEFAULT_BYTES_PAID_FOR + 500);
        // no interval increase
        assert_eq!(deal_state.current_interval, DEFAULT_CURRENT_INTERVAL);
        assert_eq!(deal_state.status, DealStatus::Ongoing);
    }

    #[test]
    fn voucher_create_fails() {
        let mut deal_state = make_deal_state(DealStatus::SendFunds);
        let node = TestRetrievalClientNode::new(TestNodeParams {
            voucher_error: Some("Something Went Wrong".to_string()),
            ..Default::default()
        });
        run(send_funds, &FakeEnvironment::new(node), &mut deal_state);
        assert!(!deal_state.message.is_empty());
        assert_eq!(deal_state.status, DealStatus::Failing);
    }

    #[test]
    fn voucher_shortfall_fails_the_deal() {
        let mut deal_state = make_deal_state(DealStatus::SendFunds);
        let node = TestRetrievalClientNode::new(TestNodeParams {
            voucher_shortfall: Some(TokenAmount::from_atto(100_000)),
            ..Default::default()
        });
        run(send_funds, &FakeEnvironment::new(node), &mut deal_state);
        assert!(deal_state.message.contains("shortfall"));
        assert_eq!(deal_state.status, DealStatus::Failing);
    }

    #[test]
    fn unable_to_send_payment() {
        let mut deal_state = make_deal_state(DealStatus::SendFunds);
        let mut environment =
            FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        environment.send_voucher_error = Some("something went wrong".to_string());
        run(send_funds, &environment, &mut deal_state);
        assert!(!deal_state.message.is_empty());
        assert_eq!(deal_state.status, DealStatus::Errored);
    }
}

mod cancel_deal_tests {
    use super::*;

    #[test]
    fn it_works() {
        let mut deal_state = make_deal_state(DealStatus::Failing);
        deal_state.message = "Previous error".to_string();
        let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        run(cancel_deal, &environment, &mut deal_state);
        assert_eq!(deal_state.message, "Previous error");
        assert_eq!(deal_state.status, DealStatus::Errored);
    }

    #[test]
    fn error_closing_stream() {
        let mut deal_state = make_deal_state(DealStatus::Failing);
        deal_state.message = "Previous error".to_string();
        let mut environment =
            FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        environment.close_error = Some("something went wrong".to_string());
        run(cancel_deal, &environment, &mut deal_state);
        assert_ne!(deal_state.message, "Previous error");
        assert!(!deal_state.message.is_empty());
        assert_eq!(deal_state.status, DealStatus::Errored);
    }
}

mod check_complete_tests {
    use super::*;

    #[test]
    fn when_all_blocks_received() {
        let mut deal_state = make_deal_state(DealStatus::CheckComplete);
        deal_state.all_blocks_received = true;
        let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        run(check_complete, &environment, &mut deal_state);
        assert_eq!(deal_state.status, DealStatus::Completed);
    }

    #[test]
    fn when_not_all_blocks_received() {
        let mut deal_state = make_deal_state(DealStatus::CheckComplete);
        deal_state.all_blocks_received = false;
        let environment = FakeEnvironment::new(TestRetrievalClientNode::new(Default::default()));
        run(check_complete, &environment, &mut deal_state);
        assert_eq!(deal_state.status, DealStatus::Errored);
        assert_eq!(
            deal_state.message,
            "Provider sent complete status without sending all data"
        );
    }
}
