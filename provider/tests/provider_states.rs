// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared::econ::TokenAmount;
use num_traits::Zero;

use fil_retrieval_provider::{
    apply_provider_event, cancel_deal, check_deal_params, cleanup_deal, unpause_deal,
    unseal_data, ProviderDealState, ProviderEvent,
};
use fil_retrieval_runtime::TestContext;
use fil_retrieval_shared::{Ask, DealStatus};

use harness::*;

type Handler = fn(
    &mut fil_retrieval_runtime::FsmCtx<ProviderEvent>,
    &FakeProviderEnvironment,
    &ProviderDealState,
) -> Result<(), fil_retrieval_runtime::DealError>;

fn run(handler: Handler, environment: &FakeProviderEnvironment, deal_state: &mut ProviderDealState) {
    let mut test_ctx = TestContext::new();
    handler(test_ctx.ctx(), environment, deal_state).unwrap();
    test_ctx.replay(deal_state, apply_provider_event);
}

mod unseal_data_tests {
    use super::*;

    #[test]
    fn it_works() {
        let mut deal_state = make_provider_deal_state(DealStatus::Unsealing);
        let environment = FakeProviderEnvironment::default();
        run(unseal_data, &environment, &mut deal_state);
        assert!(deal_state.message.is_empty());
        assert_eq!(deal_state.status, DealStatus::Unsealed);
    }

    #[test]
    fn prepare_blockstore_fails() {
        let mut deal_state = make_provider_deal_state(DealStatus::Unsealing);
        let environment = FakeProviderEnvironment {
            prepare_error: Some("could not unseal".to_string()),
            ..Default::default()
        };
        run(unseal_data, &environment, &mut deal_state);
        assert!(deal_state.message.contains("could not unseal"));
        assert_eq!(deal_state.status, DealStatus::Failing);
    }
}

mod unpause_deal_tests {
    use super::*;

    #[test]
    fn it_works() {
        let mut deal_state = make_provider_deal_state(DealStatus::Unsealed);
        let environment = FakeProviderEnvironment::default();
        run(unpause_deal, &environment, &mut deal_state);
        assert_eq!(deal_state.status, DealStatus::Ongoing);
        assert_eq!(environment.resumed.lock().unwrap().len(), 1);
    }

    #[test]
    fn resume_fails() {
        let mut deal_state = make_provider_deal_state(DealStatus::Unsealed);
        let environment = FakeProviderEnvironment {
            resume_error: Some("channel gone".to_string()),
            ..Default::default()
        };
        run(unpause_deal, &environment, &mut deal_state);
        assert_eq!(deal_state.status, DealStatus::Failing);
        assert!(deal_state.message.contains("channel gone"));
    }

    #[test]
    fn track_fails() {
        let mut deal_state = make_provider_deal_state(DealStatus::Unsealed);
        let environment = FakeProviderEnvironment {
            track_error: Some("no channel".to_string()),
            ..Default::default()
        };
        run(unpause_deal, &environment, &mut deal_state);
        assert_eq!(deal_state.status, DealStatus::Failing);
    }
}

mod cleanup_deal_tests {
    use super::*;

    #[test]
    fn releases_resources_and_completes() {
        let mut deal_state = make_provider_deal_state(DealStatus::Finalizing);
        let environment = FakeProviderEnvironment::default();
        run(cleanup_deal, &environment, &mut deal_state);
        assert_eq!(deal_state.status, DealStatus::Completed);
        assert_eq!(*environment.deleted.lock().unwrap(), vec![deal_state.proposal.id]);
        assert_eq!(*environment.untracked.lock().unwrap(), vec![deal_state.proposal.id]);
    }
}

mod cancel_deal_tests {
    use super::*;

    #[test]
    fn preserves_message_on_clean_close() {
        let mut deal_state = make_provider_deal_state(DealStatus::Failing);
        deal_state.message = "Previous error".to_string();
        let environment = FakeProviderEnvironment::default();
        run(cancel_deal, &environment, &mut deal_state);
        assert_eq!(deal_state.message, "Previous error");
        assert_eq!(deal_state.status, DealStatus::Errored);
        assert_eq!(*environment.deleted.lock().unwrap(), vec![deal_state.proposal.id]);
    }

    #[test]
    fn close_error_replaces_message() {
        let mut deal_state = make_provider_deal_state(DealStatus::Failing);
        deal_state.message = "Previous error".to_string();
        let environment = FakeProviderEnvironment {
            close_error: Some("something went wrong".to_string()),
            ..Default::default()
        };
        run(cancel_deal, &environment, &mut deal_state);
        assert_ne!(deal_state.message, "Previous error");
        assert!(!deal_state.message.is_empty());
        assert_eq!(deal_state.status, DealStatus::Errored);
    }
}

mod reducer_tests {
    use super::*;

    #[test]
    fn begin_tracking_unseal_fee_path() {
        let mut deal_state = make_provider_deal_state(DealStatus::New);
        deal_state.proposal.params.unseal_price = TokenAmount::from_atto(10_000);
        apply_provider_event(&mut deal_state, ProviderEvent::PaymentRequested { total_sent: 0 });
        assert_eq!(deal_state.status, DealStatus::FundsNeededUnseal);

        // a partial unseal payment keeps the deal parked
        apply_provider_event(
            &mut deal_state,
            ProviderEvent::PartialPaymentReceived { amount: TokenAmount::from_atto(4_000) },
        );
        assert_eq!(deal_state.status, DealStatus::FundsNeededUnseal);
        assert_eq!(deal_state.unseal_price_paid, TokenAmount::from_atto(4_000));

        // the remainder releases it into unsealing
        apply_provider_event(
            &mut deal_state,
            ProviderEvent::PaymentReceived { amount: TokenAmount::from_atto(6_000) },
        );
        assert_eq!(deal_state.status, DealStatus::Unsealing);
        assert_eq!(deal_state.unseal_price_paid, TokenAmount::from_atto(10_000));
        assert_eq!(deal_state.funds_received, TokenAmount::from_atto(10_000));
    }

    #[test]
    fn byte_payments_advance_the_interval() {
        let mut deal_state = make_provider_deal_state(DealStatus::Ongoing);
        apply_provider_event(&mut deal_state, ProviderEvent::BlockSent { total_sent: 1000 });
        assert_eq!(deal_state.total_sent, 1000);
        assert_eq!(deal_state.current_interval, DEFAULT_PAYMENT_INTERVAL);

        apply_provider_event(
            &mut deal_state,
            ProviderEvent::PaymentReceived { amount: TokenAmount::from_atto(500_000) },
        );
        assert_eq!(deal_state.interval_low_water, 1000);
        assert_eq!(
            deal_state.current_interval,
            DEFAULT_PAYMENT_INTERVAL + DEFAULT_INTERVAL_INCREASE
        );
        assert_eq!(deal_state.funds_received, TokenAmount::from_atto(500_000));
        assert_eq!(deal_state.status, DealStatus::Ongoing);
    }

    #[test]
    fn partial_byte_payment_does_not_advance_the_interval() {
        let mut deal_state = make_provider_deal_state(DealStatus::Ongoing);
        apply_provider_event(&mut deal_state, ProviderEvent::BlockSent { total_sent: 1000 });
        apply_provider_event(
            &mut deal_state,
            ProviderEvent::PartialPaymentReceived { amount: TokenAmount::from_atto(250_000) },
        );
        assert_eq!(deal_state.interval_low_water, 0);
        assert_eq!(deal_state.current_interval, DEFAULT_PAYMENT_INTERVAL);
        assert_eq!(deal_state.funds_received, TokenAmount::from_atto(250_000));
    }

    #[test]
    fn completion_path() {
        let mut deal_state = make_provider_deal_state(DealStatus::Ongoing);
        apply_provider_event(&mut deal_state, ProviderEvent::BlocksCompleted);
        assert_eq!(deal_state.status, DealStatus::BlocksComplete);
        apply_provider_event(&mut deal_state, ProviderEvent::Complete);
        assert_eq!(deal_state.status, DealStatus::Finalizing);
        apply_provider_event(&mut deal_state, ProviderEvent::CleanupComplete);
        assert_eq!(deal_state.status, DealStatus::Completed);

        // terminal deals ignore everything else
        apply_provider_event(
            &mut deal_state,
            ProviderEvent::DataTransferErrored { error: "late".to_string() },
        );
        assert_eq!(deal_state.status, DealStatus::Completed);
    }
}

mod deal_params_tests {
    use super::*;
    use fil_retrieval_shared::Params;

    fn ask() -> Ask {
        Ask {
            price_per_byte: TokenAmount::from_atto(500),
            payment_interval: 1000,
            payment_interval_increase: 500,
            unseal_price: TokenAmount::zero(),
        }
    }

    #[test]
    fn acceptable_params() {
        assert!(check_deal_params(&ask(), &make_params()).is_ok());
        // paying more than asked is fine
        let generous = Params::new(TokenAmount::from_atto(600), 500, 100);
        assert!(check_deal_params(&ask(), &generous).is_ok());
    }

    #[test]
    fn price_too_low() {
        let params = Params::new(TokenAmount::from_atto(499), 1000, 500);
        let err = check_deal_params(&ask(), &params).unwrap_err();
        assert!(err.msg().contains("Price per byte too low"));
    }

    #[test]
    fn interval_too_large() {
        let params = Params::new(TokenAmount::from_atto(500), 1001, 500);
        let err = check_deal_params(&ask(), &params).unwrap_err();
        assert!(err.msg().contains("Payment interval too large"));
    }

    #[test]
    fn interval_increase_too_large() {
        let params = Params::new(TokenAmount::from_atto(500), 1000, 501);
        let err = check_deal_params(&ask(), &params).unwrap_err();
        assert!(err.msg().contains("Payment interval increase too large"));
    }

    #[test]
    fn unseal_price_too_small() {
        let mut posted = ask();
        posted.unseal_price = TokenAmount::from_atto(1_000);
        let params = make_params();
        let err = check_deal_params(&posted, &params).unwrap_err();
        assert!(err.msg().contains("Unseal price too small"));

        let paying =
            make_params().with_unseal_price(TokenAmount::from_atto(1_000));
        assert!(check_deal_params(&posted, &paying).is_ok());
    }
}
