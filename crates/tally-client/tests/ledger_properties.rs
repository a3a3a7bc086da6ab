//! Property tests for settlement aggregation.

use proptest::prelude::proptest;
use tally_client::{AckPolicy, PaymentSession, SessionState};
use tally_core::signer::test_utils::StubSigner;
use tally_proto::{Address, Amount, RequestId, SessionHandle};

const LOCAL: &str = "0x1111111111111111111111111111111111111111";
const PARTNER: &str = "0xbeefbeefbeefbeefbeefbeefbeefbeefbeefbeef";

fn active_session() -> (PaymentSession, StubSigner) {
    let signer = StubSigner::new(LOCAL);
    let mut session = PaymentSession::new(AckPolicy::Optimistic);
    let partner = Address::parse(PARTNER).expect("valid address");
    session
        .open(partner, "tally", 1, RequestId(1), &signer)
        .expect("open");
    session
        .on_session_confirmed(SessionHandle("sess-prop".into()))
        .expect("confirm");
    (session, signer)
}

#[test]
fn prop_settlement_total_equals_checked_sum() {
    proptest!(|(amounts in proptest::collection::vec(1u64..=u64::MAX, 1..32))| {
        let (mut session, signer) = active_session();
        let partner = Address::parse(PARTNER).expect("valid address");

        let mut expected: u128 = 0;
        for (i, units) in amounts.iter().enumerate() {
            session
                .pay(
                    &partner,
                    Amount::new(u128::from(*units)),
                    RequestId(i as u64 + 2),
                    &signer,
                    0,
                )
                .expect("pay");
            expected += u128::from(*units);
        }

        proptest::prop_assert_eq!(session.version(), amounts.len() as u64);
        session.close(RequestId(999), &signer).expect("close");
        let settlement = session.finish_close().expect("settlement");
        proptest::prop_assert_eq!(settlement.total_sent, Amount::new(expected));
        proptest::prop_assert_eq!(settlement.payments.len(), amounts.len());
        proptest::prop_assert_eq!(
            settlement.transfer_pairs(),
            vec![(partner, Amount::new(expected))]
        );
    });
}

#[test]
fn prop_version_and_ledger_move_in_lockstep() {
    proptest!(|(amounts in proptest::collection::vec(1u64..=1_000_000u64, 0..16))| {
        let (mut session, signer) = active_session();
        let partner = Address::parse(PARTNER).expect("valid address");

        for (i, units) in amounts.iter().enumerate() {
            session
                .pay(
                    &partner,
                    Amount::new(u128::from(*units)),
                    RequestId(i as u64 + 2),
                    &signer,
                    0,
                )
                .expect("pay");
            proptest::prop_assert_eq!(session.version(), session.ledger().len() as u64);
        }
        proptest::prop_assert_eq!(session.state(), SessionState::Active);
    });
}
