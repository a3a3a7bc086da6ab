//! Property-based tests for envelope encoding/decoding.
//!
//! Verifies codec behavior for arbitrary inputs, not just hand-picked
//! examples: round-trips preserve meaning, signing bytes are independent of
//! the attached signature, and arbitrary byte soup never decodes into a
//! misinterpreted envelope.

use proptest::prelude::*;
use tally_proto::{
    Address, Allocation, Amount, Call, Envelope, NotificationKind, Request, RequestId,
    SessionDescriptor, SessionHandle, Signature,
    payloads::{
        auth::{AuthRequestParams, AuthVerifyParams},
        session::{CloseSessionParams, CreateSessionParams, StateUpdateParams},
    },
};

/// Strategy for structurally valid addresses.
fn arbitrary_address() -> impl Strategy<Value = Address> {
    proptest::collection::vec(proptest::sample::select("0123456789abcdefABCDEF".as_bytes().to_vec()), 40)
        .prop_map(|bytes| {
            let hex: String = bytes.into_iter().map(char::from).collect();
            Address::parse(format!("0x{hex}")).expect("generated hex is a valid address")
        })
}

fn arbitrary_allocation() -> impl Strategy<Value = Allocation> {
    (arbitrary_address(), any::<u128>())
        .prop_map(|(participant, units)| Allocation { participant, amount: Amount::new(units) })
}

/// Strategy covering every RPC method.
fn arbitrary_call() -> impl Strategy<Value = Call> {
    prop_oneof![
        (arbitrary_address(), any::<u64>()).prop_map(|(address, expires_at_unix)| {
            Call::AuthRequest(AuthRequestParams {
                address,
                scope: "payments".to_string(),
                expires_at_unix,
            })
        }),
        prop::collection::vec(any::<u8>(), 0..128).prop_map(|sig| {
            Call::AuthVerify(AuthVerifyParams { signature: Signature(sig) })
        }),
        (arbitrary_address(), arbitrary_address(), any::<u64>()).prop_map(
            |(local, remote, nonce)| {
                Call::CreateSession(CreateSessionParams {
                    descriptor: SessionDescriptor {
                        local_participant: local,
                        remote_participant: remote,
                        application_id: "tally".to_string(),
                        nonce,
                    },
                })
            }
        ),
        (any::<u64>(), prop::collection::vec(arbitrary_allocation(), 0..4)).prop_map(
            |(version, allocations)| {
                Call::SubmitState(StateUpdateParams {
                    session: SessionHandle("sess".to_string()),
                    version,
                    allocations,
                })
            }
        ),
        prop::collection::vec(arbitrary_allocation(), 0..4).prop_map(|final_allocations| {
            Call::CloseSession(CloseSessionParams {
                session: SessionHandle("sess".to_string()),
                final_allocations,
            })
        }),
        Just(Call::Ping),
    ]
}

#[test]
fn prop_request_envelope_roundtrip() {
    proptest!(|(id in any::<u64>(), call in arbitrary_call())| {
        let envelope = Envelope::request(Request::unsigned(RequestId(id), call));

        let bytes = envelope.encode().expect("encode should succeed");
        let decoded = Envelope::decode(&bytes).expect("decode should succeed");

        // PROPERTY: Round-trip must be identity
        prop_assert_eq!(decoded, envelope);
    });
}

#[test]
fn prop_signing_bytes_are_signature_independent() {
    proptest!(|(
        id in any::<u64>(),
        call in arbitrary_call(),
        sig in prop::collection::vec(any::<u8>(), 1..128),
    )| {
        let mut request = Request::unsigned(RequestId(id), call);
        let unsigned = request.signing_bytes().expect("signing bytes should encode");

        request.signature = Some(Signature(sig));
        let signed = request.signing_bytes().expect("signing bytes should encode");

        // PROPERTY: Attaching a signature never changes the signed content
        prop_assert_eq!(signed, unsigned);
    });
}

#[test]
fn prop_notification_roundtrip() {
    proptest!(|(code in any::<u16>(), message in ".{0,64}")| {
        let envelope = Envelope::notification(NotificationKind::ServerError { code, message });

        let bytes = envelope.encode().expect("encode should succeed");
        prop_assert_eq!(Envelope::decode(&bytes).expect("decode should succeed"), envelope);
    });
}

#[test]
fn prop_decode_never_panics_on_arbitrary_bytes() {
    proptest!(|(bytes in prop::collection::vec(any::<u8>(), 0..512))| {
        // PROPERTY: Arbitrary bytes either decode or fail cleanly; no panic,
        // no misinterpretation as a valid envelope of another version.
        if let Ok(envelope) = Envelope::decode(&bytes) {
            prop_assert_eq!(envelope.version, tally_proto::PROTOCOL_VERSION);
        }
    });
}
