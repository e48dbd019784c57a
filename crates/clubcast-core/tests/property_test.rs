//! Property tests for idempotency key derivation.
//!
//! The fingerprint must be deterministic, stable under re-serialization,
//! and scoped to the tenant, for any JSON payload a client can send.

use clubcast_core::{idempotency::derive_key, models::TenantId};
use proptest::prelude::*;
use serde_json::Value;

/// Arbitrary JSON values, a few levels deep.
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::from(n)),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
    ];

    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn derivation_is_deterministic(payload in arb_json()) {
        let tenant = TenantId::from("t1");

        prop_assert_eq!(
            derive_key(&tenant, None, &payload),
            derive_key(&tenant, None, &payload)
        );
    }

    #[test]
    fn derivation_survives_reserialization(payload in arb_json()) {
        let tenant = TenantId::from("t1");
        let reparsed: Value =
            serde_json::from_str(&payload.to_string()).expect("round trip parses");

        prop_assert_eq!(
            derive_key(&tenant, None, &payload),
            derive_key(&tenant, None, &reparsed)
        );
    }

    #[test]
    fn keys_are_tenant_scoped(payload in arb_json()) {
        let a = derive_key(&TenantId::from("t1"), None, &payload);
        let b = derive_key(&TenantId::from("t2"), None, &payload);

        prop_assert_ne!(a, b);
    }

    #[test]
    fn explicit_token_ignores_payload(payload in arb_json(), other in arb_json()) {
        let tenant = TenantId::from("t1");

        prop_assert_eq!(
            derive_key(&tenant, Some("tok"), &payload),
            derive_key(&tenant, Some("tok"), &other)
        );
    }
}
