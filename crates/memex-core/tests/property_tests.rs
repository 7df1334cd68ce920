//! # Property-Based Tests
//!
//! Determinism and integrity invariants, checked with proptest.

use memex_core::{
    ManualClock, SemanticPath, Snapshot, Store, Value, materializer::materialize,
    snapshot_from_bytes, snapshot_to_bytes,
};
use proptest::collection::vec;
use proptest::prelude::*;

/// Two- or three-segment lowercase paths under a fixed namespace.
fn path_strategy() -> impl Strategy<Value = String> {
    vec("[a-z]{1,5}", 1..3).prop_map(|parts| format!("data.{}", parts.join(".")))
}

fn writes_strategy() -> impl Strategy<Value = Vec<(String, i64)>> {
    vec((path_strategy(), -1000i64..1000), 1..30)
}

fn store_from(writes: &[(String, i64)], clock: ManualClock) -> Store {
    let mut store = Store::with_clock(clock);
    for (path, value) in writes {
        store.write(path, *value, None).expect("write");
    }
    store
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Every record links to its predecessor and its hash matches its content.
    #[test]
    fn ledger_chain_always_verifies(writes in writes_strategy()) {
        let store = store_from(&writes, ManualClock::ticking(0, 1));
        prop_assert!(store.verify_ledger().is_ok());

        let thoughts = store.ledger().thoughts();
        prop_assert_eq!(thoughts.len(), writes.len());
        for pair in thoughts.windows(2) {
            prop_assert_eq!(&pair[1].prev_hash, &pair[0].hash);
        }
    }

    /// Tampering with any single value is detected.
    #[test]
    fn tampering_is_detected(writes in writes_strategy(), pick in any::<prop::sample::Index>()) {
        let store = store_from(&writes, ManualClock::ticking(0, 1));
        let mut snapshot = store.export_snapshot();
        let at = pick.index(snapshot.ledger.len());
        snapshot.ledger[at].value = Value::text("tampered");

        let forged = Store::from_snapshot(snapshot, ManualClock::new(0));
        prop_assert!(forged.verify_ledger().is_err());
    }

    /// With distinct timestamps, the last write to a path is what reads back.
    #[test]
    fn last_writer_wins(writes in writes_strategy()) {
        let store = store_from(&writes, ManualClock::ticking(0, 1));
        for (path, _) in &writes {
            let last = writes.iter().rev().find(|(p, _)| p == path).map(|(_, v)| *v);
            let expected = last.map(Value::from);
            prop_assert_eq!(
                store.index().get(&SemanticPath::canonical(path)).cloned(),
                expected
            );
        }
    }

    /// The fold does not depend on the order records are presented in,
    /// even when every timestamp collides.
    #[test]
    fn materialization_ignores_record_order(writes in writes_strategy()) {
        let store = store_from(&writes, ManualClock::new(7));
        let forward = store.ledger().thoughts().to_vec();
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = materialize(&forward, store.scopes());
        let b = materialize(&reversed, store.scopes());
        prop_assert_eq!(a, b);
    }

    /// Nothing under a secret scope ever reaches the index.
    #[test]
    fn stealth_scope_never_indexed(
        writes in writes_strategy(),
        hidden in vec(("[a-z]{1,5}", -100i64..100), 1..10),
    ) {
        let mut store = store_from(&writes, ManualClock::ticking(0, 1));
        store.declare_secret("vault", "k").expect("secret");
        for (leaf, value) in &hidden {
            store.write(&format!("vault.{}", leaf), *value, None).expect("write");
        }

        for key in store.index().entries().keys() {
            prop_assert!(key != "vault" && !key.starts_with("vault."));
        }
        prop_assert_eq!(store.read("vault"), None);
        for (leaf, _) in &hidden {
            let last = hidden.iter().rev().find(|(l, _)| l == leaf).map(|(_, v)| Value::from(*v));
            prop_assert_eq!(store.read(&format!("vault.{}", leaf)), last);
        }
    }

    /// Snapshots survive both the binary and the JSON encodings.
    #[test]
    fn snapshot_roundtrips(writes in writes_strategy()) {
        let mut store = store_from(&writes, ManualClock::ticking(0, 1));
        store.declare_secret("vault", "k").expect("secret");
        store.write("vault.pin", 1234, None).expect("write");
        let snapshot = store.export_snapshot();

        let bytes = snapshot_to_bytes(&snapshot).expect("encode");
        prop_assert_eq!(&snapshot_from_bytes(&bytes).expect("decode"), &snapshot);

        let json = snapshot.to_json_value().expect("json");
        let restored = Store::from_snapshot(Snapshot::from_json_value(&json), ManualClock::new(0));
        prop_assert_eq!(restored.index(), store.index());
        prop_assert_eq!(restored.read("vault.pin"), Some(Value::from(1234)));
    }
}
