//! Property-based tests for key derivation.
//!
//! - Determinism: equal `(name, parent, input)` always give equal keys
//! - Order invariance: object property order does not affect the key
//! - Nesting: a nested key is the root key placed under its parent

use proptest::prelude::*;
use recast_cache::key::{HASH_PREFIX_LEN, ancestors, basename};
use recast_cache::{Sha256Hasher, derive_key};
use serde_json::{Map, Value, json};

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}".prop_map(String::from)
}

fn parent_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(
        prop::collection::vec("[a-z]{1,8}-[0-9a-f]{4}", 1..4).prop_map(|parts| parts.join("/")),
    )
}

fn input_strategy() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..6)
        .prop_map(|map| map.into_iter().collect())
}

fn object(entries: impl IntoIterator<Item = (String, i64)>) -> Value {
    let map: Map<String, Value> = entries.into_iter().map(|(k, v)| (k, json!(v))).collect();
    Value::Object(map)
}

proptest! {
    #[test]
    fn key_is_deterministic(name in name_strategy(), parent in parent_strategy(), input in input_strategy()) {
        let value = object(input);
        let a = derive_key(&name, parent.as_deref(), &value, &Sha256Hasher).unwrap();
        let b = derive_key(&name, parent.as_deref(), &value.clone(), &Sha256Hasher).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn key_ignores_property_order(name in name_strategy(), input in input_strategy()) {
        let forward = object(input.clone());
        let reversed = object(input.into_iter().rev());
        let a = derive_key(&name, None, &forward, &Sha256Hasher).unwrap();
        let b = derive_key(&name, None, &reversed, &Sha256Hasher).unwrap();
        prop_assert_eq!(a.key, b.key);
    }

    #[test]
    fn nested_key_extends_parent(name in name_strategy(), parent in "[a-z]{1,8}-[0-9a-f]{4}", input in input_strategy()) {
        let value = object(input);
        let root = derive_key(&name, None, &value, &Sha256Hasher).unwrap();
        let nested = derive_key(&name, Some(parent.as_str()), &value, &Sha256Hasher).unwrap();
        prop_assert_eq!(&nested.key, &format!("{parent}/{}", root.key));
        prop_assert_eq!(basename(&nested.key), root.key.as_str());
        prop_assert_eq!(ancestors(&nested.key).collect::<Vec<_>>(), vec![parent.as_str()]);
    }

    #[test]
    fn key_suffix_is_hash_prefix(name in name_strategy(), input in input_strategy()) {
        let derived = derive_key(&name, None, &object(input), &Sha256Hasher).unwrap();
        let suffix = derived.key.strip_prefix(&format!("{name}-")).unwrap();
        prop_assert_eq!(suffix.len(), HASH_PREFIX_LEN);
        prop_assert!(derived.value_hash.starts_with(suffix));
    }
}
