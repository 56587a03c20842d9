//! Property tests for attribute overrides.

use proptest::prelude::*;
use serde_json::{Map, Value};

use ferry::domain::services::apply_overrides;

fn key() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-z_]{1,8}").unwrap()
}

fn plain_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        proptest::string::string_regex("[A-Za-z0-9 ]{0,12}")
            .unwrap()
            .prop_map(Value::from),
    ]
}

fn flat_object() -> impl Strategy<Value = Map<String, Value>> {
    proptest::collection::btree_map(key(), plain_value(), 0..6)
        .prop_map(|m| m.into_iter().collect())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 96,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: applying the same overrides twice equals applying them once.
    #[test]
    fn property_overrides_are_idempotent(payload in flat_object(), overrides in flat_object()) {
        let mut once = Value::Object(payload);
        apply_overrides(&mut once, &overrides).unwrap();
        let mut twice = once.clone();
        apply_overrides(&mut twice, &overrides).unwrap();
        prop_assert_eq!(once, twice);
    }

    /// PROPERTY: a root-level override always wins.
    #[test]
    fn property_root_override_sets_value(payload in flat_object(), key in key(), value in plain_value()) {
        let mut target = Value::Object(payload);
        let mut overrides = Map::new();
        overrides.insert(key.clone(), value.clone());

        apply_overrides(&mut target, &overrides).unwrap();
        prop_assert_eq!(&target[key.as_str()], &value);
    }

    /// PROPERTY: overrides never panic on arbitrary path strings.
    #[test]
    fn property_override_paths_never_panic(path in "(?s).{0,40}") {
        let mut payload = serde_json::json!({"a": {"b": [1, 2]}});
        let mut overrides = Map::new();
        overrides.insert(path, Value::from(1));
        let _ = apply_overrides(&mut payload, &overrides);
    }
}
