//! Property tests for the three-way merge.

use proptest::prelude::*;
use serde_json::{Map, Value};

use ferry::domain::services::{three_way_merge, MergeFields};

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-100i64..100).prop_map(Value::from),
        "[a-z]{0,6}".prop_map(Value::from),
    ]
}

fn json_object() -> impl Strategy<Value = Value> {
    let value = leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            proptest::collection::btree_map("[a-d]", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    });
    proptest::collection::btree_map("[a-f]", value, 0..5)
        .prop_map(|m| Value::Object(m.into_iter().collect()))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: merging three identical documents changes nothing.
    #[test]
    fn property_identical_inputs_are_clean(doc in json_object()) {
        let result = three_way_merge(&doc, &doc, &doc, MergeFields::default());
        prop_assert!(result.is_clean());
        prop_assert_eq!(result.merged, doc);
    }

    /// PROPERTY: without target-side changes the source wins without conflicts.
    #[test]
    fn property_untouched_target_takes_source(last in json_object(), source in json_object()) {
        let result = three_way_merge(&last, &source, &last, MergeFields::default());
        prop_assert!(result.conflicts.is_empty());
        prop_assert!(result.rebase_candidates.is_empty());
        prop_assert_eq!(result.merged, source);
    }

    /// PROPERTY: without source-side changes nothing conflicts and the source is kept.
    #[test]
    fn property_untouched_source_never_conflicts(last in json_object(), target in json_object()) {
        let result = three_way_merge(&last, &last, &target, MergeFields::default());
        prop_assert!(result.conflicts.is_empty());
        prop_assert_eq!(result.merged, last);
    }
}
