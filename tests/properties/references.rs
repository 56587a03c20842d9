//! Property tests for reference replacement.

use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::{json, Value};

use ferry::domain::services::{
    reverse_target_reference_into_source, LookupTable, MissingPolicy, ReferenceContext,
    ReferenceMode, ReferenceReplacer, TargetSlot,
};
use ferry::domain::value_objects::{reference_url, ObjectRef, ResourceType};

const SOURCE: &str = "https://source.example.com/api/v1";
const TARGET: &str = "https://target.example.com/api/v1";

fn table(mapping: &BTreeMap<i64, i64>, resource_type: ResourceType) -> LookupTable {
    let mut table = LookupTable::new();
    for (source_id, target_id) in mapping {
        table.insert(
            resource_type,
            *source_id,
            vec![TargetSlot {
                index: 0,
                id: Some(*target_id),
                owner_failed: false,
            }],
        );
    }
    table
}

/// Source id -> target id, injective
fn mapping() -> impl Strategy<Value = BTreeMap<i64, i64>> {
    proptest::collection::btree_map(1i64..1_000_000, 0i64..1000, 1..8).prop_map(|m| {
        m.into_iter()
            .enumerate()
            .map(|(i, (source, offset))| (source, 2_000_000 + (i as i64) * 1000 + offset))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: a rewritten reference maps back onto the original source reference.
    #[test]
    fn property_single_reference_round_trips(mapping in mapping(), as_url in any::<bool>()) {
        let lookup = table(&mapping, ResourceType::Queue);
        let reverse = lookup.reverse();
        let ctx = ReferenceContext {
            lookup: &lookup,
            reverse: &reverse,
            base_url: TARGET,
            mode: ReferenceMode::Final,
        };

        for (source_id, target_id) in &mapping {
            let original = if as_url {
                Value::String(reference_url(SOURCE, ResourceType::Queue, source_id))
            } else {
                json!(source_id)
            };
            let mut payload = json!({"queue": original.clone()});
            let mut replacer = ReferenceReplacer::new(
                ctx,
                ObjectRef::new(ResourceType::Inbox, 1, "inbox"),
                0,
                1,
            );
            replacer
                .replace_reference_url(&mut payload, "queue", ResourceType::Queue, MissingPolicy::Fail)
                .unwrap();

            let expected_target = if as_url {
                Value::String(reference_url(TARGET, ResourceType::Queue, target_id))
            } else {
                json!(target_id)
            };
            prop_assert_eq!(&payload["queue"], &expected_target);

            let back = reverse_target_reference_into_source(
                &payload["queue"],
                ResourceType::Queue,
                &reverse,
                SOURCE,
            );
            prop_assert_eq!(back, original);
        }
    }

    /// PROPERTY: a list of mapped references keeps its order and maps back item by item.
    #[test]
    fn property_reference_list_round_trips(mapping in mapping()) {
        let lookup = table(&mapping, ResourceType::Queue);
        let reverse = lookup.reverse();
        let ctx = ReferenceContext {
            lookup: &lookup,
            reverse: &reverse,
            base_url: TARGET,
            mode: ReferenceMode::Final,
        };
        let original: Vec<Value> = mapping
            .keys()
            .map(|id| Value::String(reference_url(SOURCE, ResourceType::Queue, id)))
            .collect();
        let mut payload = json!({"queues": original.clone()});

        let mut replacer = ReferenceReplacer::new(ctx, ObjectRef::new(ResourceType::Hook, 1, "hook"), 0, 1);
        replacer
            .replace_list_of_reference_urls(
                &mut payload,
                "queues",
                ResourceType::Queue,
                MissingPolicy::Fail,
                false,
                None,
            )
            .unwrap();

        let back = reverse_target_reference_into_source(
            &payload["queues"],
            ResourceType::Queue,
            &reverse,
            SOURCE,
        );
        prop_assert_eq!(back, Value::Array(original));
    }

    /// PROPERTY: unmapped ids never silently resolve under the fail policy.
    #[test]
    fn property_unmapped_reference_fails(mapping in mapping(), unknown in 1_000_000i64..2_000_000) {
        let lookup = table(&mapping, ResourceType::Queue);
        let reverse = lookup.reverse();
        let ctx = ReferenceContext {
            lookup: &lookup,
            reverse: &reverse,
            base_url: TARGET,
            mode: ReferenceMode::Final,
        };
        let mut payload = json!({"queue": reference_url(SOURCE, ResourceType::Queue, unknown)});
        let mut replacer = ReferenceReplacer::new(ctx, ObjectRef::new(ResourceType::Inbox, 1, "inbox"), 0, 1);

        let result = replacer.replace_reference_url(&mut payload, "queue", ResourceType::Queue, MissingPolicy::Fail);
        prop_assert!(result.is_err());
    }
}
