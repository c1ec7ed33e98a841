//! Property tests for index composition.

use proptest::prelude::*;
use serde_json::{Map, Value, json};
use tenantry_core::canonical::canonical_string;
use tenantry_core::compose::compose_indexes;
use tenantry_core::fragment::IndexFragment;

fn index_entry(group: &str, scope: &str, fields: &[&str], group_last: bool) -> Value {
    let fields: Vec<Value> = fields
        .iter()
        .map(|path| json!({"fieldPath": path, "order": "ASCENDING"}))
        .collect();
    let mut entry = Map::new();
    if group_last {
        entry.insert("fields".to_string(), Value::Array(fields));
        entry.insert("queryScope".to_string(), json!(scope));
        entry.insert("collectionGroup".to_string(), json!(group));
    } else {
        entry.insert("collectionGroup".to_string(), json!(group));
        entry.insert("queryScope".to_string(), json!(scope));
        entry.insert("fields".to_string(), Value::Array(fields));
    }
    Value::Object(entry)
}

fn arb_entry() -> impl Strategy<Value = Value> {
    (
        prop::sample::select(vec!["users", "clubs", "sessions"]),
        prop::sample::select(vec!["COLLECTION", "COLLECTION_GROUP"]),
        prop::collection::vec(prop::sample::select(vec!["a", "b", "createdAt"]), 0..3),
        any::<bool>(),
    )
        .prop_map(|(group, scope, fields, group_last)| {
            index_entry(group, scope, &fields, group_last)
        })
}

fn arb_fragments() -> impl Strategy<Value = Vec<IndexFragment>> {
    prop::collection::vec(
        (
            prop::collection::vec(arb_entry(), 0..5),
            prop::collection::vec(
                (
                    prop::sample::select(vec!["users", "clubs"]),
                    prop::sample::select(vec!["tags", "name"]),
                )
                    .prop_map(|(group, path)| json!({"collectionGroup": group, "fieldPath": path})),
                0..3,
            ),
        )
            .prop_map(|(indexes, field_overrides)| IndexFragment {
                indexes,
                field_overrides,
            }),
        1..5,
    )
}

proptest! {
    #[test]
    fn composition_ignores_fragment_order(
        (fragments, shuffled) in arb_fragments()
            .prop_flat_map(|fragments| (Just(fragments.clone()), Just(fragments).prop_shuffle()))
    ) {
        let forward = compose_indexes(&fragments).render().unwrap();
        let permuted = compose_indexes(&shuffled).render().unwrap();
        prop_assert_eq!(forward, permuted);
    }

    #[test]
    fn composed_entries_are_unique(fragments in arb_fragments()) {
        let composed = compose_indexes(&fragments);
        let mut seen: Vec<String> = composed.indexes.iter().map(canonical_string).collect();
        let total = seen.len();
        seen.sort();
        seen.dedup();
        prop_assert_eq!(seen.len(), total);
    }

    #[test]
    fn composition_is_idempotent(fragments in arb_fragments()) {
        let composed = compose_indexes(&fragments);
        let again = IndexFragment {
            indexes: composed.indexes.clone(),
            field_overrides: composed.field_overrides.clone(),
        };
        prop_assert_eq!(compose_indexes([&again]), composed);
    }
}

#[test]
fn structural_duplicate_collapses_to_one_entry() {
    let a = IndexFragment {
        indexes: vec![index_entry("users", "COLLECTION", &["a"], false)],
        field_overrides: vec![],
    };
    let b = IndexFragment {
        indexes: vec![index_entry("users", "COLLECTION", &["a"], true)],
        field_overrides: vec![],
    };
    assert_eq!(compose_indexes([&a, &b]).indexes.len(), 1);
}
