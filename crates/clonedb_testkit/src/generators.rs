//! Property-based test generators using proptest.

use crate::fixtures::{doc_with_id, int};
use clonedb_codec::{RawDocument, Value};
use proptest::prelude::*;

/// Strategy for a scalar field value.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(int),
        any::<bool>().prop_map(Value::Bool),
        "[a-z]{0,12}".prop_map(Value::Text),
        Just(Value::Null),
    ]
}

/// Strategy for a collection name a client may create.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}"
}

/// Strategy for the documents of a collection: unique integer `_id`s with
/// a few arbitrary extra fields each.
pub fn collection_documents_strategy(max: usize) -> impl Strategy<Value = Vec<RawDocument>> {
    prop::collection::btree_map(
        any::<i64>(),
        prop::collection::vec(("[a-z]{1,6}", value_strategy()), 0..4),
        0..max,
    )
    .prop_map(|docs| {
        docs.into_iter()
            .map(|(id, extra)| {
                let mut seen = std::collections::BTreeSet::new();
                let extra: Vec<(&str, Value)> = extra
                    .iter()
                    .filter(|(name, _)| seen.insert(name.clone()))
                    .map(|(name, value)| (name.as_str(), value.clone()))
                    .collect();
                doc_with_id(id, &extra)
            })
            .collect()
    })
}
