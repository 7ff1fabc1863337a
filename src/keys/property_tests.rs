//! Property-Based Tests for Key Derivation
//!
//! Uses proptest to verify determinism and isolation of generated keys.

use proptest::prelude::*;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;

use crate::keys::{generate_key, DIGEST_HEX_LEN};

/// Serializes its pairs as a map in exactly the stored order.
struct OrderedPairs(Vec<(String, i64)>);

impl Serialize for OrderedPairs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// == Strategies ==
fn namespace_strategy() -> impl Strategy<Value = String> {
    "[a-z_:]{1,24}".prop_map(|s| s)
}

fn identifier_strategy() -> impl Strategy<Value = String> {
    "\\PC{0,48}".prop_map(|s| s)
}

fn pairs_strategy() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12)
        .prop_map(|m: BTreeMap<String, i64>| m.into_iter().collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // Mapping order never influences the key.
    #[test]
    fn prop_key_ignores_mapping_order(
        namespace in namespace_strategy(),
        identifier in identifier_strategy(),
        pairs in pairs_strategy(),
        rotate in 0usize..12,
    ) {
        let forward = OrderedPairs(pairs.clone());
        let mut shuffled = pairs.clone();
        if !shuffled.is_empty() {
            let by = rotate % shuffled.len();
            shuffled.rotate_left(by);
            shuffled.reverse();
        }
        let shuffled = OrderedPairs(shuffled);

        let a = generate_key(&namespace, &identifier, &forward).unwrap();
        let b = generate_key(&namespace, &identifier, &shuffled).unwrap();
        prop_assert_eq!(a, b);
    }

    // Distinct namespaces never share a key for the same input.
    #[test]
    fn prop_namespaces_do_not_collide(
        n1 in namespace_strategy(),
        n2 in namespace_strategy(),
        identifier in identifier_strategy(),
        pairs in pairs_strategy(),
    ) {
        prop_assume!(n1 != n2);
        let payload = OrderedPairs(pairs);

        let a = generate_key(&n1, &identifier, &payload).unwrap();
        let b = generate_key(&n2, &identifier, &payload).unwrap();
        prop_assert_ne!(a.digest(), b.digest());
        prop_assert_eq!(a.namespace(), n1.as_str());
        prop_assert_eq!(b.namespace(), n2.as_str());
    }

    // Keys have bounded length regardless of payload size.
    #[test]
    fn prop_key_length_is_bounded(
        namespace in namespace_strategy(),
        identifier in identifier_strategy(),
        pairs in pairs_strategy(),
    ) {
        let key = generate_key(&namespace, &identifier, &OrderedPairs(pairs)).unwrap();
        prop_assert_eq!(key.as_str().len(), namespace.len() + 1 + DIGEST_HEX_LEN);
    }
}
