//! Property tests for delta merging.

use mirror_protocol::{merge, parse_indexed_key, Map, Value, METADATA_SIGIL};
use mirror_testkit::prelude::*;
use proptest::prelude::*;

/// Checks `merged` against `original` key by key: keys the patch does not
/// mention are unchanged, mappings merged over mappings are checked one
/// level down, and other plain patch keys hold the patch value.
///
/// Keys addressed through `name[i]` are left to the sequence properties.
fn check_against_patch(original: &Map, patch: &Map, merged: &Map) -> Result<(), TestCaseError> {
    let indexed: Vec<&str> = patch
        .keys()
        .filter_map(|key| parse_indexed_key(key).map(|(name, _)| name))
        .collect();

    for (key, before) in original {
        let after = merged.get(key);
        match patch.get(key) {
            _ if indexed.contains(&key.as_str()) => {}
            _ if key.starts_with(METADATA_SIGIL) => {
                prop_assert_eq!(after, Some(before));
            }
            None => {
                prop_assert_eq!(after, Some(before), "untouched key {} changed", key);
            }
            Some(Value::Map(sub_patch)) => match (before, after) {
                (Value::Map(sub_before), Some(Value::Map(sub_after))) => {
                    check_against_patch(sub_before, sub_patch, sub_after)?;
                }
                (Value::Map(_), other) => {
                    return Err(TestCaseError::fail(format!(
                        "mapping under {key} replaced by {other:?}"
                    )));
                }
                (_, other) => {
                    prop_assert_eq!(other.cloned(), Some(Value::Map(sub_patch.clone())));
                }
            },
            Some(value) => {
                prop_assert_eq!(after, Some(value));
            }
        }
    }

    Ok(())
}

proptest! {
    #![proptest_config(PropTestConfig::default().to_proptest_config())]

    #[test]
    fn plain_scalars_overwrite(mut target in tree_strategy(), patch in plain_patch_strategy()) {
        merge(&mut target, &patch);

        for (key, value) in &patch {
            if !matches!(value, Value::Map(_)) {
                prop_assert_eq!(target.get(key), Some(value));
            }
        }
    }

    #[test]
    fn keys_are_never_removed(original in tree_strategy(), patch in patch_strategy()) {
        let mut target = original.clone();
        merge(&mut target, &patch);

        for key in original.keys() {
            prop_assert!(target.contains_key(key), "lost key {}", key);
        }
    }

    #[test]
    fn untouched_keys_keep_their_values(
        original in narrow_tree_strategy(),
        patch in narrow_patch_strategy(),
    ) {
        let mut merged = original.clone();
        merge(&mut merged, &patch);

        check_against_patch(&original, &patch, &merged)?;
    }

    #[test]
    fn merging_twice_equals_merging_once(target in tree_strategy(), patch in patch_strategy()) {
        let mut once = target.clone();
        merge(&mut once, &patch);

        let mut twice = once.clone();
        merge(&mut twice, &patch);

        prop_assert_eq!(once, twice);
    }

    #[test]
    fn metadata_only_patch_is_a_no_op(
        target in tree_strategy(),
        keys in prop::collection::vec(metadata_key_strategy(), 1..4),
        value in value_strategy(),
    ) {
        let patch: Map = keys.into_iter().map(|k| (k, value.clone())).collect();
        let mut merged = target.clone();
        merge(&mut merged, &patch);

        prop_assert_eq!(merged, target);
    }

    #[test]
    fn indexed_key_assigns_and_pads(
        mut target in tree_strategy(),
        name in key_strategy(),
        index in 0usize..16,
        value in value_strategy(),
    ) {
        let before = match target.get(&name) {
            Some(Value::Array(items)) => items.len(),
            _ => 0,
        };

        let patch: Map = [(format!("{name}[{index}]"), value.clone())].into_iter().collect();
        merge(&mut target, &patch);

        let items = match target.get(&name) {
            Some(Value::Array(items)) => items,
            other => return Err(TestCaseError::fail(format!("expected sequence, got {other:?}"))),
        };
        prop_assert_eq!(items.len(), before.max(index + 1));
        prop_assert_eq!(&items[index], &value);
        for slot in &items[before.min(index)..index] {
            prop_assert_eq!(slot, &Value::Bool(false));
        }
    }
}
