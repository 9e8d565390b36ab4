//! Property-based test generators using proptest.
//!
//! Provides strategies for state trees and delta patches. Outside the
//! `narrow_*` strategies, nested mappings only ever hold plain keys; sequence and metadata keys appear at the top
//! level of a patch, where the merge interprets them.
//!
//! Mappings are generated as entry lists so key order varies between cases.
//! The `narrow_*` strategies draw keys from a four-letter alphabet, which
//! makes patches collide with tree keys at every depth.

use mirror_protocol::{Map, Value, METADATA_SIGIL};
use proptest::prelude::*;
use std::ops::Range;

fn map_strategy(
    key: impl Strategy<Value = String>,
    value: impl Strategy<Value = Value>,
    size: Range<usize>,
) -> impl Strategy<Value = Map> {
    prop::collection::vec((key, value), size).prop_map(|entries| entries.into_iter().collect())
}

/// Strategy for plain keys (no sigil, no index suffix).
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9_]{0,7}").expect("Invalid regex")
}

/// Strategy for `name[index]` keys with small indices.
pub fn indexed_key_strategy() -> impl Strategy<Value = String> {
    (key_strategy(), 0usize..8).prop_map(|(name, index)| format!("{name}[{index}]"))
}

/// Strategy for plain keys drawn from `A` to `D`.
pub fn narrow_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-D]").expect("Invalid regex")
}

/// Strategy for metadata keys.
pub fn metadata_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,8}")
        .expect("Invalid regex")
        .prop_map(|name| format!("{METADATA_SIGIL}{name}"))
}

/// Strategy for scalar values. Floats are finite so trees compare equal.
pub fn leaf_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        ((1u64 << 63)..=u64::MAX).prop_map(Value::Unsigned),
        (-1.0e6f64..1.0e6).prop_map(Value::Float),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::Text),
    ]
}

/// Strategy for arbitrary values up to a few levels deep.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    leaf_value_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            map_strategy(key_strategy(), inner, 0..4).prop_map(Value::Map),
        ]
    })
}

/// Strategy for values whose nested mappings use narrow keys, with an
/// occasional metadata key mixed in.
pub fn narrow_value_strategy() -> impl Strategy<Value = Value> {
    leaf_value_strategy().prop_recursive(4, 48, 4, |inner| {
        let key = prop_oneof![
            5 => narrow_key_strategy(),
            1 => metadata_key_strategy(),
        ];
        prop_oneof![
            1 => prop::collection::vec(inner.clone(), 0..3).prop_map(Value::Array),
            3 => map_strategy(key, inner, 0..4).prop_map(Value::Map),
        ]
    })
}

/// Strategy for state trees.
pub fn tree_strategy() -> impl Strategy<Value = Map> {
    map_strategy(key_strategy(), value_strategy(), 0..6)
}

/// Strategy for state trees keyed by narrow keys at every depth.
pub fn narrow_tree_strategy() -> impl Strategy<Value = Map> {
    map_strategy(narrow_key_strategy(), narrow_value_strategy(), 0..4)
}

/// Strategy for patches using only plain keys.
pub fn plain_patch_strategy() -> impl Strategy<Value = Map> {
    map_strategy(key_strategy(), value_strategy(), 0..6)
}

/// Strategy for patches over narrow trees, mixing plain, indexed and
/// metadata keys at the top level.
pub fn narrow_patch_strategy() -> impl Strategy<Value = Map> {
    let key = prop_oneof![
        5 => narrow_key_strategy(),
        1 => (narrow_key_strategy(), 0usize..4).prop_map(|(name, i)| format!("{name}[{i}]")),
        1 => metadata_key_strategy(),
    ];
    map_strategy(key, narrow_value_strategy(), 0..4)
}

/// Strategy for patches mixing plain, indexed and metadata keys.
pub fn patch_strategy() -> impl Strategy<Value = Map> {
    let key = prop_oneof![
        4 => key_strategy(),
        2 => indexed_key_strategy(),
        1 => metadata_key_strategy(),
    ];
    map_strategy(key, value_strategy(), 0..8)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
