//! Folding delta payloads into a cached state tree.

use crate::value::{Map, Value};
use tracing::warn;

/// Keys starting with this character carry transport metadata, not state.
pub const METADATA_SIGIL: char = '@';

/// Largest sequence index a patch may address.
///
/// Keys past this bound are dropped instead of padding the sequence.
pub const MAX_SEQUENCE_INDEX: usize = 4096;

/// Placeholder stored in sequence slots a patch skipped over.
///
/// This conflates "not yet reported" with "disabled"; it is kept because
/// consumers of zone vectors already rely on it.
fn placeholder() -> Value {
    Value::Bool(false)
}

/// Splits a `name[index]` key into its sequence name and index.
///
/// Returns `None` for plain keys, an empty name, or an index that is not a
/// non-negative decimal integer.
pub fn parse_indexed_key(key: &str) -> Option<(&str, usize)> {
    let inner = key.strip_suffix(']')?;
    let open = inner.rfind('[')?;
    let (name, index) = (&inner[..open], &inner[open + 1..]);

    if name.is_empty() || index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    index.parse().ok().map(|i| (name, i))
}

/// Folds `patch` into `target` in place and returns `target`.
///
/// Keys of `patch` are applied one at a time, in the order they arrived:
/// - metadata keys (`@...`) are ignored
/// - `name[i]` assigns element `i` of the sequence under `name`, creating the
///   sequence and padding it with `false` as needed
/// - a mapping over an existing mapping is merged recursively
/// - anything else overwrites the key
///
/// Because later keys see the effect of earlier ones, `{"Zones[1]": true,
/// "Zones": [true]}` leaves `Zones` as `[true]` while the reverse order
/// leaves `[true, true]`.
///
/// Unlike an unbounded sequence assignment, `name[i]` with `i` above
/// [`MAX_SEQUENCE_INDEX`] is logged and dropped, so a single key cannot
/// allocate an arbitrarily long sequence.
///
/// Keys are never removed. A mapping stored under a new key is inserted as
/// is, so nested `@` and `name[i]` keys inside it are kept literally.
pub fn merge<'a>(target: &'a mut Map, patch: &Map) -> &'a mut Map {
    for (key, value) in patch {
        if key.starts_with(METADATA_SIGIL) {
            continue;
        }

        if let Some((name, index)) = parse_indexed_key(key) {
            assign_element(target, name, index, value);
            continue;
        }

        if let Value::Map(sub_patch) = value {
            if let Some(Value::Map(existing)) = target.get_mut(key) {
                merge(existing, sub_patch);
                continue;
            }
        }

        target.insert(key.clone(), value.clone());
    }

    target
}

fn assign_element(target: &mut Map, name: &str, index: usize, value: &Value) {
    let len = match index.checked_add(1) {
        Some(len) if index <= MAX_SEQUENCE_INDEX => len,
        _ => {
            warn!(key = name, index, "sequence index out of range, dropping patch key");
            return;
        }
    };

    let slot = target
        .entry(name.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));

    if !matches!(slot, Value::Array(_)) {
        warn!(key = name, "replacing non-sequence value with a sequence");
        *slot = Value::Array(Vec::new());
    }

    if let Value::Array(items) = slot {
        if items.len() < len {
            items.resize(len, placeholder());
        }
        items[index] = value.clone();
    }
}
