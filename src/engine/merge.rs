//! Reconciles incoming data with the value already cached under a key.

use serde_json::{Map, Value};

use super::equality::Shape;

/// Decide the next value of a subject.
///
/// Without `merge_existing`, or for primitive input, `incoming` replaces the
/// current value. Otherwise:
///
/// - sequence + sequence: concatenation, current elements first
/// - mapping + mapping with the same key set: `[current, incoming]`
/// - mapping + mapping otherwise: shallow union, incoming wins on conflicts
/// - sequence + mapping: current with incoming appended
/// - anything else: shallow union, incoming wins on conflicts
///
/// An absent `incoming` leaves `current` untouched.
pub fn merge(
    current: Option<Value>,
    incoming: Option<Value>,
    merge_existing: bool,
) -> Option<Value> {
    match incoming {
        None => current,
        Some(incoming) => Some(merge_value(current, incoming, merge_existing)),
    }
}

fn merge_value(current: Option<Value>, incoming: Value, merge_existing: bool) -> Value {
    if !merge_existing || matches!(Shape::of(&incoming), Shape::Primitive(_)) {
        return incoming;
    }
    let Some(current) = current else {
        return incoming;
    };

    match (current, incoming) {
        (Value::Array(mut current), Value::Array(incoming)) => {
            current.extend(incoming);
            Value::Array(current)
        }
        (Value::Object(current), Value::Object(incoming)) => {
            if same_key_set(&current, &incoming) {
                Value::Array(vec![Value::Object(current), Value::Object(incoming)])
            } else {
                Value::Object(union(entries(Value::Object(current)), incoming))
            }
        }
        (Value::Array(mut current), incoming @ Value::Object(_)) => {
            current.push(incoming);
            Value::Array(current)
        }
        (current, incoming) => Value::Object(union(entries(current), entries(incoming))),
    }
}

fn same_key_set(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len() && a.keys().all(|key| b.contains_key(key))
}

/// Shallow key/value view: mappings as-is, sequences keyed by index,
/// primitives contribute nothing.
fn entries(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| (index.to_string(), item))
            .collect(),
        _ => Map::new(),
    }
}

fn union(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay {
        base.insert(key, value);
    }
    base
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn merged(current: Value, incoming: Value, merge_existing: bool) -> Value {
        merge(Some(current), Some(incoming), merge_existing).expect("merged value")
    }

    #[test]
    fn replace_when_merge_disabled() {
        for current in [json!(1), json!([1]), json!({"a": 1}), json!(null)] {
            assert_eq!(merged(current, json!({"b": 2}), false), json!({"b": 2}));
        }
    }

    #[test]
    fn primitives_always_replace() {
        assert_eq!(merged(json!([1, 2]), json!(3), true), json!(3));
        assert_eq!(merged(json!({"a": 1}), json!("x"), true), json!("x"));
    }

    #[test]
    fn sequences_concatenate() {
        assert_eq!(merged(json!([1, 2]), json!([3]), true), json!([1, 2, 3]));
    }

    #[test]
    fn disjoint_mappings_union() {
        assert_eq!(merged(json!({"a": 1}), json!({"b": 2}), true), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn overlapping_mappings_prefer_incoming() {
        assert_eq!(
            merged(json!({"a": 1, "b": 1}), json!({"b": 2}), true),
            json!({"a": 1, "b": 2})
        );
    }

    #[test]
    fn identical_key_sets_become_a_pair() {
        assert_eq!(
            merged(json!({"a": 1}), json!({"a": 2}), true),
            json!([{"a": 1}, {"a": 2}])
        );
    }

    #[test]
    fn mapping_is_appended_to_sequence() {
        assert_eq!(
            merged(json!([{"a": 1}]), json!({"b": 2}), true),
            json!([{"a": 1}, {"b": 2}])
        );
    }

    #[test]
    fn mismatched_shapes_union_shallowly() {
        assert_eq!(
            merged(json!({"a": 1}), json!(["x"]), true),
            json!({"a": 1, "0": "x"})
        );
        assert_eq!(merged(json!(5), json!({"b": 2}), true), json!({"b": 2}));
    }

    #[test]
    fn absent_inputs() {
        assert_eq!(merge(Some(json!([1])), None, true), Some(json!([1])));
        assert_eq!(merge(None, Some(json!([1])), true), Some(json!([1])));
        assert_eq!(merge(None, None, true), None);
    }
}
