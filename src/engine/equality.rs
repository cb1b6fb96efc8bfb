//! Structural equality over JSON values.
//!
//! Inputs must be acyclic. `serde_json::Value` cannot express cycles, so the
//! precondition holds for every value the engine sees.

use serde_json::{Map, Number, Value};

/// Runtime shape of a value, used by equality and merge rules.
#[derive(Debug, Clone, Copy)]
pub enum Shape<'a> {
    Primitive(&'a Value),
    Sequence(&'a [Value]),
    Mapping(&'a Map<String, Value>),
}

impl<'a> Shape<'a> {
    pub fn of(value: &'a Value) -> Self {
        match value {
            Value::Array(items) => Self::Sequence(items),
            Value::Object(map) => Self::Mapping(map),
            other => Self::Primitive(other),
        }
    }
}

/// Structural, recursive equality.
///
/// Sequences compare index by index; mappings compare by key set and value,
/// independent of key order. Numbers compare by numeric value, so `1` equals
/// `1.0`.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (Shape::of(a), Shape::of(b)) {
        (Shape::Primitive(x), Shape::Primitive(y)) => primitive_equal(x, y),
        (Shape::Sequence(x), Shape::Sequence(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| deep_equal(l, r))
        }
        (Shape::Mapping(x), Shape::Mapping(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(key, l)| y.get(key).is_some_and(|r| deep_equal(l, r)))
        }
        _ => false,
    }
}

/// [`deep_equal`] lifted over absence. Two absent values are equal; an absent
/// value never equals a present one (including `null`).
pub fn deep_equal_opt(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => deep_equal(a, b),
        _ => false,
    }
}

fn primitive_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => number_equal(x, y),
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        _ => false,
    }
}

fn number_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn samples() -> Vec<Value> {
        vec![
            json!(null),
            json!(true),
            json!(0),
            json!(2.5),
            json!("text"),
            json!([]),
            json!([1, [2, 3]]),
            json!({}),
            json!({"a": 1, "b": {"c": [1, 2]}}),
        ]
    }

    #[test]
    fn equality_is_reflexive_and_symmetric() {
        let values = samples();
        for a in &values {
            assert!(deep_equal(a, &a.clone()), "reflexive for {a}");
            for b in &values {
                assert_eq!(deep_equal(a, b), deep_equal(b, a), "symmetric for {a} / {b}");
            }
        }
    }

    #[test]
    fn mapping_key_order_is_ignored() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": [true]}"#).expect("json");
        let b: Value = serde_json::from_str(r#"{"y": [true], "x": 1}"#).expect("json");
        assert!(deep_equal(&a, &b));
    }

    #[test]
    fn sequence_order_and_length_matter() {
        assert!(!deep_equal(&json!([1, 2]), &json!([2, 1])));
        assert!(!deep_equal(&json!([1, 2]), &json!([1, 2, 3])));
    }

    #[test]
    fn differing_kinds_are_unequal() {
        assert!(!deep_equal(&json!([]), &json!({})));
        assert!(!deep_equal(&json!(0), &json!(false)));
        assert!(!deep_equal(&json!("1"), &json!(1)));
        assert!(!deep_equal(&json!(null), &json!({})));
        assert!(!deep_equal(&json!({"a": 1}), &json!({"b": 1})));
    }

    #[test]
    fn integers_and_floats_compare_numerically() {
        assert!(deep_equal(&json!(1), &json!(1.0)));
        assert!(!deep_equal(&json!(1), &json!(1.5)));
    }

    #[test]
    fn absence_is_distinct_from_null() {
        assert!(deep_equal_opt(None, None));
        assert!(!deep_equal_opt(None, Some(&json!(null))));
    }
}
