//! The legacy flat key/value state encoding.
//!
//! A nested value is stored as a flat map from dotted paths to strings:
//! `list.#` and `set.#` hold element counts, `map.%` holds a map's size,
//! list elements are addressed by index, set elements by hash code (or by
//! index when written by [`flatten`]), and unknown values are the
//! [`UNKNOWN_VARIABLE_VALUE`] sentinel.

use crate::error::ValueError;
use crate::value::{Value, ValueType};
use std::collections::{BTreeMap, BTreeSet};

/// Sentinel string marking an unknown value in a flatmap.
pub const UNKNOWN_VARIABLE_VALUE: &str = "74D93920-ED26-11E3-AC10-0800200C9A66";

/// A flatmap.
pub type FlatMap = BTreeMap<String, String>;

/// Flatten an object value. A null object yields an empty map.
pub fn flatten(value: &Value) -> FlatMap {
    let mut out = FlatMap::new();
    if let Value::Object(attrs) = value {
        for (name, attr) in attrs {
            flatten_value(&mut out, name, attr);
        }
    }
    out
}

fn flatten_value(out: &mut FlatMap, key: &str, value: &Value) {
    match value {
        Value::Null => {},
        Value::Unknown => {
            out.insert(key.to_string(), UNKNOWN_VARIABLE_VALUE.to_string());
        },
        Value::Bool(b) => {
            out.insert(key.to_string(), b.to_string());
        },
        Value::Number(n) => {
            out.insert(key.to_string(), n.to_string());
        },
        Value::String(s) => {
            out.insert(key.to_string(), s.clone());
        },
        Value::List(items) | Value::Set(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_value(out, &format!("{}.{}", key, i), item);
            }
            out.insert(format!("{}.#", key), items.len().to_string());
        },
        Value::Map(entries) => {
            for (k, v) in entries {
                flatten_value(out, &format!("{}.{}", key, k), v);
            }
            out.insert(format!("{}.%", key), entries.len().to_string());
        },
        Value::Object(attrs) => {
            for (name, attr) in attrs {
                flatten_value(out, &format!("{}.{}", key, name), attr);
            }
        },
    }
}

/// Flatten a value, writing unknown collections as unknown counts.
///
/// [`flatten`] writes an unknown list as a bare sentinel at its own key;
/// this variant follows the state layout, where the count carries it.
pub fn flatten_typed(value: &Value, ty: &ValueType) -> FlatMap {
    let mut out = FlatMap::new();
    if let (Value::Object(attrs), ValueType::Object(types)) = (value, ty) {
        for (name, attr_ty) in types {
            let attr = attrs.get(name).unwrap_or(&Value::Null);
            flatten_typed_value(&mut out, name, attr, attr_ty);
        }
    }
    out
}

fn flatten_typed_value(out: &mut FlatMap, key: &str, value: &Value, ty: &ValueType) {
    match (value, ty) {
        (Value::Unknown, ValueType::List(_) | ValueType::Set(_)) => {
            out.insert(format!("{}.#", key), UNKNOWN_VARIABLE_VALUE.to_string());
        },
        (Value::Unknown, ValueType::Map(_)) => {
            out.insert(format!("{}.%", key), UNKNOWN_VARIABLE_VALUE.to_string());
        },
        (Value::Unknown, ValueType::Object(types)) => {
            // Whole objects cannot be unknown in a flatmap.
            for (name, attr_ty) in types {
                flatten_typed_value(out, &format!("{}.{}", key, name), &Value::Unknown, attr_ty);
            }
        },
        (Value::List(items) | Value::Set(items), _) => {
            let element = ty.element_type().unwrap_or(&ValueType::Dynamic);
            for (i, item) in items.iter().enumerate() {
                flatten_typed_value(out, &format!("{}.{}", key, i), item, element);
            }
            out.insert(format!("{}.#", key), items.len().to_string());
        },
        (Value::Map(entries), _) => {
            let element = ty.element_type().unwrap_or(&ValueType::Dynamic);
            for (k, v) in entries {
                flatten_typed_value(out, &format!("{}.{}", key, k), v, element);
            }
            out.insert(format!("{}.%", key), entries.len().to_string());
        },
        (Value::Object(attrs), ValueType::Object(types)) => {
            for (name, attr_ty) in types {
                let attr = attrs.get(name).unwrap_or(&Value::Null);
                flatten_typed_value(out, &format!("{}.{}", key, name), attr, attr_ty);
            }
        },
        (other, _) => flatten_value(out, key, other),
    }
}

/// Rebuild a structured value of object type `ty` from a flatmap.
pub fn expand(map: &FlatMap, ty: &ValueType) -> Result<Value, ValueError> {
    match ty {
        ValueType::Object(attrs) => expand_object(map, "", attrs),
        other => Err(ValueError::Flatmap(format!(
            "can only expand objects, not {}",
            other.friendly_name()
        ))),
    }
}

fn expand_value(map: &FlatMap, key: &str, ty: &ValueType) -> Result<Value, ValueError> {
    match ty {
        ValueType::Bool | ValueType::Number | ValueType::String | ValueType::Dynamic => {
            expand_primitive(map, key, ty)
        },
        ValueType::Object(attrs) => expand_object(map, &format!("{}.", key), attrs),
        ValueType::Map(element) => expand_map(map, key, element),
        ValueType::List(element) => expand_list(map, key, element),
        ValueType::Set(element) => expand_set(map, key, element),
    }
}

fn expand_primitive(map: &FlatMap, key: &str, ty: &ValueType) -> Result<Value, ValueError> {
    let raw = match map.get(key) {
        None => return Ok(Value::Null),
        Some(raw) if raw == UNKNOWN_VARIABLE_VALUE => return Ok(Value::Unknown),
        Some(raw) => raw,
    };
    match ty {
        // The legacy SDK writes "" for unset numbers and bools.
        ValueType::Number | ValueType::Bool if raw.is_empty() => Ok(Value::Null),
        ValueType::Dynamic => Ok(Value::String(raw.clone())),
        _ => ty
            .coerce(Value::String(raw.clone()))
            .map_err(|e| ValueError::Flatmap(format!("{}: {}", key, e))),
    }
}

fn expand_object(
    map: &FlatMap,
    prefix: &str,
    attrs: &BTreeMap<String, ValueType>,
) -> Result<Value, ValueError> {
    let mut out = BTreeMap::new();
    for (name, ty) in attrs {
        out.insert(name.clone(), expand_value(map, &format!("{}{}", prefix, name), ty)?);
    }
    Ok(Value::Object(out))
}

fn keys_under<'a>(map: &'a FlatMap, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a String)> {
    map.range(prefix.to_string()..)
        .take_while(move |(k, _)| k.starts_with(prefix))
        .map(move |(k, v)| (&k[prefix.len()..], v))
}

fn expand_map(map: &FlatMap, key: &str, element: &ValueType) -> Result<Value, ValueError> {
    if map.get(key).map(String::as_str) == Some(UNKNOWN_VARIABLE_VALUE) {
        return Ok(Value::Unknown);
    }
    match map.get(&format!("{}.%", key)).map(String::as_str) {
        None => return Ok(Value::Null),
        Some(UNKNOWN_VARIABLE_VALUE) => return Ok(Value::Unknown),
        Some(_) => {},
    }
    let prefix = format!("{}.", key);
    let mut out = BTreeMap::new();
    // Map elements are always primitives in a flatmap, so the remainder of the
    // key, dots included, is the map key.
    for (rest, _) in keys_under(map, &prefix) {
        if rest == "%" {
            continue;
        }
        let full = format!("{}{}", prefix, rest);
        out.insert(rest.to_string(), expand_value(map, &full, element)?);
    }
    Ok(Value::Map(out))
}

fn parse_count(map: &FlatMap, key: &str) -> Result<Option<Result<usize, ()>>, ValueError> {
    match map.get(&format!("{}.#", key)).map(String::as_str) {
        None => Ok(None),
        Some(UNKNOWN_VARIABLE_VALUE) => Ok(Some(Err(()))),
        Some(raw) => raw
            .parse::<usize>()
            .map(|n| Some(Ok(n)))
            .map_err(|_| ValueError::Flatmap(format!("invalid count {:?} for {}", raw, key))),
    }
}

fn expand_list(map: &FlatMap, key: &str, element: &ValueType) -> Result<Value, ValueError> {
    if map.get(key).map(String::as_str) == Some(UNKNOWN_VARIABLE_VALUE) {
        return Ok(Value::Unknown);
    }
    let count = match parse_count(map, key)? {
        None => return Ok(Value::Null),
        Some(Err(())) => return Ok(Value::Unknown),
        Some(Ok(n)) => n,
    };
    (0..count)
        .map(|i| expand_value(map, &format!("{}.{}", key, i), element))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::List)
}

/// Orders set element segments numerically when they are numbers.
fn segment_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Distinct element segments directly below `key` (excluding the count).
pub(crate) fn element_segments(map: &FlatMap, key: &str, count_key: &str) -> Vec<String> {
    let prefix = format!("{}.", key);
    let segments: BTreeSet<&str> = keys_under(map, &prefix)
        .map(|(rest, _)| rest.split('.').next().unwrap_or(rest))
        .filter(|segment| *segment != count_key)
        .collect();
    let mut segments: Vec<String> = segments.into_iter().map(str::to_string).collect();
    segments.sort_by(|a, b| segment_order(a, b));
    segments
}

fn expand_set(map: &FlatMap, key: &str, element: &ValueType) -> Result<Value, ValueError> {
    if map.get(key).map(String::as_str) == Some(UNKNOWN_VARIABLE_VALUE) {
        return Ok(Value::Unknown);
    }
    let count = match parse_count(map, key)? {
        None => return Ok(Value::Null),
        Some(Err(())) => return Ok(Value::Unknown),
        Some(Ok(n)) => n,
    };
    let mut items = Vec::new();
    for segment in element_segments(map, key, "#") {
        items.push(expand_value(map, &format!("{}.{}", key, segment), element)?);
    }
    if items.is_empty() && count == 1 {
        // A single element with no attributes leaves no keys behind.
        items.push(match element {
            ValueType::Object(attrs) => Value::Object(
                attrs.keys().map(|k| (k.clone(), Value::Null)).collect(),
            ),
            ValueType::Map(_) => Value::Map(BTreeMap::new()),
            ValueType::List(_) => Value::List(Vec::new()),
            ValueType::Set(_) => Value::Set(Vec::new()),
            _ => Value::Null,
        });
    }
    Ok(Value::Set(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_type() -> ValueType {
        ValueType::object([
            ("id", ValueType::String),
            ("count", ValueType::Number),
            ("tags", ValueType::map(ValueType::String)),
            ("names", ValueType::list(ValueType::String)),
            (
                "rule",
                ValueType::set(ValueType::object([
                    ("port", ValueType::Number),
                    ("cidrs", ValueType::list(ValueType::String)),
                ])),
            ),
        ])
    }

    #[test]
    fn test_flatten_layout() {
        let value = Value::object([
            ("id", Value::string("abc")),
            ("count", Value::int(2)),
            (
                "tags",
                Value::Map([("env".to_string(), Value::string("prod"))].into()),
            ),
            (
                "names",
                Value::List(vec![Value::string("a"), Value::string("b")]),
            ),
            ("rule", Value::Null),
        ]);
        let flat = flatten(&value);
        let expected: FlatMap = [
            ("id", "abc"),
            ("count", "2"),
            ("tags.%", "1"),
            ("tags.env", "prod"),
            ("names.#", "2"),
            ("names.0", "a"),
            ("names.1", "b"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(flat, expected);
    }

    #[test]
    fn test_expand_nulls_and_empties() {
        let ty = sample_type();
        let flat: FlatMap = [("names.#", "0"), ("tags.%", "0")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let value = expand(&flat, &ty).unwrap();
        assert_eq!(value.get_attr("names"), Some(&Value::List(vec![])));
        assert_eq!(value.get_attr("tags"), Some(&Value::Map(BTreeMap::new())));
        assert_eq!(value.get_attr("rule"), Some(&Value::Null));
        assert_eq!(value.get_attr("id"), Some(&Value::Null));
    }

    #[test]
    fn test_expand_hash_keyed_set() {
        let ty = sample_type();
        let flat: FlatMap = [
            ("rule.#", "2"),
            ("rule.99.port", "22"),
            ("rule.99.cidrs.#", "0"),
            ("rule.1234.port", "80"),
            ("rule.1234.cidrs.#", "1"),
            ("rule.1234.cidrs.0", "0.0.0.0/0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let value = expand(&flat, &ty).unwrap();
        let rules = value.get_attr("rule").and_then(Value::elements).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].get_attr("port"), Some(&Value::int(22)));
        assert_eq!(rules[1].get_attr("port"), Some(&Value::int(80)));
    }

    #[test]
    fn test_unknown_counts() {
        let ty = sample_type();
        let value = Value::object([("names", Value::Unknown), ("tags", Value::Unknown)]);
        let flat = flatten_typed(&value, &ty);
        assert_eq!(flat.get("names.#").map(String::as_str), Some(UNKNOWN_VARIABLE_VALUE));
        assert_eq!(flat.get("tags.%").map(String::as_str), Some(UNKNOWN_VARIABLE_VALUE));
        let back = expand(&flat, &ty).unwrap();
        assert_eq!(back.get_attr("names"), Some(&Value::Unknown));
        assert_eq!(back.get_attr("tags"), Some(&Value::Unknown));
    }

    #[test]
    fn test_empty_numbers_expand_to_null() {
        let ty = ValueType::object([("count", ValueType::Number), ("name", ValueType::String)]);
        let flat: FlatMap = [("count", ""), ("name", "")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let value = expand(&flat, &ty).unwrap();
        assert_eq!(value.get_attr("count"), Some(&Value::Null));
        assert_eq!(value.get_attr("name"), Some(&Value::string("")));
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let names = prop::collection::vec("[a-z]{1,6}", 0..4);
        let tags = prop::collection::btree_map("[a-z]{1,4}", "[a-z0-9 ]{0,6}", 0..3);
        let rules = prop::collection::btree_set(0i64..1000, 0..4);
        (
            prop::option::of("[a-z0-9]{1,8}"),
            prop::option::of(-1000i64..1000),
            prop::option::of(tags),
            prop::option::of(names),
            prop::option::of(rules),
        )
            .prop_map(|(id, count, tags, names, rules)| {
                Value::object([
                    ("id", id.map(Value::String).unwrap_or(Value::Null)),
                    ("count", count.map(Value::int).unwrap_or(Value::Null)),
                    (
                        "tags",
                        tags.map(|t| {
                            Value::Map(t.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
                        })
                        .unwrap_or(Value::Null),
                    ),
                    (
                        "names",
                        names
                            .map(|n| Value::List(n.into_iter().map(Value::String).collect()))
                            .unwrap_or(Value::Null),
                    ),
                    (
                        "rule",
                        rules
                            .map(|r| {
                                Value::Set(
                                    r.into_iter()
                                        .map(|port| {
                                            Value::object([
                                                ("port", Value::int(port)),
                                                (
                                                    "cidrs",
                                                    Value::List(vec![Value::string(
                                                        format!("10.0.0.{}/32", port % 255),
                                                    )]),
                                                ),
                                            ])
                                        })
                                        .collect(),
                                )
                            })
                            .unwrap_or(Value::Null),
                    ),
                ])
            })
    }

    proptest! {
        #[test]
        fn prop_flatmap_round_trip(value in arb_value()) {
            let ty = sample_type();
            let flat = flatten(&value);
            prop_assert_eq!(expand(&flat, &ty).unwrap(), value);
        }
    }
}
