//! Normalization of structured values produced through the flatmap layer.
//!
//! Values that go through flatmap lose the difference between null and
//! empty, and between unset and unknown. The functions here restore what
//! the orchestrator expects: values the provider did not touch stay exactly
//! as proposed, computed attributes left null during create become unknown,
//! write-only attributes never reach state, and conflicting arguments
//! resolve deterministically.

use crate::configschema::{Block, NestingMode};
use crate::diag::Diagnostic;
use crate::helper::schema::{Elem, SchemaMap};
use crate::helper::timeout::TIMEOUTS_CONFIG_KEY;
use crate::path::AttributePath;
use crate::validation::lookup_key;
use crate::value::{Value, ValueType};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

fn is_empty_collection(v: &Value) -> bool {
    match v {
        Value::List(items) | Value::Set(items) => items.is_empty(),
        Value::Map(entries) => entries.is_empty(),
        _ => false,
    }
}

/// Copy values from `src` into null places of `dst`.
///
/// `dst` is what the flatmap layer produced and `src` is what the request
/// carried (the proposed state during plan, the planned state during
/// apply). Unknown values in `src` are kept during plan. During apply, map
/// entries missing from `dst` stay missing so the result converges to what
/// the provider reported.
pub fn normalize_null_values(dst: Value, src: &Value, ty: &ValueType, apply: bool) -> Value {
    if src.is_unknown() {
        if dst.is_null() && !apply {
            return src.clone();
        }
        return dst;
    }

    let collection = matches!(ty, ValueType::List(_) | ValueType::Set(_) | ValueType::Map(_));
    if collection && apply {
        // Prefer src between null and empty so plan and apply agree.
        if (src.is_null() && is_empty_collection(&dst)) || (is_empty_collection(src) && dst.is_null()) {
            return src.clone();
        }
    }

    if src.is_null() || dst.is_unknown() {
        return dst;
    }

    match ty {
        ValueType::Map(elem) => normalize_mappable(dst, src, |_| Some(&**elem), true, apply),
        ValueType::Object(attrs) => normalize_mappable(dst, src, |k| attrs.get(k), false, apply),
        ValueType::Set(_) => {
            // Apply loses too much information to rebuild a set.
            if src.is_wholly_known() && apply {
                return src.clone();
            }
            dst
        },
        ValueType::List(elem) => normalize_list(dst, src, elem, apply),
        ValueType::Dynamic => {
            let inferred = src.infer_type();
            if inferred == ValueType::Dynamic {
                return dst;
            }
            normalize_null_values(dst, src, &inferred, apply)
        },
        _ => {
            if dst.is_null() && src.is_wholly_known() && apply {
                return src.clone();
            }
            dst
        },
    }
}

fn normalize_mappable<'t>(
    dst: Value,
    src: &Value,
    elem_type: impl Fn(&str) -> Option<&'t ValueType>,
    is_map: bool,
    apply: bool,
) -> Value {
    let src_map = match src.entries() {
        Some(entries) => entries,
        None => return dst,
    };
    let dst_was_null = dst.is_null();
    let mut dst_map = match dst {
        Value::Map(entries) | Value::Object(entries) => entries,
        Value::Null => BTreeMap::new(),
        other => return other,
    };

    for (key, v) in src_map {
        let dst_val = match dst_map.remove(key) {
            Some(existing) => existing,
            // Plan shapes maps however it wants; apply drops old entries.
            None if is_map => continue,
            None => Value::Null,
        };
        let ty = elem_type(key).cloned().unwrap_or(ValueType::Dynamic);
        dst_map.insert(key.clone(), normalize_null_values(dst_val, v, &ty, apply));
    }

    if dst_map.is_empty() {
        if dst_was_null && src.is_wholly_known() && apply {
            return src.clone();
        }
        return match (dst_was_null, is_map) {
            (true, _) => Value::Null,
            (false, true) => Value::Map(dst_map),
            (false, false) => Value::Object(dst_map),
        };
    }

    if is_map {
        // Optional+computed maps come back from flatmap with unknown
        // entries for values that were known all along.
        for (k, src_val) in src_map {
            if src_val.is_null() || src_val.is_unknown() {
                continue;
            }
            if let Some(dst_val) = dst_map.get_mut(k) {
                if dst_val.is_unknown() {
                    *dst_val = src_val.clone();
                }
            }
        }
        return Value::Map(dst_map);
    }
    Value::Object(dst_map)
}

fn normalize_list(dst: Value, src: &Value, elem: &ValueType, apply: bool) -> Value {
    let src_items = match src.elements() {
        Some(items) => items,
        None => return dst,
    };
    if dst.is_null() {
        // An empty list was lost on the way through flatmap.
        if src.is_wholly_known() && src_items.is_empty() && !apply {
            return src.clone();
        }
        // So were lists made only of unknowns.
        if !apply && src_items.iter().all(Value::is_unknown) {
            return src.clone();
        }
        return dst;
    }

    match dst {
        Value::List(items) if items.len() == src_items.len() && !items.is_empty() => Value::List(
            items
                .into_iter()
                .zip(src_items)
                .map(|(d, s)| normalize_null_values(d, s, elem, apply))
                .collect(),
        ),
        other => other,
    }
}

/// Replace the `timeouts` block of `to` with the one from `from`.
///
/// Flatmap cannot tell a missing single block from an empty one, so the
/// block is always taken from the request.
pub fn copy_timeout_values(to: Value, from: &Value) -> Value {
    let mut attrs = match to {
        Value::Object(attrs) => attrs,
        other => return other,
    };
    if let Some(timeouts) = attrs.get_mut(TIMEOUTS_CONFIG_KEY) {
        *timeouts = Value::Null;
    }
    let timeouts = match from.get_attr(TIMEOUTS_CONFIG_KEY) {
        Some(t) if !t.is_null() && t.is_wholly_known() => t.clone(),
        _ => return Value::Object(attrs),
    };
    attrs.insert(TIMEOUTS_CONFIG_KEY.to_string(), timeouts);
    Value::Object(attrs)
}

fn map_blocks(value: Value, nesting: NestingMode, f: &dyn Fn(Value) -> Value) -> Value {
    match (nesting, value) {
        (NestingMode::Single | NestingMode::Group, v) => f(v),
        (_, Value::List(items)) => Value::List(items.into_iter().map(f).collect()),
        (_, Value::Set(items)) => Value::Set(items.into_iter().map(f).collect()),
        (_, Value::Map(entries)) => Value::Map(entries.into_iter().map(|(k, v)| (k, f(v))).collect()),
        (_, Value::Object(entries)) => Value::Object(entries.into_iter().map(|(k, v)| (k, f(v))).collect()),
        (_, v) => v,
    }
}

/// Mark every null computed attribute of `val` unknown.
///
/// A null object stays null unless one of its top-level attributes is
/// computed.
pub fn set_unknowns(val: Value, block: &Block) -> Value {
    if val.is_unknown() {
        return val;
    }
    let mut attrs = match val {
        Value::Null => {
            if !block.attributes.values().any(|a| a.computed) {
                return Value::Null;
            }
            let mut attrs = BTreeMap::new();
            for (name, attr) in &block.attributes {
                let v = if attr.computed { Value::Unknown } else { Value::Null };
                attrs.insert(name.clone(), v);
            }
            return Value::Object(attrs);
        },
        Value::Object(attrs) => attrs,
        other => return other,
    };

    for (name, attr) in &block.attributes {
        let v = attrs.entry(name.clone()).or_default();
        if attr.computed && v.is_null() {
            *v = Value::Unknown;
        }
    }
    for (name, nested) in &block.block_types {
        let v = attrs.remove(name).unwrap_or_default();
        if v.is_null() || v.is_unknown() {
            attrs.insert(name.clone(), v);
            continue;
        }
        let updated = map_blocks(v, nested.nesting, &|b| set_unknowns(b, &nested.block));
        attrs.insert(name.clone(), updated);
    }
    Value::Object(attrs)
}

/// Null out every write-only attribute of `val`.
pub fn set_write_only_nulls(val: Value, block: &Block) -> Value {
    let mut attrs = match val {
        Value::Object(attrs) => attrs,
        other => return other,
    };
    for (name, attr) in &block.attributes {
        if !attr.write_only {
            continue;
        }
        if let Some(v) = attrs.get_mut(name) {
            if !v.is_null() {
                debug!(attribute = %name, "dropping write-only value");
                *v = Value::Null;
            }
        }
    }
    for (name, nested) in &block.block_types {
        let v = match attrs.remove(name) {
            Some(v) => v,
            None => continue,
        };
        if v.is_null() || v.is_unknown() {
            attrs.insert(name.clone(), v);
            continue;
        }
        let updated = map_blocks(v, nested.nesting, &|b| set_write_only_nulls(b, &nested.block));
        attrs.insert(name.clone(), updated);
    }
    Value::Object(attrs)
}

/// Report null elements of lists and sets within a configuration.
///
/// Set elements have no address, so their diagnostics point at the set.
pub fn validate_config_nulls(val: &Value, path: &AttributePath) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    match val {
        Value::List(items) | Value::Set(items) => {
            let is_list = matches!(val, Value::List(_));
            for (i, item) in items.iter().enumerate() {
                let item_path = if is_list { path.index(i) } else { path.clone() };
                if item.is_null() {
                    diags.push(
                        Diagnostic::error("Null value found in list")
                            .with_detail("Null values are not allowed for this attribute value.")
                            .with_attribute(item_path),
                    );
                    continue;
                }
                diags.extend(validate_config_nulls(item, &item_path));
            }
        },
        Value::Map(entries) => {
            for (k, v) in entries {
                diags.extend(validate_config_nulls(v, &path.key(k.clone())));
            }
        },
        Value::Object(entries) => {
            for (k, v) in entries {
                diags.extend(validate_config_nulls(v, &path.attr(k.clone())));
            }
        },
        _ => {},
    }
    diags
}

fn has_dynamic(ty: &ValueType) -> bool {
    match ty {
        ValueType::Dynamic => true,
        ValueType::List(e) | ValueType::Set(e) | ValueType::Map(e) => has_dynamic(e),
        ValueType::Object(attrs) => attrs.values().any(has_dynamic),
        _ => false,
    }
}

fn empty_block_value(block: &Block) -> Value {
    let mut attrs: BTreeMap<String, Value> = block
        .attributes
        .keys()
        .map(|name| (name.clone(), Value::Null))
        .collect();
    for (name, nested) in &block.block_types {
        let v = match nested.nesting {
            NestingMode::Single => Value::Null,
            NestingMode::Group => empty_block_value(&nested.block),
            NestingMode::List => Value::List(Vec::new()),
            NestingMode::Set => Value::Set(Vec::new()),
            NestingMode::Map => Value::Map(BTreeMap::new()),
        };
        attrs.insert(name.clone(), v);
    }
    Value::Object(attrs)
}

/// A known block whose leaf attributes are all unknown.
pub fn unknown_block_stub(block: &Block) -> Value {
    let mut attrs: BTreeMap<String, Value> = block
        .attributes
        .keys()
        .map(|name| (name.clone(), Value::Unknown))
        .collect();
    for (name, nested) in &block.block_types {
        let v = match nested.nesting {
            NestingMode::Single | NestingMode::Group => unknown_block_stub(&nested.block),
            NestingMode::List => Value::List(vec![unknown_block_stub(&nested.block)]),
            NestingMode::Set => Value::Set(vec![unknown_block_stub(&nested.block)]),
            // Keys of an unknown map cannot be known.
            NestingMode::Map => Value::Map(BTreeMap::new()),
        };
        attrs.insert(name.clone(), v);
    }
    Value::Object(attrs)
}

/// Shape a value produced by the flatmap layer the way the protocol
/// expects: empty list and set blocks instead of null, and unknown blocks
/// as stubs with unknown leaves.
pub fn normalize_object_from_legacy_sdk(val: Value, block: &Block) -> Value {
    let mut attrs = match val {
        Value::Object(attrs) | Value::Map(attrs) => attrs,
        _ => return Value::Null,
    };
    let mut out = BTreeMap::new();
    for name in block.attributes.keys() {
        out.insert(name.clone(), attrs.remove(name).unwrap_or_default());
    }
    for (name, nested) in &block.block_types {
        let lv = attrs.remove(name).unwrap_or_default();
        if has_dynamic(&nested.block.implied_type()) {
            out.insert(name.clone(), lv);
            continue;
        }
        let v = match nested.nesting {
            NestingMode::Single | NestingMode::Group => match lv {
                Value::Unknown => unknown_block_stub(&nested.block),
                Value::Null if nested.nesting == NestingMode::Group => empty_block_value(&nested.block),
                Value::Null => Value::Null,
                lv => normalize_object_from_legacy_sdk(lv, &nested.block),
            },
            NestingMode::List => match lv {
                Value::Unknown => Value::List(vec![unknown_block_stub(&nested.block)]),
                Value::List(items) | Value::Set(items) => Value::List(
                    items
                        .into_iter()
                        .map(|item| normalize_object_from_legacy_sdk(item, &nested.block))
                        .collect(),
                ),
                _ => Value::List(Vec::new()),
            },
            NestingMode::Set => match lv {
                Value::Unknown => Value::Set(vec![unknown_block_stub(&nested.block)]),
                Value::List(items) | Value::Set(items) => Value::Set(
                    items
                        .into_iter()
                        .map(|item| normalize_object_from_legacy_sdk(item, &nested.block))
                        .collect(),
                ),
                _ => Value::Set(Vec::new()),
            },
            NestingMode::Map => lv,
        };
        out.insert(name.clone(), v);
    }
    Value::Object(out)
}

/// Resolve `ConflictsWith` groups in a configuration value.
///
/// Every attribute that declares conflicts forms a group with its targets.
/// When more than one member of a group is set, every member except the
/// lexicographically smallest key is nulled, whichever side declared the
/// conflict.
pub fn process_conflicts_with(value: Value, schema: &SchemaMap) -> Value {
    let mut marked = BTreeSet::new();
    collect_conflicts(&value, &value, schema, "", &mut marked);
    let paths: Vec<AttributePath> = marked.iter().filter_map(|k| key_path(&value, k)).collect();
    let mut value = value;
    for path in paths {
        debug!(path = %path, "nulling conflicting attribute");
        value.set_path(&path, Value::Null);
    }
    value
}

/// Structured path of a dotted configuration key, resolved against `root`.
fn key_path(root: &Value, key: &str) -> Option<AttributePath> {
    let parts: Vec<&str> = key.split('.').collect();
    let mut path = AttributePath::new();
    let mut current = root;
    let mut i = 0;
    while i < parts.len() {
        current = match current {
            Value::Object(entries) => {
                path = path.attr(parts[i]);
                entries.get(parts[i])?
            },
            Value::Map(entries) => {
                let rest = parts[i..].join(".");
                entries.get(&rest)?;
                return Some(path.key(rest));
            },
            Value::List(items) | Value::Set(items) => {
                let index = parts[i].parse::<usize>().ok()?;
                path = path.index(index);
                items.get(index)?
            },
            _ => return None,
        };
        i += 1;
    }
    Some(path)
}

fn collect_conflicts(
    root: &Value,
    object: &Value,
    schema: &SchemaMap,
    prefix: &str,
    marked: &mut BTreeSet<String>,
) {
    let entries = match object.entries() {
        Some(entries) => entries,
        None => return,
    };
    for (name, s) in schema {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        let v = match entries.get(name) {
            Some(v) if !v.is_null() => v,
            _ => continue,
        };

        if !s.conflicts_with.is_empty() {
            let mut group: Vec<&str> = s
                .conflicts_with
                .iter()
                .map(String::as_str)
                .filter(|k| lookup_key(root, k).is_some())
                .collect();
            group.push(&key);
            group.sort_unstable();
            group.dedup();
            if group.len() > 1 {
                marked.extend(group[1..].iter().map(|k| k.to_string()));
            }
        }

        if let Some(Elem::Block(resource)) = &s.elem {
            if let Some(items) = v.elements() {
                for (i, item) in items.iter().enumerate() {
                    collect_conflicts(
                        root,
                        item,
                        &resource.schema,
                        &format!("{}.{}", key, i),
                        marked,
                    );
                }
            }
        }
    }
}

fn number_equivalent(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => return x == y,
        (Some(_), None) | (None, Some(_)) if a.is_f64() != b.is_f64() => {
            // An integral float still matches an integer.
            let (af, bf) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            return af.fract() == 0.0 && bf.fract() == 0.0 && af == bf;
        },
        _ => {},
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x as f32) == (y as f32),
        _ => false,
    }
}

fn null_or_zero(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Unknown => false,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::List(items) | Value::Set(items) => items.is_empty(),
        Value::Map(entries) => entries.is_empty(),
        Value::Object(entries) => entries.values().all(null_or_zero),
    }
}

/// Whether two values are equal as far as the flatmap layer can tell.
///
/// Null equals the zero value of its type, numbers are compared after
/// rounding to single precision, and sets ignore element order. Unknown
/// values are never equivalent to anything else.
pub fn values_sdk_equivalent(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if !a.is_wholly_known() || !b.is_wholly_known() {
        return false;
    }
    if a.is_null() || b.is_null() {
        return null_or_zero(a) && null_or_zero(b);
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => number_equivalent(x, y),
        (Value::Map(x), Value::Map(y)) | (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, av)| y.get(k).map(|bv| values_sdk_equivalent(av, bv)).unwrap_or(false))
        },
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(av, bv)| values_sdk_equivalent(av, bv))
        },
        (Value::Set(x), Value::Set(y)) => {
            if x.len() != y.len() {
                return false;
            }
            let mut matched = vec![false; y.len()];
            x.iter().all(|av| {
                match y
                    .iter()
                    .enumerate()
                    .find(|(i, bv)| !matched[*i] && values_sdk_equivalent(av, bv))
                {
                    Some((i, _)) => {
                        matched[i] = true;
                        true
                    },
                    None => false,
                }
            })
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configschema::{Attribute, NestedBlock};
    use crate::helper::schema::Schema;
    use crate::helper::Resource;

    fn obj(attrs: Vec<(&str, Value)>) -> Value {
        Value::object(attrs)
    }

    #[test]
    fn test_plan_keeps_proposed_unknowns() {
        let ty = ValueType::object([("a", ValueType::String), ("b", ValueType::String)]);
        let dst = obj(vec![("a", Value::Null), ("b", Value::string("x"))]);
        let src = obj(vec![("a", Value::Unknown), ("b", Value::string("y"))]);
        let out = normalize_null_values(dst.clone(), &src, &ty, false);
        assert_eq!(out, obj(vec![("a", Value::Unknown), ("b", Value::string("x"))]));

        // Apply never materializes unknowns.
        let out = normalize_null_values(dst, &src, &ty, true);
        assert_eq!(out.get_attr("a"), Some(&Value::Null));
    }

    #[test]
    fn test_empty_list_restored_during_plan() {
        let ty = ValueType::object([("l", ValueType::list(ValueType::String))]);
        let dst = obj(vec![("l", Value::Null)]);
        let src = obj(vec![("l", Value::List(Vec::new()))]);
        let out = normalize_null_values(dst, &src, &ty, false);
        assert_eq!(out.get_attr("l"), Some(&Value::List(Vec::new())));
    }

    #[test]
    fn test_apply_copies_known_primitives_and_sets() {
        let ty = ValueType::object([
            ("s", ValueType::String),
            ("set", ValueType::set(ValueType::Number)),
        ]);
        let dst = obj(vec![("s", Value::Null), ("set", Value::Set(vec![Value::int(2)]))]);
        let src = obj(vec![
            ("s", Value::string("v")),
            ("set", Value::Set(vec![Value::int(1), Value::int(2)])),
        ]);
        let out = normalize_null_values(dst, &src, &ty, true);
        assert_eq!(out.get_attr("s"), Some(&Value::string("v")));
        assert_eq!(out.get_attr("set"), Some(&Value::Set(vec![Value::int(1), Value::int(2)])));
    }

    #[test]
    fn test_apply_map_drops_missing_entries_and_fixes_unknowns() {
        let ty = ValueType::map(ValueType::String);
        let dst = Value::Map(BTreeMap::from([
            ("a".to_string(), Value::Unknown),
            ("c".to_string(), Value::string("3")),
        ]));
        let src = Value::Map(BTreeMap::from([
            ("a".to_string(), Value::string("1")),
            ("b".to_string(), Value::string("2")),
        ]));
        let out = normalize_null_values(dst, &src, &ty, true);
        assert_eq!(
            out,
            Value::Map(BTreeMap::from([
                ("a".to_string(), Value::string("1")),
                ("c".to_string(), Value::string("3")),
            ]))
        );
    }

    #[test]
    fn test_copy_timeout_values() {
        let to = obj(vec![
            ("id", Value::string("x")),
            ("timeouts", obj(vec![("create", Value::Null)])),
        ]);
        let from = obj(vec![("timeouts", obj(vec![("create", Value::string("5m"))]))]);
        let out = copy_timeout_values(to.clone(), &from);
        assert_eq!(out.get_attr("timeouts"), from.get_attr("timeouts"));
        let out = copy_timeout_values(to, &obj(vec![("timeouts", Value::Null)]));
        assert_eq!(out.get_attr("timeouts"), Some(&Value::Null));
    }

    fn sample_block() -> Block {
        Block::new()
            .with_attribute("id", Attribute::optional_computed_string())
            .with_attribute(
                "password",
                Attribute {
                    optional: true,
                    write_only: true,
                    ..Attribute::new(ValueType::String)
                },
            )
            .with_block(
                "rule",
                NestedBlock::new(
                    Block::new()
                        .with_attribute(
                            "port",
                            Attribute {
                                optional: true,
                                ..Attribute::new(ValueType::Number)
                            },
                        )
                        .with_attribute(
                            "arn",
                            Attribute {
                                computed: true,
                                ..Attribute::new(ValueType::String)
                            },
                        ),
                    NestingMode::List,
                ),
            )
    }

    #[test]
    fn test_set_unknowns() {
        let val = obj(vec![
            ("id", Value::Null),
            ("password", Value::Null),
            ("rule", Value::List(vec![obj(vec![("port", Value::int(22)), ("arn", Value::Null)])])),
        ]);
        let out = set_unknowns(val, &sample_block());
        assert_eq!(out.get_attr("id"), Some(&Value::Unknown));
        assert_eq!(out.get_attr("password"), Some(&Value::Null));
        let rule = &out.get_attr("rule").and_then(Value::elements).unwrap()[0];
        assert_eq!(rule.get_attr("arn"), Some(&Value::Unknown));
        assert_eq!(rule.get_attr("port"), Some(&Value::int(22)));
    }

    #[test]
    fn test_set_write_only_nulls() {
        let val = obj(vec![("id", Value::string("x")), ("password", Value::string("hunter2"))]);
        let out = set_write_only_nulls(val, &sample_block());
        assert_eq!(out.get_attr("password"), Some(&Value::Null));
        assert_eq!(out.get_attr("id"), Some(&Value::string("x")));
    }

    #[test]
    fn test_validate_config_nulls() {
        let val = obj(vec![
            ("l", Value::List(vec![Value::string("a"), Value::Null])),
            ("s", Value::Set(vec![Value::Null])),
        ]);
        let diags = validate_config_nulls(&val, &AttributePath::new());
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].summary, "Null value found in list");
        assert_eq!(diags[0].attribute, Some(AttributePath::root("l").index(1)));
        assert_eq!(diags[1].attribute, Some(AttributePath::root("s")));
    }

    #[test]
    fn test_normalize_object_from_legacy_sdk() {
        let val = obj(vec![("id", Value::string("x")), ("rule", Value::Null)]);
        let out = normalize_object_from_legacy_sdk(val, &sample_block());
        assert_eq!(out.get_attr("rule"), Some(&Value::List(Vec::new())));
        assert_eq!(out.get_attr("password"), Some(&Value::Null));

        let val = obj(vec![("id", Value::string("x")), ("rule", Value::Unknown)]);
        let out = normalize_object_from_legacy_sdk(val, &sample_block());
        let stub = obj(vec![("arn", Value::Unknown), ("port", Value::Unknown)]);
        assert_eq!(out.get_attr("rule"), Some(&Value::List(vec![stub])));
    }

    #[test]
    fn test_process_conflicts_with_keeps_smallest() {
        let schema = SchemaMap::from([
            ("attr_a".to_string(), Schema::string().optional().with_conflicts_with(&["attr_b"])),
            ("attr_b".to_string(), Schema::string().optional().with_conflicts_with(&["attr_a"])),
            ("other".to_string(), Schema::string().optional()),
        ]);
        let val = obj(vec![
            ("attr_a", Value::string("a")),
            ("attr_b", Value::string("b")),
            ("other", Value::string("o")),
        ]);
        let out = process_conflicts_with(val, &schema);
        assert_eq!(out.get_attr("attr_a"), Some(&Value::string("a")));
        assert_eq!(out.get_attr("attr_b"), Some(&Value::Null));
        assert_eq!(out.get_attr("other"), Some(&Value::string("o")));
    }

    #[test]
    fn test_process_conflicts_with_one_sided() {
        let schema = SchemaMap::from([
            ("attr_a".to_string(), Schema::string().optional().with_conflicts_with(&["attr_b"])),
            ("attr_b".to_string(), Schema::string().optional()),
        ]);
        let val = obj(vec![("attr_a", Value::string("a")), ("attr_b", Value::string("b"))]);
        let out = process_conflicts_with(val, &schema);
        assert_eq!(out.get_attr("attr_a"), Some(&Value::string("a")));
        assert_eq!(out.get_attr("attr_b"), Some(&Value::Null));

        // Declared on the larger side only.
        let schema = SchemaMap::from([
            ("attr_a".to_string(), Schema::string().optional()),
            ("attr_b".to_string(), Schema::string().optional().with_conflicts_with(&["attr_a"])),
        ]);
        let val = obj(vec![("attr_a", Value::string("a")), ("attr_b", Value::string("b"))]);
        let out = process_conflicts_with(val, &schema);
        assert_eq!(out.get_attr("attr_a"), Some(&Value::string("a")));
        assert_eq!(out.get_attr("attr_b"), Some(&Value::Null));
    }

    #[test]
    fn test_process_conflicts_with_single_member_set() {
        let schema = SchemaMap::from([
            ("attr_a".to_string(), Schema::string().optional().with_conflicts_with(&["attr_b"])),
            ("attr_b".to_string(), Schema::string().optional()),
        ]);
        let val = obj(vec![("attr_a", Value::Null), ("attr_b", Value::string("b"))]);
        let out = process_conflicts_with(val, &schema);
        assert_eq!(out.get_attr("attr_b"), Some(&Value::string("b")));
    }

    #[test]
    fn test_process_conflicts_with_nested() {
        let rule = Resource::new().with_schema(SchemaMap::from([
            ("x".to_string(), Schema::string().optional().with_conflicts_with(&["rule.0.y"])),
            ("y".to_string(), Schema::string().optional().with_conflicts_with(&["rule.0.x"])),
        ]));
        let schema = SchemaMap::from([("rule".to_string(), Schema::list(rule).optional())]);
        let val = obj(vec![(
            "rule",
            Value::List(vec![obj(vec![("x", Value::string("1")), ("y", Value::string("2"))])]),
        )]);
        let out = process_conflicts_with(val, &schema);
        let rule = &out.get_attr("rule").and_then(Value::elements).unwrap()[0];
        assert_eq!(rule.get_attr("x"), Some(&Value::string("1")));
        assert_eq!(rule.get_attr("y"), Some(&Value::Null));
    }

    #[test]
    fn test_values_sdk_equivalent() {
        assert!(values_sdk_equivalent(&Value::Null, &Value::string("")));
        assert!(values_sdk_equivalent(&Value::Null, &Value::List(Vec::new())));
        assert!(values_sdk_equivalent(&Value::float(1.0), &Value::int(1)));
        assert!(values_sdk_equivalent(
            &Value::Set(vec![Value::int(1), Value::int(2)]),
            &Value::Set(vec![Value::int(2), Value::int(1)])
        ));
        assert!(!values_sdk_equivalent(&Value::Unknown, &Value::Null));
        assert!(!values_sdk_equivalent(&Value::string("a"), &Value::string("b")));
        assert!(values_sdk_equivalent(
            &obj(vec![("a", Value::Null), ("b", Value::Bool(false))]),
            &obj(vec![("a", Value::string("")), ("b", Value::Null)])
        ));
    }
}
