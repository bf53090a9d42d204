//! Computing an [`InstanceDiff`] from a prior state and a configuration.
//!
//! Each attribute is compared by kind: primitives by their flatmap string,
//! lists by count and position, maps by key and sets by element hash code.
//! Collections recurse into their elements, so the resulting diff is keyed
//! by flatmap paths such as `rule.0.port` or `ids.1234`.

use crate::error::{ProviderError, SchemaError};
use crate::helper::resource::{CustomizeDiffFunc, Meta};
use crate::helper::resource_data::ResourceData;
use crate::helper::resource_diff::ResourceDiff;
use crate::helper::schema::{Elem, Schema, SchemaMap, ValueKind};
use crate::helper::set::Set;
use crate::instance::{InstanceDiff, InstanceState, ResourceAttrDiff, ResourceConfig};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Old and new values of one key as seen by the diff engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Change {
    pub old: Option<Json>,
    pub new: Option<Json>,
    /// The new value is only known after apply.
    pub computed: bool,
    /// The new value was set by a CustomizeDiff callback.
    pub customized: bool,
}

/// The source of values the diff engine compares.
pub(crate) trait Differ {
    fn diff_change(&self, key: &str) -> Result<Change, SchemaError>;
    fn get_ok(&self, key: &str) -> Option<Json>;
    fn id(&self) -> String;

    /// Diff suppression only runs against plain resource data.
    fn as_resource_data(&self) -> Option<&ResourceData> {
        None
    }
}

/// Diff `config` against `state` for every attribute of `schema`.
///
/// Returns `None` when nothing changes. A tainted prior state yields a
/// replacement diff computed as if the instance did not exist, without
/// running `customize`. With `handle_requires_new`, a diff that forces
/// replacement is recomputed against an empty state so it describes the
/// whole new instance, keeping the requires-new markers of the first pass.
pub fn schema_map_diff(
    schema: &Arc<SchemaMap>,
    state: Option<&InstanceState>,
    config: &ResourceConfig,
    customize: Option<&CustomizeDiffFunc>,
    meta: &Meta,
    handle_requires_new: bool,
) -> Result<Option<InstanceDiff>, ProviderError> {
    if let Some(tainted) = state.filter(|s| s.tainted) {
        debug!(id = %tainted.id, "prior state is tainted, planning replacement");
        let mut result = diff_all(schema, None, config)?;
        result.destroy_tainted = true;
        for (k, attr) in result.attributes.iter_mut() {
            attr.old = tainted.attributes.get(k).cloned().unwrap_or_default();
        }
        return Ok(Some(result));
    }

    let mut result = diff_all(schema, state, config)?;
    if let Some(customize) = customize {
        result = run_customize(schema, state, config, result, customize, meta)?;
    }

    if handle_requires_new && result.requires_new() {
        let mut fresh = diff_all(schema, None, config)?;
        fresh.destroy_tainted = result.destroy_tainted;
        if let Some(customize) = customize {
            fresh = run_customize(schema, None, config, fresh, customize, meta)?;
        }
        for (k, attr) in fresh.attributes.iter_mut() {
            attr.requires_new = false;
            if let Some(state) = state {
                attr.old = state.attributes.get(k).cloned().unwrap_or_default();
            }
        }
        for (k, attr) in &result.attributes {
            let entry = fresh
                .attributes
                .entry(k.clone())
                .or_insert_with(|| attr.clone());
            if attr.requires_new {
                entry.requires_new = true;
            }
        }
        result = fresh;
    }

    if result.is_empty() {
        trace!("diff is empty");
        return Ok(None);
    }
    Ok(Some(result))
}

fn diff_all(
    schema: &Arc<SchemaMap>,
    state: Option<&InstanceState>,
    config: &ResourceConfig,
) -> Result<InstanceDiff, ProviderError> {
    let d = ResourceData::new(schema.clone(), state.cloned(), Some(config.clone()), None);
    let mut result = InstanceDiff::new();
    for (k, s) in schema.iter() {
        diff_attribute(k, s, &mut result, &d, false)?;
    }
    Ok(result)
}

fn run_customize(
    schema: &Arc<SchemaMap>,
    state: Option<&InstanceState>,
    config: &ResourceConfig,
    result: InstanceDiff,
    customize: &CustomizeDiffFunc,
    meta: &Meta,
) -> Result<InstanceDiff, ProviderError> {
    let mut rd = ResourceDiff::new(schema.clone(), Some(config.clone()), state.cloned(), result);
    customize(&mut rd, meta)?;

    let mut rediff = InstanceDiff::new();
    for k in rd.updated_keys() {
        let Some(s) = rd.schema().get(&k).cloned() else {
            continue;
        };
        debug!(key = %k, "re-diffing key after CustomizeDiff");
        diff_attribute(&k, &s, &mut rediff, &rd, false)?;
    }
    let mut result = rd.into_diff();
    result.attributes.extend(rediff.attributes);
    Ok(result)
}

/// Diff one attribute into `diff`, applying its suppression function.
pub(crate) fn diff_attribute(
    key: &str,
    schema: &Schema,
    diff: &mut InstanceDiff,
    d: &dyn Differ,
    all: bool,
) -> Result<(), ProviderError> {
    let mut unsuppressed = InstanceDiff::new();
    match schema.kind {
        ValueKind::Bool | ValueKind::Int | ValueKind::Float | ValueKind::String => {
            diff_string(key, schema, &mut unsuppressed, d, all)?
        },
        ValueKind::List => diff_list(key, schema, &mut unsuppressed, d, all)?,
        ValueKind::Map => diff_map(key, schema, &mut unsuppressed, d, all)?,
        ValueKind::Set => diff_set(key, schema, &mut unsuppressed, d, all)?,
    }

    for (k, attr) in unsuppressed.attributes {
        if let (Some(suppress), Some(rd)) = (&schema.diff_suppress_func, d.as_resource_data()) {
            if suppress(&k, &attr.old, &attr.new, rd) {
                // Set elements still need an entry to stay members of the set.
                if !all {
                    continue;
                }
                let noop = ResourceAttrDiff {
                    new: attr.old.clone(),
                    old: attr.old,
                    ..ResourceAttrDiff::default()
                };
                diff.attributes.insert(k, noop);
                continue;
            }
        }
        diff.attributes.insert(k, attr);
    }
    Ok(())
}

/// Render a primitive the way it is stored in a flatmap.
pub(crate) fn render(value: Option<&Json>) -> String {
    match value {
        None | Some(Json::Null) => String::new(),
        Some(Json::String(s)) => s.clone(),
        Some(Json::Bool(b)) => b.to_string(),
        Some(Json::Number(n)) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (None, Some(u), _) => u.to_string(),
            (None, None, Some(f)) => f.to_string(),
            _ => n.to_string(),
        },
        Some(other) => other.to_string(),
    }
}

fn normalize_bool(raw: &str) -> String {
    match raw {
        "1" => "true".to_string(),
        "0" => "false".to_string(),
        other => other.to_string(),
    }
}

/// Apply the attribute's flags to a raw change. `None` drops the change.
pub(crate) fn finalize_diff(
    schema: &Schema,
    mut d: ResourceAttrDiff,
    customized: bool,
) -> Option<ResourceAttrDiff> {
    if schema.kind == ValueKind::Bool {
        d.old = normalize_bool(&d.old);
        d.new = normalize_bool(&d.new);
    }
    if schema.computed && !d.new_removed && d.new.is_empty() {
        d.new_computed = true;
    }
    if schema.force_new {
        d.requires_new = d.old != d.new || d.new_computed;
    }
    if d.new_removed {
        return Some(d);
    }
    if schema.computed {
        // A computed attribute that configuration leaves unset keeps its
        // prior value.
        if !customized && !d.old.is_empty() && d.new.is_empty() {
            return None;
        }
    }
    if schema.sensitive {
        d.sensitive = true;
    }
    Some(d)
}

fn diff_string(
    key: &str,
    schema: &Schema,
    diff: &mut InstanceDiff,
    d: &dyn Differ,
    all: bool,
) -> Result<(), ProviderError> {
    let change = d.diff_change(key)?;
    let old = change.old;
    let mut new = change.new;
    let mut original = None;
    if let (Some(state_func), Some(value)) = (&schema.state_func, &new) {
        original = Some(value.clone());
        new = Some(Json::String(state_func(value)));
    }

    let os = render(old.as_ref());
    let ns = match (&new, &old) {
        (None, Some(_)) => render(Some(&schema.zero_value())),
        _ => render(new.as_ref()),
    };
    if os == ns && !all && !change.computed {
        // Unchanged. An empty value only matters for a computed attribute
        // of an instance that does not exist yet.
        if !os.is_empty() || !d.id().is_empty() || !schema.computed {
            return Ok(());
        }
    }

    let removed = old.is_some() && new.is_none() && !change.computed;
    if removed && schema.computed {
        return Ok(());
    }
    let raw = ResourceAttrDiff {
        old: os,
        new: ns,
        new_extra: original,
        new_removed: removed,
        new_computed: change.computed,
        ..ResourceAttrDiff::default()
    };
    if let Some(attr) = finalize_diff(schema, raw, change.customized) {
        diff.attributes.insert(key.to_string(), attr);
    }
    Ok(())
}

fn count_schema(schema: &Schema) -> Schema {
    let mut count = Schema::int();
    count.computed = schema.computed;
    count.force_new = schema.force_new;
    count
}

/// The schema each element of a primitive collection is diffed with.
fn element_schema(schema: &Schema) -> Schema {
    let mut elem = schema
        .elem_schema()
        .map(|s| s.into_owned())
        .unwrap_or_else(Schema::string);
    elem.force_new = schema.force_new;
    elem
}

fn items(value: &Option<Json>) -> Vec<Json> {
    match value {
        Some(Json::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn diff_list(
    key: &str,
    schema: &Schema,
    diff: &mut InstanceDiff,
    d: &dyn Differ,
    all: bool,
) -> Result<(), ProviderError> {
    let change = d.diff_change(key)?;
    let computed_list = change.computed;
    let old = change.old;
    let new = if computed_list { None } else { change.new };
    let new_set = new.is_some();

    if old.is_some() && new.is_none() && !computed_list && schema.computed {
        return Ok(());
    }
    let os = items(&old);
    let vs = items(&new);
    if !all && new_set && os == vs {
        return Ok(());
    }

    let old_len = os.len();
    let new_len = vs.len();
    if computed_list {
        diff.attributes.insert(
            format!("{}.#", key),
            ResourceAttrDiff {
                old: old_len.to_string(),
                new_computed: true,
                requires_new: schema.force_new,
                ..ResourceAttrDiff::default()
            },
        );
        return Ok(());
    }

    let changed = old_len != new_len;
    let computed = old_len == 0 && new_len == 0 && schema.computed;
    if changed || computed || all {
        let (old_str, new_str) = if computed {
            (String::new(), String::new())
        } else {
            (old_len.to_string(), new_len.to_string())
        };
        let raw = ResourceAttrDiff {
            old: old_str,
            new: new_str,
            ..ResourceAttrDiff::default()
        };
        if let Some(attr) = finalize_diff(&count_schema(schema), raw, change.customized) {
            diff.attributes.insert(format!("{}.#", key), attr);
        }
    }

    let max_len = old_len.max(new_len);
    match &schema.elem {
        Some(Elem::Block(resource)) => {
            for i in 0..max_len {
                for (k2, s2) in resource.schema.iter() {
                    diff_attribute(&format!("{}.{}.{}", key, i, k2), s2, diff, d, all)?;
                }
            }
        },
        _ => {
            let elem = element_schema(schema);
            for i in 0..max_len {
                diff_attribute(&format!("{}.{}", key, i), &elem, diff, d, all)?;
            }
        },
    }
    Ok(())
}

fn string_entries(value: &Option<Json>) -> BTreeMap<String, String> {
    match value {
        Some(Json::Object(entries)) => entries
            .iter()
            .filter(|(k, _)| k.as_str() != "%")
            .map(|(k, v)| (k.clone(), render(Some(v))))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn diff_map(
    key: &str,
    schema: &Schema,
    diff: &mut InstanceDiff,
    d: &dyn Differ,
    all: bool,
) -> Result<(), ProviderError> {
    let change = d.diff_change(key)?;
    let n_computed = change.computed;
    let mut state_map = string_entries(&change.old);
    let config_map = string_entries(&change.new);
    // An empty map in state has already been computed.
    let state_exists = change.old.is_some();

    let old_len = state_map.len();
    let new_len = config_map.len();
    let mut changed = old_len != new_len;
    if old_len != 0 && new_len == 0 && schema.computed {
        changed = false;
    }
    let computed = old_len == 0 && new_len == 0 && schema.computed && !state_exists;

    if changed || computed || n_computed {
        let mut count = count_schema(schema);
        count.computed = schema.computed || n_computed;
        let (old_str, new_str) = if computed || n_computed {
            (String::new(), String::new())
        } else {
            (old_len.to_string(), new_len.to_string())
        };
        let raw = ResourceAttrDiff {
            old: old_str,
            new: new_str,
            ..ResourceAttrDiff::default()
        };
        if let Some(attr) = finalize_diff(&count, raw, change.customized) {
            diff.attributes.insert(format!("{}.%", key), attr);
        }
    }

    if change.new.is_none() && schema.computed {
        return Ok(());
    }

    for (k, v) in config_map {
        let old = state_map.remove(&k);
        if old.as_deref() == Some(v.as_str()) && !all {
            continue;
        }
        let raw = ResourceAttrDiff {
            old: old.unwrap_or_default(),
            new: v,
            ..ResourceAttrDiff::default()
        };
        if let Some(attr) = finalize_diff(schema, raw, change.customized) {
            diff.attributes.insert(format!("{}.{}", key, k), attr);
        }
    }
    for (k, v) in state_map {
        let raw = ResourceAttrDiff {
            old: v,
            new_removed: true,
            ..ResourceAttrDiff::default()
        };
        if let Some(attr) = finalize_diff(schema, raw, change.customized) {
            diff.attributes.insert(format!("{}.{}", key, k), attr);
        }
    }
    Ok(())
}

fn to_set(schema: &Schema, value: &Option<Json>) -> Set {
    Set::from_items(schema.set_hash_func(), items(value))
}

fn diff_set(
    key: &str,
    schema: &Schema,
    diff: &mut InstanceDiff,
    d: &dyn Differ,
    all: bool,
) -> Result<(), ProviderError> {
    let change = d.diff_change(key)?;
    let computed_set = change.computed;
    let new = if computed_set { None } else { change.new };
    let new_set = new.is_some();

    if change.old.is_some() && new.is_none() && !computed_set && schema.computed {
        return Ok(());
    }
    let os = to_set(schema, &change.old);
    let ns = to_set(schema, &new);
    // Codes rather than values: elements with computed parts still
    // compare equal.
    if !all && new_set && os.codes() == ns.codes() {
        return Ok(());
    }

    let count = count_schema(schema);
    if computed_set || (schema.computed && !new_set) {
        let prior = d.get_ok(&format!("{}.#", key)).and_then(|v| v.as_u64());
        if prior == Some(0) && !new_set && !computed_set {
            return Ok(());
        }
        let raw = ResourceAttrDiff {
            old: prior.map(|n| n.to_string()).unwrap_or_default(),
            new_computed: true,
            ..ResourceAttrDiff::default()
        };
        if let Some(attr) = finalize_diff(&count, raw, change.customized) {
            diff.attributes.insert(format!("{}.#", key), attr);
        }
        return Ok(());
    }

    if os.len() != ns.len() || all {
        let raw = ResourceAttrDiff {
            old: os.len().to_string(),
            new: ns.len().to_string(),
            ..ResourceAttrDiff::default()
        };
        if let Some(attr) = finalize_diff(&count, raw, change.customized) {
            diff.attributes.insert(format!("{}.#", key), attr);
        }
    }

    // Removed elements and added ones. Elements in both sets are unchanged
    // by construction and readers merge them from the prior state.
    let mut codes = os.difference(&ns).codes();
    if all {
        codes.extend(ns.codes());
    } else {
        codes.extend(ns.difference(&os).codes());
    }
    for code in codes {
        match &schema.elem {
            Some(Elem::Block(resource)) => {
                for (k2, s2) in resource.schema.iter() {
                    diff_attribute(&format!("{}.{}.{}", key, code, k2), s2, diff, d, true)?;
                }
            },
            _ => {
                let elem = element_schema(schema);
                diff_attribute(&format!("{}.{}", key, code), &elem, diff, d, true)?;
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::resource::Resource;
    use crate::value::Value;
    use proptest::prelude::*;
    use serde_json::json;

    fn state(pairs: &[(&str, &str)]) -> InstanceState {
        let mut s = InstanceState::with_id("i-1");
        for (k, v) in pairs {
            s.attributes.insert(k.to_string(), v.to_string());
        }
        s
    }

    fn attr(old: &str, new: &str) -> ResourceAttrDiff {
        ResourceAttrDiff {
            old: old.to_string(),
            new: new.to_string(),
            ..ResourceAttrDiff::default()
        }
    }

    fn run(
        schema: SchemaMap,
        prior: Option<&InstanceState>,
        config: Value,
    ) -> Option<InstanceDiff> {
        schema_map_diff(
            &Arc::new(schema),
            prior,
            &ResourceConfig::new(config),
            None,
            &Meta::default(),
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_optional_computed_change() {
        let schema = SchemaMap::from([("foo".to_string(), Schema::string().optional().computed())]);
        let prior = state(&[("foo", "bar")]);
        let diff = run(schema, Some(&prior), Value::object([("foo", Value::string("baz"))])).unwrap();
        assert_eq!(diff.attributes.len(), 1);
        assert_eq!(diff.attribute("foo"), Some(&attr("bar", "baz")));
    }

    #[test]
    fn test_unset_computed_keeps_prior() {
        let schema = SchemaMap::from([("foo".to_string(), Schema::string().optional().computed())]);
        let prior = state(&[("foo", "bar")]);
        assert!(run(schema, Some(&prior), Value::object([("foo", Value::Null)])).is_none());
    }

    #[test]
    fn test_create_marks_computed() {
        let schema = SchemaMap::from([
            ("name".to_string(), Schema::string().required()),
            ("arn".to_string(), Schema::string().computed()),
            ("size".to_string(), Schema::int().optional().with_default(3)),
        ]);
        let diff = run(schema, None, Value::object([("name", Value::string("web"))])).unwrap();
        assert_eq!(diff.attribute("name"), Some(&attr("", "web")));
        assert_eq!(diff.attribute("size"), Some(&attr("", "3")));
        let arn = diff.attribute("arn").unwrap();
        assert!(arn.new_computed);
    }

    #[test]
    fn test_unknown_config_is_computed() {
        let schema = SchemaMap::from([("name".to_string(), Schema::string().optional().force_new())]);
        let prior = state(&[("name", "a")]);
        let diff = run(schema, Some(&prior), Value::object([("name", Value::Unknown)])).unwrap();
        let name = diff.attribute("name").unwrap();
        assert!(name.new_computed);
        assert!(name.requires_new);
    }

    #[test]
    fn test_force_new_and_state_func() {
        let schema = SchemaMap::from([(
            "body".to_string(),
            Schema::string()
                .optional()
                .force_new()
                .with_state_func(|v| format!("hash:{}", v.as_str().unwrap_or_default().len())),
        )]);
        let prior = state(&[("body", "hash:3")]);
        let diff = run(schema, Some(&prior), Value::object([("body", Value::string("abcd"))])).unwrap();
        let body = diff.attribute("body").unwrap();
        assert_eq!(body.old, "hash:3");
        assert_eq!(body.new, "hash:4");
        assert_eq!(body.new_extra, Some(json!("abcd")));
        assert!(body.requires_new);
        assert!(diff.requires_new());
    }

    #[test]
    fn test_finalize_computed_force_new_requires_new() {
        let schema = Schema::int().computed().force_new();
        let out = finalize_diff(&schema, attr("", ""), false).unwrap();
        assert!(out.new_computed);
        assert!(out.requires_new);

        let removed = ResourceAttrDiff {
            new_removed: true,
            ..attr("3", "")
        };
        let out = finalize_diff(&schema, removed, false).unwrap();
        assert!(!out.new_computed);
        assert!(out.requires_new);
    }

    #[test]
    fn test_list_changes() {
        let schema = SchemaMap::from([("ports".to_string(), Schema::list(ValueKind::Int).optional())]);
        let prior = state(&[("ports.#", "2"), ("ports.0", "80"), ("ports.1", "443")]);
        let diff = run(
            schema,
            Some(&prior),
            Value::object([("ports", Value::List(vec![Value::int(80)]))]),
        )
        .unwrap();
        assert_eq!(diff.attribute("ports.#"), Some(&attr("2", "1")));
        assert!(diff.attribute("ports.1").unwrap().new_removed);
        assert!(diff.attribute("ports.0").is_none());
    }

    #[test]
    fn test_map_changes() {
        let schema = SchemaMap::from([("tags".to_string(), Schema::map(ValueKind::String).optional())]);
        let prior = state(&[("tags.%", "2"), ("tags.a", "1"), ("tags.b", "2")]);
        let mut tags = BTreeMap::new();
        tags.insert("a".to_string(), Value::string("1"));
        tags.insert("c".to_string(), Value::string("3"));
        let diff = run(schema, Some(&prior), Value::object([("tags", Value::Map(tags))])).unwrap();
        assert!(diff.attribute("tags.%").is_none());
        assert_eq!(diff.attribute("tags.c"), Some(&attr("", "3")));
        assert!(diff.attribute("tags.b").unwrap().new_removed);
        assert!(diff.attribute("tags.a").is_none());
    }

    #[test]
    fn test_set_changes() {
        let schema = SchemaMap::from([(
            "ids".to_string(),
            Schema::set(ValueKind::Int)
                .optional()
                .with_set_func(|v| v.as_i64().unwrap_or_default()),
        )]);
        let prior = state(&[("ids.#", "2"), ("ids.10", "10"), ("ids.50", "50")]);
        let config = Value::object([(
            "ids",
            Value::Set(vec![Value::int(5), Value::int(2), Value::int(1), Value::int(10)]),
        )]);
        let diff = run(schema, Some(&prior), config).unwrap();
        assert_eq!(diff.attribute("ids.#"), Some(&attr("2", "4")));
        assert_eq!(diff.attribute("ids.5"), Some(&attr("", "5")));
        assert_eq!(diff.attribute("ids.1"), Some(&attr("", "1")));
        assert!(diff.attribute("ids.50").unwrap().new_removed);
        assert!(diff.attribute("ids.10").is_none());
    }

    #[test]
    fn test_set_replaced_without_overlap() {
        let schema = SchemaMap::from([(
            "ids".to_string(),
            Schema::set(ValueKind::Int)
                .optional()
                .with_set_func(|v| v.as_i64().unwrap_or_default()),
        )]);
        let prior = state(&[("ids.#", "2"), ("ids.10", "10"), ("ids.50", "50")]);
        let config = Value::object([(
            "ids",
            Value::Set(vec![Value::int(5), Value::int(2), Value::int(1)]),
        )]);
        let diff = run(schema, Some(&prior), config).unwrap();
        assert_eq!(diff.attribute("ids.#"), Some(&attr("2", "3")));
        for code in ["1", "2", "5"] {
            assert_eq!(diff.attribute(&format!("ids.{}", code)), Some(&attr("", code)));
        }
        for code in ["10", "50"] {
            assert!(diff.attribute(&format!("ids.{}", code)).unwrap().new_removed);
        }
    }

    #[test]
    fn test_nested_block_set_element() {
        let rule = Resource::new().with_schema(SchemaMap::from([
            ("port".to_string(), Schema::int().required()),
            ("arn".to_string(), Schema::string().computed()),
        ]));
        let schema = SchemaMap::from([("rule".to_string(), Schema::set(rule).optional())]);
        let config = Value::object([(
            "rule",
            Value::Set(vec![Value::object([("port", Value::int(22)), ("arn", Value::Null)])]),
        )]);
        let diff = run(schema, None, config).unwrap();
        assert_eq!(diff.attribute("rule.#"), Some(&attr("0", "1")));
        let port_key = diff
            .attributes
            .keys()
            .find(|k| k.ends_with(".port"))
            .cloned()
            .unwrap();
        let code = port_key
            .trim_start_matches("rule.")
            .trim_end_matches(".port")
            .to_string();
        assert!(code.parse::<i64>().is_ok());
        assert_eq!(
            diff.attribute(&format!("rule.{}.port", code)),
            Some(&attr("", "22"))
        );
        assert!(diff.attribute(&format!("rule.{}.arn", code)).unwrap().new_computed);
    }

    #[test]
    fn test_diff_suppress() {
        let schema = SchemaMap::from([(
            "name".to_string(),
            Schema::string()
                .optional()
                .with_diff_suppress_func(|_, old, new, _| old.eq_ignore_ascii_case(new)),
        )]);
        let prior = state(&[("name", "Web")]);
        assert!(run(schema, Some(&prior), Value::object([("name", Value::string("web"))])).is_none());
    }

    #[test]
    fn test_tainted_plans_replacement() {
        let schema = SchemaMap::from([("name".to_string(), Schema::string().optional())]);
        let mut prior = state(&[("name", "a")]);
        prior.tainted = true;
        let diff = run(schema, Some(&prior), Value::object([("name", Value::string("a"))])).unwrap();
        assert!(diff.destroy_tainted);
        assert!(diff.requires_new());
        assert_eq!(diff.attribute("name"), Some(&attr("a", "a")));
    }

    #[test]
    fn test_requires_new_rediff() {
        let schema = SchemaMap::from([
            ("name".to_string(), Schema::string().required().force_new()),
            ("size".to_string(), Schema::int().optional()),
            ("arn".to_string(), Schema::string().computed()),
        ]);
        let prior = state(&[("name", "a"), ("size", "1"), ("arn", "arn:a")]);
        let diff = schema_map_diff(
            &Arc::new(schema),
            Some(&prior),
            &ResourceConfig::new(Value::object([
                ("name", Value::string("b")),
                ("size", Value::int(1)),
            ])),
            None,
            &Meta::default(),
            true,
        )
        .unwrap()
        .unwrap();
        let name = diff.attribute("name").unwrap();
        assert!(name.requires_new);
        assert_eq!(name.old, "a");
        // The replacement recomputes everything, including unchanged and
        // computed attributes.
        assert_eq!(diff.attribute("size"), Some(&attr("1", "1")));
        let arn = diff.attribute("arn").unwrap();
        assert!(arn.new_computed);
        assert_eq!(arn.old, "arn:a");
    }

    #[test]
    fn test_customize_diff_sets_new() {
        let schema = Arc::new(SchemaMap::from([
            ("name".to_string(), Schema::string().optional()),
            ("version".to_string(), Schema::int().computed()),
        ]));
        let prior = state(&[("name", "a"), ("version", "1")]);
        let customize: CustomizeDiffFunc = Arc::new(|d: &mut ResourceDiff, _: &Meta| {
            if d.has_change("name") {
                d.set_new_computed("version")?;
            }
            Ok(())
        });
        let diff = schema_map_diff(
            &schema,
            Some(&prior),
            &ResourceConfig::new(Value::object([("name", Value::string("b"))])),
            Some(&customize),
            &Meta::default(),
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(diff.attribute("name"), Some(&attr("a", "b")));
        let version = diff.attribute("version").unwrap();
        assert!(version.new_computed);
        assert_eq!(version.old, "1");
    }

    proptest! {
        #[test]
        fn prop_applied_config_diffs_clean(
            name in "[a-z]{1,8}",
            size in 0i64..1000,
            tags in proptest::collection::btree_map("[a-z]{1,4}", "[a-z0-9]{0,4}", 0..4),
            ports in proptest::collection::vec(1i64..65535, 0..4),
        ) {
            let schema = SchemaMap::from([
                ("name".to_string(), Schema::string().required()),
                ("size".to_string(), Schema::int().optional()),
                ("tags".to_string(), Schema::map(ValueKind::String).optional()),
                ("ports".to_string(), Schema::list(ValueKind::Int).optional()),
                ("ids".to_string(), Schema::set(ValueKind::Int).optional()),
            ]);
            let schema = Arc::new(schema);
            let config = ResourceConfig::new(Value::object([
                ("name", Value::string(name)),
                ("size", Value::int(size)),
                ("tags", Value::Map(tags.into_iter().map(|(k, v)| (k, Value::string(v))).collect())),
                ("ports", Value::List(ports.iter().map(|p| Value::int(*p)).collect())),
                ("ids", Value::Set(ports.iter().map(|p| Value::int(*p)).collect())),
            ]));

            // Diff against nothing, apply, then diff again: nothing changes.
            let first = schema_map_diff(&schema, None, &config, None, &Meta::default(), false)
                .unwrap()
                .unwrap();
            let mut data = ResourceData::new(schema.clone(), None, None, Some(first));
            data.set_id("i-1");
            let applied = data.state().unwrap();
            let second = schema_map_diff(&schema, Some(&applied), &config, None, &Meta::default(), false)
                .unwrap();
            prop_assert!(second.is_none(), "unexpected diff: {:?}", second);
        }
    }
}
