//! Legacy instance state, diffs and configuration.
//!
//! [`InstanceState`] and [`InstanceDiff`] are the flatmap-based shapes the
//! helper layer works with; the protocol server converts them to and from
//! structured values at the request boundary.

use crate::flatmap::{element_segments, FlatMap, UNKNOWN_VARIABLE_VALUE};
use crate::path::AttributePath;
use crate::value::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Persisted state of one resource instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceState {
    /// The instance identifier. Empty means the instance does not exist.
    pub id: String,
    /// Flatmap of attribute values, including `id`.
    #[serde(default)]
    pub attributes: FlatMap,
    /// Side-channel data such as the stored schema version and timeouts.
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
    /// The instance is tainted and will be replaced.
    #[serde(default)]
    pub tainted: bool,
    /// Resource type override, set by importers returning other types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

impl InstanceState {
    /// A state with the given id and no attributes.
    pub fn with_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let mut attributes = FlatMap::new();
        attributes.insert("id".to_string(), id.clone());
        Self {
            id,
            attributes,
            ..Self::default()
        }
    }

    /// Whether the state describes an existing instance.
    pub fn exists(&self) -> bool {
        !self.id.is_empty()
    }
}

/// The change of a single flatmap attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceAttrDiff {
    /// The prior value.
    pub old: String,
    /// The planned value.
    pub new: String,
    /// The value is only known after apply.
    pub new_computed: bool,
    /// The attribute is being removed.
    pub new_removed: bool,
    /// The raw config value when a state function rewrote `new`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_extra: Option<serde_json::Value>,
    /// Changing this attribute forces replacement.
    pub requires_new: bool,
    /// The attribute is sensitive.
    pub sensitive: bool,
}

/// A flat change-set produced by the diff engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceDiff {
    /// Per-attribute changes keyed by flatmap key.
    pub attributes: BTreeMap<String, ResourceAttrDiff>,
    /// The instance is being destroyed.
    pub destroy: bool,
    /// The instance is tainted and is being recreated.
    pub destroy_tainted: bool,
    /// Private data carried from plan to apply.
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl InstanceDiff {
    /// An empty diff.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the diff contains no changes at all.
    pub fn is_empty(&self) -> bool {
        !self.destroy && !self.destroy_tainted && self.attributes.is_empty()
    }

    /// Whether applying the diff replaces the instance.
    pub fn requires_new(&self) -> bool {
        self.destroy_tainted || self.attributes.values().any(|d| d.requires_new)
    }

    /// The change recorded for `key`.
    pub fn attribute(&self, key: &str) -> Option<&ResourceAttrDiff> {
        self.attributes.get(key)
    }

    /// Record the change of `key`.
    pub fn set_attribute(&mut self, key: impl Into<String>, diff: ResourceAttrDiff) {
        self.attributes.insert(key.into(), diff);
    }

    /// Remove every change of `key` and below.
    pub fn remove_prefix(&mut self, key: &str) {
        self.attributes
            .retain(|k, _| !crate::path::is_child_key(k, key));
    }

    /// Compute the planned flatmap by applying this diff to `attrs`.
    ///
    /// `ty` is the implied object type of the resource; it decides which keys
    /// survive once list counts, set membership and map sizes changed.
    pub fn apply(&self, attrs: &FlatMap, ty: &ValueType) -> FlatMap {
        if self.destroy {
            return FlatMap::new();
        }
        let mut merged = if self.destroy_tainted {
            FlatMap::new()
        } else {
            attrs.clone()
        };
        for (key, diff) in &self.attributes {
            if diff.new_removed {
                merged.remove(key);
            } else if diff.new_computed {
                merged.insert(key.clone(), UNKNOWN_VARIABLE_VALUE.to_string());
            } else {
                merged.insert(key.clone(), diff.new.clone());
            }
        }

        let mut out = FlatMap::new();
        if let ValueType::Object(types) = ty {
            for (name, attr_ty) in types {
                copy_typed(&merged, &mut out, name, attr_ty, &self.attributes);
            }
        }
        out
    }
}

/// Whether the diff removes the set element at `prefix`: every change
/// recorded for it is a removal.
fn element_removed(changes: &BTreeMap<String, ResourceAttrDiff>, prefix: &str) -> bool {
    let mut any = false;
    for (k, d) in changes.range(prefix.to_string()..) {
        if !crate::path::is_child_key(k, prefix) {
            if k.starts_with(prefix) {
                continue;
            }
            break;
        }
        if !d.new_removed {
            return false;
        }
        any = true;
    }
    any
}

fn copy_typed(
    src: &FlatMap,
    out: &mut FlatMap,
    key: &str,
    ty: &ValueType,
    changes: &BTreeMap<String, ResourceAttrDiff>,
) {
    match ty {
        ValueType::List(element) => {
            let count_key = format!("{}.#", key);
            let Some(count) = src.get(&count_key) else {
                return;
            };
            out.insert(count_key, count.clone());
            if let Ok(n) = count.parse::<usize>() {
                for i in 0..n {
                    copy_typed(src, out, &format!("{}.{}", key, i), element, changes);
                }
            }
        },
        ValueType::Set(element) => {
            let count_key = format!("{}.#", key);
            let Some(count) = src.get(&count_key) else {
                return;
            };
            out.insert(count_key, count.clone());
            if count == UNKNOWN_VARIABLE_VALUE {
                return;
            }
            for code in element_segments(src, key, "#") {
                let prefix = format!("{}.{}", key, code);
                if !element_removed(changes, &prefix) {
                    copy_typed(src, out, &prefix, element, changes);
                }
            }
        },
        ValueType::Map(_) => {
            let size_key = format!("{}.%", key);
            let Some(size) = src.get(&size_key) else {
                return;
            };
            if size == UNKNOWN_VARIABLE_VALUE {
                out.insert(size_key, size.clone());
                return;
            }
            let prefix = format!("{}.", key);
            let mut n = 0;
            for (k, v) in src.range(prefix.clone()..) {
                if !k.starts_with(&prefix) {
                    break;
                }
                if &k[prefix.len()..] != "%" {
                    out.insert(k.clone(), v.clone());
                    n += 1;
                }
            }
            out.insert(size_key, n.to_string());
        },
        ValueType::Object(types) => {
            for (name, attr_ty) in types {
                copy_typed(src, out, &format!("{}.{}", key, name), attr_ty, changes);
            }
        },
        _ => {
            if let Some(v) = src.get(key) {
                out.insert(key.to_string(), v.clone());
            }
        },
    }
}

/// Raw resource configuration as seen by the diff engine.
///
/// Unknown values inside the configuration mark computed keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceConfig {
    /// The configuration object.
    pub value: Value,
}

impl ResourceConfig {
    /// Wrap a configuration value.
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// The configured value at `path`, if set (null counts as unset).
    pub fn get(&self, path: &AttributePath) -> Option<&Value> {
        self.value.get_path(path).filter(|v| !v.is_null())
    }

    /// Whether the value at `path`, or anything within it, is unknown.
    pub fn is_computed(&self, path: &AttributePath) -> bool {
        self.value
            .get_path(path)
            .map(|v| !v.is_wholly_known())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(pairs: &[(&str, &str)]) -> FlatMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn attr(old: &str, new: &str) -> ResourceAttrDiff {
        ResourceAttrDiff {
            old: old.to_string(),
            new: new.to_string(),
            ..Default::default()
        }
    }

    fn resource_type() -> ValueType {
        ValueType::object([
            ("id", ValueType::String),
            ("name", ValueType::String),
            ("ports", ValueType::list(ValueType::Number)),
            ("tags", ValueType::map(ValueType::String)),
            ("rule", ValueType::set(ValueType::object([("port", ValueType::Number)]))),
        ])
    }

    #[test]
    fn test_apply_prunes_shrunk_list() {
        let prior = flat(&[
            ("id", "a"),
            ("ports.#", "3"),
            ("ports.0", "1"),
            ("ports.1", "2"),
            ("ports.2", "3"),
        ]);
        let mut diff = InstanceDiff::new();
        diff.set_attribute("ports.#", attr("3", "1"));
        diff.set_attribute("ports.0", attr("1", "9"));
        let planned = diff.apply(&prior, &resource_type());
        assert_eq!(
            planned,
            flat(&[("id", "a"), ("ports.#", "1"), ("ports.0", "9")])
        );
    }

    #[test]
    fn test_apply_set_membership() {
        let prior = flat(&[("rule.#", "1"), ("rule.10.port", "10")]);
        let mut diff = InstanceDiff::new();
        diff.set_attribute("rule.#", attr("1", "1"));
        diff.set_attribute(
            "rule.10.port",
            ResourceAttrDiff {
                old: "10".into(),
                new_removed: true,
                ..Default::default()
            },
        );
        diff.set_attribute("rule.5.port", attr("", "5"));
        let planned = diff.apply(&prior, &resource_type());
        assert_eq!(planned, flat(&[("rule.#", "1"), ("rule.5.port", "5")]));
    }

    #[test]
    fn test_apply_computed_collections() {
        let prior = flat(&[("tags.%", "1"), ("tags.a", "b")]);
        let mut diff = InstanceDiff::new();
        diff.set_attribute(
            "tags.%",
            ResourceAttrDiff {
                new_computed: true,
                ..Default::default()
            },
        );
        diff.set_attribute(
            "id",
            ResourceAttrDiff {
                new_computed: true,
                ..Default::default()
            },
        );
        let planned = diff.apply(&prior, &resource_type());
        assert_eq!(
            planned,
            flat(&[
                ("id", UNKNOWN_VARIABLE_VALUE),
                ("tags.%", UNKNOWN_VARIABLE_VALUE)
            ])
        );
    }

    #[test]
    fn test_destroy_and_requires_new() {
        let mut diff = InstanceDiff::new();
        assert!(diff.is_empty());
        diff.set_attribute(
            "name",
            ResourceAttrDiff {
                requires_new: true,
                ..attr("a", "b")
            },
        );
        assert!(diff.requires_new());

        diff.destroy = true;
        assert!(diff
            .apply(&flat(&[("name", "a")]), &resource_type())
            .is_empty());

        let tainted = InstanceDiff {
            destroy_tainted: true,
            ..InstanceDiff::new()
        };
        assert!(!tainted.is_empty());
        assert!(tainted.requires_new());
    }

    #[test]
    fn test_remove_prefix() {
        let mut diff = InstanceDiff::new();
        diff.set_attribute("rule.#", attr("0", "1"));
        diff.set_attribute("rule.5.port", attr("", "5"));
        diff.set_attribute("rules", attr("", "x"));
        diff.remove_prefix("rule");
        assert_eq!(diff.attributes.keys().collect::<Vec<_>>(), vec!["rules"]);
    }

    #[test]
    fn test_config_computed_keys() {
        let config = ResourceConfig::new(Value::object([
            ("name", Value::Unknown),
            ("ports", Value::List(vec![Value::int(1), Value::Unknown])),
            ("tags", Value::Null),
        ]));
        assert!(config.is_computed(&AttributePath::root("name")));
        assert!(config.is_computed(&AttributePath::root("ports")));
        assert!(!config.is_computed(&AttributePath::root("ports").index(0)));
        assert!(config.get(&AttributePath::root("tags")).is_none());
    }
}
