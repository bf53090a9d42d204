//! Configuration validation against a schema map.
//!
//! Configuration arrives as a structured [`Value`] whose unset attributes are
//! null. Validation walks it together with the [`SchemaMap`] and reports
//! every broken constraint as a [`Diagnostic`]:
//!
//! - required attributes must be set, computed-only ones must not be
//! - `ConflictsWith`, `RequiredWith`, `AtLeastOneOf` and `ExactlyOneOf`
//! - `MinItems`/`MaxItems` of lists and sets
//! - primitive kinds, with the weak string conversions the flatmap layer
//!   accepts (`"42"` is a valid int)
//! - user validation callbacks and deprecation warnings
//! - keys the schema does not know
//!
//! Values that are not yet known are skipped; they are validated again once
//! they are.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_schema::helper::{Schema, SchemaMap};
//! use hemmer_provider_schema::instance::ResourceConfig;
//! use hemmer_provider_schema::validation::validate;
//! use hemmer_provider_schema::value::Value;
//!
//! let schema = SchemaMap::from([
//!     ("name".to_string(), Schema::string().required()),
//!     ("count".to_string(), Schema::int().optional()),
//! ]);
//!
//! let config = ResourceConfig::new(Value::object([
//!     ("name", Value::string("web")),
//!     ("count", Value::string("three")),
//! ]));
//! let diagnostics = validate(&schema, &config);
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute.as_ref().map(|p| p.to_string()), Some("count".to_string()));
//! ```

use crate::diag::{Diagnostic, DiagnosticsExt};
use crate::helper::schema::{Elem, Schema, SchemaMap, ValueKind};
use crate::helper::timeout::TIMEOUTS_CONFIG_KEY;
use crate::instance::ResourceConfig;
use crate::path::AttributePath;
use crate::value::{parse_number, Value};
use crate::wire::value_to_json;

/// Validate a configuration against a schema map.
///
/// Returns a list of diagnostics; warnings may be present in a valid
/// configuration.
pub fn validate(schema: &SchemaMap, config: &ResourceConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let walker = Walker {
        root: &config.value,
    };
    walker.validate_object(
        schema,
        &config.value,
        "",
        &AttributePath::new(),
        true,
        &mut diagnostics,
    );
    diagnostics
}

/// Validate a configuration, returning Ok when no error was found.
///
/// Warnings alone do not fail validation.
pub fn validate_result(schema: &SchemaMap, config: &ResourceConfig) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, config);
    if diagnostics.has_error() {
        Err(diagnostics)
    } else {
        Ok(())
    }
}

/// Check if a configuration is valid against a schema map.
///
/// Use [`validate`] to get detailed error information.
pub fn is_valid(schema: &SchemaMap, config: &ResourceConfig) -> bool {
    !validate(schema, config).has_error()
}

/// The configured value at a dotted key such as `rule.0.port`.
///
/// Cross-attribute constraints name their peers with absolute keys. Null
/// values read as unset.
pub(crate) fn lookup_key<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    let mut current = root;
    let parts: Vec<&str> = key.split('.').collect();
    let mut i = 0;
    while i < parts.len() {
        current = match current {
            Value::Object(entries) => entries.get(parts[i])?,
            Value::Map(entries) => return entries.get(&parts[i..].join(".")).filter(|v| !v.is_null()),
            Value::List(items) | Value::Set(items) => items.get(parts[i].parse::<usize>().ok()?)?,
            _ => return None,
        };
        i += 1;
    }
    Some(current).filter(|v| !v.is_null())
}

fn join_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn with_unique_sorted(keys: &[String], own: &str) -> Vec<String> {
    let mut all: Vec<String> = keys.to_vec();
    all.push(own.to_string());
    all.sort();
    all.dedup();
    all
}

struct Walker<'a> {
    root: &'a Value,
}

impl Walker<'_> {
    fn is_set(&self, key: &str) -> bool {
        lookup_key(self.root, key).is_some()
    }

    fn validate_object(
        &self,
        schema: &SchemaMap,
        value: &Value,
        prefix: &str,
        path: &AttributePath,
        top_level: bool,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let entries = match value {
            Value::Null | Value::Unknown => return,
            Value::Object(entries) | Value::Map(entries) => entries,
            _ => {
                diagnostics.push(
                    Diagnostic::error("Expected object")
                        .with_detail(format!("Got {}", value.infer_type().friendly_name()))
                        .with_attribute(path.clone()),
                );
                return;
            },
        };

        for (name, s) in schema {
            let key = join_key(prefix, name);
            let attr_path = path.attr(name);
            let raw = entries.get(name).filter(|v| !v.is_null());
            self.validate_attribute(&key, &attr_path, s, raw, diagnostics);
        }

        for (name, v) in entries {
            if v.is_null() || schema.contains_key(name) {
                continue;
            }
            if top_level && name == TIMEOUTS_CONFIG_KEY {
                continue;
            }
            diagnostics.push(
                Diagnostic::error("Invalid or unknown key")
                    .with_detail(format!("An argument named {:?} is not expected here.", name))
                    .with_attribute(path.attr(name)),
            );
        }
    }

    fn validate_attribute(
        &self,
        key: &str,
        path: &AttributePath,
        schema: &Schema,
        raw: Option<&Value>,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let mut present = raw.is_some();
        if !present && schema.default.is_none() {
            match schema.default_value() {
                Ok(Some(_)) => present = true,
                Ok(None) => {},
                Err(e) => {
                    diagnostics.push(
                        Diagnostic::error("Loading Default")
                            .with_detail(format!("error loading default for {:?}: {}", key, e.message()))
                            .with_attribute(path.clone()),
                    );
                    return;
                },
            }
        }

        let before = diagnostics.len();
        self.validate_exactly_one_of(key, path, schema, diagnostics);
        self.validate_at_least_one_of(key, path, schema, diagnostics);
        if diagnostics.len() > before {
            return;
        }

        let raw = match raw {
            Some(raw) => raw,
            None => {
                if schema.required && !present {
                    diagnostics.push(
                        Diagnostic::error("Missing required argument")
                            .with_detail(format!(
                                "The argument {:?} is required, but no definition was found.",
                                key
                            ))
                            .with_attribute(path.clone()),
                    );
                }
                return;
            },
        };

        if !schema.required && !schema.optional {
            diagnostics.push(
                Diagnostic::error("Value for unconfigurable attribute")
                    .with_detail(format!(
                        "Can't configure a value for {:?}: its value will be decided automatically based on the result of applying this configuration.",
                        key
                    ))
                    .with_attribute(path.clone()),
            );
            return;
        }

        if !schema.required_with.is_empty() {
            let missing: Vec<&String> = schema
                .required_with
                .iter()
                .filter(|k| !self.is_set(k))
                .collect();
            if !missing.is_empty() {
                let all = with_unique_sorted(&schema.required_with, key);
                diagnostics.push(
                    Diagnostic::error("Missing required argument")
                        .with_detail(format!("{:?}: all of `{}` must be specified", key, all.join(",")))
                        .with_attribute(path.clone()),
                );
                return;
            }
        }

        if raw.is_unknown() {
            return;
        }

        for other in &schema.conflicts_with {
            match lookup_key(self.root, other) {
                Some(v) if v.is_unknown() => continue,
                Some(_) => {
                    diagnostics.push(
                        Diagnostic::error("ConflictsWith")
                            .with_detail(format!("{:?}: conflicts with {}", key, other))
                            .with_attribute(path.clone()),
                    );
                    return;
                },
                None => {},
            }
        }

        self.validate_type(key, path, schema, raw, diagnostics);

        if let Some(message) = &schema.deprecated {
            diagnostics.push(
                Diagnostic::warning("Argument is deprecated")
                    .with_detail(message.clone())
                    .with_attribute(path.clone()),
            );
        }
    }

    fn validate_exactly_one_of(
        &self,
        key: &str,
        path: &AttributePath,
        schema: &Schema,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        if schema.exactly_one_of.is_empty() {
            return;
        }
        let all = with_unique_sorted(&schema.exactly_one_of, key);
        let specified: Vec<&String> = all.iter().filter(|k| self.is_set(k)).collect();
        let detail = match specified.len() {
            0 => format!("{:?}: one of `{}` must be specified", key, all.join(",")),
            1 => return,
            _ => format!(
                "{:?}: only one of `{}` can be specified, but `{}` were specified.",
                key,
                all.join(","),
                specified.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(",")
            ),
        };
        diagnostics.push(
            Diagnostic::error("Invalid combination of arguments")
                .with_detail(detail)
                .with_attribute(path.clone()),
        );
    }

    fn validate_at_least_one_of(
        &self,
        key: &str,
        path: &AttributePath,
        schema: &Schema,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        if schema.at_least_one_of.is_empty() {
            return;
        }
        let all = with_unique_sorted(&schema.at_least_one_of, key);
        if all.iter().any(|k| self.is_set(k)) {
            return;
        }
        diagnostics.push(
            Diagnostic::error("Missing required argument")
                .with_detail(format!("{:?}: one of `{}` must be specified", key, all.join(",")))
                .with_attribute(path.clone()),
        );
    }

    fn validate_type(
        &self,
        key: &str,
        path: &AttributePath,
        schema: &Schema,
        raw: &Value,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        match schema.kind {
            ValueKind::List | ValueKind::Set => self.validate_list(key, path, schema, raw, diagnostics),
            ValueKind::Map => self.validate_map(key, path, schema, raw, diagnostics),
            _ => validate_primitive(key, path, schema, raw, diagnostics),
        }
    }

    fn validate_list(
        &self,
        key: &str,
        path: &AttributePath,
        schema: &Schema,
        raw: &Value,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let items = match raw {
            Value::List(items) | Value::Set(items) => items,
            _ => {
                diagnostics.push(
                    Diagnostic::error("Attribute must be a list")
                        .with_detail(format!("{:?} must be a list, got {}", key, raw.infer_type().friendly_name()))
                        .with_attribute(path.clone()),
                );
                return;
            },
        };

        if schema.max_items > 0 && items.len() > schema.max_items {
            diagnostics.push(
                Diagnostic::error("Too many list items")
                    .with_detail(format!(
                        "Attribute supports {} item maximum, but config has {} declared.",
                        schema.max_items,
                        items.len()
                    ))
                    .with_attribute(path.clone()),
            );
            return;
        }
        if schema.min_items > 0 && items.len() < schema.min_items {
            diagnostics.push(
                Diagnostic::error("Not enough list items")
                    .with_detail(format!(
                        "Attribute requires {} item minimum, but config has only {} declared.",
                        schema.min_items,
                        items.len()
                    ))
                    .with_attribute(path.clone()),
            );
            return;
        }

        for (i, item) in items.iter().enumerate() {
            let item_key = format!("{}.{}", key, i);
            let item_path = path.index(i);
            if item.is_unknown() || item.is_null() {
                continue;
            }
            match &schema.elem {
                Some(Elem::Block(resource)) => self.validate_object(
                    &resource.schema,
                    item,
                    &item_key,
                    &item_path,
                    false,
                    diagnostics,
                ),
                _ => {
                    if let Some(elem) = schema.elem_schema() {
                        self.validate_type(&item_key, &item_path, &elem, item, diagnostics);
                    }
                },
            }
        }
    }

    fn validate_map(
        &self,
        key: &str,
        path: &AttributePath,
        schema: &Schema,
        raw: &Value,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let entries = match raw {
            Value::Map(entries) | Value::Object(entries) => entries,
            _ => {
                diagnostics.push(
                    Diagnostic::error("Attribute must be a map")
                        .with_detail(format!("{:?} must be a map, got {}", key, raw.infer_type().friendly_name()))
                        .with_attribute(path.clone()),
                );
                return;
            },
        };
        let elem = match schema.elem_schema() {
            Some(elem) => elem,
            None => return,
        };
        for (k, v) in entries {
            if v.is_unknown() || v.is_null() {
                continue;
            }
            let entry_key = format!("{}.{}", key, k);
            let entry_path = path.key(k);
            if !elem.kind.is_primitive() {
                diagnostics.push(
                    Diagnostic::error("Invalid map value")
                        .with_detail(format!("{:?}: map values must be primitives", entry_key))
                        .with_attribute(entry_path),
                );
                continue;
            }
            validate_primitive(&entry_key, &entry_path, &elem, v, diagnostics);
        }
    }
}

fn weakly_typed(kind: ValueKind, raw: &Value) -> bool {
    match (kind, raw) {
        (ValueKind::String, Value::String(_) | Value::Number(_) | Value::Bool(_)) => true,
        (ValueKind::Bool, Value::Bool(_)) => true,
        (ValueKind::Bool, Value::String(s)) => matches!(s.as_str(), "true" | "false" | "1" | "0"),
        (ValueKind::Int, Value::Number(n)) => n.is_i64() || n.is_u64() || n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false),
        (ValueKind::Int, Value::String(s)) => s.parse::<i64>().is_ok(),
        (ValueKind::Float, Value::Number(_)) => true,
        (ValueKind::Float, Value::String(s)) => parse_number(s).is_some(),
        _ => false,
    }
}

fn validate_primitive(
    key: &str,
    path: &AttributePath,
    schema: &Schema,
    raw: &Value,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if raw.is_unknown() {
        return;
    }
    if !weakly_typed(schema.kind, raw) {
        diagnostics.push(
            Diagnostic::error("Incorrect attribute value type")
                .with_detail(format!(
                    "Inappropriate value for attribute {:?}: {} required.",
                    key,
                    kind_name(schema.kind)
                ))
                .with_attribute(path.clone()),
        );
        return;
    }
    if let Some(f) = &schema.validate_func {
        match value_to_json(raw) {
            Ok(json) => diagnostics.extend(f(&json, path)),
            Err(e) => diagnostics.push(Diagnostic::error(e.to_string()).with_attribute(path.clone())),
        }
    }
}

fn kind_name(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Bool => "bool",
        ValueKind::Int => "number",
        ValueKind::Float => "number",
        ValueKind::String => "string",
        ValueKind::List => "list",
        ValueKind::Set => "set",
        ValueKind::Map => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::resource::Resource;
    use crate::value::Value;

    fn config(attrs: Vec<(&str, Value)>) -> ResourceConfig {
        ResourceConfig::new(Value::object(attrs))
    }

    fn details(diagnostics: &[Diagnostic]) -> Vec<String> {
        diagnostics
            .iter()
            .map(|d| d.detail.clone().unwrap_or_else(|| d.summary.clone()))
            .collect()
    }

    #[test]
    fn test_valid_config() {
        let schema = SchemaMap::from([
            ("name".to_string(), Schema::string().required()),
            ("port".to_string(), Schema::int().optional()),
            ("enabled".to_string(), Schema::bool().optional()),
        ]);
        let c = config(vec![
            ("name", Value::string("web")),
            ("port", Value::string("8080")),
            ("enabled", Value::Bool(true)),
        ]);
        assert!(validate(&schema, &c).is_empty());
        assert!(is_valid(&schema, &c));
    }

    #[test]
    fn test_missing_required() {
        let schema = SchemaMap::from([("name".to_string(), Schema::string().required())]);
        let diags = validate(&schema, &config(vec![("name", Value::Null)]));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].summary, "Missing required argument");
        assert!(validate_result(&schema, &config(vec![])).is_err());
    }

    #[test]
    fn test_required_with_default_func_is_satisfied() {
        let schema = SchemaMap::from([(
            "region".to_string(),
            Schema::string()
                .required()
                .with_default_func(|| Ok(Some(serde_json::json!("us-east-1")))),
        )]);
        assert!(validate(&schema, &config(vec![])).is_empty());
    }

    #[test]
    fn test_computed_only_cannot_be_set() {
        let schema = SchemaMap::from([("arn".to_string(), Schema::string().computed())]);
        let diags = validate(&schema, &config(vec![("arn", Value::string("x"))]));
        assert_eq!(diags[0].summary, "Value for unconfigurable attribute");
    }

    #[test]
    fn test_cross_attribute_constraints() {
        let schema = SchemaMap::from([
            ("a".to_string(), Schema::string().optional().with_conflicts_with(&["b"])),
            ("b".to_string(), Schema::string().optional()),
            ("c".to_string(), Schema::string().optional().with_required_with(&["d"])),
            ("d".to_string(), Schema::string().optional()),
        ]);
        let diags = validate(
            &schema,
            &config(vec![
                ("a", Value::string("1")),
                ("b", Value::string("2")),
                ("c", Value::string("3")),
            ]),
        );
        let details = details(&diags);
        assert!(details.contains(&"\"a\": conflicts with b".to_string()), "{:?}", details);
        assert!(details.contains(&"\"c\": all of `c,d` must be specified".to_string()), "{:?}", details);

        // An unknown peer does not conflict yet.
        let diags = validate(
            &schema,
            &config(vec![("a", Value::string("1")), ("b", Value::Unknown)]),
        );
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_exactly_one_and_at_least_one() {
        let schema = SchemaMap::from([
            ("x".to_string(), Schema::string().optional().with_exactly_one_of(&["x", "y"])),
            ("y".to_string(), Schema::string().optional().with_exactly_one_of(&["x", "y"])),
            ("z".to_string(), Schema::string().optional().with_at_least_one_of(&["w"])),
            ("w".to_string(), Schema::string().optional()),
        ]);
        let diags = validate(&schema, &config(vec![("w", Value::string("w"))]));
        assert_eq!(diags.len(), 2);
        assert!(details(&diags)[0].contains("one of `x,y` must be specified"));

        let diags = validate(
            &schema,
            &config(vec![("x", Value::string("1")), ("y", Value::string("2"))]),
        );
        assert_eq!(diags.len(), 3);
        assert!(details(&diags).iter().any(|d| d.contains("only one of `x,y` can be specified")));
        assert!(details(&diags).iter().any(|d| d.contains("\"z\": one of `w,z` must be specified")));
    }

    #[test]
    fn test_list_item_limits_and_nested_blocks() {
        let rule = Resource::new().with_schema(SchemaMap::from([(
            "port".to_string(),
            Schema::int().required(),
        )]));
        let schema = SchemaMap::from([(
            "rule".to_string(),
            Schema::list(rule).optional().with_max_items(1),
        )]);
        let two = config(vec![(
            "rule",
            Value::List(vec![
                Value::object([("port", Value::int(1))]),
                Value::object([("port", Value::int(2))]),
            ]),
        )]);
        let diags = validate(&schema, &two);
        assert_eq!(diags[0].summary, "Too many list items");

        let missing = config(vec![("rule", Value::List(vec![Value::object([("port", Value::Null)])]))]);
        let diags = validate(&schema, &missing);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].attribute.as_ref().map(|p| p.to_string()), Some("rule.0.port".to_string()));
    }

    #[test]
    fn test_validate_func_and_deprecation() {
        let schema = SchemaMap::from([(
            "size".to_string(),
            Schema::int()
                .optional()
                .with_deprecated("use capacity")
                .with_validate_func(|v, path| {
                    if v.as_i64().unwrap_or_default() > 10 {
                        vec![Diagnostic::error("too large").with_attribute(path.clone())]
                    } else {
                        Vec::new()
                    }
                }),
        )]);
        let diags = validate(&schema, &config(vec![("size", Value::int(11))]));
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].summary, "too large");
        assert!(!diags[1].is_error());
        assert_eq!(diags[1].detail.as_deref(), Some("use capacity"));
    }

    #[test]
    fn test_unknown_keys_and_unknown_values() {
        let schema = SchemaMap::from([("name".to_string(), Schema::string().required())]);
        let diags = validate(
            &schema,
            &config(vec![
                ("name", Value::Unknown),
                ("bogus", Value::string("x")),
                ("timeouts", Value::object([("create", Value::string("5m"))])),
            ]),
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].summary, "Invalid or unknown key");
    }

    #[test]
    fn test_lookup_key() {
        let root = Value::object([
            ("tags", Value::Map([("a.b".to_string(), Value::string("c"))].into())),
            ("rule", Value::List(vec![Value::object([("port", Value::int(22))])])),
        ]);
        assert_eq!(lookup_key(&root, "tags.a.b"), Some(&Value::string("c")));
        assert_eq!(lookup_key(&root, "rule.0.port"), Some(&Value::int(22)));
        assert_eq!(lookup_key(&root, "rule.1.port"), None);
    }
}
