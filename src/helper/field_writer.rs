//! Writing structured values into a flatmap.

use crate::error::SchemaError;
use crate::flatmap::FlatMap;
use crate::helper::field_reader::{FieldReader, MapFieldReader};
use crate::helper::schema::{resolve_address, AddressTarget, Schema, SchemaMap, ValueKind};
use crate::helper::set::Set;
use crate::path::{AttributePath, PathStep};
use serde_json::Value as Json;

/// Accumulates values written with [`MapFieldWriter::write_field`] as a
/// flatmap.
///
/// Only whole top-level attributes may be written. Each write replaces
/// everything previously stored below the address.
#[derive(Debug, Clone, Default)]
pub struct MapFieldWriter {
    result: FlatMap,
}

impl MapFieldWriter {
    /// An empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn map(&self) -> &FlatMap {
        &self.result
    }

    /// Consume the writer, returning its flatmap.
    pub fn into_map(self) -> FlatMap {
        self.result
    }

    /// Write `value` at `address`.
    pub fn write_field(
        &mut self,
        schema: &SchemaMap,
        address: &AttributePath,
        value: &Json,
    ) -> Result<(), SchemaError> {
        let key = address.to_flatmap_key();
        if resolve_address(schema, address).is_none() {
            return Err(SchemaError::value(key, "invalid address to set"));
        }
        if let Some(step) = address
            .steps()
            .iter()
            .find(|step| !matches!(step, PathStep::Attr(_)))
        {
            let what = match step {
                PathStep::Key(_) => "map",
                PathStep::Hash(_) => "set",
                _ => "list",
            };
            return Err(SchemaError::value(key, format!("can only set full {}", what)));
        }
        self.set(schema, address, value)
    }

    fn set(&mut self, schema: &SchemaMap, path: &AttributePath, value: &Json) -> Result<(), SchemaError> {
        let key = path.to_flatmap_key();
        let target = resolve_address(schema, path)
            .ok_or_else(|| SchemaError::value(key.clone(), "invalid address to set"))?;
        match target {
            AddressTarget::Object(map) => self.set_object(schema, path, map, value),
            AddressTarget::Field(field) => match field.kind {
                ValueKind::Bool | ValueKind::Int | ValueKind::Float | ValueKind::String => {
                    let raw = primitive_to_string(&key, field.kind, value)?;
                    self.result.insert(key, raw);
                    Ok(())
                },
                ValueKind::List => self.set_list(schema, path, value),
                ValueKind::Map => self.set_map(schema, path, value),
                ValueKind::Set => self.set_set(schema, path, &field, value),
            },
        }
    }

    fn clear_tree(&mut self, path: &AttributePath) {
        let key = path.to_flatmap_key();
        let prefix = format!("{}.", key);
        self.result.remove(&key);
        self.result.retain(|k, _| !k.starts_with(&prefix));
    }

    fn set_object(
        &mut self,
        schema: &SchemaMap,
        path: &AttributePath,
        fields: &SchemaMap,
        value: &Json,
    ) -> Result<(), SchemaError> {
        let empty = serde_json::Map::new();
        let entries = match value {
            Json::Object(entries) => entries,
            Json::Null => &empty,
            other => {
                return Err(SchemaError::value(
                    path.to_flatmap_key(),
                    format!("expected an object, got {}", other),
                ))
            },
        };
        if let Some(unknown) = entries.keys().find(|k| !fields.contains_key(*k)) {
            return Err(SchemaError::value(
                path.attr(unknown.clone()).to_flatmap_key(),
                "invalid address to set",
            ));
        }
        for name in fields.keys() {
            let child = path.attr(name.clone());
            if let Err(e) = self.set(schema, &child, entries.get(name).unwrap_or(&Json::Null)) {
                self.clear_tree(path);
                return Err(e);
            }
        }
        Ok(())
    }

    fn set_list(&mut self, schema: &SchemaMap, path: &AttributePath, value: &Json) -> Result<(), SchemaError> {
        let key = path.to_flatmap_key();
        let items = as_items(&key, value)?;
        self.clear_tree(path);
        for (i, item) in items.iter().enumerate() {
            if let Err(e) = self.set(schema, &path.index(i), item) {
                self.clear_tree(path);
                return Err(e);
            }
        }
        self.result.insert(format!("{}.#", key), items.len().to_string());
        Ok(())
    }

    fn set_map(&mut self, schema: &SchemaMap, path: &AttributePath, value: &Json) -> Result<(), SchemaError> {
        let key = path.to_flatmap_key();
        let empty = serde_json::Map::new();
        let entries = match value {
            Json::Object(entries) => entries,
            Json::Null => &empty,
            other => {
                return Err(SchemaError::value(key, format!("must be a map, got {}", other)))
            },
        };
        self.clear_tree(path);
        for (k, v) in entries {
            self.set(schema, &path.key(k.clone()), v)?;
        }
        self.result.insert(format!("{}.%", key), entries.len().to_string());
        Ok(())
    }

    fn set_set(
        &mut self,
        schema: &SchemaMap,
        path: &AttributePath,
        field: &Schema,
        value: &Json,
    ) -> Result<(), SchemaError> {
        let key = path.to_flatmap_key();
        let items = as_items(&key, value)?;

        // Round-trip the elements through a list so they are typed the way
        // readers will later see them before hashing.
        let mut as_list = field.clone();
        as_list.kind = ValueKind::List;
        let temp_schema = SchemaMap::from([("set".to_string(), as_list)]);
        let temp_path = AttributePath::root("set");
        let mut temp = MapFieldWriter::new();
        temp.set(&temp_schema, &temp_path, &Json::Array(items.to_vec()))
            .map_err(|e| SchemaError::value(key.clone(), e.to_string()))?;
        let reader = MapFieldReader::new(&temp_schema, temp.map());
        let mut set = Set::new(field.set_hash_func());
        for i in 0..items.len() {
            let raw = reader.read_field(&temp_path.index(i))?;
            set.add(raw.value.unwrap_or(Json::Null));
        }

        self.clear_tree(path);
        for (code, elem) in set.iter() {
            self.set(schema, &path.hash(code), elem)?;
        }
        self.result.insert(format!("{}.#", key), set.len().to_string());
        Ok(())
    }
}

fn as_items<'v>(key: &str, value: &'v Json) -> Result<&'v [Json], SchemaError> {
    match value {
        Json::Array(items) => Ok(items),
        Json::Null => Ok(&[]),
        other => Err(SchemaError::value(key, format!("expected a list, got {}", other))),
    }
}

fn primitive_to_string(key: &str, kind: ValueKind, value: &Json) -> Result<String, SchemaError> {
    let mismatch = || {
        SchemaError::value(
            key,
            format!("expected type {:?}, got unconvertible value {}", kind, value),
        )
    };
    match (kind, value) {
        (_, Json::Null) => Ok(String::new()),
        (ValueKind::Bool, Json::Bool(b)) => Ok(b.to_string()),
        (ValueKind::String, Json::String(s)) => Ok(s.clone()),
        (ValueKind::String, Json::Number(n)) => Ok(n.to_string()),
        (ValueKind::String, Json::Bool(b)) => Ok(b.to_string()),
        (ValueKind::Int, Json::Number(n)) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(i.to_string()),
            (None, Some(f)) if f.fract() == 0.0 => Ok((f as i64).to_string()),
            _ => Err(mismatch()),
        },
        (ValueKind::Float, Json::Number(n)) => n.as_f64().map(|f| f.to_string()).ok_or_else(mismatch),
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::resource::Resource;
    use serde_json::json;

    fn schema() -> SchemaMap {
        let rule = Resource::new().with_schema(SchemaMap::from([
            ("port".to_string(), Schema::int().required()),
            ("cidrs".to_string(), Schema::list(ValueKind::String).optional()),
        ]));
        SchemaMap::from([
            ("name".to_string(), Schema::string().optional()),
            ("size".to_string(), Schema::int().optional()),
            ("ratio".to_string(), Schema::float().optional()),
            ("on".to_string(), Schema::bool().optional()),
            ("tags".to_string(), Schema::map(ValueKind::String).optional()),
            ("rule".to_string(), Schema::list(rule).optional()),
            (
                "ids".to_string(),
                Schema::set(ValueKind::Int)
                    .optional()
                    .with_set_func(|v| v.as_i64().unwrap_or_default()),
            ),
        ])
    }

    fn pairs(map: &FlatMap) -> Vec<(&str, &str)> {
        map.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }

    #[test]
    fn test_write_primitives() {
        let schema = schema();
        let mut w = MapFieldWriter::new();
        w.write_field(&schema, &AttributePath::root("name"), &json!("web")).unwrap();
        w.write_field(&schema, &AttributePath::root("size"), &json!(3)).unwrap();
        w.write_field(&schema, &AttributePath::root("ratio"), &json!(1.5)).unwrap();
        w.write_field(&schema, &AttributePath::root("on"), &json!(true)).unwrap();
        assert_eq!(
            pairs(w.map()),
            vec![("name", "web"), ("on", "true"), ("ratio", "1.5"), ("size", "3")]
        );

        w.write_field(&schema, &AttributePath::root("name"), &Json::Null).unwrap();
        assert_eq!(w.map().get("name").map(String::as_str), Some(""));

        let err = w
            .write_field(&schema, &AttributePath::root("size"), &json!("three"))
            .unwrap_err();
        assert!(err.to_string().contains("size"));
    }

    #[test]
    fn test_write_nested_list_replaces_previous() {
        let schema = schema();
        let mut w = MapFieldWriter::new();
        w.write_field(
            &schema,
            &AttributePath::root("rule"),
            &json!([{"port": 80, "cidrs": ["10.0.0.0/8"]}, {"port": 443}]),
        )
        .unwrap();
        assert_eq!(
            pairs(w.map()),
            vec![
                ("rule.#", "2"),
                ("rule.0.cidrs.#", "1"),
                ("rule.0.cidrs.0", "10.0.0.0/8"),
                ("rule.0.port", "80"),
                ("rule.1.cidrs.#", "0"),
                ("rule.1.port", "443"),
            ]
        );

        w.write_field(&schema, &AttributePath::root("rule"), &json!([{"port": 22}]))
            .unwrap();
        assert_eq!(
            pairs(w.map()),
            vec![("rule.#", "1"), ("rule.0.cidrs.#", "0"), ("rule.0.port", "22")]
        );
    }

    #[test]
    fn test_write_map_and_set() {
        let schema = schema();
        let mut w = MapFieldWriter::new();
        w.write_field(&schema, &AttributePath::root("tags"), &json!({"a": "1"})).unwrap();
        w.write_field(&schema, &AttributePath::root("ids"), &json!([5, 1, 5])).unwrap();
        assert_eq!(
            pairs(w.map()),
            vec![
                ("ids.#", "2"),
                ("ids.1", "1"),
                ("ids.5", "5"),
                ("tags.%", "1"),
                ("tags.a", "1"),
            ]
        );

        w.write_field(&schema, &AttributePath::root("tags"), &Json::Null).unwrap();
        assert_eq!(w.map().get("tags.%").map(String::as_str), Some("0"));
        assert!(!w.map().contains_key("tags.a"));
    }

    #[test]
    fn test_partial_writes_rejected() {
        let schema = schema();
        let mut w = MapFieldWriter::new();
        let err = w
            .write_field(&schema, &AttributePath::root("rule").index(0).attr("port"), &json!(1))
            .unwrap_err();
        assert!(err.to_string().contains("can only set full list"));
        assert!(w
            .write_field(&schema, &AttributePath::root("nope"), &json!(1))
            .is_err());
    }
}
