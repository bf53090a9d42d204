//! Field reader over the raw resource configuration.

use crate::error::SchemaError;
use crate::helper::field_reader::{
    json_to_primitive, read_object_field, value_to_primitive, map_elem_kind, FieldReadResult,
    FieldReader,
};
use crate::helper::schema::{resolve_address, AddressTarget, Schema, SchemaMap, ValueKind};
use crate::helper::set::Set;
use crate::instance::ResourceConfig;
use crate::path::{AttributePath, PathStep};
use crate::value::Value;
use serde_json::{json, Value as Json};

/// Reads the raw resource configuration.
///
/// Set elements are addressed by hash code but stored positionally in the
/// configuration, so hash steps are translated by hashing each configured
/// element. Unknown values read as computed. Schema defaults fill in unset
/// attributes whose enclosing object is configured.
pub struct ConfigFieldReader<'a> {
    schema: &'a SchemaMap,
    config: &'a ResourceConfig,
}

impl<'a> ConfigFieldReader<'a> {
    /// A reader over `config`.
    pub fn new(schema: &'a SchemaMap, config: &'a ResourceConfig) -> Self {
        Self { schema, config }
    }

    fn translate(&self, address: &AttributePath) -> Result<Option<AttributePath>, SchemaError> {
        let mut out = AttributePath::new();
        for step in address.steps() {
            let PathStep::Hash(code) = step else {
                out.push(step.clone());
                continue;
            };
            let Some(AddressTarget::Field(set_schema)) = resolve_address(self.schema, &out) else {
                return Ok(None);
            };
            let f = set_schema.set_hash_func();
            let len = self
                .config
                .value
                .get_path(&out)
                .and_then(Value::elements)
                .map(<[Value]>::len)
                .unwrap_or(0);
            let mut found = None;
            for i in 0..len {
                let raw = self.read_field(&out.index(i))?;
                if let Some(value) = raw.value {
                    if f(&value).to_string() == *code {
                        found = Some(i);
                        break;
                    }
                }
            }
            match found {
                Some(i) => out.push(PathStep::Index(i)),
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }

    fn parent_configured(&self, path: &AttributePath) -> bool {
        match path.parent() {
            Some(parent) if parent.is_empty() => true,
            Some(parent) => matches!(
                self.config.value.get_path(&parent),
                Some(v) if !v.is_null() && v.is_known()
            ),
            None => false,
        }
    }

    fn read_primitive(
        &self,
        path: &AttributePath,
        schema: &Schema,
    ) -> Result<FieldReadResult, SchemaError> {
        let key = path.to_flatmap_key();
        match self.config.value.get_path(path) {
            Some(Value::Unknown) => Ok(FieldReadResult::computed()),
            Some(value) if !value.is_null() => Ok(FieldReadResult {
                value: value_to_primitive(value, schema.kind, &key)?,
                exists: true,
                ..FieldReadResult::default()
            }),
            _ => {
                if !self.parent_configured(path) {
                    return Ok(FieldReadResult::missing());
                }
                let default = schema
                    .default_value()
                    .map_err(|e| SchemaError::value(key.clone(), e.to_string()))?;
                match default {
                    Some(default) => Ok(FieldReadResult {
                        value: json_to_primitive(&default, schema.kind, &key)?,
                        exists: true,
                        ..FieldReadResult::default()
                    }),
                    None => Ok(FieldReadResult::missing()),
                }
            },
        }
    }

    fn read_list(&self, path: &AttributePath) -> Result<FieldReadResult, SchemaError> {
        match self.config.value.get_path(path) {
            Some(Value::Unknown) => Ok(computed_empty()),
            Some(Value::List(items) | Value::Set(items)) => {
                if items.iter().any(Value::is_unknown) {
                    return Ok(computed_empty());
                }
                let mut out = Vec::with_capacity(items.len());
                for i in 0..items.len() {
                    let raw = self.read_field(&path.index(i))?;
                    out.push(raw.value.unwrap_or(Json::Null));
                }
                Ok(FieldReadResult::known(Json::Array(out)))
            },
            _ => Ok(FieldReadResult {
                value: Some(json!([])),
                ..FieldReadResult::default()
            }),
        }
    }

    fn read_set(&self, path: &AttributePath, schema: &Schema) -> Result<FieldReadResult, SchemaError> {
        let items = match self.config.value.get_path(path) {
            Some(Value::Unknown) => return Ok(computed_empty()),
            Some(Value::List(items) | Value::Set(items)) => items,
            _ => {
                return Ok(FieldReadResult {
                    value: Some(json!([])),
                    ..FieldReadResult::default()
                })
            },
        };
        // An element with unknown parts has no stable hash yet.
        if !items.iter().all(Value::is_wholly_known) {
            return Ok(computed_empty());
        }
        let mut set = Set::new(schema.set_hash_func());
        for i in 0..items.len() {
            let raw = self.read_field(&path.index(i))?;
            set.add(raw.value.unwrap_or(Json::Null));
        }
        Ok(FieldReadResult::known(set.into()))
    }

    fn read_map(&self, path: &AttributePath, schema: &Schema) -> Result<FieldReadResult, SchemaError> {
        let entries = match self.config.value.get_path(path) {
            Some(Value::Unknown) => return Ok(FieldReadResult::computed()),
            Some(Value::Map(entries) | Value::Object(entries)) => entries,
            _ => return Ok(FieldReadResult::missing()),
        };
        if entries.values().any(Value::is_unknown) {
            return Ok(FieldReadResult::computed());
        }
        let kind = map_elem_kind(schema);
        let mut out = serde_json::Map::new();
        for (k, v) in entries {
            let key = path.key(k.clone()).to_flatmap_key();
            out.insert(
                k.clone(),
                value_to_primitive(v, kind, &key)?.unwrap_or(Json::Null),
            );
        }
        Ok(FieldReadResult::known(Json::Object(out)))
    }
}

fn computed_empty() -> FieldReadResult {
    FieldReadResult {
        value: Some(json!([])),
        exists: true,
        computed: true,
        ..FieldReadResult::default()
    }
}

impl FieldReader for ConfigFieldReader<'_> {
    fn read_field(&self, address: &AttributePath) -> Result<FieldReadResult, SchemaError> {
        let Some(target) = resolve_address(self.schema, address) else {
            return Ok(FieldReadResult::missing());
        };
        let Some(path) = self.translate(address)? else {
            return Ok(FieldReadResult::missing());
        };
        match target {
            AddressTarget::Object(map) => read_object_field(self, &path, map),
            AddressTarget::Field(schema) => match schema.kind {
                ValueKind::Bool | ValueKind::Int | ValueKind::Float | ValueKind::String => {
                    self.read_primitive(&path, &schema)
                },
                ValueKind::List => self.read_list(&path),
                ValueKind::Set => self.read_set(&path, &schema),
                ValueKind::Map => self.read_map(&path, &schema),
            },
        }
    }

    fn read_count(&self, address: &AttributePath) -> Result<FieldReadResult, SchemaError> {
        let Some(path) = self.translate(address)? else {
            return Ok(FieldReadResult::missing());
        };
        match self.config.value.get_path(&path) {
            Some(Value::Unknown) => Ok(FieldReadResult::computed()),
            Some(Value::List(items) | Value::Set(items)) => {
                if items.iter().any(Value::is_unknown) {
                    Ok(FieldReadResult::computed())
                } else {
                    Ok(FieldReadResult::known(json!(items.len())))
                }
            },
            Some(Value::Map(entries) | Value::Object(entries)) => {
                if entries.values().any(Value::is_unknown) {
                    Ok(FieldReadResult::computed())
                } else {
                    Ok(FieldReadResult::known(json!(entries.len())))
                }
            },
            _ => Ok(FieldReadResult::missing()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::resource::Resource;

    fn schema() -> SchemaMap {
        let ingress = Resource::new().with_schema(SchemaMap::from([
            ("port".to_string(), Schema::int().required()),
            (
                "protocol".to_string(),
                Schema::string().optional().with_default("tcp"),
            ),
        ]));
        SchemaMap::from([
            ("name".to_string(), Schema::string().required()),
            (
                "region".to_string(),
                Schema::string().optional().with_default("us-east-1"),
            ),
            ("size".to_string(), Schema::int().optional()),
            ("tags".to_string(), Schema::map(ValueKind::String).optional()),
            ("zones".to_string(), Schema::list(ValueKind::String).optional()),
            ("ingress".to_string(), Schema::set(ingress).optional()),
        ])
    }

    fn config(value: Value) -> ResourceConfig {
        ResourceConfig::new(value)
    }

    #[test]
    fn test_primitives_and_defaults() {
        let schema = schema();
        let cfg = config(Value::object([
            ("name", Value::string("web")),
            ("size", Value::string("3")),
        ]));
        let reader = ConfigFieldReader::new(&schema, &cfg);

        assert_eq!(
            reader.read_field(&AttributePath::root("name")).unwrap().value,
            Some(json!("web"))
        );
        assert_eq!(
            reader.read_field(&AttributePath::root("size")).unwrap().value,
            Some(json!(3))
        );
        let region = reader.read_field(&AttributePath::root("region")).unwrap();
        assert!(region.exists);
        assert_eq!(region.value, Some(json!("us-east-1")));
    }

    #[test]
    fn test_unknown_reads_computed() {
        let schema = schema();
        let cfg = config(Value::object([
            ("name", Value::Unknown),
            ("zones", Value::List(vec![Value::string("a"), Value::Unknown])),
            ("tags", Value::Unknown),
        ]));
        let reader = ConfigFieldReader::new(&schema, &cfg);

        let name = reader.read_field(&AttributePath::root("name")).unwrap();
        assert!(name.computed && name.exists);
        assert!(reader.read_field(&AttributePath::root("zones")).unwrap().computed);
        assert!(reader.read_count(&AttributePath::root("zones")).unwrap().computed);
        assert!(reader.read_field(&AttributePath::root("tags")).unwrap().computed);
    }

    #[test]
    fn test_set_elements_by_hash() {
        let schema = schema();
        let cfg = config(Value::object([(
            "ingress",
            Value::List(vec![
                Value::object([("port", Value::int(443))]),
                Value::object([("port", Value::int(80)), ("protocol", Value::string("udp"))]),
            ]),
        )]));
        let reader = ConfigFieldReader::new(&schema, &cfg);

        let ingress = reader.read_field(&AttributePath::root("ingress")).unwrap();
        let items = ingress.value.unwrap();
        assert_eq!(items.as_array().map(Vec::len), Some(2));

        let f = schema["ingress"].set_hash_func();
        let code = f(&json!({"port": 80, "protocol": "udp"}));
        let port = reader
            .read_field(&AttributePath::root("ingress").hash(code).attr("port"))
            .unwrap();
        assert_eq!(port.value, Some(json!(80)));

        // The nested default applies inside a configured element.
        let code = f(&json!({"port": 443, "protocol": "tcp"}));
        let protocol = reader
            .read_field(&AttributePath::root("ingress").hash(code).attr("protocol"))
            .unwrap();
        assert_eq!(protocol.value, Some(json!("tcp")));

        let missing = reader
            .read_field(&AttributePath::root("ingress").hash(1).attr("port"))
            .unwrap();
        assert!(!missing.exists);
    }

    #[test]
    fn test_map_and_counts() {
        let schema = schema();
        let mut tags = std::collections::BTreeMap::new();
        tags.insert("env".to_string(), Value::string("prod"));
        let cfg = config(Value::object([
            ("tags", Value::Map(tags)),
            ("zones", Value::List(vec![Value::string("a"), Value::string("b")])),
        ]));
        let reader = ConfigFieldReader::new(&schema, &cfg);

        assert_eq!(
            reader.read_field(&AttributePath::root("tags")).unwrap().value,
            Some(json!({"env": "prod"}))
        );
        assert_eq!(
            reader.read_count(&AttributePath::root("zones")).unwrap().value,
            Some(json!(2))
        );
        assert!(!reader.read_count(&AttributePath::root("missing")).unwrap().exists);
    }
}
