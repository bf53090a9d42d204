//! Field reader that overlays a planned diff on another reader.

use crate::error::SchemaError;
use crate::helper::field_reader::{
    count_suffix, map_elem_kind, read_list_field, read_object_field, string_to_primitive,
    FieldReadResult, FieldReader,
};
use crate::helper::schema::{resolve_address, AddressTarget, Schema, SchemaMap, ValueKind};
use crate::helper::set::Set;
use crate::instance::InstanceDiff;
use crate::path::AttributePath;
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;

/// Lays an [`InstanceDiff`] over another reader.
///
/// Keys the diff mentions take the planned value; everything else falls
/// through to `source`. Sets merge the source elements that were not
/// removed with the elements the diff adds.
pub struct DiffFieldReader<'a> {
    schema: &'a SchemaMap,
    diff: &'a InstanceDiff,
    source: &'a dyn FieldReader,
}

impl<'a> DiffFieldReader<'a> {
    /// A reader overlaying `diff` on `source`.
    pub fn new(schema: &'a SchemaMap, diff: &'a InstanceDiff, source: &'a dyn FieldReader) -> Self {
        Self {
            schema,
            diff,
            source,
        }
    }

    fn read_primitive(
        &self,
        address: &AttributePath,
        kind: ValueKind,
    ) -> Result<FieldReadResult, SchemaError> {
        let key = address.to_flatmap_key();
        let Some(attr) = self.diff.attribute(&key) else {
            return self.source.read_field(address);
        };
        if attr.new_removed {
            return Ok(FieldReadResult::missing());
        }
        if attr.new_computed {
            return Ok(FieldReadResult::computed());
        }
        let planned = string_to_primitive(&attr.new, kind, &key)?;
        match &attr.new_extra {
            // The raw configured value is what callers read; the planned
            // string is what a state function made of it.
            Some(extra) => Ok(FieldReadResult {
                value: Some(extra.clone()),
                value_processed: planned,
                exists: true,
                computed: false,
            }),
            None => Ok(FieldReadResult {
                value: planned,
                exists: true,
                ..FieldReadResult::default()
            }),
        }
    }

    fn read_set(&self, address: &AttributePath, schema: &Schema) -> Result<FieldReadResult, SchemaError> {
        let prefix = format!("{}.", address.to_flatmap_key());
        let count_key = format!("{}#", prefix);
        let count = self.diff.attribute(&count_key);
        if let Some(count) = count {
            if count.new_computed {
                return Ok(FieldReadResult {
                    value: Some(json!([])),
                    exists: true,
                    computed: true,
                    ..FieldReadResult::default()
                });
            }
        }
        let emptied = count.map(|c| c.new_removed || c.new == "0").unwrap_or(false);

        // Code -> whether the diff keeps anything of that element.
        let mut codes: BTreeMap<String, bool> = BTreeMap::new();
        for (k, attr) in self.diff.attributes.range(prefix.clone()..) {
            if !k.starts_with(&prefix) {
                break;
            }
            let rest = &k[prefix.len()..];
            if rest == "#" {
                continue;
            }
            let code = rest.split('.').next().unwrap_or(rest);
            *codes.entry(code.to_string()).or_insert(false) |= !attr.new_removed;
        }

        let f = schema.set_hash_func();
        let mut set = Set::new(f.clone());
        let source = self.source.read_field(address)?;
        if source.exists && !source.computed && !emptied {
            if let Some(Json::Array(items)) = &source.value {
                for item in items {
                    if codes.get(&f(item).to_string()) == Some(&false) {
                        continue;
                    }
                    set.add(item.clone());
                }
            }
        }
        for (code, live) in &codes {
            if !live {
                continue;
            }
            let raw = self.read_field(&address.hash(code))?;
            if raw.exists {
                set.add(raw.value.unwrap_or(Json::Null));
            }
        }

        let exists = !set.is_empty() || count.is_some() || !codes.is_empty();
        if !exists && source.exists {
            return Ok(source);
        }
        Ok(FieldReadResult {
            value: Some(set.into()),
            exists,
            ..FieldReadResult::default()
        })
    }

    fn read_map(&self, address: &AttributePath, schema: &Schema) -> Result<FieldReadResult, SchemaError> {
        let prefix = format!("{}.", address.to_flatmap_key());
        if let Some(size) = self.diff.attribute(&format!("{}%", prefix)) {
            if size.new_computed {
                return Ok(FieldReadResult::computed());
            }
        }
        let source = self.source.read_field(address)?;
        let mut exists = source.exists;
        let mut out = match source.value {
            Some(Json::Object(entries)) if source.exists => entries,
            _ => serde_json::Map::new(),
        };
        let kind = map_elem_kind(schema);
        for (k, attr) in self.diff.attributes.range(prefix.clone()..) {
            if !k.starts_with(&prefix) {
                break;
            }
            let rest = &k[prefix.len()..];
            if rest == "%" {
                continue;
            }
            exists = true;
            if attr.new_removed {
                out.remove(rest);
            } else if attr.new_computed {
                out.insert(rest.to_string(), Json::Null);
            } else {
                out.insert(
                    rest.to_string(),
                    string_to_primitive(&attr.new, kind, k)?.unwrap_or(Json::Null),
                );
            }
        }
        Ok(FieldReadResult {
            value: exists.then_some(Json::Object(out)),
            exists,
            ..FieldReadResult::default()
        })
    }
}

impl FieldReader for DiffFieldReader<'_> {
    fn read_field(&self, address: &AttributePath) -> Result<FieldReadResult, SchemaError> {
        let Some(target) = resolve_address(self.schema, address) else {
            return Ok(FieldReadResult::missing());
        };
        match target {
            AddressTarget::Object(map) => read_object_field(self, address, map),
            AddressTarget::Field(schema) => match schema.kind {
                ValueKind::Bool | ValueKind::Int | ValueKind::Float | ValueKind::String => {
                    self.read_primitive(address, schema.kind)
                },
                ValueKind::List => read_list_field(self, address),
                ValueKind::Set => self.read_set(address, &schema),
                ValueKind::Map => self.read_map(address, &schema),
            },
        }
    }

    fn read_count(&self, address: &AttributePath) -> Result<FieldReadResult, SchemaError> {
        let key = format!(
            "{}.{}",
            address.to_flatmap_key(),
            count_suffix(self.schema, address)
        );
        match self.diff.attribute(&key) {
            None => self.source.read_count(address),
            Some(attr) if attr.new_removed => Ok(FieldReadResult::known(json!(0))),
            Some(attr) if attr.new_computed => Ok(FieldReadResult::computed()),
            Some(attr) => attr
                .new
                .parse::<u64>()
                .map(|n| FieldReadResult::known(json!(n)))
                .map_err(|_| SchemaError::value(key.clone(), format!("invalid count {:?}", attr.new))),
        }
    }
}
