//! Reading attribute values out of the different backing stores.
//!
//! A [`FieldReader`] answers "what is the value at this path" for one store:
//! the flatmap state ([`MapFieldReader`]), the raw configuration
//! ([`super::field_reader_config::ConfigFieldReader`]) or a diff laid over
//! another reader ([`super::field_reader_diff::DiffFieldReader`]).
//! [`MultiLevelFieldReader`] stacks them by priority.

use crate::error::SchemaError;
use crate::flatmap::{element_segments, FlatMap, UNKNOWN_VARIABLE_VALUE};
use crate::helper::schema::{resolve_address, AddressTarget, Schema, SchemaMap, ValueKind};
use crate::helper::set::Set;
use crate::path::AttributePath;
use crate::value::Value;
use serde_json::{json, Value as Json};

/// The outcome of reading one path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldReadResult {
    /// The value, absent when nothing is stored or the value is computed.
    pub value: Option<Json>,
    /// The value a state function produced, when it differs from `value`.
    pub value_processed: Option<Json>,
    /// Whether the store holds anything at this path.
    pub exists: bool,
    /// Whether the value is only known after apply.
    pub computed: bool,
}

impl FieldReadResult {
    pub(crate) fn missing() -> Self {
        Self::default()
    }

    pub(crate) fn computed() -> Self {
        Self {
            exists: true,
            computed: true,
            ..Self::default()
        }
    }

    pub(crate) fn known(value: Json) -> Self {
        Self {
            value: Some(value),
            exists: true,
            ..Self::default()
        }
    }

    /// The value, or the zero value of `schema` when absent.
    pub fn value_or_zero(&self, schema: &Schema) -> Json {
        self.value.clone().unwrap_or_else(|| schema.zero_value())
    }
}

/// Reads values at structured paths.
pub trait FieldReader {
    /// Read the value at `address`.
    fn read_field(&self, address: &AttributePath) -> Result<FieldReadResult, SchemaError>;

    /// Read the element count of the list, set or map at `address`.
    fn read_count(&self, address: &AttributePath) -> Result<FieldReadResult, SchemaError>;
}

/// Named priority levels of a [`MultiLevelFieldReader`], lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Prior state.
    State,
    /// Raw configuration.
    Config,
    /// The planned diff.
    Diff,
    /// Values written through `ResourceData::set`.
    Set,
    /// Values written through `ResourceDiff::set_new`.
    NewDiff,
}

/// A prioritized stack of readers.
#[derive(Default)]
pub struct MultiLevelFieldReader<'a> {
    levels: Vec<(Level, &'a dyn FieldReader)>,
}

impl<'a> MultiLevelFieldReader<'a> {
    /// An empty stack.
    pub fn new() -> Self {
        Self { levels: Vec::new() }
    }

    /// Push a reader on top of the stack.
    pub fn add_level(&mut self, level: Level, reader: &'a dyn FieldReader) {
        self.levels.push((level, reader));
    }

    /// Read from exactly one level.
    pub fn read_field_exact(
        &self,
        address: &AttributePath,
        level: Level,
    ) -> Result<FieldReadResult, SchemaError> {
        match self.levels.iter().find(|(l, _)| *l == level) {
            Some((_, reader)) => reader.read_field(address),
            None => Ok(FieldReadResult::missing()),
        }
    }

    /// Read every level up to `level`; the highest level holding a value wins.
    pub fn read_field_merge(
        &self,
        address: &AttributePath,
        level: Level,
    ) -> Result<FieldReadResult, SchemaError> {
        let mut result = FieldReadResult::missing();
        for (l, reader) in &self.levels {
            if *l > level {
                break;
            }
            let out = reader.read_field(address)?;
            if out.exists {
                result = out;
            }
        }
        Ok(result)
    }

    /// Count of the collection at `address` from exactly one level.
    pub fn read_count_exact(
        &self,
        address: &AttributePath,
        level: Level,
    ) -> Result<FieldReadResult, SchemaError> {
        match self.levels.iter().find(|(l, _)| *l == level) {
            Some((_, reader)) => reader.read_count(address),
            None => Ok(FieldReadResult::missing()),
        }
    }

    /// Count of the collection at `address`, merged like [`Self::read_field_merge`].
    pub fn read_count_merge(
        &self,
        address: &AttributePath,
        level: Level,
    ) -> Result<FieldReadResult, SchemaError> {
        let mut result = FieldReadResult::missing();
        for (l, reader) in &self.levels {
            if *l > level {
                break;
            }
            let out = reader.read_count(address)?;
            if out.exists {
                result = out;
            }
        }
        Ok(result)
    }

    fn top(&self) -> Option<Level> {
        self.levels.last().map(|(l, _)| *l)
    }
}

impl FieldReader for MultiLevelFieldReader<'_> {
    fn read_field(&self, address: &AttributePath) -> Result<FieldReadResult, SchemaError> {
        match self.top() {
            Some(level) => self.read_field_merge(address, level),
            None => Ok(FieldReadResult::missing()),
        }
    }

    fn read_count(&self, address: &AttributePath) -> Result<FieldReadResult, SchemaError> {
        match self.top() {
            Some(level) => self.read_count_merge(address, level),
            None => Ok(FieldReadResult::missing()),
        }
    }
}

/// Read every attribute of a nested object.
pub(crate) fn read_object_field<R: FieldReader + ?Sized>(
    reader: &R,
    address: &AttributePath,
    schema: &SchemaMap,
) -> Result<FieldReadResult, SchemaError> {
    let mut out = serde_json::Map::new();
    let mut exists = false;
    for (name, field) in schema {
        let raw = reader.read_field(&address.attr(name.clone()))?;
        exists |= raw.exists;
        out.insert(name.clone(), raw.value_or_zero(field));
    }
    Ok(FieldReadResult {
        value: Some(Json::Object(out)),
        exists,
        ..FieldReadResult::default()
    })
}

/// Read a list through its count and positional elements.
pub(crate) fn read_list_field<R: FieldReader + ?Sized>(
    reader: &R,
    address: &AttributePath,
) -> Result<FieldReadResult, SchemaError> {
    let count = reader.read_count(address)?;
    let n = count_of(&count);
    if count.computed || n == 0 {
        return Ok(FieldReadResult {
            value: Some(json!([])),
            exists: count.exists,
            computed: count.computed,
            ..FieldReadResult::default()
        });
    }
    let mut items = Vec::with_capacity(n);
    for i in 0..n {
        let raw = reader.read_field(&address.index(i))?;
        items.push(raw.value.unwrap_or(Json::Null));
    }
    Ok(FieldReadResult::known(Json::Array(items)))
}

pub(crate) fn count_of(result: &FieldReadResult) -> usize {
    result
        .value
        .as_ref()
        .and_then(Json::as_u64)
        .unwrap_or(0) as usize
}

/// The flatmap suffix holding the size of the collection at `address`.
pub(crate) fn count_suffix(schema: &SchemaMap, address: &AttributePath) -> &'static str {
    match resolve_address(schema, address) {
        Some(AddressTarget::Field(field)) if field.kind == ValueKind::Map => "%",
        _ => "#",
    }
}

/// The element kind of a map, as stored in a flatmap.
pub(crate) fn map_elem_kind(schema: &Schema) -> ValueKind {
    schema
        .elem_schema()
        .map(|s| s.kind)
        .filter(|kind| kind.is_primitive())
        .unwrap_or(ValueKind::String)
}

/// Parse a flatmap string as a primitive of `kind`. Empty strings of
/// non-string kinds read as absent.
pub(crate) fn string_to_primitive(
    raw: &str,
    kind: ValueKind,
    key: &str,
) -> Result<Option<Json>, SchemaError> {
    let invalid = || SchemaError::value(key, format!("cannot parse {:?} as {:?}", raw, kind));
    match kind {
        ValueKind::String => Ok(Some(Json::String(raw.to_string()))),
        _ if raw.is_empty() => Ok(None),
        ValueKind::Bool => match raw {
            "true" | "1" => Ok(Some(Json::Bool(true))),
            "false" | "0" => Ok(Some(Json::Bool(false))),
            _ => Err(invalid()),
        },
        ValueKind::Int => match raw.parse::<i64>() {
            Ok(i) => Ok(Some(json!(i))),
            Err(_) => raw
                .parse::<f64>()
                .map(|f| Some(json!(f as i64)))
                .map_err(|_| invalid()),
        },
        ValueKind::Float => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(|n| Some(Json::Number(n)))
            .ok_or_else(invalid),
        ValueKind::List | ValueKind::Set | ValueKind::Map => Err(invalid()),
    }
}

/// Convert a JSON primitive, such as a default, to `kind`.
pub(crate) fn json_to_primitive(
    value: &Json,
    kind: ValueKind,
    key: &str,
) -> Result<Option<Json>, SchemaError> {
    match (value, kind) {
        (Json::Null, _) => Ok(None),
        (Json::String(s), _) => string_to_primitive(s, kind, key),
        (Json::Bool(b), ValueKind::Bool) => Ok(Some(Json::Bool(*b))),
        (Json::Bool(b), _) => string_to_primitive(&b.to_string(), kind, key),
        (Json::Number(n), ValueKind::Int) => Ok(n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(|i| json!(i))),
        (Json::Number(n), ValueKind::Float) => Ok(n.as_f64().map(|f| json!(f))),
        (Json::Number(n), _) => string_to_primitive(&n.to_string(), kind, key),
        (other, _) => Err(SchemaError::value(
            key,
            format!("expected a primitive, got {}", other),
        )),
    }
}

/// Convert a known structured primitive to `kind`.
pub(crate) fn value_to_primitive(
    value: &Value,
    kind: ValueKind,
    key: &str,
) -> Result<Option<Json>, SchemaError> {
    match value {
        Value::Null | Value::Unknown => Ok(None),
        Value::Bool(b) => json_to_primitive(&Json::Bool(*b), kind, key),
        Value::Number(n) => json_to_primitive(&Json::Number(n.clone()), kind, key),
        Value::String(s) => string_to_primitive(s, kind, key),
        _ => Err(SchemaError::value(key, "expected a primitive value")),
    }
}

/// Reads a flatmap, such as a state's attributes.
pub struct MapFieldReader<'a> {
    schema: &'a SchemaMap,
    map: &'a FlatMap,
}

impl<'a> MapFieldReader<'a> {
    /// A reader over `map`.
    pub fn new(schema: &'a SchemaMap, map: &'a FlatMap) -> Self {
        Self { schema, map }
    }

    fn read_primitive(
        &self,
        address: &AttributePath,
        kind: ValueKind,
    ) -> Result<FieldReadResult, SchemaError> {
        let key = address.to_flatmap_key();
        match self.map.get(&key) {
            None => Ok(FieldReadResult::missing()),
            Some(raw) if raw == UNKNOWN_VARIABLE_VALUE => Ok(FieldReadResult::computed()),
            Some(raw) => Ok(FieldReadResult {
                value: string_to_primitive(raw, kind, &key)?,
                exists: true,
                ..FieldReadResult::default()
            }),
        }
    }

    fn read_set(
        &self,
        address: &AttributePath,
        schema: &Schema,
    ) -> Result<FieldReadResult, SchemaError> {
        let count = self.read_count(address)?;
        if count.computed || count_of(&count) == 0 {
            return Ok(FieldReadResult {
                value: Some(json!([])),
                exists: count.exists,
                computed: count.computed,
                ..FieldReadResult::default()
            });
        }
        let key = address.to_flatmap_key();
        let mut set = Set::new(schema.set_hash_func());
        for segment in element_segments(self.map, &key, "#") {
            let raw = self.read_field(&address.hash(&segment))?;
            if raw.exists {
                set.add(raw.value.unwrap_or(Json::Null));
            }
        }
        Ok(FieldReadResult::known(set.into()))
    }

    fn read_map(
        &self,
        address: &AttributePath,
        schema: &Schema,
    ) -> Result<FieldReadResult, SchemaError> {
        let key = address.to_flatmap_key();
        let prefix = format!("{}.", key);
        if self.map.get(&format!("{}%", prefix)).map(String::as_str) == Some(UNKNOWN_VARIABLE_VALUE)
        {
            return Ok(FieldReadResult::computed());
        }
        let kind = map_elem_kind(schema);
        let mut exists = self.map.get(&key).map(|v| v.is_empty()).unwrap_or(false);
        let mut out = serde_json::Map::new();
        for (k, v) in self.map.range(prefix.clone()..) {
            if !k.starts_with(&prefix) {
                break;
            }
            exists = true;
            let rest = &k[prefix.len()..];
            if rest == "%" || rest == "#" {
                continue;
            }
            out.insert(
                rest.to_string(),
                string_to_primitive(v, kind, k)?.unwrap_or(Json::Null),
            );
        }
        Ok(FieldReadResult {
            value: exists.then_some(Json::Object(out)),
            exists,
            ..FieldReadResult::default()
        })
    }
}

impl FieldReader for MapFieldReader<'_> {
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
        match self.map.get(&key) {
            None => Ok(FieldReadResult::missing()),
            Some(raw) if raw == UNKNOWN_VARIABLE_VALUE => Ok(FieldReadResult::computed()),
            Some(raw) => raw
                .parse::<u64>()
                .map(|n| FieldReadResult::known(json!(n)))
                .map_err(|_| SchemaError::value(key.clone(), format!("invalid count {:?}", raw))),
        }
    }
}
