//! Structured values and their types.
//!
//! [`Value`] is the strictly-typed structural value exchanged over the wire,
//! and [`ValueType`] describes its shape. Values are untyped trees; a type is
//! attached at the codec boundary and by [`ValueType::coerce`].

use crate::error::ValueError;
use crate::path::{AttributePath, PathStep};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Number;
use std::collections::BTreeMap;

/// A structured value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// The null value of any type.
    #[default]
    Null,
    /// A value that is not known until apply.
    Unknown,
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(Number),
    /// A string.
    String(String),
    /// An ordered list.
    List(Vec<Value>),
    /// A set, kept in a deterministic order.
    Set(Vec<Value>),
    /// A map with string keys and elements of one type.
    Map(BTreeMap<String, Value>),
    /// An object with a fixed set of typed attributes.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// A string value.
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// An integer value.
    pub fn int(i: i64) -> Self {
        Value::Number(Number::from(i))
    }

    /// A floating point value. Non-finite numbers become null.
    pub fn float(f: f64) -> Self {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }

    /// An object value from attribute pairs.
    pub fn object<K, I>(attrs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(attrs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Whether this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this is [`Value::Unknown`].
    pub fn is_unknown(&self) -> bool {
        matches!(self, Value::Unknown)
    }

    /// Whether this value is known at the top level.
    pub fn is_known(&self) -> bool {
        !self.is_unknown()
    }

    /// Whether this value contains no unknown values at any depth.
    pub fn is_wholly_known(&self) -> bool {
        match self {
            Value::Unknown => false,
            Value::List(items) | Value::Set(items) => items.iter().all(Value::is_wholly_known),
            Value::Map(entries) | Value::Object(entries) => {
                entries.values().all(Value::is_wholly_known)
            },
            _ => true,
        }
    }

    /// The string content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The boolean content, if this is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The number content, if this is a number.
    pub fn as_number(&self) -> Option<&Number> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    /// Elements of a list or set.
    pub fn elements(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Entries of a map or object.
    pub fn entries(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) | Value::Object(entries) => Some(entries),
            _ => None,
        }
    }

    /// Mutable entries of a map or object.
    pub fn entries_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) | Value::Object(entries) => Some(entries),
            _ => None,
        }
    }

    /// An attribute of an object (or an element of a map).
    pub fn get_attr(&self, name: &str) -> Option<&Value> {
        self.entries().and_then(|entries| entries.get(name))
    }

    /// Walk a path of attribute, key and index steps.
    ///
    /// Hash steps cannot be resolved without a schema and yield `None`.
    pub fn get_path(&self, path: &AttributePath) -> Option<&Value> {
        let mut current = self;
        for step in path.steps() {
            current = match (current, step) {
                (Value::Object(entries) | Value::Map(entries), PathStep::Attr(name))
                | (Value::Object(entries) | Value::Map(entries), PathStep::Key(name)) => {
                    entries.get(name)?
                },
                (Value::List(items) | Value::Set(items), PathStep::Index(i)) => items.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Replace the value at `path`. Returns false when the path does not exist.
    pub fn set_path(&mut self, path: &AttributePath, value: Value) -> bool {
        let mut current = self;
        for step in path.steps() {
            current = match (current, step) {
                (Value::Object(entries) | Value::Map(entries), PathStep::Attr(name))
                | (Value::Object(entries) | Value::Map(entries), PathStep::Key(name)) => {
                    match entries.get_mut(name) {
                        Some(v) => v,
                        None => return false,
                    }
                },
                (Value::List(items) | Value::Set(items), PathStep::Index(i)) => {
                    match items.get_mut(*i) {
                        Some(v) => v,
                        None => return false,
                    }
                },
                _ => return false,
            };
        }
        *current = value;
        true
    }

    /// Best-effort type of a known value, used for dynamically-typed attributes.
    pub fn infer_type(&self) -> ValueType {
        match self {
            Value::Null | Value::Unknown => ValueType::Dynamic,
            Value::Bool(_) => ValueType::Bool,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::List(items) => ValueType::List(Box::new(common_type(items))),
            Value::Set(items) => ValueType::Set(Box::new(common_type(items))),
            Value::Map(entries) => ValueType::Map(Box::new(common_type(entries.values()))),
            Value::Object(entries) => ValueType::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.infer_type()))
                    .collect(),
            ),
        }
    }
}

fn common_type<'a>(values: impl IntoIterator<Item = &'a Value>) -> ValueType {
    values
        .into_iter()
        .map(Value::infer_type)
        .find(|ty| *ty != ValueType::Dynamic)
        .unwrap_or(ValueType::Dynamic)
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// The type of a structured value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    /// Booleans.
    Bool,
    /// Arbitrary precision numbers (integers and floats).
    Number,
    /// Strings.
    String,
    /// Ordered lists of one element type.
    List(Box<ValueType>),
    /// Sets of one element type.
    Set(Box<ValueType>),
    /// String-keyed maps of one element type.
    Map(Box<ValueType>),
    /// Objects with named, typed attributes.
    Object(BTreeMap<String, ValueType>),
    /// Any type, decided at runtime.
    Dynamic,
}

impl ValueType {
    /// A list type.
    pub fn list(element: ValueType) -> Self {
        ValueType::List(Box::new(element))
    }

    /// A set type.
    pub fn set(element: ValueType) -> Self {
        ValueType::Set(Box::new(element))
    }

    /// A map type.
    pub fn map(element: ValueType) -> Self {
        ValueType::Map(Box::new(element))
    }

    /// An object type from attribute pairs.
    pub fn object<K, I>(attrs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, ValueType)>,
    {
        ValueType::Object(attrs.into_iter().map(|(k, t)| (k.into(), t)).collect())
    }

    /// Whether this is a primitive type.
    pub fn is_primitive(&self) -> bool {
        matches!(self, ValueType::Bool | ValueType::Number | ValueType::String)
    }

    /// Element type of a list, set or map.
    pub fn element_type(&self) -> Option<&ValueType> {
        match self {
            ValueType::List(t) | ValueType::Set(t) | ValueType::Map(t) => Some(t),
            _ => None,
        }
    }

    /// Attribute types of an object.
    pub fn attribute_types(&self) -> Option<&BTreeMap<String, ValueType>> {
        match self {
            ValueType::Object(attrs) => Some(attrs),
            _ => None,
        }
    }

    /// Human-readable name used in error messages.
    pub fn friendly_name(&self) -> String {
        match self {
            ValueType::Bool => "bool".to_string(),
            ValueType::Number => "number".to_string(),
            ValueType::String => "string".to_string(),
            ValueType::List(t) => format!("list of {}", t.friendly_name()),
            ValueType::Set(t) => format!("set of {}", t.friendly_name()),
            ValueType::Map(t) => format!("map of {}", t.friendly_name()),
            ValueType::Object(_) => "object".to_string(),
            ValueType::Dynamic => "dynamic".to_string(),
        }
    }

    /// Convert `value` to conform to this type.
    ///
    /// Primitive values are converted between each other the way the legacy
    /// type system does (`"1"` to `1`, `true` to `"true"`), lists and sets
    /// convert into each other, maps and objects convert into each other, and
    /// object attributes missing from the value become null.
    pub fn coerce(&self, value: Value) -> Result<Value, ValueError> {
        self.coerce_at(value, &AttributePath::new())
    }

    pub(crate) fn coerce_at(&self, value: Value, path: &AttributePath) -> Result<Value, ValueError> {
        if matches!(value, Value::Null | Value::Unknown) || *self == ValueType::Dynamic {
            return Ok(value);
        }
        match self {
            ValueType::Bool => match value {
                Value::Bool(_) => Ok(value),
                Value::String(s) => match s.as_str() {
                    "true" | "1" => Ok(Value::Bool(true)),
                    "false" | "0" => Ok(Value::Bool(false)),
                    _ => Err(ValueError::conversion(
                        path,
                        format!("a bool is required, got {:?}", s),
                    )),
                },
                other => Err(mismatch(path, self, &other)),
            },
            ValueType::Number => match value {
                Value::Number(_) => Ok(value),
                Value::String(s) => parse_number(&s).map(Value::Number).ok_or_else(|| {
                    ValueError::conversion(path, format!("a number is required, got {:?}", s))
                }),
                other => Err(mismatch(path, self, &other)),
            },
            ValueType::String => match value {
                Value::String(_) => Ok(value),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                other => Err(mismatch(path, self, &other)),
            },
            ValueType::List(element) => match value {
                Value::List(items) | Value::Set(items) => items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| element.coerce_at(item, &path.index(i)))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List),
                other => Err(mismatch(path, self, &other)),
            },
            ValueType::Set(element) => match value {
                Value::List(items) | Value::Set(items) => {
                    let mut out: Vec<Value> = Vec::with_capacity(items.len());
                    for (i, item) in items.into_iter().enumerate() {
                        let item = element.coerce_at(item, &path.index(i))?;
                        if !out.contains(&item) || !item.is_wholly_known() {
                            out.push(item);
                        }
                    }
                    Ok(Value::Set(out))
                },
                other => Err(mismatch(path, self, &other)),
            },
            ValueType::Map(element) => match value {
                Value::Map(entries) | Value::Object(entries) => entries
                    .into_iter()
                    .map(|(k, v)| {
                        let v = element.coerce_at(v, &path.key(k.clone()))?;
                        Ok((k, v))
                    })
                    .collect::<Result<BTreeMap<_, _>, ValueError>>()
                    .map(Value::Map),
                other => Err(mismatch(path, self, &other)),
            },
            ValueType::Object(attrs) => match value {
                Value::Object(mut entries) | Value::Map(mut entries) => {
                    if let Some(extra) = entries.keys().find(|k| !attrs.contains_key(*k)) {
                        return Err(ValueError::conversion(
                            path,
                            format!("unsupported attribute {:?}", extra),
                        ));
                    }
                    let mut out = BTreeMap::new();
                    for (name, ty) in attrs {
                        let v = entries.remove(name).unwrap_or(Value::Null);
                        out.insert(name.clone(), ty.coerce_at(v, &path.attr(name.clone()))?);
                    }
                    Ok(Value::Object(out))
                },
                other => Err(mismatch(path, self, &other)),
            },
            ValueType::Dynamic => Ok(value),
        }
    }

    /// The JSON type description used on the wire, e.g. `["list","string"]`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            ValueType::Bool => json!("bool"),
            ValueType::Number => json!("number"),
            ValueType::String => json!("string"),
            ValueType::Dynamic => json!("dynamic"),
            ValueType::List(t) => json!(["list", t.to_json()]),
            ValueType::Set(t) => json!(["set", t.to_json()]),
            ValueType::Map(t) => json!(["map", t.to_json()]),
            ValueType::Object(attrs) => {
                let attrs: serde_json::Map<String, serde_json::Value> =
                    attrs.iter().map(|(k, t)| (k.clone(), t.to_json())).collect();
                json!(["object", attrs])
            },
        }
    }

    /// Parse a JSON type description.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, ValueError> {
        use serde_json::Value as Json;
        match json {
            Json::String(name) => match name.as_str() {
                "bool" => Ok(ValueType::Bool),
                "number" => Ok(ValueType::Number),
                "string" => Ok(ValueType::String),
                "dynamic" => Ok(ValueType::Dynamic),
                other => Err(ValueError::InvalidType(format!(
                    "unknown primitive type {:?}",
                    other
                ))),
            },
            Json::Array(parts) if parts.len() == 2 => {
                let kind = parts[0].as_str().unwrap_or_default();
                match kind {
                    "list" => Ok(ValueType::list(Self::from_json(&parts[1])?)),
                    "set" => Ok(ValueType::set(Self::from_json(&parts[1])?)),
                    "map" => Ok(ValueType::map(Self::from_json(&parts[1])?)),
                    "object" => {
                        let attrs = parts[1].as_object().ok_or_else(|| {
                            ValueError::InvalidType("object attributes must be a map".into())
                        })?;
                        attrs
                            .iter()
                            .map(|(k, v)| Ok((k.clone(), Self::from_json(v)?)))
                            .collect::<Result<BTreeMap<_, _>, ValueError>>()
                            .map(ValueType::Object)
                    },
                    other => Err(ValueError::InvalidType(format!(
                        "unknown type constructor {:?}",
                        other
                    ))),
                }
            },
            other => Err(ValueError::InvalidType(other.to_string())),
        }
    }
}

impl Serialize for ValueType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ValueType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        ValueType::from_json(&json).map_err(serde::de::Error::custom)
    }
}

fn mismatch(path: &AttributePath, expected: &ValueType, found: &Value) -> ValueError {
    let found = match found {
        Value::Null => "null",
        Value::Unknown => "unknown",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::List(_) => "list",
        Value::Set(_) => "set",
        Value::Map(_) => "map",
        Value::Object(_) => "object",
    };
    ValueError::conversion(
        path,
        format!("{} required, found {}", expected.friendly_name(), found),
    )
}

/// Parse a decimal string into a number, preferring integers.
pub(crate) fn parse_number(s: &str) -> Option<Number> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Number::from(i));
    }
    if let Ok(u) = s.parse::<u64>() {
        return Some(Number::from(u));
    }
    s.parse::<f64>().ok().and_then(Number::from_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wholly_known() {
        let v = Value::object([("a", Value::List(vec![Value::int(1), Value::Unknown]))]);
        assert!(v.is_known());
        assert!(!v.is_wholly_known());
        assert!(Value::object([("a", Value::string("x"))]).is_wholly_known());
    }

    #[test]
    fn test_coerce_primitives() {
        assert_eq!(
            ValueType::Number.coerce(Value::string("42")).unwrap(),
            Value::int(42)
        );
        assert_eq!(
            ValueType::Bool.coerce(Value::string("true")).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            ValueType::String.coerce(Value::int(7)).unwrap(),
            Value::string("7")
        );
        assert!(ValueType::Number.coerce(Value::string("abc")).is_err());
        assert_eq!(
            ValueType::Number.coerce(Value::Unknown).unwrap(),
            Value::Unknown
        );
    }

    #[test]
    fn test_coerce_object_fills_missing_and_rejects_extra() {
        let ty = ValueType::object([("a", ValueType::String), ("b", ValueType::Number)]);
        let out = ty.coerce(Value::object([("a", Value::string("x"))])).unwrap();
        assert_eq!(
            out,
            Value::object([("a", Value::string("x")), ("b", Value::Null)])
        );

        let err = ty
            .coerce(Value::object([("c", Value::Bool(true))]))
            .unwrap_err();
        assert!(err.to_string().contains("unsupported attribute"));
    }

    #[test]
    fn test_coerce_set_dedupes() {
        let ty = ValueType::set(ValueType::String);
        let out = ty
            .coerce(Value::List(vec![
                Value::string("a"),
                Value::string("b"),
                Value::string("a"),
            ]))
            .unwrap();
        assert_eq!(out, Value::Set(vec![Value::string("a"), Value::string("b")]));
    }

    #[test]
    fn test_coerce_error_path() {
        let ty = ValueType::object([("ports", ValueType::list(ValueType::Number))]);
        let err = ty
            .coerce(Value::object([(
                "ports",
                Value::List(vec![Value::int(1), Value::Bool(true)]),
            )]))
            .unwrap_err();
        assert_eq!(err.to_string(), "ports.1: number required, found bool");
    }

    #[test]
    fn test_type_json() {
        let ty = ValueType::object([
            ("name", ValueType::String),
            ("tags", ValueType::map(ValueType::String)),
            ("rules", ValueType::list(ValueType::object([("port", ValueType::Number)]))),
        ]);
        let json = ty.to_json();
        assert_eq!(json[0], "object");
        assert_eq!(json[1]["tags"], serde_json::json!(["map", "string"]));
        assert_eq!(ValueType::from_json(&json).unwrap(), ty);

        let encoded = serde_json::to_string(&ValueType::set(ValueType::Bool)).unwrap();
        assert_eq!(encoded, r#"["set","bool"]"#);
        let decoded: ValueType = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, ValueType::set(ValueType::Bool));

        assert!(ValueType::from_json(&serde_json::json!("tuple")).is_err());
    }

    #[test]
    fn test_get_and_set_path() {
        let mut v = Value::object([(
            "block",
            Value::List(vec![Value::object([("name", Value::string("a"))])]),
        )]);
        let path = AttributePath::root("block").index(0).attr("name");
        assert_eq!(v.get_path(&path), Some(&Value::string("a")));
        assert!(v.set_path(&path, Value::Null));
        assert_eq!(v.get_path(&path), Some(&Value::Null));
        assert!(!v.set_path(&AttributePath::root("block").index(4), Value::Null));
    }
}
