//! Wire encodings of structured values.
//!
//! `DynamicValue` payloads are msgpack (preferred) or JSON encodings of a
//! value of a known [`ValueType`]. In msgpack, unknown values are the
//! extension type 0 with a single zero byte, and attributes of the dynamic
//! pseudo-type are a two element array of `[type-json, value]`.

use crate::error::ValueError;
use crate::path::AttributePath;
use crate::value::{parse_number, Value, ValueType};
use serde::de::{self, Deserialize, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::ser::{Error as _, Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// rmp-serde's magic newtype name for msgpack extension types.
const MSGPACK_EXT_STRUCT_NAME: &str = "_ExtStruct";

/// Extension type code used for unknown values.
const UNKNOWN_EXT_TYPE: i8 = 0;

/// Encode `value` of type `ty` as msgpack.
pub fn encode_msgpack(value: &Value, ty: &ValueType) -> Result<Vec<u8>, ValueError> {
    let mut buf = Vec::new();
    let mut serializer = rmp_serde::Serializer::new(&mut buf);
    Typed { value, ty }.serialize(&mut serializer)?;
    Ok(buf)
}

/// Decode a msgpack payload as a value of type `ty`.
pub fn decode_msgpack(bytes: &[u8], ty: &ValueType) -> Result<Value, ValueError> {
    let raw: Raw = rmp_serde::from_slice(bytes)?;
    raw_to_value(raw, ty, &AttributePath::new())
}

/// Decode a JSON payload as a value of type `ty`.
pub fn decode_json(bytes: &[u8], ty: &ValueType) -> Result<Value, ValueError> {
    let json: serde_json::Value = serde_json::from_slice(bytes)?;
    value_from_json(&json, ty)
}

/// Encode `value` as JSON. Unknown values cannot be represented.
pub fn encode_json(value: &Value) -> Result<Vec<u8>, ValueError> {
    Ok(serde_json::to_vec(&value_to_json(value)?)?)
}

/// Convert a JSON document into a value of type `ty`.
pub fn value_from_json(json: &serde_json::Value, ty: &ValueType) -> Result<Value, ValueError> {
    json_to_value(json, ty, &AttributePath::new())
}

fn json_to_value(
    json: &serde_json::Value,
    ty: &ValueType,
    path: &AttributePath,
) -> Result<Value, ValueError> {
    use serde_json::Value as Json;
    if json.is_null() {
        return Ok(Value::Null);
    }
    let value = match (ty, json) {
        (ValueType::Dynamic, Json::Object(map)) if map.contains_key("type") => {
            let inner_ty = ValueType::from_json(&map["type"])?;
            let inner = map.get("value").unwrap_or(&Json::Null);
            return json_to_value(inner, &inner_ty, path);
        },
        (ValueType::Dynamic, other) => return Ok(untyped_json(other)),
        (ValueType::Bool, Json::Bool(b)) => Value::Bool(*b),
        (ValueType::Number, Json::Number(n)) => Value::Number(n.clone()),
        (ValueType::String, Json::String(s)) => Value::String(s.clone()),
        (ValueType::List(element), Json::Array(items)) => Value::List(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| json_to_value(item, element, &path.index(i)))
                .collect::<Result<_, _>>()?,
        ),
        (ValueType::Set(element), Json::Array(items)) => Value::Set(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| json_to_value(item, element, &path.index(i)))
                .collect::<Result<_, _>>()?,
        ),
        (ValueType::Map(element), Json::Object(map)) => Value::Map(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), json_to_value(v, element, &path.key(k.clone()))?)))
                .collect::<Result<_, ValueError>>()?,
        ),
        (ValueType::Object(attrs), Json::Object(map)) => {
            if let Some(extra) = map.keys().find(|k| !attrs.contains_key(*k)) {
                return Err(ValueError::conversion(
                    path,
                    format!("unsupported attribute {:?}", extra),
                ));
            }
            let mut out = BTreeMap::new();
            for (name, attr_ty) in attrs {
                let v = match map.get(name) {
                    Some(v) => json_to_value(v, attr_ty, &path.attr(name.clone()))?,
                    None => Value::Null,
                };
                out.insert(name.clone(), v);
            }
            Value::Object(out)
        },
        // Legacy JSON sometimes carries primitives in the wrong representation.
        (ty, other) if ty.is_primitive() => ty.coerce_at(untyped_json(other), path)?,
        (ty, _) => {
            return Err(ValueError::conversion(
                path,
                format!("{} required", ty.friendly_name()),
            ))
        },
    };
    Ok(value)
}

fn untyped_json(json: &serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Number(n.clone()),
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::List(items.iter().map(untyped_json).collect()),
        Json::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), untyped_json(v)))
                .collect(),
        ),
    }
}

/// Convert a wholly-known value into JSON.
pub fn value_to_json(value: &Value) -> Result<serde_json::Value, ValueError> {
    use serde_json::Value as Json;
    Ok(match value {
        Value::Null => Json::Null,
        Value::Unknown => return Err(ValueError::UnknownValue("JSON")),
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => Json::Number(n.clone()),
        Value::String(s) => Json::String(s.clone()),
        Value::List(items) | Value::Set(items) => {
            Json::Array(items.iter().map(value_to_json).collect::<Result<_, _>>()?)
        },
        Value::Map(entries) | Value::Object(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), value_to_json(v)?)))
                .collect::<Result<_, ValueError>>()?,
        ),
    })
}

/// A value paired with its type, serialized in the msgpack wire layout.
struct Typed<'a> {
    value: &'a Value,
    ty: &'a ValueType,
}

/// Serializes as a msgpack bin.
struct RawBytes<'a>(&'a [u8]);

impl Serialize for RawBytes<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.0)
    }
}

impl Serialize for Typed<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match (self.value, self.ty) {
            (Value::Unknown, _) => serializer.serialize_newtype_struct(
                MSGPACK_EXT_STRUCT_NAME,
                &(UNKNOWN_EXT_TYPE, RawBytes(&[0])),
            ),
            (Value::Null, _) => serializer.serialize_unit(),
            (value, ValueType::Dynamic) => {
                let ty = value.infer_type();
                let type_json = serde_json::to_vec(&ty.to_json()).map_err(S::Error::custom)?;
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element(&RawBytes(&type_json))?;
                seq.serialize_element(&Typed { value, ty: &ty })?;
                seq.end()
            },
            (Value::Bool(b), _) => serializer.serialize_bool(*b),
            (Value::Number(n), _) => {
                if let Some(i) = n.as_i64() {
                    serializer.serialize_i64(i)
                } else if let Some(u) = n.as_u64() {
                    serializer.serialize_u64(u)
                } else {
                    serializer.serialize_f64(n.as_f64().unwrap_or_default())
                }
            },
            (Value::String(s), _) => serializer.serialize_str(s),
            (Value::List(items) | Value::Set(items), ty) => {
                let element = ty.element_type().unwrap_or(&ValueType::Dynamic);
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&Typed {
                        value: item,
                        ty: element,
                    })?;
                }
                seq.end()
            },
            (Value::Map(entries) | Value::Object(entries), ValueType::Object(attrs)) => {
                let mut map = serializer.serialize_map(Some(attrs.len()))?;
                for (name, attr_ty) in attrs {
                    let value = entries.get(name).unwrap_or(&Value::Null);
                    map.serialize_entry(name, &Typed { value, ty: attr_ty })?;
                }
                map.end()
            },
            (Value::Map(entries) | Value::Object(entries), ty) => {
                let element = ty.element_type().unwrap_or(&ValueType::Dynamic);
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, &Typed { value, ty: element })?;
                }
                map.end()
            },
        }
    }
}

/// Untyped msgpack document, typed afterwards by [`raw_to_value`].
#[derive(Debug, Clone, PartialEq)]
enum Raw {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bin(Vec<u8>),
    Array(Vec<Raw>),
    Map(Vec<(Raw, Raw)>),
    Unknown,
}

impl<'de> Deserialize<'de> for Raw {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RawVisitor)
    }
}

struct RawVisitor;

impl<'de> Visitor<'de> for RawVisitor {
    type Value = Raw;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a msgpack value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Raw, E> {
        Ok(Raw::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Raw, E> {
        Ok(Raw::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Raw, E> {
        Ok(Raw::UInt(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Raw, E> {
        Ok(Raw::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Raw, E> {
        Ok(Raw::Str(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Raw, E> {
        Ok(Raw::Str(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Raw, E> {
        Ok(Raw::Bin(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Raw, E> {
        Ok(Raw::Bin(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Raw, E> {
        Ok(Raw::Nil)
    }

    fn visit_none<E: de::Error>(self) -> Result<Raw, E> {
        Ok(Raw::Nil)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Raw, D::Error> {
        Raw::deserialize(deserializer)
    }

    fn visit_newtype_struct<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Raw, D::Error> {
        let (tag, _data): (i8, IgnoredAny) = Deserialize::deserialize(deserializer)?;
        if tag == UNKNOWN_EXT_TYPE {
            Ok(Raw::Unknown)
        } else {
            Err(de::Error::custom(format!(
                "unsupported msgpack extension type {}",
                tag
            )))
        }
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Raw, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Raw>()? {
            items.push(item);
        }
        Ok(Raw::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Raw, A::Error> {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((k, v)) = map.next_entry::<Raw, Raw>()? {
            entries.push((k, v));
        }
        Ok(Raw::Map(entries))
    }
}

fn raw_key(raw: Raw, path: &AttributePath) -> Result<String, ValueError> {
    match raw {
        Raw::Str(s) => Ok(s),
        other => Err(ValueError::conversion(
            path,
            format!("map keys must be strings, found {:?}", other),
        )),
    }
}

fn raw_to_value(raw: Raw, ty: &ValueType, path: &AttributePath) -> Result<Value, ValueError> {
    match raw {
        Raw::Unknown => return Ok(Value::Unknown),
        Raw::Nil => return Ok(Value::Null),
        _ => {},
    }
    match ty {
        ValueType::Dynamic => match raw {
            Raw::Array(mut parts) if parts.len() == 2 => {
                let value = parts.pop().unwrap_or(Raw::Nil);
                let type_json: serde_json::Value = match parts.pop() {
                    Some(Raw::Bin(bytes)) => serde_json::from_slice(&bytes)?,
                    Some(Raw::Str(s)) => serde_json::from_str(&s)?,
                    other => {
                        return Err(ValueError::conversion(
                            path,
                            format!("invalid dynamic type marker {:?}", other),
                        ))
                    },
                };
                let inner_ty = ValueType::from_json(&type_json)?;
                raw_to_value(value, &inner_ty, path)
            },
            other => Err(ValueError::conversion(
                path,
                format!("dynamic value must be [type, value], found {:?}", other),
            )),
        },
        ValueType::Bool => match raw {
            Raw::Bool(b) => Ok(Value::Bool(b)),
            other => Err(raw_mismatch(path, ty, &other)),
        },
        ValueType::Number => match raw {
            Raw::Int(i) => Ok(Value::int(i)),
            Raw::UInt(u) => Ok(Value::Number(u.into())),
            Raw::Float(f) => Ok(Value::float(f)),
            Raw::Str(s) => parse_number(&s)
                .map(Value::Number)
                .ok_or_else(|| ValueError::conversion(path, format!("invalid number {:?}", s))),
            other => Err(raw_mismatch(path, ty, &other)),
        },
        ValueType::String => match raw {
            Raw::Str(s) => Ok(Value::String(s)),
            other => Err(raw_mismatch(path, ty, &other)),
        },
        ValueType::List(element) | ValueType::Set(element) => match raw {
            Raw::Array(items) => {
                let items = items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| raw_to_value(item, element, &path.index(i)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if matches!(ty, ValueType::Set(_)) {
                    Value::Set(items)
                } else {
                    Value::List(items)
                })
            },
            other => Err(raw_mismatch(path, ty, &other)),
        },
        ValueType::Map(element) => match raw {
            Raw::Map(entries) => {
                let mut out = BTreeMap::new();
                for (k, v) in entries {
                    let key = raw_key(k, path)?;
                    let value = raw_to_value(v, element, &path.key(key.clone()))?;
                    out.insert(key, value);
                }
                Ok(Value::Map(out))
            },
            other => Err(raw_mismatch(path, ty, &other)),
        },
        ValueType::Object(attrs) => match raw {
            Raw::Map(entries) => {
                let mut out: BTreeMap<String, Value> =
                    attrs.keys().map(|k| (k.clone(), Value::Null)).collect();
                for (k, v) in entries {
                    let key = raw_key(k, path)?;
                    let attr_ty = attrs.get(&key).ok_or_else(|| {
                        ValueError::conversion(path, format!("unsupported attribute {:?}", key))
                    })?;
                    let value = raw_to_value(v, attr_ty, &path.attr(key.clone()))?;
                    out.insert(key, value);
                }
                Ok(Value::Object(out))
            },
            other => Err(raw_mismatch(path, ty, &other)),
        },
    }
}

fn raw_mismatch(path: &AttributePath, ty: &ValueType, found: &Raw) -> ValueError {
    ValueError::conversion(
        path,
        format!("{} required, found {:?}", ty.friendly_name(), found),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_type() -> ValueType {
        ValueType::object([
            ("id", ValueType::String),
            ("count", ValueType::Number),
            ("enabled", ValueType::Bool),
            ("tags", ValueType::map(ValueType::String)),
            ("ports", ValueType::set(ValueType::Number)),
            (
                "rule",
                ValueType::list(ValueType::object([("cidr", ValueType::String)])),
            ),
        ])
    }

    #[test]
    fn test_msgpack_round_trip_with_unknowns() {
        let ty = sample_type();
        let value = Value::object([
            ("id", Value::Unknown),
            ("count", Value::int(3)),
            ("enabled", Value::Bool(true)),
            ("tags", Value::Map([("a".to_string(), Value::string("b"))].into())),
            ("ports", Value::Set(vec![Value::int(80), Value::int(443)])),
            (
                "rule",
                Value::List(vec![Value::object([("cidr", Value::Unknown)])]),
            ),
        ]);
        let bytes = encode_msgpack(&value, &ty).unwrap();
        assert_eq!(decode_msgpack(&bytes, &ty).unwrap(), value);
    }

    #[test]
    fn test_unknown_is_fixext_zero() {
        let bytes = encode_msgpack(&Value::Unknown, &ValueType::String).unwrap();
        assert_eq!(bytes, vec![0xd4, 0x00, 0x00]);
    }

    #[test]
    fn test_null_object_and_missing_attributes() {
        let ty = sample_type();
        let bytes = encode_msgpack(&Value::Null, &ty).unwrap();
        assert_eq!(bytes, vec![0xc0]);
        assert_eq!(decode_msgpack(&bytes, &ty).unwrap(), Value::Null);

        // Attributes missing from the value are written as nil.
        let bytes = encode_msgpack(&Value::object([("id", Value::string("x"))]), &ty).unwrap();
        let decoded = decode_msgpack(&bytes, &ty).unwrap();
        assert_eq!(decoded.get_attr("id"), Some(&Value::string("x")));
        assert_eq!(decoded.get_attr("tags"), Some(&Value::Null));
    }

    #[test]
    fn test_msgpack_from_untyped_encoder() {
        // Numbers-as-strings and plain maps, as produced by other encoders.
        let bytes = rmp_serde::to_vec(&json!({"id": "a", "count": "12"})).unwrap();
        let ty = ValueType::object([("id", ValueType::String), ("count", ValueType::Number)]);
        let decoded = decode_msgpack(&bytes, &ty).unwrap();
        assert_eq!(decoded.get_attr("count"), Some(&Value::int(12)));
    }

    #[test]
    fn test_dynamic_round_trip() {
        let ty = ValueType::object([("anything", ValueType::Dynamic)]);
        let value = Value::object([(
            "anything",
            Value::List(vec![Value::string("a"), Value::string("b")]),
        )]);
        let bytes = encode_msgpack(&value, &ty).unwrap();
        assert_eq!(decode_msgpack(&bytes, &ty).unwrap(), value);
    }

    #[test]
    fn test_json_decoding() {
        let ty = sample_type();
        let doc = json!({
            "id": "abc",
            "count": 2,
            "ports": [22],
            "rule": [{"cidr": "10.0.0.0/8"}]
        });
        let value = decode_json(doc.to_string().as_bytes(), &ty).unwrap();
        assert_eq!(value.get_attr("enabled"), Some(&Value::Null));
        assert_eq!(value.get_attr("ports"), Some(&Value::Set(vec![Value::int(22)])));

        let bad = json!({"nope": 1});
        assert!(decode_json(bad.to_string().as_bytes(), &ty).is_err());
    }

    #[test]
    fn test_json_encoding_rejects_unknown() {
        let value = Value::object([("id", Value::Unknown)]);
        assert!(matches!(
            encode_json(&value),
            Err(ValueError::UnknownValue(_))
        ));
        let known = Value::object([("id", Value::string("x"))]);
        assert_eq!(encode_json(&known).unwrap(), br#"{"id":"x"}"#.to_vec());
    }
}
