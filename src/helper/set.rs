//! Sets whose membership is decided by a hash function.

use crate::helper::resource::Resource;
use crate::helper::schema::{Elem, Schema, ValueKind};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Maps a set element to its identity.
pub type SchemaSetFunc = Arc<dyn Fn(&Json) -> i64 + Send + Sync>;

/// CRC-32 of a string, as a non-negative hash code.
pub fn hash_string(s: &str) -> i64 {
    i64::from(crc32fast::hash(s.as_bytes()))
}

/// Hash function for elements described by `schema`.
pub fn hash_schema(schema: &Schema) -> SchemaSetFunc {
    let schema = schema.clone();
    Arc::new(move |value: &Json| {
        let mut buf = String::new();
        serialize_value_for_hash(&mut buf, value, &schema);
        hash_string(&buf)
    })
}

/// Hash function for nested block elements.
///
/// Only configurable (required or optional) attributes contribute.
pub fn hash_resource(resource: &Resource) -> SchemaSetFunc {
    let resource = resource.clone();
    Arc::new(move |value: &Json| {
        let mut buf = String::new();
        serialize_resource_for_hash(&mut buf, value, &resource);
        hash_string(&buf)
    })
}

/// Shortest decimal form of `f`, switching to an exponent outside
/// `1e-4 <= |f| < 1e21` (`1e+21`, `1.5e-07`).
pub(crate) fn format_float(f: f64) -> String {
    if !f.is_finite() {
        return if f.is_nan() {
            "NaN".to_string()
        } else if f > 0.0 {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        };
    }
    let sci = format!("{:e}", f);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or_default()),
        None => return f.to_string(),
    };
    if f != 0.0 && (exp < -4 || exp >= 21) {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    } else {
        f.to_string()
    }
}

fn write_number(buf: &mut String, value: &Json, kind: ValueKind) {
    match (kind, value) {
        (ValueKind::Int, Json::Number(n)) => match n.as_i64() {
            Some(i) => buf.push_str(&i.to_string()),
            None => buf.push_str(&n.to_string()),
        },
        (ValueKind::Float, Json::Number(n)) => match n.as_f64() {
            Some(f) => buf.push_str(&format_float(f)),
            None => buf.push_str(&n.to_string()),
        },
        (_, Json::String(s)) => buf.push_str(s),
        (_, other) => buf.push_str(&other.to_string()),
    }
}

/// Write the canonical hash input of `value` into `buf`.
pub fn serialize_value_for_hash(buf: &mut String, value: &Json, schema: &Schema) {
    if value.is_null() {
        buf.push(';');
        return;
    }
    match schema.kind {
        ValueKind::Bool => {
            let truthy = match value {
                Json::Bool(b) => *b,
                Json::String(s) => s == "true" || s == "1",
                _ => false,
            };
            buf.push(if truthy { '1' } else { '0' });
        },
        ValueKind::Int | ValueKind::Float => write_number(buf, value, schema.kind),
        ValueKind::String => match value {
            Json::String(s) => buf.push_str(s),
            other => buf.push_str(&other.to_string()),
        },
        ValueKind::List | ValueKind::Set => {
            let (open, close) = if schema.kind == ValueKind::List {
                ('(', ')')
            } else {
                ('{', '}')
            };
            buf.push(open);
            if let Json::Array(items) = value {
                let items: Vec<&Json> = if schema.kind == ValueKind::Set {
                    let f = schema.set_hash_func();
                    let mut keyed: Vec<(i64, &Json)> = items.iter().map(|v| (f(v), v)).collect();
                    keyed.sort_by_key(|(code, _)| *code);
                    keyed.dedup_by_key(|(code, _)| *code);
                    keyed.into_iter().map(|(_, v)| v).collect()
                } else {
                    items.iter().collect()
                };
                for item in items {
                    serialize_member_for_hash(buf, item, schema.elem.as_ref());
                }
            }
            buf.push(close);
        },
        ValueKind::Map => {
            buf.push('[');
            if let Json::Object(entries) = value {
                // serde_json maps iterate in key order.
                for (k, v) in entries {
                    if v.is_null() {
                        continue;
                    }
                    buf.push_str(k);
                    buf.push(':');
                    match v {
                        Json::String(s) => buf.push_str(s),
                        other => buf.push_str(&other.to_string()),
                    }
                    buf.push(';');
                }
            }
            buf.push(']');
        },
    }
    buf.push(';');
}

fn serialize_member_for_hash(buf: &mut String, value: &Json, elem: Option<&Elem>) {
    match elem {
        Some(Elem::Block(resource)) => {
            buf.push('<');
            serialize_resource_for_hash(buf, value, resource);
            buf.push_str(">;");
        },
        Some(Elem::Nested(schema)) => serialize_value_for_hash(buf, value, schema),
        Some(Elem::Primitive(kind)) => serialize_value_for_hash(buf, value, &Schema::new(*kind)),
        None => serialize_value_for_hash(buf, value, &Schema::string()),
    }
}

/// Write the canonical hash input of a nested block element into `buf`.
pub fn serialize_resource_for_hash(buf: &mut String, value: &Json, resource: &Resource) {
    let Json::Object(entries) = value else {
        return;
    };
    for (name, schema) in resource.schema.iter() {
        if !(schema.required || schema.optional) {
            continue;
        }
        buf.push_str(name);
        buf.push(':');
        serialize_value_for_hash(buf, entries.get(name).unwrap_or(&Json::Null), schema);
    }
}

/// An unordered collection identified by hash code.
///
/// Elements with equal codes are the same member; adding one replaces the
/// other. Iteration is in ascending code order.
#[derive(Clone)]
pub struct Set {
    f: SchemaSetFunc,
    m: BTreeMap<i64, Json>,
}

impl fmt::Debug for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.m.iter()).finish()
    }
}

impl Set {
    /// An empty set using `f` as its hash function.
    pub fn new(f: SchemaSetFunc) -> Self {
        Self {
            f,
            m: BTreeMap::new(),
        }
    }

    /// A set holding `items`.
    pub fn from_items(f: SchemaSetFunc, items: impl IntoIterator<Item = Json>) -> Self {
        let mut set = Self::new(f);
        for item in items {
            set.add(item);
        }
        set
    }

    /// The hash code `item` would have in this set.
    pub fn hash_code(&self, item: &Json) -> i64 {
        (self.f)(item)
    }

    /// Add an element, returning its code.
    pub fn add(&mut self, item: Json) -> i64 {
        let code = self.hash_code(&item);
        self.m.insert(code, item);
        code
    }

    /// Remove an element.
    pub fn remove(&mut self, item: &Json) {
        let code = self.hash_code(item);
        self.m.remove(&code);
    }

    /// Whether an element with the same code is present.
    pub fn contains(&self, item: &Json) -> bool {
        self.m.contains_key(&self.hash_code(item))
    }

    /// The element stored under `code`.
    pub fn get(&self, code: i64) -> Option<&Json> {
        self.m.get(&code)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.m.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.m.is_empty()
    }

    /// Elements in code order.
    pub fn list(&self) -> Vec<Json> {
        self.m.values().cloned().collect()
    }

    /// Codes in ascending order.
    pub fn codes(&self) -> Vec<i64> {
        self.m.keys().copied().collect()
    }

    /// Iterate `(code, element)` pairs in code order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &Json)> {
        self.m.iter().map(|(code, v)| (*code, v))
    }

    /// Elements of `self` not in `other`.
    pub fn difference(&self, other: &Set) -> Set {
        self.filter(|code| !other.m.contains_key(code))
    }

    /// Elements in both sets.
    pub fn intersection(&self, other: &Set) -> Set {
        self.filter(|code| other.m.contains_key(code))
    }

    /// Elements in either set; `other` wins on equal codes.
    pub fn union(&self, other: &Set) -> Set {
        let mut out = self.clone();
        out.m
            .extend(other.m.iter().map(|(code, v)| (*code, v.clone())));
        out
    }

    /// Whether both sets hold the same codes.
    pub fn equal(&self, other: &Set) -> bool {
        self.m.keys().eq(other.m.keys())
    }

    fn filter(&self, keep: impl Fn(&i64) -> bool) -> Set {
        Set {
            f: self.f.clone(),
            m: self
                .m
                .iter()
                .filter(|(code, _)| keep(code))
                .map(|(code, v)| (*code, v.clone()))
                .collect(),
        }
    }
}

impl From<Set> for Json {
    fn from(set: Set) -> Self {
        Json::Array(set.m.into_values().collect())
    }
}
