//! Conversions between native types and their protobuf counterparts.
//!
//! The server module works with [`Value`]s, [`Diagnostic`]s and
//! [`Block`]s; these helpers translate them at the request boundary.

use std::collections::BTreeMap;

use crate::configschema::{Block, IdentitySchema, NestingMode, ResourceSchema};
use crate::diag::{Diagnostic, Severity};
use crate::error::ValueError;
use crate::generated;
use crate::path::{AttributePath, PathStep};
use crate::value::{Value, ValueType};
use crate::wire::{decode_json, decode_msgpack, encode_msgpack};

/// The protocol version for the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// The handshake prefix output by providers.
pub const HANDSHAKE_PREFIX: &str = "HEMMER_PROVIDER";

/// Private-data key holding the `NewExtra` values of a planned diff.
pub(crate) const NEW_EXTRA_KEY: &str = "_new_extra_shim";

impl From<Diagnostic> for generated::Diagnostic {
    fn from(d: Diagnostic) -> Self {
        let severity = match d.severity {
            Severity::Error => generated::diagnostic::Severity::Error,
            Severity::Warning => generated::diagnostic::Severity::Warning,
        };
        Self {
            severity: severity as i32,
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.as_ref().map(generated::AttributePath::from),
        }
    }
}

impl From<generated::Diagnostic> for Diagnostic {
    /// Anything that is not a warning reads as an error.
    fn from(d: generated::Diagnostic) -> Self {
        let severity = if d.severity == generated::diagnostic::Severity::Warning as i32 {
            Severity::Warning
        } else {
            Severity::Error
        };
        Self {
            severity,
            summary: d.summary,
            detail: (!d.detail.is_empty()).then_some(d.detail),
            attribute: d.attribute.as_ref().map(AttributePath::from),
        }
    }
}

/// Convert diagnostics for a response.
pub fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<generated::Diagnostic> {
    diagnostics.into_iter().map(Into::into).collect()
}

impl From<&AttributePath> for generated::AttributePath {
    /// Set elements cannot be addressed on the wire, so the path stops at
    /// the set itself.
    fn from(path: &AttributePath) -> Self {
        use generated::attribute_path::step::Selector;
        let mut steps = Vec::new();
        for step in path.steps() {
            let selector = match step {
                PathStep::Attr(name) => Selector::AttributeName(name.clone()),
                PathStep::Index(i) => Selector::ElementKeyInt(*i as i64),
                PathStep::Key(key) => Selector::ElementKeyString(key.clone()),
                PathStep::Hash(_) => break,
            };
            steps.push(generated::attribute_path::Step {
                selector: Some(selector),
            });
        }
        Self { steps }
    }
}

impl From<&generated::AttributePath> for AttributePath {
    fn from(proto: &generated::AttributePath) -> Self {
        use generated::attribute_path::step::Selector;
        proto
            .steps
            .iter()
            .filter_map(|step| match &step.selector {
                Some(Selector::AttributeName(name)) => Some(PathStep::Attr(name.clone())),
                Some(Selector::ElementKeyString(key)) => Some(PathStep::Key(key.clone())),
                Some(Selector::ElementKeyInt(i)) => Some(PathStep::Index(*i as usize)),
                None => None,
            })
            .collect()
    }
}

fn nesting_to_proto(nesting: NestingMode) -> generated::schema::nested_block::NestingMode {
    use generated::schema::nested_block::NestingMode as Proto;
    match nesting {
        NestingMode::Single => Proto::Single,
        NestingMode::Group => Proto::Group,
        NestingMode::List => Proto::List,
        NestingMode::Set => Proto::Set,
        NestingMode::Map => Proto::Map,
    }
}

/// Convert a block for GetProviderSchema.
pub fn block_to_proto(block: &Block) -> generated::schema::Block {
    generated::schema::Block {
        version: 0,
        attributes: block
            .attributes
            .iter()
            .map(|(name, attr)| generated::schema::Attribute {
                name: name.clone(),
                r#type: serde_json::to_vec(&attr.ty.to_json()).unwrap_or_default(),
                description: attr.description.clone().unwrap_or_default(),
                required: attr.required,
                optional: attr.optional,
                computed: attr.computed,
                sensitive: attr.sensitive,
                deprecated: attr.deprecated,
                write_only: attr.write_only,
            })
            .collect(),
        block_types: block
            .block_types
            .iter()
            .map(|(name, nested)| generated::schema::NestedBlock {
                type_name: name.clone(),
                block: Some(block_to_proto(&nested.block)),
                nesting: nesting_to_proto(nested.nesting) as i32,
                min_items: nested.min_items as i64,
                max_items: nested.max_items as i64,
            })
            .collect(),
        description: block.description.clone().unwrap_or_default(),
        deprecated: block.deprecated,
    }
}

impl From<&ResourceSchema> for generated::Schema {
    fn from(schema: &ResourceSchema) -> Self {
        let mut block = block_to_proto(&schema.block);
        block.version = schema.version as i64;
        Self {
            version: schema.version as i64,
            block: Some(block),
        }
    }
}

impl From<&IdentitySchema> for generated::ResourceIdentitySchema {
    fn from(schema: &IdentitySchema) -> Self {
        Self {
            version: schema.version as i64,
            identity_attributes: schema
                .attributes
                .iter()
                .map(
                    |(name, attr)| generated::resource_identity_schema::IdentityAttribute {
                        name: name.clone(),
                        r#type: serde_json::to_vec(&attr.ty.to_json()).unwrap_or_default(),
                        required_for_import: attr.required_for_import,
                        optional_for_import: attr.optional_for_import,
                        description: attr.description.clone().unwrap_or_default(),
                    },
                )
                .collect(),
        }
    }
}

/// Decode a request value. msgpack is preferred; a missing value is null.
pub fn decode_dynamic_value(
    value: Option<&generated::DynamicValue>,
    ty: &ValueType,
) -> Result<Value, ValueError> {
    match value {
        Some(v) if !v.msgpack.is_empty() => decode_msgpack(&v.msgpack, ty),
        Some(v) if !v.json.is_empty() => decode_json(&v.json, ty),
        _ => Ok(Value::Null),
    }
}

/// Encode a response value as msgpack.
pub fn encode_dynamic_value(
    value: &Value,
    ty: &ValueType,
) -> Result<generated::DynamicValue, ValueError> {
    Ok(generated::DynamicValue {
        msgpack: encode_msgpack(value, ty)?,
        json: Vec::new(),
    })
}

/// Decode the opaque private bytes of a request. Empty means no data.
pub(crate) fn decode_private(
    bytes: &[u8],
) -> Result<BTreeMap<String, serde_json::Value>, serde_json::Error> {
    if bytes.is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_slice(bytes)
}

/// Encode private data for a response. No data encodes as no bytes.
pub(crate) fn encode_private(
    meta: &BTreeMap<String, serde_json::Value>,
) -> Result<Vec<u8>, serde_json::Error> {
    if meta.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::to_vec(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configschema::{Attribute, NestedBlock};

    #[test]
    fn test_diagnostic_conversion() {
        let d = Diagnostic::error("bad value")
            .with_detail("port must be positive")
            .with_attribute(AttributePath::root("rule").index(0).attr("port"));
        let proto: generated::Diagnostic = d.into();
        assert_eq!(proto.severity, generated::diagnostic::Severity::Error as i32);
        assert_eq!(proto.detail, "port must be positive");
        let path = AttributePath::from(proto.attribute.as_ref().unwrap());
        assert_eq!(path.to_string(), "rule.0.port");

        let warning: generated::Diagnostic = Diagnostic::warning("careful").into();
        assert_eq!(warning.severity, generated::diagnostic::Severity::Warning as i32);
        assert!(warning.attribute.is_none());

        let back = Diagnostic::from(warning);
        assert_eq!(back.severity, Severity::Warning);
        assert_eq!(back.detail, None);
        let back = Diagnostic::from(proto);
        assert!(back.is_error());
        assert_eq!(back.attribute.unwrap().to_string(), "rule.0.port");
    }

    #[test]
    fn test_path_stops_at_set_element() {
        let path = AttributePath::root("ingress").hash(1234).attr("cidr");
        let proto = generated::AttributePath::from(&path);
        assert_eq!(proto.steps.len(), 1);
    }

    #[test]
    fn test_block_to_proto() {
        let block = Block::new()
            .with_attribute(
                "name",
                Attribute {
                    required: true,
                    ..Attribute::new(ValueType::String)
                },
            )
            .with_block(
                "rule",
                NestedBlock::new(
                    Block::new().with_attribute("port", Attribute::new(ValueType::Number)),
                    NestingMode::Set,
                ),
            );
        let schema = generated::Schema::from(&ResourceSchema::new(3, block));
        assert_eq!(schema.version, 3);
        let block = schema.block.unwrap();
        assert_eq!(block.attributes[0].name, "name");
        assert_eq!(block.attributes[0].r#type, br#""string""#.to_vec());
        assert!(block.attributes[0].required);
        assert_eq!(
            block.block_types[0].nesting,
            generated::schema::nested_block::NestingMode::Set as i32
        );
    }

    #[test]
    fn test_dynamic_value_fallbacks() {
        let ty = ValueType::object([("id", ValueType::String)]);
        assert_eq!(decode_dynamic_value(None, &ty).unwrap(), Value::Null);

        let json = generated::DynamicValue {
            msgpack: Vec::new(),
            json: br#"{"id":"x"}"#.to_vec(),
        };
        let value = decode_dynamic_value(Some(&json), &ty).unwrap();
        assert_eq!(value, Value::object([("id", Value::string("x"))]));

        let encoded = encode_dynamic_value(&value, &ty).unwrap();
        assert_eq!(decode_dynamic_value(Some(&encoded), &ty).unwrap(), value);
    }

    #[test]
    fn test_private_data() {
        assert!(decode_private(&[]).unwrap().is_empty());
        assert!(encode_private(&BTreeMap::new()).unwrap().is_empty());
        let meta = BTreeMap::from([("schema_version".to_string(), serde_json::json!("1"))]);
        let bytes = encode_private(&meta).unwrap();
        assert_eq!(decode_private(&bytes).unwrap(), meta);
    }

    #[test]
    fn test_protocol_constants() {
        assert_eq!(PROTOCOL_VERSION, 1);
        assert_eq!(HANDSHAKE_PREFIX, "HEMMER_PROVIDER");
    }
}
