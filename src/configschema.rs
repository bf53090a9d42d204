//! Protocol-level schema types.
//!
//! These describe the attribute/nested-block tree sent to the orchestrator
//! in GetProviderSchema. They are derived from the helper [`crate::helper::Schema`]
//! definitions and also carry the implied value type used by the codecs.

use crate::error::ValueError;
use crate::path::AttributePath;
use crate::value::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes a single attribute in a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// The type of the attribute.
    #[serde(rename = "type")]
    pub ty: ValueType,
    /// Human-readable description of the attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The attribute must be set in configuration.
    #[serde(default)]
    pub required: bool,
    /// The attribute may be set in configuration.
    #[serde(default)]
    pub optional: bool,
    /// The provider may set the value.
    #[serde(default)]
    pub computed: bool,
    /// The value should be hidden in logs and UI.
    #[serde(default)]
    pub sensitive: bool,
    /// The value is accepted on input but never persisted.
    #[serde(default)]
    pub write_only: bool,
    /// The attribute is deprecated.
    #[serde(default)]
    pub deprecated: bool,
}

impl Attribute {
    /// Create an attribute of the given type with no flags set.
    pub fn new(ty: ValueType) -> Self {
        Self {
            ty,
            description: None,
            required: false,
            optional: false,
            computed: false,
            sensitive: false,
            write_only: false,
            deprecated: false,
        }
    }

    /// Create an optional+computed string attribute, as used for `id`.
    pub fn optional_computed_string() -> Self {
        Self {
            optional: true,
            computed: true,
            ..Self::new(ValueType::String)
        }
    }
}

/// How a nested block is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NestingMode {
    /// At most one block, null when absent.
    #[default]
    Single,
    /// Exactly one block whose attributes are all optional; never null.
    Group,
    /// An ordered list of blocks.
    List,
    /// An unordered set of blocks.
    Set,
    /// Blocks keyed by string label.
    Map,
}

/// A block of attributes and nested blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// The attributes within this block.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Attribute>,
    /// Nested blocks within this block.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub block_types: BTreeMap<String, NestedBlock>,
    /// Human-readable description of the block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The block is deprecated.
    #[serde(default)]
    pub deprecated: bool,
}

impl Block {
    /// Create a new empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute to this block.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Add a nested block to this block.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.block_types.insert(name.into(), block);
        self
    }

    /// The object type implied by this block.
    ///
    /// Attributes contribute their declared type; nested blocks contribute an
    /// object (Single, Group), list, set or map of the nested block's type.
    pub fn implied_type(&self) -> ValueType {
        let mut attrs: BTreeMap<String, ValueType> = self
            .attributes
            .iter()
            .map(|(name, attr)| (name.clone(), attr.ty.clone()))
            .collect();
        for (name, nested) in &self.block_types {
            let inner = nested.block.implied_type();
            let ty = match nested.nesting {
                NestingMode::Single | NestingMode::Group => inner,
                NestingMode::List => ValueType::list(inner),
                NestingMode::Set => ValueType::set(inner),
                NestingMode::Map => ValueType::map(inner),
            };
            attrs.insert(name.clone(), ty);
        }
        ValueType::Object(attrs)
    }

    /// Conform `value` to this block's implied type.
    ///
    /// Missing attributes become null, missing list/set/map blocks become
    /// empty collections, and unknown values are passed through.
    pub fn coerce_value(&self, value: Value) -> Result<Value, ValueError> {
        self.coerce_at(value, &AttributePath::new())
    }

    fn coerce_at(&self, value: Value, path: &AttributePath) -> Result<Value, ValueError> {
        let mut entries = match value {
            Value::Null | Value::Unknown => return Ok(value),
            Value::Object(entries) | Value::Map(entries) => entries,
            _ => return Err(ValueError::conversion(path, "an object is required")),
        };
        if let Some(extra) = entries
            .keys()
            .find(|k| !self.attributes.contains_key(*k) && !self.block_types.contains_key(*k))
        {
            return Err(ValueError::conversion(
                path,
                format!("unsupported attribute {:?}", extra),
            ));
        }

        let mut out = BTreeMap::new();
        for (name, attr) in &self.attributes {
            let v = entries.remove(name).unwrap_or(Value::Null);
            out.insert(name.clone(), attr.ty.coerce_at(v, &path.attr(name.clone()))?);
        }
        for (name, nested) in &self.block_types {
            let v = entries.remove(name).unwrap_or(Value::Null);
            let child = path.attr(name.clone());
            let coerced = match (nested.nesting, v) {
                (_, Value::Unknown) => Value::Unknown,
                (NestingMode::Single, v) => nested.block.coerce_at(v, &child)?,
                (NestingMode::Group, Value::Null) => {
                    nested.block.coerce_at(Value::Object(BTreeMap::new()), &child)?
                },
                (NestingMode::Group, v) => nested.block.coerce_at(v, &child)?,
                (NestingMode::List, Value::Null) => Value::List(Vec::new()),
                (NestingMode::Set, Value::Null) => Value::Set(Vec::new()),
                (NestingMode::Map, Value::Null) => Value::Map(BTreeMap::new()),
                (NestingMode::List, Value::List(items) | Value::Set(items)) => Value::List(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, item)| nested.block.coerce_at(item, &child.index(i)))
                        .collect::<Result<_, _>>()?,
                ),
                (NestingMode::Set, Value::List(items) | Value::Set(items)) => Value::Set(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, item)| nested.block.coerce_at(item, &child.index(i)))
                        .collect::<Result<_, _>>()?,
                ),
                (NestingMode::Map, Value::Map(items) | Value::Object(items)) => Value::Map(
                    items
                        .into_iter()
                        .map(|(k, item)| {
                            let item = nested.block.coerce_at(item, &child.key(k.clone()))?;
                            Ok((k, item))
                        })
                        .collect::<Result<_, ValueError>>()?,
                ),
                (mode, _) => {
                    return Err(ValueError::conversion(
                        &child,
                        format!("a {:?} block is required", mode),
                    ))
                },
            };
            out.insert(name.clone(), coerced);
        }
        Ok(Value::Object(out))
    }
}

/// A nested block with its nesting mode and constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedBlock {
    /// The block definition.
    pub block: Block,
    /// How the block is nested.
    #[serde(default)]
    pub nesting: NestingMode,
    /// Minimum number of blocks required.
    #[serde(default)]
    pub min_items: u64,
    /// Maximum number of blocks allowed (0 = unlimited).
    #[serde(default)]
    pub max_items: u64,
}

impl NestedBlock {
    /// Create a nested block with the given nesting mode and no limits.
    pub fn new(block: Block, nesting: NestingMode) -> Self {
        Self {
            block,
            nesting,
            min_items: 0,
            max_items: 0,
        }
    }
}

/// Schema for a resource, data source or the provider configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSchema {
    /// The version of this schema (for state upgrades).
    #[serde(default)]
    pub version: u64,
    /// The root block containing all attributes and nested blocks.
    pub block: Block,
}

impl ResourceSchema {
    /// Create a schema from a block.
    pub fn new(version: u64, block: Block) -> Self {
        Self { version, block }
    }
}

/// One attribute of a resource identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityAttribute {
    /// The type of the attribute.
    #[serde(rename = "type")]
    pub ty: ValueType,
    /// Must be supplied when importing by identity.
    #[serde(default)]
    pub required_for_import: bool,
    /// May be supplied when importing by identity.
    #[serde(default)]
    pub optional_for_import: bool,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Identity schema of a resource type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentitySchema {
    /// Identity schema version.
    #[serde(default)]
    pub version: u64,
    /// Identity attributes by name.
    #[serde(default)]
    pub attributes: BTreeMap<String, IdentityAttribute>,
}

/// Every schema a provider exposes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSchema {
    /// Schema for provider configuration.
    #[serde(default)]
    pub provider: ResourceSchema,
    /// Schemas for each resource type.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSchema>,
    /// Schemas for each data source type.
    #[serde(default)]
    pub data_sources: BTreeMap<String, ResourceSchema>,
    /// Identity schemas for resource types that declare one.
    #[serde(default)]
    pub identities: BTreeMap<String, IdentitySchema>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Block {
        Block::new()
            .with_attribute("id", Attribute::optional_computed_string())
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
                    Block::new().with_attribute(
                        "port",
                        Attribute {
                            optional: true,
                            ..Attribute::new(ValueType::Number)
                        },
                    ),
                    NestingMode::List,
                ),
            )
            .with_block("settings", NestedBlock::new(Block::new(), NestingMode::Single))
    }

    #[test]
    fn test_implied_type() {
        let ty = sample_block().implied_type();
        let attrs = ty.attribute_types().unwrap();
        assert_eq!(attrs["name"], ValueType::String);
        assert_eq!(
            attrs["rule"],
            ValueType::list(ValueType::object([("port", ValueType::Number)]))
        );
        assert_eq!(attrs["settings"], ValueType::object(Vec::<(String, ValueType)>::new()));
    }

    #[test]
    fn test_coerce_fills_blocks() {
        let value = Value::object([("name", Value::string("x"))]);
        let out = sample_block().coerce_value(value).unwrap();
        assert_eq!(out.get_attr("id"), Some(&Value::Null));
        assert_eq!(out.get_attr("rule"), Some(&Value::List(vec![])));
        assert_eq!(out.get_attr("settings"), Some(&Value::Null));
    }

    #[test]
    fn test_coerce_converts_nested_values() {
        let value = Value::object([
            ("name", Value::string("x")),
            (
                "rule",
                Value::List(vec![Value::object([("port", Value::string("80"))])]),
            ),
        ]);
        let out = sample_block().coerce_value(value).unwrap();
        let rule = out.get_attr("rule").and_then(Value::elements).unwrap();
        assert_eq!(rule[0].get_attr("port"), Some(&Value::int(80)));
    }

    #[test]
    fn test_coerce_rejects_unknown_attribute() {
        let value = Value::object([("bogus", Value::string("x"))]);
        let err = sample_block().coerce_value(value).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_schema_serializes_types_as_json() {
        let schema = ResourceSchema::new(1, sample_block());
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["block"]["attributes"]["name"]["type"], "string");
    }
}
