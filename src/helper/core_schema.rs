//! Derivation of protocol schemas from helper schemas.
//!
//! The protocol only knows attributes and nested blocks. Attributes whose
//! element is a [`Resource`] become nested blocks unless they are computed
//! only or their config mode says otherwise; everything else becomes an
//! attribute with the implied type.

use crate::configschema::{Attribute, Block, NestedBlock, NestingMode, ProviderSchema, ResourceSchema};
use crate::helper::provider::Provider;
use crate::helper::resource::Resource;
use crate::helper::schema::{ConfigMode, Elem, Schema, SchemaMap, ValueKind};
use crate::helper::timeout::{TimeoutKind, TIMEOUTS_CONFIG_KEY};
use crate::value::ValueType;
use tracing::warn;

/// The protocol block of a schema map.
pub fn core_config_schema(schema: &SchemaMap) -> Block {
    let mut block = Block::new();
    for (name, s) in schema {
        if s.elem.is_none() {
            block.attributes.insert(name.clone(), core_attribute(s));
            continue;
        }
        if s.kind == ValueKind::Map {
            if let Some(Elem::Block(_)) = &s.elem {
                // A map of blocks cannot be expressed in flatmap; it is
                // exposed as a map of strings.
                warn!(attribute = %name, "map with a block element is exposed as a string map");
                let mut degraded = s.clone();
                degraded.elem = Some(Elem::Primitive(ValueKind::String));
                block.attributes.insert(name.clone(), core_attribute(&degraded));
                continue;
            }
        }
        match s.config_mode {
            ConfigMode::Attr => {
                block.attributes.insert(name.clone(), core_attribute(s));
            },
            ConfigMode::Block => match core_block(s) {
                Some(nested) => {
                    block.block_types.insert(name.clone(), nested);
                },
                None => {
                    block.attributes.insert(name.clone(), core_attribute(s));
                },
            },
            ConfigMode::Auto => {
                if s.computed && !s.optional {
                    block.attributes.insert(name.clone(), core_attribute(s));
                    continue;
                }
                match core_block(s) {
                    Some(nested) => {
                        block.block_types.insert(name.clone(), nested);
                    },
                    None => {
                        block.attributes.insert(name.clone(), core_attribute(s));
                    },
                }
            },
        }
    }
    block
}

fn core_attribute(s: &Schema) -> Attribute {
    let mut required = s.required;
    let mut optional = s.optional;
    // Required-ness is conditional when a default function may provide a
    // value. Errors are reported again at validation time.
    if required && s.default_func.is_some() {
        match s.default_value() {
            Ok(Some(_)) | Err(_) => {
                required = false;
                optional = true;
            },
            Ok(None) => {},
        }
    }
    Attribute {
        ty: core_type(s),
        description: s.description.clone(),
        required,
        optional,
        computed: s.computed,
        sensitive: s.sensitive,
        write_only: s.write_only,
        deprecated: s.deprecated.is_some(),
    }
}

/// The nested block of a list, set or map attribute whose element is a
/// resource. `None` when the attribute cannot be a block.
fn core_block(s: &Schema) -> Option<NestedBlock> {
    let resource = s.elem_resource()?;
    let nesting = match s.kind {
        ValueKind::List => NestingMode::List,
        ValueKind::Set => NestingMode::Set,
        ValueKind::Map => NestingMode::Map,
        _ => return None,
    };
    let mut block = resource_block(resource);
    if s.description.is_some() {
        block.description = s.description.clone();
    }
    let mut nested = NestedBlock::new(block, nesting);
    nested.min_items = s.min_items as u64;
    nested.max_items = s.max_items as u64;
    if s.required && s.min_items == 0 {
        nested.min_items = 1;
    }
    // Historical quirk: an optional block with a fixed item count accepts
    // zero items.
    if s.optional && s.min_items > 0 && s.min_items == s.max_items {
        nested.min_items = 0;
    }
    if s.computed && !s.optional {
        nested.min_items = 0;
        nested.max_items = 0;
    }
    Some(nested)
}

/// The value type an attribute holds on the wire.
pub fn core_type(s: &Schema) -> ValueType {
    match s.kind {
        ValueKind::String => ValueType::String,
        ValueKind::Bool => ValueType::Bool,
        ValueKind::Int | ValueKind::Float => ValueType::Number,
        ValueKind::List | ValueKind::Set | ValueKind::Map => {
            let elem = match &s.elem {
                Some(Elem::Primitive(kind)) => core_type(&Schema::new(*kind)),
                Some(Elem::Nested(schema)) => core_type(schema),
                Some(Elem::Block(resource)) => resource_block(resource).implied_type(),
                None => ValueType::String,
            };
            match s.kind {
                ValueKind::List => ValueType::list(elem),
                ValueKind::Set => ValueType::set(elem),
                _ => ValueType::map(elem),
            }
        },
    }
}

fn resource_block(resource: &Resource) -> Block {
    let mut block = core_config_schema(&resource.schema);
    block.description = resource.description.clone();
    block.deprecated = resource.deprecation_message.is_some();
    block
}

impl Resource {
    /// The protocol block of this resource.
    ///
    /// An optional computed `id` attribute is added when the schema does not
    /// declare one, and declared timeouts add a `timeouts` block.
    pub fn core_config_schema(&self) -> Block {
        let mut block = resource_block(self);
        block
            .attributes
            .entry("id".to_string())
            .or_insert_with(Attribute::optional_computed_string);

        let taken = block.attributes.contains_key(TIMEOUTS_CONFIG_KEY)
            || block.block_types.contains_key(TIMEOUTS_CONFIG_KEY);
        if let (Some(timeouts), false) = (&self.timeouts, taken) {
            let mut attrs = Block::new();
            for kind in TimeoutKind::ALL {
                if timeouts.declared(kind).is_some() {
                    attrs.attributes.insert(
                        kind.as_str().to_string(),
                        Attribute {
                            optional: true,
                            ..Attribute::new(ValueType::String)
                        },
                    );
                }
            }
            block
                .block_types
                .insert(TIMEOUTS_CONFIG_KEY.to_string(), NestedBlock::new(attrs, NestingMode::Single));
        }
        block
    }

    /// The object type of this resource's values.
    pub fn implied_type(&self) -> ValueType {
        self.core_config_schema().implied_type()
    }

    /// The versioned protocol schema of this resource.
    pub fn resource_schema(&self) -> ResourceSchema {
        ResourceSchema::new(self.schema_version, self.core_config_schema())
    }
}

impl Provider {
    /// Every protocol schema this provider exposes.
    pub fn get_schema(&self) -> ProviderSchema {
        ProviderSchema {
            provider: ResourceSchema::new(0, core_config_schema(&self.schema)),
            resources: self
                .resources
                .iter()
                .map(|(name, r)| (name.clone(), r.resource_schema()))
                .collect(),
            data_sources: self
                .data_sources
                .iter()
                .map(|(name, r)| (name.clone(), r.resource_schema()))
                .collect(),
            identities: self
                .resources
                .iter()
                .filter_map(|(name, r)| r.identity.clone().map(|i| (name.clone(), i)))
                .collect(),
        }
    }
}
