//! Attribute definitions of the helper layer.
//!
//! A [`Schema`] describes one attribute: its kind, how it may be set, and
//! the constraints and callbacks that apply to it. A resource's attributes
//! form a [`SchemaMap`]; nested blocks carry a whole [`Resource`] as their
//! element.

use crate::diag::Diagnostic;
use crate::error::{ProviderError, SchemaError};
use crate::helper::resource::Resource;
use crate::helper::resource_data::ResourceData;
use crate::helper::set::{hash_resource, hash_schema, SchemaSetFunc};
use crate::path::{AttributePath, PathStep};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// The kind of value an attribute holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// A boolean.
    Bool,
    /// A 64-bit integer.
    Int,
    /// A 64-bit float.
    Float,
    /// A string.
    String,
    /// An ordered list of `Elem`.
    List,
    /// A set of `Elem`, identified by hash code.
    Set,
    /// A string-keyed map of `Elem`.
    Map,
}

impl ValueKind {
    /// Whether this is a primitive kind.
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            ValueKind::Bool | ValueKind::Int | ValueKind::Float | ValueKind::String
        )
    }

    /// The value an unset attribute of this kind reads as.
    pub fn zero_value(self) -> serde_json::Value {
        use serde_json::json;
        match self {
            ValueKind::Bool => json!(false),
            ValueKind::Int => json!(0),
            ValueKind::Float => json!(0.0),
            ValueKind::String => json!(""),
            ValueKind::List | ValueKind::Set => json!([]),
            ValueKind::Map => json!({}),
        }
    }
}

/// The element of a list, set or map attribute.
#[derive(Debug, Clone)]
pub enum Elem {
    /// Elements are primitives of the given kind.
    Primitive(ValueKind),
    /// Elements are described by a schema with only a kind set.
    Nested(Box<Schema>),
    /// Elements are nested blocks.
    Block(Box<Resource>),
}

impl From<ValueKind> for Elem {
    fn from(kind: ValueKind) -> Self {
        Elem::Primitive(kind)
    }
}

impl From<Schema> for Elem {
    fn from(schema: Schema) -> Self {
        Elem::Nested(Box::new(schema))
    }
}

impl From<Resource> for Elem {
    fn from(resource: Resource) -> Self {
        Elem::Block(Box::new(resource))
    }
}

/// How an attribute with a block element is exposed to configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigMode {
    /// Decide from the element: nested resources become blocks.
    #[default]
    Auto,
    /// Always an attribute.
    Attr,
    /// Always a nested block.
    Block,
}

/// Computes a default value at plan time.
pub type SchemaDefaultFunc =
    Arc<dyn Fn() -> Result<Option<serde_json::Value>, ProviderError> + Send + Sync>;

/// Validates a configured primitive value.
pub type SchemaValidateFunc =
    Arc<dyn Fn(&serde_json::Value, &AttributePath) -> Vec<Diagnostic> + Send + Sync>;

/// Returns true when the change from `old` to `new` at `key` is not significant.
pub type SchemaDiffSuppressFunc =
    Arc<dyn Fn(&str, &str, &str, &ResourceData) -> bool + Send + Sync>;

/// Rewrites a configured value before it is stored in state.
pub type SchemaStateFunc = Arc<dyn Fn(&serde_json::Value) -> String + Send + Sync>;

/// Attributes of a resource, keyed by name.
pub type SchemaMap = BTreeMap<String, Schema>;

/// Definition of a single attribute.
#[derive(Clone)]
pub struct Schema {
    /// What kind of value the attribute holds.
    pub kind: ValueKind,
    /// Element of list, set and map attributes.
    pub elem: Option<Elem>,
    /// The attribute may be set in configuration.
    pub optional: bool,
    /// The attribute must be set in configuration.
    pub required: bool,
    /// The provider may set the value.
    pub computed: bool,
    /// Changing the value replaces the resource.
    pub force_new: bool,
    /// Value used when configuration leaves the attribute unset.
    pub default: Option<serde_json::Value>,
    /// Computes the default value when `default` is not set.
    pub default_func: Option<SchemaDefaultFunc>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Hide the value in output.
    pub sensitive: bool,
    /// Accept the value on input but never persist it.
    pub write_only: bool,
    /// Minimum number of list or set elements.
    pub min_items: usize,
    /// Maximum number of list or set elements (0 = unlimited).
    pub max_items: usize,
    /// Keys that may not be set together with this one.
    pub conflicts_with: Vec<String>,
    /// Keys that must be set whenever this one is.
    pub required_with: Vec<String>,
    /// At least one of these keys must be set.
    pub at_least_one_of: Vec<String>,
    /// Exactly one of these keys must be set.
    pub exactly_one_of: Vec<String>,
    /// Hash function identifying set elements.
    pub set_func: Option<SchemaSetFunc>,
    /// Validates primitive values.
    pub validate_func: Option<SchemaValidateFunc>,
    /// Suppresses insignificant changes.
    pub diff_suppress_func: Option<SchemaDiffSuppressFunc>,
    /// Rewrites the value stored in state.
    pub state_func: Option<SchemaStateFunc>,
    /// Attribute or block exposure.
    pub config_mode: ConfigMode,
    /// Deprecation message, shown when the attribute is configured.
    pub deprecated: Option<String>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let callback = |present: bool| if present { Some("<fn>") } else { None };
        f.debug_struct("Schema")
            .field("kind", &self.kind)
            .field("elem", &self.elem)
            .field("optional", &self.optional)
            .field("required", &self.required)
            .field("computed", &self.computed)
            .field("force_new", &self.force_new)
            .field("default", &self.default)
            .field("default_func", &callback(self.default_func.is_some()))
            .field("sensitive", &self.sensitive)
            .field("write_only", &self.write_only)
            .field("min_items", &self.min_items)
            .field("max_items", &self.max_items)
            .field("conflicts_with", &self.conflicts_with)
            .field("set_func", &callback(self.set_func.is_some()))
            .field("config_mode", &self.config_mode)
            .field("deprecated", &self.deprecated)
            .finish_non_exhaustive()
    }
}

impl Schema {
    /// A schema of the given kind with nothing else set.
    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            elem: None,
            optional: false,
            required: false,
            computed: false,
            force_new: false,
            default: None,
            default_func: None,
            description: None,
            sensitive: false,
            write_only: false,
            min_items: 0,
            max_items: 0,
            conflicts_with: Vec::new(),
            required_with: Vec::new(),
            at_least_one_of: Vec::new(),
            exactly_one_of: Vec::new(),
            set_func: None,
            validate_func: None,
            diff_suppress_func: None,
            state_func: None,
            config_mode: ConfigMode::Auto,
            deprecated: None,
        }
    }

    /// A string attribute.
    pub fn string() -> Self {
        Self::new(ValueKind::String)
    }

    /// An integer attribute.
    pub fn int() -> Self {
        Self::new(ValueKind::Int)
    }

    /// A float attribute.
    pub fn float() -> Self {
        Self::new(ValueKind::Float)
    }

    /// A boolean attribute.
    pub fn bool() -> Self {
        Self::new(ValueKind::Bool)
    }

    /// A list attribute.
    pub fn list(elem: impl Into<Elem>) -> Self {
        Self {
            elem: Some(elem.into()),
            ..Self::new(ValueKind::List)
        }
    }

    /// A set attribute.
    pub fn set(elem: impl Into<Elem>) -> Self {
        Self {
            elem: Some(elem.into()),
            ..Self::new(ValueKind::Set)
        }
    }

    /// A map attribute.
    pub fn map(elem: impl Into<Elem>) -> Self {
        Self {
            elem: Some(elem.into()),
            ..Self::new(ValueKind::Map)
        }
    }

    /// Mark the attribute as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark the attribute as optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Mark the attribute as computed.
    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    /// Changing the attribute replaces the resource.
    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Mark the attribute as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Mark the attribute as write-only.
    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    /// Set a static default.
    pub fn with_default(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Set a default function.
    pub fn with_default_func<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<Option<serde_json::Value>, ProviderError> + Send + Sync + 'static,
    {
        self.default_func = Some(Arc::new(f));
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the minimum number of elements.
    pub fn with_min_items(mut self, min: usize) -> Self {
        self.min_items = min;
        self
    }

    /// Set the maximum number of elements.
    pub fn with_max_items(mut self, max: usize) -> Self {
        self.max_items = max;
        self
    }

    /// Keys that conflict with this attribute.
    pub fn with_conflicts_with(mut self, keys: &[&str]) -> Self {
        self.conflicts_with = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Keys required together with this attribute.
    pub fn with_required_with(mut self, keys: &[&str]) -> Self {
        self.required_with = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Keys of which at least one must be set.
    pub fn with_at_least_one_of(mut self, keys: &[&str]) -> Self {
        self.at_least_one_of = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Keys of which exactly one must be set.
    pub fn with_exactly_one_of(mut self, keys: &[&str]) -> Self {
        self.exactly_one_of = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Set the element hash function of a set.
    pub fn with_set_func<F>(mut self, f: F) -> Self
    where
        F: Fn(&serde_json::Value) -> i64 + Send + Sync + 'static,
    {
        self.set_func = Some(Arc::new(f));
        self
    }

    /// Set the validation callback.
    pub fn with_validate_func<F>(mut self, f: F) -> Self
    where
        F: Fn(&serde_json::Value, &AttributePath) -> Vec<Diagnostic> + Send + Sync + 'static,
    {
        self.validate_func = Some(Arc::new(f));
        self
    }

    /// Set the diff suppression callback.
    pub fn with_diff_suppress_func<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str, &str, &ResourceData) -> bool + Send + Sync + 'static,
    {
        self.diff_suppress_func = Some(Arc::new(f));
        self
    }

    /// Set the state function.
    pub fn with_state_func<F>(mut self, f: F) -> Self
    where
        F: Fn(&serde_json::Value) -> String + Send + Sync + 'static,
    {
        self.state_func = Some(Arc::new(f));
        self
    }

    /// Set the config mode.
    pub fn with_config_mode(mut self, mode: ConfigMode) -> Self {
        self.config_mode = mode;
        self
    }

    /// Mark the attribute as deprecated.
    pub fn with_deprecated(mut self, message: impl Into<String>) -> Self {
        self.deprecated = Some(message.into());
        self
    }

    /// Computed and not settable from configuration.
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }

    /// The default value from `default` or `default_func`.
    pub fn default_value(&self) -> Result<Option<serde_json::Value>, ProviderError> {
        if let Some(value) = &self.default {
            return Ok(Some(value.clone()));
        }
        match &self.default_func {
            Some(f) => f(),
            None => Ok(None),
        }
    }

    /// The value an unset attribute reads as.
    pub fn zero_value(&self) -> serde_json::Value {
        self.kind.zero_value()
    }

    /// The hash function of a set attribute, derived from the element when
    /// no explicit function is set.
    pub fn set_hash_func(&self) -> SchemaSetFunc {
        if let Some(f) = &self.set_func {
            return f.clone();
        }
        match &self.elem {
            Some(Elem::Block(resource)) => hash_resource(resource),
            Some(Elem::Nested(schema)) => hash_schema(schema),
            Some(Elem::Primitive(kind)) => hash_schema(&Schema::new(*kind)),
            None => hash_schema(&Schema::string()),
        }
    }

    /// Whether the element is a nested block.
    pub fn elem_resource(&self) -> Option<&Resource> {
        match &self.elem {
            Some(Elem::Block(resource)) => Some(resource),
            _ => None,
        }
    }

    /// The schema of one element of a list, set or map.
    ///
    /// Returns `None` for nested blocks, whose element is a whole object.
    pub(crate) fn elem_schema(&self) -> Option<Cow<'_, Schema>> {
        match &self.elem {
            Some(Elem::Primitive(kind)) => Some(Cow::Owned(Schema::new(*kind))),
            Some(Elem::Nested(schema)) => Some(Cow::Borrowed(schema)),
            Some(Elem::Block(_)) if self.kind == ValueKind::Map => Some(Cow::Owned(Schema::string())),
            Some(Elem::Block(_)) => None,
            None => Some(Cow::Owned(Schema::string())),
        }
    }
}

/// What an address resolves to within a schema map.
#[derive(Debug, Clone)]
pub(crate) enum AddressTarget<'a> {
    /// A single attribute or element.
    Field(Cow<'a, Schema>),
    /// An object: the root, or one element of a nested block.
    Object(&'a SchemaMap),
}

/// Resolve the schema of the value at `path`.
pub(crate) fn resolve_address<'a>(
    schema: &'a SchemaMap,
    path: &AttributePath,
) -> Option<AddressTarget<'a>> {
    let mut current = AddressTarget::Object(schema);
    for step in path.steps() {
        current = match (current, step) {
            (AddressTarget::Object(map), PathStep::Attr(name)) => {
                AddressTarget::Field(Cow::Borrowed(map.get(name)?))
            },
            (AddressTarget::Field(Cow::Borrowed(field)), PathStep::Index(_) | PathStep::Hash(_) | PathStep::Key(_)) => {
                element_target(field, step)?
            },
            (AddressTarget::Field(Cow::Owned(field)), PathStep::Index(_) | PathStep::Hash(_) | PathStep::Key(_)) => {
                // Owned schemas are synthesized primitives; they have no
                // borrowed children to hand out.
                match element_target(&field, step)? {
                    AddressTarget::Field(child) => AddressTarget::Field(Cow::Owned(child.into_owned())),
                    AddressTarget::Object(_) => return None,
                }
            },
            _ => return None,
        };
    }
    Some(current)
}

fn element_target<'a>(field: &'a Schema, step: &PathStep) -> Option<AddressTarget<'a>> {
    match (field.kind, step) {
        (ValueKind::List, PathStep::Index(_)) | (ValueKind::Set, PathStep::Hash(_) | PathStep::Index(_)) => {
            match &field.elem {
                Some(Elem::Block(resource)) => Some(AddressTarget::Object(&*resource.schema)),
                _ => field.elem_schema().map(AddressTarget::Field),
            }
        },
        (ValueKind::Map, PathStep::Key(_)) => field.elem_schema().map(AddressTarget::Field),
        _ => None,
    }
}

/// Resolve a dotted key such as `rule.0.port` against `schema`.
///
/// List parts become indexes, set parts hash codes, and everything after a
/// map attribute is a single map key.
pub fn parse_address(key: &str, schema: &SchemaMap) -> Result<AttributePath, SchemaError> {
    let invalid = || SchemaError::InvalidAddress(key.to_string());
    let mut path = AttributePath::new();
    if key.is_empty() {
        return Ok(path);
    }
    let parts: Vec<&str> = key.split('.').collect();
    let mut object = Some(schema);
    let mut field: Option<Cow<'_, Schema>> = None;
    let mut i = 0;
    while i < parts.len() {
        let part = parts[i];
        if let Some(map) = object.take() {
            let child = map.get(part).ok_or_else(invalid)?;
            path.push(PathStep::Attr(part.to_string()));
            field = Some(Cow::Borrowed(child));
            i += 1;
            continue;
        }
        let current = field.take().ok_or_else(invalid)?;
        match current.kind {
            ValueKind::List | ValueKind::Set => {
                if current.kind == ValueKind::List {
                    path.push(PathStep::Index(part.parse().map_err(|_| invalid())?));
                } else {
                    path.push(PathStep::Hash(part.to_string()));
                }
                match current {
                    Cow::Borrowed(s) => match &s.elem {
                        Some(Elem::Block(resource)) => object = Some(&*resource.schema),
                        _ => field = s.elem_schema(),
                    },
                    Cow::Owned(_) => return Err(invalid()),
                }
            },
            ValueKind::Map => {
                path.push(PathStep::Key(parts[i..].join(".")));
                return Ok(path);
            },
            _ => return Err(invalid()),
        }
        i += 1;
    }
    Ok(path)
}

/// Top-level names a resource may not use.
pub(crate) const RESERVED_RESOURCE_FIELDS: &[&str] = &[
    "connection",
    "count",
    "depends_on",
    "id",
    "lifecycle",
    "provider",
    "provisioner",
];

/// Top-level names a data source may not use.
pub(crate) const RESERVED_DATA_SOURCE_FIELDS: &[&str] = &[
    "connection",
    "count",
    "depends_on",
    "lifecycle",
    "provider",
    "provisioner",
];

/// Top-level names a provider configuration may not use.
pub(crate) const RESERVED_PROVIDER_FIELDS: &[&str] = &["alias", "version"];

fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Check a schema map against the definition rules.
///
/// Every broken rule is reported; the result carries all of them.
pub fn internal_validate(schema: &SchemaMap) -> Result<(), SchemaError> {
    let mut errors = Vec::new();
    validate_map(schema, schema, "", false, &mut errors);
    SchemaError::collect(errors)
}

fn validate_map(
    map: &SchemaMap,
    top: &SchemaMap,
    prefix: &str,
    attrs_only: bool,
    errors: &mut Vec<SchemaError>,
) {
    for (name, s) in map {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        let mut fail = |message: &str| errors.push(SchemaError::definition(key.clone(), message));

        if s.optional && s.required {
            fail("Optional or Required must be set, not both");
        }
        if s.required && s.computed {
            fail("Cannot be both Required and Computed");
        }
        if !s.required && !s.optional && !s.computed {
            fail("One of optional, required, or computed must be set");
        }
        let computed_only = s.computed && !s.optional;

        if s.config_mode == ConfigMode::Block {
            if s.elem_resource().is_none() {
                fail("ConfigMode of block is allowed only when Elem is a resource");
            }
            if attrs_only {
                fail("ConfigMode of block cannot be used in child of schema with ConfigMode of attribute");
            }
            if computed_only {
                fail("ConfigMode of block cannot be used for computed schema");
            }
        }

        if s.computed && s.default.is_some() {
            fail("Default must be nil if computed");
        }
        if s.required && s.default.is_some() {
            fail("Default cannot be set with Required");
        }
        if s.required && !s.conflicts_with.is_empty() {
            fail("ConflictsWith cannot be set with Required");
        }
        if s.required && !s.exactly_one_of.is_empty() {
            fail("ExactlyOneOf cannot be set with Required");
        }
        if s.required && !s.at_least_one_of.is_empty() {
            fail("AtLeastOneOf cannot be set with Required");
        }

        if s.write_only {
            if s.computed {
                fail("WriteOnly cannot be set with Computed");
            }
            if s.force_new {
                fail("WriteOnly cannot be set with ForceNew");
            }
            if s.default.is_some() || s.default_func.is_some() {
                fail("WriteOnly cannot be set with Default or DefaultFunc");
            }
        }

        let self_key = strip_indexes(&key);
        for (keys, allow_self) in [
            (&s.conflicts_with, false),
            (&s.required_with, true),
            (&s.exactly_one_of, true),
            (&s.at_least_one_of, true),
        ] {
            for reference in keys {
                if let Err(message) = check_reference(reference, top, &self_key, allow_self) {
                    errors.push(SchemaError::definition(key.clone(), message));
                }
            }
        }

        match s.kind {
            ValueKind::List | ValueKind::Set => {
                match &s.elem {
                    None => errors.push(SchemaError::definition(
                        key.clone(),
                        "Elem must be set for lists",
                    )),
                    Some(Elem::Block(resource)) => {
                        let attrs_only = attrs_only || s.config_mode == ConfigMode::Attr;
                        validate_map(&*resource.schema, top, &key, attrs_only, errors);
                    },
                    Some(Elem::Nested(elem)) => {
                        if elem.computed || elem.optional || elem.required {
                            errors.push(SchemaError::definition(
                                key.clone(),
                                "Elem must have only Type set",
                            ));
                        }
                    },
                    Some(Elem::Primitive(_)) => {},
                }
                if s.default.is_some() {
                    errors.push(SchemaError::definition(
                        key.clone(),
                        "Default is not valid for lists or sets",
                    ));
                }
                if s.kind == ValueKind::List && s.set_func.is_some() {
                    errors.push(SchemaError::definition(
                        key.clone(),
                        "Set can only be set for sets",
                    ));
                }
                if s.validate_func.is_some() {
                    errors.push(SchemaError::definition(
                        key.clone(),
                        "ValidateFunc is not supported on lists or sets",
                    ));
                }
            },
            _ => {
                if s.min_items > 0 || s.max_items > 0 {
                    errors.push(SchemaError::definition(
                        key.clone(),
                        "MaxItems and MinItems are only supported on lists or sets",
                    ));
                }
            },
        }

        if s.kind == ValueKind::Map && s.elem_resource().is_some() {
            warn!(
                key = %key,
                "map with a resource element is exposed as a map of strings"
            );
        }

        if computed_only {
            let forbidden = [
                (!s.at_least_one_of.is_empty(), "AtLeastOneOf"),
                (!s.conflicts_with.is_empty(), "ConflictsWith"),
                (s.default.is_some(), "Default"),
                (s.default_func.is_some(), "DefaultFunc"),
                (s.diff_suppress_func.is_some(), "DiffSuppressFunc"),
                (!s.exactly_one_of.is_empty(), "ExactlyOneOf"),
                (s.max_items > 0, "MaxItems"),
                (s.min_items > 0, "MinItems"),
                (s.state_func.is_some(), "StateFunc"),
                (s.validate_func.is_some(), "ValidateFunc"),
            ];
            for (set, field) in forbidden {
                if set {
                    errors.push(SchemaError::definition(
                        key.clone(),
                        format!(
                            "{} is for configurable attributes, there's nothing to configure on computed-only field",
                            field
                        ),
                    ));
                }
            }
        }

        if s.deprecated.is_none() && !is_valid_field_name(name) {
            errors.push(SchemaError::definition(
                key.clone(),
                "Field name may only contain lowercase alphanumeric characters & underscores",
            ));
        }
    }
}

fn strip_indexes(key: &str) -> String {
    key.split('.')
        .filter(|part| part.parse::<usize>().is_err())
        .collect::<Vec<_>>()
        .join(".")
}

fn check_reference(
    reference: &str,
    top: &SchemaMap,
    self_key: &str,
    allow_self: bool,
) -> Result<(), String> {
    let parts: Vec<&str> = reference.split('.').collect();
    let mut map = top;
    let mut target: Option<&Schema> = None;
    for (idx, part) in parts.iter().enumerate() {
        if let Ok(index) = part.parse::<usize>() {
            if index != 0 {
                return Err(format!(
                    "configuration block reference ({}) can only use the .0. index for lists with MaxItems 1",
                    reference
                ));
            }
            continue;
        }
        let schema = map.get(*part).ok_or_else(|| {
            format!("references unknown attribute ({}) at part ({})", reference, part)
        })?;
        target = Some(schema);
        if let Some(resource) = schema.elem_resource() {
            if idx + 1 == parts.len() {
                continue;
            }
            if schema.kind == ValueKind::Set || schema.max_items != 1 {
                return Err(format!(
                    "configuration block reference ({}) can only be used with lists with MaxItems 1",
                    reference
                ));
            }
            map = &*resource.schema;
        }
    }
    let target = target.ok_or_else(|| format!("cannot find target attribute ({})", reference))?;
    if !allow_self && strip_indexes(reference) == self_key {
        return Err(format!("cannot reference self ({})", reference));
    }
    if target.required {
        return Err(format!("cannot contain Required attribute ({})", reference));
    }
    Ok(())
}
