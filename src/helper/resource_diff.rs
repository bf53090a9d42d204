//! The view handed to CustomizeDiff callbacks.

use crate::error::{ProviderError, SchemaError};
use crate::helper::diff::{Change, Differ};
use crate::helper::field_reader::{FieldReadResult, FieldReader, Level, MapFieldReader, MultiLevelFieldReader};
use crate::helper::field_reader_config::ConfigFieldReader;
use crate::helper::field_reader_diff::DiffFieldReader;
use crate::helper::field_writer::MapFieldWriter;
use crate::helper::resource_data::{finish_read, split_count, GetResult};
use crate::helper::schema::{parse_address, resolve_address, AddressTarget, Elem, Schema, SchemaMap, ValueKind};
use crate::instance::{InstanceDiff, InstanceState, ResourceConfig};
use crate::path::{is_child_key, AttributePath};
use serde_json::Value as Json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads values set through [`ResourceDiff::set_new`], reporting keys
/// marked with [`ResourceDiff::set_new_computed`] as computed.
struct NewValueReader<'a> {
    inner: MapFieldReader<'a>,
    computed_keys: &'a BTreeSet<String>,
}

impl NewValueReader<'_> {
    fn is_computed(&self, key: &str) -> bool {
        self.computed_keys.iter().any(|c| is_child_key(key, c))
    }
}

impl FieldReader for NewValueReader<'_> {
    fn read_field(&self, address: &AttributePath) -> Result<FieldReadResult, SchemaError> {
        if self.is_computed(&address.to_flatmap_key()) {
            return Ok(FieldReadResult::computed());
        }
        self.inner.read_field(address)
    }

    fn read_count(&self, address: &AttributePath) -> Result<FieldReadResult, SchemaError> {
        // Lets the count of a computed collection fall through to lower levels.
        if self.is_computed(&address.to_flatmap_key()) {
            return Ok(FieldReadResult::missing());
        }
        self.inner.read_count(address)
    }
}

/// The planned change of one resource instance, open to adjustment.
///
/// Values read through a `ResourceDiff` reflect the plan so far. Computed
/// attributes may be given a new value or marked unknown, and any changing
/// attribute may be marked as forcing replacement.
#[derive(Debug)]
pub struct ResourceDiff {
    schema: Arc<SchemaMap>,
    config: Option<ResourceConfig>,
    state: Option<InstanceState>,
    diff: InstanceDiff,
    new_writer: MapFieldWriter,
    computed_keys: BTreeSet<String>,
    updated_keys: BTreeSet<String>,
    forced_new_keys: BTreeSet<String>,
}

impl ResourceDiff {
    pub(crate) fn new(
        schema: Arc<SchemaMap>,
        config: Option<ResourceConfig>,
        state: Option<InstanceState>,
        diff: InstanceDiff,
    ) -> Self {
        let forced_new_keys = diff
            .attributes
            .iter()
            .filter(|(_, attr)| attr.requires_new)
            .filter_map(|(k, _)| k.split('.').next().map(str::to_string))
            .collect();
        Self {
            schema,
            config,
            state,
            diff,
            new_writer: MapFieldWriter::new(),
            computed_keys: BTreeSet::new(),
            updated_keys: BTreeSet::new(),
            forced_new_keys,
        }
    }

    /// The schema, including any `force_new` flags set by this diff.
    pub fn schema(&self) -> &SchemaMap {
        &self.schema
    }

    pub(crate) fn into_diff(self) -> InstanceDiff {
        self.diff
    }

    /// Keys whose planned value has to be recomputed.
    pub(crate) fn updated_keys(&self) -> Vec<String> {
        self.updated_keys
            .union(&self.forced_new_keys)
            .cloned()
            .collect()
    }

    fn with_reader<T>(&self, f: impl FnOnce(&MultiLevelFieldReader<'_>) -> T) -> T {
        let schema = &*self.schema;
        let state = self
            .state
            .as_ref()
            .map(|s| MapFieldReader::new(schema, &s.attributes));
        let config = self.config.as_ref().map(|c| ConfigFieldReader::new(schema, c));

        let mut source = MultiLevelFieldReader::new();
        if let Some(r) = &state {
            source.add_level(Level::State, r);
        }
        if let Some(r) = &config {
            source.add_level(Level::Config, r);
        }
        let diff = DiffFieldReader::new(schema, &self.diff, &source);
        let new_values = NewValueReader {
            inner: MapFieldReader::new(schema, self.new_writer.map()),
            computed_keys: &self.computed_keys,
        };

        let mut multi = MultiLevelFieldReader::new();
        if let Some(r) = &state {
            multi.add_level(Level::State, r);
        }
        if let Some(r) = &config {
            multi.add_level(Level::Config, r);
        }
        multi.add_level(Level::Diff, &diff);
        multi.add_level(Level::NewDiff, &new_values);
        f(&multi)
    }

    fn get_raw(&self, key: &str, level: Level, exact: bool) -> Result<GetResult, SchemaError> {
        let (base, count) = split_count(key);
        let path = parse_address(base, &self.schema)?;
        let raw = self.with_reader(|r| match (count, exact) {
            (true, true) => r.read_count_exact(&path, level),
            (true, false) => r.read_count_merge(&path, level),
            (false, true) => r.read_field_exact(&path, level),
            (false, false) => r.read_field_merge(&path, level),
        })?;
        Ok(finish_read(raw, count, &self.schema, &path))
    }

    fn read_or_warn(&self, key: &str, level: Level) -> Option<GetResult> {
        match self.get_raw(key, level, false) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(key = %key, error = %e, "invalid attribute read");
                None
            },
        }
    }

    fn is_updated(&self, key: &str) -> bool {
        self.updated_keys.iter().any(|p| is_child_key(key, p))
    }

    fn removed(&self, key: &str) -> bool {
        self.diff
            .attribute(key)
            .map(|attr| attr.new_removed)
            .unwrap_or(false)
    }

    /// The planned value of `key`.
    pub fn get(&self, key: &str) -> Json {
        self.read_or_warn(key, Level::NewDiff)
            .map(|r| r.value)
            .unwrap_or(Json::Null)
    }

    /// The prior and planned values of `key`.
    pub fn get_change(&self, key: &str) -> (Json, Json) {
        let old = self.read_or_warn(key, Level::State).map(|r| r.value);
        let new = self.read_or_warn(key, Level::NewDiff).map(|r| r.value);
        (old.unwrap_or(Json::Null), new.unwrap_or(Json::Null))
    }

    /// The planned value of `key` when it is set, known and not the zero
    /// value.
    pub fn get_ok(&self, key: &str) -> Option<Json> {
        let r = self.read_or_warn(key, Level::NewDiff)?;
        (r.exists && !r.computed && r.value != r.zero).then_some(r.value)
    }

    /// The planned value of `key` when it is set and known.
    pub fn get_ok_exists(&self, key: &str) -> Option<Json> {
        let r = self.read_or_warn(key, Level::NewDiff)?;
        (r.exists && !r.computed).then_some(r.value)
    }

    /// Whether the planned value of `key` differs from the prior one.
    pub fn has_change(&self, key: &str) -> bool {
        let (old, new) = self.get_change(key);
        old != new
    }

    /// Whether any of `keys` changes.
    pub fn has_changes(&self, keys: &[&str]) -> bool {
        keys.iter().any(|k| self.has_change(k))
    }

    /// Whether the planned value of `key` is known before apply.
    pub fn new_value_known(&self, key: &str) -> bool {
        self.read_or_warn(key, Level::NewDiff)
            .map(|r| !r.computed)
            .unwrap_or(true)
    }

    /// The id of the prior instance; empty on create.
    pub fn id(&self) -> String {
        self.state.as_ref().map(|s| s.id.clone()).unwrap_or_default()
    }

    fn check_key(&self, key: &str, caller: &str, nested: bool) -> Result<(), ProviderError> {
        let computed = if nested {
            parse_address(key, &self.schema)
                .ok()
                .and_then(|path| match resolve_address(&self.schema, &path) {
                    Some(AddressTarget::Field(s)) => Some(s.computed),
                    _ => None,
                })
        } else {
            self.schema.get(key).map(|s| s.computed)
        };
        match computed {
            None => Err(ProviderError::CustomizeDiff(format!("{}: invalid key: {}", caller, key))),
            Some(false) => Err(ProviderError::CustomizeDiff(format!(
                "{} only operates on computed keys - {} is not one",
                caller, key
            ))),
            Some(true) => Ok(()),
        }
    }

    /// Drop the planned change of the computed attribute `key`.
    pub fn clear(&mut self, key: &str) -> Result<(), ProviderError> {
        self.check_key(key, "Clear", true)?;
        self.diff.remove_prefix(key);
        Ok(())
    }

    /// Plan `value` as the new value of the computed top-level attribute
    /// `key`.
    pub fn set_new(&mut self, key: &str, value: impl Into<Json>) -> Result<(), ProviderError> {
        self.check_key(key, "SetNew", false)?;
        self.clear(key)?;
        let path = AttributePath::root(key);
        self.new_writer
            .write_field(&self.schema, &path, &value.into())?;
        self.computed_keys.remove(key);
        self.updated_keys.insert(key.to_string());
        debug!(key = %key, "CustomizeDiff set a new value");
        Ok(())
    }

    /// Plan the computed top-level attribute `key` as unknown until apply.
    pub fn set_new_computed(&mut self, key: &str) -> Result<(), ProviderError> {
        self.check_key(key, "SetNewComputed", false)?;
        self.clear(key)?;
        self.computed_keys.insert(key.to_string());
        self.updated_keys.insert(key.to_string());
        debug!(key = %key, "CustomizeDiff marked key computed");
        Ok(())
    }

    /// Make a change of `key` replace the instance.
    pub fn force_new(&mut self, key: &str) -> Result<(), ProviderError> {
        if !self.has_change(key) {
            return Err(ProviderError::CustomizeDiff(format!(
                "ForceNew: No changes for {}",
                key
            )));
        }
        let parts: Vec<&str> = key.split('.').collect();
        let schema = Arc::make_mut(&mut self.schema);
        let target = schema_mut(schema, &parts).ok_or_else(|| {
            ProviderError::CustomizeDiff(format!("ForceNew: {} is not a valid key", key))
        })?;
        target.force_new = true;
        if let Some(top) = parts.first() {
            self.forced_new_keys.insert(top.to_string());
        }
        Ok(())
    }
}

/// The schema at dotted `parts`, made unique for mutation.
fn schema_mut<'a>(map: &'a mut SchemaMap, parts: &[&str]) -> Option<&'a mut Schema> {
    let (first, rest) = parts.split_first()?;
    let field = map.get_mut(*first)?;
    if rest.is_empty() {
        return Some(field);
    }
    match field.kind {
        ValueKind::List | ValueKind::Set => {
            let after = &rest[1..];
            if after.is_empty() {
                return Some(field);
            }
            match &mut field.elem {
                Some(Elem::Block(resource)) => schema_mut(Arc::make_mut(&mut resource.schema), after),
                _ => None,
            }
        },
        ValueKind::Map => Some(field),
        _ => None,
    }
}

impl Differ for ResourceDiff {
    fn diff_change(&self, key: &str) -> Result<Change, SchemaError> {
        let old = self.get_raw(key, Level::State, false)?;
        let customized = self.is_updated(key);
        let new = self.get_raw(key, Level::NewDiff, customized)?;
        let new_value = (new.exists && !self.removed(key)).then_some(new.value);
        Ok(Change {
            old: old.exists.then_some(old.value),
            new: new_value,
            computed: new.computed,
            customized,
        })
    }

    fn get_ok(&self, key: &str) -> Option<Json> {
        ResourceDiff::get_ok(self, key)
    }

    fn id(&self) -> String {
        ResourceDiff::id(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::resource::Resource;
    use crate::instance::ResourceAttrDiff;
    use serde_json::json;

    fn schema() -> Arc<SchemaMap> {
        let rule = Resource::new().with_schema(SchemaMap::from([
            ("port".to_string(), Schema::int().optional()),
        ]));
        Arc::new(SchemaMap::from([
            ("name".to_string(), Schema::string().optional()),
            ("size".to_string(), Schema::int().optional()),
            ("version".to_string(), Schema::int().computed()),
            ("rule".to_string(), Schema::list(rule).optional()),
        ]))
    }

    fn prior() -> InstanceState {
        let mut state = InstanceState::with_id("i-1");
        for (k, v) in [("name", "a"), ("size", "1"), ("version", "3"), ("rule.#", "1"), ("rule.0.port", "22")] {
            state.attributes.insert(k.to_string(), v.to_string());
        }
        state
    }

    fn change(old: &str, new: &str) -> ResourceAttrDiff {
        ResourceAttrDiff {
            old: old.to_string(),
            new: new.to_string(),
            ..ResourceAttrDiff::default()
        }
    }

    fn diff() -> ResourceDiff {
        let mut planned = InstanceDiff::new();
        planned.set_attribute("name", change("a", "b"));
        planned.set_attribute("rule.0.port", change("22", "23"));
        ResourceDiff::new(schema(), None, Some(prior()), planned)
    }

    #[test]
    fn test_reads_planned_values() {
        let d = diff();
        assert_eq!(d.get("name"), json!("b"));
        assert_eq!(d.get_change("name"), (json!("a"), json!("b")));
        assert!(d.has_change("name"));
        assert!(!d.has_change("size"));
        assert!(d.has_changes(&["size", "rule"]));
        assert_eq!(d.get("rule.0.port"), json!(23));
        assert_eq!(d.id(), "i-1");
    }

    #[test]
    fn test_set_new_only_on_computed() {
        let mut d = diff();
        let err = d.set_new("name", "c").unwrap_err();
        assert!(err.to_string().contains("SetNew only operates on computed keys"));
        assert!(d.set_new("nope", 1).is_err());

        d.set_new("version", 4).unwrap();
        assert_eq!(d.get("version"), json!(4));
        assert!(d.updated_keys().contains(&"version".to_string()));
        let change = d.diff_change("version").unwrap();
        assert!(change.customized);
        assert_eq!(change.new, Some(json!(4)));
    }

    #[test]
    fn test_set_new_computed() {
        let mut d = diff();
        assert!(d.new_value_known("version"));
        d.set_new_computed("version").unwrap();
        assert!(!d.new_value_known("version"));
        assert_eq!(d.get_ok("version"), None);

        d.set_new("version", 5).unwrap();
        assert!(d.new_value_known("version"));
    }

    #[test]
    fn test_force_new() {
        let mut d = diff();
        let err = d.force_new("size").unwrap_err();
        assert!(err.to_string().contains("ForceNew: No changes for size"));

        d.force_new("rule.0.port").unwrap();
        let rule = d.schema()["rule"].elem_resource().unwrap();
        assert!(rule.schema["port"].force_new);
        assert!(!schema()["rule"].elem_resource().unwrap().schema["port"].force_new);
        assert_eq!(d.updated_keys(), vec!["rule".to_string()]);
    }

    #[test]
    fn test_clear_drops_nested_changes() {
        let mut planned = InstanceDiff::new();
        planned.set_attribute("version", change("3", "4"));
        let mut d = ResourceDiff::new(schema(), None, Some(prior()), planned);
        assert_eq!(d.get("version"), json!(4));
        d.clear("version").unwrap();
        assert_eq!(d.get("version"), json!(3));
        assert!(d.clear("name").is_err());
    }
}
