//! The view of one resource instance handed to provider callbacks.
//!
//! [`ResourceData`] answers reads by layering the prior state, the
//! configuration, the planned diff and any values the callback has written,
//! in that order of priority. [`ResourceData::state`] folds all of it back
//! into a flatmap state once the callback returns.

use crate::error::{ProviderError, SchemaError};
use crate::helper::diff::{Change, Differ};
use crate::helper::field_reader::{FieldReadResult, Level, MapFieldReader, MultiLevelFieldReader};
use crate::helper::field_reader_config::ConfigFieldReader;
use crate::helper::field_reader_diff::DiffFieldReader;
use crate::helper::field_writer::MapFieldWriter;
use crate::helper::schema::{parse_address, resolve_address, AddressTarget, SchemaMap};
use crate::helper::timeout::{ResourceTimeout, TimeoutKind};
use crate::instance::{InstanceDiff, InstanceState, ResourceConfig};
use crate::path::AttributePath;
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A read resolved against the schema.
#[derive(Debug, Clone)]
pub(crate) struct GetResult {
    pub value: Json,
    pub value_processed: Option<Json>,
    pub exists: bool,
    pub computed: bool,
    pub zero: Json,
}

/// Split `foo.#` or `foo.%` into the collection key and a count marker.
pub(crate) fn split_count(key: &str) -> (&str, bool) {
    match key.strip_suffix(".#").or_else(|| key.strip_suffix(".%")) {
        Some(base) => (base, true),
        None => (key, false),
    }
}

/// The value an absent read at `path` reports.
pub(crate) fn zero_at(schema: &SchemaMap, path: &AttributePath) -> Json {
    match resolve_address(schema, path) {
        Some(AddressTarget::Field(field)) => field.zero_value(),
        Some(AddressTarget::Object(_)) => json!({}),
        None => Json::Null,
    }
}

pub(crate) fn finish_read(
    raw: FieldReadResult,
    count: bool,
    schema: &SchemaMap,
    path: &AttributePath,
) -> GetResult {
    let zero = if count { json!(0) } else { zero_at(schema, path) };
    GetResult {
        value: raw.value.unwrap_or_else(|| zero.clone()),
        value_processed: raw.value_processed,
        exists: raw.exists,
        computed: raw.computed,
        zero,
    }
}

/// Attribute access for resource callbacks.
#[derive(Debug, Clone)]
pub struct ResourceData {
    schema: Arc<SchemaMap>,
    state: Option<InstanceState>,
    config: Option<ResourceConfig>,
    diff: Option<InstanceDiff>,
    set_writer: MapFieldWriter,
    id: Option<String>,
    type_name: Option<String>,
    meta: BTreeMap<String, Json>,
    timeouts: ResourceTimeout,
    is_new: bool,
}

impl ResourceData {
    pub(crate) fn new(
        schema: Arc<SchemaMap>,
        state: Option<InstanceState>,
        config: Option<ResourceConfig>,
        diff: Option<InstanceDiff>,
    ) -> Self {
        let meta = state.as_ref().map(|s| s.meta.clone()).unwrap_or_default();
        let type_name = state.as_ref().and_then(|s| s.type_name.clone());
        Self {
            schema,
            state,
            config,
            diff,
            set_writer: MapFieldWriter::new(),
            id: None,
            type_name,
            meta,
            timeouts: ResourceTimeout::default(),
            is_new: false,
        }
    }

    pub(crate) fn set_timeouts(&mut self, timeouts: ResourceTimeout) {
        self.timeouts = timeouts;
    }

    /// The schema this data is read against.
    pub fn schema(&self) -> &SchemaMap {
        &self.schema
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
        let diff = self
            .diff
            .as_ref()
            .map(|d| DiffFieldReader::new(schema, d, &source));
        let set = MapFieldReader::new(schema, self.set_writer.map());

        let mut multi = MultiLevelFieldReader::new();
        if let Some(r) = &state {
            multi.add_level(Level::State, r);
        }
        if let Some(r) = &config {
            multi.add_level(Level::Config, r);
        }
        if let Some(r) = &diff {
            multi.add_level(Level::Diff, r);
        }
        multi.add_level(Level::Set, &set);
        f(&multi)
    }

    pub(crate) fn get_raw(&self, key: &str, level: Level, exact: bool) -> Result<GetResult, SchemaError> {
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

    /// The current value of `key`, or its zero value when unset.
    ///
    /// Keys are dotted: `rule.0.port`, `tags.env`, `ports.#`.
    pub fn get(&self, key: &str) -> Json {
        self.read_or_warn(key, Level::Set)
            .map(|r| r.value)
            .unwrap_or(Json::Null)
    }

    /// The value of `key` when it is set, known and not the zero value.
    pub fn get_ok(&self, key: &str) -> Option<Json> {
        let r = self.read_or_warn(key, Level::Set)?;
        (r.exists && !r.computed && r.value != r.zero).then_some(r.value)
    }

    /// The value of `key` when it is set and known, even if it is the zero
    /// value.
    pub fn get_ok_exists(&self, key: &str) -> Option<Json> {
        let r = self.read_or_warn(key, Level::Set)?;
        (r.exists && !r.computed).then_some(r.value)
    }

    /// The prior and planned values of `key`.
    pub fn get_change(&self, key: &str) -> (Json, Json) {
        let old = self.read_or_warn(key, Level::State).map(|r| r.value);
        let new = self.read_or_warn(key, Level::Diff).map(|r| r.value);
        (old.unwrap_or(Json::Null), new.unwrap_or(Json::Null))
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

    /// Whether the value of `key` is only known after apply.
    pub fn is_computed(&self, key: &str) -> bool {
        self.read_or_warn(key, Level::Set)
            .map(|r| r.computed)
            .unwrap_or(false)
    }

    /// Write a whole top-level attribute.
    pub fn set(&mut self, key: &str, value: impl Into<Json>) -> Result<(), ProviderError> {
        let path = parse_address(key, &self.schema)?;
        self.set_writer.write_field(&self.schema, &path, &value.into())?;
        Ok(())
    }

    /// The instance id; empty when the instance does not exist.
    pub fn id(&self) -> String {
        if let Some(id) = &self.id {
            return id.clone();
        }
        match &self.state {
            Some(state) if !state.id.is_empty() => state.id.clone(),
            Some(state) => state.attributes.get("id").cloned().unwrap_or_default(),
            None => String::new(),
        }
    }

    /// Set the instance id. An empty id marks the instance as gone.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    /// Override the resource type of this instance, for importers that
    /// return instances of other types.
    pub fn set_type(&mut self, type_name: impl Into<String>) {
        self.type_name = Some(type_name.into());
    }

    /// Flag the data as belonging to an instance being created.
    pub fn mark_new_resource(&mut self) {
        self.is_new = true;
    }

    /// Whether the instance is being created.
    pub fn is_new_resource(&self) -> bool {
        self.is_new
    }

    /// The time allowed for an operation of `kind`.
    pub fn timeout(&self, kind: TimeoutKind) -> Duration {
        self.timeouts.get(kind)
    }

    /// Fold everything read and written into a new state.
    ///
    /// Returns `None` when the id is empty.
    pub fn state(&self) -> Option<InstanceState> {
        let id = self.id();
        if id.is_empty() {
            return None;
        }
        let mut result = InstanceState {
            id: id.clone(),
            meta: self.meta.clone(),
            type_name: self.type_name.clone(),
            ..InstanceState::default()
        };
        self.timeouts.state_encode(&mut result);

        let mut writer = MapFieldWriter::new();
        for name in self.schema.keys() {
            let raw = match self.get_raw(name, Level::Set, false) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(key = %name, error = %e, "skipping unreadable attribute in state");
                    continue;
                },
            };
            if !raw.exists || raw.computed {
                continue;
            }
            let value = raw.value_processed.unwrap_or(raw.value);
            if let Err(e) = writer.write_field(&self.schema, &AttributePath::root(name.clone()), &value) {
                warn!(key = %name, error = %e, "error writing attribute to state");
                return None;
            }
        }
        result.attributes = writer.into_map();
        result.attributes.insert("id".to_string(), id);
        result.tainted = self.state.as_ref().map(|s| s.tainted).unwrap_or(false);
        Some(result)
    }
}

impl Differ for ResourceData {
    fn diff_change(&self, key: &str) -> Result<Change, SchemaError> {
        let old = self.get_raw(key, Level::State, false)?;
        let new = self.get_raw(key, Level::Config, true)?;
        Ok(Change {
            old: old.exists.then_some(old.value),
            new: new.exists.then_some(new.value),
            computed: new.computed,
            customized: false,
        })
    }

    fn get_ok(&self, key: &str) -> Option<Json> {
        ResourceData::get_ok(self, key)
    }

    fn id(&self) -> String {
        ResourceData::id(self)
    }

    fn as_resource_data(&self) -> Option<&ResourceData> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::schema::{Schema, ValueKind};
    use crate::instance::ResourceAttrDiff;
    use crate::value::Value;

    fn schema() -> Arc<SchemaMap> {
        Arc::new(SchemaMap::from([
            ("name".to_string(), Schema::string().required()),
            ("size".to_string(), Schema::int().optional()),
            ("enabled".to_string(), Schema::bool().optional()),
            ("arn".to_string(), Schema::string().computed()),
            ("tags".to_string(), Schema::map(ValueKind::String).optional()),
            (
                "ids".to_string(),
                Schema::set(ValueKind::Int)
                    .optional()
                    .with_set_func(|v| v.as_i64().unwrap_or_default()),
            ),
        ]))
    }

    fn prior() -> InstanceState {
        let mut state = InstanceState::with_id("i-1");
        for (k, v) in [
            ("name", "old"),
            ("size", "2"),
            ("enabled", "false"),
            ("arn", "arn:1"),
            ("ids.#", "1"),
            ("ids.7", "7"),
        ] {
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

    #[test]
    fn test_reads_layer_state_and_diff() {
        let mut diff = InstanceDiff::new();
        diff.set_attribute("name", change("old", "new"));
        let d = ResourceData::new(schema(), Some(prior()), None, Some(diff));

        assert_eq!(d.get("name"), json!("new"));
        assert_eq!(d.get("size"), json!(2));
        assert_eq!(d.get_change("name"), (json!("old"), json!("new")));
        assert!(d.has_change("name"));
        assert!(!d.has_change("size"));
        assert!(d.has_changes(&["size", "name"]));
        assert_eq!(d.get("ids"), json!([7]));
        assert_eq!(d.get("ids.#"), json!(1));
        assert_eq!(d.id(), "i-1");
    }

    #[test]
    fn test_get_ok_zero_values() {
        let d = ResourceData::new(schema(), Some(prior()), None, None);
        assert_eq!(d.get_ok("enabled"), None);
        assert_eq!(d.get_ok_exists("enabled"), Some(json!(false)));
        assert_eq!(d.get_ok("tags"), None);
        assert_eq!(d.get("tags"), json!({}));
        assert_eq!(d.get_ok("size"), Some(json!(2)));
    }

    #[test]
    fn test_set_then_state() {
        let mut diff = InstanceDiff::new();
        diff.set_attribute(
            "arn",
            ResourceAttrDiff {
                new_computed: true,
                ..ResourceAttrDiff::default()
            },
        );
        diff.set_attribute("name", change("", "web"));
        let mut d = ResourceData::new(schema(), None, None, Some(diff));
        assert!(d.state().is_none());
        assert!(d.is_computed("arn"));

        d.set_id("i-9");
        d.set("tags", json!({"env": "prod"})).unwrap();
        let state = d.state().unwrap();
        assert_eq!(state.id, "i-9");
        assert_eq!(state.attributes.get("id").map(String::as_str), Some("i-9"));
        assert_eq!(state.attributes.get("name").map(String::as_str), Some("web"));
        assert_eq!(state.attributes.get("tags.env").map(String::as_str), Some("prod"));
        assert!(!state.attributes.contains_key("arn"));

        d.set("arn", "arn:9").unwrap();
        let state = d.state().unwrap();
        assert_eq!(state.attributes.get("arn").map(String::as_str), Some("arn:9"));

        d.set_id("");
        assert!(d.state().is_none());
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut d = ResourceData::new(schema(), Some(prior()), None, None);
        assert!(d.set("size", "big").is_err());
        assert!(d.set("missing", 1).is_err());
        assert_eq!(d.get("size"), json!(2));
    }

    #[test]
    fn test_config_change_for_diffing() {
        let config = ResourceConfig::new(Value::object([
            ("name", Value::string("web")),
            ("size", Value::Unknown),
        ]));
        let d = ResourceData::new(schema(), Some(prior()), Some(config), None);
        let name = d.diff_change("name").unwrap();
        assert_eq!(name.old, Some(json!("old")));
        assert_eq!(name.new, Some(json!("web")));
        let size = d.diff_change("size").unwrap();
        assert!(size.computed);
        let enabled = d.diff_change("enabled").unwrap();
        assert_eq!(enabled.old, Some(json!(false)));
        assert_eq!(enabled.new, None);
    }

    #[test]
    fn test_state_keeps_meta_and_timeouts() {
        let mut state = prior();
        state.tainted = true;
        state
            .meta
            .insert("schema_version".to_string(), json!("1"));
        let mut d = ResourceData::new(schema(), Some(state), None, None);
        d.set_timeouts(ResourceTimeout::new().with_create(Duration::from_secs(60)));
        assert_eq!(d.timeout(TimeoutKind::Create), Duration::from_secs(60));

        let out = d.state().unwrap();
        assert!(out.tainted);
        assert_eq!(out.meta.get("schema_version"), Some(&json!("1")));
        assert!(ResourceTimeout::state_decode(&out).is_some());
    }
}
