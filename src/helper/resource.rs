//! Resources: a schema plus the callbacks that manage its instances.

use crate::diag::{Diagnostic, DiagnosticsExt};
use crate::error::{ProviderError, SchemaError};
use crate::helper::diff::schema_map_diff;
use crate::helper::resource_data::ResourceData;
use crate::helper::resource_diff::ResourceDiff;
use crate::helper::schema::{
    internal_validate, SchemaMap, RESERVED_DATA_SOURCE_FIELDS, RESERVED_RESOURCE_FIELDS,
};
use crate::helper::timeout::{ResourceTimeout, TimeoutKind, TIMEOUTS_CONFIG_KEY};
use crate::configschema::IdentitySchema;
use crate::flatmap::flatten;
use crate::instance::{InstanceDiff, InstanceState, ResourceConfig};
use crate::stop::RequestContext;
use crate::value::{Value, ValueType};
use async_trait::async_trait;
use serde_json::{Map, Value as Json};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Meta key holding the schema version a state was written with.
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// The value returned by the provider's configure callback.
///
/// It is handed unchanged to every resource callback; callbacks get at the
/// concrete client type with [`Meta::get`].
#[derive(Clone, Default)]
pub struct Meta(Option<Arc<dyn Any + Send + Sync>>);

impl Meta {
    /// Wrap a configured client.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    /// The wrapped value, if it is a `T`.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|v| v.downcast_ref::<T>())
    }

    /// Whether the provider has been configured with a value.
    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_set() { "Meta(<set>)" } else { "Meta(<unset>)" })
    }
}

/// Lifecycle callbacks of a resource or data source.
///
/// Callbacks return warnings (or errors) as diagnostics; an `Err` aborts
/// the operation. Data sources only implement [`ResourceHandler::read`].
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Create the remote object and call [`ResourceData::set_id`].
    async fn create(
        &self,
        _ctx: &RequestContext,
        _d: &mut ResourceData,
        _meta: &Meta,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Err(ProviderError::Unimplemented("create".to_string()))
    }

    /// Refresh `d` from the remote object. Clearing the id marks the object
    /// as gone.
    async fn read(
        &self,
        _ctx: &RequestContext,
        _d: &mut ResourceData,
        _meta: &Meta,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Err(ProviderError::Unimplemented("read".to_string()))
    }

    /// Update the remote object in place.
    async fn update(
        &self,
        _ctx: &RequestContext,
        _d: &mut ResourceData,
        _meta: &Meta,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Err(ProviderError::Unimplemented("update".to_string()))
    }

    /// Delete the remote object.
    async fn delete(
        &self,
        _ctx: &RequestContext,
        _d: &mut ResourceData,
        _meta: &Meta,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(Vec::new())
    }
}

/// Turns an import id into one or more instances.
#[async_trait]
pub trait ImportStateHandler: Send + Sync {
    /// Populate `d`, whose id is the import id, and return the instances to
    /// import.
    async fn import(
        &self,
        ctx: &RequestContext,
        d: ResourceData,
        meta: &Meta,
    ) -> Result<Vec<ResourceData>, ProviderError>;
}

/// Import support of a resource.
#[derive(Clone, Default)]
pub struct Importer {
    handler: Option<Arc<dyn ImportStateHandler>>,
}

impl Importer {
    /// Import the id as-is and let the next read fill in the rest.
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Import through `handler`.
    pub fn new(handler: impl ImportStateHandler + 'static) -> Self {
        Self {
            handler: Some(Arc::new(handler)),
        }
    }

    pub(crate) async fn import(
        &self,
        ctx: &RequestContext,
        d: ResourceData,
        meta: &Meta,
    ) -> Result<Vec<ResourceData>, ProviderError> {
        match &self.handler {
            Some(handler) => handler.import(ctx, d, meta).await,
            None => Ok(vec![d]),
        }
    }
}

impl fmt::Debug for Importer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Importer")
            .field("passthrough", &self.handler.is_none())
            .finish()
    }
}

/// Transform of a structured state from one schema version to the next.
pub type StateUpgradeFunc =
    Arc<dyn Fn(Map<String, Json>, &Meta) -> Result<Map<String, Json>, ProviderError> + Send + Sync>;

/// Legacy migration of a flatmap state from any older version.
pub type StateMigrateFunc =
    Arc<dyn Fn(u64, InstanceState, &Meta) -> Result<InstanceState, ProviderError> + Send + Sync>;

/// Adjusts a plan after structural diffing.
pub type CustomizeDiffFunc =
    Arc<dyn Fn(&mut ResourceDiff, &Meta) -> Result<(), ProviderError> + Send + Sync>;

/// Upgrades states stored at `version` to `version + 1`.
#[derive(Clone)]
pub struct StateUpgrader {
    /// The version this upgrader accepts.
    pub version: u64,
    /// The shape of states at `version`.
    pub ty: ValueType,
    /// The transform.
    pub upgrade: StateUpgradeFunc,
}

impl StateUpgrader {
    /// An upgrader from `version`, whose states have type `ty`.
    pub fn new<F>(version: u64, ty: ValueType, upgrade: F) -> Self
    where
        F: Fn(Map<String, Json>, &Meta) -> Result<Map<String, Json>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            version,
            ty,
            upgrade: Arc::new(upgrade),
        }
    }
}

impl fmt::Debug for StateUpgrader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateUpgrader")
            .field("version", &self.version)
            .field("ty", &self.ty)
            .finish_non_exhaustive()
    }
}

/// A managed resource, a data source, or the element of a nested block.
#[derive(Clone, Default)]
pub struct Resource {
    /// The attributes.
    pub schema: Arc<SchemaMap>,
    /// Version of the schema, bumped with every state upgrader.
    pub schema_version: u64,
    /// Lifecycle callbacks.
    pub handler: Option<Arc<dyn ResourceHandler>>,
    /// Import support.
    pub importer: Option<Importer>,
    /// Upgraders for every version from the first one up to `schema_version`.
    pub state_upgraders: Vec<StateUpgrader>,
    /// Legacy flatmap migration for versions before the first upgrader.
    pub migrate_state: Option<StateMigrateFunc>,
    /// Plan adjustment after diffing.
    pub customize_diff: Option<CustomizeDiffFunc>,
    /// Declared operation timeouts.
    pub timeouts: Option<ResourceTimeout>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Deprecation message shown when the resource is used.
    pub deprecation_message: Option<String>,
    /// Identity schema.
    pub identity: Option<IdentitySchema>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("schema", &self.schema)
            .field("schema_version", &self.schema_version)
            .field("importer", &self.importer)
            .field("state_upgraders", &self.state_upgraders)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl Resource {
    /// An empty resource.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attributes.
    pub fn with_schema(mut self, schema: SchemaMap) -> Self {
        self.schema = Arc::new(schema);
        self
    }

    /// Set the schema version.
    pub fn with_schema_version(mut self, version: u64) -> Self {
        self.schema_version = version;
        self
    }

    /// Set the lifecycle callbacks.
    pub fn with_handler(mut self, handler: impl ResourceHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Enable import.
    pub fn with_importer(mut self, importer: Importer) -> Self {
        self.importer = Some(importer);
        self
    }

    /// Append a state upgrader.
    pub fn with_state_upgrader(mut self, upgrader: StateUpgrader) -> Self {
        self.state_upgraders.push(upgrader);
        self
    }

    /// Set the legacy flatmap migration.
    pub fn with_migrate_state<F>(mut self, f: F) -> Self
    where
        F: Fn(u64, InstanceState, &Meta) -> Result<InstanceState, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        self.migrate_state = Some(Arc::new(f));
        self
    }

    /// Set the CustomizeDiff callback.
    pub fn with_customize_diff<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut ResourceDiff, &Meta) -> Result<(), ProviderError> + Send + Sync + 'static,
    {
        self.customize_diff = Some(Arc::new(f));
        self
    }

    /// Declare operation timeouts.
    pub fn with_timeouts(mut self, timeouts: ResourceTimeout) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the resource deprecated.
    pub fn with_deprecation_message(mut self, message: impl Into<String>) -> Self {
        self.deprecation_message = Some(message.into());
        self
    }

    /// Set the identity schema.
    pub fn with_identity(mut self, identity: IdentitySchema) -> Self {
        self.identity = Some(identity);
        self
    }

    /// A [`ResourceData`] over `state`, with its stored timeouts.
    pub fn data(&self, state: Option<&InstanceState>) -> ResourceData {
        let mut d = ResourceData::new(self.schema.clone(), state.cloned(), None, None);
        let timeouts = state
            .and_then(ResourceTimeout::state_decode)
            .or(self.timeouts)
            .unwrap_or_default();
        d.set_timeouts(timeouts);
        d
    }

    /// Plan `config` against `state`, recomputing the whole instance when
    /// it has to be replaced. Configured timeouts are stored in the diff.
    pub fn diff(
        &self,
        state: Option<&InstanceState>,
        config: &ResourceConfig,
        meta: &Meta,
    ) -> Result<Option<InstanceDiff>, ProviderError> {
        let timeouts = ResourceTimeout::config_decode(self.timeouts.as_ref(), config)?;
        let diff = schema_map_diff(
            &self.schema,
            state,
            config,
            self.customize_diff.as_ref(),
            meta,
            true,
        )?;
        match diff {
            Some(mut diff) => {
                timeouts.diff_encode(&mut diff);
                Ok(Some(diff))
            },
            None => {
                debug!("instance diff is empty");
                Ok(None)
            },
        }
    }

    /// Plan `config` against `state` without replacement handling.
    ///
    /// Every record's old value is taken from the prior state, and an empty
    /// diff is returned rather than `None`.
    pub fn simple_diff(
        &self,
        state: Option<&InstanceState>,
        config: &ResourceConfig,
        meta: &Meta,
    ) -> Result<InstanceDiff, ProviderError> {
        let mut diff = schema_map_diff(
            &self.schema,
            state,
            config,
            self.customize_diff.as_ref(),
            meta,
            false,
        )?
        .unwrap_or_default();
        if let Some(state) = state {
            for (k, attr) in diff.attributes.iter_mut() {
                attr.old = state.attributes.get(k).cloned().unwrap_or_default();
            }
        }
        Ok(diff)
    }

    fn handler(&self) -> Result<&Arc<dyn ResourceHandler>, ProviderError> {
        self.handler
            .as_ref()
            .ok_or_else(|| ProviderError::Unimplemented("resource has no handler".to_string()))
    }

    fn record_schema_version(&self, state: Option<InstanceState>) -> Option<InstanceState> {
        state.map(|mut s| {
            if self.schema_version > 0 {
                s.meta.insert(
                    SCHEMA_VERSION_KEY.to_string(),
                    Json::String(self.schema_version.to_string()),
                );
            }
            s
        })
    }

    /// Carry out `diff` on the instance `state`.
    ///
    /// A destroying diff deletes the instance and returns `None`. Otherwise
    /// the instance is created when it has no id and updated when it has.
    /// The returned state reflects whatever the callbacks managed to do,
    /// even when they reported errors.
    pub async fn apply(
        &self,
        ctx: &RequestContext,
        state: Option<&InstanceState>,
        diff: &InstanceDiff,
        meta: &Meta,
    ) -> (Option<InstanceState>, Vec<Diagnostic>) {
        let handler = match self.handler() {
            Ok(handler) => handler,
            Err(e) => return (state.cloned(), e.into_diagnostics()),
        };
        let timeouts = ResourceTimeout::diff_decode(diff)
            .or_else(|| state.and_then(ResourceTimeout::state_decode))
            .unwrap_or_default();
        let mut d = ResourceData::new(self.schema.clone(), state.cloned(), None, Some(diff.clone()));
        d.set_timeouts(timeouts);
        let mut diags = Vec::new();

        if diff.destroy || diff.requires_new() {
            if state.map(|s| !s.id.is_empty()).unwrap_or(false) {
                let ctx = ctx.with_timeout(d.timeout(TimeoutKind::Delete));
                info!(id = %d.id(), "deleting instance");
                match handler.delete(&ctx, &mut d, meta).await {
                    Ok(more) => diags.extend(more),
                    Err(e) => diags.extend(e.into_diagnostics()),
                }
                if diags.has_error() {
                    return (self.record_schema_version(d.state()), diags);
                }
                d.set_id("");
            }
            if !diff.requires_new() {
                return (None, diags);
            }
            d = ResourceData::new(self.schema.clone(), None, None, Some(diff.clone()));
            d.set_timeouts(timeouts);
        }

        let result = if d.id().is_empty() {
            d.mark_new_resource();
            let ctx = ctx.with_timeout(d.timeout(TimeoutKind::Create));
            info!("creating instance");
            handler.create(&ctx, &mut d, meta).await
        } else {
            let ctx = ctx.with_timeout(d.timeout(TimeoutKind::Update));
            info!(id = %d.id(), "updating instance");
            handler.update(&ctx, &mut d, meta).await
        };
        match result {
            Ok(more) => diags.extend(more),
            Err(e) => diags.extend(e.into_diagnostics()),
        }
        (self.record_schema_version(d.state()), diags)
    }

    /// Refresh an existing instance. `None` means it no longer exists.
    pub async fn refresh(
        &self,
        ctx: &RequestContext,
        state: &InstanceState,
        meta: &Meta,
    ) -> (Option<InstanceState>, Vec<Diagnostic>) {
        if state.id.is_empty() {
            return (None, Vec::new());
        }
        let handler = match self.handler() {
            Ok(handler) => handler,
            Err(e) => return (Some(state.clone()), e.into_diagnostics()),
        };
        let mut d = self.data(Some(state));
        let ctx = ctx.with_timeout(d.timeout(TimeoutKind::Read));
        let diags = match handler.read(&ctx, &mut d, meta).await {
            Ok(diags) => diags,
            Err(e) => e.into_diagnostics(),
        };
        let refreshed = d.state().filter(|s| !s.id.is_empty());
        (self.record_schema_version(refreshed), diags)
    }

    /// Read a data source from scratch using the planned `diff`.
    ///
    /// A data source that sets no id gets the placeholder id `-`.
    pub async fn read_data_apply(
        &self,
        ctx: &RequestContext,
        diff: Option<&InstanceDiff>,
        meta: &Meta,
    ) -> (Option<InstanceState>, Vec<Diagnostic>) {
        let handler = match self.handler() {
            Ok(handler) => handler,
            Err(e) => return (None, e.into_diagnostics()),
        };
        let mut d = ResourceData::new(self.schema.clone(), None, None, diff.cloned());
        if let Some(timeouts) = diff.and_then(ResourceTimeout::diff_decode) {
            d.set_timeouts(timeouts);
        }
        let ctx = ctx.with_timeout(d.timeout(TimeoutKind::Read));
        let diags = match handler.read(&ctx, &mut d, meta).await {
            Ok(diags) => diags,
            Err(e) => e.into_diagnostics(),
        };
        if d.id().is_empty() {
            d.set_id("-");
        }
        (self.record_schema_version(d.state()), diags)
    }

    /// The flatmap state of a structured value, with set elements keyed
    /// by their hash codes.
    pub fn shim_instance_state_from_value(&self, value: &Value) -> InstanceState {
        let attributes = flatten(value);
        let mut raw = InstanceState::with_id(attributes.get("id").cloned().unwrap_or_default());
        raw.attributes = attributes;
        raw.meta.insert(
            SCHEMA_VERSION_KEY.to_string(),
            Json::String(self.schema_version.to_string()),
        );
        let d = ResourceData::new(self.schema.clone(), Some(raw), None, None);
        d.state().unwrap_or_default()
    }

    /// Check the definition of this resource.
    ///
    /// `top_level` resources may not use reserved names; `writable` ones
    /// are managed resources rather than data sources.
    pub fn internal_validate(&self, top_level: bool, writable: bool) -> Result<(), SchemaError> {
        let mut errors = Vec::new();
        if top_level {
            let reserved = if writable {
                RESERVED_RESOURCE_FIELDS
            } else {
                RESERVED_DATA_SOURCE_FIELDS
            };
            for name in self.schema.keys() {
                // A computed id is the one exception.
                if name == "id" && self.schema[name].computed && writable {
                    continue;
                }
                if reserved.contains(&name.as_str()) {
                    errors.push(SchemaError::definition(
                        name.clone(),
                        format!("{} is a reserved field name", name),
                    ));
                }
            }
        }

        if writable {
            let mut last_version: Option<u64> = None;
            for upgrader in &self.state_upgraders {
                if let Some(last) = last_version {
                    if upgrader.version != last + 1 {
                        errors.push(SchemaError::definition(
                            "state_upgraders",
                            format!(
                                "missing schema version between {} and {}",
                                last, upgrader.version
                            ),
                        ));
                    }
                }
                if upgrader.version >= self.schema_version {
                    errors.push(SchemaError::definition(
                        "state_upgraders",
                        format!(
                            "StateUpgrader version {} is >= current version {}",
                            upgrader.version, self.schema_version
                        ),
                    ));
                }
                last_version = Some(upgrader.version);
            }
            if let Some(last) = last_version {
                if last + 1 != self.schema_version {
                    errors.push(SchemaError::definition(
                        "state_upgraders",
                        format!(
                            "missing StateUpgrader between {} and {}",
                            last, self.schema_version
                        ),
                    ));
                }
            }
            if self.timeouts.is_some() && self.schema.contains_key(TIMEOUTS_CONFIG_KEY) {
                errors.push(SchemaError::definition(
                    TIMEOUTS_CONFIG_KEY,
                    "Timeouts cannot be declared together with a \"timeouts\" attribute",
                ));
            }
        }

        if let Err(e) = internal_validate(&self.schema) {
            errors.push(e);
        }
        SchemaError::collect(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::schema::{Schema, ValueKind};
    use crate::instance::ResourceAttrDiff;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        creates: AtomicUsize,
        updates: AtomicUsize,
        deletes: AtomicUsize,
    }

    #[async_trait]
    impl ResourceHandler for Arc<Recorder> {
        async fn create(
            &self,
            ctx: &RequestContext,
            d: &mut ResourceData,
            meta: &Meta,
        ) -> Result<Vec<Diagnostic>, ProviderError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            assert_eq!(ctx.timeout(), Some(Duration::from_secs(300)));
            assert!(d.is_new_resource());
            let region = meta.get::<String>().cloned().unwrap_or_default();
            d.set_id("i-new");
            d.set("arn", format!("arn:{}", region))?;
            Ok(Vec::new())
        }

        async fn read(
            &self,
            _ctx: &RequestContext,
            d: &mut ResourceData,
            _meta: &Meta,
        ) -> Result<Vec<Diagnostic>, ProviderError> {
            if d.get("name") == json!("gone") {
                d.set_id("");
            }
            Ok(vec![Diagnostic::warning("read is slow")])
        }

        async fn update(
            &self,
            _ctx: &RequestContext,
            _d: &mut ResourceData,
            _meta: &Meta,
        ) -> Result<Vec<Diagnostic>, ProviderError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn delete(
            &self,
            _ctx: &RequestContext,
            _d: &mut ResourceData,
            _meta: &Meta,
        ) -> Result<Vec<Diagnostic>, ProviderError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    fn resource(recorder: &Arc<Recorder>) -> Resource {
        Resource::new()
            .with_schema(SchemaMap::from([
                ("name".to_string(), Schema::string().required()),
                ("arn".to_string(), Schema::string().computed()),
                ("tags".to_string(), Schema::map(ValueKind::String).optional()),
            ]))
            .with_schema_version(1)
            .with_state_upgrader(StateUpgrader::new(0, ValueType::object([("name", ValueType::String)]), |m, _| Ok(m)))
            .with_handler(recorder.clone())
            .with_timeouts(ResourceTimeout::new().with_create(Duration::from_secs(300)))
    }

    fn config(name: &str) -> ResourceConfig {
        ResourceConfig::new(Value::object([("name", Value::string(name))]))
    }

    #[tokio::test]
    async fn test_create_then_update() {
        let recorder = Arc::new(Recorder::default());
        let r = resource(&recorder);
        let ctx = RequestContext::default();
        let meta = Meta::new("us-east-1".to_string());

        let diff = r.diff(None, &config("web"), &meta).unwrap().unwrap();
        assert!(ResourceTimeout::diff_decode(&diff).is_some());
        let (state, diags) = r.apply(&ctx, None, &diff, &meta).await;
        assert!(diags.is_empty(), "{:?}", diags);
        let state = state.unwrap();
        assert_eq!(state.id, "i-new");
        assert_eq!(state.attributes.get("arn").map(String::as_str), Some("arn:us-east-1"));
        assert_eq!(state.meta.get(SCHEMA_VERSION_KEY), Some(&json!("1")));
        assert_eq!(recorder.creates.load(Ordering::SeqCst), 1);

        let diff = r.simple_diff(Some(&state), &config("api"), &meta).unwrap();
        assert_eq!(diff.attribute("name").map(|a| a.new.as_str()), Some("api"));
        let (state, _) = r.apply(&ctx, Some(&state), &diff, &meta).await;
        assert_eq!(state.unwrap().attributes.get("name").map(String::as_str), Some("api"));
        assert_eq!(recorder.updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_destroy() {
        let recorder = Arc::new(Recorder::default());
        let r = resource(&recorder);
        let mut state = InstanceState::with_id("i-1");
        state.attributes.insert("name".to_string(), "web".to_string());
        let diff = InstanceDiff {
            destroy: true,
            ..InstanceDiff::default()
        };
        let (out, diags) = r.apply(&RequestContext::default(), Some(&state), &diff, &Meta::default()).await;
        assert!(out.is_none());
        assert!(diags.is_empty());
        assert_eq!(recorder.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_and_gone() {
        let recorder = Arc::new(Recorder::default());
        let r = resource(&recorder);
        let mut state = InstanceState::with_id("i-1");
        state.attributes.insert("name".to_string(), "web".to_string());
        let (out, diags) = r.refresh(&RequestContext::default(), &state, &Meta::default()).await;
        assert_eq!(out.unwrap().id, "i-1");
        assert_eq!(diags.len(), 1);

        state.attributes.insert("name".to_string(), "gone".to_string());
        let (out, _) = r.refresh(&RequestContext::default(), &state, &Meta::default()).await;
        assert!(out.is_none());

        let (out, diags) = r
            .refresh(&RequestContext::default(), &InstanceState::default(), &Meta::default())
            .await;
        assert!(out.is_none() && diags.is_empty());
    }

    #[tokio::test]
    async fn test_data_source_placeholder_id() {
        let recorder = Arc::new(Recorder::default());
        let r = resource(&recorder);
        let mut diff = InstanceDiff::new();
        diff.set_attribute(
            "name",
            ResourceAttrDiff {
                new: "web".to_string(),
                ..ResourceAttrDiff::default()
            },
        );
        let (state, _) = r
            .read_data_apply(&RequestContext::default(), Some(&diff), &Meta::default())
            .await;
        let state = state.unwrap();
        assert_eq!(state.id, "-");
        assert_eq!(state.attributes.get("name").map(String::as_str), Some("web"));
    }

    #[test]
    fn test_shim_rehashes_sets() {
        let r = Resource::new().with_schema(SchemaMap::from([(
            "ids".to_string(),
            Schema::set(ValueKind::Int)
                .optional()
                .with_set_func(|v| v.as_i64().unwrap_or_default()),
        )]));
        let value = Value::object([
            ("id", Value::string("i-1")),
            ("ids", Value::Set(vec![Value::int(7), Value::int(3)])),
        ]);
        let state = r.shim_instance_state_from_value(&value);
        assert_eq!(state.id, "i-1");
        assert_eq!(state.attributes.get("ids.7").map(String::as_str), Some("7"));
        assert_eq!(state.attributes.get("ids.3").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_internal_validate_upgraders() {
        let recorder = Arc::new(Recorder::default());
        assert!(resource(&recorder).internal_validate(true, true).is_ok());

        let gap = resource(&recorder).with_schema_version(3);
        let err = gap.internal_validate(true, true).unwrap_err().to_string();
        assert!(err.contains("missing StateUpgrader between 0 and 3"), "{}", err);

        let reserved = Resource::new().with_schema(SchemaMap::from([(
            "count".to_string(),
            Schema::int().optional(),
        )]));
        let err = reserved.internal_validate(true, true).unwrap_err().to_string();
        assert!(err.contains("count is a reserved field name"));
        assert!(reserved.internal_validate(false, true).is_ok());
    }
}
