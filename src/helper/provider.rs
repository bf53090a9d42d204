//! The provider: its configuration schema and the resource table.

use crate::diag::Diagnostic;
use crate::error::{ProviderError, SchemaError};
use crate::helper::diff::schema_map_diff;
use crate::helper::resource::{Meta, Resource};
use crate::helper::resource_data::ResourceData;
use crate::helper::schema::{internal_validate, SchemaMap, RESERVED_PROVIDER_FIELDS};
use crate::instance::{InstanceState, ResourceConfig};
use crate::stop::RequestContext;
use crate::validation;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Builds the client every resource callback receives.
#[async_trait]
pub trait Configurer: Send + Sync {
    /// Turn the provider configuration into a [`Meta`].
    async fn configure(&self, ctx: &RequestContext, d: &ResourceData) -> Result<Meta, ProviderError>;
}

/// A provider: configuration schema, managed resources and data sources.
#[derive(Default)]
pub struct Provider {
    /// Configuration attributes of the provider itself.
    pub schema: Arc<SchemaMap>,
    /// Managed resources by type name.
    pub resources: BTreeMap<String, Resource>,
    /// Data sources by type name.
    pub data_sources: BTreeMap<String, Resource>,
    /// Configure callback.
    pub configurer: Option<Arc<dyn Configurer>>,
    meta: RwLock<Meta>,
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("schema", &self.schema)
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("data_sources", &self.data_sources.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Provider {
    /// An empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider configuration attributes.
    pub fn with_schema(mut self, schema: SchemaMap) -> Self {
        self.schema = Arc::new(schema);
        self
    }

    /// Register a managed resource.
    pub fn with_resource(mut self, type_name: impl Into<String>, resource: Resource) -> Self {
        self.resources.insert(type_name.into(), resource);
        self
    }

    /// Register a data source.
    pub fn with_data_source(mut self, type_name: impl Into<String>, resource: Resource) -> Self {
        self.data_sources.insert(type_name.into(), resource);
        self
    }

    /// Set the configure callback.
    pub fn with_configurer(mut self, configurer: impl Configurer + 'static) -> Self {
        self.configurer = Some(Arc::new(configurer));
        self
    }

    /// Check the provider and every registered resource for definition
    /// errors. Meant to run once at start-up.
    pub fn internal_validate(&self) -> Result<(), SchemaError> {
        let mut errors = Vec::new();
        for name in self.schema.keys() {
            if RESERVED_PROVIDER_FIELDS.contains(&name.as_str()) {
                errors.push(SchemaError::definition(
                    name.clone(),
                    format!("{} is a reserved field name for a provider", name),
                ));
            }
        }
        if let Err(e) = internal_validate(&self.schema) {
            errors.push(e);
        }
        for (type_name, resource) in &self.resources {
            if let Err(e) = resource.internal_validate(true, true) {
                errors.push(SchemaError::definition(format!("resource {}", type_name), e.to_string()));
            }
        }
        for (type_name, resource) in &self.data_sources {
            if let Err(e) = resource.internal_validate(true, false) {
                errors.push(SchemaError::definition(format!("data source {}", type_name), e.to_string()));
            }
        }
        SchemaError::collect(errors)
    }

    /// The value returned by the last configure call.
    pub fn meta(&self) -> Meta {
        self.meta.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the stored meta, for providers configured out of band.
    pub fn set_meta(&self, meta: Meta) {
        *self.meta.write().unwrap_or_else(PoisonError::into_inner) = meta;
    }

    /// Managed resource by type name.
    pub fn resource(&self, type_name: &str) -> Result<&Resource, ProviderError> {
        self.resources
            .get(type_name)
            .ok_or_else(|| ProviderError::UnknownResource(type_name.to_string()))
    }

    /// Data source by type name.
    pub fn data_source(&self, type_name: &str) -> Result<&Resource, ProviderError> {
        self.data_sources
            .get(type_name)
            .ok_or_else(|| ProviderError::UnknownResource(type_name.to_string()))
    }

    /// Configure the provider.
    ///
    /// The configuration is diffed against an empty state so defaults and
    /// state functions apply, then handed to the configure callback as a
    /// [`ResourceData`]. The returned meta is stored for later calls.
    pub async fn configure(&self, ctx: &RequestContext, config: &ResourceConfig) -> Result<(), ProviderError> {
        let configurer = match &self.configurer {
            Some(configurer) => configurer,
            None => {
                debug!("provider has no configure callback");
                return Ok(());
            },
        };
        let diff = schema_map_diff(&self.schema, None, config, None, &Meta::default(), false)?;
        let d = ResourceData::new(self.schema.clone(), None, Some(config.clone()), diff);
        let meta = configurer.configure(ctx, &d).await?;
        info!(configured = meta.is_set(), "provider configured");
        self.set_meta(meta);
        Ok(())
    }

    /// Validate the provider configuration.
    pub fn validate(&self, config: &ResourceConfig) -> Vec<Diagnostic> {
        validation::validate(&self.schema, config)
    }

    /// Validate the configuration of a managed resource.
    pub fn validate_resource(&self, type_name: &str, config: &ResourceConfig) -> Vec<Diagnostic> {
        match self.resource(type_name) {
            Ok(resource) => validate_with_deprecation(resource, type_name, config),
            Err(e) => e.into_diagnostics(),
        }
    }

    /// Validate the configuration of a data source.
    pub fn validate_data_source(&self, type_name: &str, config: &ResourceConfig) -> Vec<Diagnostic> {
        match self.data_source(type_name) {
            Ok(resource) => validate_with_deprecation(resource, type_name, config),
            Err(e) => e.into_diagnostics(),
        }
    }

    /// Import the instance identified by `id`.
    ///
    /// Returns the states of every imported instance; importers may return
    /// instances of other types through [`ResourceData::set_type`].
    pub async fn import_state(
        &self,
        ctx: &RequestContext,
        type_name: &str,
        id: &str,
    ) -> Result<Vec<InstanceState>, ProviderError> {
        let resource = self.resource(type_name)?;
        let importer = resource.importer.as_ref().ok_or_else(|| {
            ProviderError::Unimplemented(format!("resource {} doesn't support import", type_name))
        })?;

        let mut d = resource.data(None);
        d.set_id(id);
        let results = importer.import(ctx, d, &self.meta()).await?;
        if results.is_empty() {
            return Err(ProviderError::NotFound(format!(
                "import of {} with id {:?} returned no instances",
                type_name, id
            )));
        }

        let mut states = Vec::with_capacity(results.len());
        for r in results {
            let mut state = r.state().ok_or_else(|| {
                ProviderError::Sdk(format!(
                    "The provider returned a missing resource during ImportResourceState. \
                     This is a bug in the provider for {}; please report it.",
                    type_name
                ))
            })?;
            if state.type_name.is_none() {
                state.type_name = Some(type_name.to_string());
            }
            states.push(state);
        }
        info!(type_name, count = states.len(), "imported instances");
        Ok(states)
    }
}

fn validate_with_deprecation(resource: &Resource, type_name: &str, config: &ResourceConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    if let Some(message) = &resource.deprecation_message {
        diagnostics.push(
            Diagnostic::warning(format!("Deprecated Resource: {}", type_name)).with_detail(message.clone()),
        );
    }
    diagnostics.extend(validation::validate(&resource.schema, config));
    diagnostics
}
