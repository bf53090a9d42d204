//! The gRPC provider server.
//!
//! [`GrpcProviderServer`] implements the wire protocol on top of a
//! [`helper::Provider`](crate::helper::Provider): it decodes structured
//! values, runs them through the flatmap-based helper layer and normalizes
//! the results back into what the orchestrator expects.
//!
//! # Signal Handling
//!
//! The `serve*` functions handle OS signals (SIGTERM, SIGINT) for graceful shutdown.
//! When a signal is received, the server:
//! 1. Stops accepting new connections
//! 2. Waits for in-flight requests to complete (with configurable timeout)
//! 3. Cancels the context of every request still running
//! 4. Exits cleanly

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as Json;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tracing::{debug, error, info, instrument, warn};

use crate::configschema::Block;
use crate::diag::{Diagnostic, DiagnosticsExt};
use crate::error::ProviderError;
use crate::flatmap::expand;
use crate::generated;
use crate::generated::provider_server::Provider as ProviderRpc;
use crate::helper::{
    core_config_schema, parse_address, schema_map_diff, Elem, Meta, Provider, RawState, Resource,
    ResourceTimeout, SchemaMap,
};
use crate::instance::{InstanceDiff, InstanceState, ResourceAttrDiff, ResourceConfig};
use crate::normalize::{
    copy_timeout_values, normalize_null_values, normalize_object_from_legacy_sdk,
    process_conflicts_with, set_unknowns, set_write_only_nulls, validate_config_nulls,
    values_sdk_equivalent,
};
use crate::path::AttributePath;
use crate::stop::{RequestContext, StopController};
use crate::types::{
    decode_dynamic_value, decode_private, diagnostics_to_proto, encode_dynamic_value,
    encode_private, HANDSHAKE_PREFIX, NEW_EXTRA_KEY, PROTOCOL_VERSION,
};
use crate::value::{Value, ValueType};
use crate::wire::value_from_json;

/// Serves a [`Provider`] over gRPC.
#[derive(Debug, Clone)]
pub struct GrpcProviderServer {
    provider: Arc<Provider>,
    stop: Arc<StopController>,
}

impl GrpcProviderServer {
    /// Wrap a provider.
    pub fn new(provider: Provider) -> Self {
        Self {
            provider: Arc::new(provider),
            stop: Arc::new(StopController::new()),
        }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Cancel every in-flight request.
    pub fn cancel_requests(&self) {
        self.stop.stop();
    }

    /// A context for a new request, cancelled by the next [`Self::cancel_requests`].
    pub fn stop_context(&self) -> RequestContext {
        self.stop.context()
    }

    fn prepare_provider_config_inner(
        &self,
        req: generated::PrepareProviderConfigRequest,
    ) -> Result<generated::PrepareProviderConfigResponse, ProviderError> {
        let mut resp = generated::PrepareProviderConfigResponse::default();
        let block = core_config_schema(&self.provider.schema);
        let ty = block.implied_type();
        let config = decode_dynamic_value(req.config.as_ref(), &ty)?;

        let mut diagnostics = Vec::new();
        let config = self.apply_provider_defaults(config, &block, &mut diagnostics)?;
        let config = block.coerce_value(config)?;

        let nulls = validate_config_nulls(&config, &AttributePath::new());
        if nulls.has_error() {
            diagnostics.extend(nulls);
            resp.diagnostics = diagnostics_to_proto(diagnostics);
            return Ok(resp);
        }

        diagnostics.extend(self.provider.validate(&ResourceConfig::new(config.clone())));
        resp.prepared_config = Some(encode_dynamic_value(&config, &ty)?);
        resp.diagnostics = diagnostics_to_proto(diagnostics);
        Ok(resp)
    }

    /// Fill null top-level attributes from their defaults. Deprecated
    /// attributes are left alone.
    fn apply_provider_defaults(
        &self,
        mut config: Value,
        block: &Block,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Value, ProviderError> {
        let Some(entries) = config.entries_mut() else {
            return Ok(config);
        };
        for (name, value) in entries.iter_mut() {
            if !value.is_null() {
                continue;
            }
            let (Some(schema), Some(attr)) =
                (self.provider.schema.get(name), block.attributes.get(name))
            else {
                continue;
            };
            if schema.deprecated.is_some() {
                continue;
            }
            let default = schema.default_value().map_err(|e| {
                ProviderError::Validation(format!("error getting default for {:?}: {}", name, e))
            })?;
            let Some(mut default) = default else {
                continue;
            };
            // An empty string used to be accepted as a bool default.
            if attr.ty == ValueType::Bool && default == Json::String(String::new()) {
                diagnostics.push(Diagnostic::warning(format!(
                    "provider set empty string as default value for bool {}",
                    name
                )));
                default = Json::Bool(false);
            }
            *value = value_from_json(&default, &attr.ty).map_err(|e| {
                ProviderError::Validation(format!(
                    "provider set invalid default value for {:?}: {}",
                    name, e
                ))
            })?;
        }
        Ok(config)
    }

    fn validate_config(
        &self,
        resource: &Resource,
        config: Option<&generated::DynamicValue>,
        validate: impl FnOnce(&ResourceConfig) -> Vec<Diagnostic>,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let ty = resource.implied_type();
        let config = decode_dynamic_value(config, &ty)?;
        let mut diagnostics = validate_config_nulls(&config, &AttributePath::new());
        if diagnostics.has_error() {
            return Ok(diagnostics);
        }
        diagnostics.extend(validate(&ResourceConfig::new(config)));
        Ok(diagnostics)
    }

    fn upgrade_resource_state_inner(
        &self,
        req: generated::UpgradeResourceStateRequest,
    ) -> Result<generated::UpgradeResourceStateResponse, ProviderError> {
        let mut resp = generated::UpgradeResourceStateResponse::default();
        let resource = self.provider.resource(&req.type_name)?;
        let version = u64::try_from(req.version).map_err(|_| {
            ProviderError::InvalidRequest(format!("invalid state version {}", req.version))
        })?;
        let raw = req
            .raw_state
            .map(|raw| RawState::from_parts(raw.json, raw.flatmap))
            .unwrap_or_default();

        if let Some(value) = resource.upgrade_state(version, &raw, &self.provider.meta())? {
            resp.upgraded_state = Some(encode_dynamic_value(&value, &resource.implied_type())?);
        }
        Ok(resp)
    }

    async fn configure_inner(
        &self,
        req: generated::ConfigureRequest,
    ) -> Result<generated::ConfigureResponse, ProviderError> {
        let mut resp = generated::ConfigureResponse::default();
        let block = core_config_schema(&self.provider.schema);
        let config = decode_dynamic_value(req.config.as_ref(), &block.implied_type())?;

        let nulls = validate_config_nulls(&config, &AttributePath::new());
        if nulls.has_error() {
            resp.diagnostics = diagnostics_to_proto(nulls);
            return Ok(resp);
        }

        let ctx = self.stop_context();
        self.provider
            .configure(&ctx, &ResourceConfig::new(config))
            .await?;
        Ok(resp)
    }

    async fn read_resource_inner(
        &self,
        req: generated::ReadResourceRequest,
    ) -> Result<generated::ReadResourceResponse, ProviderError> {
        let mut resp = generated::ReadResourceResponse::default();
        let resource = self.provider.resource(&req.type_name)?;
        let ty = resource.implied_type();
        let current = decode_dynamic_value(req.current_state.as_ref(), &ty)?;

        let mut state = resource.shim_instance_state_from_value(&current);
        state.meta = decode_private(&req.private)?;

        let ctx = self.stop_context();
        let (refreshed, diagnostics) = resource
            .refresh(&ctx, &state, &self.provider.meta())
            .await;
        resp.diagnostics = diagnostics_to_proto(diagnostics);

        let new_state = match refreshed {
            Some(mut refreshed) if refreshed.exists() => {
                refreshed
                    .attributes
                    .insert("id".to_string(), refreshed.id.clone());
                let value = expand(&refreshed.attributes, &ty)?;
                let value = normalize_null_values(value, &current, &ty, false);
                copy_timeout_values(value, &current)
            },
            // An empty id means the object is gone.
            _ => Value::Null,
        };
        resp.new_state = Some(encode_dynamic_value(&new_state, &ty)?);
        resp.private = req.private;
        Ok(resp)
    }

    async fn plan_resource_change_inner(
        &self,
        req: generated::PlanResourceChangeRequest,
    ) -> Result<generated::PlanResourceChangeResponse, ProviderError> {
        let mut resp = generated::PlanResourceChangeResponse {
            legacy_type_system: true,
            ..Default::default()
        };
        let resource = self.provider.resource(&req.type_name)?;
        let block = resource.core_config_schema();
        let ty = block.implied_type();

        let prior = decode_dynamic_value(req.prior_state.as_ref(), &ty)?;
        let create = prior.is_null();
        let proposed = decode_dynamic_value(req.proposed_new_state.as_ref(), &ty)?;
        if proposed.is_null() {
            // Destroy plans pass through.
            resp.planned_state = req.proposed_new_state;
            resp.planned_private = req.prior_private;
            return Ok(resp);
        }
        let proposed = block.coerce_value(proposed)?;

        let nulls = validate_config_nulls(&proposed, &AttributePath::new());
        if nulls.has_error() {
            resp.diagnostics = diagnostics_to_proto(nulls);
            return Ok(resp);
        }
        let proposed = process_conflicts_with(proposed, &resource.schema);

        let mut prior_state = resource.shim_instance_state_from_value(&prior);
        prior_state.meta = decode_private(&req.prior_private)?;

        let config = ResourceConfig::new(proposed.clone());
        let meta = self.provider.meta();
        let mut diff = resource.simple_diff(
            (!create).then_some(&prior_state),
            &config,
            &meta,
        )?;

        // A new instance always gets a computed id.
        if create {
            diff.set_attribute(
                "id",
                ResourceAttrDiff {
                    new_computed: true,
                    ..ResourceAttrDiff::default()
                },
            );
        }

        if diff.attributes.is_empty() {
            debug!(type_name = %req.type_name, "no changes planned");
            resp.planned_state = req.prior_state;
            resp.planned_private = req.prior_private;
            return Ok(resp);
        }

        let planned_attributes = diff.apply(&prior_state.attributes, &ty);
        let planned = expand(&planned_attributes, &ty)?;
        let planned = block.coerce_value(planned)?;
        let planned = normalize_null_values(planned, &proposed, &ty, false);
        let mut planned = copy_timeout_values(planned, &proposed);

        // Differences the helper layer does not consider significant must
        // not show up as a change.
        let force_no_changes = values_sdk_equivalent(&prior, &planned);
        if force_no_changes {
            planned = prior.clone();
        }
        if create {
            planned = set_unknowns(planned, &block);
        }
        let planned = set_write_only_nulls(planned, &block);
        resp.planned_state = Some(encode_dynamic_value(&planned, &ty)?);

        ResourceTimeout::config_decode(resource.timeouts.as_ref(), &config)?.diff_encode(&mut diff);
        let mut private = diff.meta.clone();
        let new_extra: serde_json::Map<String, Json> = diff
            .attributes
            .iter()
            .filter_map(|(key, attr)| attr.new_extra.clone().map(|v| (key.clone(), v)))
            .collect();
        private.insert(NEW_EXTRA_KEY.to_string(), Json::Object(new_extra));
        resp.planned_private = encode_private(&private)?;

        let mut requires_new: Vec<&str> = if force_no_changes {
            Vec::new()
        } else {
            diff.attributes
                .iter()
                .filter(|(_, attr)| attr.requires_new)
                .map(|(key, _)| key.as_str())
                .collect()
        };
        let id_pending = planned
            .get_attr("id")
            .map_or(true, |id| id.is_null() || id.is_unknown());
        if !requires_new.is_empty() || id_pending {
            requires_new.push("id");
        }
        resp.requires_replace = requires_replace(&requires_new, &resource.schema)?;
        Ok(resp)
    }

    async fn apply_resource_change_inner(
        &self,
        req: generated::ApplyResourceChangeRequest,
    ) -> Result<generated::ApplyResourceChangeResponse, ProviderError> {
        let mut resp = generated::ApplyResourceChangeResponse {
            legacy_type_system: true,
            ..Default::default()
        };
        let resource = self.provider.resource(&req.type_name)?;
        let block = resource.core_config_schema();
        let ty = block.implied_type();

        let prior = decode_dynamic_value(req.prior_state.as_ref(), &ty)?;
        let planned = decode_dynamic_value(req.planned_state.as_ref(), &ty)?;
        let prior_state = resource.shim_instance_state_from_value(&prior);
        let mut private = decode_private(&req.planned_private)?;

        let destroy = planned.is_null();
        let mut diff = if destroy {
            InstanceDiff {
                destroy: true,
                ..InstanceDiff::default()
            }
        } else {
            // The plan already ran CustomizeDiff and the state functions.
            let schema = Arc::new(strip_schema_modifiers(&resource.schema));
            let config = ResourceConfig::new(remove_config_unknowns(planned.clone()));
            schema_map_diff(
                &schema,
                prior_state.exists().then_some(&prior_state),
                &config,
                None,
                &Meta::default(),
                false,
            )?
            .unwrap_or_default()
        };

        if let Some(Json::Object(new_extra)) = private.remove(NEW_EXTRA_KEY) {
            for (key, value) in new_extra {
                diff.attributes.entry(key).or_default().new_extra = Some(value);
            }
        }
        diff.meta = private;
        for attr in diff.attributes.values_mut() {
            attr.requires_new = false;
        }
        // Removals of keys the prior state never had confuse the readers.
        diff.attributes
            .retain(|key, attr| !attr.new_removed || prior_state.attributes.contains_key(key));

        let ctx = self.stop_context();
        let (new_state, mut diagnostics) = resource
            .apply(&ctx, Some(&prior_state), &diff, &self.provider.meta())
            .await;

        let new_state = match new_state {
            Some(state) if !destroy && state.exists() => state,
            _ => {
                resp.new_state = Some(encode_dynamic_value(&Value::Null, &ty)?);
                resp.diagnostics = diagnostics_to_proto(diagnostics);
                return Ok(resp);
            },
        };

        match finish_apply(&new_state, &planned, &block, &ty) {
            Ok((value, private)) => {
                resp.new_state = Some(value);
                resp.private = private;
            },
            Err(e) => diagnostics.extend(e.into_diagnostics()),
        }
        resp.diagnostics = diagnostics_to_proto(diagnostics);
        Ok(resp)
    }

    async fn import_resource_state_inner(
        &self,
        req: generated::ImportResourceStateRequest,
    ) -> Result<generated::ImportResourceStateResponse, ProviderError> {
        let mut resp = generated::ImportResourceStateResponse::default();
        let ctx = self.stop_context();
        let states = self
            .provider
            .import_state(&ctx, &req.type_name, &req.id)
            .await?;

        for mut state in states {
            if state.id.is_empty() {
                return Err(ProviderError::Sdk(format!(
                    "The provider returned a resource missing an identifier during \
                     ImportResourceState. This is a bug in the provider for {}; please report it.",
                    req.type_name
                )));
            }
            state.attributes.insert("id".to_string(), state.id.clone());
            let type_name = state
                .type_name
                .clone()
                .unwrap_or_else(|| req.type_name.clone());
            let block = self.provider.resource(&type_name)?.core_config_schema();
            let ty = block.implied_type();

            let value = expand(&state.attributes, &ty)?;
            let value = normalize_object_from_legacy_sdk(value, &block);
            let value = set_write_only_nulls(value, &block);
            resp.imported_resources.push(generated::ImportedResource {
                type_name,
                state: Some(encode_dynamic_value(&value, &ty)?),
                private: encode_private(&state.meta)?,
            });
        }
        Ok(resp)
    }

    async fn read_data_source_inner(
        &self,
        req: generated::ReadDataSourceRequest,
    ) -> Result<generated::ReadDataSourceResponse, ProviderError> {
        let mut resp = generated::ReadDataSourceResponse::default();
        let resource = self.provider.data_source(&req.type_name)?;
        let block = resource.core_config_schema();
        let ty = block.implied_type();

        let config = decode_dynamic_value(req.config.as_ref(), &ty)?;
        let config = block.coerce_value(config)?;
        let nulls = validate_config_nulls(&config, &AttributePath::new());
        if nulls.has_error() {
            resp.diagnostics = diagnostics_to_proto(nulls);
            return Ok(resp);
        }

        let meta = self.provider.meta();
        let diff = resource.diff(None, &ResourceConfig::new(config.clone()), &meta)?;
        let ctx = self.stop_context();
        let (state, diagnostics) = resource.read_data_apply(&ctx, diff.as_ref(), &meta).await;
        resp.diagnostics = diagnostics_to_proto(diagnostics);

        let value = match state {
            Some(mut state) => {
                state.attributes.insert("id".to_string(), state.id.clone());
                expand(&state.attributes, &ty)?
            },
            None => Value::Null,
        };
        let value = copy_timeout_values(value, &config);
        resp.state = Some(encode_dynamic_value(&value, &ty)?);
        Ok(resp)
    }
}

/// Encode the state an apply produced, normalized against the plan.
fn finish_apply(
    state: &InstanceState,
    planned: &Value,
    block: &Block,
    ty: &ValueType,
) -> Result<(generated::DynamicValue, Vec<u8>), ProviderError> {
    let mut attributes = state.attributes.clone();
    attributes.insert("id".to_string(), state.id.clone());
    let value = expand(&attributes, ty)?;
    let value = normalize_null_values(value, planned, ty, true);
    let value = copy_timeout_values(value, planned);
    let value = set_write_only_nulls(value, block);
    Ok((encode_dynamic_value(&value, ty)?, encode_private(&state.meta)?))
}

/// The wire paths of the flatmap keys that force replacement.
fn requires_replace(
    keys: &[&str],
    schema: &SchemaMap,
) -> Result<Vec<generated::AttributePath>, ProviderError> {
    let mut out: Vec<generated::AttributePath> = Vec::new();
    for key in keys {
        // Count keys stand for the collection itself.
        let key = key
            .strip_suffix(".#")
            .or_else(|| key.strip_suffix(".%"))
            .unwrap_or(key);
        let path = if key == "id" && !schema.contains_key("id") {
            AttributePath::root("id")
        } else {
            parse_address(key, schema)?
        };
        let proto = generated::AttributePath::from(&path);
        if !out.contains(&proto) {
            out.push(proto);
        }
    }
    Ok(out)
}

/// A copy of `schema` without state functions, at any depth.
fn strip_schema_modifiers(schema: &SchemaMap) -> SchemaMap {
    schema
        .iter()
        .map(|(name, s)| {
            let mut s = s.clone();
            s.state_func = None;
            if let Some(Elem::Block(resource)) = &s.elem {
                let mut resource = resource.as_ref().clone();
                resource.customize_diff = None;
                resource.schema = Arc::new(strip_schema_modifiers(&resource.schema));
                s.elem = Some(Elem::Block(Box::new(resource)));
            }
            (name.clone(), s)
        })
        .collect()
}

/// Drop unknown object attributes so planned values read as configuration.
fn remove_config_unknowns(value: Value) -> Value {
    match value {
        Value::Object(attrs) => Value::Object(
            attrs
                .into_iter()
                .map(|(k, v)| match v {
                    Value::Unknown => (k, Value::Null),
                    v => (k, remove_config_unknowns(v)),
                })
                .collect(),
        ),
        Value::Map(entries) => Value::Map(
            entries
                .into_iter()
                .filter(|(_, v)| !v.is_unknown())
                .map(|(k, v)| (k, remove_config_unknowns(v)))
                .collect(),
        ),
        Value::List(items) => Value::List(items.into_iter().map(remove_config_unknowns).collect()),
        Value::Set(items) => Value::Set(items.into_iter().map(remove_config_unknowns).collect()),
        other => other,
    }
}

fn log_diagnostics(rpc: &str, diagnostics: &[generated::Diagnostic]) {
    let errors = diagnostics
        .iter()
        .filter(|d| d.severity == generated::diagnostic::Severity::Error as i32)
        .count();
    if errors > 0 {
        warn!(rpc, diagnostics = diagnostics.len(), errors, "completed with errors");
    } else {
        info!(rpc, diagnostics = diagnostics.len(), "completed successfully");
    }
}

fn error_diagnostics(rpc: &str, err: ProviderError) -> Vec<generated::Diagnostic> {
    error!(rpc, error = %err, "request failed");
    diagnostics_to_proto(err.into_diagnostics())
}

#[tonic::async_trait]
impl ProviderRpc for GrpcProviderServer {
    #[instrument(skip(self, _request), name = "grpc.get_provider_schema")]
    async fn get_provider_schema(
        &self,
        _request: tonic::Request<generated::GetProviderSchemaRequest>,
    ) -> Result<tonic::Response<generated::GetProviderSchemaResponse>, tonic::Status> {
        debug!("GetProviderSchema called");
        let schema = self.provider.get_schema();
        info!(
            resources = schema.resources.len(),
            data_sources = schema.data_sources.len(),
            "GetProviderSchema completed"
        );
        Ok(tonic::Response::new(generated::GetProviderSchemaResponse {
            provider: Some((&schema.provider).into()),
            resource_schemas: schema
                .resources
                .iter()
                .map(|(k, v)| (k.clone(), v.into()))
                .collect(),
            data_source_schemas: schema
                .data_sources
                .iter()
                .map(|(k, v)| (k.clone(), v.into()))
                .collect(),
            identity_schemas: schema
                .identities
                .iter()
                .map(|(k, v)| (k.clone(), v.into()))
                .collect(),
            server_capabilities: Some(generated::ServerCapabilities {
                plan_destroy: true,
                get_provider_schema_optional: false,
            }),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip(self, request), name = "grpc.prepare_provider_config")]
    async fn prepare_provider_config(
        &self,
        request: tonic::Request<generated::PrepareProviderConfigRequest>,
    ) -> Result<tonic::Response<generated::PrepareProviderConfigResponse>, tonic::Status> {
        debug!("PrepareProviderConfig called");
        let resp = match self.prepare_provider_config_inner(request.into_inner()) {
            Ok(resp) => resp,
            Err(e) => generated::PrepareProviderConfigResponse {
                diagnostics: error_diagnostics("PrepareProviderConfig", e),
                ..Default::default()
            },
        };
        log_diagnostics("PrepareProviderConfig", &resp.diagnostics);
        Ok(tonic::Response::new(resp))
    }

    #[instrument(skip(self, request), name = "grpc.validate_resource_type_config")]
    async fn validate_resource_type_config(
        &self,
        request: tonic::Request<generated::ValidateResourceTypeConfigRequest>,
    ) -> Result<tonic::Response<generated::ValidateResourceTypeConfigResponse>, tonic::Status>
    {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, "ValidateResourceTypeConfig called");
        let result = self.provider.resource(&req.type_name).and_then(|resource| {
            self.validate_config(resource, req.config.as_ref(), |config| {
                self.provider.validate_resource(&req.type_name, config)
            })
        });
        let diagnostics = match result {
            Ok(diagnostics) => diagnostics_to_proto(diagnostics),
            Err(e) => error_diagnostics("ValidateResourceTypeConfig", e),
        };
        log_diagnostics("ValidateResourceTypeConfig", &diagnostics);
        Ok(tonic::Response::new(
            generated::ValidateResourceTypeConfigResponse { diagnostics },
        ))
    }

    #[instrument(skip(self, request), name = "grpc.validate_data_source_config")]
    async fn validate_data_source_config(
        &self,
        request: tonic::Request<generated::ValidateDataSourceConfigRequest>,
    ) -> Result<tonic::Response<generated::ValidateDataSourceConfigResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, "ValidateDataSourceConfig called");
        let result = self.provider.data_source(&req.type_name).and_then(|resource| {
            self.validate_config(resource, req.config.as_ref(), |config| {
                self.provider.validate_data_source(&req.type_name, config)
            })
        });
        let diagnostics = match result {
            Ok(diagnostics) => diagnostics_to_proto(diagnostics),
            Err(e) => error_diagnostics("ValidateDataSourceConfig", e),
        };
        log_diagnostics("ValidateDataSourceConfig", &diagnostics);
        Ok(tonic::Response::new(
            generated::ValidateDataSourceConfigResponse { diagnostics },
        ))
    }

    #[instrument(skip(self, request), name = "grpc.upgrade_resource_state")]
    async fn upgrade_resource_state(
        &self,
        request: tonic::Request<generated::UpgradeResourceStateRequest>,
    ) -> Result<tonic::Response<generated::UpgradeResourceStateResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, version = req.version, "UpgradeResourceState called");
        let resp = match self.upgrade_resource_state_inner(req) {
            Ok(resp) => resp,
            Err(e) => generated::UpgradeResourceStateResponse {
                diagnostics: error_diagnostics("UpgradeResourceState", e),
                ..Default::default()
            },
        };
        log_diagnostics("UpgradeResourceState", &resp.diagnostics);
        Ok(tonic::Response::new(resp))
    }

    #[instrument(skip(self, request), name = "grpc.configure")]
    async fn configure(
        &self,
        request: tonic::Request<generated::ConfigureRequest>,
    ) -> Result<tonic::Response<generated::ConfigureResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(terraform_version = %req.terraform_version, "Configure called");
        let resp = match self.configure_inner(req).await {
            Ok(resp) => resp,
            Err(e) => generated::ConfigureResponse {
                diagnostics: error_diagnostics("Configure", e),
            },
        };
        log_diagnostics("Configure", &resp.diagnostics);
        Ok(tonic::Response::new(resp))
    }

    #[instrument(skip(self, request), name = "grpc.read_resource")]
    async fn read_resource(
        &self,
        request: tonic::Request<generated::ReadResourceRequest>,
    ) -> Result<tonic::Response<generated::ReadResourceResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, "ReadResource called");
        let resp = match self.read_resource_inner(req).await {
            Ok(resp) => resp,
            Err(e) => generated::ReadResourceResponse {
                diagnostics: error_diagnostics("ReadResource", e),
                ..Default::default()
            },
        };
        log_diagnostics("ReadResource", &resp.diagnostics);
        Ok(tonic::Response::new(resp))
    }

    #[instrument(skip(self, request), name = "grpc.plan_resource_change")]
    async fn plan_resource_change(
        &self,
        request: tonic::Request<generated::PlanResourceChangeRequest>,
    ) -> Result<tonic::Response<generated::PlanResourceChangeResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, "PlanResourceChange called");
        let resp = match self.plan_resource_change_inner(req).await {
            Ok(resp) => resp,
            Err(e) => generated::PlanResourceChangeResponse {
                diagnostics: error_diagnostics("PlanResourceChange", e),
                ..Default::default()
            },
        };
        log_diagnostics("PlanResourceChange", &resp.diagnostics);
        Ok(tonic::Response::new(resp))
    }

    #[instrument(skip(self, request), name = "grpc.apply_resource_change")]
    async fn apply_resource_change(
        &self,
        request: tonic::Request<generated::ApplyResourceChangeRequest>,
    ) -> Result<tonic::Response<generated::ApplyResourceChangeResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, "ApplyResourceChange called");
        let resp = match self.apply_resource_change_inner(req).await {
            Ok(resp) => resp,
            Err(e) => generated::ApplyResourceChangeResponse {
                diagnostics: error_diagnostics("ApplyResourceChange", e),
                ..Default::default()
            },
        };
        log_diagnostics("ApplyResourceChange", &resp.diagnostics);
        Ok(tonic::Response::new(resp))
    }

    #[instrument(skip(self, request), name = "grpc.import_resource_state")]
    async fn import_resource_state(
        &self,
        request: tonic::Request<generated::ImportResourceStateRequest>,
    ) -> Result<tonic::Response<generated::ImportResourceStateResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, id = %req.id, "ImportResourceState called");
        let resp = match self.import_resource_state_inner(req).await {
            Ok(resp) => resp,
            Err(e) => generated::ImportResourceStateResponse {
                diagnostics: error_diagnostics("ImportResourceState", e),
                ..Default::default()
            },
        };
        log_diagnostics("ImportResourceState", &resp.diagnostics);
        Ok(tonic::Response::new(resp))
    }

    #[instrument(skip(self, request), name = "grpc.read_data_source")]
    async fn read_data_source(
        &self,
        request: tonic::Request<generated::ReadDataSourceRequest>,
    ) -> Result<tonic::Response<generated::ReadDataSourceResponse>, tonic::Status> {
        let req = request.into_inner();
        debug!(type_name = %req.type_name, "ReadDataSource called");
        let resp = match self.read_data_source_inner(req).await {
            Ok(resp) => resp,
            Err(e) => generated::ReadDataSourceResponse {
                diagnostics: error_diagnostics("ReadDataSource", e),
                ..Default::default()
            },
        };
        log_diagnostics("ReadDataSource", &resp.diagnostics);
        Ok(tonic::Response::new(resp))
    }

    #[instrument(skip(self, _request), name = "grpc.stop")]
    async fn stop(
        &self,
        _request: tonic::Request<generated::StopRequest>,
    ) -> Result<tonic::Response<generated::StopResponse>, tonic::Status> {
        info!("Stop called, cancelling in-flight requests");
        self.cancel_requests();
        Ok(tonic::Response::new(generated::StopResponse {
            error: String::new(),
        }))
    }
}

/// Options for configuring the provider server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Timeout for graceful shutdown. After receiving a shutdown signal,
    /// the server will wait this long for in-flight requests to complete.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Create new serve options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// On Unix, this waits for SIGTERM or SIGINT.
/// On Windows, this waits for CTRL+C.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown");
                    }
                    _ = sigint.recv() => {
                        info!("Received SIGINT, initiating graceful shutdown");
                    }
                }
            },
            _ => {
                warn!("Failed to install signal handlers, falling back to CTRL+C");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for CTRL+C");
                    std::future::pending::<()>().await;
                }
            },
        }
    }

    #[cfg(windows)]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
        info!("Received CTRL+C, initiating graceful shutdown");
    }

    #[cfg(not(any(unix, windows)))]
    {
        std::future::pending::<()>().await;
    }
}

/// Serve a provider as a gRPC server.
///
/// This function:
/// 1. Checks the provider definition
/// 2. Finds an available port and starts the gRPC server
/// 3. Outputs the handshake string to stdout
/// 4. Handles shutdown signals (SIGTERM/SIGINT) gracefully
///
/// The handshake format is: `HEMMER_PROVIDER|<version>|<address>`
///
/// For custom configuration, use [`serve_with_options`].
pub async fn serve(provider: Provider) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Serve a provider with custom options.
///
/// See [`serve`] for details.
pub async fn serve_with_options(
    provider: Provider,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    // Port 0 picks any free port.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    serve_on_listener(provider, listener, options).await
}

/// Serve a provider on a specific address.
///
/// Unlike [`serve`], this function binds to the specified address rather than
/// finding an available port.
pub async fn serve_on(
    provider: Provider,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    serve_on_with_options(provider, addr, ServeOptions::default()).await
}

/// Serve a provider on a specific address with custom options.
pub async fn serve_on_with_options(
    provider: Provider,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    serve_on_listener(provider, listener, options).await
}

/// Serve a provider on an already-bound listener.
pub async fn serve_on_listener(
    provider: Provider,
    listener: TcpListener,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    // Definition errors are fatal before anything is announced.
    provider.internal_validate()?;

    let addr = listener.local_addr()?;
    println!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, addr);
    info!(address = %addr, "Provider server starting");

    let grpc_service = GrpcProviderServer::new(provider);
    let stopper = grpc_service.clone();
    let server = generated::provider_server::ProviderServer::new(grpc_service);

    let server_future = Server::builder()
        .add_service(server)
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            wait_for_shutdown_signal(),
        );

    // Past the timeout the server is dropped with requests still running.
    match tokio::time::timeout(options.shutdown_timeout, server_future).await {
        Ok(Ok(())) => {
            info!("Server shutdown complete");
        },
        Ok(Err(e)) => {
            error!(error = %e, "Server error during shutdown");
            stopper.cancel_requests();
            return Err(e.into());
        },
        Err(_) => {
            warn!(
                timeout = ?options.shutdown_timeout,
                "Shutdown timeout exceeded, forcing shutdown"
            );
        },
    }

    stopper.cancel_requests();
    info!("Provider shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::{Importer, ResourceData, ResourceHandler, Schema, StateUpgrader};
    use async_trait::async_trait;

    struct Servers;

    #[async_trait]
    impl ResourceHandler for Servers {
        async fn create(
            &self,
            _ctx: &RequestContext,
            d: &mut ResourceData,
            _meta: &Meta,
        ) -> Result<Vec<Diagnostic>, ProviderError> {
            let name = d.get("name").as_str().unwrap_or_default().to_string();
            d.set_id(format!("srv-{}", name));
            d.set("address", format!("{}.internal", name))?;
            Ok(vec![])
        }

        async fn read(
            &self,
            _ctx: &RequestContext,
            d: &mut ResourceData,
            _meta: &Meta,
        ) -> Result<Vec<Diagnostic>, ProviderError> {
            if d.get("name").as_str() == Some("gone") {
                d.set_id("");
            }
            Ok(vec![])
        }

        async fn update(
            &self,
            _ctx: &RequestContext,
            _d: &mut ResourceData,
            _meta: &Meta,
        ) -> Result<Vec<Diagnostic>, ProviderError> {
            Ok(vec![])
        }
    }

    struct Lookup;

    #[async_trait]
    impl ResourceHandler for Lookup {
        async fn read(
            &self,
            _ctx: &RequestContext,
            d: &mut ResourceData,
            _meta: &Meta,
        ) -> Result<Vec<Diagnostic>, ProviderError> {
            let name = d.get("name").as_str().unwrap_or_default().to_string();
            d.set("arn", format!("arn:{}", name))?;
            Ok(vec![])
        }
    }

    fn server_resource() -> Resource {
        Resource::new()
            .with_schema(SchemaMap::from([
                ("name".to_string(), Schema::string().required().force_new()),
                ("size".to_string(), Schema::int().optional()),
                ("address".to_string(), Schema::string().computed()),
                ("password".to_string(), Schema::string().optional().write_only()),
            ]))
            .with_handler(Servers)
            .with_importer(Importer::passthrough())
    }

    fn server() -> GrpcProviderServer {
        let provider = Provider::new()
            .with_schema(SchemaMap::from([
                (
                    "region".to_string(),
                    Schema::string().optional().with_default("us-east-1"),
                ),
                (
                    "insecure".to_string(),
                    Schema::bool().optional().with_default(""),
                ),
            ]))
            .with_resource("test_server", server_resource())
            .with_data_source(
                "test_lookup",
                Resource::new()
                    .with_schema(SchemaMap::from([
                        ("name".to_string(), Schema::string().required()),
                        ("arn".to_string(), Schema::string().computed()),
                    ]))
                    .with_handler(Lookup),
            );
        GrpcProviderServer::new(provider)
    }

    fn ty() -> ValueType {
        server_resource().implied_type()
    }

    fn object(pairs: Vec<(&str, Value)>) -> Value {
        ty().coerce(Value::object(pairs)).unwrap()
    }

    fn dv(value: &Value) -> Option<generated::DynamicValue> {
        Some(encode_dynamic_value(value, &ty()).unwrap())
    }

    fn decode(value: Option<&generated::DynamicValue>) -> Value {
        decode_dynamic_value(value, &ty()).unwrap()
    }

    fn web_state() -> Value {
        object(vec![
            ("id", Value::string("srv-web")),
            ("name", Value::string("web")),
            ("address", Value::string("web.internal")),
        ])
    }

    async fn plan(
        s: &GrpcProviderServer,
        prior: &Value,
        proposed: &Value,
    ) -> generated::PlanResourceChangeResponse {
        s.plan_resource_change(tonic::Request::new(generated::PlanResourceChangeRequest {
            type_name: "test_server".to_string(),
            prior_state: dv(prior),
            proposed_new_state: dv(proposed),
            config: dv(proposed),
            prior_private: Vec::new(),
        }))
        .await
        .unwrap()
        .into_inner()
    }

    #[tokio::test]
    async fn test_get_provider_schema() {
        let resp = server()
            .get_provider_schema(tonic::Request::new(generated::GetProviderSchemaRequest {}))
            .await
            .unwrap()
            .into_inner();
        let schema = &resp.resource_schemas["test_server"];
        let block = schema.block.as_ref().unwrap();
        let names: Vec<&str> = block.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["address", "id", "name", "password", "size"]);
        assert!(block.attributes[3].write_only);
        assert!(resp.data_source_schemas.contains_key("test_lookup"));
        assert!(resp.server_capabilities.unwrap().plan_destroy);
    }

    #[tokio::test]
    async fn test_prepare_provider_config_applies_defaults() {
        let s = server();
        let ty = core_config_schema(&s.provider().schema).implied_type();
        let config = ty.coerce(Value::object::<&str, _>([])).unwrap();
        let resp = s
            .prepare_provider_config(tonic::Request::new(
                generated::PrepareProviderConfigRequest {
                    config: Some(encode_dynamic_value(&config, &ty).unwrap()),
                },
            ))
            .await
            .unwrap()
            .into_inner();
        let prepared = decode_dynamic_value(resp.prepared_config.as_ref(), &ty).unwrap();
        assert_eq!(prepared.get_attr("region"), Some(&Value::string("us-east-1")));
        assert_eq!(prepared.get_attr("insecure"), Some(&Value::Bool(false)));
        assert_eq!(resp.diagnostics.len(), 1);
        assert_eq!(
            resp.diagnostics[0].summary,
            "provider set empty string as default value for bool insecure"
        );
    }

    #[tokio::test]
    async fn test_plan_create_marks_computed_unknown() {
        let s = server();
        let proposed = object(vec![
            ("name", Value::string("web")),
            ("password", Value::string("hunter2")),
        ]);
        let resp = plan(&s, &Value::Null, &proposed).await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert!(resp.legacy_type_system);

        let planned = decode(resp.planned_state.as_ref());
        assert_eq!(planned.get_attr("id"), Some(&Value::Unknown));
        assert_eq!(planned.get_attr("address"), Some(&Value::Unknown));
        assert_eq!(planned.get_attr("name"), Some(&Value::string("web")));
        assert_eq!(planned.get_attr("size"), Some(&Value::Null));
        assert_eq!(planned.get_attr("password"), Some(&Value::Null));

        let id_path = generated::AttributePath::from(&AttributePath::root("id"));
        assert!(resp.requires_replace.contains(&id_path));
    }

    #[tokio::test]
    async fn test_plan_force_new_requires_replace() {
        let s = server();
        let mut proposed = web_state();
        proposed.set_path(&AttributePath::root("name"), Value::string("db"));
        let resp = plan(&s, &web_state(), &proposed).await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);

        let planned = decode(resp.planned_state.as_ref());
        assert_eq!(planned.get_attr("name"), Some(&Value::string("db")));
        let name_path = generated::AttributePath::from(&AttributePath::root("name"));
        assert!(resp.requires_replace.contains(&name_path));
    }

    #[tokio::test]
    async fn test_plan_without_changes_returns_prior() {
        let s = server();
        let resp = plan(&s, &web_state(), &web_state()).await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert_eq!(resp.planned_state, dv(&web_state()));
        assert!(resp.requires_replace.is_empty());
    }

    #[tokio::test]
    async fn test_plan_destroy_passes_through() {
        let s = server();
        let resp = plan(&s, &web_state(), &Value::Null).await;
        assert_eq!(decode(resp.planned_state.as_ref()), Value::Null);
    }

    #[tokio::test]
    async fn test_apply_create_drops_write_only_values() {
        let s = server();
        let planned = object(vec![
            ("id", Value::Unknown),
            ("name", Value::string("web")),
            ("address", Value::Unknown),
            ("password", Value::string("hunter2")),
        ]);
        let resp = s
            .apply_resource_change(tonic::Request::new(
                generated::ApplyResourceChangeRequest {
                    type_name: "test_server".to_string(),
                    prior_state: dv(&Value::Null),
                    planned_state: dv(&planned),
                    config: dv(&planned),
                    planned_private: Vec::new(),
                },
            ))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        let state = decode(resp.new_state.as_ref());
        assert_eq!(state.get_attr("id"), Some(&Value::string("srv-web")));
        assert_eq!(state.get_attr("address"), Some(&Value::string("web.internal")));
        assert_eq!(state.get_attr("password"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_apply_destroy_returns_null() {
        let s = server();
        let resp = s
            .apply_resource_change(tonic::Request::new(
                generated::ApplyResourceChangeRequest {
                    type_name: "test_server".to_string(),
                    prior_state: dv(&web_state()),
                    planned_state: dv(&Value::Null),
                    config: dv(&Value::Null),
                    planned_private: Vec::new(),
                },
            ))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert_eq!(decode(resp.new_state.as_ref()), Value::Null);
    }

    #[tokio::test]
    async fn test_read_resource() {
        let s = server();
        let read = |state: Value| {
            let s = s.clone();
            async move {
                s.read_resource(tonic::Request::new(generated::ReadResourceRequest {
                    type_name: "test_server".to_string(),
                    current_state: dv(&state),
                    private: b"{\"keep\":true}".to_vec(),
                }))
                .await
                .unwrap()
                .into_inner()
            }
        };

        let resp = read(web_state()).await;
        assert_eq!(decode(resp.new_state.as_ref()), web_state());
        assert_eq!(resp.private, b"{\"keep\":true}".to_vec());

        let mut gone = web_state();
        gone.set_path(&AttributePath::root("name"), Value::string("gone"));
        let resp = read(gone).await;
        assert_eq!(decode(resp.new_state.as_ref()), Value::Null);
    }

    #[tokio::test]
    async fn test_read_data_source() {
        let s = server();
        let ty = s.provider().data_source("test_lookup").unwrap().implied_type();
        let config = ty
            .coerce(Value::object([("name", Value::string("web"))]))
            .unwrap();
        let resp = s
            .read_data_source(tonic::Request::new(generated::ReadDataSourceRequest {
                type_name: "test_lookup".to_string(),
                config: Some(encode_dynamic_value(&config, &ty).unwrap()),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        let state = decode_dynamic_value(resp.state.as_ref(), &ty).unwrap();
        assert_eq!(state.get_attr("id"), Some(&Value::string("-")));
        assert_eq!(state.get_attr("arn"), Some(&Value::string("arn:web")));
    }

    #[tokio::test]
    async fn test_import_resource_state() {
        let resp = server()
            .import_resource_state(tonic::Request::new(
                generated::ImportResourceStateRequest {
                    type_name: "test_server".to_string(),
                    id: "srv-web".to_string(),
                },
            ))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert_eq!(resp.imported_resources.len(), 1);
        let imported = &resp.imported_resources[0];
        assert_eq!(imported.type_name, "test_server");
        let state = decode(imported.state.as_ref());
        assert_eq!(state.get_attr("id"), Some(&Value::string("srv-web")));
        assert_eq!(state.get_attr("name"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_upgrade_resource_state() {
        let resource = server_resource()
            .with_schema_version(1)
            .with_state_upgrader(StateUpgrader::new(
                0,
                ValueType::object([("id", ValueType::String), ("title", ValueType::String)]),
                |mut m, _| {
                    if let Some(title) = m.remove("title") {
                        m.insert("name".to_string(), title);
                    }
                    Ok(m)
                },
            ));
        let s = GrpcProviderServer::new(Provider::new().with_resource("test_server", resource));
        let upgrade = |version: i64| generated::UpgradeResourceStateRequest {
            type_name: "test_server".to_string(),
            version,
            raw_state: Some(generated::RawState {
                json: br#"{"id":"srv-web","title":"web"}"#.to_vec(),
                flatmap: Default::default(),
            }),
        };

        let resp = s
            .upgrade_resource_state(tonic::Request::new(upgrade(0)))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        let state = decode(resp.upgraded_state.as_ref());
        assert_eq!(state.get_attr("name"), Some(&Value::string("web")));

        let resp = s
            .upgrade_resource_state(tonic::Request::new(upgrade(5)))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.upgraded_state.is_none());
        assert_eq!(resp.diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn test_validate_resource_type_config() {
        let s = server();
        let config = object(vec![("size", Value::int(3))]);
        let resp = s
            .validate_resource_type_config(tonic::Request::new(
                generated::ValidateResourceTypeConfigRequest {
                    type_name: "test_server".to_string(),
                    config: dv(&config),
                },
            ))
            .await
            .unwrap()
            .into_inner();
        assert!(resp
            .diagnostics
            .iter()
            .any(|d| d.summary.contains("Missing required argument")));
    }

    #[tokio::test]
    async fn test_unknown_type_is_a_diagnostic() {
        let resp = server()
            .read_resource(tonic::Request::new(generated::ReadResourceRequest {
                type_name: "test_missing".to_string(),
                current_state: None,
                private: Vec::new(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.diagnostics.len(), 1);
        assert_eq!(
            resp.diagnostics[0].severity,
            generated::diagnostic::Severity::Error as i32
        );
        assert!(resp.diagnostics[0].summary.contains("test_missing"));
    }

    #[tokio::test]
    async fn test_stop_cancels_in_flight_contexts() {
        let s = server();
        let ctx = s.stop_context();
        s.stop(tonic::Request::new(generated::StopRequest {}))
            .await
            .unwrap();
        assert!(ctx.is_cancelled());
        assert!(!s.stop_context().is_cancelled());
    }

    #[test]
    fn test_requires_replace_paths() {
        let schema = SchemaMap::from([
            ("tags".to_string(), Schema::map(crate::helper::ValueKind::String).optional()),
            ("name".to_string(), Schema::string().optional()),
        ]);
        let paths = requires_replace(&["tags.%", "tags.env", "name", "id"], &schema).unwrap();
        let rendered: Vec<String> = paths.iter().map(|p| AttributePath::from(p).to_string()).collect();
        assert_eq!(rendered, vec!["tags", "tags.env", "name", "id"]);
    }

    #[test]
    fn test_remove_config_unknowns() {
        let value = Value::object([
            ("id", Value::Unknown),
            ("tags", Value::Map([("a".to_string(), Value::Unknown)].into())),
            ("name", Value::string("x")),
        ]);
        let out = remove_config_unknowns(value);
        assert_eq!(out.get_attr("id"), Some(&Value::Null));
        assert_eq!(out.get_attr("tags"), Some(&Value::Map(Default::default())));
        assert_eq!(out.get_attr("name"), Some(&Value::string("x")));
    }
}
