//! Testing utilities for provider implementations.
//!
//! This module drives a [`Provider`] through the same request handling the
//! gRPC server uses, without spinning up a server. Configurations are given
//! as JSON and states come back as [`Value`]s.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_provider_schema::testing::ProviderTester;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_resource() {
//!     let tester = ProviderTester::new(my_provider());
//!
//!     // Configure the provider
//!     tester.configure(json!({"api_key": "test"})).await.unwrap();
//!
//!     // Plan, apply and read back
//!     let created = tester
//!         .lifecycle_create("my_resource", json!({"name": "test-resource"}))
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(created.state.get_attr("name"), Some(&Value::string("test-resource")));
//! }
//! ```

use serde_json::Value as Json;

use crate::configschema::{Block, ProviderSchema};
use crate::diag::Diagnostic;
use crate::error::ProviderError;
use crate::generated;
use crate::generated::provider_server::Provider as ProviderRpc;
use crate::helper::{core_config_schema, Provider};
use crate::path::AttributePath;
use crate::server::GrpcProviderServer;
use crate::types::{decode_dynamic_value, encode_dynamic_value};
use crate::value::Value;
use crate::wire::value_from_json;

/// The outcome of a successful plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanResult {
    /// The state before the change; null for a create.
    pub prior_state: Value,
    /// The planned state; null for a destroy.
    pub planned_state: Value,
    /// The configuration that was planned.
    pub config: Value,
    /// Attributes whose change forces replacement.
    pub requires_replace: Vec<AttributePath>,
    /// Private data to hand to the apply.
    pub planned_private: Vec<u8>,
    /// Warnings reported by the plan.
    pub diagnostics: Vec<Diagnostic>,
}

impl PlanResult {
    /// Whether the planned state differs from the prior one.
    pub fn has_changes(&self) -> bool {
        self.planned_state != self.prior_state
    }

    /// Whether the existing object must be replaced.
    pub fn requires_replacement(&self) -> bool {
        !self.prior_state.is_null()
            && !self.planned_state.is_null()
            && !self.requires_replace.is_empty()
    }

    /// Top-level attributes whose planned value differs from the prior one.
    pub fn changed_attributes(&self) -> Vec<String> {
        let planned = self.planned_state.entries();
        let prior = self.prior_state.entries();
        let mut names: Vec<String> = planned
            .into_iter()
            .chain(prior)
            .flat_map(|entries| entries.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names.retain(|name| self.planned_state.get_attr(name) != self.prior_state.get_attr(name));
        names
    }
}

/// A state returned by an apply or a read, with its private data.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedState {
    /// The new state; null when the object is gone.
    pub state: Value,
    /// Private data to hand to the next read or plan.
    pub private: Vec<u8>,
}

/// A test harness for provider implementations.
///
/// # Example
///
/// ```ignore
/// use hemmer_provider_schema::testing::ProviderTester;
///
/// let tester = ProviderTester::new(my_provider());
/// tester.configure(json!({})).await.unwrap();
/// let created = tester.lifecycle_create("my_resource", json!({"name": "test"})).await.unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ProviderTester {
    server: GrpcProviderServer,
}

impl ProviderTester {
    /// Create a new tester for the given provider.
    pub fn new(provider: Provider) -> Self {
        Self {
            server: GrpcProviderServer::new(provider),
        }
    }

    /// The server handling the requests.
    pub fn server(&self) -> &GrpcProviderServer {
        &self.server
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &Provider {
        self.server.provider()
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider().get_schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.schema().resources.into_keys().collect()
    }

    /// Get the list of data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.schema().data_sources.into_keys().collect()
    }

    fn resource_block(&self, type_name: &str) -> Result<Block, TestError> {
        Ok(self.provider().resource(type_name)?.core_config_schema())
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration and fill in its defaults.
    ///
    /// Returns the prepared configuration, or the error diagnostics.
    pub async fn prepare_provider_config(&self, config: Json) -> Result<Value, TestError> {
        let block = core_config_schema(&self.provider().schema);
        let ty = block.implied_type();
        let config = config_value(&block, &config)?;
        let resp = self
            .server
            .prepare_provider_config(tonic::Request::new(
                generated::PrepareProviderConfigRequest {
                    config: Some(encode_dynamic_value(&config, &ty).map_err(ProviderError::from)?),
                },
            ))
            .await?
            .into_inner();
        check_diagnostics(resp.diagnostics)?;
        Ok(decode_dynamic_value(resp.prepared_config.as_ref(), &ty).map_err(ProviderError::from)?)
    }

    /// Configure the provider.
    ///
    /// Returns `Ok(())` if configuration succeeds.
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn configure(&self, config: Json) -> Result<(), TestError> {
        let block = core_config_schema(&self.provider().schema);
        let config = config_value(&block, &config)?;
        let resp = self
            .server
            .configure(tonic::Request::new(generated::ConfigureRequest {
                terraform_version: String::new(),
                config: Some(encode(&config, &block)?),
            }))
            .await?
            .into_inner();
        check_diagnostics(resp.diagnostics)
    }

    /// Cancel every in-flight request.
    pub async fn stop(&self) -> Result<(), TestError> {
        self.server
            .stop(tonic::Request::new(generated::StopRequest {}))
            .await?;
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Json,
    ) -> Result<(), TestError> {
        let block = self.resource_block(resource_type)?;
        let config = config_value(&block, &config)?;
        let resp = self
            .server
            .validate_resource_type_config(tonic::Request::new(
                generated::ValidateResourceTypeConfigRequest {
                    type_name: resource_type.to_string(),
                    config: Some(encode(&config, &block)?),
                },
            ))
            .await?
            .into_inner();
        check_diagnostics(resp.diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        config: Json,
    ) -> Result<PlanResult, TestError> {
        let block = self.resource_block(resource_type)?;
        let config = config_value(&block, &config)?;
        self.plan(resource_type, &Value::Null, &config, &config, Vec::new())
            .await
    }

    /// Plan a resource update. Computed attributes left out of `config`
    /// keep their prior values.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: &Value,
        config: Json,
    ) -> Result<PlanResult, TestError> {
        let block = self.resource_block(resource_type)?;
        let config = config_value(&block, &config)?;
        let proposed = proposed_new(prior_state, &config, &block);
        self.plan(resource_type, prior_state, &proposed, &config, Vec::new())
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: &Value,
    ) -> Result<PlanResult, TestError> {
        self.plan(resource_type, prior_state, &Value::Null, &Value::Null, Vec::new())
            .await
    }

    /// Full plan operation with explicit values.
    pub async fn plan(
        &self,
        resource_type: &str,
        prior_state: &Value,
        proposed_state: &Value,
        config: &Value,
        prior_private: Vec<u8>,
    ) -> Result<PlanResult, TestError> {
        let block = self.resource_block(resource_type)?;
        let resp = self
            .server
            .plan_resource_change(tonic::Request::new(generated::PlanResourceChangeRequest {
                type_name: resource_type.to_string(),
                prior_state: Some(encode(prior_state, &block)?),
                proposed_new_state: Some(encode(proposed_state, &block)?),
                config: Some(encode(config, &block)?),
                prior_private,
            }))
            .await?
            .into_inner();
        let diagnostics = check_warnings(resp.diagnostics)?;
        Ok(PlanResult {
            prior_state: prior_state.clone(),
            planned_state: decode(resp.planned_state.as_ref(), &block)?,
            config: config.clone(),
            requires_replace: resp.requires_replace.iter().map(AttributePath::from).collect(),
            planned_private: resp.planned_private,
            diagnostics,
        })
    }

    /// Apply a plan.
    pub async fn apply(
        &self,
        resource_type: &str,
        plan: &PlanResult,
    ) -> Result<AppliedState, TestError> {
        let block = self.resource_block(resource_type)?;
        let resp = self
            .server
            .apply_resource_change(tonic::Request::new(generated::ApplyResourceChangeRequest {
                type_name: resource_type.to_string(),
                prior_state: Some(encode(&plan.prior_state, &block)?),
                planned_state: Some(encode(&plan.planned_state, &block)?),
                config: Some(encode(&plan.config, &block)?),
                planned_private: plan.planned_private.clone(),
            }))
            .await?
            .into_inner();
        check_diagnostics(resp.diagnostics)?;
        Ok(AppliedState {
            state: decode(resp.new_state.as_ref(), &block)?,
            private: resp.private,
        })
    }

    /// Read the current state of a resource.
    pub async fn read(
        &self,
        resource_type: &str,
        current: &AppliedState,
    ) -> Result<AppliedState, TestError> {
        let block = self.resource_block(resource_type)?;
        let resp = self
            .server
            .read_resource(tonic::Request::new(generated::ReadResourceRequest {
                type_name: resource_type.to_string(),
                current_state: Some(encode(&current.state, &block)?),
                private: current.private.clone(),
            }))
            .await?
            .into_inner();
        check_diagnostics(resp.diagnostics)?;
        Ok(AppliedState {
            state: decode(resp.new_state.as_ref(), &block)?,
            private: resp.private,
        })
    }

    /// Import an existing resource. Returns the type and state of every
    /// imported instance.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<(String, Value)>, TestError> {
        let resp = self
            .server
            .import_resource_state(tonic::Request::new(
                generated::ImportResourceStateRequest {
                    type_name: resource_type.to_string(),
                    id: id.to_string(),
                },
            ))
            .await?
            .into_inner();
        check_diagnostics(resp.diagnostics)?;
        let mut imported = Vec::with_capacity(resp.imported_resources.len());
        for resource in resp.imported_resources {
            let block = self.resource_block(&resource.type_name)?;
            let state = decode(resource.state.as_ref(), &block)?;
            imported.push((resource.type_name, state));
        }
        Ok(imported)
    }

    /// Upgrade a JSON state stored at `version` to the current schema.
    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Json,
    ) -> Result<Value, TestError> {
        let block = self.resource_block(resource_type)?;
        let json = serde_json::to_vec(&state).map_err(ProviderError::from)?;
        let resp = self
            .server
            .upgrade_resource_state(tonic::Request::new(
                generated::UpgradeResourceStateRequest {
                    type_name: resource_type.to_string(),
                    version,
                    raw_state: Some(generated::RawState {
                        json,
                        flatmap: Default::default(),
                    }),
                },
            ))
            .await?
            .into_inner();
        check_diagnostics(resp.diagnostics)?;
        decode(resp.upgraded_state.as_ref(), &block)
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Validate a data source configuration.
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Json,
    ) -> Result<(), TestError> {
        let block = self
            .provider()
            .data_source(data_source_type)?
            .core_config_schema();
        let config = config_value(&block, &config)?;
        let resp = self
            .server
            .validate_data_source_config(tonic::Request::new(
                generated::ValidateDataSourceConfigRequest {
                    type_name: data_source_type.to_string(),
                    config: Some(encode(&config, &block)?),
                },
            ))
            .await?
            .into_inner();
        check_diagnostics(resp.diagnostics)
    }

    /// Read data from a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Json,
    ) -> Result<Value, TestError> {
        let block = self
            .provider()
            .data_source(data_source_type)?
            .core_config_schema();
        let config = config_value(&block, &config)?;
        let resp = self
            .server
            .read_data_source(tonic::Request::new(generated::ReadDataSourceRequest {
                type_name: data_source_type.to_string(),
                config: Some(encode(&config, &block)?),
            }))
            .await?
            .into_inner();
        check_diagnostics(resp.diagnostics)?;
        decode(resp.state.as_ref(), &block)
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Run a full create lifecycle: plan → apply → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Json,
    ) -> Result<AppliedState, TestError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.apply(resource_type, &plan).await?;
        self.read(resource_type, &created).await
    }

    /// Run a full update lifecycle: plan → apply → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior: &AppliedState,
        config: Json,
    ) -> Result<AppliedState, TestError> {
        let mut plan = self.plan_update(resource_type, &prior.state, config).await?;
        if plan.planned_private.is_empty() {
            plan.planned_private = prior.private.clone();
        }
        let updated = self.apply(resource_type, &plan).await?;
        self.read(resource_type, &updated).await
    }

    /// Run a full delete lifecycle: plan → apply.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current: &AppliedState,
    ) -> Result<(), TestError> {
        let plan = self.plan_delete(resource_type, &current.state).await?;
        let deleted = self.apply(resource_type, &plan).await?;
        if !deleted.state.is_null() {
            return Err(TestError::Provider(ProviderError::Sdk(
                "destroy left a non-null state".to_string(),
            )));
        }
        Ok(())
    }

    /// Run a full CRUD lifecycle: create → read → update → read → delete.
    ///
    /// Returns the state after the update (before delete).
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Json,
        updated_config: Json,
    ) -> Result<AppliedState, TestError> {
        let created = self.lifecycle_create(resource_type, initial_config).await?;
        let updated = self
            .lifecycle_update(resource_type, &created, updated_config)
            .await?;
        self.lifecycle_delete(resource_type, &updated).await?;
        Ok(updated)
    }
}

/// A JSON configuration as a value conforming to `block`.
fn config_value(block: &Block, config: &Json) -> Result<Value, TestError> {
    let value = value_from_json(config, &block.implied_type()).map_err(ProviderError::from)?;
    Ok(block.coerce_value(value).map_err(ProviderError::from)?)
}

/// The proposed new state: the configuration, with computed attributes it
/// leaves unset taken from the prior state.
fn proposed_new(prior: &Value, config: &Value, block: &Block) -> Value {
    if prior.is_null() {
        return config.clone();
    }
    let mut proposed = config.clone();
    if let Some(entries) = proposed.entries_mut() {
        for (name, attr) in &block.attributes {
            let Some(value) = entries.get_mut(name) else {
                continue;
            };
            if attr.computed && value.is_null() {
                if let Some(previous) = prior.get_attr(name) {
                    *value = previous.clone();
                }
            }
        }
    }
    proposed
}

fn encode(value: &Value, block: &Block) -> Result<generated::DynamicValue, TestError> {
    Ok(encode_dynamic_value(value, &block.implied_type()).map_err(ProviderError::from)?)
}

fn decode(value: Option<&generated::DynamicValue>, block: &Block) -> Result<Value, TestError> {
    Ok(decode_dynamic_value(value, &block.implied_type()).map_err(ProviderError::from)?)
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
    /// The request was rejected by the server.
    Status(tonic::Status),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
            TestError::Status(s) => write!(f, "Request failed: {}", s),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

impl From<tonic::Status> for TestError {
    fn from(s: tonic::Status) -> Self {
        TestError::Status(s)
    }
}

/// Check diagnostics and return an error if there are any errors.
fn check_diagnostics(diagnostics: Vec<generated::Diagnostic>) -> Result<(), TestError> {
    check_warnings(diagnostics).map(|_| ())
}

/// Like [`check_diagnostics`], returning the warnings on success.
fn check_warnings(diagnostics: Vec<generated::Diagnostic>) -> Result<Vec<Diagnostic>, TestError> {
    let (errors, warnings): (Vec<Diagnostic>, Vec<Diagnostic>) = diagnostics
        .into_iter()
        .map(Diagnostic::from)
        .partition(Diagnostic::is_error);

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan result indicates the resource will be created.
///
/// # Panics
///
/// Panics if the plan has a prior state or plans nothing.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        plan.prior_state.is_null(),
        "Expected plan to create, but there is a prior state"
    );
    assert!(
        !plan.planned_state.is_null(),
        "Expected plan to have a planned state for create, but got null"
    );
}

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        !plan.has_changes(),
        "Expected no changes, but got changes to: {:?}",
        plan.changed_attributes()
    );
}

/// Assert that a plan result indicates changes are needed.
///
/// # Panics
///
/// Panics if the plan has no changes.
pub fn assert_plan_has_changes(plan: &PlanResult) {
    assert!(
        plan.has_changes(),
        "Expected plan to have changes, but got no changes"
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replacement(),
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan does not require resource replacement.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replacement(),
        "Expected plan to update in place, but it requires replacement of {:?}",
        plan.requires_replace
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
    );
}

/// Assert that a plan has a change for a specific top-level attribute.
///
/// # Panics
///
/// Panics if the plan does not change the attribute.
pub fn assert_plan_changes_attribute(plan: &PlanResult, name: &str) {
    let changed = plan.changed_attributes();
    assert!(
        changed.iter().any(|c| c == name),
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        name,
        changed
    );
}

/// Assert that a plan does not have a change for a specific top-level attribute.
///
/// # Panics
///
/// Panics if the plan changes the attribute.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, name: &str) {
    assert!(
        !plan.changed_attributes().iter().any(|c| c == name),
        "Expected plan to not change attribute '{}', but it was changed",
        name
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain at least one error.
///
/// # Panics
///
/// Panics if there are no error diagnostics.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(
        diagnostics.iter().any(Diagnostic::is_error),
        "Expected at least one error, but got none"
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| d.is_error() && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}
