//! Hemmer Provider Schema
//!
//! This crate is a schema-driven framework for writing Hemmer providers. A
//! provider declares its resources and data sources as attribute schemas
//! and implements create, read, update and delete callbacks; the framework
//! computes plans, validates configuration, migrates stored states and
//! serves everything over the provider gRPC protocol.
//!
//! # Overview
//!
//! - **[`helper`]**: schemas, resources, the diff engine, [`helper::ResourceData`]
//!   and state upgrades
//! - **[`value`] / [`flatmap`] / [`wire`]**: structured values, the legacy
//!   flattened state format and the msgpack/JSON encodings
//! - **[`normalize`]**: reconciles results of the legacy diff engine with
//!   what the orchestrator expects
//! - **[`server`]**: the gRPC adapter and the handshake
//! - **[`testing`]**: drives a provider without a server
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_provider_schema::helper::{
//!     Meta, Provider, Resource, ResourceData, ResourceHandler, Schema, SchemaMap,
//! };
//! use hemmer_provider_schema::{async_trait, serve, Diagnostic, ProviderError, RequestContext};
//!
//! struct Servers;
//!
//! #[async_trait]
//! impl ResourceHandler for Servers {
//!     async fn create(
//!         &self,
//!         _ctx: &RequestContext,
//!         d: &mut ResourceData,
//!         _meta: &Meta,
//!     ) -> Result<Vec<Diagnostic>, ProviderError> {
//!         d.set_id("srv-1");
//!         Ok(vec![])
//!     }
//!
//!     async fn read(
//!         &self,
//!         _ctx: &RequestContext,
//!         _d: &mut ResourceData,
//!         _meta: &Meta,
//!     ) -> Result<Vec<Diagnostic>, ProviderError> {
//!         Ok(vec![])
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     hemmer_provider_schema::init_logging();
//!     let provider = Provider::new().with_resource(
//!         "example_server",
//!         Resource::new()
//!             .with_schema(SchemaMap::from([
//!                 ("name".to_string(), Schema::string().required().force_new()),
//!             ]))
//!             .with_handler(Servers),
//!     );
//!     serve(provider).await
//! }
//! ```
//!
//! # Handshake Protocol
//!
//! When a provider starts via [`serve`], it outputs a handshake string to stdout:
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `HEMMER_PROVIDER|<protocol_version>|<address>`
//!
//! This allows Hemmer to spawn the provider as a subprocess and connect via gRPC.
//!
//! # Provider Protocol
//!
//! - **GetProviderSchema**: schemas for the provider, resources, data sources and identities
//! - **PrepareProviderConfig**: fills provider defaults and validates the configuration
//! - **ValidateResourceTypeConfig / ValidateDataSourceConfig**: configuration checks
//! - **UpgradeResourceState**: migrates stored states to the current schema version
//! - **Configure**: hands the provider configuration to the configure callback
//! - **ReadResource**: refreshes an instance
//! - **PlanResourceChange / ApplyResourceChange**: plans and carries out changes
//! - **ImportResourceState**: imports existing infrastructure
//! - **ReadDataSource**: reads data sources
//! - **Stop**: cancels in-flight requests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod configschema;
pub mod diag;
pub mod error;
pub mod flatmap;
pub mod helper;
pub mod instance;
pub mod logging;
pub mod normalize;
pub mod path;
pub mod server;
pub mod stop;
pub mod testing;
pub mod types;
pub mod validation;
pub mod value;
pub mod wire;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

// Re-export main types at crate root
pub use configschema::{Block, ProviderSchema, ResourceSchema};
pub use diag::{Diagnostic, DiagnosticsExt, Severity};
pub use error::{ProviderError, SchemaError, ValueError};
pub use instance::{InstanceDiff, InstanceState, ResourceAttrDiff, ResourceConfig};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use path::{AttributePath, PathStep};
pub use server::{
    serve, serve_on, serve_on_listener, serve_on_with_options, serve_with_options,
    GrpcProviderServer, ServeOptions,
};
pub use stop::{RequestContext, StopController};
pub use types::{HANDSHAKE_PREFIX, PROTOCOL_VERSION};
pub use validation::{is_valid, validate, validate_result};
pub use value::{Value, ValueType};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tonic;
pub use tracing;
