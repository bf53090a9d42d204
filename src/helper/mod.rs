//! The schema-driven provider framework.
//!
//! Providers describe their resources with [`Schema`] maps and implement
//! [`ResourceHandler`] callbacks; this module diffs configuration against
//! state, exposes values to callbacks through [`ResourceData`] and
//! [`ResourceDiff`], and upgrades stored states.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_schema::helper::{Provider, Resource, Schema, SchemaMap, ValueKind};
//!
//! let server = Resource::new().with_schema(SchemaMap::from([
//!     ("name".to_string(), Schema::string().required().force_new()),
//!     ("tags".to_string(), Schema::map(ValueKind::String).optional()),
//!     ("arn".to_string(), Schema::string().computed()),
//! ]));
//! let provider = Provider::new().with_resource("example_server", server);
//! assert!(provider.internal_validate().is_ok());
//! ```

pub mod core_schema;
pub mod diff;
pub mod field_reader;
pub mod field_reader_config;
pub mod field_reader_diff;
pub mod field_writer;
pub mod provider;
pub mod resource;
pub mod resource_data;
pub mod resource_diff;
pub mod schema;
pub mod set;
pub mod timeout;
pub mod upgrade;

pub use core_schema::{core_config_schema, core_type};
pub use diff::schema_map_diff;
pub use field_reader::{FieldReadResult, FieldReader, MultiLevelFieldReader};
pub use provider::{Configurer, Provider};
pub use resource::{
    CustomizeDiffFunc, ImportStateHandler, Importer, Meta, Resource, ResourceHandler,
    StateMigrateFunc, StateUpgradeFunc, StateUpgrader,
};
pub use resource_data::ResourceData;
pub use resource_diff::ResourceDiff;
pub use schema::{
    internal_validate, parse_address, ConfigMode, Elem, Schema, SchemaDefaultFunc,
    SchemaDiffSuppressFunc, SchemaMap, SchemaStateFunc, SchemaValidateFunc, ValueKind,
};
pub use set::{hash_string, Set, SchemaSetFunc};
pub use timeout::{ResourceTimeout, TimeoutKind};
pub use upgrade::RawState;
