//! Migration of stored states to the current schema version.
//!
//! A stored state is either a legacy flatmap or a JSON document. Flatmap
//! states first go through the resource's `MigrateState` function (for
//! versions older than the first state upgrader), are expanded with the
//! type of the version they reached, and then continue as JSON through the
//! chain of [`StateUpgrader`](crate::helper::StateUpgrader)s.

use crate::error::ProviderError;
use crate::flatmap::{expand, FlatMap};
use crate::helper::resource::{Meta, Resource, SCHEMA_VERSION_KEY};
use crate::instance::InstanceState;
use crate::normalize::normalize_object_from_legacy_sdk;
use crate::value::{Value, ValueType};
use crate::wire::{value_from_json, value_to_json};
use serde_json::{Map, Value as Json};
use tracing::{debug, trace};

/// A state as stored by the orchestrator.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RawState {
    /// Nothing was stored.
    #[default]
    Empty,
    /// A JSON document.
    Json(Vec<u8>),
    /// A legacy flatmap.
    Flatmap(FlatMap),
}

impl RawState {
    /// Pick the populated representation. A flatmap wins over JSON; both
    /// are never sent together.
    pub fn from_parts(json: Vec<u8>, flatmap: impl IntoIterator<Item = (String, String)>) -> Self {
        let flatmap: FlatMap = flatmap.into_iter().collect();
        if !flatmap.is_empty() {
            RawState::Flatmap(flatmap)
        } else if !json.is_empty() {
            RawState::Json(json)
        } else {
            RawState::Empty
        }
    }
}

impl Resource {
    /// Upgrade a stored state written at `version` to the current schema.
    ///
    /// Returns `None` when nothing was stored. The result conforms to the
    /// resource's implied type, with empty collections for absent list and
    /// set blocks.
    pub fn upgrade_state(
        &self,
        version: u64,
        raw: &RawState,
        meta: &Meta,
    ) -> Result<Option<Value>, ProviderError> {
        if version > self.schema_version {
            return Err(ProviderError::StateUpgrade(format!(
                "state version {} is newer than the schema version {} of this provider",
                version, self.schema_version
            )));
        }

        let (object, version) = match raw {
            RawState::Flatmap(map) => self.upgrade_flatmap_state(version, map, meta)?,
            RawState::Json(bytes) => {
                let object: Map<String, Json> = serde_json::from_slice(bytes)?;
                (object, version)
            },
            RawState::Empty => {
                debug!("no state provided to upgrade");
                return Ok(None);
            },
        };

        trace!(version, "upgrading JSON state");
        let object = self.upgrade_json_state(version, object, meta)?;

        let block = self.core_config_schema();
        let ty = block.implied_type();
        let mut json = Json::Object(object);
        // Providers are not required to clean out removed attributes.
        remove_attributes(&mut json, &ty);
        let value = value_from_json(&json, &ty)?;
        let value = block.coerce_value(value)?;
        Ok(Some(normalize_object_from_legacy_sdk(value, &block)))
    }

    fn upgrade_flatmap_state(
        &self,
        version: u64,
        map: &FlatMap,
        meta: &Meta,
    ) -> Result<(Map<String, Json>, u64), ProviderError> {
        let first_upgrader = self.state_upgraders.first();
        let requires_migrate = match first_upgrader {
            Some(upgrader) => version < upgrader.version,
            None => version < self.schema_version,
        };

        let mut attributes = map.clone();
        let (ty, upgraded_version) = if requires_migrate {
            if let Some(migrate) = &self.migrate_state {
                let mut state = InstanceState::with_id(map.get("id").cloned().unwrap_or_default());
                state.attributes = attributes;
                state.meta.insert(SCHEMA_VERSION_KEY.to_string(), Json::String(version.to_string()));
                let migrated = migrate(version, state, meta)?;
                attributes = migrated.attributes;
                attributes.insert("id".to_string(), migrated.id);
            } else {
                // Older providers bumped the version without a migration.
                debug!(version, "schema version bumped without MigrateState");
            }
            match first_upgrader {
                Some(upgrader) => (upgrader.ty.clone(), upgrader.version),
                None => (self.implied_type(), self.schema_version),
            }
        } else {
            // A flatmap state between the legacy migrations and the current
            // version is expanded with the type of its own version.
            let ty = self
                .state_upgraders
                .iter()
                .find(|u| u.version == version)
                .map(|u| u.ty.clone())
                .unwrap_or_else(|| self.implied_type());
            (ty, version)
        };

        let value = expand(&attributes, &ty)?;
        match value_to_json(&value)? {
            Json::Object(object) => Ok((object, upgraded_version)),
            _ => Ok((Map::new(), upgraded_version)),
        }
    }

    fn upgrade_json_state(
        &self,
        mut version: u64,
        mut object: Map<String, Json>,
        meta: &Meta,
    ) -> Result<Map<String, Json>, ProviderError> {
        for upgrader in &self.state_upgraders {
            if upgrader.version != version {
                continue;
            }
            debug!(from = version, to = version + 1, "running state upgrader");
            object = (upgrader.upgrade)(object, meta)?;
            version += 1;
        }
        if version != self.schema_version {
            return Err(ProviderError::StateUpgrade(format!(
                "no StateUpgrader for version {} (schema version {})",
                version, self.schema_version
            )));
        }
        Ok(object)
    }
}

/// Drop attributes `ty` no longer declares, at any depth.
pub(crate) fn remove_attributes(json: &mut Json, ty: &ValueType) {
    match json {
        Json::Array(items) => {
            if let ValueType::List(element) | ValueType::Set(element) = ty {
                for item in items {
                    remove_attributes(item, element);
                }
            }
        },
        Json::Object(map) => match ty {
            ValueType::Map(element) => {
                for v in map.values_mut() {
                    remove_attributes(v, element);
                }
            },
            ValueType::Object(attrs) => {
                map.retain(|name, _| {
                    let keep = attrs.contains_key(name);
                    if !keep {
                        debug!(attribute = %name, "attribute no longer present in schema");
                    }
                    keep
                });
                for (name, v) in map.iter_mut() {
                    if let Some(attr_ty) = attrs.get(name) {
                        remove_attributes(v, attr_ty);
                    }
                }
            },
            _ => {},
        },
        _ => {},
    }
}
