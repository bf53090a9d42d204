//! Per-operation resource timeouts.
//!
//! Timeouts are declared on a [`crate::helper::Resource`], may be overridden
//! by a `timeouts` block in configuration, travel from plan to apply inside
//! the diff's private data, and are persisted in the state's meta.

use crate::error::ProviderError;
use crate::instance::{InstanceDiff, InstanceState, ResourceConfig};
use crate::path::AttributePath;
use crate::value::Value;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

/// Name of the configuration block holding timeouts.
pub const TIMEOUTS_CONFIG_KEY: &str = "timeouts";

/// Meta key under which encoded timeouts are stored.
pub const TIMEOUT_KEY: &str = "e2bfb730-ecaa-11e6-8f88-34363bc7c4c0";

/// Timeout used when neither the operation nor a default is set.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// The operation a timeout applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Create.
    Create,
    /// Read.
    Read,
    /// Update.
    Update,
    /// Delete.
    Delete,
    /// Fallback for every operation.
    Default,
}

impl TimeoutKind {
    /// All kinds, in block attribute order.
    pub const ALL: [TimeoutKind; 5] = [
        TimeoutKind::Create,
        TimeoutKind::Read,
        TimeoutKind::Update,
        TimeoutKind::Delete,
        TimeoutKind::Default,
    ];

    /// The configuration key of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            TimeoutKind::Create => "create",
            TimeoutKind::Read => "read",
            TimeoutKind::Update => "update",
            TimeoutKind::Delete => "delete",
            TimeoutKind::Default => "default",
        }
    }

    fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == key)
    }
}

/// Timeouts of a resource's operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceTimeout {
    /// Create timeout.
    pub create: Option<Duration>,
    /// Read timeout.
    pub read: Option<Duration>,
    /// Update timeout.
    pub update: Option<Duration>,
    /// Delete timeout.
    pub delete: Option<Duration>,
    /// Fallback for unset operations.
    pub default: Option<Duration>,
}

impl ResourceTimeout {
    /// No timeouts declared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the create timeout.
    pub fn with_create(mut self, d: Duration) -> Self {
        self.create = Some(d);
        self
    }

    /// Declare the read timeout.
    pub fn with_read(mut self, d: Duration) -> Self {
        self.read = Some(d);
        self
    }

    /// Declare the update timeout.
    pub fn with_update(mut self, d: Duration) -> Self {
        self.update = Some(d);
        self
    }

    /// Declare the delete timeout.
    pub fn with_delete(mut self, d: Duration) -> Self {
        self.delete = Some(d);
        self
    }

    /// Declare the default timeout.
    pub fn with_default(mut self, d: Duration) -> Self {
        self.default = Some(d);
        self
    }

    fn slot(&mut self, kind: TimeoutKind) -> &mut Option<Duration> {
        match kind {
            TimeoutKind::Create => &mut self.create,
            TimeoutKind::Read => &mut self.read,
            TimeoutKind::Update => &mut self.update,
            TimeoutKind::Delete => &mut self.delete,
            TimeoutKind::Default => &mut self.default,
        }
    }

    /// The declared timeout of `kind`, without fallback.
    pub fn declared(&self, kind: TimeoutKind) -> Option<Duration> {
        let mut copy = *self;
        *copy.slot(kind)
    }

    /// The effective timeout of `kind`: its own value, else the default,
    /// else twenty minutes.
    pub fn get(&self, kind: TimeoutKind) -> Duration {
        self.declared(kind)
            .or(self.default)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Start from `declared` and apply the `timeouts` block of `config`.
    ///
    /// Only kinds the resource declares may be configured. An unknown block
    /// leaves the declared values in place.
    pub fn config_decode(
        declared: Option<&ResourceTimeout>,
        config: &ResourceConfig,
    ) -> Result<ResourceTimeout, ProviderError> {
        let mut out = declared.copied().unwrap_or_default();
        let Some(raw) = config.get(&AttributePath::root(TIMEOUTS_CONFIG_KEY)) else {
            return Ok(out);
        };
        let entries = match raw {
            Value::Unknown => return Ok(out),
            Value::Object(entries) | Value::Map(entries) => entries,
            Value::List(items) | Value::Set(items) => match items.first().and_then(Value::entries) {
                Some(entries) => entries,
                None => return Ok(out),
            },
            other => {
                return Err(ProviderError::Validation(format!(
                    "invalid timeouts structure: {:?}",
                    other
                )))
            },
        };
        for (key, value) in entries {
            let raw = match value {
                Value::Null | Value::Unknown => continue,
                Value::String(s) => s,
                other => {
                    return Err(ProviderError::Validation(format!(
                        "timeout {:?} must be a string, got {:?}",
                        key, other
                    )))
                },
            };
            let kind = TimeoutKind::parse(key).ok_or_else(|| {
                ProviderError::Validation(format!(
                    "Unsupported Timeout configuration key found ({})",
                    key
                ))
            })?;
            let parsed = parse_duration(raw).map_err(|e| {
                ProviderError::Validation(format!("Error parsing {:?} timeout: {}", key, e))
            })?;
            let slot = out.slot(kind);
            if slot.is_none() {
                return Err(ProviderError::Validation(format!(
                    "Timeout Key ({}) is not supported",
                    key
                )));
            }
            *slot = Some(parsed);
        }
        Ok(out)
    }

    fn meta_encode(&self) -> Option<serde_json::Value> {
        let encoded: serde_json::Map<String, serde_json::Value> = TimeoutKind::ALL
            .into_iter()
            .filter_map(|kind| {
                self.declared(kind)
                    .map(|d| (kind.as_str().to_string(), json!(d.as_nanos() as u64)))
            })
            .collect();
        if encoded.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(encoded))
        }
    }

    fn meta_decode(meta: &BTreeMap<String, serde_json::Value>) -> Option<ResourceTimeout> {
        let encoded = meta.get(TIMEOUT_KEY)?.as_object()?;
        if encoded.is_empty() {
            return None;
        }
        let mut out = ResourceTimeout::new();
        for kind in TimeoutKind::ALL {
            if let Some(nanos) = encoded.get(kind.as_str()).and_then(nanos_of) {
                *out.slot(kind) = Some(Duration::from_nanos(nanos));
            }
        }
        Some(out)
    }

    /// Store these timeouts in a diff's private data.
    pub fn diff_encode(&self, diff: &mut InstanceDiff) {
        if let Some(encoded) = self.meta_encode() {
            diff.meta.insert(TIMEOUT_KEY.to_string(), encoded);
        }
    }

    /// Read timeouts stored by [`ResourceTimeout::diff_encode`].
    pub fn diff_decode(diff: &InstanceDiff) -> Option<ResourceTimeout> {
        Self::meta_decode(&diff.meta)
    }

    /// Store these timeouts in a state's meta.
    pub fn state_encode(&self, state: &mut InstanceState) {
        if let Some(encoded) = self.meta_encode() {
            state.meta.insert(TIMEOUT_KEY.to_string(), encoded);
        }
    }

    /// Read timeouts stored by [`ResourceTimeout::state_encode`].
    pub fn state_decode(state: &InstanceState) -> Option<ResourceTimeout> {
        Self::meta_decode(&state.meta)
    }
}

fn nanos_of(value: &serde_json::Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// Parse a duration such as `"300ms"`, `"1.5h"` or `"2h45m"`.
///
/// Units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare `"0"` is
/// accepted; negative durations are not.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let invalid = || format!("invalid duration {:?}", input);
    let s = input.strip_prefix('+').unwrap_or(input);
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() || s.starts_with('-') {
        return Err(invalid());
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {:?}", input))?;
        if number_len == 0 {
            return Err(invalid());
        }
        let number: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            unit => return Err(format!("unknown unit {:?} in duration {:?}", unit, input)),
        };
        total += number * nanos_per_unit;
        rest = &rest[unit_len..];
    }
    Ok(Duration::from_nanos(total.round() as u64))
}
