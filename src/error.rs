//! Error types for the provider runtime.
//!
//! Three families of errors exist:
//!
//! - [`ProviderError`]: returned by user callbacks and by the request pipeline.
//!   Only the protocol server turns these into wire diagnostics.
//! - [`ValueError`]: type mismatches and codec failures of structured values.
//! - [`SchemaError`]: invalid schema definitions and invalid attribute addresses.

use crate::diag::Diagnostic;
use thiserror::Error;

/// Errors that can occur when implementing or serving a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An internal SDK error occurred.
    #[error("SDK error: {0}")]
    Sdk(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A structured value could not be converted or encoded.
    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    /// A schema definition or attribute address is invalid.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The state upgrade chain could not migrate a stored state.
    #[error("State upgrade error: {0}")]
    StateUpgrade(String),

    /// A CustomizeDiff callback rejected the plan.
    #[error("CustomizeDiff error: {0}")]
    CustomizeDiff(String),

    /// A callback reported one or more diagnostics.
    #[error("{}", summarize_diagnostics(.0))]
    Diagnostics(Vec<Diagnostic>),

    /// Resource already exists (create conflict).
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied (authentication/authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Service temporarily unavailable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Operation timed out.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Invalid request from client.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

fn summarize_diagnostics(diags: &[Diagnostic]) -> String {
    match diags {
        [] => "no diagnostics".to_string(),
        [single] => single.summary.clone(),
        [first, rest @ ..] => format!("{} (and {} more)", first.summary, rest.len()),
    }
}

impl ProviderError {
    /// Get the error message as a string.
    ///
    /// Wrapped errors have no borrowed message; their `Display` output
    /// carries the details.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg) => msg,
            Self::Validation(msg) => msg,
            Self::Sdk(msg) => msg,
            Self::Configuration(msg) => msg,
            Self::UnknownResource(msg) => msg,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::Transport(_err) => "transport error (see Debug output)",
            Self::Value(_err) => "value error (see Debug output)",
            Self::Schema(_err) => "schema error (see Debug output)",
            Self::StateUpgrade(msg) => msg,
            Self::CustomizeDiff(msg) => msg,
            Self::Diagnostics(diags) => diags
                .first()
                .map(|d| d.summary.as_str())
                .unwrap_or("no diagnostics"),
            Self::AlreadyExists(msg) => msg,
            Self::PermissionDenied(msg) => msg,
            Self::Unavailable(msg) => msg,
            Self::DeadlineExceeded(msg) => msg,
            Self::FailedPrecondition(msg) => msg,
            Self::Unimplemented(msg) => msg,
            Self::InvalidRequest(msg) => msg,
        }
    }

    /// Convert this error into wire diagnostics.
    ///
    /// A [`ProviderError::Diagnostics`] error is unwrapped as-is; every other
    /// error becomes a single error diagnostic whose summary is the error's
    /// `Display` output.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        match self {
            Self::Diagnostics(diags) => diags,
            other => vec![Diagnostic::error(other.to_string())],
        }
    }
}

impl From<Vec<Diagnostic>> for ProviderError {
    fn from(diags: Vec<Diagnostic>) -> Self {
        Self::Diagnostics(diags)
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(msg) => tonic::Status::not_found(msg),
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::Sdk(msg) => tonic::Status::internal(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            },
            ProviderError::Transport(err) => {
                tonic::Status::unavailable(format!("Transport error: {}", err))
            },
            ProviderError::Value(err) => {
                tonic::Status::invalid_argument(format!("Value error: {}", err))
            },
            ProviderError::Schema(err) => tonic::Status::internal(format!("Schema error: {}", err)),
            ProviderError::StateUpgrade(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::CustomizeDiff(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Diagnostics(diags) => {
                tonic::Status::invalid_argument(summarize_diagnostics(&diags))
            },
            ProviderError::AlreadyExists(msg) => tonic::Status::already_exists(msg),
            ProviderError::PermissionDenied(msg) => tonic::Status::permission_denied(msg),
            ProviderError::Unavailable(msg) => tonic::Status::unavailable(msg),
            ProviderError::DeadlineExceeded(msg) => tonic::Status::deadline_exceeded(msg),
            ProviderError::FailedPrecondition(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::Unimplemented(msg) => tonic::Status::unimplemented(msg),
            ProviderError::InvalidRequest(msg) => tonic::Status::invalid_argument(msg),
        }
    }
}

/// Errors converting, coercing, or encoding structured values.
#[derive(Debug, Error)]
pub enum ValueError {
    /// A value does not conform to the expected type.
    #[error("{}", conversion_message(.path, .message))]
    Conversion {
        /// Flatmap-style path of the offending value, empty for the root.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// Msgpack encoding failed.
    #[error("msgpack encoding error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    /// Msgpack decoding failed.
    #[error("msgpack decoding error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A type description could not be parsed.
    #[error("invalid type description: {0}")]
    InvalidType(String),

    /// An unknown value was found where only known values are allowed.
    #[error("unknown values cannot be represented in {0}")]
    UnknownValue(&'static str),

    /// A flatmap could not be expanded.
    #[error("flatmap: {0}")]
    Flatmap(String),
}

fn conversion_message(path: &str, message: &str) -> String {
    if path.is_empty() {
        message.to_string()
    } else {
        format!("{}: {}", path, message)
    }
}

impl ValueError {
    pub(crate) fn conversion(path: impl ToString, message: impl Into<String>) -> Self {
        Self::Conversion {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// Errors in schema definitions or in addresses resolved against a schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// An attribute definition breaks a schema rule.
    #[error("{key}: {message}")]
    InvalidDefinition {
        /// Dotted key of the attribute.
        key: String,
        /// The rule that was broken.
        message: String,
    },

    /// An address does not resolve to any attribute of the schema.
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    /// A value written to an address does not match the attribute's kind.
    #[error("{key}: {message}")]
    InvalidValue {
        /// Dotted key of the attribute.
        key: String,
        /// What went wrong.
        message: String,
    },

    /// Several definition errors at once.
    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<SchemaError>),
}

impl SchemaError {
    pub(crate) fn definition(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            key: key.into(),
            message: message.into(),
        }
    }

    pub(crate) fn value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Collapse a list of errors into a single result.
    pub(crate) fn collect(mut errors: Vec<SchemaError>) -> Result<(), SchemaError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(SchemaError::Multiple(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Severity;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("resource-123".to_string());
        assert_eq!(format!("{}", err), "Resource not found: resource-123");

        let err = ProviderError::StateUpgrade("no upgrader for version 1".to_string());
        assert_eq!(
            format!("{}", err),
            "State upgrade error: no upgrader for version 1"
        );

        let err = ProviderError::UnknownResource("custom_resource".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: custom_resource");
    }

    #[test]
    fn test_error_to_status() {
        let err = ProviderError::NotFound("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let err = ProviderError::Validation("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let err = ProviderError::Schema(SchemaError::InvalidAddress("a.b".to_string()));
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::Internal);

        let err = ProviderError::StateUpgrade("test".to_string());
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    }

    #[test]
    fn test_into_diagnostics_wraps_plain_errors() {
        let diags = ProviderError::CustomizeDiff("bad plan".to_string()).into_diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Error);
        assert_eq!(diags[0].summary, "CustomizeDiff error: bad plan");
    }

    #[test]
    fn test_into_diagnostics_passes_through() {
        let original = vec![
            Diagnostic::warning("careful"),
            Diagnostic::error("broken").with_detail("really"),
        ];
        let err = ProviderError::from(original.clone());
        assert_eq!(err.message(), "careful");
        assert_eq!(err.to_string(), "careful (and 1 more)");
        assert_eq!(err.into_diagnostics(), original);
    }

    #[test]
    fn test_value_error_paths() {
        let err = ValueError::conversion("list.0", "number required");
        assert_eq!(err.to_string(), "list.0: number required");

        let err = ValueError::conversion("", "object required");
        assert_eq!(err.to_string(), "object required");
    }

    #[test]
    fn test_schema_error_collect() {
        assert!(SchemaError::collect(vec![]).is_ok());

        let single = SchemaError::collect(vec![SchemaError::definition("a", "bad")]);
        assert_eq!(single.unwrap_err().to_string(), "a: bad");

        let many = SchemaError::collect(vec![
            SchemaError::definition("a", "bad"),
            SchemaError::definition("b", "worse"),
        ]);
        assert_eq!(many.unwrap_err().to_string(), "a: bad; b: worse");
    }
}
