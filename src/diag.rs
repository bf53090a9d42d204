//! Diagnostics returned to the orchestrator.

use crate::path::AttributePath;
use serde::{Deserialize, Serialize};

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// The operation failed.
    Error,
    /// The operation succeeded but something deserves attention.
    Warning,
}

/// A severity-tagged message, optionally anchored to an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Severity of the diagnostic.
    pub severity: Severity,
    /// Short summary.
    pub summary: String,
    /// Longer detail, if any.
    pub detail: Option<String>,
    /// The attribute this diagnostic is about.
    #[serde(skip)]
    pub attribute: Option<AttributePath>,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Add detail text.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Anchor the diagnostic to an attribute. An empty path is ignored.
    pub fn with_attribute(mut self, path: AttributePath) -> Self {
        if !path.is_empty() {
            self.attribute = Some(path);
        }
        self
    }

    /// Whether this is an error.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Helpers over collections of diagnostics.
pub trait DiagnosticsExt {
    /// Whether any diagnostic is an error.
    fn has_error(&self) -> bool;
}

impl DiagnosticsExt for [Diagnostic] {
    fn has_error(&self) -> bool {
        self.iter().any(Diagnostic::is_error)
    }
}

impl DiagnosticsExt for Vec<Diagnostic> {
    fn has_error(&self) -> bool {
        self.as_slice().has_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let diag = Diagnostic::error("bad")
            .with_detail("very bad")
            .with_attribute(AttributePath::root("name"));
        assert!(diag.is_error());
        assert_eq!(diag.detail.as_deref(), Some("very bad"));
        assert_eq!(diag.attribute, Some(AttributePath::root("name")));

        let diag = Diagnostic::warning("hmm").with_attribute(AttributePath::new());
        assert!(!diag.is_error());
        assert!(diag.attribute.is_none());
    }

    #[test]
    fn test_has_error() {
        let diags = vec![Diagnostic::warning("w")];
        assert!(!diags.has_error());
        let diags = vec![Diagnostic::warning("w"), Diagnostic::error("e")];
        assert!(diags.has_error());
    }
}
