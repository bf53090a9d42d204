//! Cooperative cancellation shared by in-flight requests.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Owns the provider-wide stop token.
///
/// Every request derives a child token; [`StopController::stop`] cancels all
/// of them at once and installs a fresh token so later requests start out
/// uncancelled.
#[derive(Debug, Default)]
pub struct StopController {
    token: Mutex<CancellationToken>,
}

impl StopController {
    /// Create a controller with an uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every derived token and reset.
    pub fn stop(&self) {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
    }

    /// A token cancelled by the next [`StopController::stop`].
    pub fn derived(&self) -> CancellationToken {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token()
    }

    /// A request context bound to the current token.
    pub fn context(&self) -> RequestContext {
        RequestContext::new(self.derived())
    }
}

/// Per-request context handed to resource callbacks.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancellation: CancellationToken,
    timeout: Option<Duration>,
}

impl RequestContext {
    /// A context observing `cancellation`.
    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            timeout: None,
        }
    }

    /// A copy of this context carrying an advisory deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            cancellation: self.cancellation.clone(),
            timeout: Some(timeout),
        }
    }

    /// The advisory deadline for the current operation.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the provider was asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the provider is asked to stop.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// The underlying token.
    pub fn token(&self) -> &CancellationToken {
        &self.cancellation
    }
}
