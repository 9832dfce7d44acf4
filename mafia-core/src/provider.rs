//! The decision-provider seam.
//!
//! A provider turns a prompt into structured output for one action. The
//! engine only relies on the documented output fields per action type and
//! on the closed error set below, never on how the provider talks to its
//! model.

use crate::actions::ActionType;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Provider failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The model answered with something unusable. Retried like a failed
    /// validation.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Transport or API failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider's own retries ran out.
    #[error("Failed after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// The call did not finish in time.
    #[error("Request timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl ProviderError {
    /// Whether another attempt with a corrected prompt could help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::InvalidResponse(_))
    }
}

/// Result type for provider calls
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Source of agent decisions.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Produce structured output for `action_type` given `prompt`.
    async fn act(&self, action_type: ActionType, prompt: &str) -> ProviderResult<Value>;
}

#[async_trait]
impl<P: Provider + ?Sized> Provider for Arc<P> {
    async fn act(&self, action_type: ActionType, prompt: &str) -> ProviderResult<Value> {
        (**self).act(action_type, prompt).await
    }
}

/// Call `provider`, turning an overrun of `limit` into
/// [`ProviderError::Timeout`].
pub async fn act_within(
    provider: &dyn Provider,
    action_type: ActionType,
    prompt: &str,
    limit: Option<Duration>,
) -> ProviderResult<Value> {
    match limit {
        Some(duration) => tokio::time::timeout(duration, provider.act(action_type, prompt))
            .await
            .unwrap_or(Err(ProviderError::Timeout { duration })),
        None => provider.act(action_type, prompt).await,
    }
}
