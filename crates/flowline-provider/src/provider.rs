//! The polymorphic backend contract.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use flowline_core::{Capability, Request, RequestMetrics, Response};

use crate::error::ProviderResult;

/// Construction-time description of a provider.
///
/// Immutable after construction; internal resource state (connections,
/// sessions) is private to the provider and lifecycle-managed through
/// `initialize`/`cleanup`.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    /// Base URL of the backing service, if remote.
    pub api_url: String,
    /// Credential for the backing service.
    pub api_key: String,
    /// Model identifier within the backing service.
    pub model_id: String,
    /// Capabilities this provider advertises.
    pub capabilities: BTreeSet<Capability>,
    /// Processing attempts before a request fails permanently.
    pub retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for ProviderDescriptor {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            model_id: String::new(),
            capabilities: BTreeSet::new(),
            retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl ProviderDescriptor {
    pub fn new(api_url: &str, api_key: &str, model_id: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            model_id: model_id.to_string(),
            ..Self::default()
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries.max(1);
        self.retry_delay = delay;
        self
    }
}

/// A backend that fulfills typed requests.
///
/// `R` is the request payload, `S` the response payload; both are
/// opaque to the orchestration core. Implementations absorb transient
/// failures inside `process_request` via their retry budget (see
/// [`crate::retry`]); once the budget is spent the request fails
/// permanently.
#[async_trait]
pub trait PipelineProvider<R, S>: Send + Sync
where
    R: Send + 'static,
    S: Send + 'static,
{
    /// The immutable provider descriptor.
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Capabilities this provider can serve.
    fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.descriptor().capabilities
    }

    /// Acquire external resources. Called once before first use;
    /// failure leaves the provider unusable and must be surfaced.
    async fn initialize(&self) -> ProviderResult<()>;

    /// Non-mutating liveness probe.
    async fn health_check(&self) -> bool;

    /// Process one request. The sole mutating, potentially slow
    /// operation.
    async fn process_request(&self, request: Request<R>) -> ProviderResult<Response<S>>;

    /// Release all resources. Safe to call even if `initialize` never
    /// succeeded.
    async fn cleanup(&self);

    /// Snapshot of provider-side request metrics. Not a live view;
    /// requests processed after the call are not reflected.
    async fn request_metrics(&self) -> HashMap<Uuid, RequestMetrics> {
        HashMap::new()
    }

    /// Open connection count, for the `connections` scaling signal.
    fn connection_count(&self) -> usize {
        0
    }

    /// Memory usage in bytes, for the `memory` scaling signal.
    fn memory_usage(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_defaults() {
        let descriptor = ProviderDescriptor::default();
        assert_eq!(descriptor.retries, 3);
        assert_eq!(descriptor.retry_delay, Duration::from_secs(1));
        assert!(descriptor.capabilities.is_empty());
    }

    #[test]
    fn descriptor_builder() {
        let descriptor = ProviderDescriptor::new("https://api.example.test", "key", "model-1")
            .with_capability(Capability::SpeechSynthesis)
            .with_retries(5, Duration::from_millis(250));

        assert_eq!(descriptor.model_id, "model-1");
        assert!(descriptor.capabilities.contains(&Capability::SpeechSynthesis));
        assert_eq!(descriptor.retries, 5);
    }

    #[test]
    fn retries_clamp_to_at_least_one() {
        let descriptor = ProviderDescriptor::default().with_retries(0, Duration::ZERO);
        assert_eq!(descriptor.retries, 1);
    }
}
