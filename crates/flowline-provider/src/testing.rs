//! Scriptable in-memory provider for tests.
//!
//! Echoes request payloads back after an optional artificial latency,
//! with failure injection for the initialize and processing paths.
//! Every counter is observable so tests can assert exact attempt and
//! lifecycle behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use flowline_core::{Capability, MetricsRegistry, Request, RequestMetrics, Response};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{PipelineProvider, ProviderDescriptor};
use crate::retry::{RetryPolicy, with_retry};

/// An echo provider with scripted behavior.
pub struct MockProvider {
    descriptor: ProviderDescriptor,
    latency: Duration,
    /// Raw attempts that fail before attempts start succeeding.
    /// `u32::MAX` means every attempt fails.
    failing_attempts: u32,
    fail_initialize: bool,
    healthy: AtomicBool,
    attempts: AtomicU32,
    processed: AtomicU32,
    current: AtomicU32,
    peak: AtomicU32,
    initialized: AtomicBool,
    cleaned_up: AtomicBool,
    connections: AtomicUsize,
    memory: AtomicU64,
    metrics: std::sync::Arc<MetricsRegistry>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            descriptor: ProviderDescriptor::default()
                .with_retries(1, Duration::ZERO),
            latency: Duration::ZERO,
            failing_attempts: 0,
            fail_initialize: false,
            healthy: AtomicBool::new(true),
            attempts: AtomicU32::new(0),
            processed: AtomicU32::new(0),
            current: AtomicU32::new(0),
            peak: AtomicU32::new(0),
            initialized: AtomicBool::new(false),
            cleaned_up: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
            memory: AtomicU64::new(0),
            metrics: MetricsRegistry::new(),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.descriptor = self.descriptor.with_capability(capability);
        self
    }

    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.descriptor = self.descriptor.with_retries(retries, delay);
        self
    }

    /// Sleep this long inside every processing attempt.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the first `n` raw processing attempts.
    pub fn failing_first(mut self, n: u32) -> Self {
        self.failing_attempts = n;
        self
    }

    /// Fail every processing attempt.
    pub fn always_failing(mut self) -> Self {
        self.failing_attempts = u32::MAX;
        self
    }

    /// Make `initialize` fail.
    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn with_connection_count(self, n: usize) -> Self {
        self.connections.store(n, Ordering::Relaxed);
        self
    }

    pub fn with_memory_usage(self, bytes: u64) -> Self {
        self.memory.store(bytes, Ordering::Relaxed);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    /// Raw processing attempts observed (including failed ones).
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Requests that completed successfully.
    pub fn processed(&self) -> u32 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Highest number of concurrent `process_request` calls observed.
    pub fn peak_concurrency(&self) -> u32 {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn was_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    pub fn was_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::Relaxed)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PipelineProvider<String, String> for MockProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn initialize(&self) -> ProviderResult<()> {
        if self.fail_initialize {
            return Err(ProviderError::Initialization("scripted failure".into()));
        }
        self.initialized.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    async fn process_request(&self, request: Request<String>) -> ProviderResult<Response<String>> {
        self.metrics.admit(request.id).await;
        self.metrics.mark_dispatched(request.id).await;
        let started = std::time::Instant::now();

        let concurrent = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak.fetch_max(concurrent, Ordering::Relaxed);

        let policy = RetryPolicy::from(&self.descriptor);
        let result = with_retry(policy, |_| async {
            let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if attempt <= self.failing_attempts {
                return Err(ProviderError::Request("scripted failure".into()));
            }
            Ok(Response::for_request(&request, request.payload.clone()))
        })
        .await;

        self.current.fetch_sub(1, Ordering::Relaxed);
        self.metrics.close(request.id, started.elapsed()).await;
        if result.is_ok() {
            self.processed.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn cleanup(&self) {
        self.cleaned_up.store(true, Ordering::Relaxed);
    }

    async fn request_metrics(&self) -> HashMap<Uuid, RequestMetrics> {
        self.metrics.snapshot().await
    }

    fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    fn memory_usage(&self) -> u64 {
        self.memory.load(Ordering::Relaxed)
    }
}
