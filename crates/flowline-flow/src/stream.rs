//! Stream slots — the balancer's dispatch targets.
//!
//! A slot wraps either a terminal provider or a nested flow behind a
//! uniform load/capacity/health surface, so the balancing logic treats
//! both the same way. Slot bookkeeping (load counter, cached health)
//! lives here; the wrapped target is exclusively owned by its slot.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use flowline_core::{Capability, Request, Response, StreamTelemetry};
use flowline_provider::{PipelineProvider, ProviderResult};

use crate::error::{FlowError, FlowResult};
use crate::flow::PipelineFlow;

/// The wrapped dispatch target.
pub enum StreamKind<R, S>
where
    R: Send + 'static,
    S: Send + 'static,
{
    /// A terminal backend provider.
    Provider(Arc<dyn PipelineProvider<R, S>>),
    /// A nested flow (recursive composition).
    Flow(Arc<PipelineFlow<R, S>>),
}

/// One named, typed execution unit in a flow's stream set.
pub struct StreamSlot<R, S>
where
    R: Send + 'static,
    S: Send + 'static,
{
    name: String,
    kind: StreamKind<R, S>,
    capacity: usize,
    load: AtomicUsize,
    healthy: AtomicBool,
}

impl<R, S> StreamSlot<R, S>
where
    R: Send + 'static,
    S: Send + 'static,
{
    /// Wrap a terminal provider. Default capacity is one concurrent
    /// request; raise it with [`with_capacity`](Self::with_capacity).
    pub fn provider(name: &str, provider: Arc<dyn PipelineProvider<R, S>>) -> Self {
        Self {
            name: name.to_string(),
            kind: StreamKind::Provider(provider),
            capacity: 1,
            load: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    /// Wrap a nested flow. Capacity follows the child's `max_requests`.
    pub fn nested(flow: Arc<PipelineFlow<R, S>>) -> Self {
        let capacity = flow.max_requests();
        Self {
            name: flow.name().to_string(),
            kind: StreamKind::Flow(flow),
            capacity,
            load: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StreamKind<R, S> {
        &self.kind
    }

    /// Currently dispatched requests on this slot.
    pub fn load(&self) -> usize {
        self.load.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Last cached health probe result.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    /// Whether this slot can serve a request with the given tag.
    pub fn supports(&self, capability: Option<Capability>) -> bool {
        match capability {
            None => true,
            Some(cap) => self.capabilities().contains(&cap),
        }
    }

    pub fn capabilities(&self) -> BTreeSet<Capability> {
        match &self.kind {
            StreamKind::Provider(provider) => provider.capabilities().clone(),
            StreamKind::Flow(flow) => flow.capabilities(),
        }
    }

    /// Connection count for the `connections` scaling signal.
    pub fn connection_count(&self) -> usize {
        match &self.kind {
            StreamKind::Provider(provider) => provider.connection_count(),
            StreamKind::Flow(flow) => flow.connection_count(),
        }
    }

    /// Memory usage for the `memory` scaling signal.
    pub fn memory_usage(&self) -> u64 {
        match &self.kind {
            StreamKind::Provider(provider) => provider.memory_usage(),
            StreamKind::Flow(flow) => flow.memory_usage(),
        }
    }

    /// Probe the target and cache the result.
    pub async fn refresh_health(&self) -> bool {
        let healthy = match &self.kind {
            StreamKind::Provider(provider) => provider.health_check().await,
            StreamKind::Flow(flow) => flow.refresh_health().await,
        };
        self.set_healthy(healthy);
        healthy
    }

    /// Initialize the target's resources.
    pub async fn initialize(&self) -> ProviderResult<()> {
        match &self.kind {
            StreamKind::Provider(provider) => provider.initialize().await,
            StreamKind::Flow(flow) => flow.initialize_streams().await,
        }
    }

    /// Release the target's resources.
    pub async fn cleanup(&self) {
        match &self.kind {
            StreamKind::Provider(provider) => provider.cleanup().await,
            StreamKind::Flow(flow) => flow.cleanup_streams().await,
        }
    }

    pub(crate) fn begin_dispatch(&self) {
        self.load.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn end_dispatch(&self) {
        self.load.fetch_sub(1, Ordering::Relaxed);
    }

    /// Send one request into the target and await its result.
    pub(crate) async fn dispatch(&self, request: Request<R>) -> FlowResult<Response<S>> {
        match &self.kind {
            StreamKind::Provider(provider) => {
                provider.process_request(request).await.map_err(FlowError::from)
            }
            StreamKind::Flow(flow) => flow.submit_envelope(request).await,
        }
    }

    pub fn telemetry(&self) -> StreamTelemetry {
        StreamTelemetry {
            name: self.name.clone(),
            kind: match &self.kind {
                StreamKind::Provider(_) => "provider",
                StreamKind::Flow(_) => "flow",
            },
            load: self.load(),
            capacity: self.capacity,
            healthy: self.is_healthy(),
        }
    }
}
