//! The flow controller: bounded admission, balanced dispatch.
//!
//! Request lifecycle: admitted (metrics entry created, pushed onto the
//! bounded queue, blocking the caller when full) → queued → dispatched
//! (permit acquired, stream selected by policy) → completed or failed
//! (metrics closed exactly once, result delivered to the awaiting
//! caller). Requests are popped in arrival order; completion order may
//! differ.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify, Semaphore, mpsc, oneshot, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use flowline_core::{
    BalancingPolicy, Capability, FlowTelemetry, IdGenerator, MetricsRegistry, Request,
    RequestMetrics, Response, UuidGenerator,
};
use flowline_provider::ProviderResult;

use crate::balancer::{Balancer, SlotView};
use crate::error::{FlowError, FlowResult};
use crate::stream::{StreamKind, StreamSlot};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Construction-time flow settings.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Flow name; generated from the id source when absent.
    pub name: Option<String>,
    /// Queue bound and dispatch permit count. Clamped to ≥ 1.
    pub max_requests: usize,
    pub policy: BalancingPolicy,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_requests: 64,
            policy: BalancingPolicy::Fifo,
        }
    }
}

impl FlowConfig {
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn with_policy(mut self, policy: BalancingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// One request at a time, strict arrival order.
    pub fn sequential() -> Self {
        Self::default().with_max_requests(1)
    }

    /// Alias of [`sequential`](Self::sequential) for batch-style use.
    pub fn batch() -> Self {
        Self::sequential()
    }

    /// Up to `n` concurrent requests, first-stream dispatch.
    pub fn concurrent(n: usize) -> Self {
        Self::default().with_max_requests(n)
    }

    /// Least-loaded stream selection.
    pub fn load_balanced() -> Self {
        Self::default().with_policy(BalancingPolicy::LeastLoaded)
    }

    /// Up to `n` concurrent requests, rank-ordered streams.
    pub fn parallel(n: usize) -> Self {
        Self::default()
            .with_max_requests(n)
            .with_policy(BalancingPolicy::Priority)
    }

    /// Rank-ordered streams at the default concurrency.
    pub fn priority() -> Self {
        Self::default().with_policy(BalancingPolicy::Priority)
    }
}

struct WorkItem<R, S> {
    request: Request<R>,
    reply: oneshot::Sender<FlowResult<Response<S>>>,
}

/// Handle to one admitted request.
pub struct RequestHandle<S> {
    id: Uuid,
    rx: oneshot::Receiver<FlowResult<Response<S>>>,
}

impl<S> RequestHandle<S> {
    /// Id assigned to the request at admission.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Await the terminal result. Dropping the handle instead abandons
    /// the request: undispatched work is closed out without touching a
    /// provider, and an in-flight provider call is dropped best-effort.
    pub async fn await_result(self) -> FlowResult<Response<S>> {
        self.rx.await.unwrap_or(Err(FlowError::Canceled))
    }
}

/// One queue+balancer instance.
///
/// The stream set is fixed at construction; whole flow instances are
/// added or removed by the supervisor instead.
pub struct PipelineFlow<R, S>
where
    R: Send + 'static,
    S: Send + 'static,
{
    name: String,
    max_requests: usize,
    streams: Vec<StreamSlot<R, S>>,
    balancer: Balancer,
    ids: Arc<dyn IdGenerator>,
    metrics: Arc<MetricsRegistry>,

    queue_tx: mpsc::Sender<WorkItem<R, S>>,
    queue_rx: Mutex<Option<mpsc::Receiver<WorkItem<R, S>>>>,
    semaphore: Arc<Semaphore>,
    slot_released: Notify,

    queued: AtomicUsize,
    in_flight: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    started: AtomicBool,
    draining: AtomicBool,
}

impl<R, S> PipelineFlow<R, S>
where
    R: Send + 'static,
    S: Send + 'static,
{
    pub fn new(config: FlowConfig, streams: Vec<StreamSlot<R, S>>) -> Arc<Self> {
        Self::with_id_generator(config, streams, Arc::new(UuidGenerator))
    }

    /// Construct with an injected id source (deterministic tests).
    pub fn with_id_generator(
        config: FlowConfig,
        streams: Vec<StreamSlot<R, S>>,
        ids: Arc<dyn IdGenerator>,
    ) -> Arc<Self> {
        let max_requests = config.max_requests.max(1);
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("flow-{}", ids.next_id()));
        let (queue_tx, queue_rx) = mpsc::channel(max_requests);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Arc::new(Self {
            name,
            max_requests,
            streams,
            balancer: Balancer::new(config.policy),
            ids,
            metrics: MetricsRegistry::new(),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            semaphore: Arc::new(Semaphore::new(max_requests)),
            slot_released: Notify::new(),
            queued: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            shutdown_tx,
            shutdown_rx,
            started: AtomicBool::new(false),
            draining: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn policy(&self) -> BalancingPolicy {
        self.balancer.policy()
    }

    pub fn streams(&self) -> &[StreamSlot<R, S>] {
        &self.streams
    }

    /// Requests admitted but not yet dispatched.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Requests dispatched and awaiting a terminal state.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Union of stream capabilities.
    pub fn capabilities(&self) -> BTreeSet<Capability> {
        self.streams
            .iter()
            .flat_map(|slot| slot.capabilities())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.streams.iter().map(|slot| slot.connection_count()).sum()
    }

    pub fn memory_usage(&self) -> u64 {
        self.streams.iter().map(|slot| slot.memory_usage()).sum()
    }

    /// Whether the supervisor is draining this instance (no new
    /// admissions routed to it).
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    pub fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::Relaxed);
    }

    /// Spawn the processing loop (and the loops of nested flows).
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        for slot in &self.streams {
            if let StreamKind::Flow(child) = slot.kind() {
                child.start();
            }
        }
        let flow = Arc::clone(self);
        tokio::spawn(flow.process_requests());
    }

    /// Signal the processing loop (and nested flows) to drain and halt.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        for slot in &self.streams {
            if let StreamKind::Flow(child) = slot.kind() {
                child.stop();
            }
        }
    }

    /// Wait until no work is queued or in flight.
    pub async fn drain(&self, grace: Duration) -> FlowResult<()> {
        let idle = async {
            while self.queued() > 0 || self.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(grace, idle)
            .await
            .map_err(|_| FlowError::DrainTimeout(grace))
    }

    /// Initialize every stream's resources, in declaration order.
    pub fn initialize_streams(&self) -> BoxFuture<'_, ProviderResult<()>> {
        Box::pin(async move {
            for slot in &self.streams {
                slot.initialize().await?;
            }
            Ok(())
        })
    }

    /// Release every stream's resources.
    pub fn cleanup_streams(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            for slot in &self.streams {
                slot.cleanup().await;
            }
        })
    }

    /// Probe every stream; the flow is healthy while any stream is.
    pub fn refresh_health(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let mut any_healthy = false;
            for slot in &self.streams {
                any_healthy |= slot.refresh_health().await;
            }
            any_healthy
        })
    }

    /// Admit a payload; blocks when the queue is full (backpressure).
    pub async fn add_request(&self, payload: R) -> RequestHandle<S> {
        let request = Request::with_id(self.ids.next_id(), payload);
        self.add_envelope(request).await
    }

    /// Admit a pre-built envelope (carrying an id or capability tag).
    pub async fn add_envelope(&self, request: Request<R>) -> RequestHandle<S> {
        let id = request.id;
        self.metrics.admit(id).await;
        self.queued.fetch_add(1, Ordering::Relaxed);

        let (reply_tx, reply_rx) = oneshot::channel();
        let item = WorkItem {
            request,
            reply: reply_tx,
        };

        if let Err(send_error) = self.queue_tx.send(item).await {
            // Queue closed: still close the metrics entry so the
            // request is observable as failed, never lost.
            self.queued.fetch_sub(1, Ordering::Relaxed);
            self.metrics.close(id, Duration::ZERO).await;
            self.failed.fetch_add(1, Ordering::Relaxed);
            warn!(flow = %self.name, %id, "admission rejected, flow is closed");
            let _ = send_error.0.reply.send(Err(FlowError::Closed));
        }

        RequestHandle { id, rx: reply_rx }
    }

    /// Admit and await the terminal result.
    pub async fn submit(&self, payload: R) -> FlowResult<Response<S>> {
        self.add_request(payload).await.await_result().await
    }

    /// Envelope variant of [`submit`](Self::submit); used for nested
    /// dispatch so the id is preserved end to end.
    pub async fn submit_envelope(&self, request: Request<R>) -> FlowResult<Response<S>> {
        self.add_envelope(request).await.await_result().await
    }

    /// Metrics lookup; `None` if the id was never admitted here.
    pub async fn request_metrics(&self, id: Uuid) -> Option<RequestMetrics> {
        self.metrics.get(id).await
    }

    /// Average total processing time (seconds) over recently closed
    /// requests.
    pub async fn average_total_time(&self) -> Option<f64> {
        self.metrics.average_total_time().await
    }

    pub fn telemetry(&self) -> FlowTelemetry {
        FlowTelemetry {
            name: self.name.clone(),
            in_flight: self.in_flight(),
            queued: self.queued(),
            completed: self.completed(),
            failed: self.failed(),
            streams: self.streams.iter().map(|slot| slot.telemetry()).collect(),
        }
    }

    /// The processing loop: pops requests in arrival order and
    /// dispatches each to the stream the policy selects. Runs until
    /// stopped, then drains what was already admitted.
    pub async fn process_requests(self: Arc<Self>) {
        let Some(mut rx) = self.queue_rx.lock().await.take() else {
            warn!(flow = %self.name, "processing loop already running");
            return;
        };
        let mut shutdown = self.shutdown_rx.clone();
        debug!(
            flow = %self.name,
            policy = self.balancer.policy().as_str(),
            max_requests = self.max_requests,
            "processing loop started"
        );

        loop {
            tokio::select! {
                maybe_item = rx.recv() => match maybe_item {
                    Some(item) => self.dispatch(item).await,
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }

        // Close admission before draining. A send racing the close
        // either lands in the buffer and is drained below, or fails and
        // is cleaned up on the admission path; nothing is discarded
        // with open metrics.
        rx.close();
        while let Some(item) = rx.recv().await {
            self.dispatch(item).await;
        }
        debug!(flow = %self.name, "processing loop stopped");
    }

    async fn dispatch(self: &Arc<Self>, item: WorkItem<R, S>) {
        let WorkItem { request, mut reply } = item;
        let id = request.id;

        // in_flight rises before queued falls so drain never observes
        // a false idle window.
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.queued.fetch_sub(1, Ordering::Relaxed);

        // Caller abandoned the request: close it out without touching
        // any provider.
        if reply.is_closed() {
            self.metrics.close(id, Duration::ZERO).await;
            self.failed.fetch_add(1, Ordering::Relaxed);
            self.in_flight.fetch_sub(1, Ordering::Relaxed);
            debug!(flow = %self.name, %id, "request canceled before dispatch");
            return;
        }

        // A capability nothing here serves would wait forever below;
        // fail it now instead.
        if let Some(capability) = request.capability
            && !self.streams.iter().any(|s| s.supports(Some(capability)))
        {
            self.metrics.close(id, Duration::ZERO).await;
            self.failed.fetch_add(1, Ordering::Relaxed);
            self.in_flight.fetch_sub(1, Ordering::Relaxed);
            let _ = reply.send(Err(FlowError::NoCompatibleStream(capability)));
            return;
        }

        let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.metrics.close(id, Duration::ZERO).await;
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.in_flight.fetch_sub(1, Ordering::Relaxed);
                let _ = reply.send(Err(FlowError::Closed));
                return;
            }
        };

        // Select a stream; when every compatible slot is saturated the
        // request stays here (queued, never dropped) until a release.
        let idx = loop {
            let views: Vec<SlotView> = self
                .streams
                .iter()
                .map(|slot| SlotView {
                    eligible: slot.is_healthy()
                        && slot.load() < slot.capacity()
                        && slot.supports(request.capability),
                    load: slot.load(),
                })
                .collect();
            if let Some(idx) = self.balancer.select(&views) {
                break idx;
            }
            tokio::select! {
                _ = self.slot_released.notified() => {}
                // Periodic re-check: health flags can flip without a
                // slot release.
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        };

        self.streams[idx].begin_dispatch();
        self.metrics.mark_dispatched(id).await;

        let flow = Arc::clone(self);
        tokio::spawn(async move {
            let started = Instant::now();
            let dispatch = flow.streams[idx].dispatch(request);
            tokio::pin!(dispatch);
            // Abandonment mid-flight drops the provider call instead of
            // letting it run to completion for nobody.
            let result = tokio::select! {
                result = &mut dispatch => result,
                _ = reply.closed() => Err(FlowError::Canceled),
            };
            let provider_time = started.elapsed();

            flow.metrics.close(id, provider_time).await;
            match &result {
                Ok(_) => {
                    flow.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(FlowError::Canceled) => {
                    flow.failed.fetch_add(1, Ordering::Relaxed);
                    debug!(flow = %flow.name, %id, "request abandoned mid-flight");
                }
                Err(error) => {
                    flow.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(flow = %flow.name, %id, error = %error, "request failed");
                }
            }

            // The receiver may be gone; the metrics entry is closed
            // either way.
            let _ = reply.send(result);

            flow.streams[idx].end_dispatch();
            flow.in_flight.fetch_sub(1, Ordering::Relaxed);
            drop(permit);
            flow.slot_released.notify_one();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::SequentialIdGenerator;
    use flowline_provider::testing::MockProvider;
    use flowline_provider::{PipelineProvider, ProviderError};

    type TestFlow = Arc<PipelineFlow<String, String>>;

    fn single_provider_flow(provider: Arc<MockProvider>, config: FlowConfig) -> TestFlow {
        let slot = StreamSlot::provider("p0", provider as Arc<dyn PipelineProvider<_, _>>)
            .with_capacity(64);
        PipelineFlow::new(config, vec![slot])
    }

    #[tokio::test]
    async fn submit_round_trips_through_the_provider() {
        let provider = Arc::new(MockProvider::new());
        let flow = single_provider_flow(provider.clone(), FlowConfig::default());
        flow.start();

        let response = flow.submit("hello".to_string()).await.unwrap();
        assert_eq!(response.payload, "hello");
        assert_eq!(provider.processed(), 1);
        assert_eq!(flow.completed(), 1);
    }

    #[tokio::test]
    async fn injected_id_generator_is_used() {
        let provider = Arc::new(MockProvider::new());
        let slot = StreamSlot::provider("p0", provider as Arc<dyn PipelineProvider<_, _>>);
        let flow = PipelineFlow::with_id_generator(
            FlowConfig::default(),
            vec![slot],
            Arc::new(SequentialIdGenerator::default()),
        );
        flow.start();

        // Id 1 named the flow; the first request takes id 2.
        let handle = flow.add_request("x".to_string()).await;
        assert_eq!(handle.id(), Uuid::from_u128(2));
        handle.await_result().await.unwrap();
    }

    #[tokio::test]
    async fn provider_failure_reaches_the_awaiting_caller() {
        let provider = Arc::new(MockProvider::new().always_failing());
        let flow = single_provider_flow(provider, FlowConfig::default());
        flow.start();

        let handle = flow.add_request("x".to_string()).await;
        let id = handle.id();
        let result = handle.await_result().await;

        assert!(matches!(
            result,
            Err(FlowError::Provider(ProviderError::RetriesExhausted { .. }))
        ));
        // Failed requests stay observable with closed metrics.
        let metrics = flow.request_metrics(id).await.unwrap();
        assert!(metrics.is_closed());
        assert_eq!(flow.failed(), 1);
    }

    #[tokio::test]
    async fn metrics_closure_ordering_holds() {
        let provider = Arc::new(MockProvider::new().with_latency(Duration::from_millis(10)));
        let flow = single_provider_flow(provider, FlowConfig::default());
        flow.start();

        let handle = flow.add_request("x".to_string()).await;
        let id = handle.id();
        handle.await_result().await.unwrap();

        let metrics = flow.request_metrics(id).await.unwrap();
        let provider_time = metrics.provider_processing_time.unwrap();
        let total = metrics.total_processing_time.unwrap();
        assert!(provider_time >= 0.0);
        assert!(total >= provider_time);
        assert!(metrics.queue_time.is_some());
    }

    #[tokio::test]
    async fn unknown_request_id_has_no_metrics() {
        let provider = Arc::new(MockProvider::new());
        let flow = single_provider_flow(provider, FlowConfig::default());
        assert!(flow.request_metrics(Uuid::from_u128(999)).await.is_none());
    }

    #[tokio::test]
    async fn capacity_invariant_under_load() {
        let provider = Arc::new(
            MockProvider::new().with_latency(Duration::from_millis(20)),
        );
        let flow = single_provider_flow(
            provider.clone(),
            FlowConfig::default().with_max_requests(2),
        );
        flow.start();

        let mut handles = Vec::new();
        for i in 0..6 {
            handles.push(flow.add_request(format!("r{i}")).await);
        }
        for handle in handles {
            handle.await_result().await.unwrap();
        }

        assert_eq!(provider.peak_concurrency(), 2);
        assert_eq!(flow.completed(), 6);
    }

    #[tokio::test]
    async fn least_loaded_prefers_the_idle_stream() {
        let a = Arc::new(MockProvider::new());
        let b = Arc::new(MockProvider::new());
        let slot_a = StreamSlot::provider("a", a.clone() as Arc<dyn PipelineProvider<_, _>>)
            .with_capacity(2);
        let slot_b = StreamSlot::provider("b", b.clone() as Arc<dyn PipelineProvider<_, _>>)
            .with_capacity(2);

        let flow = PipelineFlow::new(
            FlowConfig::load_balanced().with_max_requests(2),
            vec![slot_a, slot_b],
        );
        // B carries one in-flight request; A is idle.
        flow.streams()[1].begin_dispatch();
        flow.start();

        flow.submit("x".to_string()).await.unwrap();
        assert_eq!(a.processed(), 1);
        assert_eq!(b.processed(), 0);
        flow.streams()[1].end_dispatch();
    }

    #[tokio::test]
    async fn priority_falls_through_when_the_top_rank_is_saturated() {
        let a = Arc::new(MockProvider::new());
        let b = Arc::new(MockProvider::new());
        let slot_a = StreamSlot::provider("a", a.clone() as Arc<dyn PipelineProvider<_, _>>);
        let slot_b = StreamSlot::provider("b", b.clone() as Arc<dyn PipelineProvider<_, _>>);

        let flow = PipelineFlow::new(
            FlowConfig::priority().with_max_requests(4),
            vec![slot_a, slot_b],
        );
        // Saturate A (capacity 1).
        flow.streams()[0].begin_dispatch();
        flow.start();

        flow.submit("x".to_string()).await.unwrap();
        assert_eq!(a.processed(), 0);
        assert_eq!(b.processed(), 1);
        flow.streams()[0].end_dispatch();
    }

    #[tokio::test]
    async fn capability_routes_to_the_compatible_stream() {
        let recognizer = Arc::new(
            MockProvider::new().with_capability(Capability::SpeechRecognition),
        );
        let synthesizer = Arc::new(
            MockProvider::new().with_capability(Capability::SpeechSynthesis),
        );
        let flow = PipelineFlow::new(
            FlowConfig::default(),
            vec![
                StreamSlot::provider(
                    "asr",
                    recognizer.clone() as Arc<dyn PipelineProvider<_, _>>,
                ),
                StreamSlot::provider(
                    "tts",
                    synthesizer.clone() as Arc<dyn PipelineProvider<_, _>>,
                ),
            ],
        );
        flow.start();

        let request =
            Request::new("speak".to_string()).with_capability(Capability::SpeechSynthesis);
        flow.submit_envelope(request).await.unwrap();

        assert_eq!(recognizer.processed(), 0);
        assert_eq!(synthesizer.processed(), 1);
    }

    #[tokio::test]
    async fn unsupported_capability_fails_instead_of_hanging() {
        let provider = Arc::new(
            MockProvider::new().with_capability(Capability::SpeechSynthesis),
        );
        let flow = single_provider_flow(provider, FlowConfig::default());
        flow.start();

        let request =
            Request::new("img".to_string()).with_capability(Capability::ImageSynthesis);
        let result = flow.submit_envelope(request).await;
        assert!(matches!(
            result,
            Err(FlowError::NoCompatibleStream(Capability::ImageSynthesis))
        ));
    }

    #[tokio::test]
    async fn backpressure_blocks_admission_when_full() {
        // max_requests = 1 and a slow provider: the queue fills and
        // further admission must block rather than drop.
        let provider = Arc::new(
            MockProvider::new().with_latency(Duration::from_millis(200)),
        );
        let flow = single_provider_flow(provider, FlowConfig::sequential());
        flow.start();

        // First is dispatched, second is held by the loop waiting on a
        // permit, third fills the queue slot.
        let first = flow.add_request("a".to_string()).await;
        let second = flow.add_request("b".to_string()).await;
        let third = flow.add_request("c".to_string()).await;

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            flow.add_request("d".to_string()),
        )
        .await;
        assert!(blocked.is_err(), "admission should block while saturated");

        first.await_result().await.unwrap();
        second.await_result().await.unwrap();
        third.await_result().await.unwrap();
    }

    #[tokio::test]
    async fn no_loss_through_stop_and_drain() {
        let provider = Arc::new(
            MockProvider::new().with_latency(Duration::from_millis(5)),
        );
        let flow = single_provider_flow(
            provider.clone(),
            FlowConfig::default().with_max_requests(4),
        );
        flow.start();

        let mut handles = Vec::new();
        for i in 0..8 {
            handles.push(flow.add_request(format!("r{i}")).await);
        }
        flow.stop();
        flow.drain(Duration::from_secs(5)).await.unwrap();

        // Every admitted request reached exactly one terminal state.
        assert_eq!(flow.completed() + flow.failed(), 8);
        for handle in handles {
            handle.await_result().await.unwrap();
        }
    }

    #[tokio::test]
    async fn admissions_racing_stop_are_never_lost() {
        let provider = Arc::new(MockProvider::new());
        let flow = single_provider_flow(
            provider.clone(),
            FlowConfig::default().with_max_requests(4),
        );
        flow.start();

        // Admit concurrently while stopping so some sends land around
        // the shutdown signal.
        let mut joins = Vec::new();
        for i in 0..16 {
            let flow = Arc::clone(&flow);
            joins.push(tokio::spawn(async move {
                flow.add_request(format!("r{i}")).await
            }));
        }
        tokio::task::yield_now().await;
        flow.stop();

        let mut handles = Vec::new();
        for join in joins {
            handles.push(join.await.unwrap());
        }
        flow.drain(Duration::from_secs(5)).await.unwrap();

        // Every admitted request reached a terminal state with closed
        // metrics, whether it was served or rejected at the close.
        for handle in handles {
            let id = handle.id();
            match handle.await_result().await {
                Ok(_) | Err(FlowError::Closed) => {}
                Err(other) => panic!("unexpected terminal state: {other}"),
            }
            assert!(flow.request_metrics(id).await.unwrap().is_closed());
        }
        assert_eq!(flow.queued(), 0);
        assert_eq!(flow.completed() + flow.failed(), 16);
    }

    #[tokio::test]
    async fn dropping_the_handle_aborts_the_in_flight_call() {
        let provider = Arc::new(MockProvider::new().with_latency(Duration::from_secs(5)));
        let flow = single_provider_flow(provider.clone(), FlowConfig::default());
        flow.start();

        let handle = flow.add_request("x".to_string()).await;
        let id = handle.id();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(flow.in_flight(), 1);
        drop(handle);

        // Far shorter than the provider latency: the drain only
        // succeeds because the abandoned call was dropped.
        flow.drain(Duration::from_millis(500)).await.unwrap();
        assert_eq!(flow.failed(), 1);
        assert_eq!(provider.processed(), 0);
        assert!(flow.request_metrics(id).await.unwrap().is_closed());
    }

    #[tokio::test]
    async fn nested_flow_dispatch_preserves_the_request_id() {
        let provider = Arc::new(MockProvider::new());
        let child = single_provider_flow(provider, FlowConfig::default().with_name("child"));
        let flow: TestFlow = PipelineFlow::new(
            FlowConfig::default().with_name("parent"),
            vec![StreamSlot::nested(child.clone())],
        );
        flow.start();

        let handle = flow.add_request("deep".to_string()).await;
        let id = handle.id();
        let response = handle.await_result().await.unwrap();

        assert_eq!(response.id, id);
        // The child admitted the same id into its own registry.
        assert!(child.request_metrics(id).await.is_some());
    }

    #[tokio::test]
    async fn unhealthy_stream_is_excluded_from_balancing() {
        let sick = Arc::new(MockProvider::new());
        sick.set_healthy(false);
        let well = Arc::new(MockProvider::new());

        let flow = PipelineFlow::new(
            FlowConfig::default(),
            vec![
                StreamSlot::provider("sick", sick.clone() as Arc<dyn PipelineProvider<_, _>>),
                StreamSlot::provider("well", well.clone() as Arc<dyn PipelineProvider<_, _>>),
            ],
        );
        flow.refresh_health().await;
        flow.start();

        flow.submit("x".to_string()).await.unwrap();
        assert_eq!(sick.processed(), 0);
        assert_eq!(well.processed(), 1);
    }

    #[tokio::test]
    async fn telemetry_reflects_counters() {
        let provider = Arc::new(MockProvider::new());
        let flow = single_provider_flow(provider, FlowConfig::default().with_name("t"));
        flow.start();
        flow.submit("x".to_string()).await.unwrap();

        let telemetry = flow.telemetry();
        assert_eq!(telemetry.name, "t");
        assert_eq!(telemetry.completed, 1);
        assert_eq!(telemetry.streams.len(), 1);
    }
}
