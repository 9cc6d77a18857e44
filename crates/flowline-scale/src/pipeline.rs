//! The autoscaling supervisor.
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!   add_request ─▶│  Pipeline                    │
//!                 │   ├─ round-robin admission   │
//!                 │   ├─ evaluation loop         │
//!                 │   │    (signals → scale)     │
//!                 │   └─ instances               │
//!                 │       ├─ PipelineFlow #1     │
//!                 │       ├─ PipelineFlow #2     │
//!                 │       └─ ...                 │
//!                 └──────────────────────────────┘
//! ```
//!
//! The supervisor owns a set of identically-configured flow instances.
//! Scaling replaces whole instances rather than mutating stream sets:
//! scale-up builds a fresh instance through the stream factory, scale-down
//! drains the least-loaded instance and retires it. Scaling actions are
//! serialized behind a lock and rate-limited by the cooldown gate; the
//! cold-start path bypasses the cooldown so a scaled-to-zero pipeline
//! answers its first request.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use flowline_core::{
    Capability, IdGenerator, PipelineTelemetry, Request, RequestMetrics, Response, ScalingPolicy,
    UuidGenerator,
};
use flowline_flow::{FlowConfig, PipelineFlow, RequestHandle, StreamSlot};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::signal::{self, ScaleDecision, SignalInputs};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Produces the stream set for one new flow instance.
///
/// Called on every scale-up; each instance gets its own streams so
/// retiring an instance releases its resources independently.
pub type StreamFactory<R, S> =
    Box<dyn Fn() -> BoxFuture<anyhow::Result<Vec<StreamSlot<R, S>>>> + Send + Sync>;

/// Autoscaling supervisor over a set of flow instances.
pub struct Pipeline<R, S>
where
    R: Send + 'static,
    S: Send + 'static,
{
    config: PipelineConfig,
    flow_config: FlowConfig,
    factory: StreamFactory<R, S>,
    base_name: String,
    ids: Arc<dyn IdGenerator>,

    instances: RwLock<Vec<Arc<PipelineFlow<R, S>>>>,
    /// Monotonic suffix for instance names.
    instance_seq: AtomicU64,
    /// Round-robin admission cursor.
    router: AtomicUsize,

    /// Serializes scale-up / scale-down so concurrent evaluations never
    /// interleave instance mutations.
    scale_gate: Mutex<()>,
    last_scale: Mutex<Option<Instant>>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    running: AtomicBool,
}

impl<R, S> Pipeline<R, S>
where
    R: Send + 'static,
    S: Send + 'static,
{
    pub fn new(
        config: PipelineConfig,
        flow_config: FlowConfig,
        factory: StreamFactory<R, S>,
    ) -> Arc<Self> {
        Self::with_id_generator(config, flow_config, factory, Arc::new(UuidGenerator))
    }

    /// Construct with an injected id source (deterministic tests).
    pub fn with_id_generator(
        config: PipelineConfig,
        flow_config: FlowConfig,
        factory: StreamFactory<R, S>,
        ids: Arc<dyn IdGenerator>,
    ) -> Arc<Self> {
        let base_name = flow_config
            .name
            .clone()
            .unwrap_or_else(|| format!("pipeline-{}", ids.next_id()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Arc::new(Self {
            config,
            flow_config,
            factory,
            base_name,
            ids,
            instances: RwLock::new(Vec::new()),
            instance_seq: AtomicU64::new(0),
            router: AtomicUsize::new(0),
            scale_gate: Mutex::new(()),
            last_scale: Mutex::new(None),
            shutdown_tx,
            shutdown_rx,
            running: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.base_name
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Launch the initial instance set and the evaluation loop.
    ///
    /// Idempotent: a second call is a no-op.
    pub async fn start(self: &Arc<Self>) -> PipelineResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for _ in 0..self.config.initial_instances() {
            self.spawn_instance().await?;
        }

        let pipeline = Arc::clone(self);
        tokio::spawn(pipeline.run_evaluation_loop());

        info!(
            pipeline = %self.base_name,
            instances = self.config.initial_instances(),
            policy = self.config.scale_policy.as_str(),
            "pipeline started"
        );
        Ok(())
    }

    /// Stop the evaluation loop, then drain and retire every instance.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let retired: Vec<_> = self.instances.write().await.drain(..).collect();
        for flow in retired {
            flow.stop();
            if let Err(e) = flow.drain(self.config.drain_grace()).await {
                warn!(
                    pipeline = %self.base_name,
                    instance = flow.name(),
                    error = %e,
                    "instance did not drain before shutdown"
                );
            }
            flow.cleanup_streams().await;
        }
        info!(pipeline = %self.base_name, "pipeline stopped");
    }

    /// Admit a payload to the least recently used routable instance.
    pub async fn add_request(&self, payload: R) -> PipelineResult<RequestHandle<S>> {
        let request = Request::with_id(self.ids.next_id(), payload);
        self.add_envelope(request).await
    }

    /// Envelope variant of [`add_request`](Self::add_request).
    ///
    /// Routes round-robin across non-draining instances. When no
    /// instance can take work (scaled to zero, or every instance is
    /// draining) a cold start builds one first.
    pub async fn add_envelope(&self, request: Request<R>) -> PipelineResult<RequestHandle<S>> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(PipelineError::NotRunning);
        }

        loop {
            let target = {
                let instances = self.instances.read().await;
                let candidates: Vec<_> = instances
                    .iter()
                    .filter(|flow| !flow.is_draining())
                    .cloned()
                    .collect();
                if candidates.is_empty() {
                    None
                } else {
                    let idx = self.router.fetch_add(1, Ordering::Relaxed) % candidates.len();
                    Some(Arc::clone(&candidates[idx]))
                }
            };

            match target {
                Some(flow) => return Ok(flow.add_envelope(request).await),
                None => {
                    self.cold_start().await?;
                }
            }
        }
    }

    /// Admit and await the terminal result.
    pub async fn submit(&self, payload: R) -> PipelineResult<Response<S>> {
        let handle = self.add_request(payload).await?;
        Ok(handle.await_result().await?)
    }

    /// Metrics lookup fanned out across live instances.
    pub async fn request_metrics(&self, id: Uuid) -> Option<RequestMetrics> {
        let instances = self.instances.read().await;
        for flow in instances.iter() {
            if let Some(metrics) = flow.request_metrics(id).await {
                return Some(metrics);
            }
        }
        None
    }

    /// Union of capabilities across live instances.
    pub async fn capabilities(&self) -> BTreeSet<Capability> {
        self.instances
            .read()
            .await
            .iter()
            .flat_map(|flow| flow.capabilities())
            .collect()
    }

    /// Aggregate snapshot. Per-flow detail is withheld when telemetry
    /// is disabled in the config; totals are always present.
    pub async fn telemetry(&self) -> PipelineTelemetry {
        let instances = self.instances.read().await;
        let flows = instances.iter().map(|flow| flow.telemetry()).collect();
        let capabilities = instances
            .iter()
            .flat_map(|flow| flow.capabilities())
            .collect();
        drop(instances);

        let mut snapshot = PipelineTelemetry::aggregate(flows, capabilities);
        if !self.config.enable_telemetry {
            snapshot.flows.clear();
        }
        snapshot
    }

    /// Build, initialize, start, and register one new instance.
    ///
    /// Initialization failure discards the instance before it ever
    /// receives traffic.
    async fn spawn_instance(&self) -> PipelineResult<Arc<PipelineFlow<R, S>>> {
        let streams = (self.factory)()
            .await
            .map_err(PipelineError::ScaleUp)?;

        let seq = self.instance_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("{}#{seq}", self.base_name);
        let flow = PipelineFlow::with_id_generator(
            self.flow_config.clone().with_name(&name),
            streams,
            Arc::clone(&self.ids),
        );

        if let Err(e) = flow.initialize_streams().await {
            flow.cleanup_streams().await;
            return Err(PipelineError::ScaleUp(e.into()));
        }

        flow.start();
        self.instances.write().await.push(Arc::clone(&flow));
        info!(pipeline = %self.base_name, instance = %name, "instance started");
        Ok(flow)
    }

    /// Add one instance, honoring the cooldown gate and the instance
    /// ceiling. Returns whether an instance was added.
    pub async fn scale_up(&self) -> PipelineResult<bool> {
        let _gate = self.scale_gate.lock().await;

        if !self.cooldown_elapsed().await {
            debug!(pipeline = %self.base_name, "scale-up skipped: cooldown");
            return Ok(false);
        }
        let count = self.instance_count().await;
        if let Some(max) = self.config.max_instances()
            && count as u32 >= max
        {
            debug!(pipeline = %self.base_name, count, max, "scale-up skipped: at ceiling");
            return Ok(false);
        }

        self.spawn_instance().await?;
        self.touch_cooldown().await;
        Ok(true)
    }

    /// Drain and retire the least-loaded instance, honoring the
    /// cooldown gate. The floor is one instance unless scale-to-zero is
    /// in effect. A drain timeout aborts the removal: the instance is
    /// marked routable again and the error is surfaced.
    pub async fn scale_down(&self) -> PipelineResult<bool> {
        let floor = usize::from(!self.config.scale_to_zero_effective());
        self.scale_down_to_floor(floor).await
    }

    async fn scale_down_to_floor(&self, floor: usize) -> PipelineResult<bool> {
        let _gate = self.scale_gate.lock().await;

        if !self.cooldown_elapsed().await {
            debug!(pipeline = %self.base_name, "scale-down skipped: cooldown");
            return Ok(false);
        }

        let victim = {
            let instances = self.instances.read().await;
            if instances.len() <= floor {
                return Ok(false);
            }
            // Least loaded, ties to the oldest instance.
            instances
                .iter()
                .min_by_key(|flow| flow.queued() + flow.in_flight())
                .cloned()
        };
        let Some(victim) = victim else {
            return Ok(false);
        };

        victim.set_draining(true);
        let grace = self.config.drain_grace();
        if let Err(e) = victim.drain(grace).await {
            victim.set_draining(false);
            warn!(
                pipeline = %self.base_name,
                instance = victim.name(),
                error = %e,
                "scale-down aborted: instance still busy"
            );
            return Err(PipelineError::DrainTimeout {
                instance: victim.name().to_string(),
                grace,
            });
        }

        victim.stop();
        victim.cleanup_streams().await;
        self.instances
            .write()
            .await
            .retain(|flow| !Arc::ptr_eq(flow, &victim));
        self.touch_cooldown().await;
        info!(
            pipeline = %self.base_name,
            instance = victim.name(),
            "instance retired"
        );
        Ok(true)
    }

    /// First instance for a pipeline that currently has none. Bypasses
    /// the cooldown gate: an admitted request must not wait out a
    /// scale-down cooldown.
    async fn cold_start(&self) -> PipelineResult<()> {
        let _gate = self.scale_gate.lock().await;
        let has_routable = self
            .instances
            .read()
            .await
            .iter()
            .any(|flow| !flow.is_draining());
        if has_routable {
            // Another caller won the race.
            return Ok(());
        }
        info!(pipeline = %self.base_name, "cold start");
        self.spawn_instance().await?;
        Ok(())
    }

    /// One evaluation tick: refresh stream health, gather signals,
    /// apply the scaling decision.
    pub async fn evaluate_once(&self) -> PipelineResult<ScaleDecision> {
        {
            let instances = self.instances.read().await;
            for flow in instances.iter() {
                flow.refresh_health().await;
            }
        }

        if self.config.scale_policy == ScalingPolicy::None {
            return Ok(ScaleDecision::NoChange);
        }

        let inputs = self.signal_inputs().await;
        let decision = signal::evaluate(self.config.scale_policy, &self.config, &inputs);
        debug!(
            pipeline = %self.base_name,
            policy = self.config.scale_policy.as_str(),
            instances = inputs.instances,
            in_flight = inputs.in_flight,
            queued = inputs.queued,
            ?decision,
            "evaluation tick"
        );

        match decision {
            ScaleDecision::Up => {
                self.scale_up().await?;
            }
            ScaleDecision::Down => {
                self.scale_down_to_floor(1).await?;
            }
            ScaleDecision::ToZero => {
                self.scale_down_to_floor(0).await?;
            }
            ScaleDecision::NoChange => {}
        }
        Ok(decision)
    }

    async fn signal_inputs(&self) -> SignalInputs {
        let instances = self.instances.read().await;
        let mut inputs = SignalInputs {
            instances: instances.len(),
            capacity_per_instance: self.flow_config.max_requests.max(1),
            ..SignalInputs::default()
        };

        let mut latencies = Vec::new();
        for flow in instances.iter() {
            inputs.in_flight += flow.in_flight();
            inputs.queued += flow.queued();
            inputs.connections += flow.connection_count();
            inputs.memory_bytes += flow.memory_usage();
            if let Some(avg) = flow.average_total_time().await {
                latencies.push(avg);
            }
        }
        if !latencies.is_empty() {
            inputs.avg_latency_secs =
                Some(latencies.iter().sum::<f64>() / latencies.len() as f64);
        }
        inputs
    }

    async fn run_evaluation_loop(self: Arc<Self>) {
        let interval = self.config.evaluation_interval();
        let mut shutdown = self.shutdown_rx.clone();
        debug!(
            pipeline = %self.base_name,
            interval_secs = interval.as_secs(),
            "evaluation loop started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.evaluate_once().await {
                        error!(
                            pipeline = %self.base_name,
                            error = %e,
                            "scaling action failed"
                        );
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!(pipeline = %self.base_name, "evaluation loop stopped");
    }

    async fn cooldown_elapsed(&self) -> bool {
        match self.config.cooldown() {
            None => true,
            Some(cooldown) => self
                .last_scale
                .lock()
                .await
                .is_none_or(|at| at.elapsed() >= cooldown),
        }
    }

    async fn touch_cooldown(&self) {
        *self.last_scale.lock().await = Some(Instant::now());
    }
}
