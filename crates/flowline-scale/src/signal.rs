//! Scaling signals — normalized pressure and hysteresis thresholds.
//!
//! Every scaling policy is reduced to a single dimensionless pressure
//! ratio where 1.0 means "running exactly at target". The thresholds
//! leave a dead band between them so the instance count does not flap
//! around the target:
//!
//!   pressure > 1.1  → scale up
//!   pressure < 0.5  → scale down
//!
//! Pressure of exactly 0.0 with nothing in flight is the scale-to-zero
//! signal; whether it is honored is the supervisor's call.

use flowline_core::ScalingPolicy;

use crate::config::PipelineConfig;

const SCALE_UP_THRESHOLD: f64 = 1.1;
const SCALE_DOWN_THRESHOLD: f64 = 0.5;

/// Outcome of one evaluation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    Up,
    Down,
    /// Retire every instance: zero pressure with scale-to-zero armed.
    ToZero,
    NoChange,
}

/// Load figures gathered from the live instance set in a single pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalInputs {
    pub instances: usize,
    /// Requests currently dispatched to streams, across all instances.
    pub in_flight: usize,
    /// Requests admitted but not yet dispatched.
    pub queued: usize,
    /// Open backend connections reported by providers.
    pub connections: usize,
    /// Resident memory reported by providers, in bytes.
    pub memory_bytes: u64,
    /// Mean total processing time over recently completed requests,
    /// if any have completed.
    pub avg_latency_secs: Option<f64>,
    /// `max_requests` of one instance.
    pub capacity_per_instance: usize,
}

impl SignalInputs {
    fn target_slots(&self, config: &PipelineConfig) -> f64 {
        let slots = (self.instances.max(1) * self.capacity_per_instance.max(1)) as f64;
        slots * config.scale_target.clamp(0.05, 1.0)
    }

    fn idle(&self) -> bool {
        self.in_flight == 0 && self.queued == 0
    }
}

/// Normalized pressure for `policy`, or `None` when the policy never
/// scales or the signal has no data yet.
pub fn pressure(
    policy: ScalingPolicy,
    config: &PipelineConfig,
    inputs: &SignalInputs,
) -> Option<f64> {
    match policy {
        ScalingPolicy::None => None,
        ScalingPolicy::Concurrent => {
            Some(inputs.in_flight as f64 / inputs.target_slots(config))
        }
        ScalingPolicy::Connections => {
            Some(inputs.connections as f64 / inputs.target_slots(config))
        }
        ScalingPolicy::Processing => {
            Some(inputs.queued as f64 / inputs.target_slots(config))
        }
        ScalingPolicy::Latency => {
            // No completions yet means no latency signal; holding steady
            // beats scaling down a pipeline that has not warmed up.
            let avg = inputs.avg_latency_secs?;
            Some(avg / config.target_latency().as_secs_f64())
        }
        ScalingPolicy::Memory => {
            Some(inputs.memory_bytes as f64 / config.target_memory_bytes.max(1) as f64)
        }
    }
}

/// Map current pressure to a scaling decision.
pub fn evaluate(
    policy: ScalingPolicy,
    config: &PipelineConfig,
    inputs: &SignalInputs,
) -> ScaleDecision {
    let Some(ratio) = pressure(policy, config, inputs) else {
        return ScaleDecision::NoChange;
    };

    if ratio > SCALE_UP_THRESHOLD {
        return ScaleDecision::Up;
    }

    if ratio == 0.0 && inputs.idle() {
        if config.scale_to_zero_effective() {
            return ScaleDecision::ToZero;
        }
        return ScaleDecision::Down;
    }

    if ratio < SCALE_DOWN_THRESHOLD {
        return ScaleDecision::Down;
    }

    ScaleDecision::NoChange
}
