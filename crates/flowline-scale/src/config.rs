//! Pipeline configuration.
//!
//! All fields have working defaults, so a `PipelineConfig` can be built
//! from an empty TOML document. The raw fields keep the permissive signed
//! encodings (`-1` for "unbounded" / "disabled"); the accessor methods
//! return the normalized values the supervisor actually uses.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use flowline_core::ScalingPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Instance count started by `Pipeline::start`. Values below 1 are
    /// treated as 1.
    pub instances: i64,
    /// Upper bound on instance count. Zero or negative means unbounded.
    pub max_instances: i64,
    /// Minimum seconds between scaling actions. Zero or negative disables
    /// the cooldown gate.
    pub cooldown: i64,
    /// Signal that drives scaling decisions. Unrecognized names fall back
    /// to `none` instead of failing the parse.
    #[serde(deserialize_with = "lenient_scaling_policy")]
    pub scale_policy: ScalingPolicy,
    /// Allow the supervisor to retire the last idle instance. Only
    /// honored when both `cooldown` and `max_instances` are positive.
    pub scale_to_zero: bool,
    /// Include per-flow detail in `Pipeline::telemetry` snapshots.
    pub enable_telemetry: bool,
    /// Utilization level the concurrency-style signals aim for.
    pub scale_target: f64,
    /// Latency ceiling for the `latency` policy.
    pub target_latency_ms: u64,
    /// Memory ceiling for the `memory` policy.
    pub target_memory_bytes: u64,
    /// Seconds between evaluation loop ticks.
    pub evaluation_interval: u64,
    /// Seconds a draining instance gets to finish its in-flight work
    /// before a scale-down is aborted.
    pub drain_grace: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            instances: 1,
            max_instances: 1,
            cooldown: -1,
            scale_policy: ScalingPolicy::None,
            scale_to_zero: true,
            enable_telemetry: true,
            scale_target: 0.75,
            target_latency_ms: 30_000,
            target_memory_bytes: 512 * 1024 * 1024,
            evaluation_interval: 5,
            drain_grace: 30,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Instance count to launch at startup, clamped to `[1, max]`.
    pub fn initial_instances(&self) -> u32 {
        let initial = if self.instances > 0 {
            self.instances as u32
        } else {
            1
        };
        match self.max_instances() {
            Some(max) => initial.min(max),
            None => initial,
        }
    }

    /// Instance ceiling, or `None` when unbounded.
    pub fn max_instances(&self) -> Option<u32> {
        if self.max_instances > 0 {
            Some(self.max_instances as u32)
        } else {
            None
        }
    }

    /// Cooldown window, or `None` when disabled.
    pub fn cooldown(&self) -> Option<Duration> {
        if self.cooldown > 0 {
            Some(Duration::from_secs(self.cooldown as u64))
        } else {
            None
        }
    }

    /// Scale-to-zero only engages when the cooldown gate and an instance
    /// ceiling are both in place. Otherwise a single idle tick would
    /// flap the last instance.
    pub fn scale_to_zero_effective(&self) -> bool {
        self.scale_to_zero && self.cooldown > 0 && self.max_instances > 0
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval.max(1))
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace)
    }

    pub fn target_latency(&self) -> Duration {
        Duration::from_millis(self.target_latency_ms.max(1))
    }
}

fn lenient_scaling_policy<'de, D>(deserializer: D) -> Result<ScalingPolicy, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    // Infallible by construction: unknown names map to ScalingPolicy::None.
    Ok(ScalingPolicy::from_str(&raw).unwrap_or_default())
}
