//! Policy and capability enums.
//!
//! Both policy enums parse leniently: an unrecognized string falls back
//! to the safe default (`Fifo` for balancing, `None` for scaling)
//! instead of failing construction.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How a flow picks which stream serves the next dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancingPolicy {
    /// Always the first eligible stream in declaration order.
    #[default]
    Fifo,
    /// Uniform random choice among eligible streams.
    Random,
    /// Rotating cursor through streams in declaration order.
    RoundRobin,
    /// Fewest in-flight requests; ties broken by lowest index.
    LeastLoaded,
    /// Declaration order is priority rank; falls through a rank only
    /// when it is saturated.
    Priority,
}

impl BalancingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalancingPolicy::Fifo => "fifo",
            BalancingPolicy::Random => "random",
            BalancingPolicy::RoundRobin => "round_robin",
            BalancingPolicy::LeastLoaded => "least_loaded",
            BalancingPolicy::Priority => "priority",
        }
    }
}

impl FromStr for BalancingPolicy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "random" => BalancingPolicy::Random,
            "round_robin" => BalancingPolicy::RoundRobin,
            "least_loaded" => BalancingPolicy::LeastLoaded,
            "priority" => BalancingPolicy::Priority,
            _ => BalancingPolicy::Fifo,
        })
    }
}

/// Which signal drives instance scaling in the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingPolicy {
    /// No automatic scaling; instance count stays fixed.
    #[default]
    None,
    /// In-flight request count across instances.
    Concurrent,
    /// Provider-reported connection count.
    Connections,
    /// Recent average total processing time.
    Latency,
    /// Provider-reported memory usage.
    Memory,
    /// Queue depth across instances.
    Processing,
}

impl ScalingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalingPolicy::None => "none",
            ScalingPolicy::Concurrent => "concurrent",
            ScalingPolicy::Connections => "connections",
            ScalingPolicy::Latency => "latency",
            ScalingPolicy::Memory => "memory",
            ScalingPolicy::Processing => "processing",
        }
    }
}

impl FromStr for ScalingPolicy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "concurrent" => ScalingPolicy::Concurrent,
            "connections" => ScalingPolicy::Connections,
            "latency" => ScalingPolicy::Latency,
            "memory" => ScalingPolicy::Memory,
            "processing" => ScalingPolicy::Processing,
            _ => ScalingPolicy::None,
        })
    }
}

/// A request/result domain a provider supports.
///
/// String form is `"<domain>:<kind>"`, e.g. `"speech:synthesis"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "audio:recognition")]
    AudioRecognition,
    #[serde(rename = "data:recognition")]
    DataRecognition,
    #[serde(rename = "image:recognition")]
    ImageRecognition,
    #[serde(rename = "model:recognition")]
    ModelRecognition,
    #[serde(rename = "song:recognition")]
    SongRecognition,
    #[serde(rename = "speech:recognition")]
    SpeechRecognition,
    #[serde(rename = "text:recognition")]
    TextRecognition,
    #[serde(rename = "video:recognition")]
    VideoRecognition,
    #[serde(rename = "audio:synthesis")]
    AudioSynthesis,
    #[serde(rename = "data:synthesis")]
    DataSynthesis,
    #[serde(rename = "image:synthesis")]
    ImageSynthesis,
    #[serde(rename = "model:synthesis")]
    ModelSynthesis,
    #[serde(rename = "song:synthesis")]
    SongSynthesis,
    #[serde(rename = "speech:synthesis")]
    SpeechSynthesis,
    #[serde(rename = "text:synthesis")]
    TextSynthesis,
    #[serde(rename = "video:synthesis")]
    VideoSynthesis,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::AudioRecognition => "audio:recognition",
            Capability::DataRecognition => "data:recognition",
            Capability::ImageRecognition => "image:recognition",
            Capability::ModelRecognition => "model:recognition",
            Capability::SongRecognition => "song:recognition",
            Capability::SpeechRecognition => "speech:recognition",
            Capability::TextRecognition => "text:recognition",
            Capability::VideoRecognition => "video:recognition",
            Capability::AudioSynthesis => "audio:synthesis",
            Capability::DataSynthesis => "data:synthesis",
            Capability::ImageSynthesis => "image:synthesis",
            Capability::ModelSynthesis => "model:synthesis",
            Capability::SongSynthesis => "song:synthesis",
            Capability::SpeechSynthesis => "speech:synthesis",
            Capability::TextSynthesis => "text:synthesis",
            Capability::VideoSynthesis => "video:synthesis",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
