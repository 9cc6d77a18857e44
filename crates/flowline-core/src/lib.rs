//! flowline-core — shared vocabulary for the orchestration workspace.
//!
//! Defines the balancing and scaling policy enums, the capability tags
//! providers advertise, the opaque request/response envelopes, the
//! injectable id generator, and the per-request metrics registry owned
//! by each flow instance.

pub mod metrics;
pub mod request;
pub mod telemetry;
pub mod types;

pub use metrics::{MetricsRegistry, RequestMetrics};
pub use request::{IdGenerator, Request, Response, SequentialIdGenerator, UuidGenerator};
pub use telemetry::{FlowTelemetry, PipelineTelemetry, StreamTelemetry};
pub use types::{BalancingPolicy, Capability, ScalingPolicy};
