//! flowline-flow — the per-instance admission and balancing controller.
//!
//! A [`PipelineFlow`] owns one bounded request queue, a concurrency
//! limiter sized to `max_requests`, and a fixed set of stream slots
//! (terminal providers or nested flows). Requests are admitted in
//! arrival order and dispatched to the stream the configured
//! [`BalancingPolicy`](flowline_core::BalancingPolicy) selects among
//! eligible slots.
//!
//! # Architecture
//!
//! ```text
//! PipelineFlow
//!   ├── mpsc queue (bounded, blocking admission = backpressure)
//!   ├── Semaphore(max_requests)  — dispatch permits
//!   ├── Balancer                 — slot selection per policy
//!   ├── [StreamSlot]             — Provider | nested Flow, per-slot
//!   │                              load / capacity / health
//!   └── MetricsRegistry          — per-request timings, close-once
//! ```

pub mod balancer;
pub mod error;
pub mod flow;
pub mod stream;

pub use balancer::{Balancer, SlotView};
pub use error::FlowError;
pub use flow::{FlowConfig, PipelineFlow, RequestHandle};
pub use stream::{StreamKind, StreamSlot};
