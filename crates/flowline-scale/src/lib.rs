//! flowline-scale — autoscaling supervision for flow instances.
//!
//! [`Pipeline`] owns a set of identically-configured [`PipelineFlow`]
//! instances and grows or shrinks that set based on a configured
//! scaling signal. Requests are admitted through the supervisor and
//! routed round-robin across routable instances.
//!
//! [`PipelineFlow`]: flowline_flow::PipelineFlow

pub mod config;
pub mod error;
pub mod pipeline;
pub mod signal;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Pipeline, StreamFactory};
pub use signal::{ScaleDecision, SignalInputs};
