//! Supervisor error types.

use std::time::Duration;

use thiserror::Error;

use flowline_flow::FlowError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline is not running")]
    NotRunning,

    #[error("scale-up failed: {0}")]
    ScaleUp(#[source] anyhow::Error),

    #[error("scale-down aborted: instance {instance} did not drain within {grace:?}")]
    DrainTimeout { instance: String, grace: Duration },

    #[error(transparent)]
    Flow(#[from] FlowError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
