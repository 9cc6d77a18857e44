//! Flow error types.

use std::time::Duration;

use thiserror::Error;

use flowline_core::Capability;
use flowline_provider::ProviderError;

/// Errors that can occur while a request moves through a flow.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The flow's queue is closed; no further admissions.
    #[error("flow is closed")]
    Closed,

    /// No stream in this flow advertises the required capability.
    #[error("no stream supports capability {0}")]
    NoCompatibleStream(Capability),

    /// The caller abandoned the request before completion.
    #[error("request was canceled before completion")]
    Canceled,

    /// In-flight work did not finish within the grace period.
    #[error("drain did not complete within {0:?}")]
    DrainTimeout(Duration),

    /// The backend failed permanently for this request.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub type FlowResult<T> = Result<T, FlowError>;
