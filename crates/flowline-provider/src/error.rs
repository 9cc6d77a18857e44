//! Provider error types.

use thiserror::Error;

/// Errors surfaced by a backend provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// `initialize` failed; the provider is unusable.
    #[error("provider initialization failed: {0}")]
    Initialization(String),

    /// The backend is reachable but refused or cannot serve.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// A single processing attempt failed (may be retried).
    #[error("request failed: {0}")]
    Request(String),

    /// The retry budget is spent; the request fails permanently.
    #[error("request failed after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },
}

pub type ProviderResult<T> = Result<T, ProviderError>;
