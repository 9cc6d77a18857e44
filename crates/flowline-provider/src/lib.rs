//! flowline-provider — the backend contract.
//!
//! Any backend integrates by implementing [`PipelineProvider`]:
//! lifecycle (`initialize`, `health_check`, `cleanup`), request
//! processing, capability advertisement, and a metrics snapshot.
//! Transient failures are absorbed by a fixed-delay retry budget
//! composed in via [`retry`]; the core never inspects provider
//! internals.

pub mod error;
pub mod provider;
pub mod retry;
pub mod testing;

pub use error::{ProviderError, ProviderResult};
pub use provider::{PipelineProvider, ProviderDescriptor};
pub use retry::{RetryPolicy, with_retry};
