//! Fixed-delay retry budget.
//!
//! Shared by concrete providers through composition rather than a base
//! type. The delay is fixed, not exponential: backends in this tier are
//! either briefly saturated or down, and backoff growth only adds tail
//! latency to the former.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::ProviderDescriptor;

/// Attempt budget: `retries` total attempts with `delay` between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl From<&ProviderDescriptor> for RetryPolicy {
    fn from(descriptor: &ProviderDescriptor) -> Self {
        Self {
            retries: descriptor.retries.max(1),
            delay: descriptor.retry_delay,
        }
    }
}

/// Run `op` until it succeeds or the budget is spent.
///
/// `op` receives the 1-based attempt number. After the final failed
/// attempt the error is wrapped as [`ProviderError::RetriesExhausted`]
/// carrying the exact attempt count.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> ProviderResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let attempts = policy.retries.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                warn!(attempt, attempts, error = %error, "provider attempt failed");
                last_error = Some(error);
                if attempt < attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }

    Err(ProviderError::RetriesExhausted {
        attempts,
        reason: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    })
}
