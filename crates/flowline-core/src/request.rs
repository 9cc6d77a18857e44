//! Request and response envelopes.
//!
//! Payloads are opaque to the core; the envelope carries the generated
//! id, the creation timestamp, and an optional capability tag used to
//! route the request to compatible streams only.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::types::Capability;

/// An admitted request. Immutable once admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request<T> {
    /// Globally unique request id.
    pub id: Uuid,
    /// Unix timestamp (seconds) when the envelope was created.
    pub created: f64,
    /// Capability required to serve this request, if any.
    pub capability: Option<Capability>,
    /// Caller-defined payload, passed through untouched.
    pub payload: T,
}

impl<T> Request<T> {
    /// Wrap a payload with a freshly generated v4 id.
    pub fn new(payload: T) -> Self {
        Self::with_id(Uuid::new_v4(), payload)
    }

    /// Wrap a payload under an explicit id (injected generators).
    pub fn with_id(id: Uuid, payload: T) -> Self {
        Self {
            id,
            created: epoch_timestamp(),
            capability: None,
            payload,
        }
    }

    /// Tag the request with a required capability.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }
}

/// A completed result, keyed by the originating request's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response<T> {
    /// Id of the request this response answers.
    pub id: Uuid,
    /// Unix timestamp (seconds) when the response was created.
    pub created: f64,
    /// Caller-defined payload.
    pub payload: T,
}

impl<T> Response<T> {
    /// Build a response for the given request.
    pub fn for_request<R>(request: &Request<R>, payload: T) -> Self {
        Self {
            id: request.id,
            created: epoch_timestamp(),
            payload,
        }
    }
}

/// Source of request ids.
///
/// Injected into flows so tests can use a deterministic sequence
/// instead of ambient uuid generation.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Uuid;
}

/// Default generator: random v4 uuids.
#[derive(Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Deterministic generator for tests: ids 1, 2, 3, …
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    counter: AtomicU64,
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> Uuid {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Uuid::from_u128(n as u128)
    }
}

/// Current Unix time in fractional seconds.
pub fn epoch_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
