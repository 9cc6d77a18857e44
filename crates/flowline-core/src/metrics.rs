//! Per-request metrics registry.
//!
//! Each flow instance owns exactly one registry. An entry is created
//! when the request is admitted, its queue time is set when dispatch
//! begins, and it is closed exactly once when the provider returns or
//! fails. Reads return snapshots, never live references.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::request::epoch_timestamp;

/// Timing record for one request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RequestMetrics {
    /// Unix timestamp (seconds) when the request was admitted.
    pub start_time: f64,
    /// Seconds spent queued before dispatch began.
    pub queue_time: Option<f64>,
    /// Seconds the provider spent processing (or spent before failing).
    pub provider_processing_time: Option<f64>,
    /// Total seconds from admission to completion. Set exactly once;
    /// the request is considered closed afterwards.
    pub total_processing_time: Option<f64>,
    /// Monotonic admission instant, kept for duration math.
    #[serde(skip)]
    admitted: Instant,
}

impl RequestMetrics {
    fn new() -> Self {
        Self {
            start_time: epoch_timestamp(),
            queue_time: None,
            provider_processing_time: None,
            total_processing_time: None,
            admitted: Instant::now(),
        }
    }

    /// Whether the request reached a terminal state.
    pub fn is_closed(&self) -> bool {
        self.total_processing_time.is_some()
    }
}

/// How many recent completions feed the rolling latency average.
const RECENT_WINDOW: usize = 32;

/// Request-id keyed metrics map with close-once semantics.
///
/// Besides the per-request entries, the registry keeps a rolling window
/// of the most recent total processing times so that the latency
/// average tracks current behavior instead of the lifetime mean.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    entries: RwLock<HashMap<Uuid, RequestMetrics>>,
    recent_totals: RwLock<VecDeque<f64>>,
}

impl MetricsRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create the entry for a newly admitted request.
    pub async fn admit(&self, id: Uuid) {
        let mut entries = self.entries.write().await;
        entries.entry(id).or_insert_with(RequestMetrics::new);
    }

    /// Record that dispatch began; sets `queue_time` on first call only.
    pub async fn mark_dispatched(&self, id: Uuid) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&id)
            && entry.queue_time.is_none()
        {
            entry.queue_time = Some(entry.admitted.elapsed().as_secs_f64());
        }
    }

    /// Close the entry with the observed provider time.
    ///
    /// Closed entries are never mutated again; a second close is ignored.
    pub async fn close(&self, id: Uuid, provider_time: Duration) {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(&id) else {
            debug!(%id, "close for unknown request id");
            return;
        };
        if entry.is_closed() {
            debug!(%id, "request already closed, ignoring");
            return;
        }
        let total = entry.admitted.elapsed().as_secs_f64();
        entry.provider_processing_time = Some(provider_time.as_secs_f64());
        entry.total_processing_time = Some(total);
        drop(entries);

        let mut recent = self.recent_totals.write().await;
        if recent.len() == RECENT_WINDOW {
            recent.pop_front();
        }
        recent.push_back(total);
    }

    /// Snapshot one entry.
    pub async fn get(&self, id: Uuid) -> Option<RequestMetrics> {
        self.entries.read().await.get(&id).cloned()
    }

    /// Snapshot every entry.
    pub async fn snapshot(&self) -> HashMap<Uuid, RequestMetrics> {
        self.entries.read().await.clone()
    }

    /// Average total processing time (seconds) over the most recently
    /// closed entries. Bounded to a fixed window so a resolved spike
    /// stops influencing the value.
    pub async fn average_total_time(&self) -> Option<f64> {
        let recent = self.recent_totals.read().await;
        if recent.is_empty() {
            return None;
        }
        Some(recent.iter().sum::<f64>() / recent.len() as f64)
    }

    /// Number of tracked requests (open and closed).
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_sets_fields_in_order() {
        let registry = MetricsRegistry::new();
        let id = Uuid::from_u128(1);

        registry.admit(id).await;
        let entry = registry.get(id).await.unwrap();
        assert!(entry.queue_time.is_none());
        assert!(!entry.is_closed());

        registry.mark_dispatched(id).await;
        registry.close(id, Duration::from_millis(5)).await;

        let entry = registry.get(id).await.unwrap();
        assert!(entry.is_closed());
        assert!(entry.queue_time.is_some());
        let provider = entry.provider_processing_time.unwrap();
        let total = entry.total_processing_time.unwrap();
        assert!(total >= provider);
        assert!(provider >= 0.0);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let registry = MetricsRegistry::new();
        let id = Uuid::from_u128(7);

        registry.admit(id).await;
        registry.close(id, Duration::from_millis(10)).await;
        let first = registry.get(id).await.unwrap();

        registry.close(id, Duration::from_secs(99)).await;
        let second = registry.get(id).await.unwrap();

        assert_eq!(
            first.provider_processing_time,
            second.provider_processing_time
        );
        assert_eq!(first.total_processing_time, second.total_processing_time);
    }

    #[tokio::test]
    async fn unknown_id_returns_none() {
        let registry = MetricsRegistry::new();
        assert!(registry.get(Uuid::from_u128(42)).await.is_none());
    }

    #[tokio::test]
    async fn average_covers_closed_entries_only() {
        let registry = MetricsRegistry::new();

        registry.admit(Uuid::from_u128(1)).await;
        registry.admit(Uuid::from_u128(2)).await;
        assert!(registry.average_total_time().await.is_none());

        registry.close(Uuid::from_u128(1), Duration::ZERO).await;
        assert!(registry.average_total_time().await.is_some());
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn average_tracks_recent_completions_not_the_lifetime_mean() {
        let registry = MetricsRegistry::new();

        // One slow request pushes the average up.
        let slow = Uuid::from_u128(1);
        registry.admit(slow).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.close(slow, Duration::from_millis(30)).await;
        assert!(registry.average_total_time().await.unwrap() > 0.02);

        // Enough fast completions to evict it from the window; the
        // average must come back down to current behavior.
        for n in 2..(2 + 2 * RECENT_WINDOW as u128) {
            let id = Uuid::from_u128(n);
            registry.admit(id).await;
            registry.close(id, Duration::ZERO).await;
        }
        assert!(registry.average_total_time().await.unwrap() < 0.005);
    }
}
