//! Read-only telemetry snapshot types.
//!
//! Snapshots aggregate at the supervisor level: per-stream detail nests
//! inside per-flow detail, which nests inside the pipeline aggregate.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::types::Capability;

/// Point-in-time view of one stream slot.
#[derive(Debug, Clone, Serialize)]
pub struct StreamTelemetry {
    pub name: String,
    /// "provider" or "flow".
    pub kind: &'static str,
    /// Currently dispatched requests on this slot.
    pub load: usize,
    /// Concurrency cap for this slot.
    pub capacity: usize,
    /// Last observed health probe result.
    pub healthy: bool,
}

/// Point-in-time view of one flow instance.
#[derive(Debug, Clone, Serialize)]
pub struct FlowTelemetry {
    pub name: String,
    /// Requests dispatched and awaiting a provider response.
    pub in_flight: usize,
    /// Requests admitted but not yet dispatched.
    pub queued: usize,
    pub completed: u64,
    pub failed: u64,
    pub streams: Vec<StreamTelemetry>,
}

/// Supervisor-level aggregate across all flow instances.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineTelemetry {
    pub instances: usize,
    pub total_in_flight: usize,
    pub total_queued: usize,
    pub completed: u64,
    pub failed: u64,
    /// Union of capabilities across all instances.
    pub capabilities: BTreeSet<Capability>,
    pub flows: Vec<FlowTelemetry>,
}

impl PipelineTelemetry {
    /// Build the aggregate from per-instance snapshots.
    pub fn aggregate(flows: Vec<FlowTelemetry>, capabilities: BTreeSet<Capability>) -> Self {
        Self {
            instances: flows.len(),
            total_in_flight: flows.iter().map(|f| f.in_flight).sum(),
            total_queued: flows.iter().map(|f| f.queued).sum(),
            completed: flows.iter().map(|f| f.completed).sum(),
            failed: flows.iter().map(|f| f.failed).sum(),
            capabilities,
            flows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(name: &str, in_flight: usize, queued: usize) -> FlowTelemetry {
        FlowTelemetry {
            name: name.to_string(),
            in_flight,
            queued,
            completed: 10,
            failed: 1,
            streams: vec![],
        }
    }

    #[test]
    fn aggregate_sums_across_instances() {
        let snapshot = PipelineTelemetry::aggregate(
            vec![flow("a", 2, 1), flow("b", 3, 4)],
            BTreeSet::from([Capability::SpeechSynthesis]),
        );

        assert_eq!(snapshot.instances, 2);
        assert_eq!(snapshot.total_in_flight, 5);
        assert_eq!(snapshot.total_queued, 5);
        assert_eq!(snapshot.completed, 20);
        assert_eq!(snapshot.failed, 2);
    }

    #[test]
    fn telemetry_serializes_to_json() {
        let snapshot = PipelineTelemetry::aggregate(vec![flow("a", 0, 0)], BTreeSet::new());
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"total_in_flight\":0"));
    }
}
