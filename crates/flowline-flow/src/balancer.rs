//! Stream selection for the five balancing policies.
//!
//! Selection operates on eligibility-masked views of the slot set: a
//! slot that is saturated, unhealthy, or capability-incompatible is
//! never chosen, whatever the policy. Tie-breaks are deterministic by
//! declaration index.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use flowline_core::BalancingPolicy;

/// What the balancer sees of one stream slot.
#[derive(Debug, Clone, Copy)]
pub struct SlotView {
    /// Healthy, under capacity, and capability-compatible.
    pub eligible: bool,
    /// Currently dispatched requests.
    pub load: usize,
}

/// Selects the slot index that serves the next dispatch.
///
/// The rotating cursor is only advanced on a successful round-robin
/// selection, so a fully saturated pass does not skip slots.
pub struct Balancer {
    policy: BalancingPolicy,
    cursor: AtomicUsize,
}

impl Balancer {
    pub fn new(policy: BalancingPolicy) -> Self {
        Self {
            policy,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> BalancingPolicy {
        self.policy
    }

    /// Pick an eligible slot, or `None` when every slot is ineligible.
    pub fn select(&self, slots: &[SlotView]) -> Option<usize> {
        if slots.is_empty() {
            return None;
        }

        match self.policy {
            // Declaration order doubles as priority rank: both policies
            // take the first slot that is not saturated.
            BalancingPolicy::Fifo | BalancingPolicy::Priority => {
                slots.iter().position(|s| s.eligible)
            }
            BalancingPolicy::Random => {
                let eligible: Vec<usize> = slots
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.eligible)
                    .map(|(i, _)| i)
                    .collect();
                if eligible.is_empty() {
                    return None;
                }
                let pick = rand::rng().random_range(0..eligible.len());
                Some(eligible[pick])
            }
            BalancingPolicy::RoundRobin => {
                let start = self.cursor.load(Ordering::Relaxed);
                for offset in 0..slots.len() {
                    let idx = (start + offset) % slots.len();
                    if slots[idx].eligible {
                        self.cursor.store((idx + 1) % slots.len(), Ordering::Relaxed);
                        return Some(idx);
                    }
                }
                None
            }
            BalancingPolicy::LeastLoaded => {
                let mut best: Option<usize> = None;
                for (idx, slot) in slots.iter().enumerate() {
                    if !slot.eligible {
                        continue;
                    }
                    // Strict comparison keeps the lowest index on ties.
                    if best.is_none_or(|b| slot.load < slots[b].load) {
                        best = Some(idx);
                    }
                }
                best
            }
        }
    }
}
