//! Observational layer of the resource coordinator.
//!
//! Records who accessed the protected resource and when, aggregates hold
//! metrics, and flags anomalies. Everything here is observational: a
//! recorded violation never changes arbitration behavior.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;

use crate::mutex::message::{NodeId, RequestId};

/// Kind of resource operation performed inside the critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OpKind {
    Withdraw,
    Deposit,
}

/// Operation details attached to a history entry.
#[derive(Debug, Clone, Serialize)]
pub struct OpRecord {
    pub kind: OpKind,
    pub amount: i64,
    /// Balance after the operation (unchanged when the operation failed).
    pub resulting_balance: i64,
    pub success: bool,
}

/// One entry in the append-only access history.
#[derive(Debug, Clone, Serialize)]
pub struct AccessEntry {
    pub node_id: NodeId,
    pub request_id: RequestId,
    /// Wall-clock entry time, milliseconds since Unix epoch.
    pub enter_ms: u64,
    /// Set when the holder releases; open entries have None.
    pub exit_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    /// Set for entries recording a resource mutation.
    pub op: Option<OpRecord>,
}

impl AccessEntry {
    /// An open entry created at grant time.
    pub fn open(node_id: NodeId, request_id: RequestId, enter_ms: u64) -> Self {
        AccessEntry {
            node_id,
            request_id,
            enter_ms,
            exit_ms: None,
            duration_ms: None,
            op: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.exit_ms.is_none() && self.op.is_none()
    }
}

/// Detected anomaly kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViolationKind {
    /// An acquire attempt collided with a different current holder. The RA
    /// layer's mutual-exclusion invariant was broken upstream.
    ConcurrentAccess,
    /// An open access outlived the stall threshold; the holder is presumed
    /// stuck or crashed.
    Timeout,
}

/// A recorded anomaly.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub node_id: NodeId,
    /// Wall-clock detection time, milliseconds since Unix epoch.
    pub at_ms: u64,
    pub detail: String,
}

/// Aggregates access counts and hold durations.
#[derive(Debug, Default)]
pub struct AccessMonitor {
    enabled: bool,
    total_accesses: u64,
    total_hold_ms: u64,
    closed_accesses: u64,
    per_node: HashMap<NodeId, u64>,
}

impl AccessMonitor {
    pub fn new(enabled: bool) -> Self {
        AccessMonitor {
            enabled,
            ..Default::default()
        }
    }

    pub fn record_access(&mut self, node_id: &NodeId) {
        if !self.enabled {
            return;
        }
        self.total_accesses += 1;
        *self.per_node.entry(node_id.clone()).or_insert(0) += 1;
    }

    pub fn record_hold(&mut self, duration_ms: u64) {
        if !self.enabled {
            return;
        }
        self.closed_accesses += 1;
        self.total_hold_ms += duration_ms;
    }

    pub fn total_accesses(&self) -> u64 {
        self.total_accesses
    }

    pub fn average_hold_ms(&self) -> f64 {
        if self.closed_accesses == 0 {
            0.0
        } else {
            self.total_hold_ms as f64 / self.closed_accesses as f64
        }
    }

    pub fn accesses_for(&self, node_id: &NodeId) -> u64 {
        self.per_node.get(node_id).copied().unwrap_or(0)
    }
}

/// Flags protocol anomalies. Stall detection runs on-access: every arbiter
/// call re-checks open entries against the threshold and flags each at most
/// once.
#[derive(Debug)]
pub struct ViolationDetector {
    enabled: bool,
    stall_threshold: Duration,
    flagged_stalls: HashSet<(NodeId, RequestId)>,
}

impl ViolationDetector {
    pub fn new(enabled: bool, stall_threshold: Duration) -> Self {
        ViolationDetector {
            enabled,
            stall_threshold,
            flagged_stalls: HashSet::new(),
        }
    }

    /// Record a concurrent-access collision.
    pub fn concurrent_access(
        &self,
        attempted_by: &NodeId,
        holder: &NodeId,
        now_ms: u64,
    ) -> Option<Violation> {
        if !self.enabled {
            return None;
        }
        Some(Violation {
            kind: ViolationKind::ConcurrentAccess,
            node_id: attempted_by.clone(),
            at_ms: now_ms,
            detail: format!("attempted access while {} holds the resource", holder),
        })
    }

    /// Flag open entries older than the stall threshold, once each.
    pub fn check_stalled<'a>(
        &mut self,
        open_entries: impl Iterator<Item = &'a AccessEntry>,
        now_ms: u64,
    ) -> Vec<Violation> {
        if !self.enabled {
            return Vec::new();
        }

        let threshold_ms = self.stall_threshold.as_millis() as u64;
        let mut found = Vec::new();
        for entry in open_entries {
            let age_ms = now_ms.saturating_sub(entry.enter_ms);
            if age_ms < threshold_ms {
                continue;
            }
            let key = (entry.node_id.clone(), entry.request_id);
            if !self.flagged_stalls.insert(key) {
                continue;
            }
            found.push(Violation {
                kind: ViolationKind::Timeout,
                node_id: entry.node_id.clone(),
                at_ms: now_ms,
                detail: format!("holder stalled for {}ms without releasing", age_ms),
            });
        }
        found
    }
}

/// Counters over arbiter traffic.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MetricsCollector {
    pub acquire_attempts: u64,
    pub grants: u64,
    pub denials: u64,
    pub releases: u64,
    pub mutations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_entry(node: &str, rid: u128, enter_ms: u64) -> AccessEntry {
        AccessEntry::open(node.to_string(), RequestId::from_raw(rid), enter_ms)
    }

    #[test]
    fn test_monitor_aggregates() {
        let mut monitor = AccessMonitor::new(true);
        monitor.record_access(&"a".to_string());
        monitor.record_access(&"a".to_string());
        monitor.record_access(&"b".to_string());
        monitor.record_hold(10);
        monitor.record_hold(30);

        assert_eq!(monitor.total_accesses(), 3);
        assert_eq!(monitor.accesses_for(&"a".to_string()), 2);
        assert!((monitor.average_hold_ms() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_monitor_disabled_records_nothing() {
        let mut monitor = AccessMonitor::new(false);
        monitor.record_access(&"a".to_string());
        assert_eq!(monitor.total_accesses(), 0);
    }

    #[test]
    fn test_stall_flagged_once() {
        let mut detector = ViolationDetector::new(true, Duration::from_millis(100));
        let entry = open_entry("a", 1, 1_000);

        let first = detector.check_stalled(std::iter::once(&entry), 2_000);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, ViolationKind::Timeout);

        let second = detector.check_stalled(std::iter::once(&entry), 3_000);
        assert!(second.is_empty(), "same stall must not be flagged twice");
    }

    #[test]
    fn test_fresh_entry_not_flagged() {
        let mut detector = ViolationDetector::new(true, Duration::from_secs(30));
        let entry = open_entry("a", 1, 1_000);
        assert!(detector
            .check_stalled(std::iter::once(&entry), 1_500)
            .is_empty());
    }

    #[test]
    fn test_detector_disabled() {
        let mut detector = ViolationDetector::new(false, Duration::from_millis(0));
        let entry = open_entry("a", 1, 0);
        assert!(detector.check_stalled(std::iter::once(&entry), 10).is_empty());
        assert!(detector
            .concurrent_access(&"b".to_string(), &"a".to_string(), 10)
            .is_none());
    }
}
