//! Per-node protocol state for the Ricart-Agrawala engine.
//!
//! One instance per node process, owned exclusively by that node's engine.
//! Per-request fields are reset at the start of each request and cleared
//! when the critical section is released.

use std::collections::{HashMap, HashSet, VecDeque};

use super::message::{NodeId, RaMessage, RequestId};

/// Cap on the replied-to dedup record. Oldest entries are evicted first.
/// An evicted entry only weakens the duplicate-REQUEST guard for messages
/// older than the cap; the decision rule answers those idempotently anyway.
pub const REPLIED_CACHE_MAX: usize = 1024;

/// Mutable protocol record for one node.
#[derive(Debug, Default)]
pub struct ProtocolState {
    /// True from `request_entry()` until `release_entry()` completes.
    pub requesting: bool,
    /// Identity of the in-flight request: (timestamp, request id).
    /// None when not requesting.
    pub my_request: Option<(u64, RequestId)>,
    /// Peers whose REPLY has not yet been observed for the current request.
    /// CS entry is permitted exactly when this set is empty.
    pub awaiting_reply_from: HashSet<NodeId>,
    /// Guards against invoking the enter-CS callback more than once for the
    /// same request (duplicate REPLY delivery).
    pub has_entered: bool,
    /// At most one outstanding deferred REQUEST per peer; overwritten if a
    /// peer sends a second one before the first is answered.
    pub deferred: HashMap<NodeId, RaMessage>,
    /// Dedup record of requests already answered.
    replied_to: HashSet<(NodeId, RequestId)>,
    /// FIFO over `replied_to` for bounded rotation.
    replied_order: VecDeque<(NodeId, RequestId)>,
    /// Current peer membership, including self.
    pub members: HashSet<NodeId>,
}

impl ProtocolState {
    pub fn new() -> Self {
        ProtocolState::default()
    }

    /// Initialize per-request fields for a new CS attempt.
    ///
    /// The awaiting set is fixed at request time: peers that join later do
    /// not gate this request.
    pub fn begin_request(&mut self, self_id: &NodeId, timestamp: u64, request_id: RequestId) {
        self.requesting = true;
        self.my_request = Some((timestamp, request_id));
        self.has_entered = false;
        self.awaiting_reply_from = self
            .members
            .iter()
            .filter(|id| *id != self_id)
            .cloned()
            .collect();
    }

    /// Clear per-request fields after release.
    pub fn reset_request(&mut self) {
        self.requesting = false;
        self.my_request = None;
        self.has_entered = false;
        self.awaiting_reply_from.clear();
    }

    /// Record that a (sender, request) pair has been answered, evicting the
    /// oldest record past the cap.
    pub fn record_replied(&mut self, sender: NodeId, request_id: RequestId) {
        let key = (sender, request_id);
        if self.replied_to.insert(key.clone()) {
            self.replied_order.push_back(key);
            while self.replied_order.len() > REPLIED_CACHE_MAX {
                if let Some(old) = self.replied_order.pop_front() {
                    self.replied_to.remove(&old);
                }
            }
        }
    }

    /// Whether a (sender, request) pair has already been answered.
    pub fn has_replied(&self, sender: &NodeId, request_id: RequestId) -> bool {
        self.replied_to.contains(&(sender.clone(), request_id))
    }

    /// Whether the identical request is currently deferred from this sender.
    pub fn is_deferred(&self, sender: &NodeId, request_id: RequestId) -> bool {
        self.deferred
            .get(sender)
            .map(|msg| msg.request_id() == request_id)
            .unwrap_or(false)
    }

    /// True once the node has collected every reply and entered its CS.
    pub fn in_critical_section(&self) -> bool {
        self.requesting && self.has_entered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: &str) -> NodeId {
        n.to_string()
    }

    #[test]
    fn test_begin_request_excludes_self() {
        let mut state = ProtocolState::new();
        state.members.insert(id("a"));
        state.members.insert(id("b"));
        state.members.insert(id("c"));

        state.begin_request(&id("a"), 1, RequestId::from_raw(1));

        assert!(state.requesting);
        assert!(!state.awaiting_reply_from.contains("a"));
        assert_eq!(state.awaiting_reply_from.len(), 2);
    }

    #[test]
    fn test_reset_clears_request_fields() {
        let mut state = ProtocolState::new();
        state.members.insert(id("a"));
        state.members.insert(id("b"));
        state.begin_request(&id("a"), 1, RequestId::from_raw(1));
        state.has_entered = true;

        state.reset_request();

        assert!(!state.requesting);
        assert!(state.my_request.is_none());
        assert!(!state.has_entered);
        assert!(state.awaiting_reply_from.is_empty());
    }

    #[test]
    fn test_replied_record_rotates_at_cap() {
        let mut state = ProtocolState::new();
        for i in 0..(REPLIED_CACHE_MAX as u128 + 10) {
            state.record_replied(id("peer"), RequestId::from_raw(i));
        }

        // Oldest entries evicted, newest retained.
        assert!(!state.has_replied(&id("peer"), RequestId::from_raw(0)));
        assert!(state.has_replied(
            &id("peer"),
            RequestId::from_raw(REPLIED_CACHE_MAX as u128 + 9)
        ));
    }

    #[test]
    fn test_record_replied_is_idempotent() {
        let mut state = ProtocolState::new();
        let rid = RequestId::from_raw(5);
        state.record_replied(id("b"), rid);
        state.record_replied(id("b"), rid);
        assert!(state.has_replied(&id("b"), rid));
    }
}
