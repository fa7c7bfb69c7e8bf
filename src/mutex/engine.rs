//! The Ricart-Agrawala mutual exclusion engine.
//!
//! One engine per node, owning that node's clock, protocol state, and
//! transport endpoint. The engine never blocks: `request_entry` returns
//! immediately after broadcasting, and CS entry fires from the same message
//! path that processes incoming replies. The host drives the engine by
//! pumping `process_all` from its receive loop.

use tracing::{debug, warn};

use crate::clock::LamportClock;
use crate::error::EngineError;

use super::message::{NodeId, RaMessage, RequestId};
use super::network::NetworkEndpoint;
use super::state::ProtocolState;

/// Lifecycle port for critical-section transitions.
///
/// Both callbacks run synchronously inside the engine's serialized execution
/// context; the host must not block them for long or the node stalls its
/// ability to answer peers.
pub trait CsLifecycle {
    /// Invoked exactly once per request when every awaited reply has arrived.
    fn on_enter_cs(&mut self, request_id: RequestId);

    /// Invoked when `release_entry` completes.
    fn on_exit_cs(&mut self, request_id: RequestId);
}

/// Observable node state: IDLE -> REQUESTING -> IN_CS -> IDLE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsState {
    Idle,
    Requesting,
    InCs,
}

/// One node's Ricart-Agrawala protocol engine.
pub struct MutexEngine<L: CsLifecycle> {
    /// This node's id.
    node_id: NodeId,
    /// Lamport clock; every outgoing message carries a post-tick value.
    clock: LamportClock,
    /// Mutable protocol record, owned exclusively by this engine.
    state: ProtocolState,
    /// Transport endpoint for this node.
    network: NetworkEndpoint,
    /// Host callbacks for CS entry and exit.
    lifecycle: L,
}

impl<L: CsLifecycle> MutexEngine<L> {
    /// Create an engine for `node_id`. The node is its own first member.
    pub fn new(node_id: impl Into<NodeId>, network: NetworkEndpoint, lifecycle: L) -> Self {
        let node_id = node_id.into();
        let mut state = ProtocolState::new();
        state.members.insert(node_id.clone());

        MutexEngine {
            node_id,
            clock: LamportClock::new(),
            state,
            network,
            lifecycle,
        }
    }

    /// This node's id.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Current Lamport clock value.
    pub fn clock_now(&self) -> u64 {
        self.clock.now()
    }

    /// Observable state-machine position.
    pub fn cs_state(&self) -> CsState {
        if self.state.in_critical_section() {
            CsState::InCs
        } else if self.state.requesting {
            CsState::Requesting
        } else {
            CsState::Idle
        }
    }

    /// True while this node holds the critical section.
    pub fn in_cs(&self) -> bool {
        self.state.in_critical_section()
    }

    /// The in-flight request id, if any.
    pub fn current_request(&self) -> Option<RequestId> {
        self.state.my_request.map(|(_, id)| id)
    }

    /// Peers still owing a reply for the current request.
    pub fn awaiting_count(&self) -> usize {
        self.state.awaiting_reply_from.len()
    }

    // =========================================================================
    // MEMBERSHIP
    // =========================================================================

    /// Add a peer to the membership.
    ///
    /// A peer joining mid-request does not gate the request already in
    /// flight: the awaiting set was fixed when the request was issued.
    pub fn register_peer(&mut self, peer: impl Into<NodeId>) {
        let peer = peer.into();
        debug!(node = %self.node_id, %peer, "register peer");
        self.state.members.insert(peer);
    }

    /// Remove a peer from the membership.
    ///
    /// Also drops the peer from the awaiting set (a vanished peer cannot
    /// block entry forever) and discards any request it had deferred (a
    /// departed peer's claim is void). May complete a pending CS entry.
    pub fn unregister_peer(&mut self, peer: &NodeId) {
        debug!(node = %self.node_id, %peer, "unregister peer");
        self.state.members.remove(peer);
        self.state.deferred.remove(peer);
        if self.state.awaiting_reply_from.remove(peer) {
            self.maybe_enter_cs();
        }
    }

    /// Current members, including self.
    pub fn member_count(&self) -> usize {
        self.state.members.len()
    }

    // =========================================================================
    // REQUEST / RELEASE
    // =========================================================================

    /// Start a critical-section attempt.
    ///
    /// Mints a request id, broadcasts REQUEST to every known peer, and
    /// returns immediately. Entry fires through the lifecycle port once all
    /// replies have arrived, or synchronously here when no peers are known.
    pub fn request_entry(&mut self) -> Result<RequestId, EngineError> {
        if self.state.requesting {
            return Err(EngineError::AlreadyRequesting);
        }

        let request_id = RequestId::mint();
        let timestamp = self.clock.tick();
        let self_id = self.node_id.clone();
        self.state.begin_request(&self_id, timestamp, request_id);

        debug!(
            node = %self.node_id,
            %request_id,
            timestamp,
            peers = self.state.awaiting_reply_from.len(),
            "request entry"
        );

        if self.state.awaiting_reply_from.is_empty() {
            // No known peers: enter immediately.
            self.maybe_enter_cs();
            return Ok(request_id);
        }

        let request = RaMessage::Request {
            timestamp,
            sender: self.node_id.clone(),
            request_id,
        };
        let targets: Vec<NodeId> = self.state.awaiting_reply_from.iter().cloned().collect();
        for target in targets {
            // Send-and-forget; delivery semantics are the transport's concern.
            self.network.send_to(&target, request.clone());
        }

        Ok(request_id)
    }

    /// Exit the critical section.
    ///
    /// Broadcasts RELEASE, answers every deferred request, resets the
    /// per-request state, and fires the exit callback.
    pub fn release_entry(&mut self) -> Result<(), EngineError> {
        let (_, request_id) = self
            .state
            .my_request
            .filter(|_| self.state.requesting)
            .ok_or(EngineError::NotInCriticalSection)?;

        let release = RaMessage::Release {
            timestamp: self.clock.tick(),
            sender: self.node_id.clone(),
            request_id,
        };
        self.network.broadcast(release);

        // Flush replies owed to peers we deferred while holding priority.
        let deferred: Vec<RaMessage> = self.state.deferred.drain().map(|(_, m)| m).collect();
        for msg in deferred {
            let sender = msg.sender().clone();
            let deferred_id = msg.request_id();
            if self.state.has_replied(&sender, deferred_id) {
                continue;
            }
            self.send_reply(&sender, deferred_id);
        }

        self.state.reset_request();
        debug!(node = %self.node_id, %request_id, "released critical section");
        self.lifecycle.on_exit_cs(request_id);
        Ok(())
    }

    // =========================================================================
    // MESSAGE HANDLERS
    // =========================================================================

    /// Handle an incoming REQUEST.
    pub fn handle_request(&mut self, msg: &RaMessage) {
        let (timestamp, sender, request_id) = match msg {
            RaMessage::Request {
                timestamp,
                sender,
                request_id,
            } => (*timestamp, sender.clone(), *request_id),
            _ => return,
        };

        if sender == self.node_id {
            return;
        }
        self.clock.observe(timestamp);

        // Duplicate delivery: already answered, or identical message already
        // deferred.
        if self.state.has_replied(&sender, request_id)
            || self.state.is_deferred(&sender, request_id)
        {
            return;
        }

        // Classic RA total order on (timestamp, node id): the lower pair has
        // priority. Reply when we are idle, strictly younger, or lose the
        // timestamp tie; defer otherwise.
        let reply_now = match self.state.my_request.filter(|_| self.state.requesting) {
            None => true,
            Some((my_ts, _)) => {
                my_ts > timestamp || (my_ts == timestamp && self.node_id > sender)
            }
        };

        if reply_now {
            self.send_reply(&sender, request_id);
        } else {
            debug!(node = %self.node_id, peer = %sender, "deferring reply");
            self.state.deferred.insert(sender, msg.clone());
        }
    }

    /// Handle an incoming REPLY.
    pub fn handle_reply(&mut self, msg: &RaMessage) {
        let (timestamp, sender, request_id) = match msg {
            RaMessage::Reply {
                timestamp,
                sender,
                request_id,
            } => (*timestamp, sender.clone(), *request_id),
            _ => return,
        };

        if sender == self.node_id {
            return;
        }
        self.clock.observe(timestamp);

        // Stale or duplicate reply for a superseded or satisfied request.
        let relevant = self.state.requesting
            && self.state.my_request.map(|(_, id)| id) == Some(request_id)
            && self.state.awaiting_reply_from.contains(&sender);
        if !relevant {
            return;
        }

        self.state.awaiting_reply_from.remove(&sender);
        self.maybe_enter_cs();
    }

    /// Handle an incoming RELEASE.
    ///
    /// Clock merge only: any peer the releasing node owed a reply to was
    /// already answered during its release drain.
    pub fn handle_release(&mut self, msg: &RaMessage) {
        if let RaMessage::Release { timestamp, .. } = msg {
            self.clock.observe(*timestamp);
        }
    }

    /// Drain and dispatch one incoming message. Returns true if one was
    /// processed.
    pub fn process_one(&mut self) -> bool {
        if let Some((_from, msg)) = self.network.try_recv() {
            match msg.kind() {
                super::message::MsgKind::Request => self.handle_request(&msg),
                super::message::MsgKind::Reply => self.handle_reply(&msg),
                super::message::MsgKind::Release => self.handle_release(&msg),
            }
            true
        } else {
            false
        }
    }

    /// Drain all queued messages. Returns the number processed.
    pub fn process_all(&mut self) -> usize {
        let mut count = 0;
        while self.process_one() {
            count += 1;
        }
        count
    }

    // =========================================================================
    // INTERNAL
    // =========================================================================

    /// Send a REPLY for the given request and record the dedup entry.
    fn send_reply(&mut self, target: &NodeId, request_id: RequestId) {
        let reply = RaMessage::Reply {
            timestamp: self.clock.tick(),
            sender: self.node_id.clone(),
            request_id,
        };
        if !self.network.send_to(target, reply) {
            warn!(node = %self.node_id, peer = %target, "reply not delivered");
        }
        self.state.record_replied(target.clone(), request_id);
    }

    /// Enter the CS when all replies are in, exactly once per request.
    fn maybe_enter_cs(&mut self) {
        if self.state.requesting
            && self.state.awaiting_reply_from.is_empty()
            && !self.state.has_entered
        {
            self.state.has_entered = true;
            let request_id = self
                .state
                .my_request
                .map(|(_, id)| id)
                .expect("requesting implies my_request is set");
            debug!(node = %self.node_id, %request_id, "entering critical section");
            self.lifecycle.on_enter_cs(request_id);
        }
    }
}
