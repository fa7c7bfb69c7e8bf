//! Ricart-Agrawala protocol messages.
//!
//! Three message kinds share the same payload shape: a Lamport timestamp,
//! the sender's node id, and the request id that correlates REPLY/RELEASE
//! with the originating REQUEST. The transport may duplicate, delay, or
//! reorder any of them; the engine's idempotence guards make that safe.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Node identifier. Lexicographic order on this string is the protocol's
/// tie-break order: the smaller id wins a timestamp tie.
pub type NodeId = String;

/// Globally unique token minted by the requester per CS attempt.
///
/// Random 128-bit value; used to correlate REPLY/RELEASE messages with the
/// originating REQUEST and to make message handling idempotent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u128);

impl RequestId {
    /// Mint a fresh random request id.
    pub fn mint() -> Self {
        RequestId(rand::thread_rng().gen())
    }

    /// Construct from a raw value (tests and replay tooling).
    pub fn from_raw(raw: u128) -> Self {
        RequestId(raw)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Protocol message kind, for dispatch and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    Request,
    Reply,
    Release,
}

/// Ricart-Agrawala protocol messages.
///
/// REQUEST and RELEASE are broadcast to all known peers; REPLY is sent
/// point-to-point to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaMessage {
    /// Ask every peer for permission to enter the critical section.
    Request {
        /// Lamport timestamp at the time the request was issued (post-tick).
        timestamp: u64,
        /// Requesting node.
        sender: NodeId,
        /// Fresh token for this CS attempt.
        request_id: RequestId,
    },

    /// Grant permission for the identified request.
    Reply {
        /// Lamport timestamp at the time the reply was sent (post-tick).
        timestamp: u64,
        /// Replying node.
        sender: NodeId,
        /// The request being answered (the requester's token, not ours).
        request_id: RequestId,
    },

    /// Announce exit from the critical section.
    ///
    /// Carries no state change for receivers beyond the clock merge: every
    /// deferred peer was already answered during the release drain. Kept as
    /// a distinct message for observability and audit.
    Release {
        /// Lamport timestamp at the time of release (post-tick).
        timestamp: u64,
        /// Releasing node.
        sender: NodeId,
        /// The request that held the critical section.
        request_id: RequestId,
    },
}

impl RaMessage {
    /// The kind of this message.
    pub fn kind(&self) -> MsgKind {
        match self {
            RaMessage::Request { .. } => MsgKind::Request,
            RaMessage::Reply { .. } => MsgKind::Reply,
            RaMessage::Release { .. } => MsgKind::Release,
        }
    }

    /// Lamport timestamp carried by this message.
    pub fn timestamp(&self) -> u64 {
        match self {
            RaMessage::Request { timestamp, .. }
            | RaMessage::Reply { timestamp, .. }
            | RaMessage::Release { timestamp, .. } => *timestamp,
        }
    }

    /// Sending node.
    pub fn sender(&self) -> &NodeId {
        match self {
            RaMessage::Request { sender, .. }
            | RaMessage::Reply { sender, .. }
            | RaMessage::Release { sender, .. } => sender,
        }
    }

    /// Request token this message refers to.
    pub fn request_id(&self) -> RequestId {
        match self {
            RaMessage::Request { request_id, .. }
            | RaMessage::Reply { request_id, .. }
            | RaMessage::Release { request_id, .. } => *request_id,
        }
    }

    /// Serialize message to bytes using bincode.
    pub fn serialize(&self) -> Vec<u8> {
        bincode::serialize(self).expect("RaMessage serialization should not fail")
    }

    /// Deserialize message from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
