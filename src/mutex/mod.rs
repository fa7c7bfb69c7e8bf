//! Ricart-Agrawala mutual exclusion layer.
//!
//! Permission-based distributed mutual exclusion: a node collects a REPLY
//! from every other known peer before entering its critical section, and
//! flushes deferred replies on release.
//!
//! # Invariants
//!
//! 1. **Mutual exclusion**: at most one node has entered an unreleased
//!    request at any time.
//! 2. **Total request order**: requests are ordered by `(timestamp, node id)`;
//!    the lower pair wins priority, ties break toward the smaller id.
//! 3. **Exactly-once entry**: the enter callback fires once per request,
//!    regardless of duplicate REPLY delivery.
//! 4. **Idempotent handling**: delivering any message twice leaves the same
//!    state as delivering it once.
//!
//! There are no timeouts: a crashed peer that owes a reply stalls the
//! requester until the host unregisters it.

pub mod engine;
pub mod message;
pub mod network;
pub mod state;


pub use engine::{CsLifecycle, CsState, MutexEngine};
pub use message::{MsgKind, NodeId, RaMessage, RequestId};
pub use network::{NetworkEndpoint, RaNetwork};
pub use state::ProtocolState;
