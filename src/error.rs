//! Usage errors surfaced to the host.
//!
//! Only host-side programming mistakes are signaled as errors. Protocol
//! anomalies (duplicate, stale, reordered messages) are absorbed silently by
//! the engine's idempotence guards, and resource-arbitration failures are
//! ordinary `false`/`success = false` results the caller must branch on.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// `request_entry` called while a request is already in flight.
    #[error("already requesting the critical section")]
    AlreadyRequesting,

    /// `release_entry` called while not holding (or requesting) the
    /// critical section.
    #[error("not in the critical section")]
    NotInCriticalSection,
}
