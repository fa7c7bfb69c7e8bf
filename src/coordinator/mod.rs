//! Resource coordination layer.
//!
//! A singleton arbiter guards physical access to the shared bank account.
//! It is deliberately dumb about ordering: the Ricart-Agrawala layer decides
//! who enters the critical section, and the coordinator only verifies that
//! at most one node actually touches the resource at a time. An acquire
//! collision therefore means the distributed protocol failed upstream, and
//! is recorded as a violation rather than queued.

pub mod audit;
pub mod host;
pub mod resource;

pub use audit::{
    AccessEntry, AccessMonitor, MetricsCollector, OpKind, OpRecord, Violation, ViolationDetector,
    ViolationKind,
};
pub use host::{CoordinatorConfig, CoordinatorSnapshot, ResourceCoordinator, TransactionResult};
pub use resource::BankAccount;
