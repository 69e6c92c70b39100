// # netstate-core
//
// Core library for declarative network state reconciliation.
//
// ## Architecture Overview
//
// Given a partial desired-state document and the live state reported by a
// network-management daemon, this library computes the minimal set of
// changes, applies them in dependency order, and verifies convergence:
// - **NetworkState**: Typed state document (interfaces, routes, rules, DNS)
// - **diff / order**: Difference calculation and dependency ordering
// - **ApplyCoordinator**: Journaled apply with rollback on failure
// - **Verifier**: Settle, re-query and re-diff with bounded retries
// - **Reconciler**: Per-cycle state machine tying the stages together
// - **NetworkDaemon**: Trait for the daemon that owns the host's profiles
// - **BackendRegistry**: Plugin-based registry for daemon backends
//
// ## Design Principles
//
// 1. **Additive by Default**: Interfaces not named in desired are never touched
// 2. **Validate First**: Invalid documents fail before any mutation
// 3. **All or Nothing**: A failed apply unwinds to the pre-cycle snapshot
// 4. **Library-First**: The daemon binary is a thin wrapper over this crate

pub mod apply;
pub mod config;
pub mod daemon;
pub mod diff;
pub mod engine;
pub mod error;
pub mod order;
pub mod registry;
pub mod snapshot;
pub mod state;
pub mod traits;
pub mod verify;

// Re-export core types for convenience
pub use apply::{ApplyCoordinator, ApplyReport};
pub use config::{BackendConfig, EngineConfig, NetstateConfig, OperationTimeouts};
pub use daemon::{FileDaemon, MemoryDaemon};
pub use diff::{DiffAction, DiffUnit, StateDiff};
pub use engine::{CycleEvent, CyclePlan, CycleReport, CycleStage, Reconciler};
pub use error::{ApplyCause, ApplyError, Error, ErrorKind, InvalidReason, Result};
pub use order::ApplyOrder;
pub use registry::BackendRegistry;
pub use snapshot::Snapshot;
pub use state::{Interface, InterfaceState, InterfaceType, NetworkState};
pub use traits::{Completion, DaemonFactory, DaemonOp, NetworkDaemon};
pub use verify::{Verification, Verifier};
