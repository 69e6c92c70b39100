//! Core traits for netstate
//!
//! - [`NetworkDaemon`]: Query and mutate the host through the network-management daemon
//! - [`DaemonFactory`]: Construct daemons from backend configuration

pub mod network_daemon;

pub use network_daemon::{
    Completion, CompletionResult, CompletionSender, DaemonFactory, DaemonOp, NetworkDaemon,
};
