// # Daemon Implementations
//
// This module provides implementations of the NetworkDaemon trait for
// different backends.

pub mod file;
pub mod memory;

pub use file::{FileDaemon, FileDaemonFactory};
pub use memory::{
    DaemonCall, DaemonStore, Fault, FaultAction, MemoryDaemon, MemoryDaemonFactory,
};
