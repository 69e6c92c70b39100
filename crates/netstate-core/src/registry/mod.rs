//! Plugin-based backend registry
//!
//! The registry maps backend type names to daemon factories so the daemon a
//! reconciler drives is chosen by configuration, not by hardcoded if-else
//! chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use netstate_core::registry::BackendRegistry;
//! use netstate_core::config::BackendConfig;
//!
//! // Memory and file backends are registered by default
//! let registry = BackendRegistry::with_builtin();
//!
//! // Register a custom backend
//! registry.register("nm-dbus", Box::new(NmDbusFactory));
//!
//! let daemon = registry.create(&BackendConfig::Custom {
//!     factory: "nm-dbus".into(),
//!     config: serde_json::json!({ "bus": "system" }),
//! })?;
//! ```

use crate::config::BackendConfig;
use crate::daemon::{FileDaemonFactory, MemoryDaemonFactory};
use crate::error::{Error, Result};
use crate::traits::{DaemonFactory, NetworkDaemon};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Registry for plugin-based daemon creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct BackendRegistry {
    factories: RwLock<HashMap<String, Box<dyn DaemonFactory>>>,
}

impl BackendRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the `memory` and `file` backends
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register("memory", Box::new(MemoryDaemonFactory));
        registry.register("file", Box::new(FileDaemonFactory));
        registry
    }

    /// Register a daemon factory
    ///
    /// # Parameters
    ///
    /// - `name`: Backend type name, as used in [`BackendConfig::type_name`]
    /// - `factory`: Factory object for creating daemon instances
    pub fn register(&self, name: impl Into<String>, factory: Box<dyn DaemonFactory>) {
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        factories.insert(name.into(), factory);
    }

    /// Create a daemon from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn NetworkDaemon>)`: Created daemon instance
    /// - `Err(Error)`: If the backend type is not registered or creation fails
    pub fn create(&self, config: &BackendConfig) -> Result<Box<dyn NetworkDaemon>> {
        config.validate()?;
        let backend_type = config.type_name();
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);

        let factory = factories
            .get(backend_type)
            .ok_or_else(|| Error::config(format!("Unknown backend type: {}", backend_type)))?;

        tracing::debug!("Creating {} backend", backend_type);
        factory.create(&config.factory_config())
    }

    /// List all registered backend types
    pub fn list(&self) -> Vec<String> {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        factories.contains_key(name)
    }
}
