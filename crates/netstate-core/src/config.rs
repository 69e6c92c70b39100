//! Configuration types for netstate
//!
//! This module defines all configuration structures used throughout the crate.

use crate::state::InterfaceType;
use crate::traits::DaemonOp;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum activation budget for linux bridges (STP forward delay)
pub const BRIDGE_ACTIVATION_TIMEOUT: Duration = Duration::from_secs(35);

/// Main netstate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetstateConfig {
    /// Daemon backend configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl NetstateConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.backend.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// Daemon backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-memory simulated daemon (not persistent)
    #[default]
    Memory,

    /// File-backed daemon
    File {
        /// Path to the profile store
        path: String,
    },

    /// Custom daemon
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl BackendConfig {
    /// Validate the backend configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            BackendConfig::File { path } => {
                if path.is_empty() {
                    return Err(crate::Error::config("File backend path cannot be empty"));
                }
                Ok(())
            }
            BackendConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom backend factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom backend config cannot be null"));
                }
                Ok(())
            }
            BackendConfig::Memory => Ok(()),
        }
    }

    /// Get the backend type name
    pub fn type_name(&self) -> &str {
        match self {
            BackendConfig::Memory => "memory",
            BackendConfig::File { .. } => "file",
            BackendConfig::Custom { factory, .. } => factory,
        }
    }

    /// Configuration handed to the backend's factory
    pub fn factory_config(&self) -> serde_json::Value {
        match self {
            BackendConfig::Memory => serde_json::Value::Null,
            BackendConfig::File { path } => serde_json::json!({ "path": path }),
            BackendConfig::Custom { config, .. } => config.clone(),
        }
    }
}

/// Engine configuration
///
/// Verification constants are environment-dependent (driver link-up time,
/// DHCP lease latency), so all of them are configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wait before the first post-apply query (milliseconds)
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Number of verification queries before giving up
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,

    /// Initial delay between verification queries (milliseconds)
    ///
    /// Doubles after every attempt up to `verify_backoff_max_ms`.
    #[serde(default = "default_verify_backoff_ms")]
    pub verify_backoff_ms: u64,

    /// Upper bound for the verification backoff (milliseconds)
    #[serde(default = "default_verify_backoff_max_ms")]
    pub verify_backoff_max_ms: u64,

    /// Issue independent units of one wave concurrently
    #[serde(default = "default_concurrent_waves")]
    pub concurrent_waves: bool,

    /// Capacity of the cycle event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Per-operation completion budgets
    #[serde(default)]
    pub timeouts: OperationTimeouts,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.verify_attempts == 0 {
            return Err(crate::Error::config("verify_attempts must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        if self.verify_backoff_max_ms < self.verify_backoff_ms {
            return Err(crate::Error::config(
                "verify_backoff_max_ms cannot be smaller than verify_backoff_ms",
            ));
        }
        self.timeouts.validate()
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Delay before verification attempt `attempt` (1-based, after the first)
    pub fn verify_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let delay = self.verify_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.verify_backoff_max_ms))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            verify_attempts: default_verify_attempts(),
            verify_backoff_ms: default_verify_backoff_ms(),
            verify_backoff_max_ms: default_verify_backoff_max_ms(),
            concurrent_waves: default_concurrent_waves(),
            event_channel_capacity: default_event_channel_capacity(),
            timeouts: OperationTimeouts::default(),
        }
    }
}

/// Completion budgets per daemon operation (milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationTimeouts {
    #[serde(default = "default_profile_op_ms")]
    pub create_ms: u64,
    #[serde(default = "default_profile_op_ms")]
    pub modify_ms: u64,
    #[serde(default = "default_profile_op_ms")]
    pub delete_ms: u64,
    #[serde(default = "default_activate_ms")]
    pub activate_ms: u64,
    #[serde(default = "default_deactivate_ms")]
    pub deactivate_ms: u64,
    #[serde(default = "default_profile_op_ms")]
    pub global_ms: u64,
}

impl OperationTimeouts {
    /// Budget for `op` on an interface of `iface_type`
    ///
    /// Linux bridges never get less than [`BRIDGE_ACTIVATION_TIMEOUT`] to
    /// activate.
    pub fn for_op(&self, op: DaemonOp, iface_type: InterfaceType) -> Duration {
        let ms = match op {
            DaemonOp::CreateProfile => self.create_ms,
            DaemonOp::ModifyProfile => self.modify_ms,
            DaemonOp::DeleteProfile => self.delete_ms,
            DaemonOp::ActivateProfile => self.activate_ms,
            DaemonOp::DeactivateDevice => self.deactivate_ms,
            DaemonOp::CommitGlobal => self.global_ms,
        };
        let budget = Duration::from_millis(ms);
        if op == DaemonOp::ActivateProfile && iface_type == InterfaceType::LinuxBridge {
            budget.max(BRIDGE_ACTIVATION_TIMEOUT)
        } else {
            budget
        }
    }

    fn validate(&self) -> Result<(), crate::Error> {
        let all = [
            self.create_ms,
            self.modify_ms,
            self.delete_ms,
            self.activate_ms,
            self.deactivate_ms,
            self.global_ms,
        ];
        if all.contains(&0) {
            return Err(crate::Error::config("operation timeouts must be > 0"));
        }
        Ok(())
    }
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            create_ms: default_profile_op_ms(),
            modify_ms: default_profile_op_ms(),
            delete_ms: default_profile_op_ms(),
            activate_ms: default_activate_ms(),
            deactivate_ms: default_deactivate_ms(),
            global_ms: default_profile_op_ms(),
        }
    }
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_verify_attempts() -> u32 {
    5
}

fn default_verify_backoff_ms() -> u64 {
    1000
}

fn default_verify_backoff_max_ms() -> u64 {
    8000
}

fn default_concurrent_waves() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_profile_op_ms() -> u64 {
    10_000
}

fn default_activate_ms() -> u64 {
    60_000
}

fn default_deactivate_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: NetstateConfig =
            serde_json::from_str(r#"{"backend": {"type": "file", "path": "/var/lib/netstate/profiles.json"}}"#)
                .unwrap();
        assert_eq!(config.backend.type_name(), "file");
        assert_eq!(config.engine.verify_attempts, 5);
        assert_eq!(config.engine.timeouts.activate_ms, 60_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config = NetstateConfig {
            backend: BackendConfig::File {
                path: String::new(),
            },
            engine: EngineConfig::default(),
        };
        assert!(config.validate().is_err());

        let engine = EngineConfig {
            verify_attempts: 0,
            ..Default::default()
        };
        assert!(engine.validate().is_err());

        let engine = EngineConfig {
            timeouts: OperationTimeouts {
                delete_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(engine.validate().is_err());
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let engine = EngineConfig::default();
        assert_eq!(engine.verify_backoff(1), Duration::from_millis(1000));
        assert_eq!(engine.verify_backoff(2), Duration::from_millis(2000));
        assert_eq!(engine.verify_backoff(4), Duration::from_millis(8000));
        assert_eq!(engine.verify_backoff(10), Duration::from_millis(8000));
    }

    #[test]
    fn bridge_activation_gets_stp_budget() {
        let timeouts = OperationTimeouts {
            activate_ms: 5_000,
            ..Default::default()
        };
        assert_eq!(
            timeouts.for_op(DaemonOp::ActivateProfile, InterfaceType::LinuxBridge),
            BRIDGE_ACTIVATION_TIMEOUT
        );
        assert_eq!(
            timeouts.for_op(DaemonOp::ActivateProfile, InterfaceType::Ethernet),
            Duration::from_secs(5)
        );
        assert_eq!(
            timeouts.for_op(DaemonOp::CreateProfile, InterfaceType::LinuxBridge),
            Duration::from_secs(10)
        );
    }
}
