// # Network Daemon Trait
//
// Defines the boundary with the network-management daemon that owns the
// host's profile store and device activation.
//
// ## Purpose
//
// The engine never programs the network stack itself. It reads the live
// state through the query half of this trait and drives changes through the
// mutate half. Every mutation is asynchronous at the daemon: the call only
// submits the request and hands back a [`Completion`] token that resolves
// once the daemon reports success or rejection.
//
// ## Implementations
//
// - In-memory: `MemoryDaemon` (simulation, fault injection)
// - File-backed: `FileDaemon` (profile store persisted as JSON)
//
// ## Usage
//
// ```rust,ignore
// use netstate_core::NetworkDaemon;
// use std::time::Duration;
//
// let completion = daemon.activate_profile("eth1").await?;
// completion.wait(Duration::from_secs(60)).await?;
// ```

use crate::error::ApplyCause;
use crate::state::{GlobalState, Interface, RouteDefaults};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;

/// Mutating operations offered by a daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DaemonOp {
    CreateProfile,
    ModifyProfile,
    DeleteProfile,
    ActivateProfile,
    DeactivateDevice,
    CommitGlobal,
}

impl fmt::Display for DaemonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CreateProfile => "create-profile",
            Self::ModifyProfile => "modify-profile",
            Self::DeleteProfile => "delete-profile",
            Self::ActivateProfile => "activate-profile",
            Self::DeactivateDevice => "deactivate-device",
            Self::CommitGlobal => "commit-global",
        })
    }
}

/// Outcome reported by the daemon for one operation
pub type CompletionResult = std::result::Result<(), String>;

/// Sending half of a [`Completion`], held by the daemon
pub type CompletionSender = oneshot::Sender<CompletionResult>;

/// Completion token for a submitted daemon operation
///
/// Resolves to `Ok(())` on success or `Err(reason)` when the daemon rejects
/// the operation. Dropping the sender without reporting is surfaced as
/// [`ApplyCause::Abandoned`].
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<CompletionResult>,
}

impl Completion {
    /// Create a pending token and the sender that resolves it
    pub fn channel() -> (CompletionSender, Completion) {
        let (tx, rx) = oneshot::channel();
        (tx, Completion { rx })
    }

    /// A token that is already resolved
    pub fn ready(result: CompletionResult) -> Self {
        let (tx, completion) = Self::channel();
        // the receiver is alive in `completion`, so the send cannot fail
        let _ = tx.send(result);
        completion
    }

    pub fn succeeded() -> Self {
        Self::ready(Ok(()))
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::ready(Err(reason.into()))
    }

    /// Wait for the daemon to report, without a bound
    pub async fn outcome(self) -> Result<(), ApplyCause> {
        match self.rx.await {
            Err(_) => Err(ApplyCause::Abandoned),
            Ok(Err(reason)) => Err(ApplyCause::Rejected { reason }),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Wait for the daemon to report, bounded by `timeout`
    pub async fn wait(self, timeout: Duration) -> Result<(), ApplyCause> {
        match tokio::time::timeout(timeout, self.rx).await {
            Err(_) => Err(ApplyCause::Timeout { after: timeout }),
            Ok(Err(_)) => Err(ApplyCause::Abandoned),
            Ok(Ok(Err(reason))) => Err(ApplyCause::Rejected { reason }),
            Ok(Ok(Ok(()))) => Ok(()),
        }
    }
}

/// Trait for network daemon implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks; the
/// apply stage issues independent operations of one wave in parallel.
///
/// # Errors
///
/// A method returns `Err` only when the request could not be submitted at
/// all (daemon unreachable). Rejections of a submitted request travel
/// through the returned [`Completion`].
#[async_trait]
pub trait NetworkDaemon: Send + Sync {
    /// List every device with its live attributes
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<Interface>)`: fully populated interface entries
    /// - `Err(Error)`: the daemon could not be queried
    async fn list_devices(&self) -> Result<Vec<Interface>, crate::Error>;

    /// Read routes, route rules and the DNS resolver configuration
    async fn query_global(&self) -> Result<GlobalState, crate::Error>;

    /// Neighbor-discovery metadata for a device
    ///
    /// Populates the read-only `lldp.neighbors` subtree. Daemons without
    /// neighbor discovery report nothing.
    ///
    /// # Parameters
    ///
    /// - `device`: The device name
    async fn neighbors(
        &self,
        _device: &str,
    ) -> Result<Vec<Vec<serde_json::Value>>, crate::Error> {
        Ok(Vec::new())
    }

    /// Host defaults used to resolve route sentinels
    async fn route_defaults(&self) -> Result<RouteDefaults, crate::Error> {
        Ok(RouteDefaults::default())
    }

    /// Submit a new profile
    ///
    /// # Parameters
    ///
    /// - `profile`: Fully merged configuration for the interface
    async fn create_profile(&self, profile: &Interface) -> Result<Completion, crate::Error>;

    /// Replace an existing profile
    ///
    /// # Parameters
    ///
    /// - `profile`: Fully merged configuration for the interface
    async fn modify_profile(&self, profile: &Interface) -> Result<Completion, crate::Error>;

    /// Remove the profile named `name`
    async fn delete_profile(&self, name: &str) -> Result<Completion, crate::Error>;

    /// Activate (or reapply) the profile named `name` on its device
    async fn activate_profile(&self, name: &str) -> Result<Completion, crate::Error>;

    /// Take the device named `name` down
    async fn deactivate_device(&self, name: &str) -> Result<Completion, crate::Error>;

    /// Replace routes, route rules and the DNS resolver configuration
    async fn commit_global(&self, global: &GlobalState) -> Result<Completion, crate::Error>;

    /// Name used in logs and errors
    fn daemon_name(&self) -> &str;
}

/// Helper trait for constructing daemons from configuration
pub trait DaemonFactory: Send + Sync {
    /// Create a NetworkDaemon instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Configuration specific to this backend
    ///
    /// # Returns
    ///
    /// A boxed NetworkDaemon trait object
    fn create(&self, config: &serde_json::Value) -> Result<Box<dyn NetworkDaemon>, crate::Error>;
}
