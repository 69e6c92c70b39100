// # Memory Daemon
//
// In-memory implementation of NetworkDaemon.
//
// ## Purpose
//
// Simulates a network-management daemon: a profile store, device
// activation, and the global routing/DNS state. Nothing touches the host,
// which makes it the backend for tests, dry runs and embedding.
//
// ## Simulation
//
// - Physical NICs are seeded up front; ethernet profiles need one
// - Activation checks that the profile's base and members exist
// - A device reports `up` only once its link (and, for dynamic addressing,
//   its lease) delay has elapsed since activation
// - Faults can reject or stall any operation on any target
//
// ## Crash Behavior
//
// - All state is lost on restart
// - `FileDaemon` wraps this type to persist the profile store

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::state::{
    GlobalState, Interface, InterfaceState, InterfaceType, RouteDefaults,
};
use crate::traits::{Completion, CompletionResult, CompletionSender, DaemonFactory, DaemonOp, NetworkDaemon};
use crate::{Error, Result};

/// Name reported by [`MemoryDaemon::daemon_name`]
pub const MEMORY_DAEMON_NAME: &str = "memory";

/// Target recorded for global commits
pub const GLOBAL_TARGET: &str = "global";

/// Everything the daemon remembers
///
/// This is also the persisted format of `FileDaemon`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DaemonStore {
    /// Physical NICs present on the simulated host
    #[serde(default)]
    pub physical: BTreeSet<String>,

    /// Profiles keyed by interface name
    #[serde(default)]
    pub profiles: BTreeMap<String, Interface>,

    /// Profiles currently activated on their device
    #[serde(default)]
    pub active: BTreeSet<String>,

    #[serde(default)]
    pub global: GlobalState,

    #[serde(default)]
    pub defaults: RouteDefaults,
}

impl DaemonStore {
    /// A store with one inactive ethernet profile per NIC
    pub fn with_ethernets<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut store = Self::default();
        for name in names {
            let name = name.into();
            let profile = Interface::new(name.clone(), InterfaceType::Ethernet)
                .with_defaults()
                .with_state(InterfaceState::Down);
            store.physical.insert(name.clone());
            store.profiles.insert(name, profile);
        }
        store
    }

    /// Add (or replace) a profile
    pub fn with_profile(mut self, profile: Interface, active: bool) -> Self {
        if active {
            self.active.insert(profile.name.clone());
        } else {
            self.active.remove(&profile.name);
        }
        self.profiles.insert(profile.name.clone(), profile);
        self
    }

    pub fn with_global(mut self, global: GlobalState) -> Self {
        self.global = global;
        self
    }

    pub fn profile(&self, name: &str) -> Option<&Interface> {
        self.profiles.get(name)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.contains(name)
    }
}

/// What an injected fault does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultAction {
    /// Report the operation as rejected
    Reject(String),
    /// Accept the operation and never report back
    Stall,
}

/// A scripted failure for one operation on one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub op: DaemonOp,
    pub target: String,
    pub action: FaultAction,
}

impl Fault {
    pub fn reject(op: DaemonOp, target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            action: FaultAction::Reject(format!("injected failure: {op} {target}")),
            op,
            target,
        }
    }

    pub fn stall(op: DaemonOp, target: impl Into<String>) -> Self {
        Self {
            op,
            target: target.into(),
            action: FaultAction::Stall,
        }
    }

    fn matches(&self, op: DaemonOp, target: &str) -> bool {
        self.op == op && self.target == target
    }
}

/// One mutation submitted to the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonCall {
    pub op: DaemonOp,
    pub target: String,
}

#[derive(Debug, Default)]
struct Inner {
    store: DaemonStore,
    activated_at: HashMap<String, Instant>,
    faults: Vec<Fault>,
    // held so stalled completions stay pending instead of abandoned
    stalled: Vec<CompletionSender>,
    calls: Vec<DaemonCall>,
    neighbors: HashMap<String, Vec<Vec<serde_json::Value>>>,
    unavailable: bool,
}

impl Inner {
    fn create(&mut self, profile: Interface) -> CompletionResult {
        let name = profile.name.clone();
        if self.store.profiles.contains_key(&name) {
            return Err(format!("profile {name} already exists"));
        }
        if profile.iface_type() == InterfaceType::Ethernet && !self.store.physical.contains(&name) {
            return Err(format!("no ethernet device named {name}"));
        }
        self.store.profiles.insert(name, profile);
        Ok(())
    }

    fn modify(&mut self, profile: Interface) -> CompletionResult {
        match self.store.profiles.get_mut(&profile.name) {
            Some(existing) => {
                *existing = profile;
                Ok(())
            }
            None => Err(format!("no profile named {}", profile.name)),
        }
    }

    fn delete(&mut self, name: &str) -> CompletionResult {
        if self.store.profiles.remove(name).is_none() {
            return Err(format!("no profile named {name}"));
        }
        self.store.active.remove(name);
        self.activated_at.remove(name);
        Ok(())
    }

    fn activate(&mut self, name: &str) -> CompletionResult {
        let Some(profile) = self.store.profiles.get(name) else {
            return Err(format!("no profile named {name}"));
        };
        if let Some(missing) = profile
            .dependencies()
            .into_iter()
            .find(|dep| !self.store.profiles.contains_key(dep))
        {
            return Err(format!("{name} depends on missing device {missing}"));
        }
        self.store.active.insert(name.to_string());
        self.activated_at.insert(name.to_string(), Instant::now());
        Ok(())
    }

    fn deactivate(&mut self, name: &str) -> CompletionResult {
        if !self.store.profiles.contains_key(name) {
            return Err(format!("no device named {name}"));
        }
        self.store.active.remove(name);
        self.activated_at.remove(name);
        Ok(())
    }

    fn commit(&mut self, global: GlobalState) -> CompletionResult {
        self.store.global = GlobalState {
            dns: global.dns.normalized(),
            ..global
        };
        Ok(())
    }
}

/// In-memory network daemon
///
/// Clones share the same simulated host.
///
/// # Example
///
/// ```rust,no_run
/// use netstate_core::daemon::MemoryDaemon;
/// use netstate_core::NetworkDaemon;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let daemon = MemoryDaemon::with_ethernets(["eth0", "eth1"]);
///     let devices = daemon.list_devices().await?;
///     assert_eq!(devices.len(), 2);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryDaemon {
    inner: Arc<RwLock<Inner>>,
    link_up_delay: Duration,
    dhcp_delay: Duration,
    response_delay: Duration,
}

impl MemoryDaemon {
    /// Create a daemon with no devices
    pub fn new() -> Self {
        Self::from_store(DaemonStore::default())
    }

    /// Create a daemon with one inactive ethernet profile per NIC
    pub fn with_ethernets<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_store(DaemonStore::with_ethernets(names))
    }

    /// Create a daemon from a previously exported store
    pub fn from_store(store: DaemonStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                store,
                ..Default::default()
            })),
            link_up_delay: Duration::ZERO,
            dhcp_delay: Duration::ZERO,
            response_delay: Duration::ZERO,
        }
    }

    /// Time between activation and the device reporting `up`
    pub fn link_up_delay(mut self, delay: Duration) -> Self {
        self.link_up_delay = delay;
        self
    }

    /// Extra time before a device with dynamic addressing reports `up`
    pub fn dhcp_delay(mut self, delay: Duration) -> Self {
        self.dhcp_delay = delay;
        self
    }

    /// Time between submitting an operation and its completion
    pub fn response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    /// Copy of the simulated host state
    pub async fn export(&self) -> DaemonStore {
        self.inner.read().await.store.clone()
    }

    /// Replace the simulated host state, keeping faults and the call log
    pub(crate) async fn replace_store(&self, store: DaemonStore) {
        let mut inner = self.inner.write().await;
        inner
            .activated_at
            .retain(|name, _| store.active.contains(name));
        inner.store = store;
    }

    /// Every mutation submitted so far, in submission order
    pub async fn calls(&self) -> Vec<DaemonCall> {
        self.inner.read().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.inner.write().await.calls.clear();
    }

    pub async fn inject(&self, fault: Fault) {
        self.inner.write().await.faults.push(fault);
    }

    /// Remove every fault and drop stalled completions
    pub async fn clear_faults(&self) {
        let mut inner = self.inner.write().await;
        inner.faults.clear();
        inner.stalled.clear();
    }

    /// Make every call fail as if the daemon were unreachable
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.write().await.unavailable = unavailable;
    }

    /// Neighbor-discovery data reported for `device`
    pub async fn set_neighbors(&self, device: &str, neighbors: Vec<Vec<serde_json::Value>>) {
        self.inner
            .write()
            .await
            .neighbors
            .insert(device.to_string(), neighbors);
    }

    fn unreachable(&self) -> Error {
        Error::unavailable(MEMORY_DAEMON_NAME, "daemon is not running")
    }

    fn ready_delay(&self, profile: &Interface) -> Duration {
        let dynamic = [&profile.ipv4, &profile.ipv6]
            .into_iter()
            .flatten()
            .any(|ip| ip.is_dynamic());
        if dynamic {
            self.link_up_delay + self.dhcp_delay
        } else {
            self.link_up_delay
        }
    }

    /// Record the call, apply faults, then run `effect` now or after the
    /// response delay
    async fn submit<F>(&self, op: DaemonOp, target: &str, effect: F) -> Result<Completion>
    where
        F: FnOnce(&mut Inner) -> CompletionResult + Send + 'static,
    {
        let mut inner = self.inner.write().await;
        if inner.unavailable {
            return Err(self.unreachable());
        }
        inner.calls.push(DaemonCall {
            op,
            target: target.to_string(),
        });

        let fault = inner
            .faults
            .iter()
            .find(|fault| fault.matches(op, target))
            .map(|fault| fault.action.clone());
        match fault {
            Some(FaultAction::Reject(reason)) => {
                tracing::debug!("Rejecting {} {}: {}", op, target, reason);
                return Ok(Completion::rejected(reason));
            }
            Some(FaultAction::Stall) => {
                tracing::debug!("Stalling {} {}", op, target);
                let (tx, completion) = Completion::channel();
                inner.stalled.push(tx);
                return Ok(completion);
            }
            None => {}
        }

        if self.response_delay.is_zero() {
            return Ok(Completion::ready(effect(&mut inner)));
        }
        drop(inner);

        let (tx, completion) = Completion::channel();
        let shared = Arc::clone(&self.inner);
        let delay = self.response_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = effect(&mut *shared.write().await);
            let _ = tx.send(result);
        });
        Ok(completion)
    }
}

impl Default for MemoryDaemon {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkDaemon for MemoryDaemon {
    async fn list_devices(&self) -> Result<Vec<Interface>> {
        let inner = self.inner.read().await;
        if inner.unavailable {
            return Err(self.unreachable());
        }
        let now = Instant::now();
        let devices = inner
            .store
            .profiles
            .values()
            .map(|profile| {
                let name = profile.name.as_str();
                let up = inner.store.active.contains(name)
                    && inner
                        .activated_at
                        .get(name)
                        .map_or(true, |at| now >= *at + self.ready_delay(profile));
                let mut device = profile.clone();
                device.state = Some(if up {
                    InterfaceState::Up
                } else {
                    InterfaceState::Down
                });
                device
            })
            .collect();
        Ok(devices)
    }

    async fn query_global(&self) -> Result<GlobalState> {
        let inner = self.inner.read().await;
        if inner.unavailable {
            return Err(self.unreachable());
        }
        Ok(inner.store.global.clone())
    }

    async fn neighbors(&self, device: &str) -> Result<Vec<Vec<serde_json::Value>>> {
        let inner = self.inner.read().await;
        if inner.unavailable {
            return Err(self.unreachable());
        }
        Ok(inner.neighbors.get(device).cloned().unwrap_or_default())
    }

    async fn route_defaults(&self) -> Result<RouteDefaults> {
        let inner = self.inner.read().await;
        if inner.unavailable {
            return Err(self.unreachable());
        }
        Ok(inner.store.defaults)
    }

    async fn create_profile(&self, profile: &Interface) -> Result<Completion> {
        let profile = profile.clone();
        let name = profile.name.clone();
        self.submit(DaemonOp::CreateProfile, &name, move |inner| inner.create(profile))
            .await
    }

    async fn modify_profile(&self, profile: &Interface) -> Result<Completion> {
        let profile = profile.clone();
        let name = profile.name.clone();
        self.submit(DaemonOp::ModifyProfile, &name, move |inner| inner.modify(profile))
            .await
    }

    async fn delete_profile(&self, name: &str) -> Result<Completion> {
        let owned = name.to_string();
        self.submit(DaemonOp::DeleteProfile, name, move |inner| inner.delete(&owned))
            .await
    }

    async fn activate_profile(&self, name: &str) -> Result<Completion> {
        let owned = name.to_string();
        self.submit(DaemonOp::ActivateProfile, name, move |inner| inner.activate(&owned))
            .await
    }

    async fn deactivate_device(&self, name: &str) -> Result<Completion> {
        let owned = name.to_string();
        self.submit(DaemonOp::DeactivateDevice, name, move |inner| inner.deactivate(&owned))
            .await
    }

    async fn commit_global(&self, global: &GlobalState) -> Result<Completion> {
        let global = global.clone();
        self.submit(DaemonOp::CommitGlobal, GLOBAL_TARGET, move |inner| inner.commit(global))
            .await
    }

    fn daemon_name(&self) -> &str {
        MEMORY_DAEMON_NAME
    }
}

/// Options accepted by [`MemoryDaemonFactory`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct MemoryOptions {
    ethernets: Vec<String>,
    link_up_delay_ms: u64,
    dhcp_delay_ms: u64,
}

/// Factory for creating MemoryDaemon instances
///
/// Accepts `null` or `{"ethernets": [...], "link_up_delay_ms": .., "dhcp_delay_ms": ..}`.
pub struct MemoryDaemonFactory;

impl DaemonFactory for MemoryDaemonFactory {
    fn create(&self, config: &serde_json::Value) -> Result<Box<dyn NetworkDaemon>> {
        let options: MemoryOptions = if config.is_null() {
            MemoryOptions::default()
        } else {
            serde_json::from_value(config.clone())
                .map_err(|e| Error::config(format!("invalid memory backend options: {e}")))?
        };
        let daemon = MemoryDaemon::with_ethernets(options.ethernets)
            .link_up_delay(Duration::from_millis(options.link_up_delay_ms))
            .dhcp_delay(Duration::from_millis(options.dhcp_delay_ms));
        Ok(Box::new(daemon))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::state::{InterfaceIp, TypeConfig, VlanConfig};

    const WAIT: Duration = Duration::from_secs(1);

    fn vlan(name: &str, base: &str) -> Interface {
        Interface::new(name, InterfaceType::Vlan)
            .with_config(TypeConfig::Vlan(VlanConfig::new(10, base)))
            .with_defaults()
    }

    #[tokio::test]
    async fn seeded_ethernets_are_listed_down() {
        let daemon = MemoryDaemon::with_ethernets(["eth0", "eth1"]);
        let devices = daemon.list_devices().await.unwrap();
        let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["eth0", "eth1"]);
        assert!(devices.iter().all(|d| d.state == Some(InterfaceState::Down)));
    }

    #[tokio::test]
    async fn profile_lifecycle() {
        let daemon = MemoryDaemon::with_ethernets(["eth1"]);
        let profile = vlan("eth1.10", "eth1");

        daemon.create_profile(&profile).await.unwrap().wait(WAIT).await.unwrap();
        daemon.activate_profile("eth1.10").await.unwrap().wait(WAIT).await.unwrap();
        let store = daemon.export().await;
        assert!(store.is_active("eth1.10"));

        daemon.delete_profile("eth1.10").await.unwrap().wait(WAIT).await.unwrap();
        let store = daemon.export().await;
        assert!(store.profile("eth1.10").is_none());
        assert!(!store.is_active("eth1.10"));
    }

    #[tokio::test]
    async fn invalid_operations_are_rejected() {
        let daemon = MemoryDaemon::with_ethernets(["eth1"]);

        let duplicate = daemon.export().await.profiles["eth1"].clone();
        assert!(daemon.create_profile(&duplicate).await.unwrap().wait(WAIT).await.is_err());

        let ghost = Interface::new("eth7", InterfaceType::Ethernet).with_defaults();
        assert!(daemon.create_profile(&ghost).await.unwrap().wait(WAIT).await.is_err());

        let orphan = vlan("eth9.10", "eth9");
        daemon.create_profile(&orphan).await.unwrap().wait(WAIT).await.unwrap();
        assert!(daemon.activate_profile("eth9.10").await.unwrap().wait(WAIT).await.is_err());

        assert!(daemon.modify_profile(&vlan("eth2.10", "eth1")).await.unwrap().wait(WAIT).await.is_err());
        assert!(daemon.deactivate_device("nope").await.unwrap().wait(WAIT).await.is_err());
    }

    #[tokio::test]
    async fn faults_apply_to_matching_target_only() {
        let daemon = MemoryDaemon::with_ethernets(["eth0", "eth1"]);
        daemon.inject(Fault::reject(DaemonOp::ActivateProfile, "eth1")).await;

        assert!(daemon.activate_profile("eth0").await.unwrap().wait(WAIT).await.is_ok());
        assert!(daemon.activate_profile("eth1").await.unwrap().wait(WAIT).await.is_err());
        assert!(!daemon.export().await.is_active("eth1"));

        daemon.clear_faults().await;
        assert!(daemon.activate_profile("eth1").await.unwrap().wait(WAIT).await.is_ok());

        let calls = daemon.calls().await;
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].target, "eth1");
    }

    #[tokio::test]
    async fn unavailable_daemon_fails_every_call() {
        let daemon = MemoryDaemon::with_ethernets(["eth0"]);
        daemon.set_unavailable(true).await;
        assert_eq!(
            daemon.list_devices().await.unwrap_err().kind(),
            ErrorKind::DaemonUnavailable
        );
        assert!(daemon.activate_profile("eth0").await.is_err());
        assert!(daemon.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn device_reports_up_after_link_and_lease_delay() {
        let dhcp = Interface::new("eth0", InterfaceType::Ethernet)
            .with_ipv4(InterfaceIp::dhcp())
            .with_defaults();
        let store = DaemonStore::with_ethernets(["eth0"]).with_profile(dhcp, false);
        let daemon = MemoryDaemon::from_store(store)
            .link_up_delay(Duration::from_secs(1))
            .dhcp_delay(Duration::from_secs(3));

        daemon.activate_profile("eth0").await.unwrap().wait(WAIT).await.unwrap();
        let state = |devices: Vec<Interface>| devices[0].state;
        assert_eq!(state(daemon.list_devices().await.unwrap()), Some(InterfaceState::Down));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(state(daemon.list_devices().await.unwrap()), Some(InterfaceState::Down));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(state(daemon.list_devices().await.unwrap()), Some(InterfaceState::Up));
    }

    #[tokio::test(start_paused = true)]
    async fn response_delay_defers_the_effect() {
        let daemon = MemoryDaemon::with_ethernets(["eth0"]).response_delay(Duration::from_millis(500));
        let completion = daemon.activate_profile("eth0").await.unwrap();
        assert!(!daemon.export().await.is_active("eth0"));
        completion.wait(WAIT).await.unwrap();
        assert!(daemon.export().await.is_active("eth0"));
    }

    #[test]
    fn factory_seeds_ethernets() {
        let config = serde_json::json!({ "ethernets": ["eth0"] });
        assert!(MemoryDaemonFactory.create(&config).is_ok());
        assert!(MemoryDaemonFactory.create(&serde_json::Value::Null).is_ok());
        assert!(MemoryDaemonFactory.create(&serde_json::json!({ "ethernets": 3 })).is_err());
    }
}
