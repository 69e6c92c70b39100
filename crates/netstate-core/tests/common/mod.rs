//! Test doubles and common utilities for contract tests
//!
//! Hosts are simulated with `MemoryDaemon`; the helpers here build the
//! documents and engines the contract tests share.

#![allow(dead_code)]

use netstate_core::daemon::{DaemonStore, MemoryDaemon};
use netstate_core::error::Result;
use netstate_core::state::{
    BondConfig, GlobalState, Interface, InterfaceType, RouteDefaults, TypeConfig, VlanConfig,
};
use netstate_core::traits::{Completion, NetworkDaemon};
use netstate_core::{CycleEvent, EngineConfig, Reconciler};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Engine settings that keep verification fast
pub fn fast_engine() -> EngineConfig {
    EngineConfig {
        settle_delay_ms: 1,
        verify_attempts: 3,
        verify_backoff_ms: 1,
        verify_backoff_max_ms: 4,
        ..Default::default()
    }
}

/// A simulated host with three idle NICs
pub fn lab_host() -> MemoryDaemon {
    MemoryDaemon::with_ethernets(["eth0", "eth1", "eth2"])
}

pub fn reconciler_for(daemon: &MemoryDaemon) -> (Reconciler, mpsc::Receiver<CycleEvent>) {
    Reconciler::new(Arc::new(daemon.clone()), fast_engine()).expect("engine config is valid")
}

pub fn ethernet(name: &str) -> Interface {
    Interface::new(name, InterfaceType::Ethernet)
}

pub fn vlan(name: &str, id: u16, base: &str) -> Interface {
    Interface::new(name, InterfaceType::Vlan).with_config(TypeConfig::Vlan(VlanConfig::new(id, base)))
}

pub fn bond(name: &str, slaves: &[&str]) -> Interface {
    Interface::new(name, InterfaceType::Bond).with_config(TypeConfig::Bond(BondConfig {
        slaves: Some(slaves.iter().map(|s| s.to_string()).collect()),
        ..Default::default()
    }))
}

pub fn dummy(name: &str) -> Interface {
    Interface::new(name, InterfaceType::Dummy)
}

/// Collect every event currently buffered in `rx`
pub fn drain_events(rx: &mut mpsc::Receiver<CycleEvent>) -> Vec<CycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wraps a MemoryDaemon and delays every query
///
/// Used to hold a cycle in its diffing stage.
pub struct SlowQueryDaemon {
    inner: MemoryDaemon,
    delay: Duration,
    queries: Arc<AtomicUsize>,
}

impl SlowQueryDaemon {
    pub fn new(inner: MemoryDaemon, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            queries: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NetworkDaemon for SlowQueryDaemon {
    async fn list_devices(&self) -> Result<Vec<Interface>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.list_devices().await
    }

    async fn query_global(&self) -> Result<GlobalState> {
        self.inner.query_global().await
    }

    async fn route_defaults(&self) -> Result<RouteDefaults> {
        self.inner.route_defaults().await
    }

    async fn create_profile(&self, profile: &Interface) -> Result<Completion> {
        self.inner.create_profile(profile).await
    }

    async fn modify_profile(&self, profile: &Interface) -> Result<Completion> {
        self.inner.modify_profile(profile).await
    }

    async fn delete_profile(&self, name: &str) -> Result<Completion> {
        self.inner.delete_profile(name).await
    }

    async fn activate_profile(&self, name: &str) -> Result<Completion> {
        self.inner.activate_profile(name).await
    }

    async fn deactivate_device(&self, name: &str) -> Result<Completion> {
        self.inner.deactivate_device(name).await
    }

    async fn commit_global(&self, global: &GlobalState) -> Result<Completion> {
        self.inner.commit_global(global).await
    }

    fn daemon_name(&self) -> &str {
        "slow-query"
    }
}

/// Store whose default route table differs from the kernel's usual 254
pub fn host_with_defaults(defaults: RouteDefaults) -> MemoryDaemon {
    let mut store = DaemonStore::with_ethernets(["eth0", "eth1", "eth2"]);
    store.defaults = defaults;
    MemoryDaemon::from_store(store)
}
