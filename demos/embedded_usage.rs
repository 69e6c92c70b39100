//! Minimal embedding example for netstate-core
//!
//! This example demonstrates using netstate-core as a library with a custom
//! network daemon. The application owns the daemon, the reconciler and the
//! event stream.

use netstate_core::state::{GlobalState, InterfaceIp, IpAddress};
use netstate_core::traits::Completion;
use netstate_core::{
    CycleEvent, EngineConfig, Interface, InterfaceState, InterfaceType, NetworkDaemon,
    NetworkState, Reconciler, Result,
};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Default)]
struct Host {
    profiles: BTreeMap<String, Interface>,
    active: BTreeSet<String>,
    global: GlobalState,
}

/// Custom daemon for embedded usage
///
/// Every operation succeeds immediately; the host is a plain map.
#[derive(Clone, Default)]
struct EmbeddedDaemon {
    host: Arc<Mutex<Host>>,
}

impl EmbeddedDaemon {
    fn with_nic(name: &str) -> Self {
        let daemon = Self::default();
        daemon.with_host(|host| {
            let nic = Interface::new(name, InterfaceType::Ethernet)
                .with_defaults()
                .with_state(InterfaceState::Down);
            host.profiles.insert(name.to_string(), nic);
        });
        daemon
    }

    fn with_host<T>(&self, f: impl FnOnce(&mut Host) -> T) -> T {
        let mut host = self.host.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut host)
    }
}

#[async_trait::async_trait]
impl NetworkDaemon for EmbeddedDaemon {
    async fn list_devices(&self) -> Result<Vec<Interface>> {
        Ok(self.with_host(|host| {
            host.profiles
                .values()
                .map(|profile| {
                    let state = if host.active.contains(&profile.name) {
                        InterfaceState::Up
                    } else {
                        InterfaceState::Down
                    };
                    profile.clone().with_state(state)
                })
                .collect()
        }))
    }

    async fn query_global(&self) -> Result<GlobalState> {
        Ok(self.with_host(|host| host.global.clone()))
    }

    async fn create_profile(&self, profile: &Interface) -> Result<Completion> {
        println!("[Embedded] create {}", profile.name);
        self.with_host(|host| host.profiles.insert(profile.name.clone(), profile.clone()));
        Ok(Completion::succeeded())
    }

    async fn modify_profile(&self, profile: &Interface) -> Result<Completion> {
        println!("[Embedded] modify {}", profile.name);
        self.with_host(|host| host.profiles.insert(profile.name.clone(), profile.clone()));
        Ok(Completion::succeeded())
    }

    async fn delete_profile(&self, name: &str) -> Result<Completion> {
        println!("[Embedded] delete {}", name);
        self.with_host(|host| {
            host.profiles.remove(name);
            host.active.remove(name);
        });
        Ok(Completion::succeeded())
    }

    async fn activate_profile(&self, name: &str) -> Result<Completion> {
        println!("[Embedded] activate {}", name);
        self.with_host(|host| host.active.insert(name.to_string()));
        Ok(Completion::succeeded())
    }

    async fn deactivate_device(&self, name: &str) -> Result<Completion> {
        println!("[Embedded] deactivate {}", name);
        self.with_host(|host| host.active.remove(name));
        Ok(Completion::succeeded())
    }

    async fn commit_global(&self, global: &GlobalState) -> Result<Completion> {
        println!("[Embedded] commit routes/rules/dns");
        self.with_host(|host| host.global = global.clone());
        Ok(Completion::succeeded())
    }

    fn daemon_name(&self) -> &str {
        "embedded"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let daemon = EmbeddedDaemon::with_nic("eth0");
    let config = EngineConfig {
        settle_delay_ms: 10,
        ..Default::default()
    };
    let (reconciler, events) = Reconciler::new(Arc::new(daemon.clone()), config)?;

    let printer = tokio::spawn(async move {
        let mut events = ReceiverStream::new(events);
        while let Some(event) = events.next().await {
            if let CycleEvent::StageEntered { cycle, stage } = event {
                println!("[Event] cycle {} -> {}", cycle, stage);
            }
        }
    });

    let address = IpAddress::new(Ipv4Addr::new(192, 0, 2, 10).into(), 24);
    let desired = NetworkState::new().with_interface(
        Interface::new("eth0", InterfaceType::Ethernet)
            .with_state(InterfaceState::Up)
            .with_ipv4(InterfaceIp {
                enabled: Some(true),
                dhcp: Some(false),
                address: Some(vec![address]),
                ..Default::default()
            }),
    );

    let report = reconciler.reconcile(&desired).await?;
    println!(
        "Converged after {} operation(s), {} verification attempt(s)",
        report.applied.operations, report.verify_attempts
    );

    // a second cycle with the same document has nothing to do
    let again = reconciler.reconcile(&desired).await?;
    println!("Second cycle changed {} interface(s)", again.diff.changed_units().count());

    drop(reconciler);
    let _ = printer.await;
    Ok(())
}
