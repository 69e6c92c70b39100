//! Pre-apply snapshot of the host
//!
//! A [`Snapshot`] is the current state captured at the start of a cycle. The
//! apply stage uses it to restore whatever it changed when an operation
//! fails; it is dropped when the cycle ends.

use crate::error::{Error, ErrorKind, Result};
use crate::state::{NetworkState, RouteDefaults};
use crate::traits::NetworkDaemon;
use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub state: NetworkState,
    pub defaults: RouteDefaults,
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Query the daemon for a fully populated current state
    ///
    /// Neighbor metadata is merged into `lldp.neighbors` for every interface
    /// with LLDP enabled. Any query failure is reported as
    /// [`Error::DaemonUnavailable`].
    pub async fn capture(daemon: &dyn NetworkDaemon) -> Result<Self> {
        let unavailable = |err: Error| match err.kind() {
            ErrorKind::DaemonUnavailable => err,
            _ => Error::unavailable(daemon.daemon_name(), err.to_string()),
        };

        let mut interfaces = daemon.list_devices().await.map_err(unavailable)?;
        for iface in &mut interfaces {
            let Some(lldp) = iface.lldp.as_mut() else {
                continue;
            };
            if lldp.enabled != Some(true) {
                continue;
            }
            let neighbors = daemon.neighbors(&iface.name).await.map_err(unavailable)?;
            if !neighbors.is_empty() {
                lldp.neighbors = Some(neighbors);
            }
        }

        let global = daemon.query_global().await.map_err(unavailable)?;
        let defaults = daemon.route_defaults().await.map_err(unavailable)?;
        debug!(
            "Captured {} interfaces and {} routes from {}",
            interfaces.len(),
            global.routes.len(),
            daemon.daemon_name()
        );

        Ok(Self {
            state: NetworkState::from_parts(interfaces, global),
            defaults,
            captured_at: Utc::now(),
        })
    }
}
