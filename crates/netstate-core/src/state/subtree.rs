// # Interface Subtrees
//
// Typed configuration subtrees carried by interfaces. Every configurable
// field is optional: `None` means "not mentioned", which the merge step
// resolves to the current value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// IPv4 or IPv6 stack configuration (`ipv4` / `ipv6`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InterfaceIp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<bool>,
    /// IPv6 router advertisement autoconfiguration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoconf: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Vec<IpAddress>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_dns: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_gateway: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_routes: Option<bool>,
}

impl InterfaceIp {
    /// A stack that is explicitly turned off
    pub fn disabled() -> Self {
        Self {
            enabled: Some(false),
            ..Default::default()
        }
    }

    /// A stack that is on and configured by DHCP
    pub fn dhcp() -> Self {
        Self {
            enabled: Some(true),
            dhcp: Some(true),
            ..Default::default()
        }
    }

    /// Whether the stack is enabled and obtains addresses dynamically
    pub fn is_dynamic(&self) -> bool {
        self.enabled == Some(true) && (self.dhcp == Some(true) || self.autoconf == Some(true))
    }
}

/// A static address with its prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IpAddress {
    pub ip: IpAddr,
    pub prefix_length: u8,
}

impl IpAddress {
    pub fn new(ip: IpAddr, prefix_length: u8) -> Self {
        Self { ip, prefix_length }
    }
}

/// Bond mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BondMode {
    #[serde(rename = "balance-rr")]
    RoundRobin,
    #[serde(rename = "active-backup")]
    ActiveBackup,
    #[serde(rename = "balance-xor")]
    Xor,
    #[serde(rename = "broadcast")]
    Broadcast,
    #[serde(rename = "802.3ad")]
    Lacp,
    #[serde(rename = "balance-tlb")]
    Tlb,
    #[serde(rename = "balance-alb")]
    Alb,
}

/// Bond configuration (`link-aggregation`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BondConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<BondMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slaves: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<BTreeMap<String, serde_json::Value>>,
}

/// Linux or OVS bridge configuration (`bridge`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<Vec<BridgePort>>,
}

/// A bridge port member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgePort {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<BridgePortVlan>,
}

impl BridgePort {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vlan: None,
        }
    }
}

/// Port VLAN filtering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortVlanMode {
    Access,
    Trunk,
    Unknown,
}

/// Per-port VLAN filtering
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgePortVlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<PortVlanMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_native: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trunk_tags: Option<Vec<TrunkTag>>,
}

/// A trunk tag: a single id or an inclusive range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TrunkTag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_range: Option<TagRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRange {
    pub min: u16,
    pub max: u16,
}

/// VLAN configuration (`vlan`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VlanConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_iface: Option<String>,
}

impl VlanConfig {
    pub fn new(id: u16, base_iface: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            base_iface: Some(base_iface.into()),
        }
    }
}

/// VXLAN configuration (`vxlan`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VxlanConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_iface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_port: Option<u16>,
}

/// Team configuration (`team`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TeamConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<TeamPort>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<TeamRunner>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamPort {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRunner {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// OVS port configuration (`ovs-port`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OvsPortConfig {
    /// Interfaces attached to this port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interfaces: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Duplex {
    Full,
    Half,
}

/// Ethernet link settings (`ethernet`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EthernetConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_negotiation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplex: Option<Duplex>,
}

/// LLDP settings (`lldp`)
///
/// `neighbors` is observational: the daemon fills it in from
/// neighbor-discovery metadata and it never takes part in a diff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LldpConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighbors: Option<Vec<Vec<serde_json::Value>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bond_mode_uses_kernel_names() {
        let mode: BondMode = serde_json::from_str("\"802.3ad\"").unwrap();
        assert_eq!(mode, BondMode::Lacp);
        assert_eq!(
            serde_json::to_string(&BondMode::ActiveBackup).unwrap(),
            "\"active-backup\""
        );
    }

    #[test]
    fn omitted_fields_stay_unset() {
        let ip: InterfaceIp = serde_json::from_str(r#"{"enabled": true}"#).unwrap();
        assert_eq!(ip.enabled, Some(true));
        assert!(ip.dhcp.is_none());
        assert!(ip.address.is_none());
        assert_eq!(serde_json::to_string(&ip).unwrap(), r#"{"enabled":true}"#);
    }

    #[test]
    fn dynamic_requires_enabled_stack() {
        assert!(InterfaceIp::dhcp().is_dynamic());
        let off = InterfaceIp {
            enabled: Some(false),
            dhcp: Some(true),
            ..Default::default()
        };
        assert!(!off.is_dynamic());
    }
}
