//! Interface entries
//!
//! An [`Interface`] carries the common fields every interface has plus one
//! typed [`TypeConfig`] variant. On the wire the type-specific configuration
//! is a sibling key of the common fields (`link-aggregation`, `bridge`,
//! `vlan`, ...); the conversion through [`RawInterface`] maps it onto the
//! variant matching `type`.

use super::merge::{inherit, merge_subtree, Merge};
use super::schema::{DEFAULT_MTU, DEFAULT_TEAM_RUNNER, DEFAULT_VXLAN_PORT};
use super::subtree::{
    BondConfig, BondMode, BridgeConfig, EthernetConfig, InterfaceIp, LldpConfig, OvsPortConfig,
    TeamConfig, VlanConfig, VxlanConfig,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of interface types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceType {
    Bond,
    Dummy,
    Ethernet,
    LinuxBridge,
    OvsBridge,
    OvsInterface,
    OvsPort,
    Vlan,
    Vxlan,
    Team,
    #[default]
    Unknown,
}

impl InterfaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bond => "bond",
            Self::Dummy => "dummy",
            Self::Ethernet => "ethernet",
            Self::LinuxBridge => "linux-bridge",
            Self::OvsBridge => "ovs-bridge",
            Self::OvsInterface => "ovs-interface",
            Self::OvsPort => "ovs-port",
            Self::Vlan => "vlan",
            Self::Vxlan => "vxlan",
            Self::Team => "team",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::Unknown
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative state of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceState {
    Up,
    Down,
    Absent,
}

impl fmt::Display for InterfaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Absent => "absent",
        })
    }
}

/// Type-specific configuration, one variant per interface type
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TypeConfig {
    Bond(BondConfig),
    Dummy,
    Ethernet(EthernetConfig),
    LinuxBridge(BridgeConfig),
    OvsBridge(BridgeConfig),
    OvsInterface,
    OvsPort(OvsPortConfig),
    Vlan(VlanConfig),
    Vxlan(VxlanConfig),
    Team(TeamConfig),
    #[default]
    Unknown,
}

impl TypeConfig {
    /// An unconfigured variant for the given type
    pub fn empty(iface_type: InterfaceType) -> Self {
        match iface_type {
            InterfaceType::Bond => Self::Bond(BondConfig::default()),
            InterfaceType::Dummy => Self::Dummy,
            InterfaceType::Ethernet => Self::Ethernet(EthernetConfig::default()),
            InterfaceType::LinuxBridge => Self::LinuxBridge(BridgeConfig::default()),
            InterfaceType::OvsBridge => Self::OvsBridge(BridgeConfig::default()),
            InterfaceType::OvsInterface => Self::OvsInterface,
            InterfaceType::OvsPort => Self::OvsPort(OvsPortConfig::default()),
            InterfaceType::Vlan => Self::Vlan(VlanConfig::default()),
            InterfaceType::Vxlan => Self::Vxlan(VxlanConfig::default()),
            InterfaceType::Team => Self::Team(TeamConfig::default()),
            InterfaceType::Unknown => Self::Unknown,
        }
    }

    pub fn iface_type(&self) -> InterfaceType {
        match self {
            Self::Bond(_) => InterfaceType::Bond,
            Self::Dummy => InterfaceType::Dummy,
            Self::Ethernet(_) => InterfaceType::Ethernet,
            Self::LinuxBridge(_) => InterfaceType::LinuxBridge,
            Self::OvsBridge(_) => InterfaceType::OvsBridge,
            Self::OvsInterface => InterfaceType::OvsInterface,
            Self::OvsPort(_) => InterfaceType::OvsPort,
            Self::Vlan(_) => InterfaceType::Vlan,
            Self::Vxlan(_) => InterfaceType::Vxlan,
            Self::Team(_) => InterfaceType::Team,
            Self::Unknown => InterfaceType::Unknown,
        }
    }

    /// Whether the variant carries no configured field
    pub fn is_empty(&self) -> bool {
        *self == Self::empty(self.iface_type())
    }

    /// Interfaces this one is built on top of: the base of a vlan or vxlan
    pub fn base_iface(&self) -> Option<&str> {
        match self {
            Self::Vlan(vlan) => vlan.base_iface.as_deref(),
            Self::Vxlan(vxlan) => vxlan.base_iface.as_deref(),
            _ => None,
        }
    }

    /// Interfaces enslaved to this one: bond slaves, bridge ports, team
    /// ports, interfaces attached to an OVS port
    pub fn members(&self) -> Vec<String> {
        match self {
            Self::Bond(bond) => bond.slaves.clone().unwrap_or_default(),
            Self::LinuxBridge(bridge) | Self::OvsBridge(bridge) => bridge
                .port
                .iter()
                .flatten()
                .map(|port| port.name.clone())
                .collect(),
            Self::Team(team) => team
                .ports
                .iter()
                .flatten()
                .map(|port| port.name.clone())
                .collect(),
            Self::OvsPort(port) => port.interfaces.clone().unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Every interface that must exist before this one can be created
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps = self.members();
        if let Some(base) = self.base_iface() {
            deps.push(base.to_string());
        }
        deps
    }

    fn with_defaults(&self) -> Self {
        match self {
            Self::Bond(bond) => Self::Bond(BondConfig {
                mode: bond.mode.or(Some(BondMode::RoundRobin)),
                slaves: bond.slaves.clone().or_else(|| Some(Vec::new())),
                options: bond.options.clone(),
            }),
            Self::LinuxBridge(bridge) => Self::LinuxBridge(bridge_defaults(bridge)),
            Self::OvsBridge(bridge) => Self::OvsBridge(bridge_defaults(bridge)),
            Self::OvsPort(port) => Self::OvsPort(OvsPortConfig {
                interfaces: port.interfaces.clone().or_else(|| Some(Vec::new())),
            }),
            Self::Vxlan(vxlan) => Self::Vxlan(VxlanConfig {
                destination_port: vxlan.destination_port.or(Some(DEFAULT_VXLAN_PORT)),
                ..vxlan.clone()
            }),
            Self::Team(team) => {
                let mut runner = team.runner.clone().unwrap_or_default();
                runner
                    .name
                    .get_or_insert_with(|| DEFAULT_TEAM_RUNNER.to_string());
                Self::Team(TeamConfig {
                    ports: team.ports.clone().or_else(|| Some(Vec::new())),
                    runner: Some(runner),
                })
            }
            other => other.clone(),
        }
    }

    /// Wire key of this variant's subtree, if it has one
    pub fn subtree_key(&self) -> Option<&'static str> {
        match self {
            Self::Bond(_) => Some("link-aggregation"),
            Self::Ethernet(_) => Some("ethernet"),
            Self::LinuxBridge(_) | Self::OvsBridge(_) => Some("bridge"),
            Self::OvsPort(_) => Some("ovs-port"),
            Self::Vlan(_) => Some("vlan"),
            Self::Vxlan(_) => Some("vxlan"),
            Self::Team(_) => Some("team"),
            Self::Dummy | Self::OvsInterface | Self::Unknown => None,
        }
    }
}

fn bridge_defaults(bridge: &BridgeConfig) -> BridgeConfig {
    BridgeConfig {
        options: bridge.options.clone(),
        port: bridge.port.clone().or_else(|| Some(Vec::new())),
    }
}

impl Merge for TypeConfig {
    fn merge_from(&mut self, current: &Self) {
        if *self == Self::Unknown {
            *self = current.clone();
            return;
        }
        match (self, current) {
            (Self::Bond(d), Self::Bond(c)) => d.merge_from(c),
            (Self::Ethernet(d), Self::Ethernet(c)) => d.merge_from(c),
            (Self::LinuxBridge(d), Self::LinuxBridge(c)) => d.merge_from(c),
            (Self::OvsBridge(d), Self::OvsBridge(c)) => d.merge_from(c),
            (Self::OvsPort(d), Self::OvsPort(c)) => d.merge_from(c),
            (Self::Vlan(d), Self::Vlan(c)) => d.merge_from(c),
            (Self::Vxlan(d), Self::Vxlan(c)) => d.merge_from(c),
            (Self::Team(d), Self::Team(c)) => d.merge_from(c),
            // differing types never merge; the caller treats it as a recreate
            _ => {}
        }
    }
}

/// One interface of a state document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawInterface", into = "RawInterface")]
pub struct Interface {
    pub name: String,
    pub state: Option<InterfaceState>,
    pub description: Option<String>,
    pub mtu: Option<u32>,
    pub mac_address: Option<String>,
    pub ipv4: Option<InterfaceIp>,
    pub ipv6: Option<InterfaceIp>,
    pub lldp: Option<LldpConfig>,
    pub config: TypeConfig,
    /// Subtree keys that were present but do not belong to the declared type
    foreign_subtrees: Vec<String>,
    /// The type came from a lone subtree rather than a `type` key
    type_inferred: bool,
}

impl Interface {
    pub fn new(name: impl Into<String>, iface_type: InterfaceType) -> Self {
        Self {
            name: name.into(),
            config: TypeConfig::empty(iface_type),
            ..Default::default()
        }
    }

    /// An entry requesting removal of `name`
    pub fn absent(name: impl Into<String>) -> Self {
        Self::new(name, InterfaceType::Unknown).with_state(InterfaceState::Absent)
    }

    pub fn with_state(mut self, state: InterfaceState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    pub fn with_ipv4(mut self, ipv4: InterfaceIp) -> Self {
        self.ipv4 = Some(ipv4);
        self
    }

    pub fn with_ipv6(mut self, ipv6: InterfaceIp) -> Self {
        self.ipv6 = Some(ipv6);
        self
    }

    pub fn with_config(mut self, config: TypeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn iface_type(&self) -> InterfaceType {
        self.config.iface_type()
    }

    pub fn is_absent(&self) -> bool {
        self.state == Some(InterfaceState::Absent)
    }

    /// State to drive the device towards; omitted means up
    pub fn effective_state(&self) -> InterfaceState {
        self.state.unwrap_or(InterfaceState::Up)
    }

    /// Subtree keys present on the wire that do not match the declared type
    pub fn foreign_subtrees(&self) -> &[String] {
        &self.foreign_subtrees
    }

    /// Whether anything beyond name, type and state was supplied
    pub fn has_configuration(&self) -> bool {
        self.description.is_some()
            || self.mtu.is_some()
            || self.mac_address.is_some()
            || self.ipv4.is_some()
            || self.ipv6.is_some()
            || self.lldp.is_some()
            || !self.config.is_empty()
            || !self.foreign_subtrees.is_empty()
    }

    pub fn dependencies(&self) -> Vec<String> {
        self.config.dependencies()
    }

    pub fn members(&self) -> Vec<String> {
        self.config.members()
    }

    /// Fill every omitted field with the schema default for a new interface
    pub fn with_defaults(&self) -> Interface {
        let mut filled = self.clone();
        filled.state.get_or_insert(InterfaceState::Up);
        filled.mtu.get_or_insert(DEFAULT_MTU);
        filled.ipv4 = Some(ip_defaults(self.ipv4.as_ref()));
        filled.ipv6 = Some(ip_defaults(self.ipv6.as_ref()));
        let lldp = filled.lldp.get_or_insert_with(LldpConfig::default);
        lldp.enabled.get_or_insert(false);
        filled.config = self.config.with_defaults();
        filled
    }

    /// Merge this (desired) entry over the current one
    ///
    /// Fields set here win; omitted fields keep the current value. The
    /// type-specific subtree only merges when both sides have the same type.
    pub fn merged_over(&self, current: &Interface) -> Interface {
        let mut merged = self.clone();
        merged.foreign_subtrees.clear();
        inherit(&mut merged.state, &current.state);
        inherit(&mut merged.description, &current.description);
        inherit(&mut merged.mtu, &current.mtu);
        inherit(&mut merged.mac_address, &current.mac_address);
        merge_subtree(&mut merged.ipv4, &current.ipv4);
        merge_subtree(&mut merged.ipv6, &current.ipv6);
        merge_subtree(&mut merged.lldp, &current.lldp);
        merged.config.merge_from(&current.config);
        merged
    }

    /// Settle the type of this entry against the interface on the host
    ///
    /// An entry without `type` keeps the type of an existing interface. A
    /// `bridge` subtree follows the current bridge kind; any other subtree
    /// that disagrees with the current type is foreign.
    pub fn typed_against(&self, current: Option<&Interface>) -> Interface {
        let mut typed = self.clone();
        typed.type_inferred = false;
        let Some(current) = current else {
            return typed;
        };
        let current_type = current.iface_type();
        if !self.type_inferred || self.iface_type() == current_type {
            return typed;
        }

        typed.config = match (&self.config, current_type) {
            (
                TypeConfig::LinuxBridge(bridge) | TypeConfig::OvsBridge(bridge),
                InterfaceType::OvsBridge,
            ) => TypeConfig::OvsBridge(bridge.clone()),
            (
                TypeConfig::LinuxBridge(bridge) | TypeConfig::OvsBridge(bridge),
                InterfaceType::LinuxBridge,
            ) => TypeConfig::LinuxBridge(bridge.clone()),
            (subtree, _) => {
                typed
                    .foreign_subtrees
                    .extend(subtree.subtree_key().map(str::to_string));
                TypeConfig::empty(current_type)
            }
        };
        typed
    }

    /// Copy without read-only observational data
    pub fn without_observed(&self) -> Interface {
        let mut stripped = self.clone();
        if let Some(lldp) = stripped.lldp.as_mut() {
            lldp.neighbors = None;
        }
        stripped
    }
}

fn ip_defaults(ip: Option<&InterfaceIp>) -> InterfaceIp {
    let Some(ip) = ip else {
        return InterfaceIp::disabled();
    };
    let configured = ip.dhcp == Some(true)
        || ip.autoconf == Some(true)
        || ip.address.as_ref().is_some_and(|a| !a.is_empty());
    let mut filled = ip.clone();
    filled.enabled.get_or_insert(configured);
    if filled.enabled == Some(true) {
        filled.dhcp.get_or_insert(false);
        filled.address.get_or_insert_with(Vec::new);
    }
    filled
}

/// Wire shape of an interface entry
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawInterface {
    name: String,
    #[serde(rename = "type", default, skip_serializing_if = "InterfaceType::is_unknown")]
    iface_type: InterfaceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<InterfaceState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mtu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ipv4: Option<InterfaceIp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ipv6: Option<InterfaceIp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lldp: Option<LldpConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    link_aggregation: Option<BondConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bridge: Option<BridgeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vlan: Option<VlanConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vxlan: Option<VxlanConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    team: Option<TeamConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ovs_port: Option<OvsPortConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ethernet: Option<EthernetConfig>,
}

impl From<RawInterface> for Interface {
    fn from(raw: RawInterface) -> Self {
        let declared = raw.iface_type;
        let bridge_variant = |bridge: BridgeConfig| {
            if declared == InterfaceType::OvsBridge {
                TypeConfig::OvsBridge(bridge)
            } else {
                TypeConfig::LinuxBridge(bridge)
            }
        };

        let mut present = Vec::new();
        present.extend(raw.link_aggregation.map(TypeConfig::Bond));
        present.extend(raw.bridge.map(bridge_variant));
        present.extend(raw.vlan.map(TypeConfig::Vlan));
        present.extend(raw.vxlan.map(TypeConfig::Vxlan));
        present.extend(raw.team.map(TypeConfig::Team));
        present.extend(raw.ovs_port.map(TypeConfig::OvsPort));
        present.extend(raw.ethernet.map(TypeConfig::Ethernet));

        let mut foreign_subtrees = Vec::new();
        let type_inferred = declared.is_unknown() && present.len() == 1;
        let config = if type_inferred {
            // a lone subtree names the type
            present.remove(0)
        } else {
            let mut config = TypeConfig::empty(declared);
            for subtree in present {
                if subtree.iface_type() == declared {
                    config = subtree;
                } else if let Some(key) = subtree.subtree_key() {
                    foreign_subtrees.push(key.to_string());
                }
            }
            config
        };

        Interface {
            name: raw.name,
            state: raw.state,
            description: raw.description,
            mtu: raw.mtu,
            mac_address: raw.mac_address,
            ipv4: raw.ipv4,
            ipv6: raw.ipv6,
            lldp: raw.lldp,
            config,
            foreign_subtrees,
            type_inferred,
        }
    }
}

impl From<Interface> for RawInterface {
    fn from(iface: Interface) -> Self {
        let iface_type = iface.iface_type();
        let mut raw = RawInterface {
            name: iface.name,
            iface_type,
            state: iface.state,
            description: iface.description,
            mtu: iface.mtu,
            mac_address: iface.mac_address,
            ipv4: iface.ipv4,
            ipv6: iface.ipv6,
            lldp: iface.lldp,
            link_aggregation: None,
            bridge: None,
            vlan: None,
            vxlan: None,
            team: None,
            ovs_port: None,
            ethernet: None,
        };
        if iface.config.is_empty() {
            return raw;
        }
        match iface.config {
            TypeConfig::Bond(bond) => raw.link_aggregation = Some(bond),
            TypeConfig::LinuxBridge(bridge) | TypeConfig::OvsBridge(bridge) => {
                raw.bridge = Some(bridge)
            }
            TypeConfig::Vlan(vlan) => raw.vlan = Some(vlan),
            TypeConfig::Vxlan(vxlan) => raw.vxlan = Some(vxlan),
            TypeConfig::Team(team) => raw.team = Some(team),
            TypeConfig::OvsPort(port) => raw.ovs_port = Some(port),
            TypeConfig::Ethernet(ethernet) => raw.ethernet = Some(ethernet),
            TypeConfig::Dummy | TypeConfig::OvsInterface | TypeConfig::Unknown => {}
        }
        raw
    }
}
