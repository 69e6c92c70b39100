//! Network state documents
//!
//! A [`NetworkState`] is used both for the caller's desired state (usually
//! partial) and for the current state assembled from a daemon query (always
//! fully populated). Keys are kebab-case; JSON and YAML share the schema.

pub mod dns;
pub mod interface;
pub mod merge;
pub mod route;
pub mod schema;
pub mod subtree;

pub use dns::{DnsConfig, DnsSection};
pub use interface::{Interface, InterfaceState, InterfaceType, TypeConfig};
pub use merge::Merge;
pub use route::{
    EntryState, RouteDefaults, RouteEntry, RouteKey, RouteRuleEntry, RouteRuleSection,
    RouteSection,
};
pub use subtree::*;

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// A full or partial network state document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<RouteSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_rules: Option<RouteRuleSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_resolver: Option<DnsSection>,
}

impl NetworkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interface(mut self, iface: Interface) -> Self {
        self.interfaces.push(iface);
        self
    }

    /// Set the configured route list (`routes.config`)
    pub fn with_routes(mut self, routes: Vec<RouteEntry>) -> Self {
        self.routes.get_or_insert_with(RouteSection::default).config = Some(routes);
        self
    }

    /// Set the configured rule list (`route-rules.config`)
    pub fn with_route_rules(mut self, rules: Vec<RouteRuleEntry>) -> Self {
        self.route_rules
            .get_or_insert_with(RouteRuleSection::default)
            .config = Some(rules);
        self
    }

    /// Set the configured resolver (`dns-resolver.config`)
    pub fn with_dns(mut self, dns: DnsConfig) -> Self {
        self.dns_resolver.get_or_insert_with(DnsSection::default).config = Some(dns);
        self
    }

    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|iface| iface.name == name)
    }

    pub fn route_config(&self) -> Option<&[RouteEntry]> {
        self.routes.as_ref().and_then(|r| r.config.as_deref())
    }

    pub fn route_rule_config(&self) -> Option<&[RouteRuleEntry]> {
        self.route_rules.as_ref().and_then(|r| r.config.as_deref())
    }

    pub fn dns_config(&self) -> Option<&DnsConfig> {
        self.dns_resolver.as_ref().and_then(|d| d.config.as_ref())
    }

    /// Assemble a current-state document from daemon query results
    pub fn from_parts(interfaces: Vec<Interface>, global: GlobalState) -> Self {
        Self {
            schema_version: Some(schema::SCHEMA_VERSION.to_string()),
            interfaces,
            routes: Some(RouteSection {
                running: global.routes.clone(),
                config: Some(global.routes),
            }),
            route_rules: Some(RouteRuleSection {
                config: Some(global.route_rules),
            }),
            dns_resolver: Some(DnsSection {
                running: Some(global.dns.clone()),
                config: Some(global.dns),
            }),
        }
    }

    /// Global (non-interface) part of a current-state document
    pub fn global(&self) -> GlobalState {
        GlobalState {
            routes: self.route_config().map(<[_]>::to_vec).unwrap_or_default(),
            route_rules: self.route_rule_config().map(<[_]>::to_vec).unwrap_or_default(),
            dns: self.dns_config().cloned().unwrap_or_default().normalized(),
        }
    }

    pub fn from_json_str(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Routes, rules and resolver as held by the daemon
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GlobalState {
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
    #[serde(default)]
    pub route_rules: Vec<RouteRuleEntry>,
    #[serde(default)]
    pub dns: DnsConfig,
}
