//! Routes and route rules
//!
//! Metric, table and priority may be given as sentinels meaning "whatever
//! the host uses by default". Entries are always resolved against
//! [`RouteDefaults`] before they are compared, so a sentinel never diffs
//! against the concrete value the host reports back.

use super::schema::{USE_DEFAULT_METRIC, USE_DEFAULT_PRIORITY, USE_DEFAULT_ROUTE_TABLE};
use serde::{Deserialize, Serialize};

/// Marks a route or rule entry for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Absent,
}

/// Host defaults used to resolve sentinels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RouteDefaults {
    pub metric: i64,
    pub table: u32,
    pub rule_priority: i64,
    pub rule_table: u32,
}

impl Default for RouteDefaults {
    fn default() -> Self {
        Self {
            metric: 100,
            table: 254,
            rule_priority: 30000,
            rule_table: 254,
        }
    }
}

/// A single route
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RouteEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<EntryState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_hop_interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_hop_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<u32>,
}

/// Identity of a resolved route: `(table-id, destination, next-hop-address)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    pub table_id: u32,
    pub destination: String,
    pub next_hop_address: String,
}

impl RouteEntry {
    pub fn new(destination: impl Into<String>, next_hop_interface: impl Into<String>) -> Self {
        Self {
            destination: Some(destination.into()),
            next_hop_interface: Some(next_hop_interface.into()),
            ..Default::default()
        }
    }

    pub fn via(mut self, next_hop_address: impl Into<String>) -> Self {
        self.next_hop_address = Some(next_hop_address.into());
        self
    }

    pub fn with_metric(mut self, metric: i64) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn with_table(mut self, table_id: u32) -> Self {
        self.table_id = Some(table_id);
        self
    }

    pub fn is_absent(&self) -> bool {
        self.state == Some(EntryState::Absent)
    }

    fn resolved_table(&self, defaults: &RouteDefaults) -> u32 {
        match self.table_id {
            None | Some(USE_DEFAULT_ROUTE_TABLE) => defaults.table,
            Some(table) => table,
        }
    }

    /// Identity key with the table sentinel resolved
    pub fn key(&self, defaults: &RouteDefaults) -> RouteKey {
        RouteKey {
            table_id: self.resolved_table(defaults),
            destination: self.destination.clone().unwrap_or_default(),
            next_hop_address: self.next_hop_address.clone().unwrap_or_default(),
        }
    }

    /// Resolve every sentinel and omitted value
    ///
    /// An omitted metric takes the metric of the current route with the same
    /// identity, falling back to the host default.
    pub fn resolve(&self, defaults: &RouteDefaults, current: &[RouteEntry]) -> RouteEntry {
        let key = self.key(defaults);
        let metric = match self.metric {
            Some(USE_DEFAULT_METRIC) => defaults.metric,
            Some(metric) => metric,
            None => current
                .iter()
                .find(|route| route.key(defaults) == key)
                .and_then(|route| route.metric)
                .unwrap_or(defaults.metric),
        };
        RouteEntry {
            state: None,
            destination: Some(key.destination),
            next_hop_interface: self.next_hop_interface.clone(),
            next_hop_address: Some(key.next_hop_address),
            metric: Some(metric),
            table_id: Some(key.table_id),
        }
    }

    /// Whether this `state: absent` entry selects `route`
    ///
    /// Fields left unset act as wildcards.
    pub fn selects(&self, route: &RouteEntry, defaults: &RouteDefaults) -> bool {
        let table_matches = match self.table_id {
            None => true,
            Some(_) => self.resolved_table(defaults) == route.resolved_table(defaults),
        };
        let metric_matches = match self.metric {
            None => true,
            Some(USE_DEFAULT_METRIC) => route.metric.unwrap_or(defaults.metric) == defaults.metric,
            Some(metric) => route.metric == Some(metric),
        };
        table_matches
            && metric_matches
            && wildcard(&self.destination, &route.destination)
            && wildcard(&self.next_hop_interface, &route.next_hop_interface)
            && wildcard(&self.next_hop_address, &route.next_hop_address)
    }
}

/// A policy routing rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RouteRuleEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_table: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<EntryState>,
}

impl RouteRuleEntry {
    pub fn is_absent(&self) -> bool {
        self.state == Some(EntryState::Absent)
    }

    /// Resolve the priority and table sentinels
    pub fn resolve(&self, defaults: &RouteDefaults) -> RouteRuleEntry {
        let priority = match self.priority {
            None | Some(USE_DEFAULT_PRIORITY) => defaults.rule_priority,
            Some(priority) => priority,
        };
        let route_table = match self.route_table {
            None | Some(USE_DEFAULT_ROUTE_TABLE) => defaults.rule_table,
            Some(table) => table,
        };
        RouteRuleEntry {
            ip_from: self.ip_from.clone(),
            ip_to: self.ip_to.clone(),
            priority: Some(priority),
            route_table: Some(route_table),
            state: None,
        }
    }

    /// Whether this `state: absent` entry selects `rule` (unset fields are wildcards)
    pub fn selects(&self, rule: &RouteRuleEntry, defaults: &RouteDefaults) -> bool {
        let resolved = rule.resolve(defaults);
        let priority_matches = self.priority.is_none()
            || self.resolve(defaults).priority == resolved.priority;
        let table_matches = self.route_table.is_none()
            || self.resolve(defaults).route_table == resolved.route_table;
        priority_matches
            && table_matches
            && wildcard(&self.ip_from, &rule.ip_from)
            && wildcard(&self.ip_to, &rule.ip_to)
    }
}

fn wildcard<T: PartialEq>(pattern: &Option<T>, value: &Option<T>) -> bool {
    pattern.is_none() || pattern == value
}

/// `routes` section: observed routes and the configured list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteSection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub running: Vec<RouteEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Vec<RouteEntry>>,
}

/// `route-rules` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteRuleSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Vec<RouteRuleEntry>>,
}
