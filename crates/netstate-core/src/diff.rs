//! Difference calculation
//!
//! Compares a (possibly partial) desired document with a fully populated
//! current document and produces one [`DiffUnit`] per desired interface
//! plus route, route-rule and DNS changes.
//!
//! ## Rules
//!
//! - Interfaces that only exist in the current document are never touched.
//! - Omitted fields inherit the current value; set fields win.
//! - An omitted `routes` / `route-rules` / `dns-resolver` section leaves
//!   the corresponding host configuration alone.
//! - Route sentinels are resolved against host defaults before comparing.

use crate::error::{Error, InvalidReason, Result};
use crate::state::schema::{section, SCHEMA_VERSION};
use crate::state::{
    DnsConfig, GlobalState, Interface, InterfaceType, Merge, NetworkState, RouteDefaults,
    RouteEntry, RouteRuleEntry, TypeConfig,
};
use std::collections::{HashMap, HashSet};

/// Action computed for one interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffAction {
    Create,
    Modify,
    Delete,
    Unchanged,
}

/// One interface's computed change
#[derive(Debug, Clone, PartialEq)]
pub struct DiffUnit {
    pub name: String,
    pub action: DiffAction,
    /// Fully merged target configuration (create, modify, unchanged)
    pub desired: Option<Interface>,
    /// Current configuration when the interface exists
    pub current: Option<Interface>,
}

impl DiffUnit {
    /// A create over an existing interface of another type
    pub fn is_type_change(&self) -> bool {
        self.action == DiffAction::Create && self.current.is_some()
    }

    pub fn is_change(&self) -> bool {
        self.action != DiffAction::Unchanged
    }

    /// Configuration that defines this unit's dependency edges
    pub fn subject(&self) -> Option<&Interface> {
        match self.action {
            DiffAction::Delete => self.current.as_ref(),
            _ => self.desired.as_ref(),
        }
    }
}

/// Change to an ordered list of routes or rules
#[derive(Debug, Clone, PartialEq)]
pub struct ListDiff<T> {
    /// Resolved list the host should end up with; `None` when untouched
    pub desired: Option<Vec<T>>,
    pub added: Vec<T>,
    pub removed: Vec<T>,
}

impl<T> Default for ListDiff<T> {
    fn default() -> Self {
        Self {
            desired: None,
            added: Vec::new(),
            removed: Vec::new(),
        }
    }
}

impl<T> ListDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub type RouteDiff = ListDiff<RouteEntry>;
pub type RouteRuleDiff = ListDiff<RouteRuleEntry>;

/// Resolver change, order-sensitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsChange {
    pub previous: DnsConfig,
    pub desired: DnsConfig,
}

/// Everything one cycle would change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDiff {
    /// One unit per desired interface, in desired document order
    pub units: Vec<DiffUnit>,
    pub routes: RouteDiff,
    pub route_rules: RouteRuleDiff,
    pub dns: Option<DnsChange>,
}

impl StateDiff {
    /// Whether applying would change nothing
    pub fn is_empty(&self) -> bool {
        !self.units.iter().any(DiffUnit::is_change) && !self.has_global_change()
    }

    pub fn has_global_change(&self) -> bool {
        !self.routes.is_empty() || !self.route_rules.is_empty() || self.dns.is_some()
    }

    pub fn changed_units(&self) -> impl Iterator<Item = &DiffUnit> {
        self.units.iter().filter(|unit| unit.is_change())
    }

    pub fn unit(&self, name: &str) -> Option<&DiffUnit> {
        self.units.iter().find(|unit| unit.name == name)
    }

    /// Names of everything still to change: interfaces, then global sections
    pub fn divergent(&self) -> Vec<String> {
        let mut names: Vec<String> = self.changed_units().map(|u| u.name.clone()).collect();
        if !self.routes.is_empty() {
            names.push(section::ROUTES.to_string());
        }
        if !self.route_rules.is_empty() {
            names.push(section::ROUTE_RULES.to_string());
        }
        if self.dns.is_some() {
            names.push(section::DNS_RESOLVER.to_string());
        }
        names
    }

    /// Global configuration to commit, starting from `current`
    pub fn global_target(&self, current: &GlobalState) -> GlobalState {
        GlobalState {
            routes: self
                .routes
                .desired
                .clone()
                .unwrap_or_else(|| current.routes.clone()),
            route_rules: self
                .route_rules
                .desired
                .clone()
                .unwrap_or_else(|| current.route_rules.clone()),
            dns: self
                .dns
                .as_ref()
                .map(|change| change.desired.clone())
                .unwrap_or_else(|| current.dns.clone()),
        }
    }
}

/// Compute the diff between `desired` and `current`
///
/// # Errors
///
/// [`Error::InvalidDesiredState`] when the desired document fails
/// validation; nothing is computed in that case.
pub fn compute(
    desired: &NetworkState,
    current: &NetworkState,
    defaults: &RouteDefaults,
) -> Result<StateDiff> {
    validate(desired, current)?;

    let by_name: HashMap<&str, &Interface> = current
        .interfaces
        .iter()
        .map(|iface| (iface.name.as_str(), iface))
        .collect();

    let units = desired
        .interfaces
        .iter()
        .map(|iface| {
            let current = by_name.get(iface.name.as_str()).copied();
            diff_interface(&iface.typed_against(current), current)
        })
        .collect();

    let current_global = current.global();
    Ok(StateDiff {
        units,
        routes: diff_routes(desired.route_config(), &current_global.routes, defaults),
        route_rules: diff_route_rules(
            desired.route_rule_config(),
            &current_global.route_rules,
            defaults,
        ),
        dns: diff_dns(desired.dns_config(), &current_global.dns),
    })
}

fn diff_interface(desired: &Interface, current: Option<&Interface>) -> DiffUnit {
    let name = desired.name.clone();
    let Some(current) = current else {
        if desired.is_absent() {
            return DiffUnit {
                name,
                action: DiffAction::Unchanged,
                desired: None,
                current: None,
            };
        }
        return DiffUnit {
            name,
            action: DiffAction::Create,
            desired: Some(desired.with_defaults()),
            current: None,
        };
    };

    let current = current.without_observed();
    if desired.is_absent() {
        return DiffUnit {
            name,
            action: DiffAction::Delete,
            desired: None,
            current: Some(current),
        };
    }

    let declared = desired.iface_type();
    if declared != InterfaceType::Unknown && declared != current.iface_type() {
        return DiffUnit {
            name,
            action: DiffAction::Create,
            desired: Some(desired.with_defaults()),
            current: Some(current),
        };
    }

    let merged = desired.merged_over(&current).without_observed();
    let action = if merged == current {
        DiffAction::Unchanged
    } else {
        DiffAction::Modify
    };
    DiffUnit {
        name,
        action,
        desired: Some(merged),
        current: Some(current),
    }
}

fn validate(desired: &NetworkState, current: &NetworkState) -> Result<()> {
    if let Some(version) = &desired.schema_version {
        if version != SCHEMA_VERSION {
            return Err(Error::invalid(
                "schema-version",
                InvalidReason::UnsupportedSchemaVersion {
                    found: version.clone(),
                },
            ));
        }
    }

    let current_names: HashMap<&str, &Interface> = current
        .interfaces
        .iter()
        .map(|iface| (iface.name.as_str(), iface))
        .collect();

    let mut seen = HashSet::new();
    for iface in &desired.interfaces {
        if !seen.insert(iface.name.as_str()) {
            return Err(Error::invalid(&iface.name, InvalidReason::DuplicateName));
        }
        let current = current_names.get(iface.name.as_str()).copied();
        validate_interface(&iface.typed_against(current), current)?;
    }

    if let Some(routes) = desired.route_config() {
        let removed: HashSet<&str> = desired
            .interfaces
            .iter()
            .filter(|iface| iface.is_absent())
            .map(|iface| iface.name.as_str())
            .collect();
        for route in routes.iter().filter(|route| !route.is_absent()) {
            if route.destination.is_none() {
                return Err(Error::invalid(section::ROUTES, InvalidReason::MissingDestination));
            }
            let Some(next_hop) = route.next_hop_interface.as_deref() else {
                continue;
            };
            let kept = current_names.contains_key(next_hop) || seen.contains(next_hop);
            if !kept || removed.contains(next_hop) {
                return Err(Error::invalid(
                    section::ROUTES,
                    InvalidReason::UnknownNextHop {
                        interface: next_hop.to_string(),
                    },
                ));
            }
        }
    }

    Ok(())
}

fn validate_interface(iface: &Interface, current: Option<&Interface>) -> Result<()> {
    if iface.is_absent() {
        if iface.has_configuration() {
            return Err(Error::invalid(
                &iface.name,
                InvalidReason::AbsentWithConfiguration,
            ));
        }
        return Ok(());
    }

    if let Some(subtree) = iface.foreign_subtrees().first() {
        return Err(Error::invalid(
            &iface.name,
            InvalidReason::SubtreeMismatch {
                subtree: subtree.clone(),
                iface_type: iface.iface_type().to_string(),
            },
        ));
    }

    let declared = iface.iface_type();
    let created = match current {
        None => true,
        Some(current) => declared != InterfaceType::Unknown && declared != current.iface_type(),
    };
    if !created {
        return Ok(());
    }
    if declared == InterfaceType::Unknown {
        return Err(Error::invalid(&iface.name, InvalidReason::MissingType));
    }

    let missing = |field: &str| -> Result<()> {
        Err(Error::invalid(
            &iface.name,
            InvalidReason::MissingField {
                field: field.to_string(),
            },
        ))
    };
    match &iface.config {
        TypeConfig::Vlan(vlan) if vlan.id.is_none() => missing("vlan.id"),
        TypeConfig::Vlan(vlan) if vlan.base_iface.is_none() => missing("vlan.base-iface"),
        TypeConfig::Vxlan(vxlan) if vxlan.id.is_none() => missing("vxlan.id"),
        TypeConfig::Vxlan(vxlan) if vxlan.base_iface.is_none() => missing("vxlan.base-iface"),
        _ => Ok(()),
    }
}

/// A list made only of `state: absent` entries edits the current list;
/// any other list replaces it.
fn diff_routes(
    desired: Option<&[RouteEntry]>,
    current: &[RouteEntry],
    defaults: &RouteDefaults,
) -> RouteDiff {
    let Some(desired) = desired else {
        return RouteDiff::default();
    };
    let current: Vec<RouteEntry> = current.iter().map(|r| r.resolve(defaults, &[])).collect();
    let (absent, wanted): (Vec<&RouteEntry>, Vec<&RouteEntry>) =
        desired.iter().partition(|route| route.is_absent());

    let target: Vec<RouteEntry> = if wanted.is_empty() && !absent.is_empty() {
        current
            .iter()
            .filter(|route| !absent.iter().any(|a| a.selects(route, defaults)))
            .cloned()
            .collect()
    } else {
        let mut target: Vec<RouteEntry> = Vec::new();
        for route in wanted {
            let resolved = route.resolve(defaults, &current);
            let key = resolved.key(defaults);
            // a later entry with the same identity replaces the earlier one
            target.retain(|existing| existing.key(defaults) != key);
            target.push(resolved);
        }
        target
    };

    list_diff(target, &current)
}

fn diff_route_rules(
    desired: Option<&[RouteRuleEntry]>,
    current: &[RouteRuleEntry],
    defaults: &RouteDefaults,
) -> RouteRuleDiff {
    let Some(desired) = desired else {
        return RouteRuleDiff::default();
    };
    let current: Vec<RouteRuleEntry> = current.iter().map(|r| r.resolve(defaults)).collect();
    let (absent, wanted): (Vec<&RouteRuleEntry>, Vec<&RouteRuleEntry>) =
        desired.iter().partition(|rule| rule.is_absent());

    let target: Vec<RouteRuleEntry> = if wanted.is_empty() && !absent.is_empty() {
        current
            .iter()
            .filter(|rule| !absent.iter().any(|a| a.selects(rule, defaults)))
            .cloned()
            .collect()
    } else {
        let mut target: Vec<RouteRuleEntry> = Vec::new();
        for rule in wanted {
            let resolved = rule.resolve(defaults);
            if !target.contains(&resolved) {
                target.push(resolved);
            }
        }
        target
    };

    list_diff(target, &current)
}

fn list_diff<T: Clone + PartialEq>(target: Vec<T>, current: &[T]) -> ListDiff<T> {
    let added = target
        .iter()
        .filter(|entry| !current.contains(entry))
        .cloned()
        .collect();
    let removed = current
        .iter()
        .filter(|entry| !target.contains(entry))
        .cloned()
        .collect();
    ListDiff {
        desired: Some(target),
        added,
        removed,
    }
}

fn diff_dns(desired: Option<&DnsConfig>, current: &DnsConfig) -> Option<DnsChange> {
    let desired = desired?;
    let previous = current.normalized();
    let mut merged = desired.clone();
    merged.merge_from(&previous);
    let merged = merged.normalized();
    (merged != previous).then_some(DnsChange {
        previous,
        desired: merged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::state::schema::USE_DEFAULT_METRIC;
    use crate::state::{InterfaceIp, InterfaceState, VlanConfig};

    fn current_host() -> NetworkState {
        let eth1 = Interface::new("eth1", InterfaceType::Ethernet)
            .with_state(InterfaceState::Down)
            .with_defaults();
        let eth2 = Interface::new("eth2", InterfaceType::Ethernet).with_defaults();
        NetworkState::from_parts(
            vec![eth1, eth2],
            GlobalState {
                routes: vec![
                    RouteEntry::new("0.0.0.0/0", "eth2")
                        .via("192.0.2.1")
                        .with_metric(100)
                        .with_table(254),
                ],
                route_rules: Vec::new(),
                dns: DnsConfig::new(["192.0.2.53"], ["example.com"]),
            },
        )
    }

    fn compute_against_host(desired: &NetworkState) -> Result<StateDiff> {
        compute(desired, &current_host(), &RouteDefaults::default())
    }

    #[test]
    fn dhcp_on_down_ethernet_is_one_modify() {
        let desired = NetworkState::new().with_interface(
            Interface::new("eth1", InterfaceType::Ethernet)
                .with_state(InterfaceState::Up)
                .with_ipv4(InterfaceIp::dhcp()),
        );

        let diff = compute_against_host(&desired).unwrap();
        assert_eq!(diff.units.len(), 1);
        let unit = &diff.units[0];
        assert_eq!(unit.action, DiffAction::Modify);
        let merged = unit.desired.as_ref().unwrap();
        assert_eq!(merged.state, Some(InterfaceState::Up));
        assert_eq!(merged.ipv4.as_ref().unwrap().dhcp, Some(true));
        assert_eq!(merged.mtu, Some(1500));
        assert!(!diff.has_global_change());
    }

    #[test]
    fn matching_desired_is_unchanged() {
        let desired = NetworkState::new()
            .with_interface(Interface::new("eth2", InterfaceType::Ethernet).with_mtu(1500));
        let diff = compute_against_host(&desired).unwrap();
        assert_eq!(diff.units[0].action, DiffAction::Unchanged);
        assert!(diff.is_empty());
    }

    #[test]
    fn unmentioned_interfaces_are_left_alone() {
        let diff = compute_against_host(&NetworkState::new()).unwrap();
        assert!(diff.units.is_empty());
        assert!(diff.is_empty());
    }

    #[test]
    fn absent_interface_is_deleted_or_ignored() {
        let desired = NetworkState::new()
            .with_interface(Interface::absent("eth2"))
            .with_interface(Interface::absent("ghost0"));
        let diff = compute_against_host(&desired).unwrap();
        assert_eq!(diff.units[0].action, DiffAction::Delete);
        assert!(diff.units[0].current.is_some());
        assert_eq!(diff.units[1].action, DiffAction::Unchanged);
    }

    #[test]
    fn new_vlan_is_created_with_defaults() {
        let desired = NetworkState::new().with_interface(
            Interface::new("eth1.101", InterfaceType::Vlan)
                .with_config(TypeConfig::Vlan(VlanConfig::new(101, "eth1"))),
        );
        let diff = compute_against_host(&desired).unwrap();
        let unit = diff.unit("eth1.101").unwrap();
        assert_eq!(unit.action, DiffAction::Create);
        assert!(!unit.is_type_change());
        assert_eq!(unit.desired.as_ref().unwrap().state, Some(InterfaceState::Up));
    }

    #[test]
    fn type_change_recreates() {
        let desired = NetworkState::new().with_interface(Interface::new("eth2", InterfaceType::Dummy));
        let diff = compute_against_host(&desired).unwrap();
        assert!(diff.units[0].is_type_change());
    }

    #[test]
    fn invalid_documents_are_rejected() {
        let dup = NetworkState::new()
            .with_interface(Interface::new("eth1", InterfaceType::Ethernet))
            .with_interface(Interface::new("eth1", InterfaceType::Ethernet));
        let err = compute_against_host(&dup).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidDesiredState {
                reason: InvalidReason::DuplicateName,
                ..
            }
        ));

        let absent_with_mtu = NetworkState::new().with_interface(Interface::absent("eth1").with_mtu(9000));
        let err = compute_against_host(&absent_with_mtu).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDesiredState);

        let untyped = NetworkState::new().with_interface(Interface::new("new0", InterfaceType::Unknown));
        assert!(matches!(
            compute_against_host(&untyped).unwrap_err(),
            Error::InvalidDesiredState {
                reason: InvalidReason::MissingType,
                ..
            }
        ));

        let vlan_without_base = NetworkState::new().with_interface(
            Interface::new("v5", InterfaceType::Vlan).with_config(TypeConfig::Vlan(VlanConfig {
                id: Some(5),
                base_iface: None,
            })),
        );
        assert!(matches!(
            compute_against_host(&vlan_without_base).unwrap_err(),
            Error::InvalidDesiredState {
                reason: InvalidReason::MissingField { .. },
                ..
            }
        ));

        let mut bad_version = NetworkState::new();
        bad_version.schema_version = Some("2".to_string());
        assert_eq!(
            compute_against_host(&bad_version).unwrap_err().kind(),
            ErrorKind::InvalidDesiredState
        );
    }

    #[test]
    fn mismatched_subtree_is_rejected() {
        let desired = NetworkState::from_json_str(
            r#"{"interfaces": [{"name": "eth1", "type": "ethernet", "vlan": {"id": 3}}]}"#,
        )
        .unwrap();
        assert!(matches!(
            compute_against_host(&desired).unwrap_err(),
            Error::InvalidDesiredState {
                reason: InvalidReason::SubtreeMismatch { .. },
                ..
            }
        ));
    }

    #[test]
    fn omitted_routes_leave_routes_alone() {
        let desired = NetworkState::new()
            .with_interface(Interface::new("eth2", InterfaceType::Ethernet));
        let diff = compute_against_host(&desired).unwrap();
        assert!(diff.routes.is_empty());
        assert!(diff.routes.desired.is_none());
    }

    #[test]
    fn sentinel_route_matches_default_metric() {
        let desired = NetworkState::new().with_routes(vec![
            RouteEntry::new("0.0.0.0/0", "eth2")
                .via("192.0.2.1")
                .with_metric(USE_DEFAULT_METRIC)
                .with_table(0),
        ]);
        let diff = compute_against_host(&desired).unwrap();
        assert!(diff.routes.is_empty());
        assert!(diff.is_empty());
    }

    #[test]
    fn route_list_is_authoritative() {
        let desired = NetworkState::new().with_routes(vec![
            RouteEntry::new("198.51.100.0/24", "eth1").via("192.0.2.254"),
        ]);
        let diff = compute_against_host(&desired).unwrap();
        assert_eq!(diff.routes.added.len(), 1);
        assert_eq!(diff.routes.removed.len(), 1);
        assert_eq!(diff.divergent(), vec!["routes".to_string()]);
    }

    #[test]
    fn absent_only_routes_subtract() {
        let desired = NetworkState::new().with_routes(vec![RouteEntry {
            state: Some(crate::state::EntryState::Absent),
            destination: Some("0.0.0.0/0".to_string()),
            ..Default::default()
        }]);
        let diff = compute_against_host(&desired).unwrap();
        assert_eq!(diff.routes.removed.len(), 1);
        assert_eq!(diff.routes.desired, Some(Vec::new()));
    }

    #[test]
    fn route_to_unknown_interface_is_rejected() {
        let desired = NetworkState::new()
            .with_routes(vec![RouteEntry::new("10.0.0.0/8", "nope0")]);
        assert!(matches!(
            compute_against_host(&desired).unwrap_err(),
            Error::InvalidDesiredState {
                reason: InvalidReason::UnknownNextHop { .. },
                ..
            }
        ));
    }

    #[test]
    fn dns_order_change_is_detected() {
        let reordered = NetworkState::new().with_dns(DnsConfig {
            server: Some(vec!["198.51.100.53".to_string(), "192.0.2.53".to_string()]),
            search: None,
        });
        let diff = compute_against_host(&reordered).unwrap();
        let change = diff.dns.unwrap();
        assert_eq!(change.desired.search, Some(vec!["example.com".to_string()]));

        let same = NetworkState::new().with_dns(DnsConfig {
            server: Some(vec!["192.0.2.53".to_string()]),
            search: None,
        });
        assert!(compute_against_host(&same).unwrap().dns.is_none());
    }

    #[test]
    fn empty_rule_list_removes_all_rules() {
        let mut host = current_host();
        host.route_rules = Some(crate::state::RouteRuleSection {
            config: Some(vec![RouteRuleEntry {
                ip_from: Some("192.0.2.0/24".to_string()),
                priority: Some(1000),
                route_table: Some(100),
                ..Default::default()
            }]),
        });
        let desired = NetworkState::new().with_route_rules(Vec::new());
        let diff = compute(&desired, &host, &RouteDefaults::default()).unwrap();
        assert_eq!(diff.route_rules.removed.len(), 1);
        assert_eq!(diff.route_rules.desired, Some(Vec::new()));
    }
}
