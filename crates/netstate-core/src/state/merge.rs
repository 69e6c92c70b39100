//! Desired-over-current merging
//!
//! A desired document only names the fields the caller cares about. Merging
//! fills every omitted (`None`) field from the current value, recursing into
//! nested subtrees. Lists are never merged element-wise: a list that is set
//! replaces the current list wholesale.

use super::subtree::{
    BondConfig, BridgeConfig, EthernetConfig, InterfaceIp, LldpConfig, OvsPortConfig, TeamConfig,
    TeamRunner, VlanConfig, VxlanConfig,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// Fill unset fields of `self` from `current`
pub trait Merge {
    fn merge_from(&mut self, current: &Self);
}

/// Take the current value when the desired one was omitted
pub fn inherit<T: Clone>(field: &mut Option<T>, current: &Option<T>) {
    if field.is_none() {
        *field = current.clone();
    }
}

/// Merge a nested subtree, or inherit it whole when omitted
pub fn merge_subtree<T: Merge + Clone>(field: &mut Option<T>, current: &Option<T>) {
    match (field.as_mut(), current) {
        (Some(desired), Some(current)) => desired.merge_from(current),
        (None, _) => *field = current.clone(),
        (Some(_), None) => {}
    }
}

/// Option maps merge key by key; desired keys win
fn merge_options(
    field: &mut Option<BTreeMap<String, Value>>,
    current: &Option<BTreeMap<String, Value>>,
) {
    match (field.as_mut(), current) {
        (Some(desired), Some(current)) => {
            for (key, value) in current {
                desired.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        (None, _) => *field = current.clone(),
        (Some(_), None) => {}
    }
}

impl Merge for InterfaceIp {
    fn merge_from(&mut self, current: &Self) {
        inherit(&mut self.enabled, &current.enabled);
        inherit(&mut self.dhcp, &current.dhcp);
        inherit(&mut self.autoconf, &current.autoconf);
        inherit(&mut self.address, &current.address);
        inherit(&mut self.auto_dns, &current.auto_dns);
        inherit(&mut self.auto_gateway, &current.auto_gateway);
        inherit(&mut self.auto_routes, &current.auto_routes);
    }
}

impl Merge for LldpConfig {
    fn merge_from(&mut self, current: &Self) {
        inherit(&mut self.enabled, &current.enabled);
        inherit(&mut self.neighbors, &current.neighbors);
    }
}

impl Merge for BondConfig {
    fn merge_from(&mut self, current: &Self) {
        inherit(&mut self.mode, &current.mode);
        inherit(&mut self.slaves, &current.slaves);
        merge_options(&mut self.options, &current.options);
    }
}

impl Merge for BridgeConfig {
    fn merge_from(&mut self, current: &Self) {
        merge_options(&mut self.options, &current.options);
        inherit(&mut self.port, &current.port);
    }
}

impl Merge for VlanConfig {
    fn merge_from(&mut self, current: &Self) {
        inherit(&mut self.id, &current.id);
        inherit(&mut self.base_iface, &current.base_iface);
    }
}

impl Merge for VxlanConfig {
    fn merge_from(&mut self, current: &Self) {
        inherit(&mut self.id, &current.id);
        inherit(&mut self.base_iface, &current.base_iface);
        inherit(&mut self.remote, &current.remote);
        inherit(&mut self.destination_port, &current.destination_port);
    }
}

impl Merge for TeamRunner {
    fn merge_from(&mut self, current: &Self) {
        inherit(&mut self.name, &current.name);
    }
}

impl Merge for TeamConfig {
    fn merge_from(&mut self, current: &Self) {
        inherit(&mut self.ports, &current.ports);
        merge_subtree(&mut self.runner, &current.runner);
    }
}

impl Merge for OvsPortConfig {
    fn merge_from(&mut self, current: &Self) {
        inherit(&mut self.interfaces, &current.interfaces);
    }
}

impl Merge for EthernetConfig {
    fn merge_from(&mut self, current: &Self) {
        inherit(&mut self.auto_negotiation, &current.auto_negotiation);
        inherit(&mut self.speed, &current.speed);
        inherit(&mut self.duplex, &current.duplex);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::subtree::{BondMode, IpAddress};

    #[test]
    fn omitted_fields_come_from_current() {
        let mut desired = InterfaceIp {
            dhcp: Some(true),
            ..Default::default()
        };
        let current = InterfaceIp {
            enabled: Some(true),
            dhcp: Some(false),
            auto_dns: Some(false),
            ..Default::default()
        };

        desired.merge_from(&current);
        assert_eq!(desired.enabled, Some(true));
        assert_eq!(desired.dhcp, Some(true));
        assert_eq!(desired.auto_dns, Some(false));
    }

    #[test]
    fn lists_replace_wholesale() {
        let mut desired = BondConfig {
            slaves: Some(vec!["eth2".to_string()]),
            ..Default::default()
        };
        let current = BondConfig {
            mode: Some(BondMode::ActiveBackup),
            slaves: Some(vec!["eth0".to_string(), "eth1".to_string()]),
            options: None,
        };

        desired.merge_from(&current);
        assert_eq!(desired.slaves, Some(vec!["eth2".to_string()]));
        assert_eq!(desired.mode, Some(BondMode::ActiveBackup));

        let mut empty = InterfaceIp {
            address: Some(Vec::new()),
            ..Default::default()
        };
        let with_addr = InterfaceIp {
            address: Some(vec![IpAddress::new("192.0.2.1".parse().unwrap(), 24)]),
            ..Default::default()
        };
        empty.merge_from(&with_addr);
        assert_eq!(empty.address, Some(Vec::new()));
    }

    #[test]
    fn options_merge_per_key() {
        let mut desired = BridgeConfig {
            options: Some(BTreeMap::from([(
                "stp".to_string(),
                Value::Bool(false),
            )])),
            port: None,
        };
        let current = BridgeConfig {
            options: Some(BTreeMap::from([
                ("stp".to_string(), Value::Bool(true)),
                ("hello-time".to_string(), Value::from(2)),
            ])),
            port: Some(Vec::new()),
        };

        desired.merge_from(&current);
        let options = desired.options.unwrap();
        assert_eq!(options["stp"], Value::Bool(false));
        assert_eq!(options["hello-time"], Value::from(2));
        assert_eq!(desired.port, Some(Vec::new()));
    }

    #[test]
    fn subtree_inherited_when_omitted() {
        let mut field: Option<TeamRunner> = None;
        let current = Some(TeamRunner {
            name: Some("lacp".to_string()),
        });
        merge_subtree(&mut field, &current);
        assert_eq!(field, current);
    }
}
