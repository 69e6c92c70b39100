//! Dependency ordering
//!
//! Builds the "must exist before" graph over the changed units of a diff and
//! sorts it topologically. Ties are broken by desired document order so the
//! result is stable across runs.
//!
//! Edges run from a base to its dependent:
//!
//! - vlan / vxlan `base-iface` -> the vlan / vxlan
//! - bond slave, team port, bridge port, OVS port interface -> its controller
//! - the controller of a base -> devices stacked on that base
//!
//! References to interfaces that are not part of the diff add no edge.

use crate::diff::{DiffAction, DiffUnit, StateDiff};
use crate::error::{Error, InvalidReason, Result};
use std::collections::{BTreeSet, HashMap};

/// Execution order of one diff
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOrder {
    /// Every changed unit, bases first
    pub creation: Vec<String>,
    /// Exact reverse of `creation`
    pub deletion: Vec<String>,
    /// Units grouped by dependency depth; no edges inside a wave
    pub creation_waves: Vec<Vec<String>>,
    /// Waves in reverse, dependents first
    pub deletion_waves: Vec<Vec<String>>,
}

impl ApplyOrder {
    /// Position of `name` in the creation order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.creation.iter().position(|n| n == name)
    }
}

/// Order the changed units of `diff`
///
/// # Errors
///
/// [`Error::InvalidDesiredState`] with [`InvalidReason::DependencyCycle`]
/// when the dependency graph has a cycle.
pub fn order(diff: &StateDiff) -> Result<ApplyOrder> {
    let units: Vec<&DiffUnit> = diff.changed_units().collect();
    let index: HashMap<&str, usize> = units
        .iter()
        .enumerate()
        .map(|(i, unit)| (unit.name.as_str(), i))
        .collect();

    let edges = build_edges(&units, &index);
    let mut indegree = vec![0usize; units.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); units.len()];
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); units.len()];
    for &(from, to) in &edges {
        successors[from].push(to);
        predecessors[to].push(from);
        indegree[to] += 1;
    }

    let mut ready: BTreeSet<usize> = (0..units.len()).filter(|&i| indegree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(units.len());
    while let Some(next) = ready.pop_first() {
        sorted.push(next);
        for &succ in &successors[next] {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }

    if sorted.len() < units.len() {
        let members: Vec<String> = (0..units.len())
            .filter(|&i| indegree[i] > 0)
            .map(|i| units[i].name.clone())
            .collect();
        let entity = members.first().cloned().unwrap_or_default();
        return Err(Error::invalid(
            entity,
            InvalidReason::DependencyCycle { members },
        ));
    }

    let mut depth = vec![0usize; units.len()];
    for &node in &sorted {
        depth[node] = predecessors[node]
            .iter()
            .map(|&pred| depth[pred] + 1)
            .max()
            .unwrap_or(0);
    }
    let wave_count = depth.iter().copied().max().map_or(0, |d| d + 1);
    let mut creation_waves: Vec<Vec<String>> = vec![Vec::new(); wave_count];
    for &node in &sorted {
        creation_waves[depth[node]].push(units[node].name.clone());
    }

    let creation: Vec<String> = sorted.iter().map(|&i| units[i].name.clone()).collect();
    let deletion = creation.iter().rev().cloned().collect();
    let deletion_waves = creation_waves
        .iter()
        .rev()
        .map(|wave| wave.iter().rev().cloned().collect())
        .collect();

    Ok(ApplyOrder {
        creation,
        deletion,
        creation_waves,
        deletion_waves,
    })
}

fn build_edges(units: &[&DiffUnit], index: &HashMap<&str, usize>) -> BTreeSet<(usize, usize)> {
    let mut edges = BTreeSet::new();

    // member -> controller, for controllers that are part of the diff
    let mut controller_of: HashMap<String, usize> = HashMap::new();
    for (i, unit) in units.iter().enumerate() {
        if let Some(subject) = unit.subject() {
            for member in subject.members() {
                controller_of.insert(member, i);
            }
        }
    }

    for (i, unit) in units.iter().enumerate() {
        let Some(subject) = unit.subject() else {
            continue;
        };
        for dep in subject.dependencies() {
            if let Some(&from) = index.get(dep.as_str()) {
                if from != i {
                    edges.insert((from, i));
                }
            }
        }
        if let Some(base) = subject.config.base_iface() {
            if let Some(&controller) = controller_of.get(base) {
                if controller != i {
                    edges.insert((controller, i));
                }
            }
        }
    }

    edges
}

/// Units of `diff` named in `sequence` whose action is one of `actions`
pub fn select<'a>(
    diff: &'a StateDiff,
    sequence: &[String],
    actions: &[DiffAction],
) -> Vec<&'a DiffUnit> {
    sequence
        .iter()
        .filter_map(|name| diff.unit(name))
        .filter(|unit| actions.contains(&unit.action))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        BondConfig, Interface, InterfaceType, TypeConfig, VlanConfig,
    };

    fn create(iface: Interface) -> DiffUnit {
        DiffUnit {
            name: iface.name.clone(),
            action: DiffAction::Create,
            desired: Some(iface.with_defaults()),
            current: None,
        }
    }

    fn vlan(name: &str, id: u16, base: &str) -> Interface {
        Interface::new(name, InterfaceType::Vlan)
            .with_config(TypeConfig::Vlan(VlanConfig::new(id, base)))
    }

    fn bond(name: &str, slaves: &[&str]) -> Interface {
        Interface::new(name, InterfaceType::Bond).with_config(TypeConfig::Bond(BondConfig {
            slaves: Some(slaves.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }))
    }

    fn diff_of(units: Vec<DiffUnit>) -> StateDiff {
        StateDiff {
            units,
            ..Default::default()
        }
    }

    #[test]
    fn vlan_and_bond_follow_their_base() {
        let diff = diff_of(vec![
            create(vlan("eth1.101", 101, "eth1")),
            create(bond("bond0", &["eth1"])),
            create(Interface::new("eth1", InterfaceType::Ethernet)),
        ]);

        let order = order(&diff).unwrap();
        assert_eq!(order.creation, vec!["eth1", "bond0", "eth1.101"]);
        assert_eq!(order.deletion, vec!["eth1.101", "bond0", "eth1"]);
        assert_eq!(
            order.creation_waves,
            vec![vec!["eth1".to_string()], vec!["bond0".to_string()], vec!["eth1.101".to_string()]]
        );
    }

    #[test]
    fn independent_units_share_a_wave_in_document_order() {
        let diff = diff_of(vec![
            create(Interface::new("dummy1", InterfaceType::Dummy)),
            create(Interface::new("dummy0", InterfaceType::Dummy)),
            create(vlan("dummy0.7", 7, "dummy0")),
        ]);

        let order = order(&diff).unwrap();
        assert_eq!(order.creation, vec!["dummy1", "dummy0", "dummy0.7"]);
        assert_eq!(order.creation_waves[0], vec!["dummy1", "dummy0"]);
        assert_eq!(order.deletion_waves[0], vec!["dummy0.7"]);
        assert_eq!(order.deletion_waves[1], vec!["dummy0", "dummy1"]);
    }

    #[test]
    fn mutual_bases_are_a_cycle() {
        let diff = diff_of(vec![create(vlan("a", 1, "b")), create(vlan("b", 2, "a"))]);
        let err = order(&diff).unwrap_err();
        match err {
            Error::InvalidDesiredState {
                reason: InvalidReason::DependencyCycle { members },
                ..
            } => assert_eq!(members, vec!["a", "b"]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn references_outside_the_diff_add_no_edges() {
        let diff = diff_of(vec![create(vlan("eth9.3", 3, "eth9"))]);
        let order = order(&diff).unwrap();
        assert_eq!(order.creation, vec!["eth9.3"]);
    }

    #[test]
    fn unchanged_units_are_not_ordered() {
        let mut unchanged = create(Interface::new("eth1", InterfaceType::Ethernet));
        unchanged.action = DiffAction::Unchanged;
        let diff = diff_of(vec![unchanged, create(vlan("eth1.5", 5, "eth1"))]);
        let order = order(&diff).unwrap();
        assert_eq!(order.creation, vec!["eth1.5"]);
    }
}
