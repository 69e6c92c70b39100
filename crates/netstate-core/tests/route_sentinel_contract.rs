//! Contract Test: Routes, Rules & Sentinels
//!
//! Route metric, table and rule priority sentinels mean "the host default"
//! and must never show up as a difference against the value the host
//! reports back.
//!
//! Constraints verified:
//! - A default-metric sentinel equals the host default metric
//! - Omitted metrics inherit the current route's metric
//! - Omitting `routes` leaves host routes alone
//! - `state: absent` entries remove matching routes only

mod common;

use common::*;
use netstate_core::state::schema::{USE_DEFAULT_METRIC, USE_DEFAULT_ROUTE_TABLE};
use netstate_core::state::{EntryState, NetworkState, RouteDefaults, RouteEntry, RouteRuleEntry};

fn defaults() -> RouteDefaults {
    RouteDefaults {
        metric: 425,
        table: 254,
        rule_priority: 30000,
        rule_table: 254,
    }
}

fn default_route() -> RouteEntry {
    RouteEntry::new("0.0.0.0/0", "eth1").via("192.0.2.1")
}

#[tokio::test]
async fn sentinels_resolve_to_host_defaults() {
    let daemon = host_with_defaults(defaults());
    let (reconciler, _rx) = reconciler_for(&daemon);

    let desired = NetworkState::new().with_routes(vec![
        default_route()
            .with_metric(USE_DEFAULT_METRIC)
            .with_table(USE_DEFAULT_ROUTE_TABLE),
    ]);
    let report = reconciler.reconcile(&desired).await.unwrap();
    let added = &report.diff.routes.added;
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].metric, Some(425));
    assert_eq!(added[0].table_id, Some(254));

    let routes = daemon.export().await.global.routes;
    assert_eq!(routes[0].metric, Some(425));

    // the explicit default value and the sentinel are the same route
    let explicit = NetworkState::new().with_routes(vec![default_route().with_metric(425)]);
    assert!(reconciler.plan(&explicit).await.unwrap().is_empty());
    assert!(reconciler.plan(&desired).await.unwrap().is_empty());
}

#[tokio::test]
async fn omitted_metric_inherits_current_route() {
    let daemon = host_with_defaults(defaults());
    let (reconciler, _rx) = reconciler_for(&daemon);
    reconciler
        .reconcile(&NetworkState::new().with_routes(vec![default_route().with_metric(50)]))
        .await
        .unwrap();

    let plan = reconciler
        .plan(&NetworkState::new().with_routes(vec![default_route()]))
        .await
        .unwrap();
    assert!(plan.diff.routes.is_empty());
}

#[tokio::test]
async fn omitted_routes_section_is_left_alone() {
    let daemon = host_with_defaults(defaults());
    let (reconciler, _rx) = reconciler_for(&daemon);
    reconciler
        .reconcile(&NetworkState::new().with_routes(vec![default_route()]))
        .await
        .unwrap();

    let plan = reconciler
        .plan(&NetworkState::new().with_interface(ethernet("eth1").with_mtu(1400)))
        .await
        .unwrap();
    assert!(plan.diff.routes.is_empty());
    assert!(plan.diff.routes.desired.is_none());
    assert!(plan.diff.route_rules.is_empty());
}

#[tokio::test]
async fn absent_entries_remove_only_what_they_select() {
    let daemon = host_with_defaults(defaults());
    let (reconciler, _rx) = reconciler_for(&daemon);
    let lan = RouteEntry::new("198.51.100.0/24", "eth2").via("192.0.2.254");
    reconciler
        .reconcile(&NetworkState::new().with_routes(vec![default_route(), lan.clone()]))
        .await
        .unwrap();

    let removal = RouteEntry {
        state: Some(EntryState::Absent),
        next_hop_interface: Some("eth2".to_string()),
        ..Default::default()
    };
    let report = reconciler
        .reconcile(&NetworkState::new().with_routes(vec![removal]))
        .await
        .unwrap();
    assert_eq!(report.diff.routes.removed.len(), 1);

    let routes = daemon.export().await.global.routes;
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].next_hop_interface.as_deref(), Some("eth1"));
}

#[tokio::test]
async fn route_rules_resolve_priority_and_table() {
    let daemon = host_with_defaults(defaults());
    let (reconciler, _rx) = reconciler_for(&daemon);
    let rule = RouteRuleEntry {
        ip_from: Some("192.0.2.0/24".to_string()),
        priority: Some(-1),
        route_table: Some(0),
        ..Default::default()
    };

    reconciler
        .reconcile(&NetworkState::new().with_route_rules(vec![rule.clone()]))
        .await
        .unwrap();
    let stored = daemon.export().await.global.route_rules;
    assert_eq!(stored[0].priority, Some(30000));
    assert_eq!(stored[0].route_table, Some(254));

    let plan = reconciler
        .plan(&NetworkState::new().with_route_rules(vec![rule]))
        .await
        .unwrap();
    assert!(plan.is_empty());
}

#[tokio::test]
async fn route_via_unknown_interface_is_rejected() {
    let daemon = lab_host();
    let (reconciler, _rx) = reconciler_for(&daemon);
    let desired = NetworkState::new().with_routes(vec![RouteEntry::new("0.0.0.0/0", "eth9")]);

    let err = reconciler.reconcile(&desired).await.unwrap_err();
    assert_eq!(err.kind(), netstate_core::ErrorKind::InvalidDesiredState);
    assert!(daemon.calls().await.is_empty());
}
