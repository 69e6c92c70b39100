//! Contract Test: Rollback
//!
//! A failed apply must leave the host exactly as the cycle found it.
//!
//! Constraints verified:
//! - Failure at unit 3 of 5 reverts units 1-2 and never starts 4-5
//! - Modified and deleted profiles are restored, not just new ones removed
//! - A failed global commit unwinds the interface changes before it
//! - Incomplete rollbacks are reported, not hidden
//! - A timed-out mutation that completes late is still undone

mod common;

use common::*;
use netstate_core::daemon::Fault;
use netstate_core::state::{DnsConfig, NetworkState};
use netstate_core::{
    ApplyCause, DaemonOp, Error, ErrorKind, EngineConfig, Interface, MemoryDaemon,
    OperationTimeouts, Reconciler,
};
use std::sync::Arc;
use std::time::Duration;

fn five_dummies() -> NetworkState {
    (1..=5).fold(NetworkState::new(), |state, i| {
        state.with_interface(dummy(&format!("dummy{i}")))
    })
}

fn sequential(daemon: &MemoryDaemon) -> Reconciler {
    let config = EngineConfig {
        concurrent_waves: false,
        ..fast_engine()
    };
    Reconciler::new(Arc::new(daemon.clone()), config).unwrap().0
}

#[tokio::test]
async fn failure_at_third_unit_restores_snapshot() {
    let daemon = lab_host();
    daemon
        .inject(Fault::reject(DaemonOp::CreateProfile, "dummy3"))
        .await;
    let before = daemon.export().await;

    let err = sequential(&daemon).reconcile(&five_dummies()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Apply);
    let apply = err.as_apply().unwrap();
    assert_eq!(apply.interface, "dummy3");
    assert_eq!(apply.operation, DaemonOp::CreateProfile);
    assert!(matches!(apply.cause, ApplyCause::Rejected { .. }));
    assert!(apply.rolled_back);
    assert!(apply.rollback_failures.is_empty());

    assert_eq!(daemon.export().await, before);
    let targets: Vec<String> = daemon.calls().await.into_iter().map(|c| c.target).collect();
    assert!(!targets.iter().any(|t| t == "dummy4" || t == "dummy5"));
}

#[tokio::test]
async fn modified_and_deleted_profiles_come_back() {
    let daemon = lab_host();
    let (reconciler, _rx) = reconciler_for(&daemon);
    reconciler
        .reconcile(&NetworkState::new().with_interface(dummy("old0")))
        .await
        .unwrap();
    let before = daemon.export().await;

    daemon
        .inject(Fault::reject(DaemonOp::ActivateProfile, "new0"))
        .await;
    let desired = NetworkState::new()
        .with_interface(Interface::absent("old0"))
        .with_interface(ethernet("eth1").with_mtu(9000))
        .with_interface(dummy("new0"));

    let err = sequential(&daemon).reconcile(&desired).await.unwrap_err();
    assert_eq!(err.as_apply().unwrap().interface, "new0");
    assert_eq!(daemon.export().await, before);
}

#[tokio::test]
async fn failed_global_commit_unwinds_interfaces() {
    let daemon = lab_host();
    daemon
        .inject(Fault::reject(DaemonOp::CommitGlobal, "global"))
        .await;
    let before = daemon.export().await;

    let desired = NetworkState::new()
        .with_interface(dummy("dummy0"))
        .with_dns(DnsConfig::new(["192.0.2.53"], ["example.com"]));
    let (reconciler, _rx) = reconciler_for(&daemon);
    let err = reconciler.reconcile(&desired).await.unwrap_err();

    let apply = err.as_apply().unwrap();
    assert_eq!(apply.operation, DaemonOp::CommitGlobal);
    assert_eq!(apply.interface, "dns-resolver");
    assert!(apply.rolled_back);
    assert_eq!(daemon.export().await, before);
}

#[tokio::test]
async fn incomplete_rollback_is_reported() {
    let daemon = lab_host();
    daemon
        .inject(Fault::reject(DaemonOp::ActivateProfile, "dummy2"))
        .await;
    // undoing dummy1 fails too
    daemon
        .inject(Fault::reject(DaemonOp::DeleteProfile, "dummy1"))
        .await;

    let desired = NetworkState::new()
        .with_interface(dummy("dummy1"))
        .with_interface(dummy("dummy2"));
    let err = sequential(&daemon).reconcile(&desired).await.unwrap_err();

    match err {
        Error::Apply(apply) => {
            assert_eq!(apply.interface, "dummy2");
            assert!(!apply.rolled_back);
            assert_eq!(apply.rollback_failures.len(), 1);
            assert_eq!(apply.rollback_failures[0].target, "dummy1");
            assert_eq!(apply.rollback_failures[0].operation, DaemonOp::DeleteProfile);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

fn impatient(daemon: &MemoryDaemon) -> Reconciler {
    let config = EngineConfig {
        concurrent_waves: false,
        timeouts: OperationTimeouts {
            create_ms: 1_000,
            ..Default::default()
        },
        ..fast_engine()
    };
    Reconciler::new(Arc::new(daemon.clone()), config).unwrap().0
}

#[tokio::test(start_paused = true)]
async fn late_create_after_timeout_is_undone() {
    let daemon = lab_host().response_delay(Duration::from_secs(3));
    let before = daemon.export().await;

    let err = impatient(&daemon)
        .reconcile(&NetworkState::new().with_interface(dummy("dummy0")))
        .await
        .unwrap_err();
    let apply = err.as_apply().unwrap();
    assert_eq!(apply.operation, DaemonOp::CreateProfile);
    assert_eq!(
        apply.cause,
        ApplyCause::Timeout {
            after: Duration::from_secs(1)
        }
    );
    assert!(apply.rolled_back);

    // let anything still queued on the daemon land
    tokio::time::sleep(Duration::from_secs(10)).await;
    let after = daemon.export().await;
    assert!(!after.profiles.contains_key("dummy0"));
    assert_eq!(after, before);
}

#[tokio::test(start_paused = true)]
async fn create_that_never_lands_needs_no_compensation() {
    let daemon = lab_host();
    daemon
        .inject(Fault::stall(DaemonOp::CreateProfile, "dummy0"))
        .await;
    let before = daemon.export().await;

    let err = impatient(&daemon)
        .reconcile(&NetworkState::new().with_interface(dummy("dummy0")))
        .await
        .unwrap_err();
    let apply = err.as_apply().unwrap();
    assert!(matches!(apply.cause, ApplyCause::Timeout { .. }));
    // the compensating delete is refused, but the host shows no dummy0
    assert!(apply.rolled_back);
    assert!(apply.rollback_failures.is_empty());
    assert_eq!(daemon.export().await, before);

    let deletes = daemon
        .calls()
        .await
        .into_iter()
        .filter(|call| call.op == DaemonOp::DeleteProfile && call.target == "dummy0")
        .count();
    assert_eq!(deletes, 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_modify_is_confirmed_against_the_host() {
    let daemon = lab_host();
    // the restoring modify stalls as well
    daemon
        .inject(Fault::stall(DaemonOp::ModifyProfile, "eth1"))
        .await;

    let config = EngineConfig {
        concurrent_waves: false,
        timeouts: OperationTimeouts {
            modify_ms: 1_000,
            ..Default::default()
        },
        ..fast_engine()
    };
    let (reconciler, _rx) = Reconciler::new(Arc::new(daemon.clone()), config).unwrap();
    let err = reconciler
        .reconcile(&NetworkState::new().with_interface(ethernet("eth1").with_mtu(9000)))
        .await
        .unwrap_err();

    let apply = err.as_apply().unwrap();
    assert_eq!(apply.operation, DaemonOp::ModifyProfile);
    assert!(matches!(apply.cause, ApplyCause::Timeout { .. }));
    // eth1 was never changed, so the stalled restore is not a failure
    assert!(apply.rolled_back);
}
