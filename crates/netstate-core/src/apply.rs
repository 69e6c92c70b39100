//! Apply coordination
//!
//! Drives the daemon through the ordered units of a diff:
//!
//! 1. delete units, dependents first
//! 2. create and modify units, bases first
//! 3. the global commit (routes, route rules, DNS)
//!
//! Every completed daemon mutation is journaled. A mutation that timed out
//! is journaled too, since the daemon may still carry it out; its undo is
//! confirmed against the host when the compensating call is refused. On the
//! first failure no further unit is started, units already in flight in the
//! same wave are awaited, and the journal is unwound in reverse so the host
//! returns to the pre-cycle snapshot.

use crate::config::OperationTimeouts;
use crate::diff::{DiffAction, DiffUnit, StateDiff};
use crate::error::{ApplyCause, ApplyError, RollbackFailure};
use crate::order::{self, ApplyOrder};
use crate::snapshot::Snapshot;
use crate::state::{GlobalState, Interface, InterfaceState, InterfaceType};
use crate::traits::{Completion, DaemonOp, NetworkDaemon};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// One completed daemon mutation
#[derive(Debug, Clone)]
enum JournalEntry {
    Created { name: String, iface_type: InterfaceType },
    Modified { previous: Interface },
    Deleted { previous: Interface },
    Activated { name: String, iface_type: InterfaceType, was_active: bool },
    Deactivated { name: String, iface_type: InterfaceType, was_active: bool },
    GlobalCommitted { previous: GlobalState },
}

/// A journal entry and whether the daemon confirmed it
#[derive(Debug, Clone)]
struct Journaled {
    entry: JournalEntry,
    confirmed: bool,
}

#[derive(Debug)]
struct Failure {
    interface: String,
    operation: DaemonOp,
    cause: ApplyCause,
}

/// What a successful apply did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Units applied, in execution order
    pub applied: Vec<String>,
    /// Number of daemon mutations completed
    pub operations: usize,
    pub global_committed: bool,
}

/// Issues daemon operations with per-operation budgets
#[derive(Clone)]
struct Executor {
    daemon: Arc<dyn NetworkDaemon>,
    timeouts: OperationTimeouts,
}

impl Executor {
    async fn settle(
        &self,
        op: DaemonOp,
        target: &str,
        iface_type: InterfaceType,
        submitted: crate::Result<Completion>,
    ) -> Result<(), Failure> {
        let timeout = self.timeouts.for_op(op, iface_type);
        debug!("{} {} (budget {:?})", op, target, timeout);
        let result = match submitted {
            Ok(completion) => completion.wait(timeout).await,
            Err(err) => Err(ApplyCause::Unavailable {
                message: err.to_string(),
            }),
        };
        result.map_err(|cause| Failure {
            interface: target.to_string(),
            operation: op,
            cause,
        })
    }

    /// Settle a mutation and journal it
    ///
    /// A timed-out or abandoned mutation may still land later, so it is
    /// journaled unconfirmed and compensated like a completed one.
    async fn record(
        &self,
        op: DaemonOp,
        target: &str,
        iface_type: InterfaceType,
        submitted: crate::Result<Completion>,
        entry: JournalEntry,
        journal: &mut Vec<Journaled>,
    ) -> Result<(), Failure> {
        match self.settle(op, target, iface_type, submitted).await {
            Ok(()) => {
                journal.push(Journaled {
                    entry,
                    confirmed: true,
                });
                Ok(())
            }
            Err(failure) => {
                if matches!(
                    failure.cause,
                    ApplyCause::Timeout { .. } | ApplyCause::Abandoned
                ) {
                    warn!("{} {} outcome unknown, will compensate", op, target);
                    journal.push(Journaled {
                        entry,
                        confirmed: false,
                    });
                }
                Err(failure)
            }
        }
    }

    async fn apply_unit(
        &self,
        unit: &DiffUnit,
        journal: &mut Vec<Journaled>,
    ) -> Result<(), Failure> {
        match unit.action {
            DiffAction::Delete => {
                if let Some(current) = &unit.current {
                    self.remove(current, journal).await?;
                }
            }
            DiffAction::Create => {
                if let Some(current) = unit.current.as_ref().filter(|_| unit.is_type_change()) {
                    self.remove(current, journal).await?;
                }
                if let Some(profile) = &unit.desired {
                    self.create(profile, journal).await?;
                }
            }
            DiffAction::Modify => {
                if let (Some(profile), Some(current)) = (&unit.desired, &unit.current) {
                    self.modify(profile, current, journal).await?;
                }
            }
            DiffAction::Unchanged => {}
        }
        Ok(())
    }

    async fn remove(&self, current: &Interface, journal: &mut Vec<Journaled>) -> Result<(), Failure> {
        let name = current.name.as_str();
        let iface_type = current.iface_type();
        let was_active = current.effective_state() == InterfaceState::Up;

        let submitted = self.daemon.deactivate_device(name).await;
        let entry = JournalEntry::Deactivated {
            name: name.to_string(),
            iface_type,
            was_active,
        };
        self.record(DaemonOp::DeactivateDevice, name, iface_type, submitted, entry, journal)
            .await?;

        let submitted = self.daemon.delete_profile(name).await;
        let entry = JournalEntry::Deleted {
            previous: current.clone(),
        };
        self.record(DaemonOp::DeleteProfile, name, iface_type, submitted, entry, journal)
            .await
    }

    async fn create(&self, profile: &Interface, journal: &mut Vec<Journaled>) -> Result<(), Failure> {
        let name = profile.name.as_str();
        let iface_type = profile.iface_type();

        let submitted = self.daemon.create_profile(profile).await;
        let entry = JournalEntry::Created {
            name: name.to_string(),
            iface_type,
        };
        self.record(DaemonOp::CreateProfile, name, iface_type, submitted, entry, journal)
            .await?;

        if profile.effective_state() == InterfaceState::Up {
            let submitted = self.daemon.activate_profile(name).await;
            let entry = JournalEntry::Activated {
                name: name.to_string(),
                iface_type,
                was_active: false,
            };
            self.record(DaemonOp::ActivateProfile, name, iface_type, submitted, entry, journal)
                .await?;
        }
        Ok(())
    }

    async fn modify(
        &self,
        profile: &Interface,
        current: &Interface,
        journal: &mut Vec<Journaled>,
    ) -> Result<(), Failure> {
        let name = profile.name.as_str();
        let iface_type = profile.iface_type();
        let was_active = current.effective_state() == InterfaceState::Up;

        let submitted = self.daemon.modify_profile(profile).await;
        let entry = JournalEntry::Modified {
            previous: current.clone(),
        };
        self.record(DaemonOp::ModifyProfile, name, iface_type, submitted, entry, journal)
            .await?;

        match profile.effective_state() {
            InterfaceState::Up => {
                let submitted = self.daemon.activate_profile(name).await;
                let entry = JournalEntry::Activated {
                    name: name.to_string(),
                    iface_type,
                    was_active,
                };
                self.record(DaemonOp::ActivateProfile, name, iface_type, submitted, entry, journal)
                    .await?;
            }
            InterfaceState::Down => {
                let submitted = self.daemon.deactivate_device(name).await;
                let entry = JournalEntry::Deactivated {
                    name: name.to_string(),
                    iface_type,
                    was_active,
                };
                self.record(DaemonOp::DeactivateDevice, name, iface_type, submitted, entry, journal)
                    .await?;
            }
            InterfaceState::Absent => {}
        }
        Ok(())
    }

    /// Undo one journal entry, returning every operation that failed
    async fn undo(&self, entry: &JournalEntry) -> Vec<Failure> {
        let mut failures = Vec::new();
        match entry {
            JournalEntry::Created { name, iface_type } => {
                let submitted = self.daemon.delete_profile(name).await;
                failures.extend(
                    self.settle(DaemonOp::DeleteProfile, name, *iface_type, submitted)
                        .await
                        .err(),
                );
            }
            JournalEntry::Modified { previous } => {
                let name = previous.name.as_str();
                let iface_type = previous.iface_type();
                let submitted = self.daemon.modify_profile(previous).await;
                failures.extend(
                    self.settle(DaemonOp::ModifyProfile, name, iface_type, submitted)
                        .await
                        .err(),
                );
                if previous.effective_state() == InterfaceState::Up {
                    let submitted = self.daemon.activate_profile(name).await;
                    failures.extend(
                        self.settle(DaemonOp::ActivateProfile, name, iface_type, submitted)
                            .await
                            .err(),
                    );
                }
            }
            JournalEntry::Deleted { previous } => {
                let submitted = self.daemon.create_profile(previous).await;
                failures.extend(
                    self.settle(
                        DaemonOp::CreateProfile,
                        &previous.name,
                        previous.iface_type(),
                        submitted,
                    )
                    .await
                    .err(),
                );
            }
            JournalEntry::Activated {
                name,
                iface_type,
                was_active,
            } => {
                if !was_active {
                    let submitted = self.daemon.deactivate_device(name).await;
                    failures.extend(
                        self.settle(DaemonOp::DeactivateDevice, name, *iface_type, submitted)
                            .await
                            .err(),
                    );
                }
            }
            JournalEntry::Deactivated {
                name,
                iface_type,
                was_active,
            } => {
                if *was_active {
                    let submitted = self.daemon.activate_profile(name).await;
                    failures.extend(
                        self.settle(DaemonOp::ActivateProfile, name, *iface_type, submitted)
                            .await
                            .err(),
                    );
                }
            }
            JournalEntry::GlobalCommitted { previous } => {
                let submitted = self.daemon.commit_global(previous).await;
                failures.extend(
                    self.settle(
                        DaemonOp::CommitGlobal,
                        "global",
                        InterfaceType::Unknown,
                        submitted,
                    )
                    .await
                    .err(),
                );
            }
        }
        failures
    }

    /// Whether the host already shows `entry` undone
    ///
    /// Used when the compensation of an unconfirmed mutation is refused,
    /// typically because the original never took effect.
    async fn reverted(&self, entry: &JournalEntry) -> bool {
        let is_up = |iface: &Interface| iface.state == Some(InterfaceState::Up);
        let outcome = match entry {
            JournalEntry::Created { name, .. } => self.device(name).await.map(|d| d.is_none()),
            JournalEntry::Deleted { previous } => {
                self.device(&previous.name).await.map(|d| d.is_some())
            }
            JournalEntry::Modified { previous } => self
                .device(&previous.name)
                .await
                .map(|d| d.is_some_and(|d| same_profile(&d, previous))),
            JournalEntry::Activated {
                name, was_active, ..
            } => self
                .device(name)
                .await
                .map(|d| *was_active || !d.as_ref().is_some_and(is_up)),
            JournalEntry::Deactivated {
                name, was_active, ..
            } => self
                .device(name)
                .await
                .map(|d| !*was_active || d.as_ref().is_some_and(is_up)),
            JournalEntry::GlobalCommitted { previous } => self
                .daemon
                .query_global()
                .await
                .map(|global| global == *previous),
        };
        outcome.unwrap_or(false)
    }

    async fn device(&self, name: &str) -> crate::Result<Option<Interface>> {
        let devices = self.daemon.list_devices().await?;
        Ok(devices.into_iter().find(|d| d.name == name))
    }
}

/// Profile equality ignoring runtime state and observational data
fn same_profile(device: &Interface, previous: &Interface) -> bool {
    let mut device = device.without_observed();
    let mut previous = previous.without_observed();
    device.state = None;
    previous.state = None;
    device == previous
}

/// Applies a diff in dependency order and unwinds it on failure
pub struct ApplyCoordinator {
    executor: Executor,
    concurrent_waves: bool,
}

impl ApplyCoordinator {
    /// Create a new coordinator
    ///
    /// # Parameters
    ///
    /// - `daemon`: Daemon to drive
    /// - `timeouts`: Per-operation completion budgets
    /// - `concurrent_waves`: Issue the independent units of a wave in parallel
    pub fn new(
        daemon: Arc<dyn NetworkDaemon>,
        timeouts: OperationTimeouts,
        concurrent_waves: bool,
    ) -> Self {
        Self {
            executor: Executor { daemon, timeouts },
            concurrent_waves,
        }
    }

    /// Apply `diff` in `order`
    ///
    /// `snapshot` is the state captured before the cycle; the global commit
    /// is undone by restoring its routes, rules and resolver.
    ///
    /// # Returns
    ///
    /// - `Ok(ApplyReport)`: every unit and the global commit completed
    /// - `Err(ApplyError)`: an operation failed; the journal has been unwound
    pub async fn apply(
        &self,
        diff: &StateDiff,
        order: &ApplyOrder,
        snapshot: &Snapshot,
    ) -> Result<ApplyReport, ApplyError> {
        let mut journal = Vec::new();
        let mut report = ApplyReport::default();

        let phases: [(&[Vec<String>], &[DiffAction]); 2] = [
            (&order.deletion_waves, &[DiffAction::Delete]),
            (
                &order.creation_waves,
                &[DiffAction::Create, DiffAction::Modify],
            ),
        ];
        for (waves, actions) in phases {
            for wave in waves {
                let units = order::select(diff, wave, actions);
                if units.is_empty() {
                    continue;
                }
                if let Err(failure) = self.run_wave(&units, &mut journal, &mut report).await {
                    return Err(self.unwind(failure, journal).await);
                }
            }
        }

        if diff.has_global_change() {
            let previous = snapshot.state.global();
            let target = diff.global_target(&previous);
            info!(
                "Committing {} routes, {} route rules",
                target.routes.len(),
                target.route_rules.len()
            );
            let submitted = self.executor.daemon.commit_global(&target).await;
            let committed = self
                .executor
                .record(
                    DaemonOp::CommitGlobal,
                    &global_entity(diff),
                    InterfaceType::Unknown,
                    submitted,
                    JournalEntry::GlobalCommitted { previous },
                    &mut journal,
                )
                .await;
            if let Err(failure) = committed {
                return Err(self.unwind(failure, journal).await);
            }
            report.global_committed = true;
        }

        report.operations = journal.len();
        Ok(report)
    }

    async fn run_wave(
        &self,
        units: &[&DiffUnit],
        journal: &mut Vec<Journaled>,
        report: &mut ApplyReport,
    ) -> Result<(), Failure> {
        if !self.concurrent_waves || units.len() == 1 {
            for unit in units {
                info!("Applying {:?} for {}", unit.action, unit.name);
                self.executor.apply_unit(unit, journal).await?;
                report.applied.push(unit.name.clone());
            }
            return Ok(());
        }

        debug!("Applying wave of {} units concurrently", units.len());
        let mut tasks = JoinSet::new();
        for (idx, unit) in units.iter().enumerate() {
            let executor = self.executor.clone();
            let unit = (*unit).clone();
            tasks.spawn(async move {
                let mut entries = Vec::new();
                let result = executor.apply_unit(&unit, &mut entries).await;
                (idx, entries, result)
            });
        }

        let mut outcomes: Vec<Option<(Vec<Journaled>, Result<(), Failure>)>> =
            (0..units.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, entries, result)) => outcomes[idx] = Some((entries, result)),
                Err(err) => error!("Apply task failed: {}", err),
            }
        }

        // journal in wave order so the unwind is deterministic
        let mut first_failure = None;
        for (unit, outcome) in units.iter().zip(outcomes) {
            let (entries, result) = outcome.unwrap_or_else(|| {
                (
                    Vec::new(),
                    Err(Failure {
                        interface: unit.name.clone(),
                        operation: first_operation(unit),
                        cause: ApplyCause::Abandoned,
                    }),
                )
            });
            journal.extend(entries);
            match result {
                Ok(()) => report.applied.push(unit.name.clone()),
                Err(failure) => {
                    first_failure.get_or_insert(failure);
                }
            }
        }

        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    async fn unwind(&self, failure: Failure, journal: Vec<Journaled>) -> ApplyError {
        error!(
            "{} on {} failed: {}; unwinding {} operations",
            failure.operation,
            failure.interface,
            failure.cause,
            journal.len()
        );

        let mut rollback_failures = Vec::new();
        for journaled in journal.iter().rev() {
            let mut undo_failures = self.executor.undo(&journaled.entry).await;
            if !undo_failures.is_empty()
                && !journaled.confirmed
                && self.executor.reverted(&journaled.entry).await
            {
                debug!("Unconfirmed {:?} never took effect", journaled.entry);
                undo_failures.clear();
            }
            for undo_failure in undo_failures {
                warn!(
                    "Rollback {} on {} failed: {}",
                    undo_failure.operation, undo_failure.interface, undo_failure.cause
                );
                rollback_failures.push(RollbackFailure {
                    target: undo_failure.interface,
                    operation: undo_failure.operation,
                    cause: undo_failure.cause,
                });
            }
        }

        let rolled_back = rollback_failures.is_empty();
        if rolled_back {
            info!("Rollback complete");
        }
        ApplyError {
            interface: failure.interface,
            operation: failure.operation,
            cause: failure.cause,
            rolled_back,
            rollback_failures,
        }
    }
}

fn first_operation(unit: &DiffUnit) -> DaemonOp {
    match unit.action {
        DiffAction::Create if !unit.is_type_change() => DaemonOp::CreateProfile,
        DiffAction::Modify => DaemonOp::ModifyProfile,
        _ => DaemonOp::DeactivateDevice,
    }
}

fn global_entity(diff: &StateDiff) -> String {
    let sections: Vec<String> = diff
        .divergent()
        .into_iter()
        .filter(|name| diff.unit(name).is_none())
        .collect();
    sections.join(",")
}
