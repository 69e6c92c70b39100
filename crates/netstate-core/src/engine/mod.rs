//! Reconciliation engine
//!
//! The Reconciler runs one reconciliation cycle per call:
//! - Capturing the current state from the daemon
//! - Diffing it against the desired document
//! - Ordering the changed units by dependency
//! - Applying them (unwinding on failure)
//! - Verifying that the host converged
//!
//! ## Architecture
//!
//! ```text
//!   desired ──┐
//!             ▼
//!      ┌─────────────┐   snapshot   ┌──────────────┐
//!      │ Reconciler  │◄─────────────│ NetworkDaemon│
//!      └─────────────┘              └──────────────┘
//!             │                            ▲
//!   Diffing → Ordering → Applying ─────────┤
//!                            │             │
//!                            ▼             │
//!                        Verifying ────────┘
//!                            │
//!                 Converged | Failed
//! ```
//!
//! ## Cycle Rules
//!
//! 1. A cycle claims its interface names (and the global sections it
//!    supplies); an overlapping cycle is rejected, never queued
//! 2. Cancellation is honored until the apply stage starts
//! 3. Apply, unwind and verification run in their own task, so dropping
//!    the cycle future cannot leave the host half-applied
//! 4. Events go to a bounded channel; a full channel drops them

use crate::apply::{ApplyCoordinator, ApplyReport};
use crate::config::{EngineConfig, NetstateConfig};
use crate::diff::{self, StateDiff};
use crate::error::{Error, Result};
use crate::order::{self, ApplyOrder};
use crate::registry::BackendRegistry;
use crate::snapshot::Snapshot;
use crate::state::NetworkState;
use crate::state::schema::section;
use crate::traits::NetworkDaemon;
use crate::verify::Verifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Stage of a reconciliation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    Diffing,
    Ordering,
    Applying,
    Verifying,
    Converged,
    Failed,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Diffing => "diffing",
            Self::Ordering => "ordering",
            Self::Applying => "applying",
            Self::Verifying => "verifying",
            Self::Converged => "converged",
            Self::Failed => "failed",
        })
    }
}

/// Events emitted by the Reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleEvent {
    /// A cycle moved to a new stage
    StageEntered { cycle: u64, stage: CycleStage },

    /// The diff and order are known
    Planned {
        cycle: u64,
        changes: Vec<String>,
        waves: usize,
    },

    /// Every unit and the global commit completed
    Applied { cycle: u64, operations: usize },

    /// An apply failure was unwound
    RolledBack {
        cycle: u64,
        interface: String,
        complete: bool,
    },

    /// The host matches the desired document
    Converged { cycle: u64, verify_attempts: u32 },

    /// The cycle ended with an error
    Failed {
        cycle: u64,
        stage: CycleStage,
        error: String,
    },
}

/// Diff and order of a desired document against the live host
#[derive(Debug, Clone)]
pub struct CyclePlan {
    pub diff: StateDiff,
    pub order: ApplyOrder,
    /// Host state the plan was computed against
    pub snapshot: Snapshot,
}

impl CyclePlan {
    pub fn is_empty(&self) -> bool {
        self.diff.is_empty()
    }
}

/// Outcome of a converged cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub stage: CycleStage,
    pub diff: StateDiff,
    pub order: ApplyOrder,
    pub applied: ApplyReport,
    /// Verification queries needed; 0 when there was nothing to apply
    pub verify_attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

type Claims = Arc<Mutex<HashSet<String>>>;

/// Entities held by a running cycle, released on drop
struct ClaimGuard {
    claims: Claims,
    names: Vec<String>,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        let mut held = self.claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for name in &self.names {
            held.remove(name);
        }
    }
}

/// Emits cycle events without blocking
#[derive(Clone)]
struct EventSink {
    tx: mpsc::Sender<CycleEvent>,
}

impl EventSink {
    fn emit(&self, event: CycleEvent) {
        // Send event, logging warning if channel is full (backpressure)
        if self.tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }

    fn enter(&self, cycle: u64, stage: CycleStage) {
        info!("Cycle {}: {}", cycle, stage);
        self.emit(CycleEvent::StageEntered { cycle, stage });
    }

    fn fail(&self, cycle: u64, stage: CycleStage, err: Error) -> Error {
        error!("Cycle {} failed while {}: {}", cycle, stage, err);
        self.emit(CycleEvent::Failed {
            cycle,
            stage,
            error: err.to_string(),
        });
        err
    }
}

/// Declarative network state reconciler
///
/// ## Lifecycle
///
/// 1. Create with [`Reconciler::new()`] (or [`Reconciler::from_config()`])
/// 2. Call [`Reconciler::reconcile()`] once per desired document
/// 3. Drain the event receiver for monitoring
///
/// ## Threading
///
/// All methods take `&self`; cycles on disjoint interfaces may run
/// concurrently from several tasks.
pub struct Reconciler {
    daemon: Arc<dyn NetworkDaemon>,
    config: EngineConfig,
    claims: Claims,
    next_cycle: AtomicU64,
    events: EventSink,
}

impl Reconciler {
    /// Create a new reconciler
    ///
    /// # Parameters
    ///
    /// - `daemon`: Network daemon to query and drive
    /// - `config`: Engine configuration
    ///
    /// # Returns
    ///
    /// A tuple of (reconciler, event_receiver) where event_receiver yields
    /// cycle events
    pub fn new(
        daemon: Arc<dyn NetworkDaemon>,
        config: EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<CycleEvent>)> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let reconciler = Self {
            daemon,
            config,
            claims: Arc::new(Mutex::new(HashSet::new())),
            next_cycle: AtomicU64::new(1),
            events: EventSink { tx },
        };
        Ok((reconciler, rx))
    }

    /// Create a reconciler whose daemon comes from `registry`
    pub fn from_config(
        config: &NetstateConfig,
        registry: &BackendRegistry,
    ) -> Result<(Self, mpsc::Receiver<CycleEvent>)> {
        config.validate()?;
        let daemon = registry.create(&config.backend)?;
        Self::new(Arc::from(daemon), config.engine.clone())
    }

    pub fn daemon(&self) -> &Arc<dyn NetworkDaemon> {
        &self.daemon
    }

    /// Current host state, without changing anything
    pub async fn show(&self) -> Result<NetworkState> {
        Ok(Snapshot::capture(self.daemon.as_ref()).await?.state)
    }

    /// Diff and order `desired` against the host without applying (dry run)
    pub async fn plan(&self, desired: &NetworkState) -> Result<CyclePlan> {
        let snapshot = Snapshot::capture(self.daemon.as_ref()).await?;
        let diff = diff::compute(desired, &snapshot.state, &snapshot.defaults)?;
        let order = order::order(&diff)?;
        Ok(CyclePlan {
            diff,
            order,
            snapshot,
        })
    }

    /// Run one full cycle for `desired`
    pub async fn reconcile(&self, desired: &NetworkState) -> Result<CycleReport> {
        self.reconcile_with_cancel(desired, CancellationToken::new())
            .await
    }

    /// Run one full cycle for `desired`, stopping early if `cancel` fires
    /// before the apply stage
    ///
    /// # Returns
    ///
    /// - `Ok(CycleReport)`: the host converged
    /// - `Err(Error::Cancelled)`: cancelled before anything was applied
    /// - `Err(Error::CycleConflict)`: another cycle holds some entities
    /// - `Err(Error::InvalidDesiredState)`: rejected before any mutation
    /// - `Err(Error::Apply)`: an operation failed and the host was unwound
    /// - `Err(Error::Verification)`: applied but did not converge
    pub async fn reconcile_with_cancel(
        &self,
        desired: &NetworkState,
        cancel: CancellationToken,
    ) -> Result<CycleReport> {
        let cycle = self.next_cycle.fetch_add(1, Ordering::Relaxed);
        let started_at = Utc::now();
        let guard = self.claim(claimed_entities(desired))?;
        let events = &self.events;

        events.enter(cycle, CycleStage::Diffing);
        let captured = cancellable(
            &cancel,
            CycleStage::Diffing,
            Snapshot::capture(self.daemon.as_ref()),
        )
        .await;
        let snapshot = captured.map_err(|e| events.fail(cycle, CycleStage::Diffing, e))?;
        let diff = diff::compute(desired, &snapshot.state, &snapshot.defaults)
            .map_err(|e| events.fail(cycle, CycleStage::Diffing, e))?;

        check(&cancel, CycleStage::Ordering)
            .map_err(|e| events.fail(cycle, CycleStage::Ordering, e))?;
        events.enter(cycle, CycleStage::Ordering);
        let order =
            order::order(&diff).map_err(|e| events.fail(cycle, CycleStage::Ordering, e))?;
        events.emit(CycleEvent::Planned {
            cycle,
            changes: diff.divergent(),
            waves: order.creation_waves.len(),
        });

        if diff.is_empty() {
            info!("Cycle {}: nothing to change", cycle);
            events.enter(cycle, CycleStage::Converged);
            events.emit(CycleEvent::Converged {
                cycle,
                verify_attempts: 0,
            });
            return Ok(CycleReport {
                cycle,
                stage: CycleStage::Converged,
                diff,
                order,
                applied: ApplyReport::default(),
                verify_attempts: 0,
                started_at,
                finished_at: Utc::now(),
            });
        }

        check(&cancel, CycleStage::Applying)
            .map_err(|e| events.fail(cycle, CycleStage::Applying, e))?;

        let task = ApplyTask {
            cycle,
            daemon: Arc::clone(&self.daemon),
            config: self.config.clone(),
            events: events.clone(),
            desired: desired.clone(),
            diff: diff.clone(),
            order: order.clone(),
            snapshot,
            _guard: guard,
        };
        let (applied, verify_attempts) = tokio::spawn(task.run())
            .await
            .map_err(|e| Error::Other(format!("apply task failed: {e}")))??;

        Ok(CycleReport {
            cycle,
            stage: CycleStage::Converged,
            diff,
            order,
            applied,
            verify_attempts,
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn claim(&self, names: Vec<String>) -> Result<ClaimGuard> {
        let mut held = self.claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let conflicts: Vec<String> = names
            .iter()
            .filter(|name| held.contains(*name))
            .cloned()
            .collect();
        if !conflicts.is_empty() {
            warn!("Rejecting overlapping cycle on {}", conflicts.join(", "));
            return Err(Error::CycleConflict {
                entities: conflicts,
            });
        }
        held.extend(names.iter().cloned());
        Ok(ClaimGuard {
            claims: Arc::clone(&self.claims),
            names,
        })
    }
}

/// The part of a cycle that must run to completion once started
struct ApplyTask {
    cycle: u64,
    daemon: Arc<dyn NetworkDaemon>,
    config: EngineConfig,
    events: EventSink,
    desired: NetworkState,
    diff: StateDiff,
    order: ApplyOrder,
    snapshot: Snapshot,
    // claims stay held until the task ends, even if the caller went away
    _guard: ClaimGuard,
}

impl ApplyTask {
    async fn run(self) -> Result<(ApplyReport, u32)> {
        let cycle = self.cycle;
        let events = &self.events;

        events.enter(cycle, CycleStage::Applying);
        let coordinator = ApplyCoordinator::new(
            Arc::clone(&self.daemon),
            self.config.timeouts,
            self.config.concurrent_waves,
        );
        let applied = match coordinator.apply(&self.diff, &self.order, &self.snapshot).await {
            Ok(report) => report,
            Err(apply_err) => {
                events.emit(CycleEvent::RolledBack {
                    cycle,
                    interface: apply_err.interface.clone(),
                    complete: apply_err.rolled_back,
                });
                return Err(events.fail(cycle, CycleStage::Applying, apply_err.into()));
            }
        };
        debug!("Cycle {}: applied {:?}", cycle, applied.applied);
        events.emit(CycleEvent::Applied {
            cycle,
            operations: applied.operations,
        });

        events.enter(cycle, CycleStage::Verifying);
        let verifier = Verifier::new(Arc::clone(&self.daemon), self.config.clone());
        let verification = verifier
            .verify(&self.desired)
            .await
            .map_err(|e| events.fail(cycle, CycleStage::Verifying, e))?;

        events.enter(cycle, CycleStage::Converged);
        events.emit(CycleEvent::Converged {
            cycle,
            verify_attempts: verification.attempts,
        });
        Ok((applied, verification.attempts))
    }
}

/// Interface names plus every global section `desired` supplies
fn claimed_entities(desired: &NetworkState) -> Vec<String> {
    let mut names: Vec<String> = desired.interfaces.iter().map(|i| i.name.clone()).collect();
    if desired.route_config().is_some() {
        names.push(section::ROUTES.to_string());
    }
    if desired.route_rule_config().is_some() {
        names.push(section::ROUTE_RULES.to_string());
    }
    if desired.dns_config().is_some() {
        names.push(section::DNS_RESOLVER.to_string());
    }
    names.sort();
    names.dedup();
    names
}

fn check(cancel: &CancellationToken, stage: CycleStage) -> Result<()> {
    if cancel.is_cancelled() {
        info!("Cycle cancelled during {}", stage);
        return Err(Error::Cancelled { stage });
    }
    Ok(())
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    stage: CycleStage,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    check(cancel, stage)?;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled { stage }),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::MemoryDaemon;
    use crate::state::{DnsConfig, Interface, InterfaceType};

    fn reconciler(daemon: &MemoryDaemon) -> (Reconciler, mpsc::Receiver<CycleEvent>) {
        let config = EngineConfig {
            settle_delay_ms: 1,
            ..Default::default()
        };
        Reconciler::new(Arc::new(daemon.clone()), config).unwrap()
    }

    #[test]
    fn claims_cover_interfaces_and_supplied_sections() {
        let desired = NetworkState::new()
            .with_interface(Interface::new("eth1", InterfaceType::Ethernet))
            .with_dns(DnsConfig::new(["192.0.2.1"], ["example.com"]));
        assert_eq!(claimed_entities(&desired), vec!["dns-resolver", "eth1"]);
    }

    #[test]
    fn overlapping_claims_conflict_until_released() {
        let (reconciler, _rx) = reconciler(&MemoryDaemon::new());
        let guard = reconciler
            .claim(vec!["eth1".to_string(), "eth2".to_string()])
            .unwrap();

        match reconciler.claim(vec!["eth2".to_string(), "eth3".to_string()]) {
            Err(Error::CycleConflict { entities }) => assert_eq!(entities, vec!["eth2"]),
            other => panic!("expected conflict, got {:?}", other.map(|_| ())),
        }

        drop(guard);
        assert!(reconciler.claim(vec!["eth2".to_string()]).is_ok());
    }

    #[tokio::test]
    async fn empty_diff_converges_without_mutation() {
        let daemon = MemoryDaemon::with_ethernets(["eth1"]);
        let (reconciler, mut rx) = reconciler(&daemon);

        let report = reconciler.reconcile(&NetworkState::new()).await.unwrap();
        assert_eq!(report.stage, CycleStage::Converged);
        assert_eq!(report.verify_attempts, 0);
        assert!(daemon.calls().await.is_empty());

        let mut stages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let CycleEvent::StageEntered { stage, .. } = event {
                stages.push(stage);
            }
        }
        assert_eq!(
            stages,
            vec![CycleStage::Diffing, CycleStage::Ordering, CycleStage::Converged]
        );
    }

    #[tokio::test]
    async fn full_channel_drops_events() {
        let daemon = MemoryDaemon::with_ethernets(["eth1"]);
        let config = EngineConfig {
            event_channel_capacity: 1,
            ..Default::default()
        };
        let (reconciler, mut rx) = Reconciler::new(Arc::new(daemon), config).unwrap();

        reconciler.reconcile(&NetworkState::new()).await.unwrap();
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
