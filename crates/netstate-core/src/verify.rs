//! Post-apply verification
//!
//! Re-reads the host after an apply and re-diffs it against the caller's
//! original desired document. Devices take time to come up and leases take
//! time to arrive, so the check is retried with a capped exponential
//! backoff before giving up. Verification never rolls anything back.

use crate::config::EngineConfig;
use crate::diff;
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;
use crate::state::NetworkState;
use crate::traits::NetworkDaemon;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a converged verification
#[derive(Debug, Clone)]
pub struct Verification {
    /// Queries needed until the host matched
    pub attempts: u32,
    /// Host state at convergence
    pub state: NetworkState,
}

pub struct Verifier {
    daemon: Arc<dyn NetworkDaemon>,
    config: EngineConfig,
}

impl Verifier {
    pub fn new(daemon: Arc<dyn NetworkDaemon>, config: EngineConfig) -> Self {
        Self { daemon, config }
    }

    /// Wait for the host to match `desired`
    ///
    /// # Returns
    ///
    /// - `Ok(Verification)`: the residual diff became empty
    /// - `Err(Error::Verification)`: still divergent after every attempt,
    ///   naming the divergent interfaces and global sections
    /// - `Err(Error::DaemonUnavailable)`: a query failed
    pub async fn verify(&self, desired: &NetworkState) -> Result<Verification> {
        tokio::time::sleep(self.config.settle_delay()).await;

        let attempts = self.config.verify_attempts;
        let mut attempt = 1;
        loop {
            let snapshot = Snapshot::capture(self.daemon.as_ref()).await?;
            let residual = diff::compute(desired, &snapshot.state, &snapshot.defaults)?;
            if residual.is_empty() {
                info!("Converged after {} verification attempt(s)", attempt);
                return Ok(Verification {
                    attempts: attempt,
                    state: snapshot.state,
                });
            }

            let divergent = residual.divergent();
            if attempt >= attempts {
                warn!(
                    "Still divergent after {} attempts: {}",
                    attempt,
                    divergent.join(", ")
                );
                return Err(Error::Verification {
                    divergent,
                    attempts: attempt,
                });
            }

            let delay = self.config.verify_backoff(attempt);
            debug!(
                "Attempt {}/{} divergent ({}), retrying in {:?}",
                attempt,
                attempts,
                divergent.join(", "),
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
