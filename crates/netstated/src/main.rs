// # netstated - netstate command-line front end
//
// A thin integration layer over netstate-core. It reads configuration from
// the environment, builds a daemon backend through the registry and runs a
// single reconciliation cycle (or only shows / plans one). All diffing,
// ordering, rollback and verification logic lives in netstate-core.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Cycle
// - `NETSTATE_MODE`: `show`, `plan` or `apply` (default: `apply`)
// - `NETSTATE_DESIRED`: Path to the desired state document (`.json`,
//   `.yaml` or `.yml`); required for `plan` and `apply`
//
// ### Backend
// - `NETSTATE_BACKEND`: Daemon backend (`memory`, `file`; default: `file`)
// - `NETSTATE_BACKEND_PATH`: Profile store path (for `file`)
//
// ### Engine
// - `NETSTATE_SETTLE_MS`: Delay before the first verification query
// - `NETSTATE_VERIFY_ATTEMPTS`: Verification queries before giving up
//
// ### Logging
// - `NETSTATE_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export NETSTATE_BACKEND=file
// export NETSTATE_BACKEND_PATH=/var/lib/netstate/profiles.json
// export NETSTATE_DESIRED=/etc/netstate/host.yaml
//
// netstated
// ```

use anyhow::{Context, Result};
use netstate_core::{
    BackendConfig, BackendRegistry, CycleEvent, CyclePlan, DiffAction, EngineConfig, ErrorKind,
    NetstateConfig, NetworkDaemon, NetworkState, Reconciler,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// - 0: Cycle converged (or show/plan succeeded)
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
/// - 3: Desired state rejected before any change
/// - 4: Apply failed, host rolled back
/// - 5: Applied but verification did not converge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetstatedExitCode {
    Success = 0,
    ConfigError = 1,
    RuntimeError = 2,
    InvalidDesiredState = 3,
    ApplyFailed = 4,
    VerificationFailed = 5,
}

impl From<NetstatedExitCode> for ExitCode {
    fn from(code: NetstatedExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

impl NetstatedExitCode {
    /// Exit code for an error returned by the cycle
    fn for_error(err: &anyhow::Error) -> Self {
        let Some(err) = err.downcast_ref::<netstate_core::Error>() else {
            return Self::RuntimeError;
        };
        match err.kind() {
            ErrorKind::InvalidDesiredState | ErrorKind::Serialization => Self::InvalidDesiredState,
            ErrorKind::Apply => Self::ApplyFailed,
            ErrorKind::Verification => Self::VerificationFailed,
            ErrorKind::Config => Self::ConfigError,
            _ => Self::RuntimeError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Show,
    Plan,
    Apply,
}

/// Application configuration
#[derive(Debug)]
struct Config {
    mode: Mode,
    desired_path: Option<PathBuf>,
    backend: String,
    backend_path: Option<String>,
    settle_ms: Option<u64>,
    verify_attempts: Option<u32>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mode = match lookup("NETSTATE_MODE").as_deref().unwrap_or("apply") {
            "show" => Mode::Show,
            "plan" => Mode::Plan,
            "apply" => Mode::Apply,
            other => anyhow::bail!(
                "NETSTATE_MODE '{}' is not supported. Supported modes: show, plan, apply",
                other
            ),
        };

        Ok(Self {
            mode,
            desired_path: lookup("NETSTATE_DESIRED").map(PathBuf::from),
            backend: lookup("NETSTATE_BACKEND").unwrap_or_else(|| "file".to_string()),
            backend_path: lookup("NETSTATE_BACKEND_PATH"),
            settle_ms: lookup("NETSTATE_SETTLE_MS")
                .map(|s| s.parse().context("NETSTATE_SETTLE_MS must be an integer"))
                .transpose()?,
            verify_attempts: lookup("NETSTATE_VERIFY_ATTEMPTS")
                .map(|s| s.parse().context("NETSTATE_VERIFY_ATTEMPTS must be an integer"))
                .transpose()?,
            log_level: lookup("NETSTATE_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.mode != Mode::Show && self.desired_path.is_none() {
            anyhow::bail!(
                "NETSTATE_DESIRED is required for plan and apply. \
                Set it via: export NETSTATE_DESIRED=/etc/netstate/host.yaml"
            );
        }

        match self.backend.as_str() {
            "memory" => {}
            "file" => {
                if self.backend_path.as_ref().is_none_or(|p| p.is_empty()) {
                    anyhow::bail!(
                        "NETSTATE_BACKEND_PATH is required when NETSTATE_BACKEND=file. \
                        Set it via: export NETSTATE_BACKEND_PATH=/var/lib/netstate/profiles.json"
                    );
                }
            }
            other => anyhow::bail!(
                "NETSTATE_BACKEND '{}' is not supported. Supported backends: memory, file",
                other
            ),
        }

        if let Some(attempts) = self.verify_attempts
            && !(1..=100).contains(&attempts)
        {
            anyhow::bail!(
                "NETSTATE_VERIFY_ATTEMPTS must be between 1 and 100. Got: {}",
                attempts
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "NETSTATE_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Library configuration derived from the environment
    fn netstate_config(&self) -> NetstateConfig {
        let backend = match (self.backend.as_str(), &self.backend_path) {
            ("file", Some(path)) => BackendConfig::File { path: path.clone() },
            _ => BackendConfig::Memory,
        };
        let mut engine = EngineConfig::default();
        if let Some(settle_ms) = self.settle_ms {
            engine.settle_delay_ms = settle_ms;
        }
        if let Some(attempts) = self.verify_attempts {
            engine.verify_attempts = attempts;
        }
        NetstateConfig { backend, engine }
    }

    fn log_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return NetstatedExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return NetstatedExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return NetstatedExitCode::ConfigError.into();
    }

    info!("Starting netstated in {:?} mode", config.mode);

    // the file backend needs a multi-threaded runtime to load its store
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return NetstatedExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        match run(config).await {
            Ok(()) => NetstatedExitCode::Success,
            Err(e) => {
                error!("{:#}", e);
                NetstatedExitCode::for_error(&e)
            }
        }
    });

    code.into()
}

/// Run one show, plan or apply
async fn run(config: Config) -> Result<()> {
    let registry = BackendRegistry::with_builtin();
    let (reconciler, events) = Reconciler::from_config(&config.netstate_config(), &registry)?;
    info!("Using {} daemon", reconciler.daemon().daemon_name());

    let desired = match &config.desired_path {
        Some(path) => Some(load_desired(path)?),
        None => None,
    };

    match (config.mode, desired) {
        (Mode::Show, _) => {
            let current = reconciler.show().await?;
            print!("{}", current.to_yaml()?);
        }
        (Mode::Plan, Some(desired)) => {
            let plan = reconciler.plan(&desired).await?;
            print_plan(&plan);
        }
        (Mode::Apply, Some(desired)) => {
            let logger = tokio::spawn(log_events(events));
            let cancel = CancellationToken::new();
            let watcher = tokio::spawn(cancel_on_shutdown(cancel.clone()));

            let result = reconciler.reconcile_with_cancel(&desired, cancel).await;
            watcher.abort();
            drop(reconciler);
            let _ = logger.await;

            let report = result?;
            info!(
                "Cycle {} converged: {} operation(s), {} verification attempt(s)",
                report.cycle, report.applied.operations, report.verify_attempts
            );
        }
        (_, None) => anyhow::bail!("NETSTATE_DESIRED is required for plan and apply"),
    }

    Ok(())
}

/// Parse the desired document, picking the format from the extension
fn load_desired(path: &Path) -> Result<NetworkState> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        netstate_core::Error::config(format!("cannot read {}: {}", path.display(), e))
    })?;
    let state = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => NetworkState::from_json_str(&text)?,
        Some("yaml") | Some("yml") => NetworkState::from_yaml_str(&text)?,
        _ => {
            return Err(netstate_core::Error::config(format!(
                "{}: expected a .json, .yaml or .yml document",
                path.display()
            ))
            .into());
        }
    };
    info!(
        "Loaded desired state from {} ({} interface(s))",
        path.display(),
        state.interfaces.len()
    );
    Ok(state)
}

fn print_plan(plan: &CyclePlan) {
    if plan.is_empty() {
        println!("nothing to change");
        return;
    }
    for unit in plan.diff.changed_units() {
        let action = match unit.action {
            DiffAction::Create if unit.is_type_change() => "recreate",
            DiffAction::Create => "create",
            DiffAction::Modify => "modify",
            DiffAction::Delete => "delete",
            DiffAction::Unchanged => continue,
        };
        println!("{:<8} {}", action, unit.name);
    }
    let routes = &plan.diff.routes;
    if !routes.is_empty() {
        println!(
            "routes   +{} -{}",
            routes.added.len(),
            routes.removed.len()
        );
    }
    let rules = &plan.diff.route_rules;
    if !rules.is_empty() {
        println!("rules    +{} -{}", rules.added.len(), rules.removed.len());
    }
    if plan.diff.dns.is_some() {
        println!("dns      modify");
    }
    if !plan.order.creation.is_empty() {
        println!("order    {}", plan.order.creation.join(" -> "));
    }
}

/// Log cycle events until the reconciler goes away
async fn log_events(events: tokio::sync::mpsc::Receiver<CycleEvent>) {
    let mut stream = ReceiverStream::new(events);
    while let Some(event) = stream.next().await {
        match &event {
            CycleEvent::Failed { .. } | CycleEvent::RolledBack { .. } => warn!("{:?}", event),
            _ => info!("{:?}", event),
        }
    }
}

/// Cancel the cycle on SIGTERM or SIGINT
///
/// Only stages before apply honor the token; a started apply runs to
/// completion or rollback.
#[cfg(unix)]
async fn cancel_on_shutdown(cancel: CancellationToken) {
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to setup signal handlers: {}", e);
                return;
            }
        };

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    info!("Received {}, cancelling cycle", name);
    cancel.cancel();
}

/// Cancel the cycle on CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn cancel_on_shutdown(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received SIGINT, cancelling cycle");
            cancel.cancel();
        }
        Err(e) => warn!("Failed to wait for CTRL-C: {}", e),
    }
}
