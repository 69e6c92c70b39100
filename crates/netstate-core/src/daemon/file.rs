// # File Daemon
//
// File-backed implementation of NetworkDaemon with crash recovery.
//
// ## Purpose
//
// Wraps the in-memory simulation and persists its profile store after every
// completed mutation, so a later process sees the host exactly as the last
// reconciliation left it.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good store
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "store": {
//     "physical": ["eth0"],
//     "profiles": { "eth0": { "name": "eth0", "type": "ethernet", ... } },
//     "active": ["eth0"],
//     "global": { "routes": [], "route-rules": [], "dns": {} },
//     "defaults": { ... }
//   }
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::memory::{DaemonStore, MemoryDaemon};
use crate::error::ErrorKind;
use crate::state::{GlobalState, Interface, RouteDefaults};
use crate::traits::{Completion, DaemonFactory, NetworkDaemon};
use crate::{Error, Result};

/// Store file format version
/// Used for future migration if format changes
const STORE_FILE_VERSION: &str = "1.0";

/// Name reported by [`FileDaemon::daemon_name`]
pub const FILE_DAEMON_NAME: &str = "file";

/// Serializable store file format
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFileFormat {
    version: String,
    store: DaemonStore,
}

/// File-backed network daemon
///
/// A mutation only reports success once the resulting store has been
/// written to disk. A failed write turns the completion into a rejection
/// and reloads the last store that reached the disk.
///
/// # Example
///
/// ```rust,no_run
/// use netstate_core::daemon::FileDaemon;
/// use netstate_core::NetworkDaemon;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let daemon = FileDaemon::open("/var/lib/netstate/profiles.json").await?;
///     let completion = daemon.activate_profile("eth0").await?;
///     completion.wait(std::time::Duration::from_secs(60)).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileDaemon {
    path: PathBuf,
    memory: MemoryDaemon,
    write_lock: Arc<Mutex<()>>,
}

impl FileDaemon {
    /// Open or create a file-backed daemon
    ///
    /// This will:
    /// 1. Try to load the existing store file
    /// 2. If corruption detected, try to load from backup
    /// 3. If both fail, start with an empty store
    /// 4. Create parent directories if needed
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let store = Self::prepare(&path).await?;
        Ok(Self::with_memory(path, MemoryDaemon::from_store(store)))
    }

    /// Open a store file, seeding it with `seed` when it does not exist yet
    pub async fn open_or_seed<P: AsRef<Path>>(path: P, seed: DaemonStore) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let exists = path.exists();
        let store = Self::prepare(&path).await?;
        let daemon = if exists {
            Self::with_memory(path, MemoryDaemon::from_store(store))
        } else {
            let daemon = Self::with_memory(path, MemoryDaemon::from_store(seed));
            daemon.sync().await?;
            daemon
        };
        Ok(daemon)
    }

    fn with_memory(path: PathBuf, memory: MemoryDaemon) -> Self {
        Self {
            path,
            memory,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn prepare(path: &Path) -> Result<DaemonStore> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        Self::load_store_with_recovery(path).await
    }

    /// The simulation behind this daemon (fault injection, inspection)
    pub fn memory(&self) -> &MemoryDaemon {
        &self.memory
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the store with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load main store file
    /// 2. If it does not parse, try loading backup
    /// 3. If backup also fails, start with an empty store
    async fn load_store_with_recovery(path: &Path) -> Result<DaemonStore> {
        let err = match Self::load_store(path).await {
            Ok(store) => {
                tracing::debug!("Loaded store from file: {} profiles", store.profiles.len());
                return Ok(store);
            }
            Err(e) if e.kind() == ErrorKind::Serialization => e,
            Err(e) => return Err(e),
        };

        tracing::warn!(
            "Store file appears corrupted: {}. Attempting recovery from backup.",
            err
        );
        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No backup file found. Starting with empty store.");
            return Ok(DaemonStore::default());
        }

        match Self::load_store(&backup_path).await {
            Ok(store) => {
                tracing::info!("Recovered store from backup: {} profiles", store.profiles.len());
                if let Err(restore_err) = Self::restore_from_backup(path, &backup_path).await {
                    tracing::error!("Failed to restore store file from backup: {}", restore_err);
                }
                Ok(store)
            }
            Err(backup_err) => {
                tracing::error!(
                    "Backup also corrupted: {}. Starting with empty store.",
                    backup_err
                );
                Ok(DaemonStore::default())
            }
        }
    }

    async fn load_store(path: &Path) -> Result<DaemonStore> {
        if !path.exists() {
            tracing::debug!("Store file does not exist: {}", path.display());
            return Ok(DaemonStore::default());
        }

        let content = fs::read_to_string(path).await?;
        let file: StoreFileFormat = serde_json::from_str(&content)?;

        if file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Store file version mismatch: expected {}, got {}. \
                Attempting to load anyway.",
                STORE_FILE_VERSION,
                file.version
            );
        }

        Ok(file.store)
    }

    /// Write the current store to file atomically
    async fn write_store(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let file = StoreFileFormat {
            version: STORE_FILE_VERSION.to_string(),
            store: self.memory.export().await,
        };
        let json = serde_json::to_string_pretty(&file)?;

        // Write to temporary file first
        let temp_path = self.temp_path();
        {
            let mut out = fs::File::create(&temp_path).await.map_err(|e| {
                Error::Other(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            out.write_all(json.as_bytes()).await?;
            out.flush().await?;
        }

        // Create backup of current file (if it exists)
        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        // Atomic rename (temp -> actual)
        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::Other(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Store written to file: {}", self.path.display());
        Ok(())
    }

    async fn restore_from_backup(path: &Path, backup_path: &Path) -> Result<()> {
        fs::copy(backup_path, path).await?;
        tracing::info!("Restored store file from backup");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }

    /// Force immediate write to disk
    pub async fn sync(&self) -> Result<()> {
        self.write_store().await
    }

    /// Drop in-memory changes that never reached the disk
    async fn revert_to_disk(&self) {
        let _guard = self.write_lock.lock().await;
        match Self::load_store(&self.path).await {
            Ok(store) => self.memory.replace_store(store).await,
            Err(e) => tracing::error!("Failed to reload store after a failed write: {}", e),
        }
    }

    /// Forward `submitted` once the store has been persisted
    fn persisted(&self, submitted: Result<Completion>) -> Result<Completion> {
        let completion = submitted?;
        let (tx, forwarded) = Completion::channel();
        let daemon = self.clone();
        tokio::spawn(async move {
            let result = match completion.outcome().await {
                Ok(()) => match daemon.write_store().await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        daemon.revert_to_disk().await;
                        Err(format!("failed to persist profile store: {e}"))
                    }
                },
                Err(cause) => Err(cause.to_string()),
            };
            let _ = tx.send(result);
        });
        Ok(forwarded)
    }
}

#[async_trait]
impl NetworkDaemon for FileDaemon {
    async fn list_devices(&self) -> Result<Vec<Interface>> {
        self.memory.list_devices().await
    }

    async fn query_global(&self) -> Result<GlobalState> {
        self.memory.query_global().await
    }

    async fn neighbors(&self, device: &str) -> Result<Vec<Vec<serde_json::Value>>> {
        self.memory.neighbors(device).await
    }

    async fn route_defaults(&self) -> Result<RouteDefaults> {
        self.memory.route_defaults().await
    }

    async fn create_profile(&self, profile: &Interface) -> Result<Completion> {
        self.persisted(self.memory.create_profile(profile).await)
    }

    async fn modify_profile(&self, profile: &Interface) -> Result<Completion> {
        self.persisted(self.memory.modify_profile(profile).await)
    }

    async fn delete_profile(&self, name: &str) -> Result<Completion> {
        self.persisted(self.memory.delete_profile(name).await)
    }

    async fn activate_profile(&self, name: &str) -> Result<Completion> {
        self.persisted(self.memory.activate_profile(name).await)
    }

    async fn deactivate_device(&self, name: &str) -> Result<Completion> {
        self.persisted(self.memory.deactivate_device(name).await)
    }

    async fn commit_global(&self, global: &GlobalState) -> Result<Completion> {
        self.persisted(self.memory.commit_global(global).await)
    }

    fn daemon_name(&self) -> &str {
        FILE_DAEMON_NAME
    }
}

/// Factory for creating FileDaemon instances
///
/// Expects `{"path": "..."}`. Opening reads the store file, so the factory
/// blocks on the current runtime and must be called from a multi-threaded
/// one.
pub struct FileDaemonFactory;

impl DaemonFactory for FileDaemonFactory {
    fn create(&self, config: &serde_json::Value) -> Result<Box<dyn NetworkDaemon>> {
        let path = config
            .get("path")
            .and_then(|p| p.as_str())
            .ok_or_else(|| Error::config("file backend requires a 'path'"))?
            .to_string();

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::config("file backend must be created inside a tokio runtime"))?;
        if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::CurrentThread {
            return Err(Error::config(
                "file backend factory requires a multi-threaded runtime; use FileDaemon::open",
            ));
        }
        let daemon = tokio::task::block_in_place(|| handle.block_on(FileDaemon::open(&path)))?;
        Ok(Box::new(daemon))
    }
}
