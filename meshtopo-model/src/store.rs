//! Snapshot persistence for warm restarts.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshtopo_types::{Compatibility, ModelSnapshot, SchemaVersion};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::manager::ModelManager;
use crate::StoreError;

/// Durable storage for the latest encoded snapshot.
pub trait SnapshotStore: Send + Sync + Debug {
    /// Replace the stored snapshot.
    fn save(&self, bytes: &[u8]) -> Result<(), StoreError>;

    /// The latest stored snapshot, or `None` if nothing was ever saved.
    fn load_latest(&self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the stored state of traces that have not expired yet.
    fn save_window(&self, bytes: &[u8]) -> Result<(), StoreError>;

    /// The latest stored window state, or `None` if nothing was ever saved.
    fn load_window(&self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Human-readable description of where snapshots go.
    fn description(&self) -> &str;
}

/// Stores the snapshot in a single file, and window state next to it in
/// `<path>.window`.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// target, so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    window_path: PathBuf,
    description: String,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let window_path = with_suffix(&path, ".window");
        let description = format!("file: {}", path.display());
        Self {
            path,
            window_path,
            description,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn window_path(&self) -> &Path {
        &self.window_path
    }

    fn io_error(path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = with_suffix(path, ".tmp");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Self::io_error(parent, e))?;
        }
        std::fs::write(&tmp, bytes).map_err(|e| Self::io_error(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| Self::io_error(path, e))
    }

    fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_error(path, e)),
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

impl SnapshotStore for FileStore {
    fn save(&self, bytes: &[u8]) -> Result<(), StoreError> {
        Self::write_atomic(&self.path, bytes)
    }

    fn load_latest(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Self::read_optional(&self.path)
    }

    fn save_window(&self, bytes: &[u8]) -> Result<(), StoreError> {
        Self::write_atomic(&self.window_path, bytes)
    }

    fn load_window(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Self::read_optional(&self.window_path)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Keeps the latest snapshot in memory. Can be told to fail.
#[derive(Debug)]
pub struct MemoryStore {
    latest: Mutex<Option<Vec<u8>>>,
    window: Mutex<Option<Vec<u8>>>,
    failing: AtomicBool,
    saves: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(None),
            window: Mutex::new(None),
            failing: AtomicBool::new(false),
            saves: AtomicU64::new(0),
        }
    }

    /// Start from previously stored bytes.
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        let store = Self::new();
        *store.latest.lock() = Some(bytes);
        store
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful model saves.
    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store set to fail".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore for MemoryStore {
    fn save(&self, bytes: &[u8]) -> Result<(), StoreError> {
        self.check()?;
        *self.latest.lock() = Some(bytes.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_latest(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        Ok(self.latest.lock().clone())
    }

    fn save_window(&self, bytes: &[u8]) -> Result<(), StoreError> {
        self.check()?;
        *self.window.lock() = Some(bytes.to_vec());
        Ok(())
    }

    fn load_window(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        Ok(self.window.lock().clone())
    }

    fn description(&self) -> &str {
        "memory"
    }
}

/// Encoding of persisted snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotCodec {
    #[default]
    Json,
    Cbor,
}

impl SnapshotCodec {
    pub fn serialize(&self, snapshot: &ModelSnapshot) -> Result<Vec<u8>, StoreError> {
        match self {
            SnapshotCodec::Json => {
                serde_json::to_vec_pretty(snapshot).map_err(|e| StoreError::Encode(e.to_string()))
            }
            SnapshotCodec::Cbor => {
                minicbor::to_vec(snapshot).map_err(|e| StoreError::Encode(e.to_string()))
            }
        }
    }

    /// Decode a snapshot and check its schema version.
    pub fn deserialize(&self, bytes: &[u8]) -> Result<ModelSnapshot, StoreError> {
        let snapshot: ModelSnapshot = match self {
            SnapshotCodec::Json => {
                serde_json::from_slice(bytes).map_err(|e| StoreError::Decode(e.to_string()))?
            }
            SnapshotCodec::Cbor => {
                minicbor::decode(bytes).map_err(|e| StoreError::Decode(e.to_string()))?
            }
        };
        match snapshot.version.compatibility() {
            Compatibility::Incompatible => {
                return Err(StoreError::Incompatible {
                    found: snapshot.version,
                    expected: SchemaVersion::current(),
                })
            }
            Compatibility::Newer => warn!(
                found = %snapshot.version,
                current = %SchemaVersion::current(),
                "snapshot written by a newer build, unknown fields will be dropped"
            ),
            Compatibility::Same | Compatibility::Older => {}
        }
        Ok(snapshot)
    }
}

impl FromStr for SnapshotCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(SnapshotCodec::Json),
            "cbor" => Ok(SnapshotCodec::Cbor),
            other => Err(format!("unknown snapshot codec: {}", other)),
        }
    }
}

/// When snapshots are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotPolicy {
    /// After every mutating batch.
    #[default]
    Inline,
    /// On a fixed interval from a background task.
    Periodic { interval: Duration },
}

/// Persists the manager's graph and restores it on startup.
///
/// A save is skipped when nothing changed since the last successful one.
/// Failures are logged and counted; the in-memory graph is never rolled back.
#[derive(Debug)]
pub struct ModelStore {
    manager: Arc<ModelManager>,
    backend: Arc<dyn SnapshotStore>,
    codec: SnapshotCodec,
    persisted_generation: Mutex<Option<u64>>,
    saves: AtomicU64,
    failures: AtomicU64,
}

impl ModelStore {
    pub fn new(manager: Arc<ModelManager>, backend: Arc<dyn SnapshotStore>, codec: SnapshotCodec) -> Self {
        Self {
            manager,
            backend,
            codec,
            persisted_generation: Mutex::new(None),
            saves: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn manager(&self) -> &Arc<ModelManager> {
        &self.manager
    }

    pub fn codec(&self) -> SnapshotCodec {
        self.codec
    }

    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Persist the current graph. Returns `Ok(false)` when it was unchanged.
    pub fn try_store_current_model(&self) -> Result<bool, StoreError> {
        let mut persisted = self.persisted_generation.lock();
        let generation = self.manager.generation();
        if *persisted == Some(generation) {
            return Ok(false);
        }

        let snapshot = self.manager.snapshot();
        let bytes = self.codec.serialize(&snapshot)?;
        self.backend.save(&bytes)?;

        *persisted = Some(generation);
        self.saves.fetch_add(1, Ordering::Relaxed);
        info!(
            store = self.backend.description(),
            nodes = snapshot.node_count(),
            edges = snapshot.edge_count(),
            bytes = bytes.len(),
            "model snapshot saved"
        );
        Ok(true)
    }

    /// Persist the current graph, logging instead of returning failures.
    pub fn store_current_model(&self) -> bool {
        self.persist().unwrap_or(false)
    }

    fn persist(&self) -> Result<bool, StoreError> {
        let result = self.try_store_current_model();
        if let Err(e) = &result {
            self.failures.fetch_add(1, Ordering::Relaxed);
            error!(store = self.backend.description(), error = %e, "failed to persist model snapshot");
        }
        result
    }

    /// Read and decode the latest snapshot without applying it.
    pub fn try_load_model(&self) -> Result<Option<ModelSnapshot>, StoreError> {
        match self.backend.load_latest()? {
            Some(bytes) => self.codec.deserialize(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Restore the manager from the latest snapshot.
    ///
    /// A missing or unreadable snapshot leaves the model empty. Returns true
    /// if a snapshot was restored.
    pub fn load_model(&self) -> bool {
        match self.try_load_model() {
            Ok(Some(snapshot)) => {
                let nodes = snapshot.node_count();
                let edges = snapshot.edge_count();
                self.manager.restore(snapshot);
                *self.persisted_generation.lock() = Some(self.manager.generation());
                info!(store = self.backend.description(), nodes, edges, "model restored from snapshot");
                true
            }
            Ok(None) => {
                info!(store = self.backend.description(), "no snapshot found, starting with an empty model");
                false
            }
            Err(e) => {
                warn!(store = self.backend.description(), error = %e, "could not load snapshot, starting with an empty model");
                false
            }
        }
    }

    /// Start background persistence on `interval`.
    ///
    /// Returns a handle for flushing on demand and for stopping the task.
    #[cfg(feature = "tokio")]
    pub fn start(self: &Arc<Self>, interval: Duration) -> PersistHandle {
        use tokio::sync::{mpsc, oneshot, watch};

        let (stop_tx, stop_rx) = watch::channel(false);
        let (flush_tx, mut flush_rx) = mpsc::channel::<oneshot::Sender<bool>>(8);
        let store = self.clone();

        let task = tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            let mut stop_rx = stop_rx;

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        store.store_current_model();
                    }
                    Some(reply) = flush_rx.recv() => {
                        let _ = reply.send(store.persist().is_ok());
                    }
                    changed = stop_rx.changed() => {
                        // a dropped handle counts as a stop request
                        if changed.is_err() || *stop_rx.borrow() {
                            store.store_current_model();
                            break;
                        }
                    }
                }
            }
        });

        PersistHandle {
            stop_tx,
            flush_tx,
            task,
        }
    }
}

/// Handle for controlling background persistence.
#[cfg(feature = "tokio")]
#[derive(Debug)]
pub struct PersistHandle {
    stop_tx: tokio::sync::watch::Sender<bool>,
    flush_tx: tokio::sync::mpsc::Sender<tokio::sync::oneshot::Sender<bool>>,
    task: tokio::task::JoinHandle<()>,
}

#[cfg(feature = "tokio")]
impl PersistHandle {
    /// Persist now and wait for the result. Returns false if the save failed
    /// or the task is gone.
    pub async fn flush(&self) -> bool {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self.flush_tx.send(tx).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Stop the task after a final save.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "persistence task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshtopo_types::{NodeId, TimeRange};

    fn populated() -> Arc<ModelManager> {
        let manager = Arc::new(ModelManager::new());
        let a = NodeId::new("mesh", "default", "hr", "gateway");
        let b = NodeId::new("mesh", "default", "hr", "employee");
        manager.add_edge(&a, &b, "employee", Some(1_000)).unwrap();
        manager
    }

    #[test]
    fn test_file_store_roundtrip_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.json");

        let manager = populated();
        let store = ModelStore::new(manager.clone(), Arc::new(FileStore::new(&path)), SnapshotCodec::Json);
        assert!(store.store_current_model());
        assert!(path.exists());

        let fresh = Arc::new(ModelManager::new());
        let restarted = ModelStore::new(fresh.clone(), Arc::new(FileStore::new(&path)), SnapshotCodec::Json);
        assert!(restarted.load_model());
        assert_eq!(fresh.current_models(), manager.current_models());
    }

    #[test]
    fn test_file_store_keeps_window_beside_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let store = FileStore::new(&path);
        assert_eq!(store.window_path(), dir.path().join("model.json.window"));
        assert!(store.load_window().unwrap().is_none());

        store.save(b"model").unwrap();
        store.save_window(b"runs").unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.load_latest().unwrap().as_deref(), Some(&b"model"[..]));
        assert_eq!(reopened.load_window().unwrap().as_deref(), Some(&b"runs"[..]));
    }

    #[test]
    fn test_unchanged_model_is_not_rewritten() {
        let backend = Arc::new(MemoryStore::new());
        let manager = populated();
        let store = ModelStore::new(manager.clone(), backend.clone(), SnapshotCodec::Json);

        assert!(store.store_current_model());
        assert!(!store.store_current_model());
        assert_eq!(backend.saves(), 1);

        manager.get_or_generate_node("mesh", "default", "hr", "payroll");
        assert!(store.store_current_model());
        assert_eq!(backend.saves(), 2);
    }

    #[test]
    fn test_failed_save_keeps_memory_graph() {
        let backend = Arc::new(MemoryStore::new());
        backend.set_failing(true);
        let manager = populated();
        let store = ModelStore::new(manager.clone(), backend.clone(), SnapshotCodec::Json);

        assert!(!store.store_current_model());
        assert_eq!(store.failures(), 1);
        assert_eq!(manager.edge_count("mesh"), 1);

        // the failed generation is retried once the backend recovers
        backend.set_failing(false);
        assert!(store.store_current_model());
    }

    #[test]
    fn test_absent_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ModelManager::new());
        let store = ModelStore::new(
            manager.clone(),
            Arc::new(FileStore::new(dir.path().join("missing.json"))),
            SnapshotCodec::Json,
        );
        assert!(!store.load_model());
        assert!(manager.runtimes().is_empty());
    }

    #[test]
    fn test_corrupt_snapshot_starts_empty() {
        let manager = Arc::new(ModelManager::new());
        let backend = Arc::new(MemoryStore::with_bytes(b"{not json".to_vec()));
        let store = ModelStore::new(manager.clone(), backend, SnapshotCodec::Json);
        assert!(!store.load_model());
        assert!(matches!(store.try_load_model(), Err(StoreError::Decode(_))));
        assert!(manager
            .get_runtime_dependency_model(TimeRange::ALL, "mesh")
            .is_empty());
    }

    #[test]
    fn test_incompatible_schema_rejected() {
        let mut snapshot = populated().snapshot();
        snapshot.version = SchemaVersion::new(99, 0);
        let bytes = SnapshotCodec::Json.serialize(&snapshot).unwrap();
        assert!(matches!(
            SnapshotCodec::Json.deserialize(&bytes),
            Err(StoreError::Incompatible { .. })
        ));
    }

    #[test]
    fn test_newer_minor_still_restores() {
        let mut snapshot = populated().snapshot();
        snapshot.version = SchemaVersion::new(SchemaVersion::current().major, 9);
        let bytes = SnapshotCodec::Json.serialize(&snapshot).unwrap();
        let decoded = SnapshotCodec::Json.deserialize(&bytes).unwrap();
        assert_eq!(decoded.edge_count(), 1);
    }

    #[test]
    fn test_cbor_codec() {
        let snapshot = populated().snapshot();
        let bytes = SnapshotCodec::Cbor.serialize(&snapshot).unwrap();
        assert_eq!(SnapshotCodec::Cbor.deserialize(&bytes).unwrap(), snapshot);
        assert_eq!("CBOR".parse::<SnapshotCodec>(), Ok(SnapshotCodec::Cbor));
        assert!("yaml".parse::<SnapshotCodec>().is_err());
    }

    #[tokio::test]
    async fn test_periodic_flush_barrier_and_shutdown() {
        let backend = Arc::new(MemoryStore::new());
        let manager = populated();
        let store = Arc::new(ModelStore::new(manager.clone(), backend.clone(), SnapshotCodec::Json));

        let handle = store.start(Duration::from_secs(3600));
        assert!(handle.flush().await);
        let saves = backend.saves();
        assert!(saves >= 1);

        manager.get_or_generate_node("mesh", "default", "hr", "payroll");
        handle.shutdown().await;
        assert_eq!(backend.saves(), saves + 1);

        let restored = Arc::new(ModelManager::new());
        let reader = ModelStore::new(restored.clone(), backend, SnapshotCodec::Json);
        assert!(reader.load_model());
        assert_eq!(restored.node_count("mesh"), 3);
    }
}
