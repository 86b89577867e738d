//! CounterStore trait: pluggable persistence backend
//!
//! Abstracts where the leveling counters live so the decision engine never
//! touches the filesystem directly:
//! - `JsonFileStore`: `state.json` in the state directory, written atomically
//! - `InMemoryStore`: for tests and dry runs

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::counters::{Clock, PersistedCounters};

/// Trait for pluggable counter persistence.
///
/// Writes are synchronous: once `save_record` returns `Ok`, a following
/// `load_record` in the same process sees the new record.
pub trait CounterStore: Send {
    /// Load the stored record, `None` if nothing has been stored yet.
    fn load_record(&self) -> Result<Option<PersistedCounters>, StorageError>;

    /// Replace the stored record.
    fn save_record(&mut self, record: &PersistedCounters) -> Result<(), StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("state file I/O error ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage error: {0}")]
    Backend(String),
}

/// Load the record, creating and storing a fresh one if none exists.
///
/// The result is written back so any backfilled fields reach disk.
pub fn load_or_init(
    store: &mut dyn CounterStore,
    clock: &dyn Clock,
) -> Result<PersistedCounters, StorageError> {
    let record = match store.load_record()? {
        Some(record) => {
            tracing::debug!(backend = store.backend_name(), %record, "Loaded leveling counters");
            record
        }
        None => {
            tracing::info!(backend = store.backend_name(), "No stored counters, starting fresh");
            PersistedCounters::fresh(clock.today())
        }
    };
    store.save_record(&record)?;
    Ok(record)
}

// ============================================================================
// JSON File Store
// ============================================================================

/// Counters in a JSON file, replaced atomically (temp file, then rename).
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Store at `state.json` inside `dir`.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self::new(dir.as_ref().join(crate::config::defaults::STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CounterStore for JsonFileStore {
    fn load_record(&self) -> Result<Option<PersistedCounters>, StorageError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }

    fn save_record(&mut self, record: &PersistedCounters) -> Result<(), StorageError> {
        let json = serde_json::to_vec(record)?;

        let tmp_path = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        std::fs::write(&tmp_path, &json).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "JsonFile"
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-memory persistence for tests and dry runs.
///
/// Clones share the same record, so a test can keep a handle after giving
/// the store to the engine. Not durable.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<InMemoryInner>>,
}

#[derive(Debug, Default)]
struct InMemoryInner {
    record: Option<PersistedCounters>,
    writes: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a record.
    pub fn with_record(record: PersistedCounters) -> Self {
        let store = Self::new();
        store.lock().record = Some(record);
        store
    }

    /// Latest stored record.
    pub fn record(&self) -> Option<PersistedCounters> {
        self.lock().record.clone()
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CounterStore for InMemoryStore {
    fn load_record(&self) -> Result<Option<PersistedCounters>, StorageError> {
        Ok(self.lock().record.clone())
    }

    fn save_record(&mut self, record: &PersistedCounters) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.record = Some(record.clone());
        inner.writes += 1;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}
