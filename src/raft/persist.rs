use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::error::{RaftError, Result};
use crate::raft::log::LogEntry;

/// The part of `RaftState` that must survive a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    pub current_term: u64,
    pub voted_for: Option<u64>,
    /// Real log entries, index 1 onwards.
    pub log: Vec<LogEntry>,
}

/// Durable home of term, vote and log.
///
/// `save` is called with the state lock held, after every change to those
/// fields and before any reply that depends on them leaves the node.
pub trait Persister: Send + Sync {
    fn save(&self, state: &PersistentState) -> Result<()>;

    fn load(&self) -> Result<Option<PersistentState>>;
}

/// Keeps the last saved image in memory. Outlives the node that wrote it,
/// so tests can "crash" a node and restart it from the same persister.
#[derive(Debug, Default)]
pub struct MemoryPersister {
    image: Mutex<Option<Vec<u8>>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size in bytes of the saved image.
    pub fn size(&self) -> usize {
        self.image
            .lock()
            .map(|image| image.as_ref().map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl Persister for MemoryPersister {
    fn save(&self, state: &PersistentState) -> Result<()> {
        let bytes = serde_json::to_vec(state)?;
        let mut image = self
            .image
            .lock()
            .map_err(|_| RaftError::Storage("persister lock poisoned".to_string()))?;
        *image = Some(bytes);
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistentState>> {
        let image = self
            .image
            .lock()
            .map_err(|_| RaftError::Storage("persister lock poisoned".to_string()))?;
        match image.as_deref() {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }
}

/// Stores state as JSON in `<dir>/raft-state.json`.
///
/// Writes go to a temporary file which is synced and renamed over the old
/// one, so a crash mid-write leaves the previous image intact.
#[derive(Debug)]
pub struct FilePersister {
    path: PathBuf,
}

impl FilePersister {
    const FILE_NAME: &'static str = "raft-state.json";

    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            path: dir.as_ref().join(Self::FILE_NAME),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomically(&self, bytes: &[u8]) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Run blocking file I/O without stalling the other tasks of a
/// multi-threaded runtime. `block_in_place` is unavailable on the
/// current-thread runtime, where `f` runs inline.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

impl Persister for FilePersister {
    fn save(&self, state: &PersistentState) -> Result<()> {
        let bytes = serde_json::to_vec(state)?;
        blocking(|| self.write_atomically(&bytes))
    }

    fn load(&self) -> Result<Option<PersistentState>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
