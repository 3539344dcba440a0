//! Resume capability for exports
//!
//! Provides checkpoint and export-metadata persistence with atomic writes and file locking.

pub mod checkpoint;
pub mod lock;
pub mod meta;
pub mod state;
pub mod store;

pub use checkpoint::Checkpoint;
pub use lock::ExportLock;
pub use meta::{ExportMeta, MetaStore};
pub use state::ResumeError;
pub use store::CheckpointStore;

use std::path::{Path, PathBuf};

/// Layout of the state directory
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    /// Use `root` as the state directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Platform default, e.g. `~/.local/share/pocket-export` on Linux
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pocket-export")
    }

    /// State directory root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `checkpoints/`
    pub fn checkpoints(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    /// `meta/`
    pub fn meta(&self) -> PathBuf {
        self.root.join("meta")
    }

    /// `credentials/`
    pub fn credentials(&self) -> PathBuf {
        self.root.join("credentials")
    }

    /// `locks/`
    pub fn locks(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Checkpoint store rooted in this layout
    pub fn checkpoint_store(&self) -> CheckpointStore {
        CheckpointStore::new(self.checkpoints())
    }

    /// Metadata store rooted in this layout
    pub fn meta_store(&self) -> MetaStore {
        MetaStore::new(self.meta())
    }
}
