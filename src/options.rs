//! Engine configuration.
//!
//! Plain struct plus a `Default` impl, in the teacher's `PackOptions`
//! style — a config *value*, not a config *file format*. Loading options
//! from a file on disk is deliberately not provided here; see SPEC_FULL.md
//! "Ambient stack / Configuration".

use std::path::PathBuf;

use crate::error::EngineError;

/// Default rotation threshold: 256 MiB.
pub const DEFAULT_DATA_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// In-memory index backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// Balanced ordered map (the only backend this crate implements).
    BTree,
    /// Adaptive radix tree. Reserved: selecting this fails `Engine::open`
    /// with `BadOptions` until an ART backend exists.
    Art,
}

impl Default for IndexType {
    fn default() -> Self {
        IndexType::BTree
    }
}

/// Configuration for [`crate::Engine::open`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Data directory path. Created (with parents, mode `0o755`) if absent.
    pub dir_path: PathBuf,
    /// Maximum bytes per segment before rotation.
    pub data_file_size: u64,
    /// If true, `fsync` after every successful append.
    pub sync_writes: bool,
    /// In-memory index backend.
    pub index_type: IndexType,
}

impl Options {
    /// Validate per spec.md §4.5.1 step 1: `dir_path` non-empty,
    /// `data_file_size > 0`.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(EngineError::BadOptions("dir_path must not be empty"));
        }
        if self.data_file_size == 0 {
            return Err(EngineError::BadOptions("data_file_size must be > 0"));
        }
        Ok(())
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir(),
            data_file_size: DEFAULT_DATA_FILE_SIZE,
            sync_writes: false,
            index_type: IndexType::BTree,
        }
    }
}
