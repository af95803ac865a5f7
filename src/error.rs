//! Engine-wide error taxonomy.
//!
//! One flat enum covers every failure the public API can produce. This
//! mirrors the teacher's per-module `#[derive(Error, Debug)]` convention
//! (`SuperblockError`, `CodecError`) collapsed into a single type, since the
//! engine exposes one API surface rather than several independent formats.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Caller-supplied key has zero length. User error; engine state unchanged.
    #[error("key is empty")]
    KeyIsEmpty,

    /// `Get` on an absent or tombstoned key. Expected, not exceptional.
    #[error("key not found")]
    KeyNotFound,

    /// Index mutation rejected. Not expected from the bundled backends;
    /// defined for interface completeness.
    #[error("failed to update index")]
    IndexUpdateFailed,

    /// Index refers to a file id not present in the engine's file set.
    /// Indicates internal inconsistency; the engine remains usable for
    /// unaffected keys.
    #[error("data file {0} not found")]
    DataFileNotFound(u32),

    /// Options validation failed at `Engine::open`.
    #[error("bad options: {0}")]
    BadOptions(&'static str),

    /// Unparseable segment filename, or a mid-segment checksum failure
    /// during replay. Fatal for `Engine::open`.
    #[error("data directory corrupted: {0}")]
    DataDirectoryCorrupted(String),

    /// Checksum or framing failure decoding a record outside of replay.
    /// Bubbled up to the caller of `Get`.
    #[error("corrupt record: {0}")]
    CorruptRecord(&'static str),

    /// Any underlying filesystem error, surfaced opaquely.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
