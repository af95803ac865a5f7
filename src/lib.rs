//! # caskdb — an embedded, append-only log-structured key/value store
//!
//! Format guarantees:
//! - Keys and values are opaque bytes; values are never interpreted
//! - Every record frame carries a mandatory CRC-32; a checksum mismatch
//!   never silently returns wrong data
//! - The segment log is append-only: once a segment stops being the active
//!   file, its bytes never change
//! - The index is never persisted; it is always rebuilt by replaying the
//!   segment log from `0.data` forward
//! - A crash mid-append leaves at most one truncated trailing frame, which
//!   replay tolerates; a corrupt record anywhere else is a fatal open error

pub mod data_file;
pub mod engine;
pub mod error;
pub mod index;
pub mod io;
pub mod options;
pub mod record;

pub use engine::{Engine, EngineStat};
pub use error::{EngineError, Result};
pub use options::{IndexType, Options};
pub use record::{Record, RecordPosition, RecordType};
