//! Uniform block-level file I/O — the engine's only access point to the
//! filesystem.
//!
//! One concrete implementation today (a standard filesystem handle); the
//! trait leaves room for future variants (memory-mapped, direct I/O) exactly
//! as spec.md §4.1 describes, without the engine or the record codec above
//! it needing to know which one is in use.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;

/// Permission bits for every segment file this engine creates.
pub const SEGMENT_FILE_MODE: u32 = 0o644;

/// Capability set over one file. Implementations must make `write` atomic
/// with respect to the file's current end (`O_APPEND` semantics) — this is
/// what makes [`crate::data_file::DataFile::write`] safe to call while other
/// threads hold only a read lock on the engine (spec.md §5).
pub trait IoManager: Send + Sync {
    /// Positional read; may return fewer bytes than `buf.len()` only at EOF.
    fn read(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
    /// Append at the current end of file. On success, `bytes_written == buf.len()`.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;
    /// Durably flush the file's data to stable storage.
    fn sync(&self) -> io::Result<()>;
    /// Current length of the file in bytes.
    fn size(&self) -> io::Result<u64>;
    /// Truncate (or extend) the file to exactly `len` bytes. Used to discard
    /// a crash-truncated tail frame once replay has determined the true
    /// end of valid data.
    fn set_len(&self, len: u64) -> io::Result<()>;
    /// Release the underlying handle. A no-op beyond `sync()` in this
    /// implementation: Rust has no explicit close distinct from `Drop`, so
    /// the OS descriptor is actually released when the handle is dropped.
    fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Standard filesystem I/O manager: one `O_CREAT | O_RDWR | O_APPEND` handle,
/// permission `0o644`.
pub struct FileIo {
    file: File,
}

impl FileIo {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .append(true)
            .mode(SEGMENT_FILE_MODE)
            .open(path)?;
        Ok(Self { file })
    }
}

impl IoManager for FileIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        // `read_at` (pread) never moves the shared file cursor, so concurrent
        // readers and the single appending writer never race on position.
        self.file.read_at(buf, offset)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        // `&File` implements `Write` via the OS append semantics negotiated
        // at `open()` time; no seek is ever issued.
        (&self.file).write_at_end(buf)
    }

    fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }
}

/// Small helper trait so `write()` above reads as "append", not "write at
/// some offset I forgot to pass" — `std::fs::File`'s own `Write::write_all`
/// already appends under `O_APPEND`, this just names that clearly at the
/// call site.
trait AppendExt {
    fn write_at_end(&self, buf: &[u8]) -> io::Result<usize>;
}

impl AppendExt for &File {
    fn write_at_end(&self, buf: &[u8]) -> io::Result<usize> {
        use std::io::Write;
        let mut f = *self;
        f.write_all(buf)?;
        Ok(buf.len())
    }
}
