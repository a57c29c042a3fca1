//! Advisory lock files guarding the file-backed adapters.
//!
//! A [`LockFile`] holds an exclusive OS lock (`flock` on Unix, `LockFileEx` on
//! Windows) for as long as it is alive. The lock is released when the value is
//! dropped or the process exits, so a crashed holder never leaves a stale lock
//! behind. Each open of the same path is a separate holder, also within one
//! process.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

#[derive(Debug)]
pub(crate) struct LockFile {
    path: PathBuf,
    _file: File,
}

impl LockFile {
    /// Takes the exclusive lock on `path`, creating the file if needed.
    ///
    /// Returns `Ok(None)` when another holder has the lock.
    pub(crate) fn try_acquire(path: impl Into<PathBuf>) -> io::Result<Option<Self>> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "acquired lock");
                Ok(Some(Self { path, _file: file }))
            }
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
