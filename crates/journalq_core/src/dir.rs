//! Journal directory management.
//!
//! ```text
//! <journal_dir>/
//! ├─ LOCK                                # Advisory lock for single-writer
//! └─ journal-00000000000000000001.jrn    # Segment files
//! ```
//!
//! The LOCK file ensures only one process writes to a journal directory at a
//! time. The lock is released when the [`JournalDir`] is dropped.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// An exclusively locked journal directory.
#[derive(Debug)]
pub struct JournalDir {
    path: PathBuf,
    _lock_file: File,
}

impl JournalDir {
    /// Opens or creates a journal directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path is not a directory
    /// - Another process holds the lock (returns `JournalLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "journal directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::JournalLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Syncs the directory so file creations, renames and deletions are
    /// durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be opened or synced.
    #[cfg(unix)]
    pub fn sync(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    /// NTFS journals metadata itself; nothing to do.
    #[cfg(not(unix))]
    pub fn sync(&self) -> CoreResult<()> {
        Ok(())
    }
}
