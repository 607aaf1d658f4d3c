//! Sequential file and factory trait definitions.

use crate::error::StorageResult;
use std::fmt;
use std::sync::Arc;

/// A single append-only, randomly readable file.
///
/// Sequential files are **opaque byte stores**. They know nothing about
/// journal records or segment headers; `journalq_core` owns all format
/// interpretation.
///
/// # Invariants
///
/// - `write` returns the offset at which the data starts
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `size` never observes a partially applied `write`
/// - `write(data, true)` does not return until the data is on stable storage
///
/// All methods take `&self`: implementations synchronize internally so a
/// file can be shared between the append path and a background flusher.
pub trait SequentialFile: Send + Sync + fmt::Debug {
    /// Returns the file name (relative to its factory).
    fn name(&self) -> String;

    /// Opens the file, creating it if it does not exist.
    ///
    /// Opening an already open file is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    fn open(&self) -> StorageResult<()>;

    /// Closes the file. Closing a closed file is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if pending data cannot be flushed.
    fn close(&self) -> StorageResult<()>;

    /// Returns whether the file is currently open.
    fn is_open(&self) -> bool;

    /// Appends `data` at the end of the file and returns its offset.
    ///
    /// With `sync = true` the call returns only once the data is durable.
    /// With `sync = false` the data is handed to the OS and becomes durable
    /// at the next [`SequentialFile::sync`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file is closed or the write fails. Failures
    /// are never retried at this layer.
    fn write(&self, data: &[u8], sync: bool) -> StorageResult<u64>;

    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends past the end of the file, the
    /// file is closed, or an I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Returns the logical end of data, i.e. where the next write lands.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is closed.
    fn size(&self) -> StorageResult<u64>;

    /// Forces all written data to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails or the file is closed.
    fn sync(&self) -> StorageResult<()>;

    /// Truncates the file to `new_size` bytes and syncs the result.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` exceeds the current size or the
    /// truncation fails.
    fn truncate(&self, new_size: u64) -> StorageResult<()>;

    /// Renames the file. An open file stays open under its new name.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails.
    fn rename(&self, new_name: &str) -> StorageResult<()>;

    /// Closes and permanently removes the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    fn delete(&self) -> StorageResult<()>;
}

/// Creates and enumerates [`SequentialFile`]s in one namespace (usually a
/// directory).
///
/// # Implementors
///
/// - [`super::DirectoryFactory`] - OS files in a directory
/// - [`super::InMemoryFactory`] - for tests and ephemeral journals
pub trait SequentialFileFactory: Send + Sync + fmt::Debug {
    /// Returns a handle for the named file. The file is not opened.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle cannot be created.
    fn create_file(&self, name: &str) -> StorageResult<Arc<dyn SequentialFile>>;

    /// Lists existing files named `{prefix}-*.{extension}`, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be listed.
    fn list_files(&self, prefix: &str, extension: &str) -> StorageResult<Vec<String>>;
}

/// Returns whether `name` has the shape `{prefix}-*.{extension}`.
pub(crate) fn matches_pattern(name: &str, prefix: &str, extension: &str) -> bool {
    name.len() > prefix.len() + extension.len() + 2
        && name.starts_with(prefix)
        && name[prefix.len()..].starts_with('-')
        && name.ends_with(extension)
        && name[..name.len() - extension.len()].ends_with('.')
}
