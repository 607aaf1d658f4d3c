//! In-memory sequential files for testing.

use crate::error::{StorageError, StorageResult};
use crate::sequential::{matches_pattern, SequentialFile, SequentialFileFactory};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Contents of one file plus how much of it a crash would keep.
#[derive(Debug, Default)]
struct Contents {
    bytes: Vec<u8>,
    /// Length reached by the last sync, truncate or synced write.
    synced: usize,
}

impl Contents {
    fn durable(bytes: Vec<u8>) -> Self {
        let synced = bytes.len();
        Self { bytes, synced }
    }
}

type FileData = Arc<RwLock<Contents>>;

/// Shared state behind every file of one [`InMemoryFactory`].
#[derive(Debug, Default)]
struct MemoryStore {
    files: RwLock<BTreeMap<String, FileData>>,
    fail_writes: AtomicBool,
    fail_syncs: AtomicBool,
}

/// A factory of in-memory files.
///
/// The factory is cheaply cloneable and all clones share the same files, so
/// a journal can be dropped and a new one built over the same factory to
/// simulate a process restart.
///
/// # Fault Injection
///
/// [`InMemoryFactory::set_fail_writes`] and [`InMemoryFactory::set_fail_syncs`]
/// make every subsequent write or sync fail with
/// [`StorageError::InjectedFault`], which lets tests exercise the journal's
/// failed state.
///
/// # Crashes
///
/// Each file remembers how much of it has been synced. Writes made with
/// `sync = false` stay in a page-cache-like buffer until the next `sync`;
/// [`InMemoryFactory::crash`] throws that buffer away. Truncation, rename
/// and delete take effect durably at once, like their directory-backed
/// counterparts.
///
/// # Example
///
/// ```rust
/// use journalq_storage::{InMemoryFactory, SequentialFileFactory};
///
/// let factory = InMemoryFactory::new();
/// let file = factory.create_file("journal-1.jrn").unwrap();
/// file.open().unwrap();
/// assert_eq!(file.write(b"test data", false).unwrap(), 0);
/// assert_eq!(file.size().unwrap(), 9);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryFactory {
    store: Arc<MemoryStore>,
}

impl InMemoryFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes all subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.store.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes all subsequent syncs fail (or succeed again).
    pub fn set_fail_syncs(&self, fail: bool) {
        self.store.fail_syncs.store(fail, Ordering::SeqCst);
    }

    /// Returns a copy of a file's contents.
    #[must_use]
    pub fn file_data(&self, name: &str) -> Option<Vec<u8>> {
        self.store
            .files
            .read()
            .get(name)
            .map(|data| data.read().bytes.clone())
    }

    /// Replaces a file's contents durably, creating the file if needed.
    ///
    /// Useful for simulating torn writes and corruption.
    pub fn set_file_data(&self, name: &str, contents: Vec<u8>) {
        let mut files = self.store.files.write();
        match files.get(name) {
            Some(data) => *data.write() = Contents::durable(contents),
            None => {
                files.insert(
                    name.to_string(),
                    Arc::new(RwLock::new(Contents::durable(contents))),
                );
            }
        }
    }

    /// Simulates a power loss: every file loses the bytes written since its
    /// last sync.
    ///
    /// Open handles keep working on the truncated contents, but callers
    /// normally drop whatever was using the files before crashing them.
    pub fn crash(&self) {
        for data in self.store.files.read().values() {
            let mut contents = data.write();
            let synced = contents.synced;
            contents.bytes.truncate(synced);
        }
    }

    /// Number of bytes of `name` that would survive a crash.
    #[must_use]
    pub fn synced_len(&self, name: &str) -> Option<u64> {
        self.store
            .files
            .read()
            .get(name)
            .map(|data| data.read().synced as u64)
    }

    /// Returns the names of all files, sorted.
    #[must_use]
    pub fn file_names(&self) -> Vec<String> {
        self.store.files.read().keys().cloned().collect()
    }
}

impl SequentialFileFactory for InMemoryFactory {
    fn create_file(&self, name: &str) -> StorageResult<Arc<dyn SequentialFile>> {
        Ok(Arc::new(InMemoryFile {
            store: Arc::clone(&self.store),
            name: RwLock::new(name.to_string()),
            data: RwLock::new(None),
        }))
    }

    fn list_files(&self, prefix: &str, extension: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .store
            .files
            .read()
            .keys()
            .filter(|name| matches_pattern(name, prefix, extension))
            .cloned()
            .collect())
    }
}

/// A file held in an [`InMemoryFactory`].
#[derive(Debug)]
pub struct InMemoryFile {
    store: Arc<MemoryStore>,
    name: RwLock<String>,
    data: RwLock<Option<FileData>>,
}

impl InMemoryFile {
    fn with_data<T>(&self, f: impl FnOnce(&FileData) -> StorageResult<T>) -> StorageResult<T> {
        let data = self.data.read();
        match data.as_ref() {
            Some(data) => f(data),
            None => Err(StorageError::Closed(self.name())),
        }
    }

    fn check_fault(&self, flag: &AtomicBool, operation: &str) -> StorageResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::InjectedFault(format!(
                "{operation} on {}",
                self.name()
            )));
        }
        Ok(())
    }
}

impl SequentialFile for InMemoryFile {
    fn name(&self) -> String {
        self.name.read().clone()
    }

    fn open(&self) -> StorageResult<()> {
        let mut data = self.data.write();
        if data.is_none() {
            let mut files = self.store.files.write();
            let entry = files
                .entry(self.name())
                .or_insert_with(|| Arc::new(RwLock::new(Contents::default())));
            *data = Some(Arc::clone(entry));
        }
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        self.data.write().take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.data.read().is_some()
    }

    fn write(&self, bytes: &[u8], sync: bool) -> StorageResult<u64> {
        self.check_fault(&self.store.fail_writes, "write")?;
        if sync {
            self.check_fault(&self.store.fail_syncs, "sync")?;
        }
        self.with_data(|data| {
            let mut contents = data.write();
            let offset = contents.bytes.len() as u64;
            contents.bytes.extend_from_slice(bytes);
            if sync {
                contents.synced = contents.bytes.len();
            }
            Ok(offset)
        })
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.with_data(|data| {
            let contents = data.read();
            let data = &contents.bytes;
            let size = data.len() as u64;
            let end = offset.saturating_add(len as u64);
            if offset > size || end > size {
                return Err(StorageError::ReadPastEnd { offset, len, size });
            }
            Ok(data[offset as usize..end as usize].to_vec())
        })
    }

    fn size(&self) -> StorageResult<u64> {
        self.with_data(|data| Ok(data.read().bytes.len() as u64))
    }

    fn sync(&self) -> StorageResult<()> {
        self.check_fault(&self.store.fail_syncs, "sync")?;
        self.with_data(|data| {
            let mut contents = data.write();
            contents.synced = contents.bytes.len();
            Ok(())
        })
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        self.with_data(|data| {
            let mut contents = data.write();
            let current_size = contents.bytes.len() as u64;
            if new_size > current_size {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!(
                        "cannot truncate to size {} which is greater than current size {}",
                        new_size, current_size
                    ),
                )));
            }
            // the directory backend syncs after truncating
            contents.bytes.truncate(new_size as usize);
            contents.synced = contents.bytes.len();
            Ok(())
        })
    }

    fn rename(&self, new_name: &str) -> StorageResult<()> {
        let old_name = self.name();
        let mut files = self.store.files.write();
        let data = files
            .remove(&old_name)
            .ok_or_else(|| StorageError::NotFound(old_name.clone()))?;
        files.insert(new_name.to_string(), data);
        *self.name.write() = new_name.to_string();
        Ok(())
    }

    fn delete(&self) -> StorageResult<()> {
        self.data.write().take();
        let name = self.name();
        self.store
            .files
            .write()
            .remove(&name)
            .map(|_| ())
            .ok_or(StorageError::NotFound(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_file(factory: &InMemoryFactory, name: &str) -> Arc<dyn SequentialFile> {
        let file = factory.create_file(name).unwrap();
        file.open().unwrap();
        file
    }

    #[test]
    fn memory_write_returns_offsets() {
        let factory = InMemoryFactory::new();
        let file = open_file(&factory, "journal-1.jrn");

        assert_eq!(file.write(b"hello", false).unwrap(), 0);
        assert_eq!(file.write(b" world", true).unwrap(), 5);
        assert_eq!(file.size().unwrap(), 11);
        assert_eq!(&file.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn memory_read_past_end_fails() {
        let factory = InMemoryFactory::new();
        let file = open_file(&factory, "journal-1.jrn");
        file.write(b"hello", false).unwrap();

        assert!(matches!(
            file.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(file.read_at(2, 0).unwrap().is_empty());
    }

    #[test]
    fn memory_data_survives_new_handle() {
        let factory = InMemoryFactory::new();
        {
            let file = open_file(&factory, "journal-1.jrn");
            file.write(b"kept", false).unwrap();
        }

        let clone = factory.clone();
        let file = open_file(&clone, "journal-1.jrn");
        assert_eq!(&file.read_at(0, 4).unwrap(), b"kept");
    }

    #[test]
    fn memory_injected_faults() {
        let factory = InMemoryFactory::new();
        let file = open_file(&factory, "journal-1.jrn");

        factory.set_fail_writes(true);
        assert!(matches!(
            file.write(b"x", false),
            Err(StorageError::InjectedFault(_))
        ));
        factory.set_fail_writes(false);

        factory.set_fail_syncs(true);
        assert!(file.write(b"x", false).is_ok());
        assert!(file.write(b"x", true).is_err());
        assert!(file.sync().is_err());
        factory.set_fail_syncs(false);
        assert!(file.sync().is_ok());
    }

    #[test]
    fn memory_rename_and_list() {
        let factory = InMemoryFactory::new();
        let file = open_file(&factory, "journal-1.jrn");
        open_file(&factory, "journal-2.jrn");
        open_file(&factory, "notes.txt");

        file.rename("journal-5.jrn").unwrap();
        file.write(b"after", false).unwrap();

        assert_eq!(
            factory.list_files("journal", "jrn").unwrap(),
            vec!["journal-2.jrn", "journal-5.jrn"]
        );
        assert_eq!(factory.file_data("journal-5.jrn").unwrap(), b"after");
    }

    #[test]
    fn memory_truncate_and_delete() {
        let factory = InMemoryFactory::new();
        let file = open_file(&factory, "journal-1.jrn");
        file.write(b"hello world", false).unwrap();

        file.truncate(5).unwrap();
        assert_eq!(factory.file_data("journal-1.jrn").unwrap(), b"hello");
        assert!(file.truncate(50).is_err());

        file.delete().unwrap();
        assert!(factory.file_names().is_empty());
        assert!(matches!(file.delete(), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn set_file_data_overwrites_open_file() {
        let factory = InMemoryFactory::new();
        let file = open_file(&factory, "journal-1.jrn");
        file.write(b"abcdef", false).unwrap();

        factory.set_file_data("journal-1.jrn", b"abc".to_vec());
        assert_eq!(file.size().unwrap(), 3);
    }

    #[test]
    fn memory_crash_keeps_only_synced_bytes() {
        let factory = InMemoryFactory::new();
        let file = open_file(&factory, "journal-1.jrn");
        file.write(b"head", true).unwrap();
        file.write(b"-lost", false).unwrap();
        assert_eq!(factory.synced_len("journal-1.jrn"), Some(4));

        factory.crash();
        assert_eq!(factory.file_data("journal-1.jrn").unwrap(), b"head");

        file.write(b"-kept", false).unwrap();
        file.sync().unwrap();
        factory.crash();
        assert_eq!(factory.file_data("journal-1.jrn").unwrap(), b"head-kept");
    }

    #[test]
    fn memory_truncate_is_durable() {
        let factory = InMemoryFactory::new();
        let file = open_file(&factory, "journal-1.jrn");
        file.write(b"header-body", true).unwrap();
        file.truncate(6).unwrap();
        file.write(b"-tail", false).unwrap();

        factory.crash();
        assert_eq!(factory.file_data("journal-1.jrn").unwrap(), b"header");
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;
        use proptest::prelude::prop;

        proptest! {
            #[test]
            fn writes_read_back_at_their_offsets(
                chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..20),
                cut in any::<prop::sample::Index>(),
            ) {
                let factory = InMemoryFactory::new();
                let file = open_file(&factory, "journal-1.jrn");

                let mut offsets = Vec::new();
                for chunk in &chunks {
                    offsets.push(file.write(chunk, false).unwrap());
                }
                for (offset, chunk) in offsets.iter().zip(&chunks) {
                    prop_assert_eq!(&file.read_at(*offset, chunk.len()).unwrap(), chunk);
                }

                let all: Vec<u8> = chunks.concat();
                prop_assert_eq!(file.size().unwrap(), all.len() as u64);

                let keep = cut.index(all.len() + 1);
                file.truncate(keep as u64).unwrap();
                prop_assert_eq!(factory.file_data("journal-1.jrn").unwrap(), all[..keep].to_vec());
            }
        }
    }
}
