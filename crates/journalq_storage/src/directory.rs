//! Directory-backed sequential files.

use crate::error::{StorageError, StorageResult};
use crate::sequential::{matches_pattern, SequentialFile, SequentialFileFactory};
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An open OS file together with its logical size.
#[derive(Debug)]
struct OpenFile {
    file: File,
    size: u64,
}

/// A sequential file stored as an OS file.
///
/// # Durability
///
/// - `write(.., true)` and `sync()` call `File::sync_data()`
/// - `truncate()` calls `File::sync_all()` so the new length is durable
///
/// # Example
///
/// ```no_run
/// use journalq_storage::{DirectoryFactory, SequentialFileFactory};
/// use std::path::Path;
///
/// let factory = DirectoryFactory::new(Path::new("journal-dir")).unwrap();
/// let file = factory.create_file("journal-1.jrn").unwrap();
/// file.open().unwrap();
/// file.write(b"persistent data", true).unwrap();
/// ```
#[derive(Debug)]
pub struct DirectoryFile {
    dir: PathBuf,
    name: RwLock<String>,
    state: RwLock<Option<OpenFile>>,
}

impl DirectoryFile {
    fn new(dir: &Path, name: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            name: RwLock::new(name.to_string()),
            state: RwLock::new(None),
        }
    }

    /// Returns the full path of the file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(&*self.name.read())
    }

    fn closed(&self) -> StorageError {
        StorageError::Closed(self.name.read().clone())
    }
}

impl SequentialFile for DirectoryFile {
    fn name(&self) -> String {
        self.name.read().clone()
    }

    fn open(&self) -> StorageResult<()> {
        let mut state = self.state.write();
        if state.is_some() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path())?;
        let size = file.metadata()?.len();

        *state = Some(OpenFile { file, size });
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        let mut state = self.state.write();
        if let Some(mut open) = state.take() {
            open.file.flush()?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.read().is_some()
    }

    fn write(&self, data: &[u8], sync: bool) -> StorageResult<u64> {
        let mut state = self.state.write();
        let open = state.as_mut().ok_or_else(|| self.closed())?;

        let offset = open.size;
        if data.is_empty() {
            return Ok(offset);
        }

        open.file.seek(SeekFrom::Start(offset))?;
        open.file.write_all(data)?;
        if sync {
            open.file.sync_data()?;
        }
        open.size += data.len() as u64;

        Ok(offset)
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        // Seeking needs exclusive access to the handle.
        let mut state = self.state.write();
        let open = state.as_mut().ok_or_else(|| self.closed())?;

        let size = open.size;
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        open.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        open.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn size(&self) -> StorageResult<u64> {
        let state = self.state.read();
        state
            .as_ref()
            .map(|open| open.size)
            .ok_or_else(|| self.closed())
    }

    fn sync(&self) -> StorageResult<()> {
        let state = self.state.read();
        let open = state.as_ref().ok_or_else(|| self.closed())?;
        open.file.sync_data()?;
        Ok(())
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        let mut state = self.state.write();
        let open = state.as_mut().ok_or_else(|| self.closed())?;

        if new_size > open.size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {} which is greater than current size {}",
                    new_size, open.size
                ),
            )));
        }

        open.file.set_len(new_size)?;
        open.file.sync_all()?;
        open.size = new_size;
        Ok(())
    }

    fn rename(&self, new_name: &str) -> StorageResult<()> {
        let mut state = self.state.write();
        let was_open = state.take().is_some();

        let from = self.path();
        let to = self.dir.join(new_name);
        fs::rename(&from, &to)?;
        *self.name.write() = new_name.to_string();

        if was_open {
            let file = OpenOptions::new().read(true).write(true).open(&to)?;
            let size = file.metadata()?.len();
            *state = Some(OpenFile { file, size });
        }
        Ok(())
    }

    fn delete(&self) -> StorageResult<()> {
        self.state.write().take();
        match fs::remove_file(self.path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(self.name()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Creates [`DirectoryFile`]s inside one directory.
#[derive(Debug, Clone)]
pub struct DirectoryFactory {
    dir: PathBuf,
}

impl DirectoryFactory {
    /// Creates a factory for `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Returns the directory this factory manages.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SequentialFileFactory for DirectoryFactory {
    fn create_file(&self, name: &str) -> StorageResult<Arc<dyn SequentialFile>> {
        Ok(Arc::new(DirectoryFile::new(&self.dir, name)))
    }

    fn list_files(&self, prefix: &str, extension: &str) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if matches_pattern(name, prefix, extension) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
