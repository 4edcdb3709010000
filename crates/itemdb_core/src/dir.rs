//! Store directory management.
//!
//! This module handles the file system layout of an on-disk store:
//!
//! ```text
//! <store_path>/
//! ├─ db.sqlite   # Catalog and item tables
//! ├─ files/      # Files owned by items, addressed by path
//! ├─ temp/       # In-progress writes, renamed into files/ on close
//! └─ run/        # Per-process scratch space
//! ```
//!
//! A new store is built in a temporary sibling directory and renamed into
//! place, so a crash mid-creation never leaves a half-initialized store at
//! the target path.

use crate::catalog;
use crate::error::{StoreError, StoreResult};
use crate::store::Store;
use itemdb_storage::SqliteBackend;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

const DATABASE_FILE: &str = "db.sqlite";
const FILES_DIR: &str = "files";
const TEMP_DIR: &str = "temp";
const RUN_DIR: &str = "run";

/// Layout of an on-disk store.
#[derive(Debug, Clone)]
pub(crate) struct StoreDir {
    path: PathBuf,
}

impl StoreDir {
    /// Opens a store directory, creating it atomically if missing.
    ///
    /// # Errors
    ///
    /// Returns `StoreCorrupt` if the path exists but is not a store, or does
    /// not exist and `create_if_missing` is false.
    pub(crate) fn open(path: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !path.exists() {
            if !create_if_missing {
                return Err(StoreError::store_corrupt(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
            Self::create(path)?;
        }

        let dir = Self {
            path: path.to_path_buf(),
        };
        if !path.is_dir() {
            return Err(StoreError::store_corrupt(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }
        if !dir.database_path().is_file() {
            return Err(StoreError::store_corrupt(format!(
                "missing {DATABASE_FILE} in {}",
                path.display()
            )));
        }
        for sub in [dir.files_dir(), dir.temp_dir(), dir.run_dir()] {
            fs::create_dir_all(sub)?;
        }
        Ok(dir)
    }

    fn create(path: &Path) -> StoreResult<()> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let staging = tempfile::Builder::new()
            .prefix(".itemdb-")
            .tempdir_in(&parent)?;
        for sub in [FILES_DIR, TEMP_DIR, RUN_DIR] {
            fs::create_dir(staging.path().join(sub))?;
        }
        {
            let mut backend = SqliteBackend::open(&staging.path().join(DATABASE_FILE))?;
            catalog::initialize(&mut backend, "main")?;
        }

        let staged = staging.keep();
        match fs::rename(&staged, path) {
            Ok(()) => {
                sync_directory(&parent)?;
                info!(path = %path.display(), "created store directory");
                Ok(())
            }
            Err(_) if path.is_dir() => {
                // Another process created it first; use theirs.
                debug!(path = %path.display(), "store directory created concurrently");
                fs::remove_dir_all(&staged)?;
                Ok(())
            }
            Err(err) => {
                let _ = fs::remove_dir_all(&staged);
                Err(err.into())
            }
        }
    }

    /// Root directory.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// The database file.
    pub(crate) fn database_path(&self) -> PathBuf {
        self.path.join(DATABASE_FILE)
    }

    /// Finished files.
    pub(crate) fn files_dir(&self) -> PathBuf {
        self.path.join(FILES_DIR)
    }

    /// In-progress files.
    pub(crate) fn temp_dir(&self) -> PathBuf {
        self.path.join(TEMP_DIR)
    }

    /// Per-process scratch space.
    pub(crate) fn run_dir(&self) -> PathBuf {
        self.path.join(RUN_DIR)
    }
}

/// Syncs a directory so renames inside it are durable.
#[cfg(unix)]
fn sync_directory(path: &Path) -> StoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> StoreResult<()> {
    // NTFS journals metadata; directories cannot be fsynced.
    Ok(())
}

/// The `files/` and `temp/` pair a store writes files into.
#[derive(Debug)]
pub(crate) struct FileArea {
    roots: Option<(PathBuf, PathBuf)>,
    counter: AtomicU64,
}

impl FileArea {
    /// File area of an on-disk store.
    pub(crate) fn for_dir(dir: &StoreDir) -> Self {
        Self::new(Some((dir.files_dir(), dir.temp_dir())))
    }

    /// File area rooted at an arbitrary directory.
    pub(crate) fn rooted_at(root: &Path) -> Self {
        Self::new(Some((root.join(FILES_DIR), root.join(TEMP_DIR))))
    }

    /// A store without a file area.
    pub(crate) fn none() -> Self {
        Self::new(None)
    }

    fn new(roots: Option<(PathBuf, PathBuf)>) -> Self {
        Self {
            roots,
            counter: AtomicU64::new(0),
        }
    }

    fn roots(&self) -> StoreResult<(&Path, &Path)> {
        self.roots
            .as_ref()
            .map(|(files, temp)| (files.as_path(), temp.as_path()))
            .ok_or_else(|| StoreError::invalid_operation("store has no file area"))
    }

    /// Resolves path segments under `files/`.
    pub(crate) fn file_path(&self, segments: &[&str]) -> StoreResult<PathBuf> {
        let (files, _) = self.roots()?;
        if segments.is_empty() {
            return Err(StoreError::invalid_operation("empty file path"));
        }
        let mut path = files.to_path_buf();
        for segment in segments {
            let bad = segment.is_empty()
                || *segment == "."
                || *segment == ".."
                || segment.contains(['/', '\\']);
            if bad {
                return Err(StoreError::invalid_operation(format!(
                    "invalid path segment {segment:?}"
                )));
            }
            path.push(segment);
        }
        Ok(path)
    }

    /// A fresh, unused path under `temp/`.
    pub(crate) fn temporary_path(&self) -> StoreResult<PathBuf> {
        let (_, temp) = self.roots()?;
        fs::create_dir_all(temp)?;
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(temp.join(format!("{}-{n}.tmp", std::process::id())))
    }
}

/// A file written under `temp/` and renamed to its final path on close.
///
/// Dropping it without calling [`close`](Self::close) discards the data.
#[derive(Debug)]
pub struct AtomicFile {
    file: Option<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl AtomicFile {
    fn create(temp_path: PathBuf, final_path: PathBuf) -> StoreResult<Self> {
        let file = File::create(&temp_path)?;
        Ok(Self {
            file: Some(file),
            temp_path,
            final_path,
        })
    }

    /// Where the file will live once closed.
    #[must_use]
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Where the data is being written.
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Syncs the data and renames the file into place.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if syncing or renaming fails; the temporary file
    /// is removed in that case.
    pub fn close(mut self) -> StoreResult<PathBuf> {
        let Some(mut file) = self.file.take() else {
            return Err(StoreError::invalid_operation("file already closed"));
        };
        let finished = (|| -> StoreResult<()> {
            file.flush()?;
            file.sync_all()?;
            drop(file);
            if let Some(parent) = self.final_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&self.temp_path, &self.final_path)?;
            if let Some(parent) = self.final_path.parent() {
                sync_directory(parent)?;
            }
            Ok(())
        })();
        if let Err(err) = finished {
            let _ = fs::remove_file(&self.temp_path);
            return Err(err);
        }
        Ok(self.final_path.clone())
    }

    /// Discards the file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the temporary file cannot be removed.
    pub fn abort(mut self) -> StoreResult<()> {
        if self.file.take().is_some() {
            fs::remove_file(&self.temp_path)?;
        }
        Ok(())
    }

    fn writer(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "file already closed"))
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

impl Store {
    /// Starts writing a file that appears under `files/<segments>` on close.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for stores without a file area or for
    /// segments that are empty, `.`/`..`, or contain separators.
    pub fn new_file(&self, segments: &[&str]) -> StoreResult<AtomicFile> {
        self.ensure_open()?;
        let final_path = self.shared.files.file_path(segments)?;
        let temp_path = self.shared.files.temporary_path()?;
        AtomicFile::create(temp_path, final_path)
    }

    /// Path of `files/<segments>`, without creating anything.
    ///
    /// # Errors
    ///
    /// See [`new_file`](Self::new_file).
    pub fn new_file_path(&self, segments: &[&str]) -> StoreResult<PathBuf> {
        self.shared.files.file_path(segments)
    }

    /// A fresh path under `temp/`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for stores without a file area.
    pub fn new_temporary_file_path(&self) -> StoreResult<PathBuf> {
        self.shared.files.temporary_path()
    }

    /// Creates `files/<segments>` as a directory.
    ///
    /// # Errors
    ///
    /// See [`new_file`](Self::new_file).
    pub fn new_directory(&self, segments: &[&str]) -> StoreResult<PathBuf> {
        let path = self.shared.files.file_path(segments)?;
        fs::create_dir_all(&path)?;
        Ok(path)
    }
}
