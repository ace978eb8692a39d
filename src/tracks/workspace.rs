//! Storage seam for track artifacts.
//!
//! The archival engine only touches storage through [`Workspace`], so the same
//! sequencing runs against the real filesystem ([`FsWorkspace`]) or an
//! in-memory double used by tests.
//!
//! Locks are keyed by name, not by artifact path: artifacts are replaced by
//! atomic rename, so locking the artifact inode itself would not exclude a
//! writer that already holds the old inode.

use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

#[cfg(test)]
mod memory;
#[cfg(test)]
pub use memory::MemoryWorkspace;

pub trait Workspace: Send + Sync {
    /// Read a text artifact. `Ok(None)` when it does not exist.
    fn read_text(&self, path: &Path) -> io::Result<Option<String>>;

    /// Replace `path` with `content` so readers see either the old or the new
    /// record, never a partial one.
    fn write_atomic(&self, path: &Path, content: &str) -> io::Result<()>;

    fn is_dir(&self, path: &Path) -> bool;

    /// Move a directory tree. Fails with `AlreadyExists` if `to` exists.
    fn rename_dir(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Block until the exclusive lock named `key` is held.
    fn lock(&self, key: &str) -> io::Result<LockGuard>;
}

/// Holds a named lock until dropped.
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

#[derive(Debug, Clone)]
pub struct FsWorkspace {
    locks_dir: PathBuf,
}

impl FsWorkspace {
    pub fn new(locks_dir: impl Into<PathBuf>) -> Self {
        Self {
            locks_dir: locks_dir.into(),
        }
    }
}

fn copy_dir_all(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

impl Workspace for FsWorkspace {
    fn read_text(&self, path: &Path) -> io::Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn write_atomic(&self, path: &Path, content: &str) -> io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn rename_dir(&self, from: &Path, to: &Path) -> io::Result<()> {
        if to.exists() {
            return Err(io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }

        match fs::rename(from, to) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::CrossesDevices => {
                copy_dir_all(from, to)?;
                fs::remove_dir_all(from)
            }
            Err(err) => Err(err),
        }
    }

    fn lock(&self, key: &str) -> io::Result<LockGuard> {
        fs::create_dir_all(&self.locks_dir)?;
        let path = self.locks_dir.join(format!("{key}.lock"));
        #[allow(clippy::suspicious_open_options)]
        let file = OpenOptions::new().write(true).create(true).open(&path)?;
        FileExt::lock_exclusive(&file)?;
        Ok(LockGuard::new(move || {
            let _ = FileExt::unlock(&file);
        }))
    }
}
