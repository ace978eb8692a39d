use super::{LockGuard, Workspace};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct LockTable {
    held: Mutex<BTreeSet<String>>,
    released: Condvar,
}

impl LockTable {
    fn acquire(&self, key: &str) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(key) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(key.to_string());
    }

    fn release(&self, key: &str) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(key);
        self.released.notify_all();
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<PathBuf, String>,
    dirs: BTreeSet<PathBuf>,
    fail_next_rename: bool,
    fail_writes_to: BTreeSet<PathBuf>,
}

impl MemoryState {
    fn add_dir_with_ancestors(&mut self, dir: &Path) {
        for ancestor in dir.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
    }
}

/// In-memory [`Workspace`] with fault injection.
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    state: Mutex<MemoryState>,
    locks: Arc<LockTable>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_dir(&self, dir: &Path) {
        self.state().add_dir_with_ancestors(dir);
    }

    /// Seed a file without going through fault injection.
    pub fn put(&self, path: &Path, content: &str) {
        let mut state = self.state();
        if let Some(parent) = path.parent() {
            state.add_dir_with_ancestors(parent);
        }
        state.files.insert(path.to_path_buf(), content.to_string());
    }

    pub fn get(&self, path: &Path) -> Option<String> {
        self.state().files.get(path).cloned()
    }

    pub fn remove_file(&self, path: &Path) {
        self.state().files.remove(path);
    }

    /// The next `rename_dir` fails with an I/O error and changes nothing.
    pub fn fail_next_rename(&self) {
        self.state().fail_next_rename = true;
    }

    /// The next `write_atomic` to `path` fails with an I/O error.
    pub fn fail_next_write_to(&self, path: &Path) {
        self.state().fail_writes_to.insert(path.to_path_buf());
    }

    /// Snapshot of every stored file, for whole-workspace comparisons.
    pub fn files(&self) -> BTreeMap<PathBuf, String> {
        self.state().files.clone()
    }
}

impl Workspace for MemoryWorkspace {
    fn read_text(&self, path: &Path) -> io::Result<Option<String>> {
        Ok(self.state().files.get(path).cloned())
    }

    fn write_atomic(&self, path: &Path, content: &str) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_writes_to.remove(path) {
            return Err(io::Error::other(format!(
                "injected write failure for {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            state.add_dir_with_ancestors(parent);
        }
        state.files.insert(path.to_path_buf(), content.to_string());
        Ok(())
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.state().dirs.contains(path)
    }

    fn rename_dir(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_rename) {
            return Err(io::Error::other(format!(
                "injected rename failure for {}",
                from.display()
            )));
        }
        if !state.dirs.contains(from) {
            return Err(io::Error::new(
                ErrorKind::NotFound,
                format!("{} does not exist", from.display()),
            ));
        }
        if state.dirs.contains(to) || state.files.contains_key(to) {
            return Err(io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }

        let moved_dirs = state
            .dirs
            .iter()
            .filter(|d| d.starts_with(from))
            .cloned()
            .collect::<Vec<_>>();
        for dir in moved_dirs {
            state.dirs.remove(&dir);
            if let Ok(rest) = dir.strip_prefix(from) {
                state.dirs.insert(to.join(rest));
            }
        }

        let moved_files = state
            .files
            .keys()
            .filter(|f| f.starts_with(from))
            .cloned()
            .collect::<Vec<_>>();
        for file in moved_files {
            if let (Some(content), Ok(rest)) = (state.files.remove(&file), file.strip_prefix(from))
            {
                state.files.insert(to.join(rest), content);
            }
        }

        if let Some(parent) = to.parent() {
            state.add_dir_with_ancestors(parent);
        }
        Ok(())
    }

    fn lock(&self, key: &str) -> io::Result<LockGuard> {
        self.locks.acquire(key);
        let table = Arc::clone(&self.locks);
        let key = key.to_string();
        Ok(LockGuard::new(move || table.release(&key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_rename_moves_nested_files() {
        let ws = MemoryWorkspace::new();
        ws.put(Path::new("/c/tracks/t1/metadata.json"), "{}");
        ws.put(Path::new("/c/tracks/t1/notes/a.md"), "a");

        ws.rename_dir(Path::new("/c/tracks/t1"), Path::new("/c/archive/t1"))
            .expect("rename");

        assert!(!ws.is_dir(Path::new("/c/tracks/t1")));
        assert!(ws.is_dir(Path::new("/c/archive/t1/notes")));
        assert_eq!(
            ws.get(Path::new("/c/archive/t1/notes/a.md")),
            Some("a".to_string())
        );
    }

    #[test]
    fn memory_fault_injection_fires_once() {
        let ws = MemoryWorkspace::new();
        let path = Path::new("/c/tracks.md");
        ws.fail_next_write_to(path);

        assert!(ws.write_atomic(path, "x").is_err());
        assert_eq!(ws.get(path), None);
        ws.write_atomic(path, "x").expect("second write");
        assert_eq!(ws.get(path), Some("x".to_string()));
    }

    #[test]
    fn memory_lock_is_released_on_drop() {
        let ws = MemoryWorkspace::new();
        let first = ws.lock("track-a").expect("lock");
        drop(first);
        let _second = ws.lock("track-a").expect("relock");
        let _other = ws.lock("track-b").expect("independent key");
    }
}
