use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone)]
pub struct TrackPaths {
    pub project_root: PathBuf,
    pub conductor_dir: PathBuf,
    pub active_root: PathBuf,
    pub archive_root: PathBuf,
    pub registry_file: PathBuf,
    pub index_file: PathBuf,
    pub state_dir: PathBuf,
}

impl TrackPaths {
    /// Default layout inside `conductor_dir`, before any env override.
    pub fn in_conductor(project_root: PathBuf, conductor_dir: PathBuf) -> Self {
        Self {
            project_root,
            active_root: conductor_dir.join("tracks"),
            archive_root: conductor_dir.join("archive"),
            registry_file: conductor_dir.join("tracks.md"),
            index_file: conductor_dir.join("index.md"),
            state_dir: conductor_dir.join(".tracks"),
            conductor_dir,
        }
    }

    #[cfg(test)]
    pub fn under(project_root: &Path) -> Self {
        Self::in_conductor(project_root.to_path_buf(), project_root.join("conductor"))
    }

    pub fn active_dir(&self, track_id: &str) -> PathBuf {
        self.active_root.join(track_id)
    }

    pub fn archived_dir(&self, track_id: &str) -> PathBuf {
        self.archive_root.join(track_id)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.state_dir.join("locks")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.state_dir.join("audit.log")
    }
}

/// Track ids double as directory names, so they are restricted to a
/// path-safe alphabet.
pub fn validate_track_id(track_id: &str) -> Result<(), String> {
    if track_id.is_empty() {
        return Err("track id cannot be empty".to_string());
    }
    if track_id == "." || track_id == ".." {
        return Err(format!("track id `{track_id}` is not a directory name"));
    }
    if let Some(bad) = track_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(format!(
            "track id `{track_id}` contains `{bad}`; use letters, digits, `_`, `-` or `.`"
        ));
    }
    Ok(())
}

pub fn metadata_path(track_dir: &Path) -> PathBuf {
    track_dir.join(METADATA_FILE)
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<TrackPaths> {
    let cwd = env::current_dir().context("current directory could not be resolved")?;
    let project_root = env_or_default_path("TRACKS_PROJECT_ROOT", cwd);
    let conductor_dir = env_or_default_path("TRACKS_CONDUCTOR_DIR", project_root.join("conductor"));
    let defaults = TrackPaths::in_conductor(project_root, conductor_dir);

    Ok(TrackPaths {
        active_root: env_or_default_path("TRACKS_ACTIVE_DIR", defaults.active_root),
        archive_root: env_or_default_path("TRACKS_ARCHIVE_DIR", defaults.archive_root),
        registry_file: env_or_default_path("TRACKS_REGISTRY_FILE", defaults.registry_file),
        index_file: env_or_default_path("TRACKS_INDEX_FILE", defaults.index_file),
        state_dir: env_or_default_path("TRACKS_STATE_DIR", defaults.state_dir),
        project_root: defaults.project_root,
        conductor_dir: defaults.conductor_dir,
    })
}
