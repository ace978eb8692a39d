use crate::error::TrackError;
use crate::tracks::workspace::Workspace;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactEdit {
    Changed,
    Unchanged,
    Missing,
}

/// A text artifact shared with other writers. Every read-modify-write runs
/// under the artifact's named lock.
pub struct SharedArtifact<'a> {
    ws: &'a dyn Workspace,
    path: &'a Path,
    label: &'static str,
    strict: bool,
}

impl<'a> SharedArtifact<'a> {
    pub fn new(ws: &'a dyn Workspace, path: &'a Path, label: &'static str, strict: bool) -> Self {
        Self {
            ws,
            path,
            label,
            strict,
        }
    }

    pub fn read(&self, track_id: &str) -> Result<Option<String>, TrackError> {
        self.ws
            .read_text(self.path)
            .map_err(|err| TrackError::io(track_id, "read shared artifact", self.path, err))
    }

    /// Apply `edit` to the current content. `edit` returns `None` when it has
    /// nothing to change; identical output is also treated as unchanged.
    pub fn edit<F>(&self, track_id: &str, edit: F) -> Result<ArtifactEdit, TrackError>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        let _guard = self
            .ws
            .lock(self.label)
            .map_err(|err| TrackError::io(track_id, "lock shared artifact", self.path, err))?;

        let Some(current) = self.read(track_id)? else {
            if self.strict {
                return Err(TrackError::ArtifactMissing {
                    track_id: track_id.to_string(),
                    artifact: self.label,
                    path: self.path.to_path_buf(),
                });
            }
            return Ok(ArtifactEdit::Missing);
        };

        match edit(&current) {
            Some(next) if next != current => {
                self.ws.write_atomic(self.path, &next).map_err(|err| {
                    TrackError::io(track_id, "write shared artifact", self.path, err)
                })?;
                Ok(ArtifactEdit::Changed)
            }
            _ => Ok(ArtifactEdit::Unchanged),
        }
    }
}
