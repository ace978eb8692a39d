use crate::error::TrackError;
use crate::tracks::workspace::Workspace;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    Moved,
    AlreadyAtDestination,
}

/// Where a track's directory currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Active,
    Archived,
    Both,
    Missing,
}

pub fn placement(ws: &dyn Workspace, active_dir: &Path, archived_dir: &Path) -> Placement {
    match (ws.is_dir(active_dir), ws.is_dir(archived_dir)) {
        (true, false) => Placement::Active,
        (false, true) => Placement::Archived,
        (true, true) => Placement::Both,
        (false, false) => Placement::Missing,
    }
}

pub struct FileTreeRelocator<'a> {
    ws: &'a dyn Workspace,
}

impl<'a> FileTreeRelocator<'a> {
    pub fn new(ws: &'a dyn Workspace) -> Self {
        Self { ws }
    }

    pub fn relocate(
        &self,
        track_id: &str,
        source: &Path,
        dest: &Path,
    ) -> Result<Relocation, TrackError> {
        match placement(self.ws, source, dest) {
            Placement::Active => {
                self.ws
                    .rename_dir(source, dest)
                    .map_err(|err| TrackError::io(track_id, "relocate track", source, err))?;
                Ok(Relocation::Moved)
            }
            Placement::Archived => Ok(Relocation::AlreadyAtDestination),
            Placement::Both => Err(TrackError::SplitState {
                track_id: track_id.to_string(),
                detail: format!(
                    "both {} and {} exist",
                    source.display(),
                    dest.display()
                ),
            }),
            Placement::Missing => Err(TrackError::NotFound {
                track_id: track_id.to_string(),
                detail: format!(
                    "neither {} nor {} exists",
                    source.display(),
                    dest.display()
                ),
            }),
        }
    }
}
