use crate::error::TrackError;
use crate::tracks::paths::metadata_path;
use crate::tracks::workspace::Workspace;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const ARCHIVED_STATUS: &str = "archived";

fn default_status() -> String {
    "new".to_string()
}

/// Per-track `metadata.json`. Keys this engine does not own are carried in
/// `extra` and written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(rename = "archivedAt", default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<String>,
    #[serde(
        rename = "archiveReason",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub archive_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TrackMetadata {
    pub fn is_archived(&self) -> bool {
        self.status == ARCHIVED_STATUS || self.archived
    }

    pub fn mark_archived(&mut self, archived_at: &str, reason: &str) {
        self.status = ARCHIVED_STATUS.to_string();
        self.archived = true;
        self.archived_at = Some(archived_at.to_string());
        self.archive_reason = Some(reason.to_string());
        if let Some(updated) = self.extra.get_mut("updated_at") {
            *updated = Value::String(archived_at.to_string());
        }
    }
}

pub fn parse_metadata(raw: &str) -> Result<TrackMetadata, String> {
    let parsed: TrackMetadata = serde_json::from_str(raw).map_err(|err| err.to_string())?;
    if parsed.title.trim().is_empty() {
        return Err("`title` is blank".to_string());
    }
    Ok(parsed)
}

pub fn render_metadata(metadata: &TrackMetadata) -> serde_json::Result<String> {
    let data = serde_json::to_string_pretty(metadata)?;
    Ok(format!("{data}\n"))
}

pub struct MetadataStore<'a> {
    ws: &'a dyn Workspace,
}

impl<'a> MetadataStore<'a> {
    pub fn new(ws: &'a dyn Workspace) -> Self {
        Self { ws }
    }

    pub fn load(&self, track_id: &str, track_dir: &Path) -> Result<TrackMetadata, TrackError> {
        let path = metadata_path(track_dir);
        let raw = self
            .ws
            .read_text(&path)
            .map_err(|err| TrackError::io(track_id, "read metadata", &path, err))?
            .ok_or_else(|| TrackError::NotFound {
                track_id: track_id.to_string(),
                detail: format!("{} does not exist", path.display()),
            })?;

        parse_metadata(&raw).map_err(|reason| TrackError::MetadataParse {
            track_id: track_id.to_string(),
            path,
            reason,
        })
    }

    pub fn save(
        &self,
        track_id: &str,
        track_dir: &Path,
        metadata: &TrackMetadata,
    ) -> Result<PathBuf, TrackError> {
        let path = metadata_path(track_dir);
        let content = render_metadata(metadata).map_err(|err| {
            TrackError::io(track_id, "serialize metadata", &path, std::io::Error::other(err))
        })?;
        self.ws
            .write_atomic(&path, &content)
            .map_err(|err| TrackError::io(track_id, "write metadata", &path, err))?;
        Ok(path)
    }
}
