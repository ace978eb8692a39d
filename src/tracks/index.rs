//! `index.md`: navigation list of active tracks.

use crate::error::TrackError;
use crate::tracks::artifact::{ArtifactEdit, SharedArtifact};
use crate::tracks::workspace::Workspace;
use std::path::Path;

pub fn is_id_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.')
}

/// File suffixes a link to a track may carry, as in `./tracks/<id>.md`.
const LINK_SUFFIXES: [&str; 3] = [".md", ".markdown", ".json"];

/// True when `line` mentions `track_id` as a whole token. Headings never count.
///
/// Ids may contain `.`, so a token that ends a sentence (`<id>.`) or names a
/// file (`<id>.md`) is retried with the trailing dots or the suffix removed.
pub fn references(line: &str, track_id: &str) -> bool {
    if line.trim_start().starts_with('#') {
        return false;
    }
    line.split(|c: char| !is_id_char(c))
        .any(|token| token_names(token, track_id))
}

fn token_names(token: &str, track_id: &str) -> bool {
    if token == track_id || token.trim_end_matches('.') == track_id {
        return true;
    }
    LINK_SUFFIXES.iter().any(|suffix| {
        token
            .trim_end_matches('.')
            .strip_suffix(suffix)
            .is_some_and(|stem| stem == track_id)
    })
}

/// Remove every line referencing `track_id`. `None` when nothing matched.
pub fn without_references(raw: &str, track_id: &str) -> Option<String> {
    let mut removed = 0usize;
    let mut out = String::with_capacity(raw.len());
    for line in raw.split_inclusive('\n') {
        if references(line.trim_end_matches(['\n', '\r']), track_id) {
            removed += 1;
            continue;
        }
        out.push_str(line);
    }
    (removed > 0).then_some(out)
}

pub struct IndexEditor<'a> {
    artifact: SharedArtifact<'a>,
}

impl<'a> IndexEditor<'a> {
    pub fn new(ws: &'a dyn Workspace, path: &'a Path, strict: bool) -> Self {
        Self {
            artifact: SharedArtifact::new(ws, path, "index", strict),
        }
    }

    pub fn remove_active_reference(&self, track_id: &str) -> Result<ArtifactEdit, TrackError> {
        self.artifact
            .edit(track_id, |raw| without_references(raw, track_id))
    }

    /// `None` when the index does not exist.
    pub fn contains(&self, track_id: &str) -> Result<Option<bool>, TrackError> {
        Ok(self
            .artifact
            .read(track_id)?
            .map(|raw| raw.lines().any(|line| references(line, track_id))))
    }
}
