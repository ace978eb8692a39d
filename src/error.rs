use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("invalid invocation: {reason}")]
    Usage { track_id: String, reason: String },
    #[error("no metadata record found ({detail})")]
    NotFound { track_id: String, detail: String },
    #[error("metadata record {} is malformed: {reason}", path.display())]
    MetadataParse {
        track_id: String,
        path: PathBuf,
        reason: String,
    },
    #[error("metadata and file tree disagree: {detail}")]
    SplitState { track_id: String, detail: String },
    #[error("{action} failed for {}: {source}", path.display())]
    Io {
        track_id: String,
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{artifact} artifact {} is missing and strict mode is enabled", path.display())]
    ArtifactMissing {
        track_id: String,
        artifact: &'static str,
        path: PathBuf,
    },
    #[error("archival is durable but the audit log rejected it: {reason}")]
    Audit { track_id: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackErrorCode {
    Usage,
    NotFound,
    MetadataParse,
    SplitState,
    Io,
    ArtifactMissing,
    Audit,
}

impl TrackErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Usage => "E_USAGE",
            Self::NotFound => "E_NOT_FOUND",
            Self::MetadataParse => "E_METADATA_PARSE",
            Self::SplitState => "E_SPLIT_STATE",
            Self::Io => "E_IO",
            Self::ArtifactMissing => "E_ARTIFACT_MISSING",
            Self::Audit => "E_AUDIT",
        }
    }
}

impl TrackError {
    pub fn code(&self) -> TrackErrorCode {
        match self {
            Self::Usage { .. } => TrackErrorCode::Usage,
            Self::NotFound { .. } => TrackErrorCode::NotFound,
            Self::MetadataParse { .. } => TrackErrorCode::MetadataParse,
            Self::SplitState { .. } => TrackErrorCode::SplitState,
            Self::Io { .. } => TrackErrorCode::Io,
            Self::ArtifactMissing { .. } => TrackErrorCode::ArtifactMissing,
            Self::Audit { .. } => TrackErrorCode::Audit,
        }
    }

    pub fn track_id(&self) -> &str {
        match self {
            Self::Usage { track_id, .. }
            | Self::NotFound { track_id, .. }
            | Self::MetadataParse { track_id, .. }
            | Self::SplitState { track_id, .. }
            | Self::Io { track_id, .. }
            | Self::ArtifactMissing { track_id, .. }
            | Self::Audit { track_id, .. } => track_id,
        }
    }

    pub fn io(
        track_id: &str,
        action: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            track_id: track_id.to_string(),
            action,
            path: path.into(),
            source,
        }
    }

    /// Single-line diagnostic: `<CODE> track=<id>: <detail>`.
    pub fn diagnostic(&self) -> String {
        let line = format!("{} track={}: {}", self.code().as_str(), self.track_id(), self);
        line.replace(['\n', '\r'], " ")
    }
}
