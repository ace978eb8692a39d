//! Archival of a single track.
//!
//! Progress is never stored. Every entry re-derives which steps remain from
//! the artifacts themselves, so an interrupted run is finished by simply
//! running it again. Step order is fixed: metadata, directory, registry,
//! index, audit. Metadata is written first because it travels with the
//! directory and is what marks a track as committed to archival.

use crate::error::TrackError;
use crate::tracks::artifact::ArtifactEdit;
use crate::tracks::audit::{AuditRecord, AuditSink, TouchedArtifact, touched_dir, touched_file};
use crate::tracks::config::TracksConfig;
use crate::tracks::index::IndexEditor;
use crate::tracks::metadata::{ARCHIVED_STATUS, MetadataStore, TrackMetadata};
use crate::tracks::paths::{TrackPaths, metadata_path, validate_track_id};
use crate::tracks::registry::{ArchivedEntry, RegistryEditor, RegistryView};
use crate::tracks::relocate::{FileTreeRelocator, Placement, Relocation, placement};
use crate::tracks::util::{date_of, now_iso8601};
use crate::tracks::warn::{self, WarnEvent};
use crate::tracks::workspace::Workspace;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStep {
    Metadata,
    Relocate,
    Registry,
    Index,
}

impl ArchiveStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Relocate => "relocate",
            Self::Registry => "registry",
            Self::Index => "index",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum StepOutcome {
    Applied,
    AlreadyDone,
    Pending,
    Skipped(String),
}

impl StepOutcome {
    pub fn label(&self) -> String {
        match self {
            Self::Applied => "applied".to_string(),
            Self::AlreadyDone => "already_done".to_string(),
            Self::Pending => "pending".to_string(),
            Self::Skipped(reason) => format!("skipped ({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: ArchiveStep,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum AuditOutcome {
    Recorded(String),
    NotNeeded,
    DryRun,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveOutcome {
    pub track_id: String,
    pub title: String,
    pub status: String,
    pub reason: String,
    pub archived_at: String,
    pub location: PathBuf,
    pub steps: Vec<StepReport>,
    pub noop: bool,
    pub resumed: bool,
    pub dry_run: bool,
    pub audit: AuditOutcome,
}

impl ArchiveOutcome {
    /// The archival itself is durable; only the audit hand-off failed.
    pub fn audit_error(&self) -> Option<TrackError> {
        match &self.audit {
            AuditOutcome::Failed(reason) => Some(TrackError::Audit {
                track_id: self.track_id.clone(),
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

/// Derived lifecycle position of a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "pending")]
pub enum TrackState {
    Active,
    Archived,
    /// Metadata says archived but some artifacts have not caught up yet.
    PartiallyArchived(Vec<ArchiveStep>),
}

#[derive(Debug, Clone)]
pub struct TrackInspection {
    pub metadata: TrackMetadata,
    pub placement: Placement,
    pub track_dir: PathBuf,
    pub registry: Option<RegistryView>,
    pub index_listed: Option<bool>,
}

impl TrackInspection {
    fn metadata_complete(&self) -> bool {
        self.metadata.status == ARCHIVED_STATUS
            && self.metadata.archived
            && self.metadata.archived_at.is_some()
            && self.metadata.archive_reason.is_some()
    }

    pub fn pending_steps(&self) -> Vec<ArchiveStep> {
        let mut pending = Vec::new();
        if !self.metadata_complete() {
            pending.push(ArchiveStep::Metadata);
        }
        if self.placement == Placement::Active {
            pending.push(ArchiveStep::Relocate);
        }
        if let Some(view) = self.registry {
            if view.active || !view.archived {
                pending.push(ArchiveStep::Registry);
            }
        }
        if self.index_listed == Some(true) {
            pending.push(ArchiveStep::Index);
        }
        pending
    }

    pub fn state(&self) -> TrackState {
        if !self.metadata.is_archived() {
            return TrackState::Active;
        }
        let pending = self.pending_steps();
        if pending.is_empty() {
            TrackState::Archived
        } else {
            TrackState::PartiallyArchived(pending)
        }
    }
}

fn edit_outcome(edit: ArtifactEdit) -> StepOutcome {
    match edit {
        ArtifactEdit::Changed => StepOutcome::Applied,
        ArtifactEdit::Unchanged => StepOutcome::AlreadyDone,
        ArtifactEdit::Missing => StepOutcome::Skipped("artifact not found".to_string()),
    }
}

pub struct Archiver<'a> {
    ws: &'a dyn Workspace,
    paths: &'a TrackPaths,
    cfg: &'a TracksConfig,
    audit: &'a dyn AuditSink,
    clock: fn() -> String,
}

impl<'a> Archiver<'a> {
    pub fn new(
        ws: &'a dyn Workspace,
        paths: &'a TrackPaths,
        cfg: &'a TracksConfig,
        audit: &'a dyn AuditSink,
    ) -> Self {
        Self {
            ws,
            paths,
            cfg,
            audit,
            clock: now_iso8601,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: fn() -> String) -> Self {
        self.clock = clock;
        self
    }

    fn registry(&self, strict: bool) -> RegistryEditor<'_> {
        RegistryEditor::new(self.ws, &self.paths.registry_file, strict)
    }

    fn index(&self, strict: bool) -> IndexEditor<'_> {
        IndexEditor::new(self.ws, &self.paths.index_file, strict)
    }

    fn check_id(&self, track_id: &str) -> Result<(), TrackError> {
        validate_track_id(track_id).map_err(|reason| TrackError::Usage {
            track_id: track_id.to_string(),
            reason,
        })
    }

    /// Read-only view of every artifact for `track_id`. Fails on the same
    /// conditions that would stop an archival before its first mutation.
    pub fn inspect(&self, track_id: &str) -> Result<TrackInspection, TrackError> {
        self.check_id(track_id)?;
        let active_dir = self.paths.active_dir(track_id);
        let archived_dir = self.paths.archived_dir(track_id);

        let placement = placement(self.ws, &active_dir, &archived_dir);
        let track_dir = match placement {
            Placement::Active => active_dir,
            Placement::Archived => archived_dir,
            Placement::Both => {
                return Err(TrackError::SplitState {
                    track_id: track_id.to_string(),
                    detail: format!(
                        "track directory exists under both {} and {}",
                        active_dir.display(),
                        archived_dir.display()
                    ),
                });
            }
            Placement::Missing => {
                return Err(TrackError::NotFound {
                    track_id: track_id.to_string(),
                    detail: format!(
                        "no directory under {} or {}",
                        self.paths.active_root.display(),
                        self.paths.archive_root.display()
                    ),
                });
            }
        };

        let metadata = MetadataStore::new(self.ws).load(track_id, &track_dir)?;
        if placement == Placement::Archived && !metadata.is_archived() {
            return Err(TrackError::SplitState {
                track_id: track_id.to_string(),
                detail: format!(
                    "directory is under {} but metadata status is `{}`",
                    self.paths.archive_root.display(),
                    metadata.status
                ),
            });
        }

        Ok(TrackInspection {
            metadata,
            placement,
            track_dir,
            registry: self.registry(false).inspect(track_id)?,
            index_listed: self.index(false).contains(track_id)?,
        })
    }

    fn resolve_reason(&self, meta: &TrackMetadata, requested: Option<&str>) -> String {
        if let Some(existing) = meta.archive_reason.as_deref().filter(|_| meta.is_archived()) {
            return existing.to_string();
        }
        requested
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(self.cfg.archive.default_reason.as_str())
            .to_string()
    }

    fn resolve_archived_at(&self, meta: &TrackMetadata) -> String {
        meta.archived_at
            .clone()
            .filter(|_| meta.is_archived())
            .unwrap_or_else(|| (self.clock)())
    }

    /// Report what `archive` would do without touching anything.
    pub fn plan(&self, track_id: &str, reason: Option<&str>) -> Result<ArchiveOutcome, TrackError> {
        let inspection = self.inspect(track_id)?;
        let pending = inspection.pending_steps();
        let meta = &inspection.metadata;

        let steps = [
            ArchiveStep::Metadata,
            ArchiveStep::Relocate,
            ArchiveStep::Registry,
            ArchiveStep::Index,
        ]
        .into_iter()
        .map(|step| {
            let outcome = if pending.contains(&step) {
                StepOutcome::Pending
            } else if step == ArchiveStep::Registry && inspection.registry.is_none() {
                StepOutcome::Skipped("artifact not found".to_string())
            } else if step == ArchiveStep::Index && inspection.index_listed.is_none() {
                StepOutcome::Skipped("artifact not found".to_string())
            } else {
                StepOutcome::AlreadyDone
            };
            StepReport { step, outcome }
        })
        .collect::<Vec<_>>();

        Ok(ArchiveOutcome {
            track_id: track_id.to_string(),
            title: meta.title.clone(),
            status: ARCHIVED_STATUS.to_string(),
            reason: self.resolve_reason(meta, reason),
            archived_at: self.resolve_archived_at(meta),
            location: self.paths.archived_dir(track_id),
            noop: pending.is_empty(),
            resumed: meta.is_archived() && !pending.is_empty(),
            dry_run: true,
            steps,
            audit: AuditOutcome::DryRun,
        })
    }

    /// Move `track_id` from active to archived. Safe to call repeatedly: an
    /// already archived track is a successful no-op, and a partially archived
    /// one is completed.
    pub fn archive(
        &self,
        track_id: &str,
        reason: Option<&str>,
    ) -> Result<ArchiveOutcome, TrackError> {
        self.check_id(track_id)?;
        let lock_key = format!("track-{track_id}");
        let _track_guard = self.ws.lock(&lock_key).map_err(|err| {
            TrackError::io(track_id, "lock track", self.paths.active_dir(track_id), err)
        })?;

        let inspection = self.inspect(track_id)?;
        // Strictness only guards tracks that still have work to do.
        let settled = inspection.state() == TrackState::Archived;
        let registry_strict = self.cfg.registry.strict && !settled;
        let index_strict = self.cfg.index.strict && !settled;
        if registry_strict && inspection.registry.is_none() {
            return Err(TrackError::ArtifactMissing {
                track_id: track_id.to_string(),
                artifact: "registry",
                path: self.paths.registry_file.clone(),
            });
        }
        if index_strict && inspection.index_listed.is_none() {
            return Err(TrackError::ArtifactMissing {
                track_id: track_id.to_string(),
                artifact: "index",
                path: self.paths.index_file.clone(),
            });
        }
        let was_archived = inspection.metadata.is_archived();
        let needs_metadata = inspection.pending_steps().contains(&ArchiveStep::Metadata);
        let mut meta = inspection.metadata;

        let reason = self.resolve_reason(&meta, reason);
        let archived_at = self.resolve_archived_at(&meta);
        let active_dir = self.paths.active_dir(track_id);
        let archived_dir = self.paths.archived_dir(track_id);
        let mut steps = Vec::with_capacity(4);

        let metadata_outcome = if needs_metadata {
            meta.mark_archived(&archived_at, &reason);
            MetadataStore::new(self.ws).save(track_id, &inspection.track_dir, &meta)?;
            StepOutcome::Applied
        } else {
            StepOutcome::AlreadyDone
        };
        steps.push(StepReport {
            step: ArchiveStep::Metadata,
            outcome: metadata_outcome,
        });

        let relocation =
            FileTreeRelocator::new(self.ws).relocate(track_id, &active_dir, &archived_dir)?;
        steps.push(StepReport {
            step: ArchiveStep::Relocate,
            outcome: match relocation {
                Relocation::Moved => StepOutcome::Applied,
                Relocation::AlreadyAtDestination => StepOutcome::AlreadyDone,
            },
        });

        let registry = self.registry(registry_strict);
        let entry = ArchivedEntry {
            title: meta.title.clone(),
            reason: reason.clone(),
            date: date_of(&archived_at),
        };
        let registry_edit = registry.move_to_archived(track_id, &entry)?;
        if registry_edit == ArtifactEdit::Missing {
            self.warn_missing(track_id, "registry", &self.paths.registry_file);
        }
        steps.push(StepReport {
            step: ArchiveStep::Registry,
            outcome: edit_outcome(registry_edit),
        });

        let index_edit = self.index(index_strict).remove_active_reference(track_id)?;
        if index_edit == ArtifactEdit::Missing {
            self.warn_missing(track_id, "index", &self.paths.index_file);
        }
        steps.push(StepReport {
            step: ArchiveStep::Index,
            outcome: edit_outcome(index_edit),
        });

        let applied_any = steps.iter().any(|s| s.outcome == StepOutcome::Applied);
        let record = AuditRecord {
            track_id: track_id.to_string(),
            title: meta.title.clone(),
            reason: reason.clone(),
            archived_at: archived_at.clone(),
            relocated_from: active_dir.display().to_string(),
            touched: self.touched(&archived_dir),
            resumed: was_archived,
        };
        let audit_due = applied_any || self.audit_pending(&record);
        let audit = if audit_due {
            match self.audit.record(&record) {
                Ok(()) => AuditOutcome::Recorded(self.audit.name().to_string()),
                Err(err) => {
                    let err = format!("{err:#}");
                    warn::emit(WarnEvent {
                        code: "AUDIT_FAILED",
                        stage: "audit",
                        track: track_id,
                        artifact: self.audit.name(),
                        action: "record",
                        reason: "audit-sink-rejected-record",
                        err: &err,
                    });
                    AuditOutcome::Failed(err)
                }
            }
        } else {
            AuditOutcome::NotNeeded
        };

        Ok(ArchiveOutcome {
            track_id: track_id.to_string(),
            title: meta.title,
            status: ARCHIVED_STATUS.to_string(),
            reason,
            archived_at,
            location: archived_dir,
            steps,
            noop: !audit_due,
            resumed: was_archived && audit_due,
            dry_run: false,
            audit,
        })
    }

    /// Everything the archival has changed so far, including what earlier
    /// interrupted runs applied.
    fn touched(&self, archived_dir: &Path) -> Vec<TouchedArtifact> {
        let shared = [&self.paths.registry_file, &self.paths.index_file]
            .into_iter()
            .map(|path| touched_file(self.ws, path))
            .filter(|artifact| artifact.sha256.is_some());
        [
            touched_dir(archived_dir),
            touched_file(self.ws, &metadata_path(archived_dir)),
        ]
        .into_iter()
        .chain(shared)
        .collect()
    }

    fn audit_pending(&self, record: &AuditRecord) -> bool {
        match self.audit.is_recorded(record) {
            Ok(recorded) => !recorded,
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "AUDIT_CHECK_FAILED",
                    stage: "audit",
                    track: &record.track_id,
                    artifact: self.audit.name(),
                    action: "retry",
                    reason: "audit-state-unknown",
                    err: &format!("{err:#}"),
                });
                true
            }
        }
    }

    fn warn_missing(&self, track_id: &str, stage: &str, path: &Path) {
        let code = format!("{}_MISSING", stage.to_ascii_uppercase());
        warn::emit(WarnEvent {
            code: &code,
            stage,
            track: track_id,
            artifact: &path.display().to_string(),
            action: "skip",
            reason: "artifact-not-found",
            err: "",
        });
    }
}

#[cfg(test)]
mod tests;
