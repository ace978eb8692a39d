use super::*;
use crate::tracks::audit::NoAudit;
use crate::tracks::metadata::parse_metadata;
use crate::tracks::registry::Registry;
use crate::tracks::workspace::MemoryWorkspace;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::thread;

const TRACK: &str = "backend-standards_20260220";
const SIBLING: &str = "backend-standards_20260220-followup";

const REGISTRY: &str = "\
# Project Tracks

## Active Tracks

| ID | Title | Status | Created |
|----|-------|--------|---------|
| `backend-standards_20260220` | Backend standards | completed | 2026-02-20 |
| `backend-standards_20260220-followup` | Backend standards follow-up | new | 2026-02-21 |

## Archived Tracks

| ID | Title | Reason | Archived |
|----|-------|--------|----------|
";

const INDEX: &str = "\
# Conductor Index

## Active Tracks

- [Backend standards](./tracks/backend-standards_20260220/)
- [Backend standards follow-up](./tracks/backend-standards_20260220-followup/)
";

fn step_of(outcome: &ArchiveOutcome, step: ArchiveStep) -> Option<&StepOutcome> {
    outcome
        .steps
        .iter()
        .find(|r| r.step == step)
        .map(|r| &r.outcome)
}

fn fixed_clock() -> String {
    "2026-02-20T10:00:00Z".to_string()
}

#[derive(Default)]
struct RecordingAudit {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAudit {
    fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit lock").clone()
    }
}

impl AuditSink for RecordingAudit {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn record(&self, record: &AuditRecord) -> anyhow::Result<()> {
        self.records.lock().expect("audit lock").push(record.clone());
        Ok(())
    }

    fn is_recorded(&self, record: &AuditRecord) -> anyhow::Result<bool> {
        Ok(self
            .records()
            .iter()
            .any(|r| r.track_id == record.track_id && r.archived_at == record.archived_at))
    }
}

struct FailingAudit;

impl AuditSink for FailingAudit {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn record(&self, _record: &AuditRecord) -> anyhow::Result<()> {
        anyhow::bail!("commit rejected by hook")
    }

    fn is_recorded(&self, _record: &AuditRecord) -> anyhow::Result<bool> {
        Ok(false)
    }
}

struct Fixture {
    ws: MemoryWorkspace,
    paths: TrackPaths,
    cfg: TracksConfig,
}

impl Fixture {
    fn new() -> Self {
        let fixture = Self {
            ws: MemoryWorkspace::new(),
            paths: TrackPaths::under(Path::new("/repo")),
            cfg: TracksConfig::default(),
        };
        fixture.add_track(TRACK, "Backend standards");
        fixture.add_track(SIBLING, "Backend standards follow-up");
        fixture.ws.put(&fixture.paths.registry_file, REGISTRY);
        fixture.ws.put(&fixture.paths.index_file, INDEX);
        fixture
    }

    fn add_track(&self, id: &str, title: &str) {
        let dir = self.paths.active_dir(id);
        self.ws.put(
            &dir.join("metadata.json"),
            &format!(
                "{{\n  \"track_id\": \"{id}\",\n  \"status\": \"completed\",\n  \"title\": \"{title}\"\n}}\n"
            ),
        );
        self.ws.put(&dir.join("plan.md"), "# Plan\n");
    }

    fn archiver<'a>(&'a self, audit: &'a dyn AuditSink) -> Archiver<'a> {
        Archiver::new(&self.ws, &self.paths, &self.cfg, audit).with_clock(fixed_clock)
    }

    fn metadata(&self, id: &str, dir: &Path) -> TrackMetadata {
        let raw = self
            .ws
            .get(&dir.join("metadata.json"))
            .unwrap_or_else(|| panic!("metadata for {id} under {}", dir.display()));
        parse_metadata(&raw).expect("parse metadata")
    }

    fn registry(&self) -> Registry {
        Registry::parse(&self.ws.get(&self.paths.registry_file).expect("registry"))
    }

    fn index(&self) -> String {
        self.ws.get(&self.paths.index_file).expect("index")
    }

    fn snapshot(&self) -> BTreeMap<PathBuf, String> {
        self.ws.files()
    }

    /// archived <=> under archive root <=> not active in registry <=> not indexed
    fn assert_consistent(&self, id: &str) {
        let in_archive = self.ws.is_dir(&self.paths.archived_dir(id));
        let in_active = self.ws.is_dir(&self.paths.active_dir(id));
        assert_ne!(in_archive, in_active, "exactly one location for {id}");

        let dir = if in_archive {
            self.paths.archived_dir(id)
        } else {
            self.paths.active_dir(id)
        };
        let meta = self.metadata(id, &dir);
        let archived = meta.is_archived();
        assert_eq!(archived, meta.archived_at.is_some());
        assert_eq!(archived, in_archive);
        assert_eq!(archived, !self.registry().is_active(id));
        let indexed = self
            .index()
            .lines()
            .any(|line| crate::tracks::index::references(line, id));
        assert_eq!(archived, !indexed);
    }
}

#[test]
fn archives_track_with_default_reason() {
    let fx = Fixture::new();
    let audit = RecordingAudit::default();

    let out = fx.archiver(&audit).archive(TRACK, None).expect("archive");

    assert_eq!(out.status, "archived");
    assert_eq!(out.reason, "Completed");
    assert_eq!(out.archived_at, "2026-02-20T10:00:00Z");
    assert!(!out.noop);
    assert!(!out.resumed);
    assert_eq!(out.location, fx.paths.archived_dir(TRACK));
    for step in [
        ArchiveStep::Metadata,
        ArchiveStep::Relocate,
        ArchiveStep::Registry,
        ArchiveStep::Index,
    ] {
        assert_eq!(step_of(&out, step), Some(&StepOutcome::Applied), "{}", step.as_str());
    }

    let meta = fx.metadata(TRACK, &fx.paths.archived_dir(TRACK));
    assert_eq!(meta.status, "archived");
    assert!(meta.archived);
    assert_eq!(meta.archive_reason.as_deref(), Some("Completed"));
    assert_eq!(meta.archived_at.as_deref(), Some("2026-02-20T10:00:00Z"));
    assert_eq!(meta.title, "Backend standards");
    assert!(!fx.ws.is_dir(&fx.paths.active_dir(TRACK)));
    assert_eq!(
        fx.ws.get(&fx.paths.archived_dir(TRACK).join("plan.md")),
        Some("# Plan\n".to_string())
    );

    let registry = fx.registry();
    assert!(!registry.is_active(TRACK));
    assert!(registry.is_archived(TRACK));
    assert!(fx.ws.get(&fx.paths.registry_file).expect("registry").contains(
        "| `backend-standards_20260220` | Backend standards | Completed | 2026-02-20 |"
    ));
    assert!(!fx.index().contains("(./tracks/backend-standards_20260220/)"));

    let records = audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].track_id, TRACK);
    assert_eq!(records[0].title, "Backend standards");
    assert_eq!(records[0].touched.len(), 4);
    assert!(!records[0].resumed);
    assert_eq!(out.audit, AuditOutcome::Recorded("recording".to_string()));

    fx.assert_consistent(TRACK);
    fx.assert_consistent(SIBLING);
}

#[test]
fn prefix_id_leaves_longer_sibling_untouched() {
    let fx = Fixture::new();
    fx.archiver(&NoAudit).archive(TRACK, None).expect("archive");

    assert!(fx.registry().is_active(SIBLING));
    assert!(!fx.registry().is_archived(SIBLING));
    assert!(
        fx.index()
            .contains("- [Backend standards follow-up](./tracks/backend-standards_20260220-followup/)")
    );
    assert!(fx.ws.is_dir(&fx.paths.active_dir(SIBLING)));
}

#[test]
fn second_invocation_is_an_idempotent_noop() {
    let fx = Fixture::new();
    let audit = RecordingAudit::default();
    let archiver = fx.archiver(&audit);

    let first = archiver.archive(TRACK, Some("Shipped")).expect("first");
    let after_first = fx.snapshot();
    let second = archiver.archive(TRACK, Some("Different")).expect("second");

    assert_eq!(fx.snapshot(), after_first);
    assert!(second.noop);
    assert_eq!(second.reason, "Shipped");
    assert_eq!(second.archived_at, first.archived_at);
    assert_eq!(second.audit, AuditOutcome::NotNeeded);
    assert!(
        second
            .steps
            .iter()
            .all(|s| s.outcome == StepOutcome::AlreadyDone)
    );
    assert_eq!(audit.records().len(), 1);
}

#[test]
fn unknown_track_is_not_found_and_changes_nothing() {
    let fx = Fixture::new();
    let before = fx.snapshot();

    let err = fx
        .archiver(&NoAudit)
        .archive("does-not-exist_20260101", None)
        .expect_err("missing");

    assert!(matches!(err, TrackError::NotFound { .. }));
    assert_eq!(err.track_id(), "does-not-exist_20260101");
    assert_eq!(fx.snapshot(), before);
}

#[test]
fn malformed_metadata_aborts_before_mutation() {
    let fx = Fixture::new();
    fx.ws.put(
        &fx.paths.active_dir(TRACK).join("metadata.json"),
        "{\"status\": \"new\"}",
    );
    let before = fx.snapshot();

    let err = fx.archiver(&NoAudit).archive(TRACK, None).expect_err("parse");

    assert!(matches!(err, TrackError::MetadataParse { .. }));
    assert_eq!(fx.snapshot(), before);
}

#[test]
fn invalid_id_is_a_usage_error() {
    let fx = Fixture::new();
    let err = fx
        .archiver(&NoAudit)
        .archive("../escape", None)
        .expect_err("usage");
    assert!(matches!(err, TrackError::Usage { .. }));
}

#[test]
fn crash_before_relocation_resumes_to_same_final_state() {
    let clean = Fixture::new();
    clean.archiver(&NoAudit).archive(TRACK, None).expect("clean run");

    let fx = Fixture::new();
    let audit = RecordingAudit::default();
    fx.ws.fail_next_rename();
    let err = fx.archiver(&audit).archive(TRACK, None).expect_err("crash");
    assert!(matches!(err, TrackError::Io { .. }));

    let half = fx.metadata(TRACK, &fx.paths.active_dir(TRACK));
    assert!(half.is_archived());
    assert!(fx.registry().is_active(TRACK));
    assert!(audit.records().is_empty());

    let inspection = fx.archiver(&audit).inspect(TRACK).expect("inspect");
    assert_eq!(
        inspection.state(),
        TrackState::PartiallyArchived(vec![
            ArchiveStep::Relocate,
            ArchiveStep::Registry,
            ArchiveStep::Index
        ])
    );

    let out = fx.archiver(&audit).archive(TRACK, None).expect("resume");
    assert!(out.resumed);
    assert_eq!(step_of(&out, ArchiveStep::Metadata), Some(&StepOutcome::AlreadyDone));
    assert_eq!(step_of(&out, ArchiveStep::Relocate), Some(&StepOutcome::Applied));
    assert_eq!(fx.snapshot(), clean.snapshot());
    assert!(audit.records()[0].resumed);
    fx.assert_consistent(TRACK);
}

#[test]
fn crash_during_registry_write_resumes_without_redoing_earlier_steps() {
    let fx = Fixture::new();
    fx.ws.fail_next_write_to(&fx.paths.registry_file);

    let err = fx.archiver(&NoAudit).archive(TRACK, None).expect_err("crash");
    assert!(matches!(err, TrackError::Io { .. }));
    assert!(fx.ws.is_dir(&fx.paths.archived_dir(TRACK)));
    assert!(fx.registry().is_active(TRACK));

    let out = fx.archiver(&NoAudit).archive(TRACK, None).expect("resume");
    assert_eq!(step_of(&out, ArchiveStep::Metadata), Some(&StepOutcome::AlreadyDone));
    assert_eq!(step_of(&out, ArchiveStep::Relocate), Some(&StepOutcome::AlreadyDone));
    assert_eq!(step_of(&out, ArchiveStep::Registry), Some(&StepOutcome::Applied));
    assert_eq!(step_of(&out, ArchiveStep::Index), Some(&StepOutcome::Applied));
    fx.assert_consistent(TRACK);
}

#[test]
fn missing_registry_is_skipped_softly() {
    let fx = Fixture::new();
    fx.ws.remove_file(&fx.paths.registry_file);

    let out = fx.archiver(&NoAudit).archive(TRACK, None).expect("archive");

    assert_eq!(
        step_of(&out, ArchiveStep::Registry),
        Some(&StepOutcome::Skipped("artifact not found".to_string()))
    );
    assert!(fx.ws.is_dir(&fx.paths.archived_dir(TRACK)));
    assert!(fx.metadata(TRACK, &fx.paths.archived_dir(TRACK)).is_archived());
    assert_eq!(fx.ws.get(&fx.paths.registry_file), None);
}

#[test]
fn strict_registry_refuses_before_mutation() {
    let mut fx = Fixture::new();
    fx.cfg.registry.strict = true;
    fx.ws.remove_file(&fx.paths.registry_file);
    let before = fx.snapshot();

    let err = fx.archiver(&NoAudit).archive(TRACK, None).expect_err("strict");

    assert!(matches!(err, TrackError::ArtifactMissing { .. }));
    assert_eq!(fx.snapshot(), before);
}

#[test]
fn directory_in_both_roots_is_split_state() {
    let fx = Fixture::new();
    fx.ws
        .put(&fx.paths.archived_dir(TRACK).join("plan.md"), "# stray\n");
    let before = fx.snapshot();

    let err = fx.archiver(&NoAudit).archive(TRACK, None).expect_err("split");

    assert!(matches!(err, TrackError::SplitState { .. }));
    assert_eq!(fx.snapshot(), before);
}

#[test]
fn archived_directory_with_active_metadata_is_split_state() {
    let fx = Fixture::new();
    fx.ws
        .rename_dir(&fx.paths.active_dir(TRACK), &fx.paths.archived_dir(TRACK))
        .expect("manual move");

    let err = fx.archiver(&NoAudit).archive(TRACK, None).expect_err("split");
    assert!(matches!(err, TrackError::SplitState { .. }));
    assert!(err.diagnostic().starts_with("E_SPLIT_STATE track=backend-standards_20260220:"));
}

#[test]
fn audit_failure_keeps_archival_durable() {
    let fx = Fixture::new();

    let out = fx.archiver(&FailingAudit).archive(TRACK, None).expect("archive");

    assert!(matches!(out.audit, AuditOutcome::Failed(ref msg) if msg.contains("hook")));
    let err = out.audit_error().expect("audit error");
    assert!(matches!(err, TrackError::Audit { .. }));
    fx.assert_consistent(TRACK);
    assert!(fx.metadata(TRACK, &fx.paths.archived_dir(TRACK)).is_archived());
}

#[test]
fn dry_run_reports_pending_steps_without_writing() {
    let fx = Fixture::new();
    let before = fx.snapshot();

    let plan = fx.archiver(&NoAudit).plan(TRACK, Some("Dropped")).expect("plan");

    assert!(plan.dry_run);
    assert_eq!(plan.reason, "Dropped");
    assert!(plan.steps.iter().all(|s| s.outcome == StepOutcome::Pending));
    assert_eq!(plan.audit, AuditOutcome::DryRun);
    assert_eq!(fx.snapshot(), before);
}

#[test]
fn concurrent_archives_of_different_tracks_keep_shared_artifacts_whole() {
    let fx = Fixture::new();
    let ids = (0..8).map(|i| format!("bulk_{i:02}")).collect::<Vec<_>>();
    let mut registry = REGISTRY.to_string();
    let mut index = INDEX.to_string();
    for id in &ids {
        fx.add_track(id, &format!("Bulk {id}"));
        registry = registry.replace(
            "| `backend-standards_20260220` |",
            &format!("| `{id}` | Bulk {id} | new | 2026-02-22 |\n| `backend-standards_20260220` |"),
        );
        index.push_str(&format!("- [Bulk {id}](./tracks/{id}/)\n"));
    }
    fx.ws.put(&fx.paths.registry_file, &registry);
    fx.ws.put(&fx.paths.index_file, &index);
    let audit = RecordingAudit::default();

    thread::scope(|scope| {
        for id in &ids {
            let archiver = fx.archiver(&audit);
            scope.spawn(move || archiver.archive(id, None).expect("archive"));
        }
    });

    let registry = fx.registry();
    for id in &ids {
        assert!(!registry.is_active(id), "{id} still active");
        assert!(registry.is_archived(id), "{id} not archived");
        fx.assert_consistent(id);
    }
    assert!(registry.is_active(TRACK));
    assert!(registry.is_active(SIBLING));
    assert_eq!(audit.records().len(), ids.len());
}

#[test]
fn concurrent_archives_of_same_track_apply_once() {
    let fx = Fixture::new();
    let audit = RecordingAudit::default();

    let outcomes = thread::scope(|scope| {
        let handles = (0..4)
            .map(|_| {
                let archiver = fx.archiver(&audit);
                scope.spawn(move || archiver.archive(TRACK, None).expect("archive"))
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect::<Vec<_>>()
    });

    assert_eq!(outcomes.iter().filter(|o| !o.noop).count(), 1);
    assert_eq!(audit.records().len(), 1);
    let rendered = fx.ws.get(&fx.paths.registry_file).expect("registry");
    assert_eq!(rendered.matches("`backend-standards_20260220`").count(), 1);
    fx.assert_consistent(TRACK);
}

#[test]
fn resumed_run_audits_paths_applied_by_earlier_runs() {
    let fx = Fixture::new();
    fx.ws.put(
        &fx.paths.active_dir(TRACK).join("metadata.json"),
        "{\"title\": \"Backend standards\", \"status\": \"archived\", \"archived\": true, \"archivedAt\": \"2026-02-19T08:00:00Z\", \"archiveReason\": \"Completed\"}\n",
    );
    fx.ws
        .rename_dir(&fx.paths.active_dir(TRACK), &fx.paths.archived_dir(TRACK))
        .expect("earlier run moved the directory");
    let audit = RecordingAudit::default();

    let out = fx.archiver(&audit).archive(TRACK, None).expect("resume");

    assert_eq!(step_of(&out, ArchiveStep::Relocate), Some(&StepOutcome::AlreadyDone));
    assert!(out.resumed);
    let records = audit.records();
    assert_eq!(records.len(), 1);
    let paths = records[0]
        .touched
        .iter()
        .map(|t| PathBuf::from(&t.path))
        .collect::<Vec<_>>();
    assert!(paths.contains(&fx.paths.archived_dir(TRACK)));
    assert!(paths.contains(&fx.paths.archived_dir(TRACK).join("metadata.json")));
    assert!(paths.contains(&fx.paths.registry_file));
    assert!(paths.contains(&fx.paths.index_file));
    assert_eq!(records[0].archived_at, "2026-02-19T08:00:00Z");
}

#[test]
fn rejected_audit_is_handed_over_again_on_the_next_run() {
    let fx = Fixture::new();
    let first = fx.archiver(&FailingAudit).archive(TRACK, None).expect("first");
    assert!(matches!(first.audit, AuditOutcome::Failed(_)));
    let after_first = fx.snapshot();

    let audit = RecordingAudit::default();
    let second = fx.archiver(&audit).archive(TRACK, None).expect("second");

    assert!(
        second
            .steps
            .iter()
            .all(|s| s.outcome == StepOutcome::AlreadyDone)
    );
    assert!(!second.noop);
    assert!(second.resumed);
    assert_eq!(second.audit, AuditOutcome::Recorded("recording".to_string()));
    assert_eq!(fx.snapshot(), after_first);
    let records = audit.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].resumed);
    assert_eq!(records[0].archived_at, first.archived_at);

    let third = fx.archiver(&audit).archive(TRACK, None).expect("third");
    assert!(third.noop);
    assert_eq!(third.audit, AuditOutcome::NotNeeded);
    assert_eq!(audit.records().len(), 1);
}

#[test]
fn strict_mode_does_not_fail_an_already_archived_track() {
    let mut fx = Fixture::new();
    fx.cfg.registry.strict = true;
    fx.cfg.index.strict = true;
    let audit = RecordingAudit::default();
    fx.archiver(&audit).archive(TRACK, None).expect("archive");
    fx.ws.remove_file(&fx.paths.registry_file);
    fx.ws.remove_file(&fx.paths.index_file);

    let out = fx.archiver(&audit).archive(TRACK, None).expect("idempotent");

    assert!(out.noop);
    assert_eq!(
        step_of(&out, ArchiveStep::Registry),
        Some(&StepOutcome::Skipped("artifact not found".to_string()))
    );
    assert_eq!(
        step_of(&out, ArchiveStep::Index),
        Some(&StepOutcome::Skipped("artifact not found".to_string()))
    );
    assert_eq!(audit.records().len(), 1);
}
