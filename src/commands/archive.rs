use anyhow::Result;

use crate::commands::CommandReport;
use crate::tracks::archive::{ArchiveOutcome, Archiver, AuditOutcome};
use crate::tracks::audit::sink_from_config;
use crate::tracks::config::load_config;
use crate::tracks::paths::resolve_paths;
use crate::tracks::workspace::FsWorkspace;

fn audit_label(audit: &AuditOutcome) -> String {
    match audit {
        AuditOutcome::Recorded(sink) => format!("recorded({sink})"),
        AuditOutcome::NotNeeded => "not_needed".to_string(),
        AuditOutcome::DryRun => "dry_run".to_string(),
        AuditOutcome::Failed(_) => "failed".to_string(),
    }
}

fn describe(report: &mut CommandReport, outcome: &ArchiveOutcome) {
    report.detail(format!("title={}", outcome.title));
    report.detail(format!("status={}", outcome.status));
    report.detail(format!("reason={}", outcome.reason));
    report.detail(format!("archived_at={}", outcome.archived_at));
    report.detail(format!("location={}", outcome.location.display()));
    for step in &outcome.steps {
        report.detail(format!("step.{}={}", step.step.as_str(), step.outcome.label()));
    }
    report.detail(format!("noop={}", outcome.noop));
    report.detail(format!("resumed={}", outcome.resumed));
    if outcome.dry_run {
        report.detail("dry_run=true");
    }
    report.detail(format!("audit={}", audit_label(&outcome.audit)));
}

pub fn run(track_id: &str, reason: Option<&str>, dry_run: bool) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    let ws = FsWorkspace::new(paths.locks_dir());
    let sink = sink_from_config(&paths, &cfg.audit);
    let archiver = Archiver::new(&ws, &paths, &cfg, sink.as_ref());

    let mut report = CommandReport::new("archive");
    report.detail(format!("track_id={track_id}"));

    let result = if dry_run {
        archiver.plan(track_id, reason)
    } else {
        archiver.archive(track_id, reason)
    };
    match result {
        Ok(outcome) => {
            describe(&mut report, &outcome);
            if let Some(err) = outcome.audit_error() {
                report.issue(err.diagnostic());
            }
        }
        Err(err) => report.issue(err.diagnostic()),
    }

    Ok(report)
}
