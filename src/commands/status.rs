use anyhow::Result;

use crate::commands::CommandReport;
use crate::tracks::archive::{Archiver, TrackInspection, TrackState};
use crate::tracks::audit::NoAudit;
use crate::tracks::config::load_config;
use crate::tracks::paths::resolve_paths;
use crate::tracks::relocate::Placement;
use crate::tracks::workspace::FsWorkspace;

fn placement_label(placement: Placement) -> &'static str {
    match placement {
        Placement::Active => "active",
        Placement::Archived => "archived",
        Placement::Both => "both",
        Placement::Missing => "missing",
    }
}

fn describe(report: &mut CommandReport, inspection: &TrackInspection) {
    report.detail(format!("title={}", inspection.metadata.title));
    report.detail(format!("metadata_status={}", inspection.metadata.status));
    report.detail(format!("location={}", inspection.track_dir.display()));
    report.detail(format!("placement={}", placement_label(inspection.placement)));

    let registry = match inspection.registry {
        None => "missing",
        Some(view) if view.active && view.archived => "active+archived",
        Some(view) if view.active => "active",
        Some(view) if view.archived => "archived",
        Some(_) => "unlisted",
    };
    report.detail(format!("registry={registry}"));

    let index = match inspection.index_listed {
        None => "missing",
        Some(true) => "listed",
        Some(false) => "unlisted",
    };
    report.detail(format!("index={index}"));

    match inspection.state() {
        TrackState::Active => report.detail("state=active"),
        TrackState::Archived => report.detail("state=archived"),
        TrackState::PartiallyArchived(pending) => {
            report.detail("state=partially_archived");
            let names = pending
                .iter()
                .map(|step| step.as_str())
                .collect::<Vec<_>>()
                .join(",");
            report.detail(format!("pending={names}"));
        }
    }
}

pub fn run(track_id: &str) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    let ws = FsWorkspace::new(paths.locks_dir());
    let archiver = Archiver::new(&ws, &paths, &cfg, &NoAudit);

    let mut report = CommandReport::new("status");
    report.detail(format!("track_id={track_id}"));
    match archiver.inspect(track_id) {
        Ok(inspection) => describe(&mut report, &inspection),
        Err(err) => report.issue(err.diagnostic()),
    }

    Ok(report)
}
