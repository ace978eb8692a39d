use anyhow::Result;

use crate::commands::CommandReport;
use crate::tracks::config::{load_config, resolve_config_path};
use crate::tracks::paths::resolve_paths;

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    let mut report = CommandReport::new("paths");

    report.detail(format!("project_root={}", paths.project_root.display()));
    report.detail(format!("conductor_dir={}", paths.conductor_dir.display()));
    report.detail(format!("active_root={}", paths.active_root.display()));
    report.detail(format!("archive_root={}", paths.archive_root.display()));
    report.detail(format!("registry_file={}", paths.registry_file.display()));
    report.detail(format!("index_file={}", paths.index_file.display()));
    report.detail(format!("state_dir={}", paths.state_dir.display()));
    report.detail(format!("config_file={}", resolve_config_path(&paths).display()));
    report.detail(format!("registry_strict={}", cfg.registry.strict));
    report.detail(format!("index_strict={}", cfg.index.strict));
    report.detail(format!("audit_sink={}", cfg.audit.sink.as_str()));
    report.detail(format!("git_timeout_secs={}", cfg.audit.git_timeout_secs));
    report.detail(format!("default_reason={}", cfg.archive.default_reason));

    if !paths.conductor_dir.exists() {
        report.issue(format!(
            "missing conductor dir ({}); set TRACKS_PROJECT_ROOT or TRACKS_CONDUCTOR_DIR",
            paths.conductor_dir.display()
        ));
    }
    if !paths.active_root.exists() {
        report.issue(format!("missing active tracks dir ({})", paths.active_root.display()));
    }
    if cfg.registry.strict && !paths.registry_file.exists() {
        report.issue(format!(
            "registry is strict but {} does not exist",
            paths.registry_file.display()
        ));
    }
    if cfg.index.strict && !paths.index_file.exists() {
        report.issue(format!(
            "index is strict but {} does not exist",
            paths.index_file.display()
        ));
    }

    Ok(report)
}
