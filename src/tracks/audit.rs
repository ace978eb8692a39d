//! Audit collaborators. An archival hands over one [`AuditRecord`]; whether
//! the sink accepts it never changes what was already applied.

use crate::tracks::config::{AuditConfig, AuditSinkKind};
use crate::tracks::paths::TrackPaths;
use crate::tracks::util::{run_with_timeout, sha256_hex};
use crate::tracks::workspace::Workspace;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchedArtifact {
    pub path: String,
    /// Digest of file artifacts after the change; `None` for directories.
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub track_id: String,
    pub title: String,
    pub reason: String,
    pub archived_at: String,
    pub relocated_from: String,
    pub touched: Vec<TouchedArtifact>,
    pub resumed: bool,
}

pub fn touched_file(ws: &dyn Workspace, path: &Path) -> TouchedArtifact {
    let sha256 = ws
        .read_text(path)
        .ok()
        .flatten()
        .map(|raw| sha256_hex(raw.as_bytes()));
    TouchedArtifact {
        path: path.display().to_string(),
        sha256,
    }
}

pub fn touched_dir(path: &Path) -> TouchedArtifact {
    TouchedArtifact {
        path: path.display().to_string(),
        sha256: None,
    }
}

pub trait AuditSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn record(&self, record: &AuditRecord) -> Result<()>;

    /// Whether this archival already reached the sink. A run that finds
    /// every step done still hands over the record when this is false.
    fn is_recorded(&self, record: &AuditRecord) -> Result<bool>;
}

/// Appends one JSON line per archival to `audit.log`.
pub struct LogAudit {
    path: PathBuf,
}

impl LogAudit {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AuditSink for LogAudit {
    fn name(&self) -> &'static str {
        "log"
    }

    fn record(&self, record: &AuditRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let line = format!("{}\n", serde_json::to_string(record)?);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append {}", self.path.display()))?;
        Ok(())
    }

    fn is_recorded(&self, record: &AuditRecord) -> Result<bool> {
        Ok(read_log(&self.path)?
            .iter()
            .any(|r| r.track_id == record.track_id && r.archived_at == record.archived_at))
    }
}

fn read_log(path: &Path) -> Result<Vec<AuditRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut out = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: AuditRecord = serde_json::from_str(trimmed)
            .with_context(|| format!("failed to parse audit line in {}", path.display()))?;
        out.push(record);
    }
    Ok(out)
}

/// Records the archival as a single commit in the project repository.
pub struct GitAudit {
    repo_root: PathBuf,
    git_bin: Option<PathBuf>,
    timeout_secs: u64,
    template: String,
}

impl GitAudit {
    pub fn new(repo_root: impl Into<PathBuf>, cfg: &AuditConfig) -> Self {
        Self {
            repo_root: repo_root.into(),
            git_bin: None,
            timeout_secs: cfg.git_timeout_secs,
            template: cfg.commit_template.clone(),
        }
    }

    pub fn with_git_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.git_bin = Some(bin.into());
        self
    }

    fn resolve_git_bin(&self) -> Result<PathBuf> {
        if let Some(bin) = &self.git_bin {
            return Ok(bin.clone());
        }
        which::which("git").context("git binary not found in TRACKS_GIT_BIN or PATH")
    }

    fn git(&self, bin: &Path, args: &[&str], paths: &[&str]) -> Result<String> {
        let mut cmd = Command::new(bin);
        cmd.arg("-C").arg(&self.repo_root).args(args);
        if !paths.is_empty() {
            cmd.arg("--").args(paths);
        }
        let output = run_with_timeout(&mut cmd, self.timeout_secs)
            .with_context(|| format!("failed to run `{} {}`", bin.display(), args.join(" ")))?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        anyhow::bail!(
            "git {} failed\nstdout: {}\nstderr: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stdout).trim(),
            String::from_utf8_lossy(&output.stderr).trim()
        )
    }
}

pub fn commit_message(template: &str, record: &AuditRecord) -> String {
    template
        .replace("{id}", &record.track_id)
        .replace("{title}", &record.title)
        .replace("{reason}", &record.reason)
}

impl AuditSink for GitAudit {
    fn name(&self) -> &'static str {
        "git"
    }

    fn record(&self, record: &AuditRecord) -> Result<()> {
        let bin = self.resolve_git_bin()?;

        self.git(
            &bin,
            &["rm", "-r", "-q", "--cached", "--ignore-unmatch"],
            &[record.relocated_from.as_str()],
        )?;

        let present = record
            .touched
            .iter()
            .map(|t| t.path.as_str())
            .filter(|p| Path::new(p).exists())
            .collect::<Vec<_>>();
        if !present.is_empty() {
            self.git(&bin, &["add", "-A"], &present)?;
        }

        let message = commit_message(&self.template, record);
        self.git(&bin, &["commit", "-q", "-m", &message], &[])?;
        Ok(())
    }

    /// Recorded once nothing under the track's paths is left uncommitted.
    fn is_recorded(&self, record: &AuditRecord) -> Result<bool> {
        let bin = self.resolve_git_bin()?;
        let mut paths = vec![record.relocated_from.as_str()];
        paths.extend(record.touched.iter().map(|t| t.path.as_str()));
        let status = self.git(&bin, &["status", "--porcelain"], &paths)?;
        Ok(status.trim().is_empty())
    }
}

pub struct NoAudit;

impl AuditSink for NoAudit {
    fn name(&self) -> &'static str {
        "none"
    }

    fn record(&self, _record: &AuditRecord) -> Result<()> {
        Ok(())
    }

    fn is_recorded(&self, _record: &AuditRecord) -> Result<bool> {
        Ok(true)
    }
}

pub fn sink_from_config(paths: &TrackPaths, cfg: &AuditConfig) -> Box<dyn AuditSink> {
    match cfg.sink {
        AuditSinkKind::Log => Box::new(LogAudit::new(paths.audit_log())),
        AuditSinkKind::Git => {
            let sink = GitAudit::new(&paths.project_root, cfg);
            match env::var("TRACKS_GIT_BIN") {
                Ok(bin) if !bin.trim().is_empty() => Box::new(sink.with_git_bin(bin.trim())),
                _ => Box::new(sink),
            }
        }
        AuditSinkKind::None => Box::new(NoAudit),
    }
}
