use crate::tracks::paths::TrackPaths;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_ARCHIVE_REASON: &str = "Completed";
pub const DEFAULT_COMMIT_TEMPLATE: &str = "chore(conductor): Archive track '{title}'";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    Log,
    Git,
    None,
}

impl AuditSinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Git => "git",
            Self::None => "none",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "log" => Some(Self::Log),
            "git" => Some(Self::Git),
            "none" | "off" => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrictnessConfig {
    /// Fail instead of skipping when the artifact does not exist.
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub sink: AuditSinkKind,
    pub git_timeout_secs: u64,
    /// `{id}`, `{title}` and `{reason}` are substituted.
    pub commit_template: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::Log,
            git_timeout_secs: 30,
            commit_template: DEFAULT_COMMIT_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub default_reason: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            default_reason: DEFAULT_ARCHIVE_REASON.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TracksConfig {
    pub registry: StrictnessConfig,
    pub index: StrictnessConfig,
    pub audit: AuditConfig,
    pub archive: ArchiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialTracksConfig {
    registry: Option<StrictnessConfig>,
    index: Option<StrictnessConfig>,
    audit: Option<AuditConfig>,
    archive: Option<ArchiveConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => {
            let trimmed = v.trim();
            match trimmed {
                "1" | "true" | "TRUE" | "yes" | "on" => true,
                "0" | "false" | "FALSE" | "no" | "off" => false,
                _ => fallback,
            }
        }
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn validate(cfg: &TracksConfig) -> Result<()> {
    if cfg.audit.git_timeout_secs == 0 {
        return Err(anyhow!("invalid audit git timeout: must be >= 1 second"));
    }
    if cfg.audit.commit_template.trim().is_empty() {
        return Err(anyhow!("invalid audit commit template: cannot be empty"));
    }
    if cfg.archive.default_reason.trim().is_empty() {
        return Err(anyhow!("invalid default archive reason: cannot be empty"));
    }
    Ok(())
}

pub fn resolve_config_path(paths: &TrackPaths) -> PathBuf {
    match env::var("TRACKS_CONFIG_PATH") {
        Ok(custom) if !custom.trim().is_empty() => PathBuf::from(custom.trim()),
        _ => paths.conductor_dir.join("tracks.toml"),
    }
}

fn merge_file_config(base: &mut TracksConfig, paths: &TrackPaths) -> Result<()> {
    let path = resolve_config_path(paths);
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialTracksConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse tracks config {}: {err}", path.display()))?;
    if let Some(registry) = parsed.registry {
        base.registry = registry;
    }
    if let Some(index) = parsed.index {
        base.index = index;
    }
    if let Some(audit) = parsed.audit {
        base.audit = audit;
    }
    if let Some(archive) = parsed.archive {
        base.archive = archive;
    }
    Ok(())
}

pub fn load_config(paths: &TrackPaths) -> Result<TracksConfig> {
    let mut cfg = TracksConfig::default();
    merge_file_config(&mut cfg, paths)?;

    cfg.registry.strict = env_or_bool("TRACKS_REGISTRY_STRICT", cfg.registry.strict);
    cfg.index.strict = env_or_bool("TRACKS_INDEX_STRICT", cfg.index.strict);
    if let Ok(raw) = env::var("TRACKS_AUDIT_SINK") {
        if !raw.trim().is_empty() {
            cfg.audit.sink = AuditSinkKind::parse(&raw).ok_or_else(|| {
                anyhow!("invalid TRACKS_AUDIT_SINK `{}`: use `log`, `git` or `none`", raw.trim())
            })?;
        }
    }
    cfg.audit.git_timeout_secs =
        env_or_u64("TRACKS_GIT_TIMEOUT_SECS", cfg.audit.git_timeout_secs);
    cfg.archive.default_reason =
        env_or_string("TRACKS_DEFAULT_REASON", &cfg.archive.default_reason);

    validate(&cfg)?;
    Ok(cfg)
}
