//! `tracks.md`: the human-readable table of every track.
//!
//! The file is parsed into sections and table rows, edited in memory and
//! written back. Rows are matched on their id cell, never on a substring of the
//! line, so `auth` never removes the row for `auth-v2`.

use crate::error::TrackError;
use crate::tracks::artifact::{ArtifactEdit, SharedArtifact};
use crate::tracks::workspace::Workspace;
use std::path::Path;

pub const ARCHIVED_HEADING: &str = "## Archived Tracks";
const ARCHIVED_TABLE_HEADER: &str = "| ID | Title | Reason | Archived |";
const ARCHIVED_TABLE_SEPARATOR: &str = "|----|-------|--------|----------|";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Active,
    Archived,
    Other,
}

impl SectionKind {
    fn from_heading(heading: &str) -> Self {
        let lower = heading.to_ascii_lowercase();
        if lower.contains("archive") {
            Self::Archived
        } else if lower.contains("active") {
            Self::Active
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Text(String),
    Row { id: String, raw: String },
}

impl Line {
    fn is_table(&self) -> bool {
        match self {
            Line::Row { .. } => true,
            Line::Text(raw) => raw.trim_start().starts_with('|'),
        }
    }

    fn row_id(&self) -> Option<&str> {
        match self {
            Line::Row { id, .. } => Some(id),
            Line::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    heading: String,
    kind: SectionKind,
    lines: Vec<Line>,
}

impl Section {
    fn has_row(&self, track_id: &str) -> bool {
        self.lines.iter().any(|l| l.row_id() == Some(track_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedEntry {
    pub title: String,
    pub reason: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    preamble: Vec<String>,
    sections: Vec<Section>,
}

/// Split a markdown table line into unescaped cells.
pub fn split_cells(line: &str) -> Vec<String> {
    let body = line.trim();
    let body = body.strip_prefix('|').unwrap_or(body);

    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut chars = body.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&'|') => {
                cell.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut cell).trim().to_string()),
            _ => cell.push(ch),
        }
    }
    if !cell.trim().is_empty() {
        cells.push(cell.trim().to_string());
    }
    cells
}

fn escape_cell(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

fn is_separator(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|c| {
            !c.is_empty() && c.chars().all(|ch| matches!(ch, '-' | ':' | ' '))
        })
}

fn id_token(cell: &str) -> Option<String> {
    let token = cell.trim().trim_matches('`').trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn parse_section_lines(kind: SectionKind, raw_lines: Vec<&str>) -> Vec<Line> {
    let mut out = Vec::with_capacity(raw_lines.len());
    let mut in_table = false;
    for raw in raw_lines {
        let is_table_line = raw.trim_start().starts_with('|');
        if !is_table_line {
            in_table = false;
            out.push(Line::Text(raw.to_string()));
            continue;
        }
        if kind == SectionKind::Other || !in_table {
            in_table = true;
            out.push(Line::Text(raw.to_string()));
            continue;
        }

        let cells = split_cells(raw);
        match cells.first().and_then(|c| id_token(c)) {
            Some(id) if !is_separator(&cells) => out.push(Line::Row {
                id,
                raw: raw.to_string(),
            }),
            _ => out.push(Line::Text(raw.to_string())),
        }
    }
    out
}

impl Registry {
    pub fn parse(raw: &str) -> Self {
        let mut preamble = Vec::new();
        let mut pending: Option<(String, Vec<&str>)> = None;
        let mut sections = Vec::new();

        for line in raw.lines() {
            if line.starts_with("## ") {
                if let Some((heading, lines)) = pending.take() {
                    let kind = SectionKind::from_heading(&heading);
                    sections.push(Section {
                        lines: parse_section_lines(kind, lines),
                        heading,
                        kind,
                    });
                }
                pending = Some((line.to_string(), Vec::new()));
                continue;
            }
            match pending.as_mut() {
                Some((_, lines)) => lines.push(line),
                None => preamble.push(line.to_string()),
            }
        }
        if let Some((heading, lines)) = pending {
            let kind = SectionKind::from_heading(&heading);
            sections.push(Section {
                lines: parse_section_lines(kind, lines),
                heading,
                kind,
            });
        }

        Self { preamble, sections }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            out.push_str(line);
            out.push('\n');
        }
        for section in &self.sections {
            out.push_str(&section.heading);
            out.push('\n');
            for line in &section.lines {
                match line {
                    Line::Text(raw) | Line::Row { raw, .. } => out.push_str(raw),
                }
                out.push('\n');
            }
        }
        out
    }

    fn sections_of(&self, kind: SectionKind) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(move |s| s.kind == kind)
    }

    pub fn is_active(&self, track_id: &str) -> bool {
        self.sections_of(SectionKind::Active)
            .any(|s| s.has_row(track_id))
    }

    pub fn is_archived(&self, track_id: &str) -> bool {
        self.sections_of(SectionKind::Archived)
            .any(|s| s.has_row(track_id))
    }

    /// Drop every active row for `track_id`, returning how many were removed.
    pub fn remove_active(&mut self, track_id: &str) -> usize {
        let mut removed = 0usize;
        for section in self
            .sections
            .iter_mut()
            .filter(|s| s.kind == SectionKind::Active)
        {
            let before = section.lines.len();
            section.lines.retain(|l| l.row_id() != Some(track_id));
            removed += before - section.lines.len();
        }
        removed
    }

    /// Append an archived row unless one already exists. Returns whether a row
    /// was added.
    pub fn append_archived(&mut self, track_id: &str, entry: &ArchivedEntry) -> bool {
        if self.is_archived(track_id) {
            return false;
        }

        let row = Line::Row {
            id: track_id.to_string(),
            raw: format!(
                "| `{}` | {} | {} | {} |",
                track_id,
                escape_cell(&entry.title),
                escape_cell(&entry.reason),
                escape_cell(&entry.date)
            ),
        };

        let section_idx = match self
            .sections
            .iter()
            .position(|s| s.kind == SectionKind::Archived)
        {
            Some(idx) => idx,
            None => {
                if let Some(last) = self.sections.last_mut() {
                    let ends_blank = matches!(last.lines.last(), Some(Line::Text(t)) if t.trim().is_empty());
                    if !ends_blank {
                        last.lines.push(Line::Text(String::new()));
                    }
                } else if self.preamble.last().is_some_and(|l| !l.trim().is_empty()) {
                    self.preamble.push(String::new());
                }
                self.sections.push(Section {
                    heading: ARCHIVED_HEADING.to_string(),
                    kind: SectionKind::Archived,
                    lines: vec![Line::Text(String::new())],
                });
                self.sections.len() - 1
            }
        };

        let section = &mut self.sections[section_idx];
        match section.lines.iter().rposition(Line::is_table) {
            Some(last_table) => section.lines.insert(last_table + 1, row),
            None => {
                let at = section
                    .lines
                    .iter()
                    .rposition(|l| !matches!(l, Line::Text(t) if t.trim().is_empty()))
                    .map(|i| i + 1)
                    .unwrap_or(section.lines.len());
                let mut table = vec![
                    Line::Text(ARCHIVED_TABLE_HEADER.to_string()),
                    Line::Text(ARCHIVED_TABLE_SEPARATOR.to_string()),
                    row,
                ];
                if at > 0
                    && !matches!(&section.lines[at - 1], Line::Text(t) if t.trim().is_empty())
                {
                    table.insert(0, Line::Text(String::new()));
                }
                section.lines.splice(at..at, table);
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryView {
    pub active: bool,
    pub archived: bool,
}

pub struct RegistryEditor<'a> {
    artifact: SharedArtifact<'a>,
}

impl<'a> RegistryEditor<'a> {
    pub fn new(ws: &'a dyn Workspace, path: &'a Path, strict: bool) -> Self {
        Self {
            artifact: SharedArtifact::new(ws, path, "registry", strict),
        }
    }

    pub fn move_to_archived(
        &self,
        track_id: &str,
        entry: &ArchivedEntry,
    ) -> Result<ArtifactEdit, TrackError> {
        self.artifact.edit(track_id, |raw| {
            let mut registry = Registry::parse(raw);
            let removed = registry.remove_active(track_id);
            let appended = registry.append_archived(track_id, entry);
            if removed == 0 && !appended {
                return None;
            }
            Some(registry.render())
        })
    }

    /// `None` when the registry does not exist.
    pub fn inspect(&self, track_id: &str) -> Result<Option<RegistryView>, TrackError> {
        Ok(self.artifact.read(track_id)?.map(|raw| {
            let registry = Registry::parse(&raw);
            RegistryView {
                active: registry.is_active(track_id),
                archived: registry.is_archived(track_id),
            }
        }))
    }
}
