//! Git-driven diff updates.
//!
//! Parses unified diff output into a [`DiffResult`] and maps file-level
//! change types onto index operations: added/modified files re-ingest,
//! deleted files cascade out of the graph, renames are delete-then-add
//! keyed on the new path. Diff acquisition shells out to the `git`
//! binary; parsing is self-contained and testable without a repository.

use anyhow::{bail, Result};
use serde::Serialize;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use crate::app::AppContext;
use crate::indexer::{self, DirectoryIndexReport};
use crate::CancelFlag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    Added,
    Removed,
    Context,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffLine {
    #[serde(rename = "type")]
    pub line_type: LineType,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffHunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    pub lines: Vec<DiffLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileDiff {
    /// Path after the change (new path for renames).
    pub path: String,
    /// Original path, set for renames.
    pub old_path: Option<String>,
    pub change_type: ChangeType,
    pub hunks: Vec<DiffHunk>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffResult {
    pub files: Vec<FileDiff>,
}

/// Which diff to take.
#[derive(Debug, Clone)]
pub enum DiffSource {
    Unstaged,
    Staged,
    Commit(String),
    Range(String, String),
}

/// Run `git diff` for the requested source and return the raw output.
pub fn run_git_diff(repo_root: &Path, source: &DiffSource) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(repo_root).arg("diff");
    match source {
        DiffSource::Unstaged => {}
        DiffSource::Staged => {
            cmd.arg("--cached");
        }
        DiffSource::Commit(rev) => {
            cmd.arg(format!("{}^!", rev));
        }
        DiffSource::Range(from, to) => {
            cmd.arg(format!("{}..{}", from, to));
        }
    }

    let output = cmd.output()?;
    if !output.status.success() {
        bail!(
            "git diff failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Parse unified diff text.
pub fn parse_diff(text: &str) -> DiffResult {
    let mut result = DiffResult::default();
    let mut current: Option<FileDiff> = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(file) = current.take() {
                result.files.push(file);
            }
            // `a/old b/new`; quote-stripped best effort.
            let parts: Vec<&str> = rest.split_whitespace().collect();
            let new_path = parts
                .get(1)
                .map(|p| p.trim_start_matches("b/").to_string())
                .unwrap_or_default();
            current = Some(FileDiff {
                path: new_path,
                old_path: None,
                change_type: ChangeType::Modified,
                hunks: Vec::new(),
            });
        } else if let Some(file) = current.as_mut() {
            if line.starts_with("new file mode") {
                file.change_type = ChangeType::Added;
            } else if line.starts_with("deleted file mode") {
                file.change_type = ChangeType::Deleted;
            } else if let Some(old) = line.strip_prefix("rename from ") {
                file.change_type = ChangeType::Renamed;
                file.old_path = Some(old.trim().to_string());
            } else if let Some(new) = line.strip_prefix("rename to ") {
                file.change_type = ChangeType::Renamed;
                file.path = new.trim().to_string();
            } else if line.starts_with("@@") {
                if let Some(hunk) = parse_hunk_header(line) {
                    file.hunks.push(hunk);
                }
            } else if let Some(hunk) = file.hunks.last_mut() {
                let (line_type, content) = match line.chars().next() {
                    Some('+') => (LineType::Added, &line[1..]),
                    Some('-') => (LineType::Removed, &line[1..]),
                    Some(' ') => (LineType::Context, &line[1..]),
                    _ => continue,
                };
                hunk.lines.push(DiffLine {
                    line_type,
                    content: content.to_string(),
                });
            }
        }
    }
    if let Some(file) = current.take() {
        result.files.push(file);
    }
    result
}

/// Parse `@@ -a,b +c,d @@`.
fn parse_hunk_header(line: &str) -> Option<DiffHunk> {
    let inner = line.strip_prefix("@@ ")?;
    let end = inner.find(" @@")?;
    let spans = &inner[..end];
    let mut parts = spans.split_whitespace();
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;

    let parse_span = |s: &str| -> (u32, u32) {
        match s.split_once(',') {
            Some((start, count)) => (
                start.parse().unwrap_or(0),
                count.parse().unwrap_or(1),
            ),
            None => (s.parse().unwrap_or(0), 1),
        }
    };
    let (old_start, old_lines) = parse_span(old);
    let (new_start, new_lines) = parse_span(new);

    Some(DiffHunk {
        old_start,
        old_lines,
        new_start,
        new_lines,
        lines: Vec::new(),
    })
}

/// Apply a parsed diff to the index. Added/modified files are re-ingested
/// from the working tree; deleted files cascade; renames delete the old
/// path and ingest the new one.
pub async fn apply_diff_update(
    app: &Arc<AppContext>,
    repo_root: &Path,
    diff: &DiffResult,
    cancel: &CancelFlag,
) -> Result<DirectoryIndexReport> {
    let mut report = DirectoryIndexReport::default();

    for file in &diff.files {
        match file.change_type {
            ChangeType::Added | ChangeType::Modified => {
                index_one(app, repo_root, &file.path, cancel, &mut report).await;
            }
            ChangeType::Deleted => {
                if let Err(e) = indexer::remove_file(app, &file.path).await {
                    report.errors.push(format!("{}: {}", file.path, e));
                }
            }
            ChangeType::Renamed => {
                if let Some(old_path) = &file.old_path {
                    if let Err(e) = indexer::remove_file(app, old_path).await {
                        report.errors.push(format!("{}: {}", old_path, e));
                    }
                }
                index_one(app, repo_root, &file.path, cancel, &mut report).await;
            }
        }
    }

    Ok(report)
}

async fn index_one(
    app: &Arc<AppContext>,
    repo_root: &Path,
    rel_path: &str,
    cancel: &CancelFlag,
    report: &mut DirectoryIndexReport,
) {
    let abs = repo_root.join(rel_path);
    if !abs.exists() {
        report
            .errors
            .push(format!("{}: file listed in diff but missing on disk", rel_path));
        return;
    }
    match indexer::index_file(app, &abs, rel_path, cancel).await {
        Ok(file_report) => {
            if file_report.skipped {
                report.files_skipped += 1;
            } else {
                report.files_processed += 1;
            }
            report.entities_created += file_report.entities_created;
            report.relationships_created += file_report.relationships_created;
            report.cross_doc_links += file_report.cross_doc_links;
            report.embeddings_generated += file_report.embeddings_generated;
            report.errors.extend(file_report.errors);
        }
        Err(e) => report.errors.push(format!("{}: {}", rel_path, e)),
    }
}
