//! Incremental indexer.
//!
//! Every ingested file records an MD5 of its raw bytes in its entity
//! metadata; re-ingests compare that hash and skip unchanged files.
//! Directory indexing walks the tree gitignore-aware, applies the
//! configured excludes and extension allowlist, and fans files out to a
//! bounded worker pool. Per-file failures land in `errors[]` and never
//! abort the batch.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::app::AppContext;
use crate::code;
use crate::document;
use crate::error::CoreError;
use crate::languages::Language;
use crate::models::EntityType;
use crate::store::EntityFilter;
use crate::CancelFlag;

/// Extensions indexed when the config allowlist is empty.
const DEFAULT_EXTENSIONS: &[&str] = &[
    "rs", "py", "ts", "tsx", "js", "jsx", "mjs", "cjs", "md", "markdown", "yaml", "yml",
    "json", "toml", "html", "htm", "csv", "xml", "pdf", "txt",
];

/// Result of indexing one file.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIndexReport {
    pub entities_created: usize,
    pub relationships_created: usize,
    pub cross_doc_links: usize,
    pub embeddings_generated: usize,
    pub skipped: bool,
    pub errors: Vec<String>,
}

/// Aggregate result of a directory index.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryIndexReport {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub entities_created: usize,
    pub relationships_created: usize,
    pub cross_doc_links: usize,
    pub embeddings_generated: usize,
    pub errors: Vec<String>,
}

/// What re-ingesting a file should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDecision {
    Add,
    Skip,
    Modified,
}

/// MD5 over raw bytes; the source of truth for incremental decisions.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Compare the stored hash for a path against the current one.
pub async fn decide(
    app: &AppContext,
    rel_path: &str,
    current_hash: &str,
) -> Result<IndexDecision> {
    match app.store.get_by_qualified_name(rel_path).await? {
        None => Ok(IndexDecision::Add),
        Some(entity) => {
            let stored = entity.metadata.get("hash").and_then(|h| h.as_str());
            if stored == Some(current_hash) {
                Ok(IndexDecision::Skip)
            } else {
                Ok(IndexDecision::Modified)
            }
        }
    }
}

/// Index one file (source or document, selected by extension).
///
/// Unchanged content short-circuits to `skipped = true` with zero counts.
pub async fn index_file(
    app: &AppContext,
    abs_path: &Path,
    rel_path: &str,
    cancel: &CancelFlag,
) -> Result<FileIndexReport> {
    if cancel.load(Ordering::Relaxed) {
        return Err(CoreError::Cancelled.into());
    }

    let bytes = std::fs::read(abs_path)
        .map_err(|e| CoreError::parse_failure(rel_path, e))?;
    let hash = hash_bytes(&bytes);

    if decide(app, rel_path, &hash).await? == IndexDecision::Skip {
        tracing::debug!(path = rel_path, "unchanged, skipping");
        return Ok(FileIndexReport {
            skipped: true,
            ..Default::default()
        });
    }

    let report = ingest_content(app, rel_path, &bytes, &hash, cancel).await?;
    tracing::info!(
        path = rel_path,
        entities = report.entities_created,
        relationships = report.relationships_created,
        "indexed"
    );
    Ok(report)
}

/// Index a file through the document pipelines regardless of extension.
/// Used by the `index_document` tool operation for code-adjacent files
/// that should be treated as prose.
pub async fn index_file_as_document(
    app: &AppContext,
    abs_path: &Path,
    rel_path: &str,
    cancel: &CancelFlag,
) -> Result<FileIndexReport> {
    if cancel.load(Ordering::Relaxed) {
        return Err(CoreError::Cancelled.into());
    }

    let bytes = std::fs::read(abs_path)
        .map_err(|e| CoreError::parse_failure(rel_path, e))?;
    let hash = hash_bytes(&bytes);
    if decide(app, rel_path, &hash).await? == IndexDecision::Skip {
        return Ok(FileIndexReport {
            skipped: true,
            ..Default::default()
        });
    }

    let policy = crate::document::chunker::ChunkPolicy::from(&app.config.chunking);
    let result = document::ingest_document(
        &app.store,
        &policy,
        rel_path,
        &bytes,
        serde_json::json!({ "hash": hash }),
    )
    .await?;

    let mut report = FileIndexReport {
        entities_created: result.entities_created,
        relationships_created: result.relationships_created,
        cross_doc_links: result.cross_doc_links,
        ..Default::default()
    };
    if app.embeddings.is_enabled() && !result.embeddable.is_empty() {
        let (generated, errors) = app
            .embeddings
            .embed_batch(&app.store, &result.embeddable, cancel)
            .await;
        report.embeddings_generated = generated;
        report.errors.extend(errors);
    }
    Ok(report)
}

/// Ingest file content that is known to be new or modified.
async fn ingest_content(
    app: &AppContext,
    rel_path: &str,
    bytes: &[u8],
    hash: &str,
    cancel: &CancelFlag,
) -> Result<FileIndexReport> {
    let base_metadata = serde_json::json!({ "hash": hash });
    let mut report = FileIndexReport::default();

    let embeddable = if let Some(language) = Language::from_path(rel_path) {
        let source = String::from_utf8_lossy(bytes);
        let result =
            code::ingest_source_file(&app.store, language, rel_path, &source, base_metadata)
                .await?;
        report.entities_created = result.entities_created;
        report.relationships_created = result.relationships_created;
        result.embeddable
    } else {
        let policy = crate::document::chunker::ChunkPolicy::from(&app.config.chunking);
        let result =
            document::ingest_document(&app.store, &policy, rel_path, bytes, base_metadata)
                .await?;
        report.entities_created = result.entities_created;
        report.relationships_created = result.relationships_created;
        report.cross_doc_links = result.cross_doc_links;
        for unresolved in &result.unresolved_refs {
            tracing::debug!(path = rel_path, token = unresolved.as_str(), "unresolved reference");
        }
        result.embeddable
    };

    if app.embeddings.is_enabled() && !embeddable.is_empty() {
        let (generated, errors) = app.embeddings.embed_batch(&app.store, &embeddable, cancel).await;
        report.embeddings_generated = generated;
        report.errors.extend(errors);
    }

    Ok(report)
}

/// Index a directory tree with the configured concurrency.
///
/// The walk honors `.gitignore`, the configured exclude globs, and the
/// supported-extension allowlist. Individual file failures are collected;
/// cancellation stops scheduling new files and keeps partial results.
pub async fn index_directory(
    app: &Arc<AppContext>,
    root: &Path,
    cancel: &CancelFlag,
) -> Result<DirectoryIndexReport> {
    if !root.exists() {
        return Err(CoreError::NotFound(format!("directory {}", root.display())).into());
    }

    let exclude_set = build_globset(&app.config.indexing.exclude_globs)?;
    let allowlist: Vec<String> = if app.config.indexing.extensions.is_empty() {
        DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
    } else {
        app.config.indexing.extensions.clone()
    };

    let mut files: Vec<(std::path::PathBuf, String)> = Vec::new();
    let walker = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .build();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "walk error");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path().to_path_buf();
        let rel = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        if exclude_set.is_match(&rel) {
            continue;
        }
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !allowlist.iter().any(|a| a == &ext) {
            continue;
        }
        files.push((path, rel));
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));

    // Two waves: source files first so the document linker can resolve
    // code references, then documents.
    let (code_files, doc_files): (Vec<_>, Vec<_>) = files
        .into_iter()
        .partition(|(_, rel)| Language::from_path(rel).is_some());

    let mut report = DirectoryIndexReport::default();
    run_pool(app, code_files, cancel, &mut report).await?;
    run_pool(app, doc_files, cancel, &mut report).await?;
    Ok(report)
}

/// Fan a batch of files out to the bounded worker pool, folding every
/// per-file outcome into the aggregate report.
async fn run_pool(
    app: &Arc<AppContext>,
    files: Vec<(std::path::PathBuf, String)>,
    cancel: &CancelFlag,
    report: &mut DirectoryIndexReport,
) -> Result<()> {
    let semaphore = Arc::new(Semaphore::new(app.config.indexing.concurrency.max(1)));
    let mut join_set: JoinSet<(String, Result<FileIndexReport>)> = JoinSet::new();

    for (abs_path, rel_path) in files {
        if cancel.load(Ordering::Relaxed) {
            report.errors.push(CoreError::Cancelled.to_string());
            break;
        }
        let permit = semaphore.clone().acquire_owned().await?;
        let app = Arc::clone(app);
        let cancel = Arc::clone(cancel);
        join_set.spawn(async move {
            let _permit = permit;
            let result = index_file(&app, &abs_path, &rel_path, &cancel).await;
            (rel_path, result)
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((_, Ok(file_report))) => {
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
            Ok((rel_path, Err(e))) => {
                report.errors.push(format!("{}: {}", rel_path, e));
            }
            Err(e) => {
                report.errors.push(format!("worker panic: {}", e));
            }
        }
    }
    Ok(())
}

/// Remove every entity originating from a file (used for deletes and
/// renames).
pub async fn remove_file(app: &AppContext, rel_path: &str) -> Result<u64> {
    let deleted = app.store.delete_by_file(rel_path).await?;
    if deleted > 0 {
        tracing::info!(path = rel_path, entities = deleted, "removed from index");
    }
    Ok(deleted)
}

/// Prune child entities left behind by a shrinking file: children on the
/// path whose qualified name no longer corresponds to a stored hash
/// generation. Correctness of search does not depend on this sweep.
pub async fn sweep_stale_children(app: &AppContext, rel_path: &str) -> Result<u64> {
    let current = app
        .store
        .find(&EntityFilter {
            file_path: Some(rel_path.to_string()),
            ..Default::default()
        })
        .await?;
    let mut removed = 0u64;
    for entity in current {
        if entity.entity_type == EntityType::Document || entity.entity_type == EntityType::File {
            continue;
        }
        // Orphaned children have no remaining CONTAINS edge pointing at them.
        let incoming = app
            .store
            .relationships_for(&entity.id, crate::models::Direction::In)
            .await?;
        if incoming.is_empty() && app.store.delete_entity(&entity.id).await? {
            removed += 1;
        }
    }
    Ok(removed)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::Store;


    async fn test_app() -> Arc<AppContext> {
        let config: Config = toml::from_str("[db]\npath = \"unused.db\"").unwrap();
        let pool = crate::db::connect_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let store = Store::from_pool(pool, "test");
        AppContext::with_store(config, store).unwrap()
    }

    #[test]
    fn test_hash_is_md5_hex() {
        let hash = hash_bytes(b"hello");
        assert_eq!(hash, "5d41402abc4b2a76b9719d911017c592");
    }

    #[tokio::test]
    async fn test_incremental_skip() {
        let app = test_app().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "# Title\n\nbody text here\n").unwrap();

        let first = index_file(&app, &path, "a.md", &crate::no_cancel())
            .await
            .unwrap();
        assert!(!first.skipped);
        assert!(first.entities_created > 0);

        let second = index_file(&app, &path, "a.md", &crate::no_cancel())
            .await
            .unwrap();
        assert!(second.skipped);
        assert_eq!(second.entities_created, 0);
    }

    #[tokio::test]
    async fn test_modified_file_reingests() {
        let app = test_app().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "# One\n\nfirst version\n").unwrap();
        index_file(&app, &path, "a.md", &crate::no_cancel()).await.unwrap();

        std::fs::write(&path, "# One\n\nsecond version with more\n").unwrap();
        let report = index_file(&app, &path, "a.md", &crate::no_cancel())
            .await
            .unwrap();
        assert!(!report.skipped);

        let doc = app.store.get_by_qualified_name("a.md").await.unwrap().unwrap();
        assert!(doc.content.unwrap().contains("second version"));
    }

    #[tokio::test]
    async fn test_directory_index_collects_per_file_errors() {
        let app = test_app().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.md"), "# Good\n\ntext\n").unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ definitely not json").unwrap();

        let report = index_directory(&app, dir.path(), &crate::no_cancel())
            .await
            .unwrap();
        assert_eq!(report.files_processed, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("bad.json"));
    }

    #[tokio::test]
    async fn test_directory_index_honors_excludes() {
        let app = test_app().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "var x = 1;").unwrap();
        std::fs::write(dir.path().join("keep.md"), "# Keep\n\ntext\n").unwrap();

        let report = index_directory(&app, dir.path(), &crate::no_cancel())
            .await
            .unwrap();
        assert_eq!(report.files_processed, 1);
        assert!(app
            .store
            .get_by_qualified_name("keep.md")
            .await
            .unwrap()
            .is_some());
        assert!(app
            .store
            .get_by_qualified_name("node_modules/pkg/index.js")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cancellation_returns_partial() {
        let app = test_app().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A\n").unwrap();

        let cancel = crate::no_cancel();
        cancel.store(true, Ordering::Relaxed);
        let report = index_directory(&app, dir.path(), &cancel).await.unwrap();
        assert_eq!(report.files_processed, 0);
        assert!(!report.errors.is_empty());
    }
}
