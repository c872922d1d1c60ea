//! The query tool surface.
//!
//! Structured operations consumed by the CLI (and any embedding host):
//! indexing, search, context assembly, requirement queries, document
//! lookup, and feedback recording. Result objects carry the fixed field
//! names (`entitiesCreated`, `filesProcessed`, `errors`, ...) shared
//! across the surface.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::app::AppContext;
use crate::context::{self, AssembledContext, ContextOptions};
use crate::hyde::HydeExpansion;
use crate::indexer::{self, DirectoryIndexReport, FileIndexReport};
use crate::models::EntityType;
use crate::query::{self, ParsedQuery};
use crate::query_log::{self, QueryLogInput};
use crate::retrieval::{self, FusedResult, SearchOptions};
use crate::store::EntityFilter;
use crate::CancelFlag;

/// One search hit as returned by the tool surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub entity_id: String,
    pub name: String,
    pub qualified_name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub file_path: Option<String>,
    pub start_line: Option<i64>,
    pub summary: Option<String>,
    pub score: f64,
    /// Strategies that surfaced the hit.
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    pub results: Vec<SearchHit>,
    pub used_hyde: bool,
    pub log_id: Option<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextOutcome {
    #[serde(flatten)]
    pub assembled: AssembledContext,
    pub used_hyde: bool,
    pub log_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementView {
    pub entity_id: String,
    pub description: String,
    pub priority: String,
    pub requirement_type: String,
    pub acceptance_criteria: Vec<String>,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RequirementsFilter {
    pub priority: Option<String>,
    pub requirement_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub entity_id: String,
    pub title: String,
    pub qualified_name: String,
    pub doc_type: Option<String>,
    pub section_count: usize,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub entities_by_type: Vec<(String, i64)>,
    pub relationships_by_kind: Vec<(String, i64)>,
    pub embeddings: i64,
}

/// Index a directory tree.
pub async fn index_directory(
    app: &Arc<AppContext>,
    path: &Path,
    cancel: &CancelFlag,
) -> Result<DirectoryIndexReport> {
    let report = indexer::index_directory(app, path, cancel).await?;
    app.clear_project_cache().await;
    Ok(report)
}

/// Index one file, dispatching on extension.
pub async fn index_file(
    app: &Arc<AppContext>,
    path: &Path,
    cancel: &CancelFlag,
) -> Result<FileIndexReport> {
    let rel = rel_path_of(path);
    let report = indexer::index_file(app, path, &rel, cancel).await?;
    app.clear_project_cache().await;
    Ok(report)
}

/// Index one file through the document pipelines regardless of extension.
pub async fn index_document(
    app: &Arc<AppContext>,
    path: &Path,
    cancel: &CancelFlag,
) -> Result<FileIndexReport> {
    let rel = rel_path_of(path);
    let report = indexer::index_file_as_document(app, path, &rel, cancel).await?;
    app.clear_project_cache().await;
    Ok(report)
}

/// Multi-strategy search over the project graph.
pub async fn search(
    app: &Arc<AppContext>,
    raw_query: &str,
    entity_types: Vec<EntityType>,
    limit: Option<usize>,
) -> Result<SearchOutcome> {
    let parsed = query::parse_query(raw_query);
    if parsed.normalized.is_empty() {
        return Ok(SearchOutcome {
            results: Vec::new(),
            used_hyde: false,
            log_id: None,
            errors: Vec::new(),
        });
    }

    let (expansion, errors) = expand_query(app, &parsed).await;
    let mut options = SearchOptions::from_config(&app.config.retrieval);
    options.entity_types = entity_types;
    if let Some(limit) = limit {
        options.limit = limit;
    }

    let fused = retrieval::search(
        &app.store,
        &app.embeddings,
        &parsed,
        expansion.as_ref().map(|e| e.query_vector.as_slice()),
        &options,
        app.config.retrieval.rrf_k,
        app.config.retrieval.candidate_k as usize,
    )
    .await?;

    let log_id = log_search(app, &parsed, "search", &fused).await.ok();

    Ok(SearchOutcome {
        results: fused.iter().map(to_hit).collect(),
        used_hyde: expansion.as_ref().is_some_and(|e| e.used_hyde),
        log_id,
        errors,
    })
}

/// Retrieve and assemble a token-budgeted context for a query.
pub async fn get_context(
    app: &Arc<AppContext>,
    raw_query: &str,
    context_options: Option<ContextOptions>,
) -> Result<ContextOutcome> {
    let parsed = query::parse_query(raw_query);
    let (expansion, _errors) = expand_query(app, &parsed).await;

    let mut options = SearchOptions::from_config(&app.config.retrieval);
    // Over-fetch so the assembler has candidates to trade off under budget.
    options.limit = options.limit.max(24);

    let fused = retrieval::search(
        &app.store,
        &app.embeddings,
        &parsed,
        expansion.as_ref().map(|e| e.query_vector.as_slice()),
        &options,
        app.config.retrieval.rrf_k,
        app.config.retrieval.candidate_k as usize,
    )
    .await?;

    let ctx_options =
        context_options.unwrap_or_else(|| ContextOptions::from_config(&app.config.context));
    let assembled = context::assemble(&fused, &ctx_options);

    let log_id = query_log::log_query(
        &app.store,
        &app.config.logging,
        &QueryLogInput {
            query: parsed.raw.clone(),
            query_type: "context".into(),
            tokens_retrieved: assembled.token_count,
            relevance_score: fused.first().map(|r| r.score).unwrap_or(0.0),
            item_count: assembled.sources.len(),
            item_types: item_types(&fused),
            retrieval_strategies: strategies_of(&fused),
        },
    )
    .await
    .ok();

    Ok(ContextOutcome {
        assembled,
        used_hyde: expansion.as_ref().is_some_and(|e| e.used_hyde),
        log_id,
    })
}

/// List requirement entities, optionally filtered by priority or type.
pub async fn get_requirements(
    app: &Arc<AppContext>,
    filter: &RequirementsFilter,
) -> Result<Vec<RequirementView>> {
    let entities = app
        .store
        .find(&EntityFilter {
            entity_type: Some(EntityType::Requirement),
            ..Default::default()
        })
        .await?;

    Ok(entities
        .into_iter()
        .map(|e| {
            let priority = e
                .metadata
                .get("priority")
                .and_then(|p| p.as_str())
                .unwrap_or("should")
                .to_string();
            let requirement_type = e
                .metadata
                .get("requirementType")
                .and_then(|t| t.as_str())
                .unwrap_or("requirement")
                .to_string();
            let acceptance_criteria = e
                .metadata
                .get("acceptanceCriteria")
                .and_then(|a| a.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|i| i.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            RequirementView {
                entity_id: e.id,
                description: e.name,
                priority,
                requirement_type,
                acceptance_criteria,
                file_path: e.file_path,
            }
        })
        .filter(|r| {
            filter
                .priority
                .as_deref()
                .map_or(true, |p| r.priority == p)
                && filter
                    .requirement_type
                    .as_deref()
                    .map_or(true, |t| r.requirement_type == t)
        })
        .collect())
}

/// Search restricted to documentation entities.
pub async fn query_documents(
    app: &Arc<AppContext>,
    raw_query: &str,
    limit: Option<usize>,
) -> Result<SearchOutcome> {
    search(
        app,
        raw_query,
        vec![
            EntityType::Document,
            EntityType::Section,
            EntityType::Requirement,
        ],
        limit,
    )
    .await
}

/// Look up a document entity by its indexed path.
pub async fn find_document_by_path(
    app: &Arc<AppContext>,
    path: &str,
) -> Result<Option<DocumentView>> {
    let entity = match app.store.get_by_qualified_name(path).await? {
        Some(e) if e.entity_type == EntityType::Document => Some(e),
        _ => app
            .store
            .find(&EntityFilter {
                entity_type: Some(EntityType::Document),
                file_path: Some(path.to_string()),
                ..Default::default()
            })
            .await?
            .into_iter()
            .next(),
    };

    let Some(entity) = entity else {
        return Ok(None);
    };

    let sections = app
        .store
        .find(&EntityFilter {
            entity_type: Some(EntityType::Section),
            file_path: entity.file_path.clone(),
            ..Default::default()
        })
        .await?;

    Ok(Some(DocumentView {
        entity_id: entity.id,
        title: entity.name,
        qualified_name: entity.qualified_name,
        doc_type: entity
            .metadata
            .get("docType")
            .and_then(|t| t.as_str())
            .map(String::from),
        section_count: sections.len(),
        content: entity.content,
    }))
}

/// Record usefulness feedback on a logged query.
pub async fn record_feedback(app: &Arc<AppContext>, log_id: &str, useful: bool) -> Result<()> {
    query_log::record_feedback(&app.store, log_id, useful).await
}

/// Entity, relationship, and embedding counts for the project.
pub async fn project_stats(app: &Arc<AppContext>) -> Result<ProjectStats> {
    use crate::models::RelationKind;

    let entity_types = [
        EntityType::File,
        EntityType::Module,
        EntityType::Class,
        EntityType::Interface,
        EntityType::Type,
        EntityType::Function,
        EntityType::Method,
        EntityType::Variable,
        EntityType::Document,
        EntityType::Section,
        EntityType::Requirement,
        EntityType::Technology,
        EntityType::Task,
        EntityType::Component,
        EntityType::Decision,
    ];
    let mut entities_by_type = Vec::new();
    for t in entity_types {
        let count = app.store.count_entities(Some(t)).await?;
        if count > 0 {
            entities_by_type.push((t.as_str().to_string(), count));
        }
    }

    let kinds = [
        RelationKind::Contains,
        RelationKind::Imports,
        RelationKind::Defines,
        RelationKind::Calls,
        RelationKind::Mentions,
        RelationKind::Documents,
        RelationKind::RelatesTo,
        RelationKind::DependsOn,
        RelationKind::Configures,
        RelationKind::Implements,
        RelationKind::References,
    ];
    let mut relationships_by_kind = Vec::new();
    for k in kinds {
        let count = app.store.count_relationships(Some(k)).await?;
        if count > 0 {
            relationships_by_kind.push((k.as_str().to_string(), count));
        }
    }

    Ok(ProjectStats {
        entities_by_type,
        relationships_by_kind,
        embeddings: app.store.count_embeddings().await?,
    })
}

/// HyDE-or-literal query expansion. Provider failures degrade to no
/// expansion and are reported, not raised.
async fn expand_query(
    app: &Arc<AppContext>,
    parsed: &ParsedQuery,
) -> (Option<HydeExpansion>, Vec<String>) {
    if !app.embeddings.is_enabled() {
        return (None, Vec::new());
    }
    match app
        .hyde
        .expand(
            app.store.project_id(),
            parsed,
            app.completion.as_ref(),
            &app.embeddings,
        )
        .await
    {
        Ok(expansion) => (Some(expansion), Vec::new()),
        Err(e) => (None, vec![format!("query expansion unavailable: {}", e)]),
    }
}

async fn log_search(
    app: &Arc<AppContext>,
    parsed: &ParsedQuery,
    query_type: &str,
    fused: &[FusedResult],
) -> Result<String> {
    let tokens_retrieved: usize = fused
        .iter()
        .map(|r| {
            context::estimate_tokens(r.entity.content.as_deref().unwrap_or_default())
        })
        .sum();
    query_log::log_query(
        &app.store,
        &app.config.logging,
        &QueryLogInput {
            query: parsed.raw.clone(),
            query_type: query_type.into(),
            tokens_retrieved,
            relevance_score: fused.first().map(|r| r.score).unwrap_or(0.0),
            item_count: fused.len(),
            item_types: item_types(fused),
            retrieval_strategies: strategies_of(fused),
        },
    )
    .await
}

fn to_hit(result: &FusedResult) -> SearchHit {
    SearchHit {
        entity_id: result.entity.id.clone(),
        name: result.entity.name.clone(),
        qualified_name: result.entity.qualified_name.clone(),
        entity_type: result.entity.entity_type.as_str().to_string(),
        file_path: result.entity.file_path.clone(),
        start_line: result.entity.start_line,
        summary: result.entity.summary.clone(),
        score: result.score,
        sources: result.sources.iter().map(|s| s.as_str().to_string()).collect(),
    }
}

fn item_types(fused: &[FusedResult]) -> Vec<String> {
    let mut types: Vec<String> = Vec::new();
    for result in fused {
        let t = result.entity.entity_type.as_str().to_string();
        if !types.contains(&t) {
            types.push(t);
        }
    }
    types
}

fn strategies_of(fused: &[FusedResult]) -> Vec<String> {
    let mut strategies: Vec<String> = Vec::new();
    for result in fused {
        for source in &result.sources {
            let s = source.as_str().to_string();
            if !strategies.contains(&s) {
                strategies.push(s);
            }
        }
    }
    strategies
}

fn rel_path_of(path: &Path) -> String {
    let cwd = std::env::current_dir().unwrap_or_default();
    path.strip_prefix(&cwd)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
