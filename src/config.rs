//! Configuration parsing and validation.
//!
//! Codelore is configured via a TOML file (default: `config/lore.toml`).
//! The config defines the project scope, database path, indexing and
//! chunking parameters, embedding provider settings, retrieval tuning,
//! and the knobs for HyDE expansion, context assembly, draft critique,
//! and conversation memory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub hyde: HydeConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub critique: CritiqueConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProjectConfig {
    /// Scoping key: every entity, embedding, and log row is tagged with it.
    #[serde(default = "default_project_id")]
    pub id: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            id: default_project_id(),
        }
    }
}

fn default_project_id() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Bounded worker pool size for directory indexing.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Gitignore-style exclude patterns applied on top of `.gitignore`.
    #[serde(default = "default_excludes")]
    pub exclude_globs: Vec<String>,
    /// Extension allowlist; empty means "all supported formats".
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            exclude_globs: default_excludes(),
            extensions: Vec::new(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_excludes() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/dist/**".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_size")]
    pub target_size: usize,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_size: default_target_size(),
            max_size: default_max_size(),
            min_size: default_min_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_target_size() -> usize {
    1500
}
fn default_max_size() -> usize {
    3000
}
fn default_min_size() -> usize {
    200
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `mock`, `local`, `api`, or `disabled`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "mock".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    /// `mock`, `api`, or `disabled`.
    #[serde(default = "default_completion_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            model: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_completion_timeout(),
        }
    }
}

fn default_completion_provider() -> String {
    "mock".to_string()
}
fn default_completion_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Reciprocal Rank Fusion constant.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_graph_weight")]
    pub graph_weight: f64,
    /// BFS expansion bound for the graph strategy.
    #[serde(default = "default_graph_depth")]
    pub graph_depth: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(default)]
    pub min_score: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            keyword_weight: default_keyword_weight(),
            semantic_weight: default_semantic_weight(),
            graph_weight: default_graph_weight(),
            graph_depth: default_graph_depth(),
            candidate_k: default_candidate_k(),
            final_limit: default_final_limit(),
            min_score: 0.0,
        }
    }
}

fn default_rrf_k() -> f64 {
    60.0
}
fn default_keyword_weight() -> f64 {
    1.0
}
fn default_semantic_weight() -> f64 {
    1.0
}
fn default_graph_weight() -> f64 {
    0.5
}
fn default_graph_depth() -> usize {
    2
}
fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> usize {
    12
}

#[derive(Debug, Deserialize, Clone)]
pub struct HydeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Queries shorter than this are embedded directly.
    #[serde(default = "default_min_query_length")]
    pub min_query_length: usize,
    /// Intents eligible for hypothetical-answer expansion.
    #[serde(default = "default_hyde_intents")]
    pub intents: Vec<String>,
    #[serde(default = "default_true")]
    pub fallback_to_direct_embed: bool,
}

impl Default for HydeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_query_length: default_min_query_length(),
            intents: default_hyde_intents(),
            fallback_to_direct_embed: true,
        }
    }
}

fn default_min_query_length() -> usize {
    10
}

fn default_hyde_intents() -> Vec<String> {
    vec!["how".to_string(), "why".to_string(), "explain".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// `markdown`, `xml`, or `plain`.
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_true")]
    pub include_sources: bool,
    #[serde(default = "default_true")]
    pub include_code_content: bool,
    #[serde(default = "default_true")]
    pub group_by_type: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            format: default_format(),
            include_sources: true,
            include_code_content: true,
            group_by_type: true,
        }
    }
}

fn default_max_tokens() -> usize {
    4000
}
fn default_format() -> String {
    "markdown".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CritiqueConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// `low`, `medium`, or `high`: lowest severity that fails the run.
    #[serde(default = "default_fail_severity")]
    pub fail_severity: String,
    #[serde(default)]
    pub use_model_critique: bool,
    #[serde(default)]
    pub track_claims: bool,
    #[serde(default = "default_true")]
    pub suggest_queries: bool,
}

impl Default for CritiqueConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            fail_severity: default_fail_severity(),
            use_model_critique: false,
            track_claims: false,
            suggest_queries: true,
        }
    }
}

fn default_max_iterations() -> usize {
    2
}
fn default_fail_severity() -> String {
    "medium".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_max_active_messages")]
    pub max_active_messages: i64,
    #[serde(default = "default_max_transcript_length")]
    pub max_transcript_length: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_active_messages: default_max_active_messages(),
            max_transcript_length: default_max_transcript_length(),
        }
    }
}

fn default_max_active_messages() -> i64 {
    100
}
fn default_max_transcript_length() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// When false, query text is omitted from query-log rows.
    #[serde(default = "default_true")]
    pub log_queries: bool,
    /// Dollars per thousand tokens, for cost accounting.
    #[serde(default = "default_price_per_1k")]
    pub price_per_1k_tokens: f64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_queries: true,
            price_per_1k_tokens: default_price_per_1k(),
        }
    }
}

fn default_price_per_1k() -> f64 {
    0.03
}

fn default_true() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_size == 0 || config.chunking.target_size == 0 {
        anyhow::bail!("chunking.target_size and chunking.max_size must be > 0");
    }
    if config.chunking.min_size > config.chunking.max_size {
        anyhow::bail!("chunking.min_size must not exceed chunking.max_size");
    }
    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    for (name, w) in [
        ("keyword_weight", config.retrieval.keyword_weight),
        ("semantic_weight", config.retrieval.semantic_weight),
        ("graph_weight", config.retrieval.graph_weight),
    ] {
        if w < 0.0 {
            anyhow::bail!("retrieval.{} must be >= 0", name);
        }
    }
    if config.indexing.concurrency == 0 {
        anyhow::bail!("indexing.concurrency must be >= 1");
    }
    match config.embedding.provider.as_str() {
        "mock" | "local" | "api" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be mock, local, api, or disabled.",
            other
        ),
    }
    match config.completion.provider.as_str() {
        "mock" | "api" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be mock, api, or disabled.",
            other
        ),
    }
    if config.embedding.provider == "api" && config.embedding.model.is_none() {
        anyhow::bail!("embedding.model must be specified when provider is 'api'");
    }
    match config.context.format.as_str() {
        "markdown" | "xml" | "plain" => {}
        other => anyhow::bail!(
            "Unknown context format: '{}'. Must be markdown, xml, or plain.",
            other
        ),
    }
    match config.critique.fail_severity.as_str() {
        "low" | "medium" | "high" => {}
        other => anyhow::bail!(
            "Unknown critique.fail_severity: '{}'. Must be low, medium, or high.",
            other
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        toml::from_str(
            r#"
            [db]
            path = "data/lore.db"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = minimal();
        assert_eq!(cfg.project.id, "default");
        assert_eq!(cfg.indexing.concurrency, 4);
        assert_eq!(cfg.chunking.target_size, 1500);
        assert_eq!(cfg.chunking.max_size, 3000);
        assert_eq!(cfg.chunking.min_size, 200);
        assert_eq!(cfg.chunking.overlap, 200);
        assert_eq!(cfg.retrieval.rrf_k, 60.0);
        assert_eq!(cfg.retrieval.graph_weight, 0.5);
        assert_eq!(cfg.retrieval.graph_depth, 2);
        assert_eq!(cfg.hyde.min_query_length, 10);
        assert_eq!(cfg.critique.max_iterations, 2);
        assert_eq!(cfg.memory.max_active_messages, 100);
        assert!((cfg.logging.price_per_1k_tokens - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_bad_provider() {
        let mut cfg = minimal();
        cfg.embedding.provider = "quantum".to_string();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_format() {
        let mut cfg = minimal();
        cfg.context.format = "yaml".to_string();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_chunk_sizes() {
        let mut cfg = minimal();
        cfg.chunking.min_size = 5000;
        assert!(validate(&cfg).is_err());
    }
}
