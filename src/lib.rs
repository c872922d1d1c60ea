//! # Codelore
//!
//! **A local, project-scoped code and document knowledge engine for AI tools.**
//!
//! Codelore ingests a repository's source files and surrounding
//! documentation into a unified entity-and-relationship graph, embeds
//! entities for semantic search, and answers natural-language queries by
//! fusing keyword, semantic, and graph retrieval into a token-budgeted
//! context. A critique layer validates generated drafts against the
//! retrieved evidence.
//!
//! ## Data Flow
//!
//! ```text
//! File → Parser → Entity + Relationship upsert → Embedding → Index
//! ```
//!
//! ## Query Flow
//!
//! ```text
//! Query → Parse → (HyDE) → {Keyword, Semantic, Graph} → RRF
//!       → Context assembly → Draft → Critique → (revise)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Entity/relationship data model with closed-set enums |
//! | [`store`] | SQLite-backed graph store with upsert and cascade semantics |
//! | [`code`] | Tree-sitter symbol and relationship extraction |
//! | [`document`] | Format-dispatched document pipelines and the code linker |
//! | [`indexer`] | Hash-driven incremental indexing with a bounded worker pool |
//! | [`git_diff`] | Unified-diff parsing for diff-driven updates |
//! | [`embedding`] | Provider adapters, vector utilities, embedding manager |
//! | [`query`] | Natural-language query parsing |
//! | [`hyde`] | Hypothetical-document query expansion |
//! | [`retrieval`] | Multi-strategy search with Reciprocal Rank Fusion |
//! | [`graph`] | Bounded BFS, neighbors, shortest path |
//! | [`context`] | Token-budgeted context assembly and formatting |
//! | [`critique`] | Draft critique loop with pattern and model checks |
//! | [`memory`] | Conversation sessions, messages, decisions, summaries |
//! | [`patterns`] | The shared regex asset module |
//! | [`tools`] | The query tool surface with structured results |
//! | [`query_log`] | Query logging and token/cost accounting |

pub mod app;
pub mod code;
pub mod config;
pub mod context;
pub mod critique;
pub mod db;
pub mod document;
pub mod embedding;
pub mod error;
pub mod git_diff;
pub mod graph;
pub mod hyde;
pub mod indexer;
pub mod languages;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod patterns;
pub mod provider;
pub mod query;
pub mod query_log;
pub mod retrieval;
pub mod store;
pub mod tools;

/// Cancellation signal shared with long-running operations. Operations
/// observe it between units of work, let in-flight tasks finish, and
/// return partial results with `errors[]` populated.
pub type CancelFlag = std::sync::Arc<std::sync::atomic::AtomicBool>;

/// A cancel flag that never fires.
pub fn no_cancel() -> CancelFlag {
    std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false))
}
