//! # Codelore CLI
//!
//! `lore` — a local, project-scoped code and document knowledge engine.
//!
//! ```bash
//! lore init                          # create the database
//! lore index .                       # ingest a directory
//! lore search "who parses markdown"  # fused keyword/semantic/graph search
//! lore context "how does chunking work"
//! lore requirements --priority must
//! lore diff-index --staged           # re-index from a git diff
//! lore stats
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use codelore::app::AppContext;
use codelore::config;
use codelore::git_diff::{self, DiffSource};
use codelore::memory::ConversationMemory;
use codelore::models::EntityType;
use codelore::tools;

#[derive(Parser)]
#[command(
    name = "lore",
    about = "Codelore — a local, project-scoped code and document knowledge engine",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/lore.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init,

    /// Index a directory or single file
    Index {
        /// Path to index
        path: PathBuf,

        /// Force the document pipelines regardless of extension
        #[arg(long)]
        as_document: bool,
    },

    /// Search indexed entities
    Search {
        /// Search query
        query: String,

        /// Restrict to an entity type (file, function, document, ...)
        #[arg(long)]
        entity_type: Option<String>,

        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Assemble a token-budgeted context for a query
    Context {
        /// Query text
        query: String,

        /// Token budget override
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Output format: markdown, xml, or plain
        #[arg(long)]
        format: Option<String>,
    },

    /// List extracted requirements
    Requirements {
        /// Filter by MoSCoW priority (must, should, could, wont)
        #[arg(long)]
        priority: Option<String>,

        /// Filter by type (requirement, feature, user-story, constraint)
        #[arg(long)]
        requirement_type: Option<String>,
    },

    /// Search documentation entities only
    Docs {
        /// Query text
        query: String,

        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show an indexed document by path
    Document {
        /// Indexed path (e.g. docs/guide.md)
        path: String,
    },

    /// Re-index from a git diff
    DiffIndex {
        /// Repository root
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Use the staged diff instead of the working tree
        #[arg(long)]
        staged: bool,

        /// Diff a single commit
        #[arg(long)]
        commit: Option<String>,
    },

    /// Record feedback on a logged query
    Feedback {
        /// Query log id
        log_id: String,

        /// Was the result useful?
        useful: bool,
    },

    /// Entity, relationship, and embedding counts
    Stats,

    /// Conversation sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List sessions
    List,

    /// Show a session's messages
    Show {
        /// Session id
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let app = AppContext::init(cfg).await?;
            drop(app);
            println!("Database initialized successfully.");
        }
        Commands::Index { path, as_document } => {
            let app = AppContext::init(cfg).await?;
            let cancel = codelore::no_cancel();
            if path.is_dir() {
                let report = tools::index_directory(&app, &path, &cancel).await?;
                println!("index {}", path.display());
                println!("  files processed: {}", report.files_processed);
                println!("  files skipped: {}", report.files_skipped);
                println!("  entities: {}", report.entities_created);
                println!("  relationships: {}", report.relationships_created);
                println!("  cross-doc links: {}", report.cross_doc_links);
                println!("  embeddings: {}", report.embeddings_generated);
                for error in &report.errors {
                    eprintln!("  error: {}", error);
                }
            } else {
                let report = if as_document {
                    tools::index_document(&app, &path, &cancel).await?
                } else {
                    tools::index_file(&app, &path, &cancel).await?
                };
                if report.skipped {
                    println!("unchanged, skipped");
                } else {
                    println!(
                        "indexed: {} entities, {} relationships, {} embeddings",
                        report.entities_created,
                        report.relationships_created,
                        report.embeddings_generated
                    );
                }
                for error in &report.errors {
                    eprintln!("  error: {}", error);
                }
            }
        }
        Commands::Search {
            query,
            entity_type,
            limit,
        } => {
            let app = AppContext::init(cfg).await?;
            let types = entity_type
                .as_deref()
                .and_then(EntityType::parse)
                .map(|t| vec![t])
                .unwrap_or_default();
            let outcome = tools::search(&app, &query, types, limit).await?;

            if outcome.results.is_empty() {
                println!("No results.");
            }
            for (i, hit) in outcome.results.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {} ({})",
                    i + 1,
                    hit.score,
                    hit.name,
                    hit.entity_type
                );
                println!("    {}", hit.qualified_name);
                if let Some(file) = &hit.file_path {
                    match hit.start_line {
                        Some(line) => println!("    {}:{}", file, line),
                        None => println!("    {}", file),
                    }
                }
                println!("    via: {}", hit.sources.join(", "));
            }
            if outcome.used_hyde {
                println!("(query expanded via HyDE)");
            }
            if let Some(log_id) = &outcome.log_id {
                println!("log: {}", log_id);
            }
        }
        Commands::Context {
            query,
            max_tokens,
            format,
        } => {
            let app = AppContext::init(cfg).await?;
            let mut options =
                codelore::context::ContextOptions::from_config(&app.config.context);
            if let Some(max) = max_tokens {
                options.max_tokens = max;
            }
            if let Some(fmt) = format.as_deref() {
                options.format = codelore::context::ContextFormat::parse(fmt)
                    .ok_or_else(|| anyhow::anyhow!("unknown format: {}", fmt))?;
            }
            let outcome = tools::get_context(&app, &query, Some(options)).await?;
            println!("{}", outcome.assembled.context);
            eprintln!(
                "-- {} tokens{}, {} sources",
                outcome.assembled.token_count,
                if outcome.assembled.truncated {
                    " (truncated)"
                } else {
                    ""
                },
                outcome.assembled.sources.len()
            );
            if let Some(log_id) = &outcome.log_id {
                eprintln!("-- log: {}", log_id);
            }
        }
        Commands::Requirements {
            priority,
            requirement_type,
        } => {
            let app = AppContext::init(cfg).await?;
            let requirements = tools::get_requirements(
                &app,
                &tools::RequirementsFilter {
                    priority,
                    requirement_type,
                },
            )
            .await?;
            if requirements.is_empty() {
                println!("No requirements indexed.");
            }
            for req in &requirements {
                println!("[{}] ({}) {}", req.priority, req.requirement_type, req.description);
                for criterion in &req.acceptance_criteria {
                    println!("    - {}", criterion);
                }
            }
        }
        Commands::Docs { query, limit } => {
            let app = AppContext::init(cfg).await?;
            let outcome = tools::query_documents(&app, &query, limit).await?;
            if outcome.results.is_empty() {
                println!("No results.");
            }
            for (i, hit) in outcome.results.iter().enumerate() {
                println!("{}. [{:.4}] {} — {}", i + 1, hit.score, hit.name, hit.qualified_name);
            }
        }
        Commands::Document { path } => {
            let app = AppContext::init(cfg).await?;
            match tools::find_document_by_path(&app, &path).await? {
                None => println!("Document not found: {}", path),
                Some(doc) => {
                    println!("--- Document ---");
                    println!("id:        {}", doc.entity_id);
                    println!("title:     {}", doc.title);
                    println!("path:      {}", doc.qualified_name);
                    if let Some(doc_type) = &doc.doc_type {
                        println!("type:      {}", doc_type);
                    }
                    println!("sections:  {}", doc.section_count);
                    if let Some(content) = &doc.content {
                        println!();
                        println!("{}", content);
                    }
                }
            }
        }
        Commands::DiffIndex {
            repo,
            staged,
            commit,
        } => {
            let app = AppContext::init(cfg).await?;
            let source = if let Some(rev) = commit {
                DiffSource::Commit(rev)
            } else if staged {
                DiffSource::Staged
            } else {
                DiffSource::Unstaged
            };
            let raw = git_diff::run_git_diff(&repo, &source)?;
            let diff = git_diff::parse_diff(&raw);
            let report =
                git_diff::apply_diff_update(&app, &repo, &diff, &codelore::no_cancel()).await?;
            println!("diff index: {} files changed", diff.files.len());
            println!("  processed: {}", report.files_processed);
            println!("  skipped: {}", report.files_skipped);
            println!("  entities: {}", report.entities_created);
            for error in &report.errors {
                eprintln!("  error: {}", error);
            }
        }
        Commands::Feedback { log_id, useful } => {
            let app = AppContext::init(cfg).await?;
            tools::record_feedback(&app, &log_id, useful).await?;
            println!("Feedback recorded.");
        }
        Commands::Stats => {
            let app = AppContext::init(cfg).await?;
            let stats = tools::project_stats(&app).await?;
            println!("--- Entities ---");
            for (entity_type, count) in &stats.entities_by_type {
                println!("{:>8}  {}", count, entity_type);
            }
            println!("--- Relationships ---");
            for (kind, count) in &stats.relationships_by_kind {
                println!("{:>8}  {}", count, kind);
            }
            println!("--- Embeddings ---");
            println!("{:>8}  vectors", stats.embeddings);
        }
        Commands::Session { action } => {
            let app = AppContext::init(cfg).await?;
            let memory = ConversationMemory::new(&app.store, &app.config.memory);
            match action {
                SessionAction::List => {
                    let sessions = memory.list_sessions().await?;
                    if sessions.is_empty() {
                        println!("No sessions.");
                    }
                    for session in &sessions {
                        println!(
                            "{}  [{}] {} messages  {}",
                            session.id,
                            session.state.as_str(),
                            session.message_count,
                            session.title.as_deref().unwrap_or("(untitled)")
                        );
                    }
                }
                SessionAction::Show { id } => {
                    let messages = memory.messages(&id).await?;
                    for message in &messages {
                        println!("[{}] {}", message.role.to_uppercase(), message.content);
                    }
                }
            }
        }
    }

    Ok(())
}
