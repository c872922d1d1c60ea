//! End-to-end pipeline tests: index a small project tree, then exercise
//! search, context assembly, requirements, document lookup, diff-driven
//! updates, and the critique loop against the same store.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use codelore::app::AppContext;
use codelore::config::Config;
use codelore::context::ContextOptions;
use codelore::critique::{critique_draft, CritiqueOptions};
use codelore::models::{Direction, EntityType, RelationKind};
use codelore::tools;

fn test_config(root: &std::path::Path) -> Config {
    let toml_text = format!(
        r#"
        [project]
        id = "integration"

        [db]
        path = "{}/data/lore.db"
        "#,
        root.display().to_string().replace('\\', "/")
    );
    toml::from_str(&toml_text).unwrap()
}

fn write_fixture_tree(root: &std::path::Path) -> PathBuf {
    let project = root.join("project");
    fs::create_dir_all(project.join("src")).unwrap();
    fs::create_dir_all(project.join("docs")).unwrap();

    fs::write(
        project.join("src/auth.rs"),
        r#"
pub struct UserService {
    timeout: u64,
}

impl UserService {
    pub fn authenticate(&self) -> bool {
        validate_token()
    }
}

fn validate_token() -> bool {
    true
}
"#,
    )
    .unwrap();

    fs::write(
        project.join("docs/guide.md"),
        "---\ntitle: Auth Guide\n---\n# Overview\n\nThe `UserService` authenticates users by calling validate_token().\n\n## Requirements\n\n- must validate tokens before granting access\n- should cache session lookups\n\n## Details\n\nSee [the config](../config.json) for timeout settings.\n",
    )
    .unwrap();

    fs::write(
        project.join("config.json"),
        r#"{"UserService": {"timeout": 30}, "retries": 3}"#,
    )
    .unwrap();

    project
}

async fn indexed_app() -> (TempDir, Arc<AppContext>, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let project = write_fixture_tree(tmp.path());
    let app = AppContext::init(test_config(tmp.path())).await.unwrap();

    let report = tools::index_directory(&app, &project, &codelore::no_cancel())
        .await
        .unwrap();
    assert!(report.errors.is_empty(), "index errors: {:?}", report.errors);
    assert_eq!(report.files_processed, 3);

    (tmp, app, project)
}

#[tokio::test]
async fn test_index_builds_code_and_document_graph() {
    let (_tmp, app, _project) = indexed_app().await;

    // Code side: file, struct, method, free function.
    let service = app
        .store
        .get_by_qualified_name("src/auth.rs::UserService")
        .await
        .unwrap()
        .expect("UserService entity");
    assert_eq!(service.entity_type, EntityType::Class);

    let method = app
        .store
        .get_by_qualified_name("src/auth.rs::UserService::authenticate")
        .await
        .unwrap()
        .expect("authenticate method");
    assert_eq!(method.entity_type, EntityType::Method);

    // CALLS edge resolved within the file.
    let calls = app.store.count_relationships(Some(RelationKind::Calls)).await.unwrap();
    assert!(calls >= 1);

    // Document side: front-matter title wins.
    let doc = app
        .store
        .get_by_qualified_name("docs/guide.md")
        .await
        .unwrap()
        .expect("guide document");
    assert_eq!(doc.name, "Auth Guide");

    // The guide's prose mentions UserService: the linker must have
    // connected document → class.
    let incoming = app
        .store
        .relationships_for(&service.id, Direction::In)
        .await
        .unwrap();
    assert!(
        incoming.iter().any(|r| r.kind == RelationKind::Documents),
        "expected a DOCUMENTS edge onto UserService"
    );

    // config.json: the UserService key configures the class.
    let configures = app
        .store
        .count_relationships(Some(RelationKind::Configures))
        .await
        .unwrap();
    assert_eq!(configures, 1);
}

#[tokio::test]
async fn test_incremental_reindex_skips_everything() {
    let (_tmp, app, project) = indexed_app().await;

    let second = tools::index_directory(&app, &project, &codelore::no_cancel())
        .await
        .unwrap();
    assert_eq!(second.files_processed, 0);
    assert_eq!(second.files_skipped, 3);
    assert_eq!(second.entities_created, 0);
}

#[tokio::test]
async fn test_search_finds_entities_across_strategies() {
    let (_tmp, app, _project) = indexed_app().await;

    let outcome = tools::search(&app, "UserService", Vec::new(), Some(10))
        .await
        .unwrap();
    assert!(!outcome.results.is_empty());
    assert!(
        outcome.results.iter().any(|hit| hit.name == "UserService"),
        "UserService should rank in results"
    );
    assert!(outcome.log_id.is_some());

    // Type-filtered search honors the filter post-fusion.
    let docs_only = tools::search(&app, "UserService", vec![EntityType::Section], Some(10))
        .await
        .unwrap();
    assert!(docs_only.results.iter().all(|h| h.entity_type == "section"));
}

#[tokio::test]
async fn test_empty_query_returns_empty() {
    let (_tmp, app, _project) = indexed_app().await;
    let outcome = tools::search(&app, "   ", Vec::new(), None).await.unwrap();
    assert!(outcome.results.is_empty());
}

#[tokio::test]
async fn test_context_respects_budget_and_logs() {
    let (_tmp, app, _project) = indexed_app().await;

    let outcome = tools::get_context(
        &app,
        "how does authentication work",
        Some(ContextOptions {
            max_tokens: 120,
            ..Default::default()
        }),
    )
    .await
    .unwrap();

    assert!(outcome.assembled.token_count <= 120);
    assert!(!outcome.assembled.context.is_empty());
    assert!(outcome.log_id.is_some());

    // The log carries token accounting against the full-context estimate.
    let record = codelore::query_log::get_log(&app.store, outcome.log_id.as_ref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.tokens_retrieved as usize, outcome.assembled.token_count);
    assert!(record.tokens_estimated_full >= record.tokens_retrieved);
}

#[tokio::test]
async fn test_requirements_extracted_with_priorities() {
    let (_tmp, app, _project) = indexed_app().await;

    let all = tools::get_requirements(&app, &tools::RequirementsFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let musts = tools::get_requirements(
        &app,
        &tools::RequirementsFilter {
            priority: Some("must".into()),
            requirement_type: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(musts.len(), 1);
    assert!(musts[0].description.contains("validate tokens"));
}

#[tokio::test]
async fn test_find_document_by_path() {
    let (_tmp, app, _project) = indexed_app().await;

    let doc = tools::find_document_by_path(&app, "docs/guide.md")
        .await
        .unwrap()
        .expect("document view");
    assert_eq!(doc.title, "Auth Guide");
    assert_eq!(doc.doc_type.as_deref(), Some("markdown"));
    assert!(doc.section_count >= 3);

    assert!(tools::find_document_by_path(&app, "docs/missing.md")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_feedback_round_trip() {
    let (_tmp, app, _project) = indexed_app().await;

    let outcome = tools::search(&app, "authentication", Vec::new(), None)
        .await
        .unwrap();
    let log_id = outcome.log_id.expect("search logged");

    tools::record_feedback(&app, &log_id, true).await.unwrap();
    let record = codelore::query_log::get_log(&app.store, &log_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.was_useful, Some(true));
}

#[tokio::test]
async fn test_file_deletion_cascades() {
    let (_tmp, app, project) = indexed_app().await;

    fs::remove_file(project.join("src/auth.rs")).unwrap();
    let removed = codelore::indexer::remove_file(&app, "src/auth.rs").await.unwrap();
    assert!(removed >= 4); // file + struct + method + function

    assert!(app
        .store
        .get_by_qualified_name("src/auth.rs::UserService")
        .await
        .unwrap()
        .is_none());
    // No dangling edges survive the cascade.
    let doc = app
        .store
        .get_by_qualified_name("docs/guide.md")
        .await
        .unwrap()
        .unwrap();
    let edges = app
        .store
        .relationships_for(&doc.id, Direction::Out)
        .await
        .unwrap();
    for edge in edges {
        assert!(app.store.get_entity(&edge.target_id).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_diff_update_applies_changes() {
    let (_tmp, app, project) = indexed_app().await;

    // Simulate a diff: guide.md modified, auth.rs deleted.
    fs::write(
        project.join("docs/guide.md"),
        "# Overview\n\nRewritten guide about the `UserService` internals.\n",
    )
    .unwrap();
    fs::remove_file(project.join("src/auth.rs")).unwrap();

    let diff_text = "\
diff --git a/docs/guide.md b/docs/guide.md
index 1111111..2222222 100644
--- a/docs/guide.md
+++ b/docs/guide.md
@@ -1,1 +1,1 @@
-old
+new
diff --git a/src/auth.rs b/src/auth.rs
deleted file mode 100644
--- a/src/auth.rs
+++ /dev/null
@@ -1,1 +0,0 @@
-pub struct UserService;
";
    let diff = codelore::git_diff::parse_diff(diff_text);
    let report =
        codelore::git_diff::apply_diff_update(&app, &project, &diff, &codelore::no_cancel())
            .await
            .unwrap();

    assert_eq!(report.files_processed, 1);
    assert!(app
        .store
        .get_by_qualified_name("src/auth.rs")
        .await
        .unwrap()
        .is_none());
    let doc = app
        .store
        .get_by_qualified_name("docs/guide.md")
        .await
        .unwrap()
        .unwrap();
    assert!(doc.content.unwrap().contains("Rewritten"));
}

#[tokio::test]
async fn test_critique_against_assembled_context() {
    let (_tmp, app, _project) = indexed_app().await;

    let outcome = tools::get_context(&app, "how does authentication work", None)
        .await
        .unwrap();

    // A draft citing an entity absent from the context must fail.
    let bad = critique_draft(
        "`PaymentService` handles payments for this system.",
        "how does authentication work",
        &outcome.assembled,
        None,
        &CritiqueOptions::default(),
    )
    .await;
    assert!(!bad.passed);

    // A draft grounded in the context passes.
    let good = critique_draft(
        "`UserService` authenticates users before granting access.",
        "how does authentication work",
        &outcome.assembled,
        None,
        &CritiqueOptions::default(),
    )
    .await;
    assert!(good.passed, "issues: {:?}", good.issues);
}
