//! Query logging and token/cost accounting.
//!
//! Every retrieval records what it returned and what it saved relative to
//! stuffing the whole project into context. The full-context estimate is
//! recomputed on demand and cached per project. Query text is omitted
//! when `logging.log_queries` is off.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use crate::config::LoggingConfig;
use crate::error::CoreError;
use crate::store::Store;

/// Dollars for a token count at a per-1k price.
pub fn cost_for(tokens: usize, price_per_1k: f64) -> f64 {
    tokens as f64 / 1000.0 * price_per_1k
}

/// One query-log row.
#[derive(Debug, Clone, Serialize)]
pub struct QueryLogRecord {
    pub id: String,
    pub project_id: String,
    pub query: Option<String>,
    pub query_type: String,
    pub tokens_retrieved: i64,
    pub tokens_estimated_full: i64,
    pub tokens_saved: i64,
    pub cost_actual: f64,
    pub cost_estimated_full: f64,
    pub cost_saved: f64,
    pub relevance_score: f64,
    pub item_count: i64,
    pub item_types: Vec<String>,
    pub retrieval_strategies: Vec<String>,
    pub was_useful: Option<bool>,
    pub timestamp: i64,
}

/// Input to [`log_query`].
#[derive(Debug, Clone)]
pub struct QueryLogInput {
    pub query: String,
    pub query_type: String,
    pub tokens_retrieved: usize,
    pub relevance_score: f64,
    pub item_count: usize,
    pub item_types: Vec<String>,
    pub retrieval_strategies: Vec<String>,
}

/// Append a query-log row and return its id.
pub async fn log_query(
    store: &Store,
    config: &LoggingConfig,
    input: &QueryLogInput,
) -> Result<String> {
    let full_tokens = full_context_estimate(store).await?;
    let tokens_saved = full_tokens.saturating_sub(input.tokens_retrieved as i64);

    let id = Uuid::new_v4().to_string();
    let logged_query = config.log_queries.then(|| input.query.clone());

    let _guard = store.write_guard().await;
    sqlx::query(
        r#"
        INSERT INTO query_logs
            (id, project_id, query, query_type, tokens_retrieved, tokens_estimated_full,
             tokens_saved, cost_actual, cost_estimated_full, cost_saved, relevance_score,
             item_count, item_types, retrieval_strategies, was_useful, timestamp)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)
        "#,
    )
    .bind(&id)
    .bind(store.project_id())
    .bind(&logged_query)
    .bind(&input.query_type)
    .bind(input.tokens_retrieved as i64)
    .bind(full_tokens)
    .bind(tokens_saved)
    .bind(cost_for(input.tokens_retrieved, config.price_per_1k_tokens))
    .bind(cost_for(full_tokens.max(0) as usize, config.price_per_1k_tokens))
    .bind(cost_for(tokens_saved.max(0) as usize, config.price_per_1k_tokens))
    .bind(input.relevance_score)
    .bind(input.item_count as i64)
    .bind(serde_json::to_string(&input.item_types)?)
    .bind(serde_json::to_string(&input.retrieval_strategies)?)
    .bind(Utc::now().timestamp())
    .execute(store.pool())
    .await?;

    Ok(id)
}

/// Record user feedback on a logged query.
pub async fn record_feedback(store: &Store, log_id: &str, useful: bool) -> Result<()> {
    let _guard = store.write_guard().await;
    let result = sqlx::query("UPDATE query_logs SET was_useful = ? WHERE id = ?")
        .bind(useful)
        .bind(log_id)
        .execute(store.pool())
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("query log {}", log_id)).into());
    }
    Ok(())
}

/// Fetch a query-log row.
pub async fn get_log(store: &Store, log_id: &str) -> Result<Option<QueryLogRecord>> {
    let row = sqlx::query("SELECT * FROM query_logs WHERE id = ?")
        .bind(log_id)
        .fetch_optional(store.pool())
        .await?;

    Ok(row.map(|r| {
        let item_types: String = r.get("item_types");
        let strategies: String = r.get("retrieval_strategies");
        QueryLogRecord {
            id: r.get("id"),
            project_id: r.get("project_id"),
            query: r.get("query"),
            query_type: r.get("query_type"),
            tokens_retrieved: r.get("tokens_retrieved"),
            tokens_estimated_full: r.get("tokens_estimated_full"),
            tokens_saved: r.get("tokens_saved"),
            cost_actual: r.get("cost_actual"),
            cost_estimated_full: r.get("cost_estimated_full"),
            cost_saved: r.get("cost_saved"),
            relevance_score: r.get("relevance_score"),
            item_count: r.get("item_count"),
            item_types: serde_json::from_str(&item_types).unwrap_or_default(),
            retrieval_strategies: serde_json::from_str(&strategies).unwrap_or_default(),
            was_useful: r.get("was_useful"),
            timestamp: r.get("timestamp"),
        }
    }))
}

/// Tokens a full-context dump of the project would cost. Recomputed from
/// entity content sizes and cached in `full_context_estimates`.
pub async fn full_context_estimate(store: &Store) -> Result<i64> {
    let cached: Option<(i64, i64)> = sqlx::query(
        "SELECT total_tokens, computed_at FROM full_context_estimates WHERE project_id = ?",
    )
    .bind(store.project_id())
    .fetch_optional(store.pool())
    .await?
    .map(|r| (r.get("total_tokens"), r.get("computed_at")));

    let now = Utc::now().timestamp();
    if let Some((tokens, computed_at)) = cached {
        // Stale after five minutes of indexing activity.
        if now - computed_at < 300 {
            return Ok(tokens);
        }
    }

    let total_chars: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(LENGTH(COALESCE(content, ''))) FROM entities WHERE project_id = ?",
    )
    .bind(store.project_id())
    .fetch_one(store.pool())
    .await?;
    let tokens = (total_chars.unwrap_or(0) + 3) / 4;

    let _guard = store.write_guard().await;
    sqlx::query(
        r#"
        INSERT INTO full_context_estimates (project_id, total_tokens, computed_at)
        VALUES (?, ?, ?)
        ON CONFLICT(project_id) DO UPDATE SET
            total_tokens = excluded.total_tokens,
            computed_at = excluded.computed_at
        "#,
    )
    .bind(store.project_id())
    .bind(tokens)
    .bind(now)
    .execute(store.pool())
    .await?;

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use crate::models::{EntityDraft, EntityType};


    async fn memory_store() -> Store {
        let pool = crate::db::connect_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        Store::from_pool(pool, "test")
    }

    fn input() -> QueryLogInput {
        QueryLogInput {
            query: "how does chunking work".into(),
            query_type: "context".into(),
            tokens_retrieved: 100,
            relevance_score: 0.8,
            item_count: 3,
            item_types: vec!["section".into()],
            retrieval_strategies: vec!["keyword".into(), "semantic".into()],
        }
    }

    #[test]
    fn test_cost_accounting() {
        assert!((cost_for(1000, 0.03) - 0.03).abs() < 1e-12);
        assert!((cost_for(500, 0.03) - 0.015).abs() < 1e-12);
        assert_eq!(cost_for(0, 0.03), 0.0);
    }

    #[tokio::test]
    async fn test_log_and_feedback() {
        let store = memory_store().await;
        let config = LoggingConfig::default();
        let id = log_query(&store, &config, &input()).await.unwrap();

        let record = get_log(&store, &id).await.unwrap().unwrap();
        assert_eq!(record.query.as_deref(), Some("how does chunking work"));
        assert_eq!(record.tokens_retrieved, 100);
        assert_eq!(record.was_useful, None);

        record_feedback(&store, &id, true).await.unwrap();
        let record = get_log(&store, &id).await.unwrap().unwrap();
        assert_eq!(record.was_useful, Some(true));
    }

    #[tokio::test]
    async fn test_feedback_unknown_log_is_not_found() {
        let store = memory_store().await;
        assert!(record_feedback(&store, "missing", true).await.is_err());
    }

    #[tokio::test]
    async fn test_query_text_omitted_when_logging_disabled() {
        let store = memory_store().await;
        let config = LoggingConfig {
            log_queries: false,
            ..LoggingConfig::default()
        };
        let id = log_query(&store, &config, &input()).await.unwrap();
        let record = get_log(&store, &id).await.unwrap().unwrap();
        assert!(record.query.is_none());
    }

    #[tokio::test]
    async fn test_tokens_saved_against_full_estimate() {
        let store = memory_store().await;
        store
            .upsert_entity(
                &EntityDraft::new(EntityType::Document, "big", "big.md")
                    .with_content(&"x".repeat(4000)),
            )
            .await
            .unwrap();

        let full = full_context_estimate(&store).await.unwrap();
        assert_eq!(full, 1000);

        let id = log_query(&store, &LoggingConfig::default(), &input())
            .await
            .unwrap();
        let record = get_log(&store, &id).await.unwrap().unwrap();
        assert_eq!(record.tokens_estimated_full, 1000);
        assert_eq!(record.tokens_saved, 900);
    }
}
