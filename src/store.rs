//! Per-project entity and relationship store.
//!
//! The SQLite database is the ground truth for the knowledge graph. The
//! store enforces the graph invariants at the write path:
//!
//! - `qualified_name` is unique per project; `upsert_entity` is keyed on it.
//! - `(source_id, target_id, relationship)` is unique; `upsert_relationship`
//!   updates weight/metadata on conflict.
//! - Self-loops are rejected; edges to unknown entities are rejected.
//! - Deleting an entity cascades over its relationships (both directions)
//!   and its embedding row.
//!
//! Writes are serialized through a per-project write lock (single writer,
//! many readers); every multi-statement mutation runs inside one SQLite
//! transaction so readers observe either the pre- or post-commit snapshot.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::error::CoreError;
use crate::migrate;
use crate::models::{
    Direction, Entity, EntityDraft, EntityType, Relationship, RelationKind, StoredEmbedding,
};

/// Optional constraints for [`Store::find`].
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub entity_type: Option<EntityType>,
    pub file_path: Option<String>,
    pub name_contains: Option<String>,
    pub limit: Option<i64>,
}

/// Handle to one project's graph tables.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    project_id: String,
    write_lock: Arc<Mutex<()>>,
}

impl Store {
    /// Open the configured database, run migrations, and scope to the
    /// configured project.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(&config.db.path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::from_pool(pool, &config.project.id))
    }

    /// Open an in-memory or pre-connected pool. Used by tests.
    pub fn from_pool(pool: SqlitePool, project_id: &str) -> Self {
        Self {
            pool,
            project_id: project_id.to_string(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Open a store at an explicit path (bypassing config), running migrations.
    pub async fn open_at(path: &Path, project_id: &str) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::from_pool(pool, project_id))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Acquire the project write lock. Modules that run their own
    /// multi-statement transactions (conversation memory, query logs)
    /// serialize through this.
    pub async fn write_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    // ───────────────────────── entities ─────────────────────────

    /// Insert or update an entity, keyed on `(project_id, qualified_name)`.
    ///
    /// A matching row keeps its `id` and `created_at` and gets a fresh
    /// `updated_at`; all other fields are replaced. Returns the stored row.
    pub async fn upsert_entity(&self, draft: &EntityDraft) -> Result<Entity> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now().timestamp();

        let existing_id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM entities WHERE project_id = ? AND qualified_name = ?",
        )
        .bind(&self.project_id)
        .bind(&draft.qualified_name)
        .fetch_optional(&self.pool)
        .await?;

        let id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let metadata_json = serde_json::to_string(&draft.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO entities
                (id, project_id, entity_type, name, qualified_name, content, summary,
                 file_path, start_line, end_line, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(project_id, qualified_name) DO UPDATE SET
                entity_type = excluded.entity_type,
                name = excluded.name,
                content = excluded.content,
                summary = excluded.summary,
                file_path = excluded.file_path,
                start_line = excluded.start_line,
                end_line = excluded.end_line,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&id)
        .bind(&self.project_id)
        .bind(draft.entity_type.as_str())
        .bind(&draft.name)
        .bind(&draft.qualified_name)
        .bind(&draft.content)
        .bind(&draft.summary)
        .bind(&draft.file_path)
        .bind(draft.start_line)
        .bind(draft.end_line)
        .bind(&metadata_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        drop(_guard);
        self.get_by_qualified_name(&draft.qualified_name)
            .await?
            .ok_or_else(|| CoreError::NotFound(draft.qualified_name.clone()).into())
    }

    pub async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let row = sqlx::query("SELECT * FROM entities WHERE id = ? AND project_id = ?")
            .bind(id)
            .bind(&self.project_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_entity(&r)).transpose()
    }

    pub async fn get_by_qualified_name(&self, qualified_name: &str) -> Result<Option<Entity>> {
        let row =
            sqlx::query("SELECT * FROM entities WHERE project_id = ? AND qualified_name = ?")
                .bind(&self.project_id)
                .bind(qualified_name)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|r| row_to_entity(&r)).transpose()
    }

    /// All entities with the given display name, optionally narrowed by type.
    pub async fn find_by_name(
        &self,
        name: &str,
        entity_type: Option<EntityType>,
    ) -> Result<Vec<Entity>> {
        let rows = match entity_type {
            Some(t) => {
                sqlx::query(
                    "SELECT * FROM entities WHERE project_id = ? AND name = ? AND entity_type = ?",
                )
                .bind(&self.project_id)
                .bind(name)
                .bind(t.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => sqlx::query("SELECT * FROM entities WHERE project_id = ? AND name = ?")
                .bind(&self.project_id)
                .bind(name)
                .fetch_all(&self.pool)
                .await?,
        };
        rows.iter().map(row_to_entity).collect()
    }

    /// Filtered listing; every filter field is optional.
    pub async fn find(&self, filter: &EntityFilter) -> Result<Vec<Entity>> {
        let mut sql = String::from("SELECT * FROM entities WHERE project_id = ?");
        if filter.entity_type.is_some() {
            sql.push_str(" AND entity_type = ?");
        }
        if filter.file_path.is_some() {
            sql.push_str(" AND file_path = ?");
        }
        if filter.name_contains.is_some() {
            sql.push_str(" AND LOWER(name) LIKE ?");
        }
        sql.push_str(" ORDER BY qualified_name ASC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut q = sqlx::query(&sql).bind(&self.project_id);
        if let Some(t) = filter.entity_type {
            q = q.bind(t.as_str());
        }
        if let Some(ref fp) = filter.file_path {
            q = q.bind(fp.clone());
        }
        if let Some(ref frag) = filter.name_contains {
            q = q.bind(format!("%{}%", frag.to_lowercase()));
        }
        if let Some(limit) = filter.limit {
            q = q.bind(limit);
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_entity).collect()
    }

    /// Delete an entity and cascade over its edges and embedding.
    /// Returns false when the id is unknown.
    pub async fn delete_entity(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM entities WHERE id = ? AND project_id = ?")
                .bind(id)
                .bind(&self.project_id)
                .fetch_one(&mut *tx)
                .await?;
        if !exists {
            return Ok(false);
        }

        sqlx::query("DELETE FROM relationships WHERE source_id = ? OR target_id = ?")
            .bind(id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM embeddings WHERE entity_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM entities WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Cascade-delete every entity originating from a file (the file/document
    /// entity itself plus all children addressed under it).
    pub async fn delete_by_file(&self, file_path: &str) -> Result<u64> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM entities WHERE project_id = ? AND (file_path = ? OR qualified_name = ? OR qualified_name LIKE ?)",
        )
        .bind(&self.project_id)
        .bind(file_path)
        .bind(file_path)
        .bind(format!("{}::%", file_path))
        .fetch_all(&self.pool)
        .await?;

        let mut deleted = 0u64;
        for id in &ids {
            if self.delete_entity(id).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    // ───────────────────────── text search ─────────────────────────

    /// Substring/token search over name, qualified_name, summary, and
    /// content, ranked by match locality (name strongest, content weakest).
    pub async fn search_text(
        &self,
        text: &str,
        entity_type: Option<EntityType>,
        limit: usize,
    ) -> Result<Vec<(Entity, f64)>> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let like = format!("%{}%", needle);
        let rows = match entity_type {
            Some(t) => {
                sqlx::query(
                    r#"
                    SELECT * FROM entities
                    WHERE project_id = ? AND entity_type = ?
                      AND (LOWER(name) LIKE ? OR LOWER(qualified_name) LIKE ?
                           OR LOWER(COALESCE(summary, '')) LIKE ?
                           OR LOWER(COALESCE(content, '')) LIKE ?)
                    "#,
                )
                .bind(&self.project_id)
                .bind(t.as_str())
                .bind(&like)
                .bind(&like)
                .bind(&like)
                .bind(&like)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM entities
                    WHERE project_id = ?
                      AND (LOWER(name) LIKE ? OR LOWER(qualified_name) LIKE ?
                           OR LOWER(COALESCE(summary, '')) LIKE ?
                           OR LOWER(COALESCE(content, '')) LIKE ?)
                    "#,
                )
                .bind(&self.project_id)
                .bind(&like)
                .bind(&like)
                .bind(&like)
                .bind(&like)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut scored: Vec<(Entity, f64)> = Vec::with_capacity(rows.len());
        for row in &rows {
            let entity = row_to_entity(row)?;
            let score = locality_score(&entity, &needle);
            if score > 0.0 {
                scored.push((entity, score));
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.qualified_name.cmp(&b.0.qualified_name))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    // ───────────────────────── relationships ─────────────────────────

    /// Insert or update an edge, idempotent on `(source, target, kind)`.
    ///
    /// Rejects self-loops and edges whose endpoints do not exist.
    pub async fn upsert_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        kind: RelationKind,
        weight: f64,
        metadata: serde_json::Value,
    ) -> Result<Relationship> {
        if source_id == target_id {
            return Err(CoreError::Invalid(format!(
                "self-loop relationship on entity {}",
                source_id
            ))
            .into());
        }

        let _guard = self.write_lock.lock().await;

        let endpoints: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE id IN (?, ?)")
            .bind(source_id)
            .bind(target_id)
            .fetch_one(&self.pool)
            .await?;
        if endpoints != 2 {
            return Err(CoreError::NotFound(format!(
                "relationship endpoint missing for {} -> {}",
                source_id, target_id
            ))
            .into());
        }

        let id = Uuid::new_v4().to_string();
        let metadata_json = serde_json::to_string(&metadata)?;
        let clamped = weight.clamp(0.0, 1.0);

        sqlx::query(
            r#"
            INSERT INTO relationships (id, source_id, target_id, relationship, weight, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id, target_id, relationship) DO UPDATE SET
                weight = excluded.weight,
                metadata = excluded.metadata
            "#,
        )
        .bind(&id)
        .bind(source_id)
        .bind(target_id)
        .bind(kind.as_str())
        .bind(clamped)
        .bind(&metadata_json)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT * FROM relationships WHERE source_id = ? AND target_id = ? AND relationship = ?",
        )
        .bind(source_id)
        .bind(target_id)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;

        row_to_relationship(&row)
    }

    /// All edges touching an entity in the requested direction.
    pub async fn relationships_for(
        &self,
        entity_id: &str,
        direction: Direction,
    ) -> Result<Vec<Relationship>> {
        let rows = match direction {
            Direction::Out => {
                sqlx::query("SELECT * FROM relationships WHERE source_id = ?")
                    .bind(entity_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            Direction::In => {
                sqlx::query("SELECT * FROM relationships WHERE target_id = ?")
                    .bind(entity_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            Direction::Both => {
                sqlx::query("SELECT * FROM relationships WHERE source_id = ? OR target_id = ?")
                    .bind(entity_id)
                    .bind(entity_id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_relationship).collect()
    }

    pub async fn count_relationships(&self, kind: Option<RelationKind>) -> Result<i64> {
        let count: i64 = match kind {
            Some(k) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM relationships WHERE relationship = ?")
                    .bind(k.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM relationships")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    pub async fn count_entities(&self, entity_type: Option<EntityType>) -> Result<i64> {
        let count: i64 = match entity_type {
            Some(t) => sqlx::query_scalar(
                "SELECT COUNT(*) FROM entities WHERE project_id = ? AND entity_type = ?",
            )
            .bind(&self.project_id)
            .bind(t.as_str())
            .fetch_one(&self.pool)
            .await?,
            None => sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE project_id = ?")
                .bind(&self.project_id)
                .fetch_one(&self.pool)
                .await?,
        };
        Ok(count)
    }

    // ───────────────────────── embeddings ─────────────────────────

    /// Store one unit-normalized vector per entity (replacing any previous).
    pub async fn put_embedding(
        &self,
        entity_id: &str,
        model: &str,
        vector: &[f32],
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let blob = crate::embedding::vec_to_blob(vector);
        sqlx::query(
            r#"
            INSERT INTO embeddings (entity_id, model, dims, vector, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(entity_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                vector = excluded.vector,
                created_at = excluded.created_at
            "#,
        )
        .bind(entity_id)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(blob)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_embedding(&self, entity_id: &str) -> Result<Option<StoredEmbedding>> {
        let row = sqlx::query("SELECT * FROM embeddings WHERE entity_id = ?")
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| {
            let blob: Vec<u8> = r.get("vector");
            StoredEmbedding {
                entity_id: r.get("entity_id"),
                vector: crate::embedding::blob_to_vec(&blob),
                model: r.get("model"),
                created_at: ts_to_datetime(r.get("created_at")),
            }
        }))
    }

    /// Every stored vector for this project, joined back to its entity id
    /// and type. Brute-force scans happen over this set.
    pub async fn all_embeddings(
        &self,
        entity_type: Option<EntityType>,
    ) -> Result<Vec<(String, EntityType, Vec<f32>)>> {
        let rows = match entity_type {
            Some(t) => {
                sqlx::query(
                    r#"
                    SELECT e.id AS entity_id, e.entity_type, emb.vector
                    FROM embeddings emb JOIN entities e ON e.id = emb.entity_id
                    WHERE e.project_id = ? AND e.entity_type = ?
                    "#,
                )
                .bind(&self.project_id)
                .bind(t.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT e.id AS entity_id, e.entity_type, emb.vector
                    FROM embeddings emb JOIN entities e ON e.id = emb.entity_id
                    WHERE e.project_id = ?
                    "#,
                )
                .bind(&self.project_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let type_str: String = row.get("entity_type");
            let Some(t) = EntityType::parse(&type_str) else {
                continue;
            };
            let blob: Vec<u8> = row.get("vector");
            out.push((
                row.get::<String, _>("entity_id"),
                t,
                crate::embedding::blob_to_vec(&blob),
            ));
        }
        Ok(out)
    }

    pub async fn count_embeddings(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM embeddings emb JOIN entities e ON e.id = emb.entity_id WHERE e.project_id = ?",
        )
        .bind(&self.project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

/// Locality-tier score for text search: name > qualified_name > summary > content.
fn locality_score(entity: &Entity, needle: &str) -> f64 {
    let name = entity.name.to_lowercase();
    if name == needle {
        return 1.2;
    }
    if name.contains(needle) {
        return 1.0;
    }
    if entity.qualified_name.to_lowercase().contains(needle) {
        return 0.75;
    }
    if entity
        .summary
        .as_deref()
        .is_some_and(|s| s.to_lowercase().contains(needle))
    {
        return 0.5;
    }
    if entity
        .content
        .as_deref()
        .is_some_and(|c| c.to_lowercase().contains(needle))
    {
        return 0.25;
    }
    0.0
}

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}

fn row_to_entity(row: &sqlx::sqlite::SqliteRow) -> Result<Entity> {
    let type_str: String = row.get("entity_type");
    let entity_type = EntityType::parse(&type_str)
        .ok_or_else(|| CoreError::Invalid(format!("unknown entity type: {}", type_str)))?;
    let metadata_json: String = row.get("metadata");
    let metadata =
        serde_json::from_str(&metadata_json).unwrap_or_else(|_| serde_json::json!({}));

    Ok(Entity {
        id: row.get("id"),
        project_id: row.get("project_id"),
        entity_type,
        name: row.get("name"),
        qualified_name: row.get("qualified_name"),
        content: row.get("content"),
        summary: row.get("summary"),
        file_path: row.get("file_path"),
        start_line: row.get("start_line"),
        end_line: row.get("end_line"),
        metadata,
        created_at: ts_to_datetime(row.get("created_at")),
        updated_at: ts_to_datetime(row.get("updated_at")),
    })
}

fn row_to_relationship(row: &sqlx::sqlite::SqliteRow) -> Result<Relationship> {
    let kind_str: String = row.get("relationship");
    let kind = RelationKind::parse(&kind_str)
        .ok_or_else(|| CoreError::Invalid(format!("unknown relationship kind: {}", kind_str)))?;
    let metadata_json: String = row.get("metadata");
    let metadata =
        serde_json::from_str(&metadata_json).unwrap_or_else(|_| serde_json::json!({}));

    Ok(Relationship {
        id: row.get("id"),
        source_id: row.get("source_id"),
        target_id: row.get("target_id"),
        kind,
        weight: row.get("weight"),
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityDraft;

    async fn memory_store() -> Store {
        let pool = crate::db::connect_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        Store::from_pool(pool, "test-project")
    }

    fn draft(name: &str, qn: &str) -> EntityDraft {
        EntityDraft::new(EntityType::Function, name, qn)
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = memory_store().await;
        let d = draft("parse", "src/lib.rs::parse").with_content("fn parse() {}");
        let first = store.upsert_entity(&d).await.unwrap();
        let second = store.upsert_entity(&d).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.qualified_name, second.qualified_name);
        assert_eq!(first.content, second.content);
        assert_eq!(store.count_entities(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_updates_fields() {
        let store = memory_store().await;
        let d = draft("parse", "src/lib.rs::parse");
        store.upsert_entity(&d).await.unwrap();
        let updated = store
            .upsert_entity(&d.clone().with_content("fn parse() { todo!() }"))
            .await
            .unwrap();
        assert_eq!(
            updated.content.as_deref(),
            Some("fn parse() { todo!() }")
        );
    }

    #[tokio::test]
    async fn test_relationship_unique_and_self_loop() {
        let store = memory_store().await;
        let a = store.upsert_entity(&draft("a", "f.rs::a")).await.unwrap();
        let b = store.upsert_entity(&draft("b", "f.rs::b")).await.unwrap();

        store
            .upsert_relationship(&a.id, &b.id, RelationKind::Calls, 1.0, serde_json::json!({}))
            .await
            .unwrap();
        store
            .upsert_relationship(&a.id, &b.id, RelationKind::Calls, 0.5, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(
            store.count_relationships(Some(RelationKind::Calls)).await.unwrap(),
            1
        );

        let err = store
            .upsert_relationship(&a.id, &a.id, RelationKind::Calls, 1.0, serde_json::json!({}))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_dangling_endpoint_rejected() {
        let store = memory_store().await;
        let a = store.upsert_entity(&draft("a", "f.rs::a")).await.unwrap();
        let err = store
            .upsert_relationship(&a.id, "ghost", RelationKind::Calls, 1.0, serde_json::json!({}))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_cascade_delete() {
        let store = memory_store().await;
        let a = store.upsert_entity(&draft("a", "f.rs::a")).await.unwrap();
        let b = store.upsert_entity(&draft("b", "f.rs::b")).await.unwrap();
        store
            .upsert_relationship(&a.id, &b.id, RelationKind::Calls, 1.0, serde_json::json!({}))
            .await
            .unwrap();
        store
            .upsert_relationship(&b.id, &a.id, RelationKind::References, 1.0, serde_json::json!({}))
            .await
            .unwrap();
        store.put_embedding(&a.id, "mock", &[1.0, 0.0]).await.unwrap();

        assert!(store.delete_entity(&a.id).await.unwrap());
        assert_eq!(store.count_relationships(None).await.unwrap(), 0);
        assert!(store.get_embedding(&a.id).await.unwrap().is_none());
        assert!(store.get_entity(&a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_locality_ranking() {
        let store = memory_store().await;
        store
            .upsert_entity(
                &EntityDraft::new(EntityType::Function, "indexer", "src/a.rs::indexer"),
            )
            .await
            .unwrap();
        store
            .upsert_entity(
                &EntityDraft::new(EntityType::Function, "run", "src/indexer.rs::run"),
            )
            .await
            .unwrap();
        store
            .upsert_entity(
                &EntityDraft::new(EntityType::Function, "other", "src/b.rs::other")
                    .with_content("calls the indexer on save"),
            )
            .await
            .unwrap();

        let results = store.search_text("indexer", None, 10).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0.name, "indexer");
        assert_eq!(results[1].0.qualified_name, "src/indexer.rs::run");
        assert_eq!(results[2].0.name, "other");
        assert!(results[0].1 > results[1].1 && results[1].1 > results[2].1);
    }

    #[tokio::test]
    async fn test_search_empty_query_is_empty() {
        let store = memory_store().await;
        let results = store.search_text("   ", None, 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_file_cascades_children() {
        let store = memory_store().await;
        store
            .upsert_entity(
                &EntityDraft::new(EntityType::File, "a.rs", "src/a.rs").with_file("src/a.rs"),
            )
            .await
            .unwrap();
        store
            .upsert_entity(
                &EntityDraft::new(EntityType::Function, "f", "src/a.rs::f").with_file("src/a.rs"),
            )
            .await
            .unwrap();
        let deleted = store.delete_by_file("src/a.rs").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count_entities(None).await.unwrap(), 0);
    }
}
