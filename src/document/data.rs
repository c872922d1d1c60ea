//! Structured-data pipelines: YAML, JSON, and TOML.
//!
//! Top-level keys become `component` entities (mapping values) or
//! `variable` entities (scalars/arrays) under the document. A key that
//! matches an existing code entity name additionally gets a `CONFIGURES`
//! edge. `package.json` is special-cased: dependencies become
//! `technology` entities and scripts become `task` entities.

use anyhow::Result;

use crate::document::PipelineOutput;
use crate::error::CoreError;
use crate::models::{EntityDraft, EntityType, RelationKind};
use crate::store::Store;

/// Which syntax to parse; the dispatcher decides from the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Yaml,
    Json,
    Toml,
}

impl DataFormat {
    fn doc_type(&self) -> &'static str {
        match self {
            DataFormat::Yaml => "yaml",
            DataFormat::Json => "json",
            DataFormat::Toml => "toml",
        }
    }
}

pub async fn ingest(
    store: &Store,
    format: DataFormat,
    rel_path: &str,
    source: &str,
    base_metadata: serde_json::Value,
) -> Result<PipelineOutput> {
    let value = parse_to_json(format, rel_path, source)?;
    let mut out = PipelineOutput::default();

    let file_name = std::path::Path::new(rel_path)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| rel_path.to_string());

    let mut doc_metadata = base_metadata;
    if let Some(obj) = doc_metadata.as_object_mut() {
        obj.insert("docType".into(), serde_json::json!(format.doc_type()));
    }

    let doc = store
        .upsert_entity(
            &EntityDraft::new(EntityType::Document, &file_name, rel_path)
                .with_content(source)
                .with_file(rel_path)
                .with_metadata(doc_metadata),
        )
        .await?;
    out.document_id = doc.id.clone();
    out.entities_created += 1;
    out.embeddable.push((doc.id.clone(), source.chars().take(4000).collect()));

    if file_name == "package.json" {
        ingest_package_json(store, &doc.id, rel_path, &value, &mut out).await?;
        return Ok(out);
    }

    let Some(map) = value.as_object() else {
        return Ok(out);
    };

    for (key, entry) in map {
        let entity_type = if entry.is_object() {
            EntityType::Component
        } else {
            EntityType::Variable
        };
        let qn = format!("{}::{}", rel_path, key);
        let summary = summarize_value(entry);

        let entity = store
            .upsert_entity(
                &EntityDraft {
                    entity_type,
                    name: key.clone(),
                    qualified_name: qn,
                    content: serde_json::to_string_pretty(entry).ok(),
                    summary: Some(summary),
                    file_path: Some(rel_path.to_string()),
                    start_line: None,
                    end_line: None,
                    metadata: serde_json::json!({}),
                },
            )
            .await?;
        out.entities_created += 1;

        store
            .upsert_relationship(
                &doc.id,
                &entity.id,
                RelationKind::Contains,
                1.0,
                serde_json::json!({}),
            )
            .await?;
        out.relationships_created += 1;

        // Keys that name a code entity configure it.
        let code_matches = store.find_by_name(key, None).await?;
        for target in code_matches.iter().filter(|e| e.entity_type.is_code()) {
            if target.id == entity.id {
                continue;
            }
            store
                .upsert_relationship(
                    &entity.id,
                    &target.id,
                    RelationKind::Configures,
                    1.0,
                    serde_json::json!({}),
                )
                .await?;
            out.relationships_created += 1;
        }
    }

    Ok(out)
}

async fn ingest_package_json(
    store: &Store,
    doc_id: &str,
    rel_path: &str,
    value: &serde_json::Value,
    out: &mut PipelineOutput,
) -> Result<()> {
    for deps_key in ["dependencies", "devDependencies"] {
        let Some(deps) = value.get(deps_key).and_then(|d| d.as_object()) else {
            continue;
        };
        for (name, version) in deps {
            let qn = format!("{}::dep-{}", rel_path, name);
            let entity = store
                .upsert_entity(
                    &EntityDraft::new(EntityType::Technology, name, &qn)
                        .with_file(rel_path)
                        .with_metadata(serde_json::json!({
                            "version": version,
                            "dev": deps_key == "devDependencies",
                        })),
                )
                .await?;
            out.entities_created += 1;
            store
                .upsert_relationship(
                    doc_id,
                    &entity.id,
                    RelationKind::DependsOn,
                    1.0,
                    serde_json::json!({}),
                )
                .await?;
            out.relationships_created += 1;
        }
    }

    if let Some(scripts) = value.get("scripts").and_then(|s| s.as_object()) {
        for (name, command) in scripts {
            let qn = format!("{}::script-{}", rel_path, name);
            let entity = store
                .upsert_entity(
                    &EntityDraft::new(EntityType::Task, name, &qn)
                        .with_content(command.as_str().unwrap_or_default())
                        .with_file(rel_path),
                )
                .await?;
            out.entities_created += 1;
            store
                .upsert_relationship(
                    doc_id,
                    &entity.id,
                    RelationKind::Contains,
                    1.0,
                    serde_json::json!({}),
                )
                .await?;
            out.relationships_created += 1;
        }
    }

    Ok(())
}

fn parse_to_json(
    format: DataFormat,
    rel_path: &str,
    source: &str,
) -> Result<serde_json::Value> {
    let value = match format {
        DataFormat::Json => serde_json::from_str(source)
            .map_err(|e| CoreError::parse_failure(rel_path, e))?,
        DataFormat::Yaml => {
            let yaml: serde_yaml::Value = serde_yaml::from_str(source)
                .map_err(|e| CoreError::parse_failure(rel_path, e))?;
            serde_json::to_value(yaml).map_err(|e| CoreError::parse_failure(rel_path, e))?
        }
        DataFormat::Toml => {
            let toml_value: toml::Value = toml::from_str(source)
                .map_err(|e| CoreError::parse_failure(rel_path, e))?;
            serde_json::to_value(toml_value)
                .map_err(|e| CoreError::parse_failure(rel_path, e))?
        }
    };
    Ok(value)
}

fn summarize_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => format!("mapping with {} keys", map.len()),
        serde_json::Value::Array(items) => format!("list with {} items", items.len()),
        serde_json::Value::String(s) => s.chars().take(120).collect(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;


    async fn memory_store() -> Store {
        let pool = crate::db::connect_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        Store::from_pool(pool, "test")
    }

    #[tokio::test]
    async fn test_yaml_top_level_keys() {
        let store = memory_store().await;
        let source = "server:\n  port: 8080\nretries: 3\n";
        let out = ingest(&store, DataFormat::Yaml, "config/app.yaml", source, serde_json::json!({}))
            .await
            .unwrap();

        // document + component (server) + variable (retries)
        assert_eq!(out.entities_created, 3);
        let server = store
            .get_by_qualified_name("config/app.yaml::server")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(server.entity_type, EntityType::Component);
        let retries = store
            .get_by_qualified_name("config/app.yaml::retries")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retries.entity_type, EntityType::Variable);
    }

    #[tokio::test]
    async fn test_configures_edge_to_code_entity() {
        let store = memory_store().await;
        store
            .upsert_entity(&EntityDraft::new(
                EntityType::Class,
                "server",
                "src/server.rs::server",
            ))
            .await
            .unwrap();

        let out = ingest(
            &store,
            DataFormat::Toml,
            "config.toml",
            "[server]\nport = 1",
            serde_json::json!({}),
        )
        .await
        .unwrap();

        assert!(out.relationships_created >= 2);
        assert_eq!(
            store
                .count_relationships(Some(RelationKind::Configures))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_package_json_dependencies_and_scripts() {
        let store = memory_store().await;
        let source = r#"{
            "name": "demo",
            "dependencies": {"react": "^18.0.0"},
            "devDependencies": {"vitest": "^1.0.0"},
            "scripts": {"build": "tsc -p ."}
        }"#;
        let out = ingest(&store, DataFormat::Json, "package.json", source, serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(out.entities_created, 4); // doc + 2 technologies + 1 task
        assert_eq!(
            store.count_entities(Some(EntityType::Technology)).await.unwrap(),
            2
        );
        assert_eq!(store.count_entities(Some(EntityType::Task)).await.unwrap(), 1);
        assert_eq!(
            store.count_relationships(Some(RelationKind::DependsOn)).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_malformed_json_is_parse_failure() {
        let store = memory_store().await;
        let err = ingest(&store, DataFormat::Json, "bad.json", "{nope", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad.json"));
    }
}
