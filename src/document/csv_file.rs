//! CSV document pipeline.
//!
//! Header columns become `variable` entities under the document; the
//! document records row/column counts and a clipped sample of rows as
//! its content.

use anyhow::Result;

use crate::document::PipelineOutput;
use crate::error::CoreError;
use crate::models::{EntityDraft, EntityType, RelationKind};
use crate::store::Store;

/// Rows kept in the document content sample.
const SAMPLE_ROWS: usize = 20;

pub async fn ingest(
    store: &Store,
    rel_path: &str,
    source: &str,
    base_metadata: serde_json::Value,
) -> Result<PipelineOutput> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(source.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| CoreError::parse_failure(rel_path, e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut row_count = 0usize;
    let mut sample = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| CoreError::parse_failure(rel_path, e))?;
        row_count += 1;
        if row_count <= SAMPLE_ROWS {
            sample.push(record.iter().collect::<Vec<_>>().join(", "));
        }
    }

    let mut out = PipelineOutput::default();
    let file_name = std::path::Path::new(rel_path)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| rel_path.to_string());

    let mut doc_metadata = base_metadata;
    if let Some(obj) = doc_metadata.as_object_mut() {
        obj.insert("docType".into(), serde_json::json!("csv"));
        obj.insert("columns".into(), serde_json::json!(headers));
        obj.insert("rowCount".into(), serde_json::json!(row_count));
    }

    let content = format!("{}\n{}", headers.join(", "), sample.join("\n"));
    let doc = store
        .upsert_entity(
            &EntityDraft::new(EntityType::Document, &file_name, rel_path)
                .with_content(&content)
                .with_file(rel_path)
                .with_metadata(doc_metadata),
        )
        .await?;
    out.document_id = doc.id.clone();
    out.entities_created += 1;
    out.embeddable.push((doc.id.clone(), content));

    for (i, header) in headers.iter().enumerate().filter(|(_, h)| !h.is_empty()) {
        let qn = format!("{}::col-{}", rel_path, i);
        let entity = store
            .upsert_entity(
                &EntityDraft::new(EntityType::Variable, header, &qn)
                    .with_file(rel_path)
                    .with_metadata(serde_json::json!({"columnIndex": i})),
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
    }

    Ok(out)
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
    async fn test_headers_become_variables() {
        let store = memory_store().await;
        let csv_text = "name,age,city\nalice,30,berlin\nbob,25,tokyo\n";
        let out = ingest(&store, "people.csv", csv_text, serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(out.entities_created, 4); // doc + 3 columns
        let doc = store.get_entity(&out.document_id).await.unwrap().unwrap();
        assert_eq!(doc.metadata["rowCount"], serde_json::json!(2));
        assert_eq!(
            doc.metadata["columns"],
            serde_json::json!(["name", "age", "city"])
        );

        let col = store
            .get_by_qualified_name("people.csv::col-0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(col.entity_type, EntityType::Variable);
        assert_eq!(col.name, "name");
    }
}
