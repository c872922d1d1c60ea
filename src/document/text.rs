//! Plain-text document pipeline.
//!
//! One document entity, with the body chunked into `section` entities for
//! embedding. The fallback pipeline for any extension without a richer
//! parser.

use anyhow::Result;

use crate::document::chunker::{chunk_section, ChunkPolicy};
use crate::document::PipelineOutput;
use crate::models::{EntityDraft, EntityType, RelationKind};
use crate::store::Store;

pub async fn ingest(
    store: &Store,
    policy: &ChunkPolicy,
    rel_path: &str,
    source: &str,
    base_metadata: serde_json::Value,
) -> Result<PipelineOutput> {
    let mut out = PipelineOutput::default();
    let file_name = std::path::Path::new(rel_path)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| rel_path.to_string());

    let mut doc_metadata = base_metadata;
    if let Some(obj) = doc_metadata.as_object_mut() {
        obj.insert("docType".into(), serde_json::json!("text"));
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

    let body_qn = format!("{}::content", rel_path);
    for chunk in chunk_section(&body_qn, source.trim(), policy) {
        if chunk.content.trim().is_empty() {
            continue;
        }
        let entity = store
            .upsert_entity(
                &EntityDraft::new(EntityType::Section, &file_name, &chunk.id)
                    .with_content(&chunk.content)
                    .with_file(rel_path)
                    .with_metadata(serde_json::json!({"chunkIndex": chunk.index})),
            )
            .await?;
        out.entities_created += 1;
        out.embeddable.push((entity.id.clone(), chunk.content.clone()));
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

    out.linkable_prose = source.to_string();
    Ok(out)
}
