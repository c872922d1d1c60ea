//! PDF document pipeline.
//!
//! Text extraction is external (`pdf-extract`); each page becomes a
//! `section` entity. Document info (title, author, subject, creator,
//! producer) is read from the PDF trailer when present.

use anyhow::Result;

use crate::document::PipelineOutput;
use crate::error::CoreError;
use crate::models::{EntityDraft, EntityType, RelationKind};
use crate::store::Store;

/// Metadata fields lifted from the PDF Info dictionary.
#[derive(Debug, Default, Clone)]
pub struct PdfInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
}

/// Read the Info dictionary. Failures degrade to empty metadata; a PDF
/// without an Info dict is not an error.
pub fn read_pdf_info(bytes: &[u8]) -> PdfInfo {
    let mut info = PdfInfo::default();
    let Ok(doc) = lopdf::Document::load_mem(bytes) else {
        return info;
    };
    let Ok(info_obj) = doc.trailer.get(b"Info") else {
        return info;
    };
    let dict = match info_obj {
        lopdf::Object::Reference(id) => match doc.get_object(*id) {
            Ok(lopdf::Object::Dictionary(d)) => d.clone(),
            _ => return info,
        },
        lopdf::Object::Dictionary(d) => d.clone(),
        _ => return info,
    };

    let read = |key: &[u8]| -> Option<String> {
        dict.get(key).ok().and_then(|obj| match obj {
            lopdf::Object::String(bytes, _) => {
                let text = String::from_utf8_lossy(bytes).trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            _ => None,
        })
    };

    info.title = read(b"Title");
    info.author = read(b"Author");
    info.subject = read(b"Subject");
    info.creator = read(b"Creator");
    info.producer = read(b"Producer");
    info
}

pub async fn ingest(
    store: &Store,
    rel_path: &str,
    bytes: &[u8],
    base_metadata: serde_json::Value,
) -> Result<PipelineOutput> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| CoreError::parse_failure(rel_path, e))?;
    let info = read_pdf_info(bytes);

    let mut out = PipelineOutput::default();
    let file_stem = std::path::Path::new(rel_path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| rel_path.to_string());
    let title = info.title.clone().unwrap_or(file_stem);

    let mut doc_metadata = base_metadata;
    if let Some(obj) = doc_metadata.as_object_mut() {
        obj.insert("docType".into(), serde_json::json!("pdf"));
        obj.insert("pageCount".into(), serde_json::json!(pages.len()));
        obj.insert(
            "pdfInfo".into(),
            serde_json::json!({
                "title": info.title,
                "author": info.author,
                "subject": info.subject,
                "creator": info.creator,
                "producer": info.producer,
            }),
        );
    }

    let full_text = pages.join("\n\n");
    let doc = store
        .upsert_entity(
            &EntityDraft::new(EntityType::Document, &title, rel_path)
                .with_content(&full_text)
                .with_file(rel_path)
                .with_metadata(doc_metadata),
        )
        .await?;
    out.document_id = doc.id.clone();
    out.entities_created += 1;

    for (i, page_text) in pages.iter().enumerate() {
        let page_no = i + 1;
        let qn = format!("{}::page-{}", rel_path, page_no);
        let entity = store
            .upsert_entity(
                &EntityDraft::new(EntityType::Section, &format!("Page {}", page_no), &qn)
                    .with_content(page_text)
                    .with_file(rel_path)
                    .with_metadata(serde_json::json!({"page": page_no})),
            )
            .await?;
        out.entities_created += 1;
        if !page_text.trim().is_empty() {
            out.embeddable.push((entity.id.clone(), page_text.clone()));
        }
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

    out.linkable_prose = full_text;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pdf_info_degrades_to_empty() {
        let info = read_pdf_info(b"not a pdf at all");
        assert!(info.title.is_none());
        assert!(info.author.is_none());
    }
}
