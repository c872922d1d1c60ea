//! Document ingestion pipelines.
//!
//! A dispatcher selects the pipeline by file extension; every pipeline
//! produces one top-level `document` entity plus format-specific children,
//! then the shared document-code linker resolves code references into
//! `DOCUMENTS` edges.
//!
//! | Extension | Pipeline | Children |
//! |-----------|----------|----------|
//! | `.md` `.markdown` | [`markdown`] | sections, requirements, code blocks |
//! | `.yaml` `.yml` `.json` `.toml` | [`data`] | components, variables, technologies |
//! | `.html` `.htm` | [`html`] | sections |
//! | `.csv` | [`csv_file`] | column variables |
//! | `.xml` | [`xml`] | sections, Maven technologies |
//! | `.pdf` | [`pdf`] | per-page sections |
//! | anything else | [`text`] | content chunks |

pub mod chunker;
pub mod csv_file;
pub mod data;
pub mod html;
pub mod linker;
pub mod markdown;
pub mod pdf;
pub mod requirements;
pub mod text;
pub mod xml;

use anyhow::Result;

use crate::document::chunker::ChunkPolicy;
use crate::store::Store;

/// Pipeline selected for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocFormat {
    Markdown,
    Yaml,
    Json,
    Toml,
    Html,
    Csv,
    Xml,
    Pdf,
    Text,
}

/// Map an extension to its pipeline. Unknown extensions fall back to the
/// plain-text pipeline; the indexer's allowlist decides what gets here.
pub fn detect_format(path: &str) -> DocFormat {
    let ext = std::path::Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "md" | "markdown" => DocFormat::Markdown,
        "yaml" | "yml" => DocFormat::Yaml,
        "json" => DocFormat::Json,
        "toml" => DocFormat::Toml,
        "html" | "htm" => DocFormat::Html,
        "csv" => DocFormat::Csv,
        "xml" => DocFormat::Xml,
        "pdf" => DocFormat::Pdf,
        _ => DocFormat::Text,
    }
}

/// What a single pipeline emitted, before linking.
#[derive(Debug, Default)]
pub struct PipelineOutput {
    pub document_id: String,
    pub entities_created: usize,
    pub relationships_created: usize,
    /// `(entity_id, text)` pairs for the embedding manager.
    pub embeddable: Vec<(String, String)>,
    /// Internal links that did not resolve to an indexed document.
    pub unresolved_refs: Vec<String>,
    /// Prose for the document-code linker, at full weight.
    pub linkable_prose: String,
    /// Code-block text for the linker, at reduced weight.
    pub linkable_code: String,
}

/// Result of a full document ingest (pipeline + linker).
#[derive(Debug, Default)]
pub struct DocumentIngestResult {
    pub document_id: String,
    pub entities_created: usize,
    pub relationships_created: usize,
    pub cross_doc_links: usize,
    pub embeddable: Vec<(String, String)>,
    pub unresolved_refs: Vec<String>,
}

/// Ingest one document: dispatch to the format pipeline, then run the
/// document-code linker over the text it reported.
pub async fn ingest_document(
    store: &Store,
    policy: &ChunkPolicy,
    rel_path: &str,
    bytes: &[u8],
    base_metadata: serde_json::Value,
) -> Result<DocumentIngestResult> {
    let format = detect_format(rel_path);

    let pipeline_out = match format {
        DocFormat::Pdf => pdf::ingest(store, rel_path, bytes, base_metadata).await?,
        _ => {
            let source = String::from_utf8_lossy(bytes);
            match format {
                DocFormat::Markdown => {
                    markdown::ingest(store, policy, rel_path, &source, base_metadata).await?
                }
                DocFormat::Yaml => {
                    data::ingest(store, data::DataFormat::Yaml, rel_path, &source, base_metadata)
                        .await?
                }
                DocFormat::Json => {
                    data::ingest(store, data::DataFormat::Json, rel_path, &source, base_metadata)
                        .await?
                }
                DocFormat::Toml => {
                    data::ingest(store, data::DataFormat::Toml, rel_path, &source, base_metadata)
                        .await?
                }
                DocFormat::Html => {
                    html::ingest(store, policy, rel_path, &source, base_metadata).await?
                }
                DocFormat::Csv => {
                    csv_file::ingest(store, rel_path, &source, base_metadata).await?
                }
                DocFormat::Xml => xml::ingest(store, rel_path, &source, base_metadata).await?,
                DocFormat::Text => {
                    text::ingest(store, policy, rel_path, &source, base_metadata).await?
                }
                DocFormat::Pdf => unreachable!("handled above"),
            }
        }
    };

    let references =
        linker::find_code_references(&pipeline_out.linkable_prose, &pipeline_out.linkable_code);
    let (links, mut link_unresolved) =
        linker::link_document(store, &pipeline_out.document_id, &references).await?;

    let mut unresolved = pipeline_out.unresolved_refs;
    unresolved.append(&mut link_unresolved);

    Ok(DocumentIngestResult {
        document_id: pipeline_out.document_id,
        entities_created: pipeline_out.entities_created,
        relationships_created: pipeline_out.relationships_created + links,
        cross_doc_links: links,
        embeddable: pipeline_out.embeddable,
        unresolved_refs: unresolved,
    })
}

/// Lowercase, alphanumeric-and-dash identifier for section slugs.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_dash = true;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "section".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format("README.md"), DocFormat::Markdown);
        assert_eq!(detect_format("ci.yml"), DocFormat::Yaml);
        assert_eq!(detect_format("package.json"), DocFormat::Json);
        assert_eq!(detect_format("Cargo.toml"), DocFormat::Toml);
        assert_eq!(detect_format("index.html"), DocFormat::Html);
        assert_eq!(detect_format("data.csv"), DocFormat::Csv);
        assert_eq!(detect_format("pom.xml"), DocFormat::Xml);
        assert_eq!(detect_format("paper.pdf"), DocFormat::Pdf);
        assert_eq!(detect_format("notes.txt"), DocFormat::Text);
        assert_eq!(detect_format("LICENSE"), DocFormat::Text);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Getting Started"), "getting-started");
        assert_eq!(slugify("  API / Reference!  "), "api-reference");
        assert_eq!(slugify("###"), "section");
    }
}
