//! HTML document pipeline.
//!
//! Strips `<script>`, `<style>`, and comments, then extracts an
//! `<h1>..<h6>` section tree over the remaining text. Tag soup is
//! tolerated: extraction is regex-driven rather than DOM-driven.

use anyhow::Result;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::document::chunker::{chunk_section, ChunkPolicy};
use crate::document::{slugify, PipelineOutput};
use crate::models::{EntityDraft, EntityType, RelationKind};
use crate::store::Store;

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").unwrap());
static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style>").unwrap());
static HTML_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static HEADING_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]>").unwrap());
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static TITLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

#[derive(Debug, Clone)]
pub struct HtmlSection {
    pub title: String,
    pub level: u8,
    pub content: String,
    pub parent: Option<usize>,
}

/// Extract the section tree from cleaned HTML.
pub fn parse_html(source: &str) -> (Option<String>, Vec<HtmlSection>) {
    let cleaned = HTML_COMMENT.replace_all(source, "");
    let cleaned = SCRIPT_BLOCK.replace_all(&cleaned, "");
    let cleaned = STYLE_BLOCK.replace_all(&cleaned, "");

    let title = TITLE_TAG
        .captures(&cleaned)
        .map(|c| strip_tags(c.get(1).unwrap().as_str()).trim().to_string())
        .filter(|t| !t.is_empty());

    struct RawHeading {
        level: u8,
        title: String,
        end: usize,
    }

    let headings: Vec<RawHeading> = HEADING_TAG
        .captures_iter(&cleaned)
        .map(|caps| {
            let m = caps.get(0).unwrap();
            RawHeading {
                level: caps.get(1).unwrap().as_str().parse().unwrap_or(1),
                title: strip_tags(caps.get(2).unwrap().as_str()).trim().to_string(),
                end: m.end(),
            }
        })
        .collect();

    let heading_starts: Vec<usize> = HEADING_TAG
        .find_iter(&cleaned)
        .map(|m| m.start())
        .collect();

    let mut sections = Vec::with_capacity(headings.len());
    let mut stack: Vec<(u8, usize)> = Vec::new();
    for (i, h) in headings.iter().enumerate() {
        let content_end = heading_starts.get(i + 1).copied().unwrap_or(cleaned.len());
        let raw = &cleaned[h.end..content_end.max(h.end)];
        let content = strip_tags(raw).trim().to_string();

        while stack.last().is_some_and(|(level, _)| *level >= h.level) {
            stack.pop();
        }
        let parent = stack.last().map(|(_, idx)| *idx);
        stack.push((h.level, sections.len()));

        sections.push(HtmlSection {
            title: h.title.clone(),
            level: h.level,
            content,
            parent,
        });
    }

    (title, sections)
}

fn strip_tags(html: &str) -> String {
    let text = ANY_TAG.replace_all(html, " ");
    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    collapse_whitespace(&text)
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for c in text.chars() {
        if c == '\n' {
            out.push(c);
            last_space = true;
        } else if c.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out
}

pub async fn ingest(
    store: &Store,
    policy: &ChunkPolicy,
    rel_path: &str,
    source: &str,
    base_metadata: serde_json::Value,
) -> Result<PipelineOutput> {
    let (title, sections) = parse_html(source);
    let mut out = PipelineOutput::default();

    let file_stem = std::path::Path::new(rel_path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| rel_path.to_string());
    let title = title
        .or_else(|| sections.iter().find(|s| s.level == 1).map(|s| s.title.clone()))
        .unwrap_or(file_stem);

    let mut doc_metadata = base_metadata;
    if let Some(obj) = doc_metadata.as_object_mut() {
        obj.insert("docType".into(), serde_json::json!("html"));
    }

    let doc = store
        .upsert_entity(
            &EntityDraft::new(EntityType::Document, &title, rel_path)
                .with_content(source)
                .with_file(rel_path)
                .with_metadata(doc_metadata),
        )
        .await?;
    out.document_id = doc.id.clone();
    out.entities_created += 1;

    let mut section_ids: Vec<Option<String>> = vec![None; sections.len()];
    let mut slug_counts: HashMap<String, usize> = HashMap::new();
    let mut prose_parts = Vec::with_capacity(sections.len());

    for (i, section) in sections.iter().enumerate() {
        let mut slug = slugify(&section.title);
        let n = slug_counts.entry(slug.clone()).or_insert(0);
        *n += 1;
        if *n > 1 {
            slug = format!("{}-{}", slug, n);
        }
        let section_qn = format!("{}::{}", rel_path, slug);

        let chunks = chunk_section(&section_qn, &section.content, policy);
        let mut first_chunk_id = None;
        for chunk in &chunks {
            let entity = store
                .upsert_entity(
                    &EntityDraft::new(EntityType::Section, &section.title, &chunk.id)
                        .with_content(&chunk.content)
                        .with_file(rel_path)
                        .with_metadata(serde_json::json!({
                            "level": section.level,
                            "chunkIndex": chunk.index,
                        })),
                )
                .await?;
            out.entities_created += 1;
            out.embeddable.push((entity.id.clone(), chunk.content.clone()));
            if chunk.index == 0 {
                first_chunk_id = Some(entity.id.clone());
            } else if let Some(head) = &first_chunk_id {
                store
                    .upsert_relationship(
                        head,
                        &entity.id,
                        RelationKind::Contains,
                        1.0,
                        serde_json::json!({"chunk": true}),
                    )
                    .await?;
                out.relationships_created += 1;
            }
        }

        let section_id = first_chunk_id.expect("chunker returns at least one chunk");
        let parent_id = match section.parent {
            Some(p) => section_ids[p].clone().unwrap_or(doc.id.clone()),
            None => doc.id.clone(),
        };
        store
            .upsert_relationship(
                &parent_id,
                &section_id,
                RelationKind::Contains,
                1.0,
                serde_json::json!({}),
            )
            .await?;
        out.relationships_created += 1;
        section_ids[i] = Some(section_id);
        prose_parts.push(section.content.clone());
    }

    out.linkable_prose = prose_parts.join("\n");
    Ok(out)
}
