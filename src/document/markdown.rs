//! Markdown document pipeline.
//!
//! Parses a markdown file into a heading tree, code blocks, and links
//! (pulldown-cmark), then emits the document entity, chunked section
//! entities, requirement entities, and their `CONTAINS`/`RELATES_TO`
//! edges. YAML front matter is honored for the document title.

use anyhow::Result;
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use std::collections::HashMap;

use crate::document::chunker::{chunk_section, ChunkPolicy};
use crate::document::requirements;
use crate::document::{slugify, PipelineOutput};
use crate::models::{EntityDraft, EntityType, RelationKind};
use crate::store::Store;

/// A heading-delimited section of the document.
#[derive(Debug, Clone)]
pub struct ParsedSection {
    pub title: String,
    pub level: u8,
    /// Text between this heading and the next heading of any level.
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    /// Index of the nearest shallower ancestor in the section list.
    pub parent: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ParsedCodeBlock {
    pub language: Option<String>,
    pub content: String,
    /// Index of the owning section, when the block sits under a heading.
    pub section: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ParsedLink {
    pub text: String,
    pub url: String,
    /// Links that do not start with `http://`/`https://`.
    pub internal: bool,
}

#[derive(Debug, Clone)]
pub struct MarkdownDocument {
    /// Front-matter `title` wins over the first H1.
    pub title: Option<String>,
    pub front_matter: Option<serde_yaml::Value>,
    pub sections: Vec<ParsedSection>,
    pub code_blocks: Vec<ParsedCodeBlock>,
    pub links: Vec<ParsedLink>,
}

/// Parse markdown into sections, code blocks, and links.
pub fn parse_markdown(source: &str) -> MarkdownDocument {
    let (front_matter, body, line_offset) = split_front_matter(source);

    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(body.match_indices('\n').map(|(i, _)| i + 1))
        .collect();
    let line_of = |offset: usize| -> usize {
        line_offset + line_starts.partition_point(|&s| s <= offset)
    };

    struct RawHeading {
        level: u8,
        text: String,
        span: std::ops::Range<usize>,
    }

    let mut headings: Vec<RawHeading> = Vec::new();
    let mut code_blocks: Vec<(Option<String>, String, usize)> = Vec::new();
    let mut links: Vec<ParsedLink> = Vec::new();

    let mut heading_buf: Option<(u8, String, std::ops::Range<usize>)> = None;
    let mut code_buf: Option<(Option<String>, String, usize)> = None;
    let mut link_buf: Option<(String, String)> = None;

    let parser = Parser::new_ext(body, Options::empty());
    for (event, range) in parser.into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                heading_buf = Some((level as u8, String::new(), range));
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((level, text, span)) = heading_buf.take() {
                    headings.push(RawHeading { level, text, span });
                }
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                let language = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .filter(|s| !s.is_empty())
                        .map(|s| s.to_string()),
                    CodeBlockKind::Indented => None,
                };
                code_buf = Some((language, String::new(), range.start));
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some((language, content, offset)) = code_buf.take() {
                    code_blocks.push((language, content, offset));
                }
            }
            Event::Start(Tag::Link { dest_url, .. }) => {
                link_buf = Some((String::new(), dest_url.to_string()));
            }
            Event::End(TagEnd::Link) => {
                if let Some((text, url)) = link_buf.take() {
                    let internal =
                        !(url.starts_with("http://") || url.starts_with("https://"));
                    links.push(ParsedLink {
                        text,
                        url,
                        internal,
                    });
                }
            }
            Event::Text(t) | Event::Code(t) => {
                if let Some((_, buf, _)) = heading_buf.as_mut() {
                    buf.push_str(&t);
                }
                if let Some((buf, _)) = link_buf.as_mut() {
                    buf.push_str(&t);
                }
                if let Some((_, buf, _)) = code_buf.as_mut() {
                    buf.push_str(&t);
                }
            }
            _ => {}
        }
    }

    // Build the section tree: content runs to the next heading of any
    // level; the parent is the nearest shallower ancestor, so same-level
    // headings become siblings under it.
    let mut sections: Vec<ParsedSection> = Vec::with_capacity(headings.len());
    let mut stack: Vec<(u8, usize)> = Vec::new();
    for (i, h) in headings.iter().enumerate() {
        let content_start = h.span.end.min(body.len());
        let content_end = headings
            .get(i + 1)
            .map(|next| next.span.start)
            .unwrap_or(body.len());
        let content = body[content_start..content_end.max(content_start)]
            .trim()
            .to_string();

        while stack.last().is_some_and(|(level, _)| *level >= h.level) {
            stack.pop();
        }
        let parent = stack.last().map(|(_, idx)| *idx);
        stack.push((h.level, sections.len()));

        sections.push(ParsedSection {
            title: h.text.trim().to_string(),
            level: h.level,
            content,
            start_line: line_of(h.span.start),
            end_line: line_of(content_end.saturating_sub(1).max(h.span.start)),
            parent,
        });
    }

    let section_of = |offset: usize| -> Option<usize> {
        let mut owner = None;
        for (i, h) in headings.iter().enumerate() {
            if h.span.start <= offset {
                owner = Some(i);
            } else {
                break;
            }
        }
        owner
    };

    let code_blocks = code_blocks
        .into_iter()
        .map(|(language, content, offset)| ParsedCodeBlock {
            language,
            content,
            section: section_of(offset),
        })
        .collect();

    let fm_title = front_matter.as_ref().and_then(|fm| {
        fm.get("title")
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
    });
    let h1_title = sections
        .iter()
        .find(|s| s.level == 1)
        .map(|s| s.title.clone());

    MarkdownDocument {
        title: fm_title.or(h1_title),
        front_matter,
        sections,
        code_blocks,
        links,
    }
}

/// Strip a leading `---` YAML front-matter block. Returns the parsed
/// value, the remaining body, and the number of lines consumed.
fn split_front_matter(source: &str) -> (Option<serde_yaml::Value>, &str, usize) {
    let rest = match source.strip_prefix("---\n").or_else(|| source.strip_prefix("---\r\n")) {
        Some(rest) => rest,
        None => return (None, source, 0),
    };

    for marker in ["\n---\n", "\n---\r\n"] {
        if let Some(end) = rest.find(marker) {
            let raw = &rest[..end];
            let body = &rest[end + marker.len()..];
            let consumed = source.len() - body.len();
            let lines = source[..consumed].matches('\n').count();
            let value = serde_yaml::from_str(raw).ok();
            return (value, body, lines);
        }
    }
    (None, source, 0)
}

/// Ingest a markdown file: document entity, chunked sections, requirements,
/// and internal-link edges. Code references are returned for the shared
/// document-code linker.
pub async fn ingest(
    store: &Store,
    policy: &ChunkPolicy,
    rel_path: &str,
    source: &str,
    base_metadata: serde_json::Value,
) -> Result<PipelineOutput> {
    let parsed = parse_markdown(source);
    let mut out = PipelineOutput::default();

    let file_stem = std::path::Path::new(rel_path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| rel_path.to_string());
    let title = parsed.title.clone().unwrap_or(file_stem);

    let mut doc_metadata = base_metadata;
    if let Some(obj) = doc_metadata.as_object_mut() {
        obj.insert("docType".into(), serde_json::json!("markdown"));
        if let Some(fm) = &parsed.front_matter {
            if let Ok(fm_json) = serde_json::to_value(fm) {
                obj.insert("frontMatter".into(), fm_json);
            }
        }
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
    out.embeddable.push((doc.id.clone(), clipped(source)));

    // Sections, chunked before upsert. Entity ids per section index let
    // child sections and requirements attach to their parents.
    let mut section_entity_ids: Vec<Option<String>> = vec![None; parsed.sections.len()];
    let mut slug_counts: HashMap<String, usize> = HashMap::new();

    for (i, section) in parsed.sections.iter().enumerate() {
        let mut slug = slugify(&section.title);
        let n = slug_counts.entry(slug.clone()).or_insert(0);
        *n += 1;
        if *n > 1 {
            slug = format!("{}-{}", slug, n);
        }
        let section_qn = format!("{}::{}", rel_path, slug);

        let chunks = chunk_section(&section_qn, &section.content, policy);
        let mut first_chunk_id: Option<String> = None;

        for chunk in &chunks {
            let draft = EntityDraft::new(EntityType::Section, &section.title, &chunk.id)
                .with_content(&chunk.content)
                .with_file(rel_path)
                .with_lines(section.start_line as i64, section.end_line as i64)
                .with_metadata(serde_json::json!({
                    "level": section.level,
                    "chunkIndex": chunk.index,
                }));
            let entity = store.upsert_entity(&draft).await?;
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

        // Parent edge: document for top-level sections, otherwise the
        // nearest shallower section.
        let parent_id = match section.parent {
            Some(p) => section_entity_ids[p].clone().unwrap_or(doc.id.clone()),
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
        section_entity_ids[i] = Some(section_id.clone());

        // Requirements under curated headings, plus user stories anywhere.
        let mut reqs = requirements::extract_from_section(&section.title, &section.content);
        for story in requirements::extract_user_stories(&section.content) {
            if !reqs
                .iter()
                .any(|r| r.description.to_lowercase() == story.description.to_lowercase())
            {
                reqs.push(story);
            }
        }

        for (ri, req) in reqs.iter().enumerate() {
            let req_qn = format!("{}::req-{}", section_qn, ri + 1);
            let entity = store
                .upsert_entity(
                    &EntityDraft::new(EntityType::Requirement, &req.description, &req_qn)
                        .with_content(&req.description)
                        .with_file(rel_path)
                        .with_metadata(serde_json::json!({
                            "priority": req.priority.as_str(),
                            "requirementType": req.kind.as_str(),
                            "acceptanceCriteria": req.acceptance,
                        })),
                )
                .await?;
            out.entities_created += 1;
            out.embeddable
                .push((entity.id.clone(), req.description.clone()));
            store
                .upsert_relationship(
                    &section_id,
                    &entity.id,
                    RelationKind::Contains,
                    1.0,
                    serde_json::json!({}),
                )
                .await?;
            out.relationships_created += 1;
        }
    }

    // Internal links become RELATES_TO edges to already-indexed documents.
    for link in parsed.links.iter().filter(|l| l.internal) {
        let target_path = resolve_relative(rel_path, &link.url);
        match store.get_by_qualified_name(&target_path).await? {
            Some(target) if target.id != doc.id => {
                store
                    .upsert_relationship(
                        &doc.id,
                        &target.id,
                        RelationKind::RelatesTo,
                        1.0,
                        serde_json::json!({"linkText": link.text}),
                    )
                    .await?;
                out.relationships_created += 1;
            }
            Some(_) => {}
            None => out.unresolved_refs.push(link.url.clone()),
        }
    }

    // Text for the shared document-code linker: prose at full weight,
    // fenced code at reduced weight.
    out.linkable_prose = parsed
        .sections
        .iter()
        .map(|s| strip_fences(&s.content))
        .collect::<Vec<_>>()
        .join("\n");
    out.linkable_code = parsed
        .code_blocks
        .iter()
        .map(|c| c.content.clone())
        .collect::<Vec<_>>()
        .join("\n");

    Ok(out)
}

/// Remove fenced code blocks from section prose so the linker does not
/// double-count their references at full weight.
fn strip_fences(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut in_fence = false;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Resolve a relative link target against the linking document's directory.
fn resolve_relative(doc_path: &str, url: &str) -> String {
    let url = url.split('#').next().unwrap_or(url);
    let base = std::path::Path::new(doc_path)
        .parent()
        .unwrap_or_else(|| std::path::Path::new(""));
    let base_str = base.to_string_lossy();
    let mut parts: Vec<&str> = base_str.split('/').filter(|p| !p.is_empty()).collect();
    for seg in url.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn clipped(text: &str) -> String {
    text.chars().take(4000).collect()
}
