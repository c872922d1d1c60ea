//! Token-budgeted context assembly.
//!
//! Walks fused search results in score order, formats each entity in the
//! requested format (markdown, xml, or plain), and stops before the token
//! budget would be exceeded. Optional grouping buckets entities into
//! code / documentation / conversation / other blocks with group headers.

use serde::Serialize;

use crate::models::{Entity, EntityType};
use crate::retrieval::FusedResult;

/// Truncation cap for embedded code content, in characters.
const CODE_CONTENT_LIMIT: usize = 500;
/// Cap on appended source references.
const MAX_SOURCE_REFS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextFormat {
    Markdown,
    Xml,
    Plain,
}

impl ContextFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "markdown" => Some(Self::Markdown),
            "xml" => Some(Self::Xml),
            "plain" => Some(Self::Plain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub max_tokens: usize,
    pub format: ContextFormat,
    pub include_sources: bool,
    pub include_code_content: bool,
    pub group_by_type: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            format: ContextFormat::Markdown,
            include_sources: true,
            include_code_content: true,
            group_by_type: true,
        }
    }
}

impl ContextOptions {
    pub fn from_config(config: &crate::config::ContextConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            format: ContextFormat::parse(&config.format).unwrap_or(ContextFormat::Markdown),
            include_sources: config.include_sources,
            include_code_content: config.include_code_content,
            group_by_type: config.group_by_type,
        }
    }
}

/// One source reference in the assembled output.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub entity_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub file: Option<String>,
    pub line: Option<i64>,
    pub relevance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    pub context: String,
    /// Included entities, in emission order.
    pub sources: Vec<SourceRef>,
    #[serde(rename = "tokenCount")]
    pub token_count: usize,
    pub truncated: bool,
    pub summary: Option<String>,
}

/// `ceil(len / 4)` with partial tokens rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Grouping bucket for an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Code,
    Documentation,
    Conversation,
    Other,
}

fn bucket_of(entity_type: EntityType) -> Bucket {
    if entity_type.is_code() {
        Bucket::Code
    } else if entity_type.is_documentation() {
        Bucket::Documentation
    } else if entity_type.is_conversation() {
        Bucket::Conversation
    } else {
        Bucket::Other
    }
}

fn group_header(bucket: Bucket, format: ContextFormat) -> String {
    let title = match bucket {
        Bucket::Code => "Relevant Code",
        Bucket::Documentation => "Related Documentation",
        Bucket::Conversation => "Previous Conversations",
        Bucket::Other => "Other Context",
    };
    match format {
        ContextFormat::Markdown => format!("## {}\n\n", title),
        ContextFormat::Xml => format!("<group name=\"{}\">\n", xml_escape(title)),
        ContextFormat::Plain => format!("=== {} ===\n\n", title),
    }
}

/// Assemble context from fused results under the token budget.
pub fn assemble(results: &[FusedResult], options: &ContextOptions) -> AssembledContext {
    let ordered: Vec<&FusedResult> = if options.group_by_type {
        let mut grouped: Vec<&FusedResult> = Vec::with_capacity(results.len());
        for bucket in [
            Bucket::Code,
            Bucket::Documentation,
            Bucket::Conversation,
            Bucket::Other,
        ] {
            grouped.extend(
                results
                    .iter()
                    .filter(|r| bucket_of(r.entity.entity_type) == bucket),
            );
        }
        grouped
    } else {
        results.iter().collect()
    };

    let mut context = String::new();
    let mut sources = Vec::new();
    let mut token_count = 0usize;
    let mut truncated = false;
    let mut open_bucket: Option<Bucket> = None;

    // Accepting any block in XML group mode leaves a group open, so the
    // trailing `</group>` is already owed; reserve it in the budget check.
    let group_closer = "</group>\n";
    let closer_reserve = if options.group_by_type && options.format == ContextFormat::Xml {
        estimate_tokens(group_closer)
    } else {
        0
    };

    for result in ordered {
        let bucket = bucket_of(result.entity.entity_type);
        let mut block = String::new();

        if options.group_by_type && open_bucket != Some(bucket) {
            if options.format == ContextFormat::Xml {
                if open_bucket.is_some() {
                    block.push_str(group_closer);
                }
            }
            block.push_str(&group_header(bucket, options.format));
        }
        block.push_str(&format_entity(&result.entity, result.score, options));

        let block_tokens = estimate_tokens(&block);
        if token_count + block_tokens + closer_reserve > options.max_tokens {
            truncated = true;
            break;
        }

        context.push_str(&block);
        token_count += block_tokens;
        open_bucket = Some(bucket);

        sources.push(SourceRef {
            entity_id: result.entity.id.clone(),
            name: result.entity.name.clone(),
            entity_type: result.entity.entity_type.as_str().to_string(),
            file: result.entity.file_path.clone(),
            line: result.entity.start_line,
            relevance: result.score,
        });
    }

    if options.group_by_type
        && options.format == ContextFormat::Xml
        && open_bucket.is_some()
    {
        context.push_str(group_closer);
        token_count += estimate_tokens(group_closer);
    }

    if options.include_sources && !sources.is_empty() {
        let refs = format_source_refs(&sources, options.format);
        let ref_tokens = estimate_tokens(&refs);
        if token_count + ref_tokens <= options.max_tokens {
            context.push_str(&refs);
            token_count += ref_tokens;
        }
    }

    let summary = Some(format!(
        "{} of {} results included{}",
        sources.len(),
        results.len(),
        if truncated { " (budget reached)" } else { "" }
    ));

    AssembledContext {
        context,
        sources,
        token_count,
        truncated,
        summary,
    }
}

fn format_entity(entity: &Entity, relevance: f64, options: &ContextOptions) -> String {
    match options.format {
        ContextFormat::Markdown => format_markdown(entity, options),
        ContextFormat::Xml => format_xml(entity, relevance, options),
        ContextFormat::Plain => format_plain(entity, options),
    }
}

fn entity_body(entity: &Entity, options: &ContextOptions) -> Option<String> {
    let content = entity.content.as_deref()?;
    if content.trim().is_empty() {
        return None;
    }
    if entity.entity_type.is_code() {
        if !options.include_code_content {
            return None;
        }
        if content.len() > CODE_CONTENT_LIMIT {
            let clipped: String = content.chars().take(CODE_CONTENT_LIMIT).collect();
            return Some(format!("{}\n// ... (truncated)", clipped));
        }
    }
    Some(content.to_string())
}

fn format_markdown(entity: &Entity, options: &ContextOptions) -> String {
    let mut block = format!("### {} (`{}`)\n", entity.name, entity.qualified_name);
    if let Some(file) = &entity.file_path {
        match entity.start_line {
            Some(line) => block.push_str(&format!("File: {}:{}\n", file, line)),
            None => block.push_str(&format!("File: {}\n", file)),
        }
    }
    if let Some(summary) = &entity.summary {
        block.push_str(summary);
        block.push('\n');
    }
    if let Some(body) = entity_body(entity, options) {
        if entity.entity_type.is_code() {
            let lang = fence_language(entity.file_path.as_deref());
            block.push_str(&format!("```{}\n{}\n```\n", lang, body));
        } else {
            block.push_str(&body);
            block.push('\n');
        }
    }
    block.push('\n');
    block
}

fn format_xml(entity: &Entity, relevance: f64, options: &ContextOptions) -> String {
    let mut block = format!(
        "<entity id=\"{}\" type=\"{}\" name=\"{}\" relevance=\"{:.4}\">\n",
        xml_escape(&entity.id),
        entity.entity_type.as_str(),
        xml_escape(&entity.name),
        relevance
    );
    if let Some(file) = &entity.file_path {
        block.push_str(&format!("  <file>{}</file>\n", xml_escape(file)));
    }
    if let Some(body) = entity_body(entity, options) {
        block.push_str(&format!("  <content>{}</content>\n", xml_escape(&body)));
    }
    block.push_str("</entity>\n");
    block
}

fn format_plain(entity: &Entity, options: &ContextOptions) -> String {
    let mut block = format!(
        "{} [{}] {}\n",
        entity.name,
        entity.entity_type.as_str(),
        entity.qualified_name
    );
    if let Some(file) = &entity.file_path {
        block.push_str(&format!("  at {}\n", file));
    }
    if let Some(body) = entity_body(entity, options) {
        block.push_str(&body);
        block.push('\n');
    }
    block.push('\n');
    block
}

fn format_source_refs(sources: &[SourceRef], format: ContextFormat) -> String {
    let shown = &sources[..sources.len().min(MAX_SOURCE_REFS)];
    match format {
        ContextFormat::Markdown => {
            let mut out = String::from("## Sources\n\n");
            for (i, s) in shown.iter().enumerate() {
                let location = match (&s.file, s.line) {
                    (Some(f), Some(l)) => format!(" — {}:{}", f, l),
                    (Some(f), None) => format!(" — {}", f),
                    _ => String::new(),
                };
                out.push_str(&format!("{}. {} ({}){}\n", i + 1, s.name, s.entity_type, location));
            }
            out
        }
        ContextFormat::Xml => {
            let mut out = String::from("<sources>\n");
            for s in shown {
                out.push_str(&format!(
                    "  <source id=\"{}\" name=\"{}\" type=\"{}\"/>\n",
                    xml_escape(&s.entity_id),
                    xml_escape(&s.name),
                    s.entity_type
                ));
            }
            out.push_str("</sources>\n");
            out
        }
        ContextFormat::Plain => {
            let mut out = String::from("Sources:\n");
            for s in shown {
                out.push_str(&format!("- {} ({})\n", s.name, s.entity_type));
            }
            out
        }
    }
}

/// Code-fence language from a file extension.
fn fence_language(file_path: Option<&str>) -> &'static str {
    let ext = file_path
        .and_then(|p| std::path::Path::new(p).extension())
        .and_then(|e| e.to_str())
        .unwrap_or("");
    match ext {
        "rs" => "rust",
        "py" => "python",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "go" => "go",
        "java" => "java",
        "rb" => "ruby",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" => "cpp",
        "sh" => "bash",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        _ => "",
    }
}

/// Escape `& < > "` for XML output.
pub fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchSource as Src;
    use chrono::Utc;

    fn entity(name: &str, entity_type: EntityType, content: Option<&str>) -> Entity {
        Entity {
            id: format!("id-{}", name),
            project_id: "p".into(),
            entity_type,
            name: name.to_string(),
            qualified_name: format!("q::{}", name),
            content: content.map(String::from),
            summary: None,
            file_path: Some("src/a.rs".into()),
            start_line: Some(1),
            end_line: Some(10),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn fused(name: &str, entity_type: EntityType, content: Option<&str>, score: f64) -> FusedResult {
        FusedResult {
            entity: entity(name, entity_type, content),
            score,
            sources: vec![Src::Keyword],
        }
    }

    #[test]
    fn test_token_estimator_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_budget_never_exceeded() {
        let results = vec![
            fused("a", EntityType::Function, Some("fn a() {}"), 1.0),
            fused("b", EntityType::Function, Some("fn b() {}"), 0.9),
        ];
        let options = ContextOptions {
            max_tokens: 25,
            include_sources: false,
            ..Default::default()
        };
        let assembled = assemble(&results, &options);
        assert!(assembled.token_count <= 25);
        assert!(assembled.truncated);
        assert_eq!(assembled.sources.len(), 1);
    }

    #[test]
    fn test_budget_never_exceeded_xml_group_closer() {
        // The XML `</group>` closer emitted after the walk must be covered
        // by the budget too. Measure the exact cost of the assembly, then
        // probe budgets at and just below the boundary.
        let results = vec![
            fused("a", EntityType::Function, Some("fn a() {}"), 1.0),
            fused("doc", EntityType::Section, Some("prose about a"), 0.9),
        ];
        let options = ContextOptions {
            max_tokens: 100_000,
            format: ContextFormat::Xml,
            group_by_type: true,
            include_sources: false,
            ..Default::default()
        };
        let full = assemble(&results, &options);
        assert!(!full.truncated);
        let exact = full.token_count;

        for budget in exact.saturating_sub(4)..=exact + 1 {
            let assembled = assemble(
                &results,
                &ContextOptions {
                    max_tokens: budget,
                    ..options.clone()
                },
            );
            assert!(
                assembled.token_count <= budget,
                "token_count {} exceeds budget {}",
                assembled.token_count,
                budget
            );
            assert_eq!(assembled.truncated, budget < exact);
        }

        // At the exact boundary everything fits, closer included.
        let at_boundary = assemble(
            &results,
            &ContextOptions {
                max_tokens: exact,
                ..options.clone()
            },
        );
        assert_eq!(at_boundary.token_count, exact);
        assert_eq!(at_boundary.sources.len(), 2);
        assert!(at_boundary.context.ends_with("</group>\n"));
    }

    #[test]
    fn test_zero_budget() {
        let results = vec![fused("a", EntityType::Function, Some("fn a() {}"), 1.0)];
        let options = ContextOptions {
            max_tokens: 0,
            ..Default::default()
        };
        let assembled = assemble(&results, &options);
        assert_eq!(assembled.token_count, 0);
        assert!(assembled.sources.is_empty());
        assert!(assembled.truncated);
    }

    #[test]
    fn test_truncated_iff_candidate_skipped() {
        let results = vec![fused("a", EntityType::Function, Some("fn a() {}"), 1.0)];
        let options = ContextOptions {
            max_tokens: 10_000,
            ..Default::default()
        };
        let assembled = assemble(&results, &options);
        assert!(!assembled.truncated);
        assert_eq!(assembled.sources.len(), 1);
    }

    #[test]
    fn test_group_headers_markdown() {
        let results = vec![
            fused("doc", EntityType::Section, Some("about the thing"), 1.0),
            fused("f", EntityType::Function, Some("fn f() {}"), 0.9),
        ];
        let assembled = assemble(&results, &ContextOptions::default());
        // Code group comes first regardless of fused order.
        let code_pos = assembled.context.find("## Relevant Code").unwrap();
        let docs_pos = assembled.context.find("## Related Documentation").unwrap();
        assert!(code_pos < docs_pos);
    }

    #[test]
    fn test_code_content_truncated_with_marker() {
        let long_code = "x".repeat(900);
        let results = vec![fused("f", EntityType::Function, Some(&long_code), 1.0)];
        let options = ContextOptions {
            max_tokens: 10_000,
            ..Default::default()
        };
        let assembled = assemble(&results, &options);
        assert!(assembled.context.contains("// ... (truncated)"));
    }

    #[test]
    fn test_xml_escaping() {
        let results = vec![fused(
            "f",
            EntityType::Section,
            Some("a < b && c > \"d\""),
            1.0,
        )];
        let options = ContextOptions {
            format: ContextFormat::Xml,
            group_by_type: false,
            include_sources: false,
            ..Default::default()
        };
        let assembled = assemble(&results, &options);
        assert!(assembled.context.contains("a &lt; b &amp;&amp; c &gt; &quot;d&quot;"));
        assert!(!assembled.context.contains("&&"));
    }

    #[test]
    fn test_sources_preserve_order_and_cap() {
        let results: Vec<FusedResult> = (0..15)
            .map(|i| {
                fused(
                    &format!("f{:02}", i),
                    EntityType::Function,
                    None,
                    1.0 - i as f64 * 0.01,
                )
            })
            .collect();
        let options = ContextOptions {
            max_tokens: 100_000,
            ..Default::default()
        };
        let assembled = assemble(&results, &options);
        assert_eq!(assembled.sources.len(), 15);
        assert_eq!(assembled.sources[0].name, "f00");
        // At most 10 in the rendered reference list.
        assert!(!assembled.context.contains("11. "));
    }

    #[test]
    fn test_markdown_fence_language() {
        let results = vec![fused("f", EntityType::Function, Some("fn x() {}"), 1.0)];
        let assembled = assemble(&results, &ContextOptions::default());
        assert!(assembled.context.contains("```rust"));
    }
}
