//! Natural-language query parsing.
//!
//! Maps a raw query to a [`ParsedQuery`]: normalized text, an intent from
//! a closed set, explicit entity mentions (backtick spans, dotted code
//! tokens, file paths), hinted entity types, and lightly synonym-expanded
//! terms. Entity mentions are kept verbatim — expansion never re-tokenizes
//! them.

use serde::Serialize;

use crate::models::EntityType;
use crate::patterns;

/// Query intent, inferred from leading interrogatives and verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    How,
    Why,
    Explain,
    What,
    Where,
    Find,
    List,
    Show,
    Debug,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::How => "how",
            Intent::Why => "why",
            Intent::Explain => "explain",
            Intent::What => "what",
            Intent::Where => "where",
            Intent::Find => "find",
            Intent::List => "list",
            Intent::Show => "show",
            Intent::Debug => "debug",
        }
    }
}

/// Structured form of a natural-language query.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedQuery {
    pub raw: String,
    pub normalized: String,
    pub intent: Intent,
    /// Code tokens mentioned verbatim: backtick spans, `Foo.bar`, `src/...`.
    pub entity_mentions: Vec<String>,
    /// Entity types hinted by vocabulary ("function", "class", "doc"...).
    pub entity_types_hinted: Vec<EntityType>,
    /// Query terms plus light synonym expansion.
    pub expanded_terms: Vec<String>,
}

/// Synonym pairs expanded in both directions.
const SYNONYMS: &[(&str, &str)] = &[
    ("function", "method"),
    ("class", "type"),
    ("config", "configuration"),
    ("doc", "document"),
    ("test", "spec"),
];

/// Parse a query. Empty input yields an empty `Find` query.
pub fn parse_query(raw: &str) -> ParsedQuery {
    let normalized = normalize(raw);
    let intent = detect_intent(&normalized);
    let entity_mentions = extract_mentions(raw);
    let entity_types_hinted = hint_types(&normalized);
    let expanded_terms = expand_terms(&normalized, &entity_mentions);

    ParsedQuery {
        raw: raw.to_string(),
        normalized,
        intent,
        entity_mentions,
        entity_types_hinted,
        expanded_terms,
    }
}

fn normalize(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn detect_intent(normalized: &str) -> Intent {
    let first = normalized.split_whitespace().next().unwrap_or("");
    match first {
        "how" => Intent::How,
        "why" => Intent::Why,
        "explain" | "describe" => Intent::Explain,
        "what" | "which" => Intent::What,
        "where" => Intent::Where,
        "find" | "search" | "locate" => Intent::Find,
        "list" | "enumerate" => Intent::List,
        "show" | "display" => Intent::Show,
        "debug" | "fix" | "troubleshoot" => Intent::Debug,
        _ => {
            if normalized.contains("error") || normalized.contains("broken") {
                Intent::Debug
            } else {
                Intent::Find
            }
        }
    }
}

/// Backticked spans and typical code tokens, preserved verbatim.
fn extract_mentions(raw: &str) -> Vec<String> {
    let mut mentions: Vec<String> = Vec::new();
    let mut push = |m: String| {
        if !mentions.contains(&m) {
            mentions.push(m);
        }
    };

    for caps in patterns::BACKTICK_TOKEN.captures_iter(raw) {
        push(caps.get(1).unwrap().as_str().to_string());
    }
    for m in patterns::CODE_FILE_PATH.find_iter(raw) {
        push(m.as_str().to_string());
    }
    for m in patterns::DOTTED_TOKEN.find_iter(raw) {
        push(m.as_str().to_string());
    }
    for m in patterns::PASCAL_CASE.find_iter(raw) {
        push(m.as_str().to_string());
    }
    for m in patterns::SCREAMING_CASE.find_iter(raw) {
        push(m.as_str().to_string());
    }
    mentions
}

fn hint_types(normalized: &str) -> Vec<EntityType> {
    let mut hints = Vec::new();
    let mut add = |t: EntityType| {
        if !hints.contains(&t) {
            hints.push(t);
        }
    };

    for word in normalized.split_whitespace() {
        match word {
            "function" | "functions" => add(EntityType::Function),
            "method" | "methods" => add(EntityType::Method),
            "class" | "classes" | "struct" | "structs" => add(EntityType::Class),
            "interface" | "interfaces" | "trait" | "traits" => add(EntityType::Interface),
            "file" | "files" => add(EntityType::File),
            "module" | "modules" => add(EntityType::Module),
            "document" | "documents" | "doc" | "docs" | "readme" => add(EntityType::Document),
            "requirement" | "requirements" => add(EntityType::Requirement),
            "decision" | "decisions" => add(EntityType::Decision),
            "variable" | "variables" | "constant" | "constants" => add(EntityType::Variable),
            _ => {}
        }
    }
    hints
}

/// Split the normalized query into terms and add synonym expansions.
/// Mentioned entities are excluded from re-tokenization.
fn expand_terms(normalized: &str, mentions: &[String]) -> Vec<String> {
    let lowered_mentions: Vec<String> = mentions.iter().map(|m| m.to_lowercase()).collect();
    let mut terms: Vec<String> = Vec::new();
    let mut add = |t: String| {
        if t.len() > 1 && !terms.contains(&t) {
            terms.push(t);
        }
    };

    for word in normalized.split_whitespace() {
        let cleaned: String = word
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if cleaned.is_empty() || lowered_mentions.iter().any(|m| m.contains(&cleaned)) {
            continue;
        }
        add(cleaned.clone());
        for (a, b) in SYNONYMS {
            if cleaned == *a {
                add((*b).to_string());
            } else if cleaned == *b {
                add((*a).to_string());
            }
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_detection() {
        assert_eq!(parse_query("how does indexing work").intent, Intent::How);
        assert_eq!(parse_query("why is search slow").intent, Intent::Why);
        assert_eq!(parse_query("explain the critique loop").intent, Intent::Explain);
        assert_eq!(parse_query("where is the config loaded").intent, Intent::Where);
        assert_eq!(parse_query("list all requirements").intent, Intent::List);
        assert_eq!(parse_query("the parser throws an error").intent, Intent::Debug);
        assert_eq!(parse_query("token budget handling").intent, Intent::Find);
    }

    #[test]
    fn test_backtick_mentions_preserved() {
        let parsed = parse_query("how does `EmbeddingManager.embed_batch` work");
        assert!(parsed
            .entity_mentions
            .contains(&"EmbeddingManager.embed_batch".to_string()));
    }

    #[test]
    fn test_file_path_mentions() {
        let parsed = parse_query("what happens in src/store.rs on upsert");
        assert!(parsed.entity_mentions.contains(&"src/store.rs".to_string()));
    }

    #[test]
    fn test_mentions_not_retokenized() {
        let parsed = parse_query("explain `QueryParser` behavior");
        assert!(parsed.entity_mentions.contains(&"QueryParser".to_string()));
        assert!(!parsed.expanded_terms.contains(&"queryparser".to_string()));
        assert!(parsed.expanded_terms.contains(&"behavior".to_string()));
    }

    #[test]
    fn test_synonym_expansion() {
        let parsed = parse_query("find the function for chunking");
        assert!(parsed.expanded_terms.contains(&"function".to_string()));
        assert!(parsed.expanded_terms.contains(&"method".to_string()));
    }

    #[test]
    fn test_type_hints() {
        let parsed = parse_query("list all functions and classes");
        assert!(parsed.entity_types_hinted.contains(&EntityType::Function));
        assert!(parsed.entity_types_hinted.contains(&EntityType::Class));
    }

    #[test]
    fn test_empty_query() {
        let parsed = parse_query("   ");
        assert_eq!(parsed.normalized, "");
        assert!(parsed.entity_mentions.is_empty());
        assert!(parsed.expanded_terms.is_empty());
    }
}
