//! Document-code linker.
//!
//! Scans document text for code references using the shared pattern set
//! (backtick spans, code file paths, class-like names, `call()` mentions,
//! PascalCase, SCREAMING_CASE) and resolves each against the graph in a
//! fixed order: exact qualified name, file path, class-like types,
//! functions/methods, then a general name search that only accepts
//! containment matches. References found inside fenced code blocks carry
//! reduced weight. Unresolved references are reported, never linked.

use anyhow::Result;
use std::collections::HashMap;

use crate::models::{EntityType, RelationKind};
use crate::patterns;
use crate::store::{EntityFilter, Store};

/// Full-weight reference found in prose.
const PROSE_WEIGHT: f64 = 1.0;
/// Reduced weight for references inside code blocks.
const CODE_BLOCK_WEIGHT: f64 = 0.8;

/// A candidate code reference found in document text.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeReference {
    pub token: String,
    pub in_code_block: bool,
    pub weight: f64,
}

/// Extract code-reference candidates from prose and code-block text,
/// de-duplicated by token with the stronger weight winning.
pub fn find_code_references(prose: &str, code: &str) -> Vec<CodeReference> {
    let mut by_token: HashMap<String, CodeReference> = HashMap::new();

    let mut add = |token: &str, in_code_block: bool| {
        let token = token.trim().trim_end_matches("()").to_string();
        if token.len() < 3 {
            return;
        }
        let weight = if in_code_block {
            CODE_BLOCK_WEIGHT
        } else {
            PROSE_WEIGHT
        };
        by_token
            .entry(token.clone())
            .and_modify(|existing| {
                if weight > existing.weight {
                    existing.weight = weight;
                    existing.in_code_block = in_code_block;
                }
            })
            .or_insert(CodeReference {
                token,
                in_code_block,
                weight,
            });
    };

    for (text, in_code) in [(prose, false), (code, true)] {
        for caps in patterns::BACKTICK_TOKEN.captures_iter(text) {
            add(caps.get(1).unwrap().as_str(), in_code);
        }
        for m in patterns::CODE_FILE_PATH.find_iter(text) {
            add(m.as_str(), in_code);
        }
        for m in patterns::CLASS_LIKE_NAME.find_iter(text) {
            add(m.as_str(), in_code);
        }
        for caps in patterns::FUNCTION_CALL.captures_iter(text) {
            add(caps.get(1).unwrap().as_str(), in_code);
        }
        for m in patterns::PASCAL_CASE.find_iter(text) {
            add(m.as_str(), in_code);
        }
        for m in patterns::SCREAMING_CASE.find_iter(text) {
            add(m.as_str(), in_code);
        }
    }

    let mut refs: Vec<CodeReference> = by_token.into_values().collect();
    refs.sort_by(|a, b| a.token.cmp(&b.token));
    refs
}

/// Resolve references and emit `DOCUMENTS` edges from the document to each
/// resolved code entity. Returns `(links_created, unresolved_tokens)`.
pub async fn link_document(
    store: &Store,
    document_id: &str,
    references: &[CodeReference],
) -> Result<(usize, Vec<String>)> {
    let mut links = 0usize;
    let mut unresolved = Vec::new();

    for reference in references {
        match resolve(store, &reference.token).await? {
            Some((target_id, kind)) => {
                if target_id == document_id {
                    continue;
                }
                store
                    .upsert_relationship(
                        document_id,
                        &target_id,
                        kind,
                        reference.weight,
                        serde_json::json!({
                            "token": reference.token,
                            "inCodeBlock": reference.in_code_block,
                        }),
                    )
                    .await?;
                links += 1;
            }
            None => unresolved.push(reference.token.clone()),
        }
    }

    Ok((links, unresolved))
}

/// Resolution order from strongest to weakest signal. Exact matches link
/// as `DOCUMENTS`; the weak containment tier links as `MENTIONS`.
async fn resolve(store: &Store, token: &str) -> Result<Option<(String, RelationKind)>> {
    // 1. Exact qualified name.
    if let Some(entity) = store.get_by_qualified_name(token).await? {
        return Ok(Some((entity.id, RelationKind::Documents)));
    }

    // 2. File path.
    let by_file = store
        .find(&EntityFilter {
            entity_type: Some(EntityType::File),
            file_path: Some(token.to_string()),
            ..Default::default()
        })
        .await?;
    if let Some(entity) = by_file.into_iter().next() {
        return Ok(Some((entity.id, RelationKind::Documents)));
    }

    // 3. Class-like types.
    for t in [EntityType::Class, EntityType::Interface, EntityType::Type] {
        let matches = store.find_by_name(token, Some(t)).await?;
        if let Some(entity) = matches.into_iter().next() {
            return Ok(Some((entity.id, RelationKind::Documents)));
        }
    }

    // 4. Functions and methods.
    for t in [EntityType::Function, EntityType::Method] {
        let matches = store.find_by_name(token, Some(t)).await?;
        if let Some(entity) = matches.into_iter().next() {
            return Ok(Some((entity.id, RelationKind::Documents)));
        }
    }

    // 5. General name search; accept only containment matches against
    //    code entities so prose words do not link to arbitrary nodes.
    let lowered = token.to_lowercase();
    let candidates = store.search_text(token, None, 10).await?;
    for (entity, _) in candidates {
        if !entity.entity_type.is_code() {
            continue;
        }
        let name = entity.name.to_lowercase();
        if name.contains(&lowered) || lowered.contains(&name) {
            return Ok(Some((entity.id, RelationKind::Mentions)));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use crate::models::EntityDraft;


    async fn memory_store() -> Store {
        let pool = crate::db::connect_memory().await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        Store::from_pool(pool, "test")
    }

    #[test]
    fn test_find_references_across_pattern_kinds() {
        let prose = "The `QueryParser` calls normalize() using MAX_DEPTH from src/query.rs.";
        let refs = find_code_references(prose, "");
        let tokens: Vec<&str> = refs.iter().map(|r| r.token.as_str()).collect();
        assert!(tokens.contains(&"QueryParser"));
        assert!(tokens.contains(&"normalize"));
        assert!(tokens.contains(&"MAX_DEPTH"));
        assert!(tokens.contains(&"src/query.rs"));
        assert!(refs.iter().all(|r| (r.weight - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_code_block_references_carry_lower_weight() {
        let refs = find_code_references("", "let p = QueryParser::new();");
        let parser_ref = refs.iter().find(|r| r.token == "QueryParser").unwrap();
        assert!(parser_ref.in_code_block);
        assert!((parser_ref.weight - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_prose_weight_wins_over_code_block() {
        let refs = find_code_references("uses `QueryParser`", "QueryParser::new()");
        let parser_ref = refs.iter().find(|r| r.token == "QueryParser").unwrap();
        assert!(!parser_ref.in_code_block);
        assert!((parser_ref.weight - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_resolution_and_unresolved_reporting() {
        let store = memory_store().await;
        let class = store
            .upsert_entity(&EntityDraft::new(
                EntityType::Class,
                "UserService",
                "src/user.rs::UserService",
            ))
            .await
            .unwrap();
        let doc = store
            .upsert_entity(&EntityDraft::new(
                EntityType::Document,
                "guide",
                "docs/guide.md",
            ))
            .await
            .unwrap();

        let refs = vec![
            CodeReference {
                token: "UserService".into(),
                in_code_block: false,
                weight: 1.0,
            },
            CodeReference {
                token: "PaymentService".into(),
                in_code_block: false,
                weight: 1.0,
            },
        ];
        let (links, unresolved) = link_document(&store, &doc.id, &refs).await.unwrap();
        assert_eq!(links, 1);
        assert_eq!(unresolved, vec!["PaymentService".to_string()]);

        let rels = store
            .relationships_for(&class.id, crate::models::Direction::In)
            .await
            .unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].kind, RelationKind::Documents);
    }

    #[tokio::test]
    async fn test_weak_containment_match_links_as_mentions() {
        let store = memory_store().await;
        let func = store
            .upsert_entity(&EntityDraft::new(
                EntityType::Function,
                "parse_query_string",
                "src/q.rs::parse_query_string",
            ))
            .await
            .unwrap();
        let doc = store
            .upsert_entity(&EntityDraft::new(
                EntityType::Document,
                "notes",
                "docs/notes.md",
            ))
            .await
            .unwrap();

        // No exact name match; the token is contained in the function
        // name, so it resolves through the weak tier.
        let refs = vec![CodeReference {
            token: "query_string".into(),
            in_code_block: false,
            weight: 1.0,
        }];
        let (links, unresolved) = link_document(&store, &doc.id, &refs).await.unwrap();
        assert_eq!(links, 1);
        assert!(unresolved.is_empty());

        let rels = store
            .relationships_for(&func.id, crate::models::Direction::In)
            .await
            .unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].kind, RelationKind::Mentions);
    }
}
