//! Source ingestion: AST symbol and relationship extraction.
//!
//! Each supported language has a tree-sitter walker that maps syntax to
//! the entity type set: one `file` entity, plus `class`/`interface`/
//! `type`/`function`/`method`/`variable` children, with `CONTAINS`
//! (file→symbol, class→method), `IMPORTS` (file→module), and — when the
//! callee resolves to a known symbol — `CALLS` edges. Unresolvable call
//! targets are dropped silently; the graph never contains phantom
//! entities. Extraction is deterministic given the file content.

use anyhow::Result;

use crate::error::CoreError;
use crate::languages::Language;
use crate::models::{EntityDraft, EntityType, RelationKind};
use crate::store::Store;

/// A symbol found in a source file, before upsert.
#[derive(Debug, Clone)]
pub struct ExtractedSymbol {
    pub name: String,
    pub entity_type: EntityType,
    /// Enclosing class/impl name for methods.
    pub parent: Option<String>,
    pub start_line: i64,
    pub end_line: i64,
    pub snippet: String,
}

impl ExtractedSymbol {
    /// Local part of the qualified name: `name` or `parent::name`.
    fn local_name(&self) -> String {
        match &self.parent {
            Some(p) => format!("{}::{}", p, self.name),
            None => self.name.clone(),
        }
    }
}

/// A module specifier imported by the file.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedImport {
    pub target: String,
    pub is_external: bool,
}

/// A call site resolved to its enclosing scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedCall {
    /// Local name of the calling scope (`parse` or `Store::get`).
    pub caller: String,
    /// Bare callee name.
    pub callee: String,
}

/// Everything one file contributes to the graph.
#[derive(Debug, Default)]
pub struct FileSymbols {
    pub symbols: Vec<ExtractedSymbol>,
    pub imports: Vec<ExtractedImport>,
    pub calls: Vec<ExtractedCall>,
    /// `(type name, trait/base name)` pairs from trait impls and class
    /// inheritance.
    pub implements: Vec<(String, String)>,
}

/// Aggregate result of ingesting one source file.
#[derive(Debug, Default)]
pub struct SourceIngestResult {
    pub file_id: String,
    pub entities_created: usize,
    pub relationships_created: usize,
    pub embeddable: Vec<(String, String)>,
}

/// Characters of symbol source kept as entity content.
const SNIPPET_LIMIT: usize = 2000;

/// Parse a source file and extract its symbols, imports, and call sites.
pub fn extract_file_symbols(
    language: Language,
    rel_path: &str,
    source: &str,
) -> Result<FileSymbols> {
    let grammar = language.grammar();
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| CoreError::parse_failure(rel_path, e))?;
    let tree = parser
        .parse(source.as_bytes(), None)
        .ok_or_else(|| CoreError::parse_failure(rel_path, "tree-sitter produced no tree"))?;

    let mut out = FileSymbols::default();
    let root = tree.root_node();
    match language {
        Language::Rust => walk_rust(&root, source, None, &mut out),
        Language::Python => walk_python(&root, source, None, &mut out),
        Language::TypeScript | Language::JavaScript => walk_js(&root, source, None, &mut out),
    }
    collect_calls(&root, source, language, &out.symbols.clone(), &mut out.calls);
    Ok(out)
}

/// Upsert a file's symbols and edges into the graph.
pub async fn ingest_source_file(
    store: &Store,
    language: Language,
    rel_path: &str,
    source: &str,
    base_metadata: serde_json::Value,
) -> Result<SourceIngestResult> {
    let extracted = extract_file_symbols(language, rel_path, source)?;
    let mut result = SourceIngestResult::default();

    let file_name = std::path::Path::new(rel_path)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| rel_path.to_string());

    let mut file_metadata = base_metadata;
    if let Some(obj) = file_metadata.as_object_mut() {
        obj.insert("language".into(), serde_json::json!(language.name()));
    }

    let file = store
        .upsert_entity(
            &EntityDraft::new(EntityType::File, &file_name, rel_path)
                .with_content(source)
                .with_file(rel_path)
                .with_metadata(file_metadata),
        )
        .await?;
    result.file_id = file.id.clone();
    result.entities_created += 1;

    // Symbols. Parents (classes) upsert before children walk order already
    // guarantees this: walkers emit containers before their members.
    let mut local_ids: std::collections::HashMap<String, String> =
        std::collections::HashMap::new();

    for symbol in &extracted.symbols {
        let qn = format!("{}::{}", rel_path, symbol.local_name());
        let entity = store
            .upsert_entity(
                &EntityDraft::new(symbol.entity_type, &symbol.name, &qn)
                    .with_content(&symbol.snippet)
                    .with_file(rel_path)
                    .with_lines(symbol.start_line, symbol.end_line),
            )
            .await?;
        result.entities_created += 1;
        result
            .embeddable
            .push((entity.id.clone(), symbol.snippet.clone()));

        let container = symbol
            .parent
            .as_ref()
            .and_then(|p| local_ids.get(p.as_str()))
            .cloned()
            .unwrap_or_else(|| file.id.clone());
        store
            .upsert_relationship(
                &container,
                &entity.id,
                RelationKind::Contains,
                1.0,
                serde_json::json!({}),
            )
            .await?;
        result.relationships_created += 1;

        local_ids.insert(symbol.local_name(), entity.id.clone());
        if symbol.parent.is_none() {
            local_ids.insert(symbol.name.clone(), entity.id.clone());
        }
    }

    // Imports: one module entity per specifier.
    for import in &extracted.imports {
        let module_qn = format!("module::{}", import.target);
        let module = store
            .upsert_entity(
                &EntityDraft::new(EntityType::Module, &import.target, &module_qn)
                    .with_metadata(serde_json::json!({"isExternal": import.is_external})),
            )
            .await?;
        result.entities_created += 1;
        store
            .upsert_relationship(
                &file.id,
                &module.id,
                RelationKind::Imports,
                1.0,
                serde_json::json!({"isExternal": import.is_external}),
            )
            .await?;
        result.relationships_created += 1;
    }

    // Trait impls and inheritance. Both endpoints must resolve; anything
    // else is dropped rather than materialized as a phantom entity.
    for (type_name, base_name) in &extracted.implements {
        let Some(type_id) = local_ids.get(type_name) else {
            continue;
        };
        let base_id = match local_ids.get(base_name) {
            Some(id) => Some(id.clone()),
            None => {
                let mut found = None;
                for t in [EntityType::Interface, EntityType::Class, EntityType::Type] {
                    if let Some(entity) = store
                        .find_by_name(base_name, Some(t))
                        .await?
                        .into_iter()
                        .next()
                    {
                        found = Some(entity.id);
                        break;
                    }
                }
                found
            }
        };
        if let Some(base_id) = base_id {
            if base_id == *type_id {
                continue;
            }
            store
                .upsert_relationship(
                    type_id,
                    &base_id,
                    RelationKind::Implements,
                    1.0,
                    serde_json::json!({}),
                )
                .await?;
            result.relationships_created += 1;
        }
    }

    // Calls: same-file symbols first, then project-wide functions/methods.
    // Anything still unresolved is dropped.
    for call in &extracted.calls {
        let Some(caller_id) = local_ids.get(&call.caller) else {
            continue;
        };
        let callee_id = match local_ids.get(&call.callee) {
            Some(id) => Some(id.clone()),
            None => {
                let mut found = None;
                for t in [EntityType::Function, EntityType::Method] {
                    if let Some(entity) = store
                        .find_by_name(&call.callee, Some(t))
                        .await?
                        .into_iter()
                        .next()
                    {
                        found = Some(entity.id);
                        break;
                    }
                }
                found
            }
        };
        if let Some(callee_id) = callee_id {
            if callee_id == *caller_id {
                continue;
            }
            store
                .upsert_relationship(
                    caller_id,
                    &callee_id,
                    RelationKind::Calls,
                    1.0,
                    serde_json::json!({}),
                )
                .await?;
            result.relationships_created += 1;
        }
    }

    Ok(result)
}

fn snippet(source: &str, node: &tree_sitter::Node) -> String {
    source[node.byte_range()]
        .chars()
        .take(SNIPPET_LIMIT)
        .collect()
}

fn node_text<'a>(source: &'a str, node: &tree_sitter::Node) -> &'a str {
    &source[node.byte_range()]
}

fn lines(node: &tree_sitter::Node) -> (i64, i64) {
    (
        node.start_position().row as i64 + 1,
        node.end_position().row as i64 + 1,
    )
}

// ───────────────────────── Rust ─────────────────────────

fn walk_rust(
    node: &tree_sitter::Node,
    source: &str,
    parent: Option<&str>,
    out: &mut FileSymbols,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "function_item" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    let (start, end) = lines(&child);
                    out.symbols.push(ExtractedSymbol {
                        name: node_text(source, &name_node).to_string(),
                        entity_type: if parent.is_some() {
                            EntityType::Method
                        } else {
                            EntityType::Function
                        },
                        parent: parent.map(String::from),
                        start_line: start,
                        end_line: end,
                        snippet: snippet(source, &child),
                    });
                }
            }
            "struct_item" | "enum_item" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    let (start, end) = lines(&child);
                    out.symbols.push(ExtractedSymbol {
                        name: node_text(source, &name_node).to_string(),
                        entity_type: EntityType::Class,
                        parent: None,
                        start_line: start,
                        end_line: end,
                        snippet: snippet(source, &child),
                    });
                }
            }
            "trait_item" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    let (start, end) = lines(&child);
                    let name = node_text(source, &name_node).to_string();
                    out.symbols.push(ExtractedSymbol {
                        name: name.clone(),
                        entity_type: EntityType::Interface,
                        parent: None,
                        start_line: start,
                        end_line: end,
                        snippet: snippet(source, &child),
                    });
                    walk_rust(&child, source, Some(&name), out);
                    continue;
                }
            }
            "type_item" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    let (start, end) = lines(&child);
                    out.symbols.push(ExtractedSymbol {
                        name: node_text(source, &name_node).to_string(),
                        entity_type: EntityType::Type,
                        parent: None,
                        start_line: start,
                        end_line: end,
                        snippet: snippet(source, &child),
                    });
                }
            }
            "const_item" | "static_item" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    let (start, end) = lines(&child);
                    out.symbols.push(ExtractedSymbol {
                        name: node_text(source, &name_node).to_string(),
                        entity_type: EntityType::Variable,
                        parent: parent.map(String::from),
                        start_line: start,
                        end_line: end,
                        snippet: snippet(source, &child),
                    });
                }
            }
            "impl_item" => {
                let type_name = child
                    .child_by_field_name("type")
                    .map(|n| node_text(source, &n).to_string());
                if let (Some(type_name), Some(trait_node)) =
                    (type_name.as_ref(), child.child_by_field_name("trait"))
                {
                    let trait_name = node_text(source, &trait_node).to_string();
                    let pair = (type_name.clone(), trait_name);
                    if !out.implements.contains(&pair) {
                        out.implements.push(pair);
                    }
                }
                walk_rust(&child, source, type_name.as_deref(), out);
                continue;
            }
            "mod_item" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    let (start, end) = lines(&child);
                    out.symbols.push(ExtractedSymbol {
                        name: node_text(source, &name_node).to_string(),
                        entity_type: EntityType::Module,
                        parent: None,
                        start_line: start,
                        end_line: end,
                        snippet: String::new(),
                    });
                }
                walk_rust(&child, source, parent, out);
                continue;
            }
            "use_declaration" => {
                let text = node_text(source, &child);
                if let Some(import) = parse_rust_use(text) {
                    if !out.imports.contains(&import) {
                        out.imports.push(import);
                    }
                }
            }
            _ => {}
        }
        walk_rust(&child, source, parent, out);
    }
}

/// Reduce `use serde::{Serialize, Deserialize};` to its root specifier.
fn parse_rust_use(text: &str) -> Option<ExtractedImport> {
    let body = text
        .trim_start_matches("pub ")
        .trim_start_matches("use ")
        .trim_end_matches(';')
        .trim();
    let root = body.split("::").next()?.trim().to_string();
    if root.is_empty() || root.starts_with('{') {
        return None;
    }
    let is_external = !matches!(root.as_str(), "crate" | "self" | "super" | "std");
    Some(ExtractedImport {
        target: root,
        is_external,
    })
}

// ───────────────────────── Python ─────────────────────────

fn walk_python(
    node: &tree_sitter::Node,
    source: &str,
    parent: Option<&str>,
    out: &mut FileSymbols,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "function_definition" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    let (start, end) = lines(&child);
                    out.symbols.push(ExtractedSymbol {
                        name: node_text(source, &name_node).to_string(),
                        entity_type: if parent.is_some() {
                            EntityType::Method
                        } else {
                            EntityType::Function
                        },
                        parent: parent.map(String::from),
                        start_line: start,
                        end_line: end,
                        snippet: snippet(source, &child),
                    });
                }
            }
            "class_definition" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    let (start, end) = lines(&child);
                    let name = node_text(source, &name_node).to_string();
                    out.symbols.push(ExtractedSymbol {
                        name: name.clone(),
                        entity_type: EntityType::Class,
                        parent: None,
                        start_line: start,
                        end_line: end,
                        snippet: snippet(source, &child),
                    });
                    if let Some(bases) = child.child_by_field_name("superclasses") {
                        for base in parse_python_bases(node_text(source, &bases)) {
                            let pair = (name.clone(), base);
                            if !out.implements.contains(&pair) {
                                out.implements.push(pair);
                            }
                        }
                    }
                    walk_python(&child, source, Some(&name), out);
                    continue;
                }
            }
            "decorated_definition" => {
                walk_python(&child, source, parent, out);
                continue;
            }
            "import_statement" | "import_from_statement" => {
                let text = node_text(source, &child);
                if let Some(import) = parse_python_import(text) {
                    if !out.imports.contains(&import) {
                        out.imports.push(import);
                    }
                }
            }
            "expression_statement" | "assignment" => {
                // Module-level NAME = ... assignments become variables.
                if parent.is_none() && node.kind() == "module" {
                    if let Some(var) = python_module_variable(&child, source) {
                        out.symbols.push(var);
                    }
                }
            }
            _ => {}
        }
        walk_python(&child, source, parent, out);
    }
}

fn python_module_variable(
    node: &tree_sitter::Node,
    source: &str,
) -> Option<ExtractedSymbol> {
    let assignment = if node.kind() == "assignment" {
        *node
    } else {
        let child = node.child(0)?;
        if child.kind() != "assignment" {
            return None;
        }
        child
    };
    let left = assignment.child_by_field_name("left")?;
    if left.kind() != "identifier" {
        return None;
    }
    let (start, end) = lines(&assignment);
    Some(ExtractedSymbol {
        name: node_text(source, &left).to_string(),
        entity_type: EntityType::Variable,
        parent: None,
        start_line: start,
        end_line: end,
        snippet: snippet(source, &assignment),
    })
}

/// `(Base1, Base2)` → bare base names.
fn parse_python_bases(text: &str) -> Vec<String> {
    text.trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s.chars().next().is_some_and(|c| c.is_alphabetic()))
        .collect()
}

fn parse_python_import(text: &str) -> Option<ExtractedImport> {
    let text = text.trim();
    let target = if let Some(rest) = text.strip_prefix("from ") {
        rest.split_whitespace().next()?.to_string()
    } else if let Some(rest) = text.strip_prefix("import ") {
        rest.split([',', ' ']).next()?.trim().to_string()
    } else {
        return None;
    };
    if target.is_empty() {
        return None;
    }
    let is_external = !target.starts_with('.');
    Some(ExtractedImport {
        target,
        is_external,
    })
}

// ───────────────────────── TypeScript / JavaScript ─────────────────────────

fn walk_js(node: &tree_sitter::Node, source: &str, parent: Option<&str>, out: &mut FileSymbols) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "function_declaration" | "generator_function_declaration" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    let (start, end) = lines(&child);
                    out.symbols.push(ExtractedSymbol {
                        name: node_text(source, &name_node).to_string(),
                        entity_type: EntityType::Function,
                        parent: None,
                        start_line: start,
                        end_line: end,
                        snippet: snippet(source, &child),
                    });
                }
            }
            "class_declaration" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    let (start, end) = lines(&child);
                    let name = node_text(source, &name_node).to_string();
                    out.symbols.push(ExtractedSymbol {
                        name: name.clone(),
                        entity_type: EntityType::Class,
                        parent: None,
                        start_line: start,
                        end_line: end,
                        snippet: snippet(source, &child),
                    });
                    walk_js(&child, source, Some(&name), out);
                    continue;
                }
            }
            "method_definition" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    let (start, end) = lines(&child);
                    out.symbols.push(ExtractedSymbol {
                        name: node_text(source, &name_node).to_string(),
                        entity_type: EntityType::Method,
                        parent: parent.map(String::from),
                        start_line: start,
                        end_line: end,
                        snippet: snippet(source, &child),
                    });
                }
            }
            "interface_declaration" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    let (start, end) = lines(&child);
                    out.symbols.push(ExtractedSymbol {
                        name: node_text(source, &name_node).to_string(),
                        entity_type: EntityType::Interface,
                        parent: None,
                        start_line: start,
                        end_line: end,
                        snippet: snippet(source, &child),
                    });
                }
            }
            "type_alias_declaration" | "enum_declaration" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    let (start, end) = lines(&child);
                    out.symbols.push(ExtractedSymbol {
                        name: node_text(source, &name_node).to_string(),
                        entity_type: EntityType::Type,
                        parent: None,
                        start_line: start,
                        end_line: end,
                        snippet: snippet(source, &child),
                    });
                }
            }
            "lexical_declaration" | "variable_declaration" => {
                if parent.is_none() && node.kind() == "program" {
                    js_declarators(&child, source, out);
                }
            }
            "import_statement" => {
                if let Some(source_node) = child.child_by_field_name("source") {
                    let raw = node_text(source, &source_node).trim_matches(['"', '\'']);
                    if !raw.is_empty() {
                        let import = ExtractedImport {
                            target: raw.to_string(),
                            is_external: !(raw.starts_with("./") || raw.starts_with("../")),
                        };
                        if !out.imports.contains(&import) {
                            out.imports.push(import);
                        }
                    }
                }
            }
            _ => {}
        }
        walk_js(&child, source, parent, out);
    }
}

/// Top-level `const x = ...` declarators: arrow functions become
/// `function` entities, everything else a `variable`.
fn js_declarators(node: &tree_sitter::Node, source: &str, out: &mut FileSymbols) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "variable_declarator" {
            continue;
        }
        let Some(name_node) = child.child_by_field_name("name") else {
            continue;
        };
        if name_node.kind() != "identifier" {
            continue;
        }
        let is_fn = child
            .child_by_field_name("value")
            .is_some_and(|v| matches!(v.kind(), "arrow_function" | "function_expression"));
        let (start, end) = lines(&child);
        out.symbols.push(ExtractedSymbol {
            name: node_text(source, &name_node).to_string(),
            entity_type: if is_fn {
                EntityType::Function
            } else {
                EntityType::Variable
            },
            parent: None,
            start_line: start,
            end_line: end,
            snippet: snippet(source, &child),
        });
    }
}

// ───────────────────────── calls ─────────────────────────

/// Collect call expressions and attribute each to its enclosing symbol by
/// line containment. Calls outside any known scope are skipped.
fn collect_calls(
    root: &tree_sitter::Node,
    source: &str,
    language: Language,
    symbols: &[ExtractedSymbol],
    calls: &mut Vec<ExtractedCall>,
) {
    let call_kind = match language {
        Language::Python => "call",
        _ => "call_expression",
    };

    fn visit(
        node: &tree_sitter::Node,
        source: &str,
        call_kind: &str,
        symbols: &[ExtractedSymbol],
        calls: &mut Vec<ExtractedCall>,
    ) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == call_kind {
                if let Some(function_node) = child.child_by_field_name("function") {
                    let callee = callee_name(&source[function_node.byte_range()]);
                    let row = child.start_position().row as i64 + 1;
                    if let Some(caller) = enclosing_scope(symbols, row) {
                        if !callee.is_empty() && callee != caller {
                            let call = ExtractedCall {
                                caller,
                                callee,
                            };
                            if !calls.contains(&call) {
                                calls.push(call);
                            }
                        }
                    }
                }
            }
            visit(&child, source, call_kind, symbols, calls);
        }
    }
    visit(root, source, call_kind, symbols, calls);
}

/// Bare callee name from a call target expression: the last path or member
/// segment (`store.get_entity` → `get_entity`, `Vec::with_capacity` →
/// `with_capacity`).
fn callee_name(expr: &str) -> String {
    expr.rsplit(['.', ':'])
        .next()
        .unwrap_or(expr)
        .trim()
        .trim_end_matches('?')
        .to_string()
}

/// Innermost function/method symbol whose line span contains the row.
fn enclosing_scope(symbols: &[ExtractedSymbol], row: i64) -> Option<String> {
    symbols
        .iter()
        .filter(|s| {
            matches!(s.entity_type, EntityType::Function | EntityType::Method)
                && s.start_line <= row
                && row <= s.end_line
        })
        .min_by_key(|s| s.end_line - s.start_line)
        .map(|s| s.local_name())
}
