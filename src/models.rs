//! Core data model for the knowledge graph.
//!
//! Everything the engine stores is an [`Entity`] (a node, identified by its
//! `qualified_name` within a project) or a [`Relationship`] (a directed,
//! typed, weighted edge). Closed sets — entity types, relationship kinds,
//! query intents, requirement priorities — are modeled as exhaustive enums
//! rather than free-form strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Node type in the knowledge graph. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    File,
    Module,
    Class,
    Interface,
    Type,
    Function,
    Method,
    Variable,
    Decision,
    Document,
    Section,
    Requirement,
    Technology,
    Task,
    Component,
    Concept,
    Pattern,
    Session,
    Message,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::File => "file",
            EntityType::Module => "module",
            EntityType::Class => "class",
            EntityType::Interface => "interface",
            EntityType::Type => "type",
            EntityType::Function => "function",
            EntityType::Method => "method",
            EntityType::Variable => "variable",
            EntityType::Decision => "decision",
            EntityType::Document => "document",
            EntityType::Section => "section",
            EntityType::Requirement => "requirement",
            EntityType::Technology => "technology",
            EntityType::Task => "task",
            EntityType::Component => "component",
            EntityType::Concept => "concept",
            EntityType::Pattern => "pattern",
            EntityType::Session => "session",
            EntityType::Message => "message",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let t = match s {
            "file" => EntityType::File,
            "module" => EntityType::Module,
            "class" => EntityType::Class,
            "interface" => EntityType::Interface,
            "type" => EntityType::Type,
            "function" => EntityType::Function,
            "method" => EntityType::Method,
            "variable" => EntityType::Variable,
            "decision" => EntityType::Decision,
            "document" => EntityType::Document,
            "section" => EntityType::Section,
            "requirement" => EntityType::Requirement,
            "technology" => EntityType::Technology,
            "task" => EntityType::Task,
            "component" => EntityType::Component,
            "concept" => EntityType::Concept,
            "pattern" => EntityType::Pattern,
            "session" => EntityType::Session,
            "message" => EntityType::Message,
            _ => return None,
        };
        Some(t)
    }

    /// True for types produced by source-code ingestion.
    pub fn is_code(&self) -> bool {
        matches!(
            self,
            EntityType::File
                | EntityType::Module
                | EntityType::Class
                | EntityType::Interface
                | EntityType::Type
                | EntityType::Function
                | EntityType::Method
                | EntityType::Variable
        )
    }

    /// True for types produced by document ingestion.
    pub fn is_documentation(&self) -> bool {
        matches!(
            self,
            EntityType::Document | EntityType::Section | EntityType::Requirement
        )
    }

    /// True for conversation-memory types.
    pub fn is_conversation(&self) -> bool {
        matches!(
            self,
            EntityType::Session | EntityType::Message | EntityType::Decision
        )
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed edge kind. Closed set.
///
/// Each kind is emitted by exactly one ingesting component: the symbol
/// extractor owns `IMPORTS`/`CALLS`/`DEFINES`, the document linker owns
/// `DOCUMENTS`/`MENTIONS`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    Contains,
    Imports,
    Defines,
    Calls,
    Mentions,
    Documents,
    RelatesTo,
    DependsOn,
    Configures,
    Implements,
    References,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Contains => "CONTAINS",
            RelationKind::Imports => "IMPORTS",
            RelationKind::Defines => "DEFINES",
            RelationKind::Calls => "CALLS",
            RelationKind::Mentions => "MENTIONS",
            RelationKind::Documents => "DOCUMENTS",
            RelationKind::RelatesTo => "RELATES_TO",
            RelationKind::DependsOn => "DEPENDS_ON",
            RelationKind::Configures => "CONFIGURES",
            RelationKind::Implements => "IMPLEMENTS",
            RelationKind::References => "REFERENCES",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let k = match s {
            "CONTAINS" => RelationKind::Contains,
            "IMPORTS" => RelationKind::Imports,
            "DEFINES" => RelationKind::Defines,
            "CALLS" => RelationKind::Calls,
            "MENTIONS" => RelationKind::Mentions,
            "DOCUMENTS" => RelationKind::Documents,
            "RELATES_TO" => RelationKind::RelatesTo,
            "DEPENDS_ON" => RelationKind::DependsOn,
            "CONFIGURES" => RelationKind::Configures,
            "IMPLEMENTS" => RelationKind::Implements,
            "REFERENCES" => RelationKind::References,
            _ => return None,
        };
        Some(k)
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored node in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub project_id: String,
    pub entity_type: EntityType,
    pub name: String,
    /// Canonical identifier, unique per project. Pattern `<file>::<local>`.
    pub qualified_name: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub file_path: Option<String>,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
    /// Opaque bag: content hash, aliases, priority, docType, columns, etc.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to `upsert_entity` — everything except the store-assigned fields.
#[derive(Debug, Clone)]
pub struct EntityDraft {
    pub entity_type: EntityType,
    pub name: String,
    pub qualified_name: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub file_path: Option<String>,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
    pub metadata: serde_json::Value,
}

impl EntityDraft {
    pub fn new(entity_type: EntityType, name: &str, qualified_name: &str) -> Self {
        Self {
            entity_type,
            name: name.to_string(),
            qualified_name: qualified_name.to_string(),
            content: None,
            summary: None,
            file_path: None,
            start_line: None,
            end_line: None,
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_content(mut self, content: &str) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn with_file(mut self, file_path: &str) -> Self {
        self.file_path = Some(file_path.to_string());
        self
    }

    pub fn with_lines(mut self, start: i64, end: i64) -> Self {
        self.start_line = Some(start);
        self.end_line = Some(end);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A stored directed edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub kind: RelationKind,
    /// Edge strength in `[0.0, 1.0]`.
    pub weight: f64,
    pub metadata: serde_json::Value,
}

/// One embedding vector per entity per model, unit-normalized.
#[derive(Debug, Clone)]
pub struct StoredEmbedding {
    pub entity_id: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// Which retrieval strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Keyword,
    Semantic,
    Graph,
}

impl SearchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSource::Keyword => "keyword",
            SearchSource::Semantic => "semantic",
            SearchSource::Graph => "graph",
        }
    }
}

/// A ranked candidate from one retrieval strategy.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub entity_id: String,
    pub score: f64,
    pub source: SearchSource,
}

/// Edge direction selector for relationship queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Both,
}

/// MoSCoW requirement priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Must,
    Should,
    Could,
    Wont,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Must => "must",
            Priority::Should => "should",
            Priority::Could => "could",
            Priority::Wont => "wont",
        }
    }
}

/// Inferred requirement flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequirementKind {
    Requirement,
    Feature,
    UserStory,
    Constraint,
}

impl RequirementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementKind::Requirement => "requirement",
            RequirementKind::Feature => "feature",
            RequirementKind::UserStory => "user-story",
            RequirementKind::Constraint => "constraint",
        }
    }
}

/// Conversation session lifecycle state. Transitions are strictly
/// `active → archived → summarized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Archived,
    Summarized,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Archived => "archived",
            SessionState::Summarized => "summarized",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionState::Active),
            "archived" => Some(SessionState::Archived),
            "summarized" => Some(SessionState::Summarized),
            _ => None,
        }
    }

    /// Rank used to enforce monotonic transitions.
    pub fn rank(&self) -> u8 {
        match self {
            SessionState::Active => 0,
            SessionState::Archived => 1,
            SessionState::Summarized => 2,
        }
    }
}

/// A conversation session.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub project_id: String,
    pub title: Option<String>,
    pub state: SessionState,
    pub message_count: i64,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message within a session, FIFO-ordered by creation time.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A decision extracted from conversation history.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub id: String,
    pub session_id: String,
    pub description: String,
    pub context: Option<String>,
    pub alternatives: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_roundtrip() {
        for t in [
            EntityType::File,
            EntityType::Class,
            EntityType::Requirement,
            EntityType::Session,
        ] {
            assert_eq!(EntityType::parse(t.as_str()), Some(t));
        }
        assert_eq!(EntityType::parse("nonsense"), None);
    }

    #[test]
    fn test_relation_kind_roundtrip() {
        for k in [
            RelationKind::Contains,
            RelationKind::RelatesTo,
            RelationKind::DependsOn,
        ] {
            assert_eq!(RelationKind::parse(k.as_str()), Some(k));
        }
        assert_eq!(RelationKind::parse("LINKS"), None);
    }

    #[test]
    fn test_session_state_monotonic_ranks() {
        assert!(SessionState::Active.rank() < SessionState::Archived.rank());
        assert!(SessionState::Archived.rank() < SessionState::Summarized.rank());
    }

    #[test]
    fn test_entity_type_categories() {
        assert!(EntityType::Function.is_code());
        assert!(EntityType::Section.is_documentation());
        assert!(EntityType::Message.is_conversation());
        assert!(!EntityType::Technology.is_code());
    }
}
