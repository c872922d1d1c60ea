//! Shared pattern assets.
//!
//! Every regex used for code-reference detection, requirement extraction,
//! decision mining, and draft critique lives here, compiled once. Call
//! sites must not define their own variants of these patterns.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{Priority, RequirementKind};

/// Inline code spans: `` `UserService` ``, `` `load_config()` ``.
pub static BACKTICK_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]+)`").unwrap());

/// File paths with a known code extension: `src/store.rs`, `lib/db.py`.
pub static CODE_FILE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[\w./-]+\.(?:rs|py|ts|tsx|js|jsx|go|java|rb|c|cc|cpp|h|hpp|cs|php|swift|kt)\b")
        .unwrap()
});

/// PascalCase names with a conventional class-like suffix.
pub static CLASS_LIKE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b[A-Z][a-zA-Z0-9]*(?:Service|Controller|Manager|Handler|Provider|Repository|Factory|Builder|Client|Server|Store|Parser|Extractor|Worker)\b",
    )
    .unwrap()
});

/// Function-call mentions: `parse_query()`, `embed()`.
pub static FUNCTION_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\(\)").unwrap());

/// Plain PascalCase identifiers (two humps minimum).
pub static PASCAL_CASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z0-9]+(?:[A-Z][a-z0-9]+)+\b").unwrap());

/// SCREAMING_CASE constants.
pub static SCREAMING_CASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][A-Z0-9]*(?:_[A-Z0-9]+)+\b").unwrap());

/// Dotted code tokens in queries: `Store.upsert`, `config.db.path`.
pub static DOTTED_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)+\b").unwrap()
});

/// Markdown list items: `- x`, `* x`, `1. x`.
pub static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*]|\d+\.)\s+(.+)$").unwrap());

/// User-story phrasing: "as a <role>, I want <want>, so that <benefit>".
pub static USER_STORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)as\s+an?\s+(.+?),\s*i\s+want\s+(?:to\s+)?(.+?),\s*so\s+that\s+(.+?)(?:\.|$)")
        .unwrap()
});

/// Given/When/Then acceptance-criteria marker.
pub static GIVEN_WHEN_THEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bgiven\b.+\bwhen\b.+\bthen\b").unwrap());

/// Absolute claims that require supporting evidence.
pub static ABSOLUTE_CLAIM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(always|never|all|none|every|guaranteed)\b").unwrap());

/// Percentage claims: "93%", "99.9 %".
pub static PERCENTAGE_CLAIM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?\s?%").unwrap());

/// Section titles whose list items become requirement entities.
pub const REQUIREMENT_HEADINGS: &[&str] = &[
    "requirements",
    "features",
    "user stories",
    "functional requirements",
    "non-functional requirements",
    "specifications",
    "constraints",
    "goals",
    "objectives",
    "acceptance criteria",
    "use cases",
];

/// Phrases that mark a message as containing a decision.
pub const DECISION_PHRASES: &[&str] = &[
    "we decided",
    "we agreed",
    "decision:",
    "let's go with",
    "we will use",
    "we chose",
    "settled on",
    "going with",
];

/// Phrases that mark an uncertain draft.
pub const UNCERTAINTY_PHRASES: &[&str] = &[
    "i don't know",
    "i do not know",
    "i am not sure",
    "i'm not sure",
    "cannot determine",
    "unclear from the context",
];

/// True when a section title routes its list items through requirement
/// extraction. Matching ignores case and surrounding whitespace.
pub fn is_requirement_heading(title: &str) -> bool {
    let t = title.trim().to_lowercase();
    REQUIREMENT_HEADINGS.iter().any(|h| t == *h || t.starts_with(h))
}

/// MoSCoW priority from keyword cues; absent cues default to `should`.
pub fn detect_priority(text: &str) -> Priority {
    let t = text.to_lowercase();
    if t.contains("won't") || t.contains("wont ") || t.contains("out of scope") {
        Priority::Wont
    } else if t.contains("must") || t.contains("required") || t.contains("shall") {
        Priority::Must
    } else if t.contains("could") || t.contains("optional") || t.contains("nice to have") {
        Priority::Could
    } else {
        Priority::Should
    }
}

/// Requirement flavor from content cues.
pub fn detect_requirement_kind(text: &str) -> RequirementKind {
    let t = text.to_lowercase();
    if USER_STORY.is_match(&t) {
        RequirementKind::UserStory
    } else if t.contains("must not") || t.contains("constraint") || t.contains("limit") {
        RequirementKind::Constraint
    } else if t.contains("feature") || t.starts_with("support ") || t.contains("allow ") {
        RequirementKind::Feature
    } else {
        RequirementKind::Requirement
    }
}

/// True when the text contains a decision phrase.
pub fn contains_decision_phrase(text: &str) -> bool {
    let t = text.to_lowercase();
    DECISION_PHRASES.iter().any(|p| t.contains(p))
}

/// True when the text hedges with an uncertainty phrase.
pub fn contains_uncertainty(text: &str) -> bool {
    let t = text.to_lowercase();
    UNCERTAINTY_PHRASES.iter().any(|p| t.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backtick_token() {
        let caps: Vec<&str> = BACKTICK_TOKEN
            .captures_iter("use `UserService` and `load()`")
            .map(|c| c.get(1).unwrap().as_str())
            .collect();
        assert_eq!(caps, vec!["UserService", "load()"]);
    }

    #[test]
    fn test_code_file_path() {
        assert!(CODE_FILE_PATH.is_match("see src/store.rs for details"));
        assert!(CODE_FILE_PATH.is_match("lib/util.py"));
        assert!(!CODE_FILE_PATH.is_match("see the notes.txt file"));
    }

    #[test]
    fn test_class_like_name() {
        assert!(CLASS_LIKE_NAME.is_match("the PaymentService handles it"));
        assert!(CLASS_LIKE_NAME.is_match("QueryParser"));
        assert!(!CLASS_LIKE_NAME.is_match("the payment service"));
    }

    #[test]
    fn test_function_call() {
        let caps: Vec<&str> = FUNCTION_CALL
            .captures_iter("call parse_query() then embed()")
            .map(|c| c.get(1).unwrap().as_str())
            .collect();
        assert_eq!(caps, vec!["parse_query", "embed"]);
    }

    #[test]
    fn test_pascal_case() {
        assert!(PASCAL_CASE.is_match("the ContextAssembler type"));
        assert!(!PASCAL_CASE.is_match("Single word"));
    }

    #[test]
    fn test_screaming_case() {
        assert!(SCREAMING_CASE.is_match("uses MAX_TOKENS internally"));
        assert!(!SCREAMING_CASE.is_match("PLAIN"));
    }

    #[test]
    fn test_dotted_token() {
        assert!(DOTTED_TOKEN.is_match("check Store.upsert for that"));
        assert!(DOTTED_TOKEN.is_match("config.db.path"));
    }

    #[test]
    fn test_list_item() {
        let text = "- first\n* second\n1. third\nplain line";
        let items: Vec<&str> = LIST_ITEM
            .captures_iter(text)
            .map(|c| c.get(1).unwrap().as_str())
            .collect();
        assert_eq!(items, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_user_story() {
        let caps = USER_STORY
            .captures("As a developer, I want fast search, so that I stay in flow.")
            .unwrap();
        assert_eq!(caps.get(1).unwrap().as_str(), "developer");
        assert_eq!(caps.get(2).unwrap().as_str(), "fast search");
        assert!(caps.get(3).unwrap().as_str().starts_with("I stay in flow"));
    }

    #[test]
    fn test_given_when_then() {
        assert!(GIVEN_WHEN_THEN.is_match("Given a file, when ingested, then entities exist"));
        assert!(!GIVEN_WHEN_THEN.is_match("given nothing in particular"));
    }

    #[test]
    fn test_absolute_and_percentage_claims() {
        assert!(ABSOLUTE_CLAIM.is_match("this always works"));
        assert!(PERCENTAGE_CLAIM.is_match("covers 93% of cases"));
        assert!(!PERCENTAGE_CLAIM.is_match("covers most cases"));
    }

    #[test]
    fn test_requirement_headings() {
        assert!(is_requirement_heading("Requirements"));
        assert!(is_requirement_heading("  functional requirements "));
        assert!(is_requirement_heading("Acceptance Criteria"));
        assert!(!is_requirement_heading("Installation"));
    }

    #[test]
    fn test_detect_priority() {
        assert_eq!(detect_priority("must support unicode"), Priority::Must);
        assert_eq!(detect_priority("could add caching"), Priority::Could);
        assert_eq!(detect_priority("won't support IE11"), Priority::Wont);
        assert_eq!(detect_priority("add pagination"), Priority::Should);
    }

    #[test]
    fn test_detect_requirement_kind() {
        assert_eq!(
            detect_requirement_kind("As a user, I want export, so that I can share."),
            RequirementKind::UserStory
        );
        assert_eq!(
            detect_requirement_kind("must not exceed the memory limit"),
            RequirementKind::Constraint
        );
        assert_eq!(
            detect_requirement_kind("feature: dark mode"),
            RequirementKind::Feature
        );
        assert_eq!(
            detect_requirement_kind("the index updates incrementally"),
            RequirementKind::Requirement
        );
    }

    #[test]
    fn test_decision_and_uncertainty_phrases() {
        assert!(contains_decision_phrase("We decided to use SQLite."));
        assert!(contains_uncertainty("I'm not sure about the schema."));
        assert!(!contains_decision_phrase("still discussing options"));
    }
}
