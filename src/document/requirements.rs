//! Requirement extraction from document sections.
//!
//! Two sources feed requirement entities:
//! 1. List items under a curated set of requirement-flavored headings
//!    (`requirements`, `features`, `user stories`, ...).
//! 2. User-story phrasing (`as a <role>, i want <want>, so that <benefit>`)
//!    scanned in every section regardless of heading.
//!
//! Extraction is flat: nested sub-lists contribute items at the same level
//! as their parents. Duplicates collapse on description.

use crate::models::{Priority, RequirementKind};
use crate::patterns;

/// A requirement candidate before it becomes an entity.
#[derive(Debug, Clone)]
pub struct ExtractedRequirement {
    pub description: String,
    pub priority: Priority,
    pub kind: RequirementKind,
    pub acceptance: Vec<String>,
}

/// Extract requirements from one section. Returns an empty list when the
/// section title is not on the requirement headings list.
pub fn extract_from_section(title: &str, content: &str) -> Vec<ExtractedRequirement> {
    if !patterns::is_requirement_heading(title) {
        return Vec::new();
    }

    let (item_block, acceptance_block) = split_acceptance_block(content);

    let mut requirements: Vec<ExtractedRequirement> = patterns::LIST_ITEM
        .captures_iter(item_block)
        .map(|caps| {
            let description = caps.get(1).unwrap().as_str().trim().to_string();
            ExtractedRequirement {
                priority: patterns::detect_priority(&description),
                kind: patterns::detect_requirement_kind(&description),
                description,
                acceptance: Vec::new(),
            }
        })
        .filter(|r| !r.description.is_empty())
        .collect();

    // A trailing acceptance block attaches to the last requirement above it.
    if let Some(block) = acceptance_block {
        let criteria: Vec<String> = patterns::LIST_ITEM
            .captures_iter(block)
            .map(|caps| caps.get(1).unwrap().as_str().trim().to_string())
            .collect();
        if let Some(last) = requirements.last_mut() {
            last.acceptance = criteria;
        } else if !criteria.is_empty() {
            // An acceptance-criteria section with no preceding items still
            // yields requirement entities, one per criterion.
            for c in criteria {
                requirements.push(ExtractedRequirement {
                    priority: patterns::detect_priority(&c),
                    kind: patterns::detect_requirement_kind(&c),
                    description: c,
                    acceptance: Vec::new(),
                });
            }
        }
    }

    dedupe(requirements)
}

/// Scan any text for user-story phrasing. Applied to every section.
pub fn extract_user_stories(content: &str) -> Vec<ExtractedRequirement> {
    let stories = patterns::USER_STORY
        .captures_iter(content)
        .map(|caps| {
            let description = caps.get(0).unwrap().as_str().trim().to_string();
            ExtractedRequirement {
                priority: patterns::detect_priority(&description),
                kind: RequirementKind::UserStory,
                description,
                acceptance: Vec::new(),
            }
        })
        .collect();
    dedupe(stories)
}

/// Split a section at a trailing acceptance-criteria marker. The marker is
/// a line beginning with "acceptance criteria" or a given/when/then clause.
fn split_acceptance_block(content: &str) -> (&str, Option<&str>) {
    for (offset, line) in line_offsets(content) {
        let lowered = line.trim().to_lowercase();
        if lowered.starts_with("acceptance criteria") || patterns::GIVEN_WHEN_THEN.is_match(line) {
            return (&content[..offset], Some(&content[offset..]));
        }
    }
    (content, None)
}

fn line_offsets(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content.split_inclusive('\n').scan(0usize, |offset, line| {
        let start = *offset;
        *offset += line.len();
        Some((start, line))
    })
}

/// De-duplicate on normalized description, preserving first occurrence.
fn dedupe(requirements: Vec<ExtractedRequirement>) -> Vec<ExtractedRequirement> {
    let mut seen = std::collections::HashSet::new();
    requirements
        .into_iter()
        .filter(|r| seen.insert(r.description.trim().to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_requirement_heading_yields_nothing() {
        let reqs = extract_from_section("Installation", "- step one\n- step two");
        assert!(reqs.is_empty());
    }

    #[test]
    fn test_list_items_become_requirements() {
        let content = "- must parse YAML files\n- could cache results\n- won't support FTP";
        let reqs = extract_from_section("Requirements", content);
        assert_eq!(reqs.len(), 3);
        assert_eq!(reqs[0].priority, Priority::Must);
        assert_eq!(reqs[1].priority, Priority::Could);
        assert_eq!(reqs[2].priority, Priority::Wont);
    }

    #[test]
    fn test_numbered_items_and_dedup() {
        let content = "1. support markdown\n2. support markdown\n3. support HTML";
        let reqs = extract_from_section("Features", content);
        assert_eq!(reqs.len(), 2);
    }

    #[test]
    fn test_acceptance_block_attaches_to_last_item() {
        let content = "- the index updates on save\n\nAcceptance Criteria\n- re-index completes in under a second\n- no duplicate entities";
        let reqs = extract_from_section("Requirements", content);
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].acceptance.len(), 2);
    }

    #[test]
    fn test_user_stories_found_anywhere() {
        let content = "Some prose. As a reviewer, I want inline context, so that I can judge changes quickly.";
        let stories = extract_user_stories(content);
        assert_eq!(stories.len(), 1);
        assert_eq!(stories[0].kind, RequirementKind::UserStory);
    }

    #[test]
    fn test_user_stories_dedupe_on_description() {
        let story = "As a user, I want exports, so that I can share.";
        let content = format!("{}\n\n{}", story, story);
        assert_eq!(extract_user_stories(&content).len(), 1);
    }
}
