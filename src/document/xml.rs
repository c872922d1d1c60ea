//! XML document pipeline.
//!
//! The first few levels of significant elements become `section` entities
//! with xpath-like qualified names (`pom.xml::/project/build`). Maven POM
//! files additionally yield `technology` entities with `DEPENDS_ON` edges
//! for their `<dependency>` blocks.

use anyhow::Result;
use quick_xml::events::Event;
use std::collections::HashMap;

use crate::document::PipelineOutput;
use crate::error::CoreError;
use crate::models::{EntityDraft, EntityType, RelationKind};
use crate::store::Store;

/// Element depth recorded as section entities.
const MAX_SECTION_DEPTH: usize = 3;

/// An element captured during the walk.
#[derive(Debug, Clone)]
pub struct XmlElement {
    /// Xpath-like location with sibling indices: `/project/dependencies/dependency[2]`.
    pub path: String,
    pub name: String,
    pub depth: usize,
    pub text: String,
    pub attributes: Vec<(String, String)>,
}

/// A Maven dependency gathered from a POM.
#[derive(Debug, Clone, PartialEq)]
pub struct PomDependency {
    pub group_id: String,
    pub artifact_id: String,
    pub version: Option<String>,
}

/// Walk the XML tree, collecting shallow elements and (for POMs) dependencies.
pub fn parse_xml(rel_path: &str, source: &str) -> Result<(Vec<XmlElement>, Vec<PomDependency>)> {
    let mut reader = quick_xml::Reader::from_str(source);
    reader.config_mut().trim_text(true);

    let mut elements: Vec<XmlElement> = Vec::new();
    let mut stack: Vec<usize> = Vec::new(); // indices into `elements`
    let mut path_stack: Vec<String> = Vec::new();
    let mut sibling_counts: Vec<HashMap<String, usize>> = vec![HashMap::new()];

    let mut dependencies = Vec::new();
    let mut dep_buf: Option<PomDependency> = None;
    let mut dep_field: Option<String> = None;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                let depth = path_stack.len() + 1;

                let counts = sibling_counts.last_mut().expect("root counter frame");
                let n = counts.entry(name.clone()).or_insert(0);
                *n += 1;
                let segment = if *n > 1 {
                    format!("{}[{}]", name, n)
                } else {
                    name.clone()
                };
                path_stack.push(segment);
                sibling_counts.push(HashMap::new());

                if depth <= MAX_SECTION_DEPTH {
                    let attributes = e
                        .attributes()
                        .filter_map(|a| a.ok())
                        .map(|a| {
                            (
                                String::from_utf8_lossy(a.key.as_ref()).to_string(),
                                String::from_utf8_lossy(&a.value).to_string(),
                            )
                        })
                        .collect();
                    elements.push(XmlElement {
                        path: format!("/{}", path_stack.join("/")),
                        name: name.clone(),
                        depth,
                        text: String::new(),
                        attributes,
                    });
                    stack.push(elements.len() - 1);
                } else {
                    stack.push(usize::MAX);
                }

                if name == "dependency" {
                    dep_buf = Some(PomDependency {
                        group_id: String::new(),
                        artifact_id: String::new(),
                        version: None,
                    });
                } else if dep_buf.is_some()
                    && matches!(name.as_str(), "groupId" | "artifactId" | "version")
                {
                    dep_field = Some(name);
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default().to_string();
                if let (Some(dep), Some(field)) = (dep_buf.as_mut(), dep_field.as_deref()) {
                    match field {
                        "groupId" => dep.group_id = text.clone(),
                        "artifactId" => dep.artifact_id = text.clone(),
                        "version" => dep.version = Some(text.clone()),
                        _ => {}
                    }
                }
                if let Some(&idx) = stack.last() {
                    if idx != usize::MAX {
                        let el = &mut elements[idx];
                        if !el.text.is_empty() {
                            el.text.push(' ');
                        }
                        el.text.push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "dependency" {
                    if let Some(dep) = dep_buf.take() {
                        if !dep.artifact_id.is_empty() {
                            dependencies.push(dep);
                        }
                    }
                }
                if dep_field.as_deref() == Some(name.as_str()) {
                    dep_field = None;
                }
                path_stack.pop();
                sibling_counts.pop();
                stack.pop();
            }
            Ok(Event::Empty(_)) => {}
            Ok(Event::Eof) => break,
            Err(e) => return Err(CoreError::parse_failure(rel_path, e).into()),
            _ => {}
        }
        buf.clear();
    }

    Ok((elements, dependencies))
}

pub async fn ingest(
    store: &Store,
    rel_path: &str,
    source: &str,
    base_metadata: serde_json::Value,
) -> Result<PipelineOutput> {
    let (elements, dependencies) = parse_xml(rel_path, source)?;
    let mut out = PipelineOutput::default();

    let file_name = std::path::Path::new(rel_path)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| rel_path.to_string());

    let mut doc_metadata = base_metadata;
    if let Some(obj) = doc_metadata.as_object_mut() {
        obj.insert("docType".into(), serde_json::json!("xml"));
        if !dependencies.is_empty() {
            obj.insert("maven".into(), serde_json::json!(true));
        }
    }

    let doc = store
        .upsert_entity(
            &EntityDraft::new(EntityType::Document, &file_name, rel_path)
                .with_content(source)
                .with_file(rel_path)
                .with_metadata(doc_metadata),
        )
        .await?;
    out.document_id = doc.id.clone();
    out.entities_created += 1;

    // Significant = has text, attributes, or is shallow structure (depth <= 2).
    for element in elements
        .iter()
        .filter(|el| el.depth <= 2 || !el.text.is_empty() || !el.attributes.is_empty())
    {
        let qn = format!("{}::{}", rel_path, element.path);
        let entity = store
            .upsert_entity(
                &EntityDraft::new(EntityType::Section, &element.name, &qn)
                    .with_content(&element.text)
                    .with_file(rel_path)
                    .with_metadata(serde_json::json!({
                        "depth": element.depth,
                        "attributes": element
                            .attributes
                            .iter()
                            .cloned()
                            .collect::<std::collections::BTreeMap<String, String>>(),
                    })),
            )
            .await?;
        out.entities_created += 1;
        if !element.text.is_empty() {
            out.embeddable.push((entity.id.clone(), element.text.clone()));
        }
        store
            .upsert_relationship(
                &doc.id,
                &entity.id,
                RelationKind::Contains,
                1.0,
                serde_json::json!({}),
            )
            .await?;
        out.relationships_created += 1;
    }

    for dep in &dependencies {
        let name = if dep.group_id.is_empty() {
            dep.artifact_id.clone()
        } else {
            format!("{}:{}", dep.group_id, dep.artifact_id)
        };
        let qn = format!("{}::dep-{}", rel_path, name);
        let entity = store
            .upsert_entity(
                &EntityDraft::new(EntityType::Technology, &name, &qn)
                    .with_file(rel_path)
                    .with_metadata(serde_json::json!({"version": dep.version})),
            )
            .await?;
        out.entities_created += 1;
        store
            .upsert_relationship(
                &doc.id,
                &entity.id,
                RelationKind::DependsOn,
                1.0,
                serde_json::json!({}),
            )
            .await?;
        out.relationships_created += 1;
    }

    out.linkable_prose = elements
        .iter()
        .map(|el| el.text.clone())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xpath_like_paths_with_sibling_indices() {
        let xml = "<root><item>a</item><item>b</item></root>";
        let (elements, _) = parse_xml("f.xml", xml).unwrap();
        let paths: Vec<&str> = elements.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/root", "/root/item", "/root/item[2]"]);
        assert_eq!(elements[1].text, "a");
        assert_eq!(elements[2].text, "b");
    }

    #[test]
    fn test_depth_bound() {
        let xml = "<a><b><c><d>deep</d></c></b></a>";
        let (elements, _) = parse_xml("f.xml", xml).unwrap();
        assert!(elements.iter().all(|e| e.depth <= 3));
        // The d element's text still rolls up nowhere: it is below the bound.
        assert!(!elements.iter().any(|e| e.name == "d"));
    }

    #[test]
    fn test_attributes_preserved() {
        let xml = r#"<cfg env="prod"><host port="80">web</host></cfg>"#;
        let (elements, _) = parse_xml("f.xml", xml).unwrap();
        assert_eq!(
            elements[0].attributes,
            vec![("env".to_string(), "prod".to_string())]
        );
        assert_eq!(
            elements[1].attributes,
            vec![("port".to_string(), "80".to_string())]
        );
    }

    #[test]
    fn test_pom_dependencies() {
        let xml = r#"
            <project>
              <dependencies>
                <dependency>
                  <groupId>org.apache.commons</groupId>
                  <artifactId>commons-lang3</artifactId>
                  <version>3.14.0</version>
                </dependency>
                <dependency>
                  <groupId>junit</groupId>
                  <artifactId>junit</artifactId>
                </dependency>
              </dependencies>
            </project>
        "#;
        let (_, deps) = parse_xml("pom.xml", xml).unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].artifact_id, "commons-lang3");
        assert_eq!(deps[0].version.as_deref(), Some("3.14.0"));
        assert_eq!(deps[1].version, None);
    }

    #[test]
    fn test_malformed_xml_is_error() {
        assert!(parse_xml("bad.xml", "<a><b></a>").is_err());
    }
}
