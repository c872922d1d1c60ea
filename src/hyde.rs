//! HyDE (Hypothetical Document Embedding) query expansion.
//!
//! Conceptual queries retrieve better when the query vector looks like an
//! answer rather than a question. For eligible queries the expander asks
//! the completion provider to draft a hypothetical answer and embeds it
//! alongside the literal query. When the provider is unavailable and
//! fallback is enabled, both vectors equal the literal embedding and
//! `used_hyde` is false. Expansions are cached per
//! `(project_id, normalized_query)`.

use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::config::HydeConfig;
use crate::embedding::manager::EmbeddingManager;
use crate::provider::CompletionProvider;
use crate::query::ParsedQuery;

/// Result of query expansion.
#[derive(Debug, Clone)]
pub struct HydeExpansion {
    pub used_hyde: bool,
    pub hypothetical: Option<String>,
    /// Embedding used for semantic search (hypothetical answer when HyDE
    /// ran, the literal query otherwise).
    pub query_vector: Vec<f32>,
    /// Embedding of the literal query text.
    pub literal_vector: Vec<f32>,
}

pub struct HydeExpander {
    config: HydeConfig,
    cache: Mutex<HashMap<(String, String), HydeExpansion>>,
}

impl HydeExpander {
    pub fn new(config: &HydeConfig) -> Self {
        Self {
            config: config.clone(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Eligibility heuristic: long enough, no explicit entity mentions,
    /// and a conceptual intent.
    pub fn should_expand(&self, parsed: &ParsedQuery) -> bool {
        self.config.enabled
            && parsed.normalized.len() >= self.config.min_query_length
            && parsed.entity_mentions.is_empty()
            && self
                .config
                .intents
                .iter()
                .any(|i| i == parsed.intent.as_str())
    }

    /// Expand a query, consulting the cache first.
    pub async fn expand(
        &self,
        project_id: &str,
        parsed: &ParsedQuery,
        completion: &dyn CompletionProvider,
        embeddings: &EmbeddingManager,
    ) -> Result<HydeExpansion> {
        let cache_key = (project_id.to_string(), parsed.normalized.clone());
        if let Some(hit) = self.cache.lock().await.get(&cache_key) {
            return Ok(hit.clone());
        }

        let literal_vector = embeddings.embed_text(&parsed.raw).await?;

        let expansion = if self.should_expand(parsed) {
            match completion.complete(&hyde_prompt(&parsed.raw)).await {
                Ok(hypothetical) if !hypothetical.trim().is_empty() => {
                    let query_vector = embeddings.embed_text(&hypothetical).await?;
                    HydeExpansion {
                        used_hyde: true,
                        hypothetical: Some(hypothetical),
                        query_vector,
                        literal_vector: literal_vector.clone(),
                    }
                }
                Ok(_) | Err(_) if self.config.fallback_to_direct_embed => HydeExpansion {
                    used_hyde: false,
                    hypothetical: None,
                    query_vector: literal_vector.clone(),
                    literal_vector: literal_vector.clone(),
                },
                Ok(_) => HydeExpansion {
                    used_hyde: false,
                    hypothetical: None,
                    query_vector: literal_vector.clone(),
                    literal_vector: literal_vector.clone(),
                },
                Err(e) => return Err(e),
            }
        } else {
            HydeExpansion {
                used_hyde: false,
                hypothetical: None,
                query_vector: literal_vector.clone(),
                literal_vector: literal_vector.clone(),
            }
        };

        self.cache
            .lock()
            .await
            .insert(cache_key, expansion.clone());
        Ok(expansion)
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }
}

fn hyde_prompt(query: &str) -> String {
    format!(
        "Write a short, factual passage that would answer the following \
         question about a software project. Answer as if quoting the \
         project's documentation.\n\nQuestion: {}\n\nPassage:",
        query
    )
}
