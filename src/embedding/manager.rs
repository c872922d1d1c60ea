//! Per-project embedding manager.
//!
//! Sits between ingestion/search and the configured provider: batches
//! entity texts, coalesces duplicate requests by text hash through a
//! shared cache, stores vectors via the storage layer, and runs
//! brute-force cosine ranking for semantic search.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use tokio::sync::Mutex;

use crate::config::EmbeddingConfig;
use crate::embedding::{cosine_similarity, create_provider, text_hash, EmbeddingProvider};
use crate::error::CoreError;
use crate::models::{EntityType, SearchResult, SearchSource};
use crate::store::Store;
use crate::CancelFlag;

pub struct EmbeddingManager {
    provider: Box<dyn EmbeddingProvider>,
    config: EmbeddingConfig,
    /// text-hash → vector. Concurrent callers serialize on this lock, so a
    /// duplicate request resolves from cache instead of hitting the provider.
    cache: Mutex<HashMap<String, Vec<f32>>>,
}

impl EmbeddingManager {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            provider: create_provider(config)?,
            config: config.clone(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// Compute (or fetch from cache) one vector for a text.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let key = text_hash(text);
        let mut cache = self.cache.lock().await;
        if let Some(hit) = cache.get(&key) {
            return Ok(hit.clone());
        }

        let vectors = self.provider.embed(&[text.to_string()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::ProviderUnavailable("empty embedding response".into()))?;
        cache.insert(key, vector.clone());
        Ok(vector)
    }

    /// Embed one entity's text and persist the vector.
    pub async fn embed_entity(&self, store: &Store, entity_id: &str, text: &str) -> Result<()> {
        let vector = self.embed_text(text).await?;
        store
            .put_embedding(entity_id, self.provider.model_name(), &vector)
            .await?;
        Ok(())
    }

    /// Embed a batch of `(entity_id, text)` pairs with provider-side
    /// batching and per-hash de-duplication. Individual provider failures
    /// degrade to collected errors rather than aborting the batch. Returns
    /// `(embeddings_generated, errors)`.
    pub async fn embed_batch(
        &self,
        store: &Store,
        items: &[(String, String)],
        cancel: &CancelFlag,
    ) -> (usize, Vec<String>) {
        let mut generated = 0usize;
        let mut errors = Vec::new();

        for chunk in items.chunks(self.config.batch_size.max(1)) {
            if cancel.load(Ordering::Relaxed) {
                errors.push(CoreError::Cancelled.to_string());
                break;
            }

            // De-duplicate the chunk by text hash; cached texts skip the
            // provider entirely.
            let mut pending_texts: Vec<String> = Vec::new();
            let mut pending_hashes: Vec<String> = Vec::new();
            {
                let cache = self.cache.lock().await;
                for (_, text) in chunk {
                    let key = text_hash(text);
                    if !cache.contains_key(&key) && !pending_hashes.contains(&key) {
                        pending_hashes.push(key);
                        pending_texts.push(text.clone());
                    }
                }
            }

            if !pending_texts.is_empty() {
                match self.provider.embed(&pending_texts).await {
                    Ok(vectors) => {
                        let mut cache = self.cache.lock().await;
                        for (key, vector) in pending_hashes.iter().zip(vectors) {
                            cache.insert(key.clone(), vector);
                        }
                    }
                    Err(e) => {
                        errors.push(format!("embedding batch failed: {}", e));
                        continue;
                    }
                }
            }

            let cache = self.cache.lock().await;
            for (entity_id, text) in chunk {
                let key = text_hash(text);
                if let Some(vector) = cache.get(&key) {
                    match store
                        .put_embedding(entity_id, self.provider.model_name(), vector)
                        .await
                    {
                        Ok(()) => generated += 1,
                        Err(e) => errors.push(format!("storing embedding for {}: {}", entity_id, e)),
                    }
                }
            }
        }

        (generated, errors)
    }

    /// Cosine-ranked scan over all stored vectors for the project.
    pub async fn search(
        &self,
        store: &Store,
        query_vector: &[f32],
        entity_type: Option<EntityType>,
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<SearchResult>> {
        let stored = store.all_embeddings(entity_type).await?;

        let mut results: Vec<SearchResult> = stored
            .into_iter()
            .map(|(entity_id, _t, vector)| {
                let score = cosine_similarity(query_vector, &vector) as f64;
                SearchResult {
                    entity_id,
                    score,
                    source: SearchSource::Semantic,
                }
            })
            .filter(|r| r.score >= min_score)
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        results.truncate(limit);
        Ok(results)
    }

    /// Drop all cached vectors (called when a project's files re-ingest).
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }
}
