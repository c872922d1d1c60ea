//! Per-project application context.
//!
//! Bundles the storage handle, embedding manager, HyDE expander, and
//! completion provider behind one explicitly-passed value — no ambient
//! globals. Caches are invalidated together through
//! [`AppContext::clear_project_cache`].

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::manager::EmbeddingManager;
use crate::hyde::HydeExpander;
use crate::provider::{create_completion_provider, CompletionProvider};
use crate::store::Store;

pub struct AppContext {
    pub config: Config,
    pub store: Store,
    pub embeddings: EmbeddingManager,
    pub hyde: HydeExpander,
    pub completion: Box<dyn CompletionProvider>,
}

impl AppContext {
    /// Open storage, run migrations, and wire up the providers.
    pub async fn init(config: Config) -> Result<Arc<Self>> {
        let store = Store::open(&config).await?;
        let embeddings = EmbeddingManager::new(&config.embedding)?;
        let hyde = HydeExpander::new(&config.hyde);
        let completion = create_completion_provider(&config.completion)?;
        Ok(Arc::new(Self {
            config,
            store,
            embeddings,
            hyde,
            completion,
        }))
    }

    /// Build a context over an existing store (tests).
    pub fn with_store(config: Config, store: Store) -> Result<Arc<Self>> {
        let embeddings = EmbeddingManager::new(&config.embedding)?;
        let hyde = HydeExpander::new(&config.hyde);
        let completion = create_completion_provider(&config.completion)?;
        Ok(Arc::new(Self {
            config,
            store,
            embeddings,
            hyde,
            completion,
        }))
    }

    /// Drop the embedding and HyDE caches for this project.
    pub async fn clear_project_cache(&self) {
        self.embeddings.clear_cache().await;
        self.hyde.clear_cache().await;
    }
}
