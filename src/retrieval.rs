//! Multi-strategy search with Reciprocal Rank Fusion.
//!
//! Three strategies each produce a ranked candidate list:
//! - **keyword** — locality-tiered text search over the store;
//! - **semantic** — cosine ranking over stored embeddings, using the
//!   (possibly HyDE-expanded) query vector;
//! - **graph** — BFS distance from the query's entity mentions,
//!   tie-broken by accumulated edge weight.
//!
//! Fusion: `score(e) = Σ_s weight_s × 1 / (k + rank_s(e))` with `k = 60`.
//! A strategy that did not return an entity contributes nothing. After
//! fusion: optional entity-type filter, de-duplication keeping the max
//! fused score, descending sort, `min_score` cut, and truncation.

use anyhow::Result;
use std::collections::HashMap;

use crate::config::RetrievalConfig;
use crate::embedding::manager::EmbeddingManager;
use crate::graph;
use crate::models::{Entity, EntityType, SearchResult, SearchSource};
use crate::query::ParsedQuery;
use crate::store::Store;

/// Options for one search call; fields default from [`RetrievalConfig`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub strategies: Vec<SearchSource>,
    pub entity_types: Vec<EntityType>,
    pub limit: usize,
    pub min_score: f64,
    /// Per-strategy weight overrides.
    pub weights: HashMap<SearchSource, f64>,
    pub graph_depth: usize,
}

impl SearchOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        let mut weights = HashMap::new();
        weights.insert(SearchSource::Keyword, config.keyword_weight);
        weights.insert(SearchSource::Semantic, config.semantic_weight);
        weights.insert(SearchSource::Graph, config.graph_weight);
        Self {
            strategies: vec![
                SearchSource::Keyword,
                SearchSource::Semantic,
                SearchSource::Graph,
            ],
            entity_types: Vec::new(),
            limit: config.final_limit,
            min_score: config.min_score,
            weights,
            graph_depth: config.graph_depth,
        }
    }
}

/// A fused, ranked result joined back to its entity.
#[derive(Debug, Clone)]
pub struct FusedResult {
    pub entity: Entity,
    pub score: f64,
    /// Strategies that surfaced this entity.
    pub sources: Vec<SearchSource>,
}

/// Run the enabled strategies and fuse their rankings.
pub async fn search(
    store: &Store,
    embeddings: &EmbeddingManager,
    parsed: &ParsedQuery,
    query_vector: Option<&[f32]>,
    options: &SearchOptions,
    rrf_k: f64,
    candidate_k: usize,
) -> Result<Vec<FusedResult>> {
    if parsed.normalized.is_empty() {
        return Ok(Vec::new());
    }

    let mut ranked_lists: Vec<(SearchSource, Vec<SearchResult>)> = Vec::new();

    for strategy in &options.strategies {
        let results = match strategy {
            SearchSource::Keyword => keyword_strategy(store, parsed, candidate_k).await?,
            SearchSource::Semantic => match query_vector {
                Some(vector) => {
                    // Provider failures upstream leave us without a vector;
                    // semantic search silently contributes nothing.
                    embeddings
                        .search(store, vector, None, candidate_k, f64::MIN)
                        .await
                        .unwrap_or_default()
                }
                None => Vec::new(),
            },
            SearchSource::Graph => {
                graph_strategy(store, parsed, options.graph_depth, candidate_k).await?
            }
        };
        if !results.is_empty() {
            ranked_lists.push((*strategy, results));
        }
    }

    let fused = rrf_fuse(&ranked_lists, &options.weights, rrf_k);

    // Join entities, filter by type, apply min_score, truncate.
    let mut results: Vec<FusedResult> = Vec::new();
    for (entity_id, score, sources) in fused {
        if score < options.min_score {
            continue;
        }
        let Some(entity) = store.get_entity(&entity_id).await? else {
            continue;
        };
        if !options.entity_types.is_empty()
            && !options.entity_types.contains(&entity.entity_type)
        {
            continue;
        }
        results.push(FusedResult {
            entity,
            score,
            sources,
        });
        if results.len() >= options.limit {
            break;
        }
    }
    Ok(results)
}

/// Fuse per-strategy rankings. Ranks are 1-based positions in each list;
/// duplicates within one list keep their best rank. Output is sorted by
/// fused score descending, ties broken by entity id for determinism.
pub fn rrf_fuse(
    ranked_lists: &[(SearchSource, Vec<SearchResult>)],
    weights: &HashMap<SearchSource, f64>,
    k: f64,
) -> Vec<(String, f64, Vec<SearchSource>)> {
    let mut fused: HashMap<String, (f64, Vec<SearchSource>)> = HashMap::new();

    for (strategy, results) in ranked_lists {
        let weight = weights.get(strategy).copied().unwrap_or(1.0);
        let mut seen_in_list: HashMap<&str, usize> = HashMap::new();
        for (i, result) in results.iter().enumerate() {
            let rank = i + 1;
            // De-duplicate within a single strategy list: best rank wins.
            if seen_in_list.contains_key(result.entity_id.as_str()) {
                continue;
            }
            seen_in_list.insert(&result.entity_id, rank);

            let entry = fused
                .entry(result.entity_id.clone())
                .or_insert_with(|| (0.0, Vec::new()));
            entry.0 += weight * (1.0 / (k + rank as f64));
            if !entry.1.contains(strategy) {
                entry.1.push(*strategy);
            }
        }
    }

    let mut out: Vec<(String, f64, Vec<SearchSource>)> = fused
        .into_iter()
        .map(|(id, (score, sources))| (id, score, sources))
        .collect();
    out.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    out
}

/// Keyword strategy: full-phrase search plus per-term searches, aggregated
/// by the best locality score with a small bonus per extra matching term.
async fn keyword_strategy(
    store: &Store,
    parsed: &ParsedQuery,
    candidate_k: usize,
) -> Result<Vec<SearchResult>> {
    let mut scores: HashMap<String, f64> = HashMap::new();

    let phrase_hits = store.search_text(&parsed.normalized, None, candidate_k).await?;
    for (entity, score) in phrase_hits {
        let entry = scores.entry(entity.id).or_insert(0.0);
        *entry = entry.max(score) + 0.05;
    }

    for term in parsed
        .expanded_terms
        .iter()
        .chain(parsed.entity_mentions.iter())
    {
        let hits = store.search_text(term, None, candidate_k).await?;
        for (entity, score) in hits {
            let entry = scores.entry(entity.id).or_insert(0.0);
            *entry = entry.max(score) + 0.05;
        }
    }

    let mut results: Vec<SearchResult> = scores
        .into_iter()
        .map(|(entity_id, score)| SearchResult {
            entity_id,
            score,
            source: SearchSource::Keyword,
        })
        .collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    results.truncate(candidate_k);
    Ok(results)
}

/// Graph strategy: resolve entity mentions to seed nodes, BFS outward,
/// and rank by distance (closer is better), then by accumulated edge
/// weight.
async fn graph_strategy(
    store: &Store,
    parsed: &ParsedQuery,
    graph_depth: usize,
    candidate_k: usize,
) -> Result<Vec<SearchResult>> {
    let mut seeds: Vec<String> = Vec::new();
    for mention in &parsed.entity_mentions {
        if let Some(entity) = store.get_by_qualified_name(mention).await? {
            seeds.push(entity.id);
            continue;
        }
        let by_name = store.find_by_name(mention, None).await?;
        if let Some(entity) = by_name.into_iter().next() {
            seeds.push(entity.id);
            continue;
        }
        if let Some((entity, _)) = store
            .search_text(mention, None, 1)
            .await?
            .into_iter()
            .next()
        {
            seeds.push(entity.id);
        }
    }
    if seeds.is_empty() {
        return Ok(Vec::new());
    }

    let mut reached = graph::bfs(store, &seeds, graph_depth, None).await?;
    reached.sort_by(|a, b| {
        a.depth
            .cmp(&b.depth)
            .then_with(|| {
                b.weight_sum
                    .partial_cmp(&a.weight_sum)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    reached.truncate(candidate_k);

    Ok(reached
        .into_iter()
        .map(|node| SearchResult {
            score: 1.0 / (1.0 + node.depth as f64),
            entity_id: node.entity_id,
            source: SearchSource::Graph,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, score: f64, source: SearchSource) -> SearchResult {
        SearchResult {
            entity_id: id.to_string(),
            score,
            source,
        }
    }

    fn unit_weights() -> HashMap<SearchSource, f64> {
        let mut w = HashMap::new();
        w.insert(SearchSource::Keyword, 1.0);
        w.insert(SearchSource::Semantic, 1.0);
        w.insert(SearchSource::Graph, 0.5);
        w
    }

    #[test]
    fn test_rrf_single_list_preserves_order() {
        let lists = vec![(
            SearchSource::Keyword,
            vec![
                result("e1", 1.0, SearchSource::Keyword),
                result("e2", 0.5, SearchSource::Keyword),
            ],
        )];
        let fused = rrf_fuse(&lists, &unit_weights(), 60.0);
        assert_eq!(fused[0].0, "e1");
        assert_eq!(fused[1].0, "e2");
        assert!((fused[0].1 - 1.0 / 61.0).abs() < 1e-9);
        assert!((fused[1].1 - 1.0 / 62.0).abs() < 1e-9);
    }

    #[test]
    fn test_rrf_fusion_scenario() {
        // keyword = [e1, e2, e3], semantic = [e3, e2, e4], weights 1.0/1.0.
        let lists = vec![
            (
                SearchSource::Keyword,
                vec![
                    result("e1", 3.0, SearchSource::Keyword),
                    result("e2", 2.0, SearchSource::Keyword),
                    result("e3", 1.0, SearchSource::Keyword),
                ],
            ),
            (
                SearchSource::Semantic,
                vec![
                    result("e3", 0.9, SearchSource::Semantic),
                    result("e2", 0.8, SearchSource::Semantic),
                    result("e4", 0.7, SearchSource::Semantic),
                ],
            ),
        ];
        let fused = rrf_fuse(&lists, &unit_weights(), 60.0);
        let order: Vec<&str> = fused.iter().map(|(id, _, _)| id.as_str()).collect();

        // Entities in both lists dominate single-list entities, and the
        // single-appearance tail orders e1 (rank 1) over e4 (rank 3).
        assert!(order[..2].contains(&"e2"));
        assert!(order[..2].contains(&"e3"));
        assert_eq!(order[2], "e1");
        assert_eq!(order[3], "e4");

        // Exact formula check: e2 at ranks 2,2; e3 at ranks 3,1.
        let score_of = |id: &str| fused.iter().find(|(i, _, _)| i == id).unwrap().1;
        assert!((score_of("e2") - (1.0 / 62.0 + 1.0 / 62.0)).abs() < 1e-12);
        assert!((score_of("e3") - (1.0 / 63.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert!((score_of("e1") - 1.0 / 61.0).abs() < 1e-12);
        assert!((score_of("e4") - 1.0 / 63.0).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_monotone_in_weight() {
        let lists = vec![
            (
                SearchSource::Keyword,
                vec![
                    result("a", 1.0, SearchSource::Keyword),
                    result("b", 0.9, SearchSource::Keyword),
                ],
            ),
            (
                SearchSource::Graph,
                vec![result("b", 1.0, SearchSource::Graph)],
            ),
        ];

        let rank_of = |weights: &HashMap<SearchSource, f64>| -> usize {
            let fused = rrf_fuse(&lists, weights, 60.0);
            fused.iter().position(|(id, _, _)| id == "b").unwrap()
        };

        let mut low = unit_weights();
        low.insert(SearchSource::Graph, 0.1);
        let mut high = unit_weights();
        high.insert(SearchSource::Graph, 5.0);

        // Raising the graph weight never lowers b's fused rank.
        assert!(rank_of(&high) <= rank_of(&low));
    }

    #[test]
    fn test_rrf_missing_strategy_contributes_zero() {
        let lists = vec![(
            SearchSource::Semantic,
            vec![result("x", 0.9, SearchSource::Semantic)],
        )];
        let fused = rrf_fuse(&lists, &unit_weights(), 60.0);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].1 - 1.0 / 61.0).abs() < 1e-12);
        assert_eq!(fused[0].2, vec![SearchSource::Semantic]);
    }

    #[test]
    fn test_rrf_dedup_within_list_keeps_best_rank() {
        let lists = vec![(
            SearchSource::Keyword,
            vec![
                result("dup", 1.0, SearchSource::Keyword),
                result("dup", 0.5, SearchSource::Keyword),
            ],
        )];
        let fused = rrf_fuse(&lists, &unit_weights(), 60.0);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].1 - 1.0 / 61.0).abs() < 1e-12);
    }
}
