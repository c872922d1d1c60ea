//! Graph traversal over stored relationships.
//!
//! All traversal is bounded by an explicit depth limit and a per-call
//! visited set, so cycles in the code graph (`CALLS`, `IMPORTS`) are safe.
//! Hub nodes get no special treatment.
//!
//! `RELATES_TO` is written as a single directed edge but treated as
//! bidirectional here: a directional neighbor query includes `RELATES_TO`
//! edges from the opposite direction as well.

use anyhow::Result;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{Direction, RelationKind, Relationship};
use crate::store::Store;

/// A node reached by BFS.
#[derive(Debug, Clone)]
pub struct ReachedNode {
    pub entity_id: String,
    pub depth: usize,
    /// Sum of edge weights along the discovery path; tie-breaker for
    /// equal-depth ranking.
    pub weight_sum: f64,
}

/// Neighboring edges of an entity, honoring direction and an optional
/// relationship-kind filter.
pub async fn neighbors(
    store: &Store,
    entity_id: &str,
    direction: Direction,
    kind_filter: Option<&[RelationKind]>,
) -> Result<Vec<Relationship>> {
    let mut edges = store.relationships_for(entity_id, direction).await?;

    // RELATES_TO reads as bidirectional: pull the reverse-direction edges
    // of that kind too.
    if direction != Direction::Both {
        let reverse = match direction {
            Direction::Out => Direction::In,
            Direction::In => Direction::Out,
            Direction::Both => unreachable!(),
        };
        let reverse_edges = store.relationships_for(entity_id, reverse).await?;
        edges.extend(
            reverse_edges
                .into_iter()
                .filter(|r| r.kind == RelationKind::RelatesTo),
        );
    }

    if let Some(kinds) = kind_filter {
        edges.retain(|r| kinds.contains(&r.kind));
    }
    Ok(edges)
}

/// Breadth-first expansion from a set of seed entities.
///
/// Depth 0 returns only the seeds. Edges are followed in both directions.
pub async fn bfs(
    store: &Store,
    seeds: &[String],
    max_depth: usize,
    kind_filter: Option<&[RelationKind]>,
) -> Result<Vec<ReachedNode>> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut reached: Vec<ReachedNode> = Vec::new();
    let mut queue: VecDeque<(String, usize, f64)> = VecDeque::new();

    for seed in seeds {
        if visited.insert(seed.clone()) {
            queue.push_back((seed.clone(), 0, 0.0));
            reached.push(ReachedNode {
                entity_id: seed.clone(),
                depth: 0,
                weight_sum: 0.0,
            });
        }
    }

    while let Some((current, depth, weight_sum)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let edges = store.relationships_for(&current, Direction::Both).await?;
        for edge in edges {
            if let Some(kinds) = kind_filter {
                if !kinds.contains(&edge.kind) {
                    continue;
                }
            }
            let next = if edge.source_id == current {
                edge.target_id.clone()
            } else {
                edge.source_id.clone()
            };
            if visited.insert(next.clone()) {
                let next_weight = weight_sum + edge.weight;
                reached.push(ReachedNode {
                    entity_id: next.clone(),
                    depth: depth + 1,
                    weight_sum: next_weight,
                });
                queue.push_back((next, depth + 1, next_weight));
            }
        }
    }

    Ok(reached)
}

/// Shortest undirected path between two entities, as a list of entity ids
/// from `from` to `to`. `None` when unreachable.
pub async fn shortest_path(
    store: &Store,
    from: &str,
    to: &str,
    max_depth: usize,
) -> Result<Option<Vec<String>>> {
    if from == to {
        return Ok(Some(vec![from.to_string()]));
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut parent: HashMap<String, String> = HashMap::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();

    visited.insert(from.to_string());
    queue.push_back((from.to_string(), 0));

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let edges = store.relationships_for(&current, Direction::Both).await?;
        for edge in edges {
            let next = if edge.source_id == current {
                edge.target_id.clone()
            } else {
                edge.source_id.clone()
            };
            if !visited.insert(next.clone()) {
                continue;
            }
            parent.insert(next.clone(), current.clone());
            if next == to {
                let mut path = vec![next.clone()];
                let mut cursor = next;
                while let Some(p) = parent.get(&cursor) {
                    path.push(p.clone());
                    cursor = p.clone();
                }
                path.reverse();
                return Ok(Some(path));
            }
            queue.push_back((next, depth + 1));
        }
    }

    Ok(None)
}
