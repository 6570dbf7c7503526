//! Bounded depth-first traversal over a relation adjacency map.
//!
//! There is no visited set: a cycle is walked again on every pass until the
//! depth runs out, so `depth` and `limit` are the only bounds. Seeds are
//! processed first-seeds-first and the last one that overflows the shared
//! budget is truncated; later seeds are dropped.

use super::{Adjacency, Entity, RelationMap, RelationTriplet};

/// Lower-case adjacency keys so lookups are case-insensitive.
///
/// Subjects that differ only in case are merged, in sorted key order.
pub fn normalize_adjacency(adjacency: Adjacency) -> Adjacency {
    let mut keys: Vec<String> = adjacency.keys().cloned().collect();
    keys.sort();

    let mut adjacency = adjacency;
    let mut normalized = Adjacency::with_capacity(keys.len());
    for key in keys {
        if let Some(edges) = adjacency.remove(&key) {
            normalized.entry(key.to_lowercase()).or_default().extend(edges);
        }
    }
    normalized
}

struct Frame {
    subject: String,
    depth: usize,
    next_edge: usize,
}

/// Pre-order walk from one seed.
///
/// Each node emits at most `limit` of its own edges and recurses into every
/// emitted object with `depth - 1`. Output stops at `cap` triplets, since the
/// caller never keeps more than that.
fn walk_seed(adjacency: &Adjacency, seed: &str, depth: usize, limit: usize, cap: usize) -> Vec<RelationTriplet> {
    let mut triplets = Vec::new();
    let mut stack = vec![Frame {
        subject: seed.to_string(),
        depth,
        next_edge: 0,
    }];

    while let Some(frame) = stack.last_mut() {
        if triplets.len() >= cap {
            break;
        }
        if frame.depth == 0 || frame.next_edge >= limit {
            stack.pop();
            continue;
        }

        let edge = adjacency
            .get(&frame.subject.to_lowercase())
            .and_then(|edges| edges.get(frame.next_edge));

        match edge {
            Some((predicate, object)) => {
                frame.next_edge += 1;
                triplets.push(RelationTriplet::new(frame.subject.clone(), predicate.clone(), object.clone()));
                let child = Frame {
                    subject: object.clone(),
                    depth: frame.depth - 1,
                    next_edge: 0,
                };
                stack.push(child);
            }
            None => {
                stack.pop();
            }
        }
    }

    triplets
}

/// Walk every seed to `depth` hops and keep at most `limit` triplets overall.
///
/// `adjacency` must already be normalized (see [`normalize_adjacency`]).
pub fn traverse(adjacency: &Adjacency, seeds: &[Entity], depth: usize, limit: usize) -> RelationMap {
    let mut rel_map = RelationMap::new();
    if depth == 0 {
        return rel_map;
    }

    // One past the budget is enough to tell "fits" from "overflows".
    let cap = limit.saturating_add(1);
    let mut rel_count = 0;
    for seed in seeds {
        let mut triplets = walk_seed(adjacency, seed.as_str(), depth, limit, cap);
        if rel_count + triplets.len() > limit {
            triplets.truncate(limit - rel_count);
            rel_map.insert(seed.as_str(), triplets);
            break;
        }
        rel_count += triplets.len();
        rel_map.insert(seed.as_str(), triplets);
    }

    log::debug!(
        "Graph traversal: {} seeds, depth {}, {} triplets",
        rel_map.len(),
        depth,
        rel_map.triplet_count()
    );
    rel_map
}
