//! Knowledge graph module: relation types, the graph store seam, and the
//! bounded depth-first traversal that turns seed entities into a relation map.

mod extraction;
mod store;
mod traversal;

pub use extraction::{extract_capitalized_entities, parse_keywords_from_response};
pub use store::SimpleGraphStore;
pub use traversal::{normalize_adjacency, traverse};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::Result;
use crate::retrieval::RetrieverMode;

/// Raw adjacency export: subject -> ordered (predicate, object) pairs.
pub type Adjacency = HashMap<String, Vec<(String, String)>>;

/// Case-insensitive entity label. Keeps the original spelling for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(String);

impl Entity {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity key: lower-cased label.
    pub fn normalized(&self) -> String {
        self.0.to_lowercase()
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Entity {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

/// A directed `subject -[predicate]-> object` fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationTriplet {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl RelationTriplet {
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

impl fmt::Display for RelationTriplet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.subject, self.predicate, self.object)
    }
}

/// Seed entity -> triplets reachable from it, in seed insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationMap {
    entries: Vec<(String, Vec<RelationTriplet>)>,
}

impl RelationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a seed's triplets. Seeds are expected to be distinct.
    pub fn insert(&mut self, subject: impl Into<String>, triplets: Vec<RelationTriplet>) {
        self.entries.push((subject.into(), triplets));
    }

    pub fn get(&self, subject: &str) -> Option<&[RelationTriplet]> {
        self.entries
            .iter()
            .find(|(s, _)| s == subject)
            .map(|(_, triplets)| triplets.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[RelationTriplet])> {
        self.entries.iter().map(|(s, t)| (s.as_str(), t.as_slice()))
    }

    /// Number of seeds in the map (including seeds with no triplets).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total triplets across all seeds.
    pub fn triplet_count(&self) -> usize {
        self.entries.iter().map(|(_, t)| t.len()).sum()
    }

    /// All triplets in seed order, rendered as `subject -[predicate]-> object`.
    pub fn flatten_texts(&self) -> Vec<String> {
        self.entries
            .iter()
            .flat_map(|(_, triplets)| triplets.iter().map(ToString::to_string))
            .collect()
    }
}

/// Traversal and extraction knobs for the graph retriever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphOptions {
    pub traversal_depth: usize,
    /// Total triplet budget across all seeds (and per node fan-out).
    pub max_knowledge_sequence: usize,
    pub max_entities: usize,
    pub max_synonyms: usize,
    pub retriever_mode: RetrieverMode,
    pub refresh_schema: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            traversal_depth: 2,
            max_knowledge_sequence: 30,
            max_entities: 5,
            max_synonyms: 5,
            retriever_mode: RetrieverMode::Keyword,
            refresh_schema: false,
        }
    }
}

/// Relationship store the graph retriever walks.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Raw adjacency export used by the per-entity walk.
    async fn adjacency(&self) -> Result<Adjacency>;

    /// Graph schema description. Stores without one return `NotImplemented`.
    async fn get_schema(&self, refresh: bool) -> Result<String>;

    /// Relation map for `subjects` within `depth` hops and `limit` total triplets.
    async fn get_rel_map(&self, subjects: &[Entity], depth: usize, limit: usize) -> Result<RelationMap> {
        let adjacency = normalize_adjacency(self.adjacency().await?);
        Ok(traverse(&adjacency, subjects, depth, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_entity_identity_is_case_insensitive() {
        assert_eq!(Entity::new("SME Lending"), Entity::new("sme lending"));
        let set: HashSet<Entity> = ["Peter Berry", "PETER BERRY", "peter berry"]
            .into_iter()
            .map(Entity::from)
            .collect();
        assert_eq!(set.len(), 1);
        assert_eq!(Entity::new("ACME").to_string(), "ACME");
    }

    #[test]
    fn test_triplet_display() {
        let triplet = RelationTriplet::new("Peter Berry", "is shareholder of", "SME LENDING");
        assert_eq!(triplet.to_string(), "Peter Berry -[is shareholder of]-> SME LENDING");
    }

    #[test]
    fn test_relation_map_flatten_in_seed_order() {
        let mut map = RelationMap::new();
        map.insert("b", vec![RelationTriplet::new("b", "r", "c")]);
        map.insert("a", vec![]);
        map.insert("x", vec![RelationTriplet::new("x", "r1", "y"), RelationTriplet::new("y", "r2", "z")]);

        assert_eq!(map.len(), 3);
        assert_eq!(map.triplet_count(), 3);
        assert_eq!(map.flatten_texts(), vec!["b -[r]-> c", "x -[r1]-> y", "y -[r2]-> z"]);
        assert_eq!(map.get("a").unwrap().len(), 0);
        assert!(map.get("missing").is_none());
    }
}
