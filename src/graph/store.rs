use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::{Adjacency, GraphStore, RelationTriplet};
use crate::error::{RagrouteError, Result};

/// On-disk layout: `{"graph_dict": {"subject": [["predicate", "object"], ...]}}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphFile {
    #[serde(default)]
    graph_dict: Adjacency,
}

/// In-memory relationship store persisted as a single JSON file.
///
/// Has no schema, so [`GraphStore::get_schema`] reports `NotImplemented`.
#[derive(Debug, Default)]
pub struct SimpleGraphStore {
    graph: RwLock<Adjacency>,
    persist_path: Option<PathBuf>,
}

impl SimpleGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from `path`. A missing file yields an empty store bound to that path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let graph = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let file: GraphFile = serde_json::from_str(&raw)?;
            log::info!(
                "Loaded graph store from {} ({} subjects)",
                path.display(),
                file.graph_dict.len()
            );
            file.graph_dict
        } else {
            log::info!("No graph store at {}, starting empty", path.display());
            Adjacency::new()
        };

        Ok(Self {
            graph: RwLock::new(graph),
            persist_path: Some(path.to_path_buf()),
        })
    }

    /// Build a store from triplets, mostly for seeding and tests.
    pub fn from_triplets<I>(triplets: I) -> Self
    where
        I: IntoIterator<Item = RelationTriplet>,
    {
        let store = Self::new();
        for triplet in triplets {
            store.insert_unchecked(triplet);
        }
        store
    }

    fn insert_unchecked(&self, triplet: RelationTriplet) {
        let mut graph = self.graph.write().unwrap_or_else(|e| e.into_inner());
        add_edge(&mut graph, triplet);
    }

    /// Add a relation. Duplicate `(predicate, object)` pairs under a subject are ignored.
    pub fn upsert_triplet(&self, triplet: RelationTriplet) -> Result<()> {
        for (field, value) in [
            ("subject", &triplet.subject),
            ("predicate", &triplet.predicate),
            ("object", &triplet.object),
        ] {
            if value.trim().is_empty() {
                return Err(RagrouteError::InvalidInput(format!("Triplet {} is empty", field)));
            }
        }

        let mut graph = self
            .graph
            .write()
            .map_err(|e| RagrouteError::InvalidInput(format!("Graph lock poisoned: {}", e)))?;
        add_edge(&mut graph, triplet);
        Ok(())
    }

    /// Remove a relation; the subject disappears once it has no edges left.
    pub fn delete(&self, subject: &str, predicate: &str, object: &str) -> Result<bool> {
        let mut graph = self
            .graph
            .write()
            .map_err(|e| RagrouteError::InvalidInput(format!("Graph lock poisoned: {}", e)))?;

        let Some(edges) = graph.get_mut(subject) else {
            return Ok(false);
        };
        let before = edges.len();
        edges.retain(|(p, o)| !(p == predicate && o == object));
        let removed = edges.len() != before;
        if edges.is_empty() {
            graph.remove(subject);
        }
        Ok(removed)
    }

    /// Write the store to `path` (or the path it was loaded from).
    pub fn persist(&self, path: Option<&Path>) -> Result<()> {
        let path = path
            .or(self.persist_path.as_deref())
            .ok_or_else(|| RagrouteError::Config("Graph store has no persist path".to_string()))?;

        let snapshot = self.snapshot()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let body = serde_json::to_string_pretty(&GraphFile { graph_dict: snapshot })?;
        std::fs::write(path, body)?;
        log::debug!("Persisted graph store to {}", path.display());
        Ok(())
    }

    fn snapshot(&self) -> Result<Adjacency> {
        self.graph
            .read()
            .map(|graph| graph.clone())
            .map_err(|e| RagrouteError::InvalidInput(format!("Graph lock poisoned: {}", e)))
    }
}

fn add_edge(graph: &mut Adjacency, triplet: RelationTriplet) {
    let edges = graph.entry(triplet.subject).or_default();
    let edge = (triplet.predicate, triplet.object);
    if !edges.contains(&edge) {
        edges.push(edge);
    }
}

#[async_trait]
impl GraphStore for SimpleGraphStore {
    async fn adjacency(&self) -> Result<Adjacency> {
        self.snapshot()
    }

    async fn get_schema(&self, _refresh: bool) -> Result<String> {
        Err(RagrouteError::NotImplemented(
            "SimpleGraphStore has no schema".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Entity;
    use tempfile::TempDir;

    fn berry_triplets() -> Vec<RelationTriplet> {
        vec![
            RelationTriplet::new("Peter Berry", "is shareholder of", "SME LENDING"),
            RelationTriplet::new("SME LENDING", "has shareholder", "Peter Berry"),
        ]
    }

    #[tokio::test]
    async fn test_rel_map_through_trait() {
        let store = SimpleGraphStore::from_triplets(berry_triplets());
        let map = store
            .get_rel_map(&[Entity::new("peter berry")], 2, 30)
            .await
            .unwrap();
        assert_eq!(map.triplet_count(), 2);
    }

    #[tokio::test]
    async fn test_schema_not_implemented() {
        let store = SimpleGraphStore::new();
        let err = store.get_schema(false).await.unwrap_err();
        assert!(matches!(err, RagrouteError::NotImplemented(_)));
    }

    #[test]
    fn test_upsert_dedup_and_validation() {
        let store = SimpleGraphStore::new();
        let triplet = RelationTriplet::new("a", "r", "b");
        store.upsert_triplet(triplet.clone()).unwrap();
        store.upsert_triplet(triplet).unwrap();
        assert_eq!(store.snapshot().unwrap()["a"].len(), 1);

        let err = store.upsert_triplet(RelationTriplet::new("a", " ", "b")).unwrap_err();
        assert!(matches!(err, RagrouteError::InvalidInput(_)));
    }

    #[test]
    fn test_seeding_survives_poisoned_lock() {
        let store = SimpleGraphStore::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = store.graph.write().unwrap();
            panic!("writer died");
        }));
        assert!(result.is_err());
        assert!(store.graph.is_poisoned());

        store.insert_unchecked(RelationTriplet::new("a", "r", "b"));
        let graph = store.graph.read().unwrap_or_else(|e| e.into_inner());
        assert_eq!(graph["a"], vec![("r".to_string(), "b".to_string())]);
    }

    #[test]
    fn test_delete_removes_empty_subject() {
        let store = SimpleGraphStore::from_triplets(vec![RelationTriplet::new("a", "r", "b")]);
        assert!(!store.delete("a", "r", "missing").unwrap());
        assert!(store.delete("a", "r", "b").unwrap());
        assert!(store.snapshot().unwrap().is_empty());
        assert!(!store.delete("a", "r", "b").unwrap());
    }

    #[test]
    fn test_persist_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("graph_store.json");

        let store = SimpleGraphStore::from_file(&path).unwrap();
        assert!(store.snapshot().unwrap().is_empty());
        for triplet in berry_triplets() {
            store.upsert_triplet(triplet).unwrap();
        }
        store.persist(None).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("graph_dict"));

        let reloaded = SimpleGraphStore::from_file(&path).unwrap();
        let graph = reloaded.snapshot().unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(
            graph["Peter Berry"],
            vec![("is shareholder of".to_string(), "SME LENDING".to_string())]
        );
    }

    #[test]
    fn test_persist_without_path_fails() {
        let store = SimpleGraphStore::new();
        assert!(matches!(store.persist(None), Err(RagrouteError::Config(_))));
    }
}
