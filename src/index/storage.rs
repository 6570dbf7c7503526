//! Persisted storage for per-document semantic indexes.
//!
//! A [`StorageContext`] is an immutable snapshot of one persistence location:
//! its docstore plus every index built there. Rebuilds produce a new context
//! and persist it; nothing mutates a context that others may hold.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::db::Db;
use crate::embeddings::{blob_to_embedding, cosine_similarity, embedding_to_blob, Embedder};
use crate::error::{RagrouteError, Result};
use crate::retrieval::{MetadataMode, NodeWithScore, TextNode};

/// A bucket/path pair naming where indexes are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageLocation {
    pub bucket: String,
    pub path: String,
}

impl StorageLocation {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.bucket, self.path)
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct IndexedNode {
    node: TextNode,
    embedding: Vec<f32>,
}

/// Vector index over the nodes of exactly one document.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticIndex {
    index_id: String,
    doc_id: String,
    nodes: Vec<IndexedNode>,
}

impl SemanticIndex {
    /// Embed `nodes` (embed-mode content) and index them under `index_id`.
    pub async fn build(
        index_id: impl Into<String>,
        doc_id: impl Into<String>,
        nodes: Vec<TextNode>,
        embedder: &dyn Embedder,
    ) -> Result<Self> {
        let texts: Vec<String> = nodes.iter().map(|n| n.get_content(MetadataMode::Embed)).collect();
        let embeddings = embedder.embed_batch(texts).await?;
        if embeddings.len() != nodes.len() {
            return Err(RagrouteError::Embedding(format!(
                "Expected {} embeddings, got {}",
                nodes.len(),
                embeddings.len()
            )));
        }

        Ok(Self {
            index_id: index_id.into(),
            doc_id: doc_id.into(),
            nodes: nodes
                .into_iter()
                .zip(embeddings)
                .map(|(node, embedding)| IndexedNode { node, embedding })
                .collect(),
        })
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes ranked by cosine similarity to `query_embedding`, best first.
    pub fn top_k(&self, query_embedding: &[f32], k: usize) -> Vec<NodeWithScore> {
        let mut scored: Vec<(f32, &IndexedNode)> = self
            .nodes
            .iter()
            .map(|n| (cosine_similarity(query_embedding, &n.embedding), n))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(k)
            .map(|(score, n)| NodeWithScore::new(n.node.clone(), Some(score)))
            .collect()
    }

    pub async fn query(&self, query: &str, embedder: &dyn Embedder, k: usize) -> Result<Vec<NodeWithScore>> {
        let query_embedding = embedder.embed_query(query).await?;
        Ok(self.top_k(&query_embedding, k))
    }
}

/// Docstore and indexes persisted at one location.
#[derive(Debug, Clone)]
pub struct StorageContext {
    location: StorageLocation,
    docstore: HashMap<String, (String, TextNode)>,
    indexes: HashMap<String, Arc<SemanticIndex>>,
}

impl StorageContext {
    pub fn empty(location: StorageLocation) -> Self {
        Self {
            location,
            docstore: HashMap::new(),
            indexes: HashMap::new(),
        }
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    /// Register a document's nodes in the docstore, replacing any nodes
    /// previously stored for `doc_id`.
    pub fn add_documents(&mut self, doc_id: &str, nodes: &[TextNode]) {
        self.docstore.retain(|_, (existing, _)| existing != doc_id);
        for node in nodes {
            self.docstore
                .insert(node.id.clone(), (doc_id.to_string(), node.clone()));
        }
    }

    pub fn docstore_len(&self) -> usize {
        self.docstore.len()
    }

    pub fn insert_index(&mut self, index: SemanticIndex) -> Arc<SemanticIndex> {
        let index = Arc::new(index);
        self.indexes.insert(index.index_id().to_string(), index.clone());
        index
    }

    pub fn index_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.indexes.keys().map(String::as_str).collect();
        ids.sort();
        ids
    }

    /// Indexes for `ids`, in order. Any missing id fails the whole call.
    pub fn load_indices(&self, ids: &[String]) -> Result<Vec<Arc<SemanticIndex>>> {
        let missing: Vec<&str> = ids
            .iter()
            .filter(|id| !self.indexes.contains_key(*id))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(RagrouteError::IndexResolution(format!(
                "No index for ids [{}] at {}",
                missing.join(", "),
                self.location
            )));
        }

        Ok(ids.iter().filter_map(|id| self.indexes.get(id).cloned()).collect())
    }
}

/// Backend that fetches and persists storage contexts.
#[async_trait]
pub trait IndexStorage: Send + Sync {
    /// Load the context at `location`; `StorageNotFound` when it was never persisted.
    async fn fetch(&self, location: &StorageLocation) -> Result<StorageContext>;

    /// Write `context` to its location, creating the location if needed.
    async fn persist(&self, context: &StorageContext) -> Result<()>;
}

/// SQLite-backed [`IndexStorage`] over the `001_index_store` schema.
#[derive(Debug, Clone)]
pub struct SqliteIndexStorage {
    db: Db,
}

type IndexRow = (String, String, String, i64, Vec<u8>);

impl SqliteIndexStorage {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Drop one index (and its node rows). Returns whether it existed.
    pub async fn delete_index(&self, location: &StorageLocation, index_id: &str) -> Result<bool> {
        let key = location.key();
        let index_id = index_id.to_string();
        self.db
            .with_connection(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM index_structs WHERE location_key = ?1 AND index_id = ?2",
                    params![key, index_id],
                )?;
                Ok(deleted > 0)
            })
            .await
    }
}

fn node_from_row(node_id: String, text: String, metadata_json: &str) -> Result<TextNode> {
    let stored: StoredNodeMeta = serde_json::from_str(metadata_json)?;
    Ok(TextNode {
        id: node_id,
        text,
        metadata: stored.metadata,
        excluded_embed_metadata_keys: stored.excluded_embed_metadata_keys,
        excluded_llm_metadata_keys: stored.excluded_llm_metadata_keys,
    })
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredNodeMeta {
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    excluded_embed_metadata_keys: Vec<String>,
    #[serde(default)]
    excluded_llm_metadata_keys: Vec<String>,
}

#[async_trait]
impl IndexStorage for SqliteIndexStorage {
    async fn fetch(&self, location: &StorageLocation) -> Result<StorageContext> {
        let location = location.clone();
        self.db
            .with_connection(move |conn| {
                let key = location.key();
                let exists: Option<String> = conn
                    .query_row(
                        "SELECT location_key FROM storage_locations WHERE location_key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_none() {
                    return Err(RagrouteError::StorageNotFound(key));
                }

                let mut context = StorageContext::empty(location.clone());

                let mut stmt = conn.prepare(
                    "SELECT node_id, doc_id, node_text, metadata_json FROM docstore_nodes
                     WHERE location_key = ?1 ORDER BY doc_id, ordinal",
                )?;
                let rows = stmt.query_map(params![key], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?;
                for row in rows {
                    let (node_id, doc_id, text, metadata_json) = row?;
                    let node = node_from_row(node_id.clone(), text, &metadata_json)?;
                    context.docstore.insert(node_id, (doc_id, node));
                }

                let mut stmt = conn.prepare(
                    "SELECT s.index_id, s.doc_id, n.node_id, n.ordinal, n.embedding
                     FROM index_structs s
                     LEFT JOIN index_nodes n
                       ON n.location_key = s.location_key AND n.index_id = s.index_id
                     WHERE s.location_key = ?1
                     ORDER BY s.index_id, n.ordinal",
                )?;
                let rows = stmt.query_map(params![key], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, Option<Vec<u8>>>(4)?,
                    ))
                })?;

                let mut indexes: Vec<SemanticIndex> = Vec::new();
                for row in rows {
                    let (index_id, doc_id, node_id, _ordinal, embedding) = row?;
                    if indexes.last().map(|i| i.index_id.as_str()) != Some(index_id.as_str()) {
                        indexes.push(SemanticIndex {
                            index_id: index_id.clone(),
                            doc_id,
                            nodes: Vec::new(),
                        });
                    }
                    let (Some(node_id), Some(embedding)) = (node_id, embedding) else {
                        continue;
                    };
                    let node = context
                        .docstore
                        .get(&node_id)
                        .map(|(_, node)| node.clone())
                        .ok_or_else(|| {
                            RagrouteError::IndexResolution(format!(
                                "Index {} references missing node {}",
                                index_id, node_id
                            ))
                        })?;
                    if let Some(index) = indexes.last_mut() {
                        index.nodes.push(IndexedNode {
                            node,
                            embedding: blob_to_embedding(&embedding)?,
                        });
                    }
                }
                for index in indexes {
                    context.insert_index(index);
                }

                log::debug!(
                    "Fetched storage context {}: {} nodes, {} indexes",
                    key,
                    context.docstore.len(),
                    context.indexes.len()
                );
                Ok(context)
            })
            .await
    }

    async fn persist(&self, context: &StorageContext) -> Result<()> {
        let key = context.location.key();
        let now = Utc::now().to_rfc3339();

        let mut docstore_rows: Vec<(String, String, i64, String, String)> = Vec::new();
        let mut ordinals: HashMap<&str, i64> = HashMap::new();
        let mut node_ids: Vec<&String> = context.docstore.keys().collect();
        node_ids.sort();
        for node_id in node_ids {
            let (doc_id, node) = &context.docstore[node_id];
            let ordinal = ordinals.entry(doc_id.as_str()).or_insert(0);
            let meta = StoredNodeMeta {
                metadata: node.metadata.clone(),
                excluded_embed_metadata_keys: node.excluded_embed_metadata_keys.clone(),
                excluded_llm_metadata_keys: node.excluded_llm_metadata_keys.clone(),
            };
            docstore_rows.push((
                node_id.clone(),
                doc_id.clone(),
                *ordinal,
                node.text.clone(),
                serde_json::to_string(&meta)?,
            ));
            *ordinal += 1;
        }

        let index_rows: Vec<(String, String, Vec<IndexRow>)> = context
            .indexes
            .values()
            .map(|index| {
                let nodes = index
                    .nodes
                    .iter()
                    .enumerate()
                    .map(|(ordinal, n)| {
                        (
                            index.index_id.clone(),
                            n.node.id.clone(),
                            index.doc_id.clone(),
                            ordinal as i64,
                            embedding_to_blob(&n.embedding),
                        )
                    })
                    .collect();
                (index.index_id.clone(), index.doc_id.clone(), nodes)
            })
            .collect();

        let mut doc_ids: Vec<String> = ordinals.keys().map(|id| id.to_string()).collect();
        doc_ids.sort();

        let docstore_count = docstore_rows.len();
        let index_count = index_rows.len();
        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO storage_locations (location_key, created_at, updated_at)
                     VALUES (?1, ?2, ?2)
                     ON CONFLICT(location_key) DO UPDATE SET updated_at = excluded.updated_at",
                    params![key, now],
                )?;

                for doc_id in &doc_ids {
                    tx.execute(
                        "DELETE FROM docstore_nodes WHERE location_key = ?1 AND doc_id = ?2",
                        params![key, doc_id],
                    )?;
                }
                for (node_id, doc_id, ordinal, text, metadata_json) in &docstore_rows {
                    tx.execute(
                        "INSERT OR REPLACE INTO docstore_nodes
                         (location_key, node_id, doc_id, ordinal, node_text, metadata_json)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![key, node_id, doc_id, ordinal, text, metadata_json],
                    )?;
                }

                for (index_id, doc_id, nodes) in &index_rows {
                    tx.execute(
                        "INSERT INTO index_structs (location_key, index_id, doc_id, created_at)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(location_key, index_id) DO UPDATE SET doc_id = excluded.doc_id",
                        params![key, index_id, doc_id, now],
                    )?;
                    tx.execute(
                        "DELETE FROM index_nodes WHERE location_key = ?1 AND index_id = ?2",
                        params![key, index_id],
                    )?;
                    for (_, node_id, _, ordinal, blob) in nodes {
                        tx.execute(
                            "INSERT INTO index_nodes (location_key, index_id, node_id, ordinal, embedding)
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                            params![key, index_id, node_id, ordinal, blob],
                        )?;
                    }
                }

                tx.commit()?;
                Ok(())
            })
            .await?;

        log::info!(
            "Persisted storage context {} ({} nodes, {} indexes)",
            context.location,
            docstore_count,
            index_count
        );
        Ok(())
    }
}
