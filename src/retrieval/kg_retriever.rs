use async_trait::async_trait;
use std::sync::Arc;

use super::context::assemble;
use super::entities::EntityResolver;
use super::node::NodeWithScore;
use super::Retriever;
use crate::error::{RagrouteError, Result};
use crate::graph::{GraphOptions, GraphStore};

/// Query -> entities -> bounded graph walk -> one context node.
///
/// The graph schema is fetched once at construction; a store without one
/// (or one that fails) simply contributes no schema.
pub struct KnowledgeGraphRetriever {
    graph_store: Arc<dyn GraphStore>,
    resolver: EntityResolver,
    options: GraphOptions,
    graph_schema: Option<String>,
    graph_query_engine: Option<Arc<dyn Retriever>>,
}

impl KnowledgeGraphRetriever {
    pub async fn new(graph_store: Arc<dyn GraphStore>, resolver: EntityResolver, options: GraphOptions) -> Self {
        let graph_schema = match graph_store.get_schema(options.refresh_schema).await {
            Ok(schema) if !schema.trim().is_empty() => Some(schema),
            Ok(_) | Err(RagrouteError::NotImplemented(_)) => None,
            Err(e) => {
                log::warn!("Failed to get graph schema: {}", e);
                None
            }
        };

        Self {
            graph_store,
            resolver,
            options,
            graph_schema,
            graph_query_engine: None,
        }
    }

    /// Structured graph-query engine consulted before the keyword walk.
    pub fn with_graph_query_engine(mut self, engine: Arc<dyn Retriever>) -> Self {
        self.graph_query_engine = Some(engine);
        self
    }

    pub fn options(&self) -> &GraphOptions {
        &self.options
    }

    pub fn graph_schema(&self) -> Option<&str> {
        self.graph_schema.as_deref()
    }

    /// Sub-engine nodes, then keyword nodes. Unsupported modes fail with `NotImplemented`.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<NodeWithScore>> {
        if !self.options.retriever_mode.is_supported() {
            return Err(RagrouteError::NotImplemented(format!(
                "{:?} graph retrieval",
                self.options.retriever_mode
            )));
        }

        let mut nodes = Vec::new();
        if let Some(engine) = &self.graph_query_engine {
            match engine.retrieve(query).await {
                Ok(found) => nodes.extend(found),
                Err(e) => log::warn!("Error in retrieving from graph query engine: {}", e),
            }
        }

        nodes.extend(self.retrieve_keyword(query).await?);
        Ok(nodes)
    }

    /// Blocking form of [`retrieve`](Self::retrieve) on a private current-thread runtime.
    ///
    /// Must not be called from inside an async context.
    pub fn retrieve_blocking(&self, query: &str) -> Result<Vec<NodeWithScore>> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        runtime.block_on(self.retrieve(query))
    }

    async fn retrieve_keyword(&self, query: &str) -> Result<Vec<NodeWithScore>> {
        let entities = match self.resolver.resolve_entities(query).await {
            Ok(entities) => entities,
            Err(e @ RagrouteError::Config(_)) => return Err(e),
            Err(e) => {
                log::warn!("Entity extraction failed, continuing without graph context: {}", e);
                Vec::new()
            }
        };
        if entities.is_empty() {
            log::info!("No entities extracted from query string");
            return Ok(Vec::new());
        }

        let depth = self.options.traversal_depth;
        let rel_map = match self
            .graph_store
            .get_rel_map(&entities, depth, self.options.max_knowledge_sequence)
            .await
        {
            Ok(rel_map) => rel_map,
            Err(e) => {
                log::warn!("Graph relation lookup failed: {}", e);
                return Ok(Vec::new());
            }
        };
        log::info!(
            "Graph walk for {} entities produced {} triplets",
            entities.len(),
            rel_map.triplet_count()
        );

        Ok(assemble(rel_map, depth, self.graph_schema())
            .map(|node| vec![node.into_node_with_score()])
            .unwrap_or_default())
    }
}

#[async_trait]
impl Retriever for KnowledgeGraphRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<NodeWithScore>> {
        KnowledgeGraphRetriever::retrieve(self, query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Adjacency, RelationTriplet, SimpleGraphStore};
    use crate::retrieval::entities::tests::ScriptedPredictor;
    use crate::retrieval::{ExtractionStage, RetrieverMode, TextNode};

    fn berry_store() -> Arc<SimpleGraphStore> {
        Arc::new(SimpleGraphStore::from_triplets(vec![
            RelationTriplet::new("Peter Berry", "is shareholder of", "SME LENDING"),
            RelationTriplet::new("SME LENDING", "has shareholder", "Peter Berry"),
        ]))
    }

    fn resolver(predictor: Arc<ScriptedPredictor>) -> EntityResolver {
        EntityResolver::new(
            predictor,
            ExtractionStage::entities(5),
            ExtractionStage::synonyms(5),
        )
        .unwrap()
    }

    struct FailingEngine;

    #[async_trait]
    impl Retriever for FailingEngine {
        async fn retrieve(&self, _query: &str) -> Result<Vec<NodeWithScore>> {
            Err(RagrouteError::Llm("graph query failed".to_string()))
        }
    }

    struct FixedEngine;

    #[async_trait]
    impl Retriever for FixedEngine {
        async fn retrieve(&self, _query: &str) -> Result<Vec<NodeWithScore>> {
            Ok(vec![NodeWithScore::new(TextNode::new("cypher", "MATCH result"), None)])
        }
    }

    struct SchemaStore(String);

    #[async_trait]
    impl GraphStore for SchemaStore {
        async fn adjacency(&self) -> Result<Adjacency> {
            Ok(Adjacency::new())
        }

        async fn get_schema(&self, _refresh: bool) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_peter_berry_shareholder_context() {
        let predictor = ScriptedPredictor::new("KEYWORDS: Peter Berry", "SYNONYMS:");
        let retriever = KnowledgeGraphRetriever::new(berry_store(), resolver(predictor), GraphOptions::default()).await;
        assert!(retriever.graph_schema().is_none());

        let nodes = retriever.retrieve("Is Peter Berry a shareholder?").await.unwrap();
        assert_eq!(nodes.len(), 1);

        let rel_text = &nodes[0].node.metadata["kg_rel_text"];
        let rel_text: Vec<&str> = rel_text.as_array().unwrap().iter().filter_map(|v| v.as_str()).collect();
        assert!(rel_text.contains(&"Peter Berry -[is shareholder of]-> SME LENDING"));
        assert!(rel_text.contains(&"SME LENDING -[has shareholder]-> Peter Berry"));
        assert!(nodes[0].text().contains("SME LENDING"));
        assert!(nodes[0].text().contains("Peter Berry"));
    }

    #[tokio::test]
    async fn test_no_entities_means_no_nodes() {
        let predictor = ScriptedPredictor::new("KEYWORDS:", "SYNONYMS:");
        let retriever = KnowledgeGraphRetriever::new(berry_store(), resolver(predictor), GraphOptions::default()).await;
        assert!(retriever.retrieve("hello there").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sub_engine_errors_are_ignored_and_results_come_first() {
        let predictor = ScriptedPredictor::new("KEYWORDS: Peter Berry", "SYNONYMS:");
        let failing = KnowledgeGraphRetriever::new(berry_store(), resolver(predictor.clone()), GraphOptions::default())
            .await
            .with_graph_query_engine(Arc::new(FailingEngine));
        assert_eq!(failing.retrieve("Peter Berry?").await.unwrap().len(), 1);

        let fixed = KnowledgeGraphRetriever::new(berry_store(), resolver(predictor), GraphOptions::default())
            .await
            .with_graph_query_engine(Arc::new(FixedEngine));
        let nodes = fixed.retrieve("Peter Berry?").await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].node.id, "cypher");
    }

    #[tokio::test]
    async fn test_embedding_mode_is_not_implemented_and_skips_model() {
        let predictor = ScriptedPredictor::new("KEYWORDS: Peter Berry", "SYNONYMS:");
        let options = GraphOptions {
            retriever_mode: RetrieverMode::Embedding,
            ..GraphOptions::default()
        };
        let retriever = KnowledgeGraphRetriever::new(berry_store(), resolver(predictor.clone()), options).await;
        let err = retriever.retrieve("Peter Berry?").await.unwrap_err();
        assert!(matches!(err, RagrouteError::NotImplemented(_)));
        assert_eq!(predictor.calls(), 0);
    }

    #[tokio::test]
    async fn test_schema_is_attached_when_store_has_one() {
        let predictor = ScriptedPredictor::new("KEYWORDS: Acme", "SYNONYMS:");
        let store = Arc::new(SchemaStore("Company -[OWNS]-> Company".to_string()));
        let retriever = KnowledgeGraphRetriever::new(store, resolver(predictor), GraphOptions::default()).await;
        assert_eq!(retriever.graph_schema(), Some("Company -[OWNS]-> Company"));
        // Empty graph: nothing to assemble.
        assert!(retriever.retrieve("Acme").await.unwrap().is_empty());
    }

    #[test]
    fn test_blocking_matches_async() {
        let predictor = ScriptedPredictor::new("KEYWORDS: Peter Berry", "SYNONYMS:");
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let retriever = runtime.block_on(KnowledgeGraphRetriever::new(
            berry_store(),
            resolver(predictor),
            GraphOptions::default(),
        ));
        drop(runtime);

        let nodes = retriever.retrieve_blocking("Is Peter Berry a shareholder?").unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node.metadata["kg_rel_text"].as_array().unwrap().len(), 2);
    }
}
