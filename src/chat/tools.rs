//! Tools handed to the agent: a name, a description, and a query engine.

use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::financials::{describe_financials, FinancialDataSource};
use super::synth::RefineSynthesizer;
use super::types::Document;
use crate::embeddings::Embedder;
use crate::error::{RagrouteError, Result};
use crate::index::SemanticIndex;
use crate::llm::ToolMetadata;
use crate::retrieval::{MetadataMode, NodeWithScore, Retriever};

/// A synthesized answer and the nodes it was built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    pub response: String,
    pub source_nodes: Vec<NodeWithScore>,
}

impl QueryResponse {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            source_nodes: Vec::new(),
        }
    }
}

impl fmt::Display for QueryResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.response)
    }
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn query(&self, query: &str) -> Result<QueryResponse>;
}

/// Named, described query engine.
#[derive(Clone)]
pub struct Tool {
    metadata: ToolMetadata,
    engine: Arc<dyn QueryEngine>,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, engine: Arc<dyn QueryEngine>) -> Self {
        Self {
            metadata: ToolMetadata::new(name, description),
            engine,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn description(&self) -> &str {
        &self.metadata.description
    }

    pub fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    pub async fn call(&self, input: &str) -> Result<QueryResponse> {
        self.engine.query(input).await
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool").field("metadata", &self.metadata).finish()
    }
}

/// Reject tool sets where two tools share a name.
pub fn ensure_unique_names(tools: &[Tool]) -> Result<()> {
    let mut seen = HashSet::new();
    for tool in tools {
        if !seen.insert(tool.name()) {
            return Err(RagrouteError::Config(format!("Duplicate tool name: {}", tool.name())));
        }
    }
    Ok(())
}

/// Retrieve nodes, then answer-then-refine over their LLM-visible content.
pub struct RetrieverQueryEngine {
    retriever: Arc<dyn Retriever>,
    synthesizer: RefineSynthesizer,
}

impl RetrieverQueryEngine {
    pub fn new(retriever: Arc<dyn Retriever>, synthesizer: RefineSynthesizer) -> Self {
        Self { retriever, synthesizer }
    }
}

#[async_trait]
impl QueryEngine for RetrieverQueryEngine {
    async fn query(&self, query: &str) -> Result<QueryResponse> {
        let nodes = self.retriever.retrieve(query).await?;
        let chunks: Vec<String> = nodes.iter().map(|n| n.node.get_content(MetadataMode::Llm)).collect();
        let response = self.synthesizer.synthesize(query, &chunks).await?;
        Ok(QueryResponse {
            response,
            source_nodes: nodes,
        })
    }
}

/// Top-k similarity retrieval over one document's index.
pub struct IndexRetriever {
    index: Arc<SemanticIndex>,
    embedder: Arc<dyn Embedder>,
    similarity_top_k: usize,
}

impl IndexRetriever {
    pub fn new(index: Arc<SemanticIndex>, embedder: Arc<dyn Embedder>, similarity_top_k: usize) -> Self {
        Self {
            index,
            embedder,
            similarity_top_k,
        }
    }
}

#[async_trait]
impl Retriever for IndexRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<NodeWithScore>> {
        self.index
            .query(query, self.embedder.as_ref(), self.similarity_top_k)
            .await
    }
}

/// Answers from a document's structured financial statements.
pub struct FinancialsQueryEngine {
    document: Document,
    source: Arc<dyn FinancialDataSource>,
}

impl FinancialsQueryEngine {
    pub fn new(document: Document, source: Arc<dyn FinancialDataSource>) -> Self {
        Self { document, source }
    }
}

#[async_trait]
impl QueryEngine for FinancialsQueryEngine {
    async fn query(&self, _query: &str) -> Result<QueryResponse> {
        let periods = self.source.financials_for(&self.document).await?;
        if periods.is_empty() {
            return Ok(QueryResponse::new(format!(
                "No financial data is available for {}.",
                self.document.title()
            )));
        }
        let text = periods.iter().map(describe_financials).collect::<Vec<_>>().join("\n");
        Ok(QueryResponse::new(text))
    }
}

/// Tool name of a document's financial-data tool.
pub fn financials_tool_name(document: &Document) -> String {
    format!("financials_{}", document.id)
}

pub fn financials_tool_description(document: &Document) -> String {
    format!(
        "Returns basic financial data extracted from the company documents {}",
        document.title()
    )
}
