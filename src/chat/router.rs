//! Builds the top-level tools for one conversation.

use std::sync::Arc;

use super::agent::EventSink;
use super::financials::FinancialDataSource;
use super::synth::RefineSynthesizer;
use super::sub_question::SubQuestionQueryEngine;
use super::tools::{
    ensure_unique_names, financials_tool_description, financials_tool_name, FinancialsQueryEngine,
    IndexRetriever, RetrieverQueryEngine, Tool,
};
use super::types::{Conversation, Document};
use crate::embeddings::Embedder;
use crate::error::Result;
use crate::index::DocumentIndexCache;
use crate::llm::Predictor;
use crate::retrieval::Retriever;

pub const QUESTION_ENGINE_TOOL: &str = "question_engine";
pub const QUALITATIVE_ENGINE_TOOL: &str = "qualitative_question_engine";
pub const QUANTITATIVE_ENGINE_TOOL: &str = "quantitative_question_engine";

const QUESTION_ENGINE_DESCRIPTION: &str = "A query engine that can answer questions about data in the \
knowledge graph that the user pre-selected for the conversation.";

const QUALITATIVE_ENGINE_DESCRIPTION: &str = "A query engine that can answer qualitative questions \
about a set of company financial documents that the user pre-selected for the conversation.
Any questions about company-related headwinds, tailwinds, risks, sentiments, or administrative \
information should be asked here.";

const QUANTITATIVE_ENGINE_DESCRIPTION: &str = "A query engine that can answer quantitative questions \
about a set of company financial documents that the user pre-selected for the conversation.
Any questions about company-related financials or other metrics should be asked here.";

pub const DEFAULT_SIMILARITY_TOP_K: usize = 3;

pub struct ToolRouter {
    predictor: Arc<dyn Predictor>,
    graph_retriever: Arc<dyn Retriever>,
    index_cache: Arc<DocumentIndexCache>,
    financials: Arc<dyn FinancialDataSource>,
    embedder: Arc<dyn Embedder>,
    similarity_top_k: usize,
    concurrency: usize,
    events: EventSink,
}

impl ToolRouter {
    pub fn new(
        predictor: Arc<dyn Predictor>,
        graph_retriever: Arc<dyn Retriever>,
        index_cache: Arc<DocumentIndexCache>,
        financials: Arc<dyn FinancialDataSource>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            predictor,
            graph_retriever,
            index_cache,
            financials,
            embedder,
            similarity_top_k: DEFAULT_SIMILARITY_TOP_K,
            concurrency: 4,
            events: EventSink::none(),
        }
    }

    pub fn with_similarity_top_k(mut self, similarity_top_k: usize) -> Self {
        self.similarity_top_k = similarity_top_k;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Top-level tools for `conversation`: the graph question engine when no
    /// documents are selected, otherwise the qualitative and quantitative
    /// sub-question engines over the selected documents.
    pub async fn build_tools(&self, conversation: &Conversation) -> Result<Vec<Tool>> {
        let tools = if conversation.documents.is_empty() {
            vec![self.graph_tool()]
        } else {
            self.document_tools(&conversation.documents).await?
        };
        ensure_unique_names(&tools)?;
        log::debug!(
            "Built top-level tools: {:?}",
            tools.iter().map(Tool::name).collect::<Vec<_>>()
        );
        Ok(tools)
    }

    fn graph_tool(&self) -> Tool {
        let engine = RetrieverQueryEngine::new(
            self.graph_retriever.clone(),
            RefineSynthesizer::for_graph(self.predictor.clone()),
        );
        Tool::new(QUESTION_ENGINE_TOOL, QUESTION_ENGINE_DESCRIPTION, Arc::new(engine))
    }

    /// One similarity-search tool per document, named by document id.
    pub async fn index_tools(&self, documents: &[Document]) -> Result<Vec<Tool>> {
        let entries = self.index_cache.get_or_build(documents).await?;
        Ok(entries
            .into_iter()
            .zip(documents)
            .map(|(entry, document)| {
                let retriever = IndexRetriever::new(entry.index, self.embedder.clone(), self.similarity_top_k);
                let engine = RetrieverQueryEngine::new(
                    Arc::new(retriever),
                    RefineSynthesizer::with_default_prompts(self.predictor.clone()),
                );
                Tool::new(entry.doc_id, document.title(), Arc::new(engine))
            })
            .collect())
    }

    /// One financial-data tool per document.
    pub fn financial_tools(&self, documents: &[Document]) -> Vec<Tool> {
        documents
            .iter()
            .map(|document| {
                Tool::new(
                    financials_tool_name(document),
                    financials_tool_description(document),
                    Arc::new(FinancialsQueryEngine::new(document.clone(), self.financials.clone())),
                )
            })
            .collect()
    }

    async fn document_tools(&self, documents: &[Document]) -> Result<Vec<Tool>> {
        let index_tools = self.index_tools(documents).await?;
        let financial_tools = self.financial_tools(documents);

        let doc_titles = documents
            .iter()
            .map(|d| format!("- {}", d.title()))
            .collect::<Vec<_>>()
            .join("\n");
        let synthesizer = RefineSynthesizer::for_documents(self.predictor.clone(), &doc_titles);

        let qualitative = SubQuestionQueryEngine::new(
            index_tools,
            self.predictor.clone(),
            synthesizer.clone(),
            self.concurrency,
        )?
        .with_events(self.events.clone());
        let quantitative = SubQuestionQueryEngine::new(
            financial_tools,
            self.predictor.clone(),
            synthesizer,
            self.concurrency,
        )?
        .with_events(self.events.clone());

        Ok(vec![
            Tool::new(QUALITATIVE_ENGINE_TOOL, QUALITATIVE_ENGINE_DESCRIPTION, Arc::new(qualitative)),
            Tool::new(QUANTITATIVE_ENGINE_TOOL, QUANTITATIVE_ENGINE_DESCRIPTION, Arc::new(quantitative)),
        ])
    }
}
