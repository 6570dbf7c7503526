//! Per-turn wiring: history, tool routing, system prompt, and the agent loop.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::agent::{AgentLoop, AgentResponse, EventSink, DEFAULT_MAX_FUNCTION_CALLS};
use super::financials::JsonFinancialDataSource;
use super::history::build_history;
use super::router::ToolRouter;
use super::types::{Conversation, Document};
use crate::cache::TtlCache;
use crate::config::Config;
use crate::db::Db;
use crate::embeddings::{Embedder, OpenAIEmbedder};
use crate::error::Result;
use crate::graph::SimpleGraphStore;
use crate::index::{DocumentIndexCache, LocalFileContentSource, SqliteIndexStorage, StorageLocation};
use crate::llm::prompts::system_prompt;
use crate::llm::{ChatModel, OpenAIChat, Predictor};
use crate::retrieval::{EntityResolver, KnowledgeGraphRetriever};

pub const NO_DOCUMENTS_PLACEHOLDER: &str = "No documents selected. Using Knowledge Graph";

/// `- title` lines for the selected documents, or the knowledge graph placeholder.
pub fn doc_titles(documents: &[Document]) -> String {
    if documents.is_empty() {
        return NO_DOCUMENTS_PLACEHOLDER.to_string();
    }
    documents
        .iter()
        .map(|d| format!("- {}", d.title()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_system_prompt(documents: &[Document], now: DateTime<Utc>) -> String {
    let titles = doc_titles(documents);
    let curr_date = now.format("%Y-%m-%d").to_string();
    system_prompt().format(&[("doc_titles", titles.as_str()), ("curr_date", curr_date.as_str())])
}

pub struct ChatEngine {
    router: ToolRouter,
    model: Arc<dyn ChatModel>,
    max_function_calls: usize,
    verbose: bool,
    events: EventSink,
}

impl ChatEngine {
    pub fn new(router: ToolRouter, model: Arc<dyn ChatModel>) -> Self {
        Self {
            router,
            model,
            max_function_calls: DEFAULT_MAX_FUNCTION_CALLS,
            verbose: false,
            events: EventSink::none(),
        }
    }

    pub fn with_max_function_calls(mut self, max_function_calls: usize) -> Self {
        self.max_function_calls = max_function_calls;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Route sub-question and tool events to `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.router = self.router.with_events(events.clone());
        self.events = events;
        self
    }

    /// Build the full stack from configuration: OpenAI chat and embeddings,
    /// the JSON graph store, and SQLite-backed document indexes.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let chat = Arc::new(OpenAIChat::from_config(&config.llm)?);
        let predictor: Arc<dyn Predictor> = chat.clone();
        let embedder: Arc<dyn Embedder> = Arc::new(OpenAIEmbedder::from_config(&config.embeddings)?);

        let graph_store = SimpleGraphStore::from_file(&config.graph.graph_store_path)?;
        let resolver = EntityResolver::from_config(&config.graph, predictor.clone())?;
        let graph_retriever =
            KnowledgeGraphRetriever::new(Arc::new(graph_store), resolver, config.graph.options()).await;

        let storage = SqliteIndexStorage::new(Db::new(config.db_path()));
        let index_cache = DocumentIndexCache::new(
            Arc::new(storage),
            Arc::new(LocalFileContentSource::new(&config.storage.asset_dir)),
            embedder.clone(),
            StorageLocation::new(&config.storage.bucket, &config.storage.persist_path),
        )
        .with_cache(
            Arc::new(TtlCache::new(config.storage.cache_capacity)),
            config.storage_ttl(),
        )
        .with_chunking(config.performance.clone());

        let router = ToolRouter::new(
            predictor,
            Arc::new(graph_retriever),
            Arc::new(index_cache),
            Arc::new(JsonFinancialDataSource::new(&config.storage.financials_dir)),
            embedder,
        )
        .with_similarity_top_k(config.agent.similarity_top_k)
        .with_concurrency(config.agent.sub_question_concurrency);

        Ok(Self::new(router, chat)
            .with_max_function_calls(config.agent.max_function_calls)
            .with_verbose(config.agent.verbose))
    }

    /// Answer `message` in the context of `conversation`.
    pub async fn chat(&self, conversation: &Conversation, message: &str) -> Result<AgentResponse> {
        let start = std::time::Instant::now();
        let tools = self.router.build_tools(conversation).await?;
        let agent = AgentLoop::new(self.model.clone(), tools, self.max_function_calls)?
            .with_events(self.events.clone());

        let history = build_history(&conversation.messages);
        log::debug!("Chat history has {} messages", history.len());
        let system = build_system_prompt(&conversation.documents, Utc::now());

        let response = agent.chat(&system, history, message).await?;
        if self.verbose {
            for invocation in &response.invocations {
                log::info!(
                    "Tool {} called with {:?}: {}",
                    invocation.tool_name,
                    invocation.input,
                    invocation.output
                );
            }
        }
        log::info!(
            "Answered with {} tool calls in {:?}",
            response.invocations.len(),
            start.elapsed()
        );
        Ok(response)
    }
}
