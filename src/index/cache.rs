use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::chunker::split_nodes;
use super::content::DocumentContentSource;
use super::storage::{IndexStorage, SemanticIndex, StorageContext, StorageLocation};
use crate::cache::TtlCache;
use crate::chat::Document;
use crate::config::PerformanceConfig;
use crate::embeddings::Embedder;
use crate::error::{RagrouteError, Result};

/// Cache key of the single global persistence location.
pub const STORAGE_CONTEXT_KEY: &str = "global_storage_context";
pub const DEFAULT_STORAGE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_STORAGE_CAPACITY: usize = 10;

/// A document id and its semantic index.
#[derive(Debug, Clone)]
pub struct DocumentIndexEntry {
    pub doc_id: String,
    pub index: Arc<SemanticIndex>,
}

/// Maps documents to persisted indexes, building missing ones on demand.
///
/// The storage handle is cached under [`STORAGE_CONTEXT_KEY`]. A rebuild
/// persists a new handle and swaps it into the cache, so the next call within
/// the TTL loads the freshly built indexes without touching content again.
/// Rebuilds are serialized so each one starts from the latest handle.
pub struct DocumentIndexCache {
    storage: Arc<dyn IndexStorage>,
    content: Arc<dyn DocumentContentSource>,
    embedder: Arc<dyn Embedder>,
    location: StorageLocation,
    cache: Arc<TtlCache<Arc<StorageContext>>>,
    ttl: Duration,
    chunking: PerformanceConfig,
    rebuild_lock: Mutex<()>,
}

impl DocumentIndexCache {
    pub fn new(
        storage: Arc<dyn IndexStorage>,
        content: Arc<dyn DocumentContentSource>,
        embedder: Arc<dyn Embedder>,
        location: StorageLocation,
    ) -> Self {
        Self {
            storage,
            content,
            embedder,
            location,
            cache: Arc::new(TtlCache::new(DEFAULT_STORAGE_CAPACITY)),
            ttl: DEFAULT_STORAGE_TTL,
            chunking: PerformanceConfig::default(),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Share `cache` (and its clock) with other callers.
    pub fn with_cache(mut self, cache: Arc<TtlCache<Arc<StorageContext>>>, ttl: Duration) -> Self {
        self.cache = cache;
        self.ttl = ttl;
        self
    }

    pub fn with_chunking(mut self, chunking: PerformanceConfig) -> Self {
        self.chunking = chunking;
        self
    }

    /// Cached storage handle, fetched on miss. A location that was never
    /// persisted is created empty.
    pub async fn storage_context(&self) -> Result<Arc<StorageContext>> {
        if let Some(context) = self.cache.get(STORAGE_CONTEXT_KEY) {
            return Ok(context);
        }

        log::info!(
            "Fetching storage context from {} ({} cached handles)",
            self.location,
            self.cache.len()
        );
        let context = match self.storage.fetch(&self.location).await {
            Ok(context) => context,
            Err(RagrouteError::StorageNotFound(_)) => {
                log::error!("Could not find storage context at {}. Creating new storage context.", self.location);
                let context = StorageContext::empty(self.location.clone());
                self.storage.persist(&context).await?;
                context
            }
            Err(e) => return Err(e),
        };

        let context = Arc::new(context);
        self.cache.put(STORAGE_CONTEXT_KEY, context.clone(), self.ttl);
        Ok(context)
    }

    /// One entry per document, in input order.
    ///
    /// If any requested index is missing, every requested document is rebuilt.
    pub async fn get_or_build(&self, documents: &[Document]) -> Result<Vec<DocumentIndexEntry>> {
        let ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
        let context = self.storage_context().await?;

        match context.load_indices(&ids) {
            Ok(indexes) => {
                log::info!("Loaded {} indices from storage", indexes.len());
                Ok(entries(ids, indexes))
            }
            Err(RagrouteError::IndexResolution(reason)) => {
                let _guard = self.rebuild_lock.lock().await;

                // Another caller may have built these while we waited.
                let context = self.storage_context().await?;
                if let Ok(indexes) = context.load_indices(&ids) {
                    log::info!("Loaded {} indices built by a concurrent request", indexes.len());
                    return Ok(entries(ids, indexes));
                }

                log::error!("Failed to load indices from storage ({}). Creating new indices.", reason);
                self.rebuild(documents, &context).await
            }
            Err(e) => Err(e),
        }
    }

    async fn rebuild(&self, documents: &[Document], base: &StorageContext) -> Result<Vec<DocumentIndexEntry>> {
        let start = std::time::Instant::now();
        let mut context = base.clone();
        let mut entries = Vec::with_capacity(documents.len());

        for document in documents {
            let pages = self.content.fetch_and_parse(document).await?;
            let nodes = split_nodes(pages, &self.chunking);
            context.add_documents(&document.id, &nodes);

            let index = SemanticIndex::build(&document.id, &document.id, nodes, self.embedder.as_ref()).await?;
            let index = context.insert_index(index);
            self.storage.persist(&context).await?;
            log::debug!("Built index {} with {} nodes", document.id, index.len());

            entries.push(DocumentIndexEntry {
                doc_id: document.id.clone(),
                index,
            });
        }

        self.cache.put(STORAGE_CONTEXT_KEY, Arc::new(context), self.ttl);
        log::info!("Rebuilt {} indices in {:?}", entries.len(), start.elapsed());
        Ok(entries)
    }
}

fn entries(ids: Vec<String>, indexes: Vec<Arc<SemanticIndex>>) -> Vec<DocumentIndexEntry> {
    ids.into_iter()
        .zip(indexes)
        .map(|(doc_id, index)| DocumentIndexEntry { doc_id, index })
        .collect()
}
