//! Graph-backed retrieval: entity resolution, context assembly, and the
//! knowledge graph retriever that ties them to a [`GraphStore`](crate::graph::GraphStore).

pub mod context;
pub mod entities;
pub mod kg_retriever;
pub mod node;

pub use context::{assemble, GraphContextNode};
pub use entities::{EntityResolver, ExtractFn, ExtractionStage};
pub use kg_retriever::KnowledgeGraphRetriever;
pub use node::{MetadataMode, NodeWithScore, TextNode};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;

/// How two extraction sources are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionPolicy {
    /// Anything either source found. Needs at least one source.
    #[default]
    Union,
    /// Only what both sources found. Needs both sources.
    Intersection,
}

/// Retrieval strategy of the knowledge graph retriever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrieverMode {
    /// Entity keywords matched against the graph adjacency.
    #[default]
    Keyword,
    /// Vector search over graph triplets. Not implemented.
    Embedding,
    /// Keyword followed by embedding. Fails like `Embedding`.
    Hybrid,
}

impl RetrieverMode {
    /// Whether `retrieve` can run in this mode.
    pub fn is_supported(self) -> bool {
        matches!(self, RetrieverMode::Keyword)
    }
}

/// Anything that turns a query into scored nodes.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<NodeWithScore>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        policy: ExtractionPolicy,
        mode: RetrieverMode,
    }

    #[test]
    fn test_enums_deserialize_lowercase() {
        let holder: Holder = toml::from_str("policy = \"intersection\"\nmode = \"hybrid\"").unwrap();
        assert_eq!(holder.policy, ExtractionPolicy::Intersection);
        assert_eq!(holder.mode, RetrieverMode::Hybrid);
        assert!(toml::from_str::<Holder>("policy = \"xor\"\nmode = \"keyword\"").is_err());
    }

    #[test]
    fn test_only_keyword_mode_is_supported() {
        assert!(RetrieverMode::Keyword.is_supported());
        assert!(!RetrieverMode::Embedding.is_supported());
        assert!(!RetrieverMode::Hybrid.is_supported());
        assert_eq!(RetrieverMode::default(), RetrieverMode::Keyword);
        assert_eq!(ExtractionPolicy::default(), ExtractionPolicy::Union);
    }
}
