pub mod config;
pub mod error;
pub mod db;
pub mod cache;
pub mod llm;
pub mod embeddings;
pub mod graph;
pub mod retrieval;
pub mod index;
pub mod chat;

pub use config::Config;
pub use error::{RagrouteError, Result};
pub use chat::{ChatEngine, Conversation, Document};
pub use retrieval::KnowledgeGraphRetriever;
