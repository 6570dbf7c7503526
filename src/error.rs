use thiserror::Error;

/// Main error type for RAGRoute
#[derive(Error, Debug)]
pub enum RagrouteError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors (invalid policy, missing extraction source, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Retrieval mode or store capability that exists but is not implemented
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Language-model API errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Embedding API errors
    #[error("Embedding API error: {0}")]
    Embedding(String),

    /// Persistence location does not exist
    #[error("Storage location not found: {0}")]
    StorageNotFound(String),

    /// One or more requested indexes could not be loaded
    #[error("Index resolution error: {0}")]
    IndexResolution(String),

    /// Document content could not be fetched or parsed
    #[error("Content fetch error: {0}")]
    ContentFetch(String),

    /// Tool name not registered with the engine
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenient Result type using RagrouteError
pub type Result<T> = std::result::Result<T, RagrouteError>;
