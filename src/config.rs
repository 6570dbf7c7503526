use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::graph::GraphOptions;
use crate::retrieval::{ExtractionPolicy, RetrieverMode};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub ragroute: RagrouteConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

/// RAGRoute-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RagrouteConfig {
    /// SQLite database holding persisted document indexes.
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Index persistence and document asset locations
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,
    #[serde(default = "default_persist_path")]
    pub persist_path: String,
    /// Directory holding pre-extracted document text, one file per document url.
    pub asset_dir: PathBuf,
    /// Directory holding `<document id>.json` structured financial data.
    pub financials_dir: PathBuf,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_storage_cache_capacity")]
    pub cache_capacity: usize,
}

/// Chat model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

/// Embeddings configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub model: String,
    pub api_key_env: String,
    pub batch_size: usize,
    pub dimensions: usize,
}

/// Knowledge graph retrieval configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_graph_store_path")]
    pub graph_store_path: PathBuf,
    #[serde(default = "default_traversal_depth")]
    pub traversal_depth: usize,
    #[serde(default = "default_max_knowledge_sequence")]
    pub max_knowledge_sequence: usize,
    #[serde(default = "default_max_items")]
    pub max_entities: usize,
    #[serde(default = "default_max_items")]
    pub max_synonyms: usize,
    #[serde(default)]
    pub entity_extract_policy: ExtractionPolicy,
    #[serde(default)]
    pub synonym_expand_policy: ExtractionPolicy,
    #[serde(default)]
    pub retriever_mode: RetrieverMode,
    /// Also run the regex entity extractor next to the LLM prompt.
    #[serde(default)]
    pub use_extract_fn: bool,
    #[serde(default)]
    pub refresh_schema: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            graph_store_path: default_graph_store_path(),
            traversal_depth: default_traversal_depth(),
            max_knowledge_sequence: default_max_knowledge_sequence(),
            max_entities: default_max_items(),
            max_synonyms: default_max_items(),
            entity_extract_policy: ExtractionPolicy::default(),
            synonym_expand_policy: ExtractionPolicy::default(),
            retriever_mode: RetrieverMode::default(),
            use_extract_fn: false,
            refresh_schema: false,
        }
    }
}

impl GraphConfig {
    /// Traversal and extraction knobs handed to the graph retriever.
    pub fn options(&self) -> GraphOptions {
        GraphOptions {
            traversal_depth: self.traversal_depth,
            max_knowledge_sequence: self.max_knowledge_sequence,
            max_entities: self.max_entities,
            max_synonyms: self.max_synonyms,
            retriever_mode: self.retriever_mode,
            refresh_schema: self.refresh_schema,
        }
    }
}

/// Agent loop and sub-question engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_function_calls")]
    pub max_function_calls: usize,
    #[serde(default = "default_sub_question_concurrency")]
    pub sub_question_concurrency: usize,
    #[serde(default = "default_similarity_top_k")]
    pub similarity_top_k: usize,
    #[serde(default)]
    pub verbose: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_function_calls: default_max_function_calls(),
            sub_question_concurrency: default_sub_question_concurrency(),
            similarity_top_k: default_similarity_top_k(),
            verbose: false,
        }
    }
}

/// Node parsing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_chunk_size_tokens")]
    pub chunk_size_tokens: usize,
    #[serde(default = "default_chunk_overlap_tokens")]
    pub chunk_overlap_tokens: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            chunk_size_tokens: default_chunk_size_tokens(),
            chunk_overlap_tokens: default_chunk_overlap_tokens(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_persist_path() -> String {
    "storage".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_storage_cache_capacity() -> usize {
    10
}

fn default_llm_model() -> String {
    "gpt-4".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_graph_store_path() -> PathBuf {
    PathBuf::from("graph_store.json")
}

fn default_traversal_depth() -> usize {
    2
}

fn default_max_knowledge_sequence() -> usize {
    30
}

fn default_max_items() -> usize {
    5
}

fn default_max_function_calls() -> usize {
    3
}

fn default_sub_question_concurrency() -> usize {
    4
}

fn default_similarity_top_k() -> usize {
    3
}

fn default_chunk_size_tokens() -> usize {
    512
}

fn default_chunk_overlap_tokens() -> usize {
    10
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in RAGROUTE_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("RAGROUTE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml_str(&config_str)?;
        config.validate_env()?;

        Ok(config)
    }

    /// Parse and validate a TOML document without touching the environment.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("Failed to parse config.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.graph.traversal_depth == 0 {
            anyhow::bail!("graph.traversal_depth must be greater than 0");
        }

        if self.graph.max_knowledge_sequence == 0 {
            anyhow::bail!("graph.max_knowledge_sequence must be greater than 0");
        }

        if self.graph.max_entities == 0 || self.graph.max_synonyms == 0 {
            anyhow::bail!("graph.max_entities and graph.max_synonyms must be greater than 0");
        }

        // Intersection needs the function extractor next to the prompt.
        for (name, policy) in [
            ("entity_extract_policy", self.graph.entity_extract_policy),
            ("synonym_expand_policy", self.graph.synonym_expand_policy),
        ] {
            if policy == ExtractionPolicy::Intersection && !self.graph.use_extract_fn {
                anyhow::bail!(
                    "graph.{} = \"intersection\" requires graph.use_extract_fn = true",
                    name
                );
            }
        }

        if self.agent.max_function_calls == 0 {
            anyhow::bail!("agent.max_function_calls must be greater than 0");
        }

        if self.agent.sub_question_concurrency == 0 {
            anyhow::bail!("agent.sub_question_concurrency must be greater than 0");
        }

        if self.agent.similarity_top_k == 0 {
            anyhow::bail!("agent.similarity_top_k must be greater than 0");
        }

        if self.storage.cache_capacity == 0 {
            anyhow::bail!("storage.cache_capacity must be greater than 0");
        }

        if self.performance.chunk_size_tokens == 0 {
            anyhow::bail!("performance.chunk_size_tokens must be greater than 0");
        }

        if self.performance.chunk_overlap_tokens >= self.performance.chunk_size_tokens {
            anyhow::bail!("performance.chunk_overlap_tokens must be less than chunk_size_tokens");
        }

        Ok(())
    }

    /// Check that the API keys named by the config are present
    fn validate_env(&self) -> Result<()> {
        for key_env in [&self.llm.api_key_env, &self.embeddings.api_key_env] {
            std::env::var(key_env).with_context(|| {
                format!(
                    "Environment variable {} not set. Set it in your .env file or as an environment variable with your OpenAI API key.",
                    key_env
                )
            })?;
        }
        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.ragroute.db_path
    }

    /// Cache TTL for the storage handle
    pub fn storage_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.storage.cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn test_config_toml(extra_graph: &str) -> String {
        format!(
            r#"
[ragroute]
db_path = "./test.db"
log_level = "debug"

[storage]
bucket = "company-docs"
asset_dir = "./assets"
financials_dir = "./financials"

[llm]
api_key_env = "OPENAI_API_KEY"

[embeddings]
model = "text-embedding-ada-002"
api_key_env = "OPENAI_API_KEY"
batch_size = 100
dimensions = 1536

[graph]
{}
"#,
            extra_graph
        )
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_toml_str(&test_config_toml("")).unwrap();
        assert_eq!(config.ragroute.log_level, "debug");
        assert_eq!(config.storage.persist_path, "storage");
        assert_eq!(config.storage.cache_ttl_secs, 300);
        assert_eq!(config.storage.cache_capacity, 10);
        assert_eq!(config.llm.model, "gpt-4");
        assert_eq!(config.graph.traversal_depth, 2);
        assert_eq!(config.graph.max_knowledge_sequence, 30);
        assert_eq!(config.graph.entity_extract_policy, ExtractionPolicy::Union);
        assert_eq!(config.graph.retriever_mode, RetrieverMode::Keyword);
        assert_eq!(config.agent.max_function_calls, 3);
        assert_eq!(config.agent.similarity_top_k, 3);
    }

    #[test]
    fn test_config_intersection_requires_extract_fn() {
        let err = Config::from_toml_str(&test_config_toml(
            "entity_extract_policy = \"intersection\"",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("use_extract_fn"));

        let config = Config::from_toml_str(&test_config_toml(
            "entity_extract_policy = \"intersection\"\nuse_extract_fn = true",
        ))
        .unwrap();
        assert_eq!(config.graph.entity_extract_policy, ExtractionPolicy::Intersection);
    }

    #[test]
    fn test_config_rejects_zero_depth() {
        let err = Config::from_toml_str(&test_config_toml("traversal_depth = 0")).unwrap_err();
        assert!(err.to_string().contains("traversal_depth"));
    }

    #[test]
    fn test_config_rejects_unknown_policy() {
        assert!(Config::from_toml_str(&test_config_toml("entity_extract_policy = \"xor\"")).is_err());
    }

    #[test]
    fn test_config_load_from_env_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, test_config_toml("max_entities = 7")).unwrap();

        let original_config = std::env::var("RAGROUTE_CONFIG").ok();
        let original_key = std::env::var("OPENAI_API_KEY").ok();
        std::env::set_var("RAGROUTE_CONFIG", &config_path);
        std::env::set_var("OPENAI_API_KEY", "test-key");

        let config = Config::load();

        std::env::remove_var("RAGROUTE_CONFIG");
        std::env::remove_var("OPENAI_API_KEY");
        if let Some(val) = original_config {
            std::env::set_var("RAGROUTE_CONFIG", val);
        }
        if let Some(val) = original_key {
            std::env::set_var("OPENAI_API_KEY", val);
        }

        let config = config.unwrap();
        assert_eq!(config.graph.max_entities, 7);
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("RAGROUTE_CONFIG").ok();
        std::env::set_var("RAGROUTE_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("RAGROUTE_CONFIG");
        if let Some(v) = original {
            std::env::set_var("RAGROUTE_CONFIG", v);
        }
    }
}
