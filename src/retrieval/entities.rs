//! Entity resolution: a pure extractor and/or a model prompt, combined by an
//! [`ExtractionPolicy`], followed by one synonym-expansion pass.

use std::collections::HashSet;
use std::sync::Arc;

use super::ExtractionPolicy;
use crate::config::GraphConfig;
use crate::error::{RagrouteError, Result};
use crate::graph::{extract_capitalized_entities, parse_keywords_from_response, Entity};
use crate::llm::prompts::{keyword_extract_prompt, synonym_expand_prompt};
use crate::llm::{Predictor, PromptTemplate};

/// Pure-function entity extractor.
pub type ExtractFn = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

const KEYWORDS_TOKEN: &str = "KEYWORDS:";
const SYNONYMS_TOKEN: &str = "SYNONYMS:";

/// Sources, policy, and item cap for one extraction pass.
#[derive(Clone)]
pub struct ExtractionStage {
    pub extract_fn: Option<ExtractFn>,
    pub prompt: Option<PromptTemplate>,
    pub policy: ExtractionPolicy,
    pub max_items: usize,
}

impl ExtractionStage {
    /// Keyword-extraction prompt only, union policy.
    pub fn entities(max_items: usize) -> Self {
        Self {
            extract_fn: None,
            prompt: Some(keyword_extract_prompt()),
            policy: ExtractionPolicy::Union,
            max_items,
        }
    }

    /// Synonym-expansion prompt only, union policy.
    pub fn synonyms(max_items: usize) -> Self {
        Self {
            extract_fn: None,
            prompt: Some(synonym_expand_prompt()),
            policy: ExtractionPolicy::Union,
            max_items,
        }
    }

    pub fn with_extract_fn(mut self, extract_fn: ExtractFn) -> Self {
        self.extract_fn = Some(extract_fn);
        self
    }

    pub fn with_prompt(mut self, prompt: Option<PromptTemplate>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_policy(mut self, policy: ExtractionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Check the policy against the configured sources.
    pub fn validate(&self, stage: &str) -> Result<()> {
        let has_fn = self.extract_fn.is_some();
        let has_prompt = self.prompt.is_some();
        match self.policy {
            ExtractionPolicy::Intersection if !(has_fn && has_prompt) => Err(RagrouteError::Config(format!(
                "{} intersection policy needs both an extract function and a prompt",
                stage
            ))),
            _ if !(has_fn || has_prompt) => Err(RagrouteError::Config(format!(
                "{} needs an extract function or a prompt",
                stage
            ))),
            _ => Ok(()),
        }
    }
}

/// Resolves query text into graph entities plus their synonyms.
pub struct EntityResolver {
    predictor: Arc<dyn Predictor>,
    entity_stage: ExtractionStage,
    synonym_stage: ExtractionStage,
}

impl EntityResolver {
    /// Both stages are validated here, so a bad policy never reaches the model.
    pub fn new(
        predictor: Arc<dyn Predictor>,
        entity_stage: ExtractionStage,
        synonym_stage: ExtractionStage,
    ) -> Result<Self> {
        entity_stage.validate("entity extraction")?;
        synonym_stage.validate("synonym expansion")?;
        Ok(Self {
            predictor,
            entity_stage,
            synonym_stage,
        })
    }

    /// Resolver from `[graph]` settings. `use_extract_fn` adds the regex
    /// extractor to both stages.
    pub fn from_config(config: &GraphConfig, predictor: Arc<dyn Predictor>) -> Result<Self> {
        let mut entity_stage = ExtractionStage::entities(config.max_entities).with_policy(config.entity_extract_policy);
        let mut synonym_stage =
            ExtractionStage::synonyms(config.max_synonyms).with_policy(config.synonym_expand_policy);
        if config.use_extract_fn {
            let extract_fn: ExtractFn = Arc::new(|text: &str| extract_capitalized_entities(text));
            entity_stage = entity_stage.with_extract_fn(extract_fn.clone());
            synonym_stage = synonym_stage.with_extract_fn(extract_fn);
        }
        Self::new(predictor, entity_stage, synonym_stage)
    }

    /// Entities found in `query`, followed by their synonyms, deduplicated
    /// case-insensitively in first-seen order.
    pub async fn resolve_entities(&self, query: &str) -> Result<Vec<Entity>> {
        let entities = self.process(query, &self.entity_stage, KEYWORDS_TOKEN, "entity extraction").await?;
        if entities.is_empty() {
            return Ok(entities);
        }

        // One combined request for the whole entity set.
        let joined = entities.iter().map(Entity::as_str).collect::<Vec<_>>().join(", ");
        let synonyms = self
            .process(&joined, &self.synonym_stage, SYNONYMS_TOKEN, "synonym expansion")
            .await?;

        let mut seen = HashSet::new();
        let resolved: Vec<Entity> = entities
            .into_iter()
            .chain(synonyms)
            .filter(|entity| seen.insert(entity.clone()))
            .collect();
        log::debug!("Resolved {} entities for query", resolved.len());
        Ok(resolved)
    }

    async fn process(
        &self,
        text: &str,
        stage: &ExtractionStage,
        start_token: &str,
        stage_name: &str,
    ) -> Result<Vec<Entity>> {
        stage.validate(stage_name)?;

        let from_fn: Vec<Entity> = stage
            .extract_fn
            .as_ref()
            .map(|extract| extract(text).into_iter().map(Entity::new).collect())
            .unwrap_or_default();

        let from_prompt: Vec<Entity> = match &stage.prompt {
            Some(prompt) => {
                let max_items = stage.max_items.to_string();
                let response = self
                    .predictor
                    .predict(prompt, &[("max_keywords", max_items.as_str()), ("question", text)])
                    .await?;
                parse_keywords_from_response(&response, start_token)
                    .into_iter()
                    .map(Entity::new)
                    .collect()
            }
            None => Vec::new(),
        };

        let combined = combine(stage.policy, from_fn, from_prompt);
        log::debug!("{}: {:?}", stage_name, combined);
        Ok(combined)
    }
}

fn combine(policy: ExtractionPolicy, from_fn: Vec<Entity>, from_prompt: Vec<Entity>) -> Vec<Entity> {
    let mut seen = HashSet::new();
    match policy {
        ExtractionPolicy::Union => from_fn
            .into_iter()
            .chain(from_prompt)
            .filter(|entity| seen.insert(entity.clone()))
            .collect(),
        ExtractionPolicy::Intersection => {
            let prompt_set: HashSet<Entity> = from_prompt.into_iter().collect();
            from_fn
                .into_iter()
                .filter(|entity| prompt_set.contains(entity) && seen.insert(entity.clone()))
                .collect()
        }
    }
}
