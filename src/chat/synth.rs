use std::sync::Arc;

use crate::error::Result;
use crate::llm::prompts::{
    DEFAULT_QA_TEMPLATE, DEFAULT_REFINE_TEMPLATE, DOCUMENT_QA_TEMPLATE, DOCUMENT_REFINE_TEMPLATE,
    GRAPH_QA_TEMPLATE, GRAPH_REFINE_TEMPLATE,
};
use crate::llm::{Predictor, PromptTemplate};

/// Answer returned when there is no context at all.
pub const EMPTY_RESPONSE: &str = "Empty Response";

/// Answer-then-refine synthesis: answer from the first chunk, then refine the
/// answer against each later chunk.
#[derive(Clone)]
pub struct RefineSynthesizer {
    predictor: Arc<dyn Predictor>,
    qa_prompt: PromptTemplate,
    refine_prompt: PromptTemplate,
}

impl RefineSynthesizer {
    pub fn new(predictor: Arc<dyn Predictor>, qa_prompt: PromptTemplate, refine_prompt: PromptTemplate) -> Self {
        Self {
            predictor,
            qa_prompt,
            refine_prompt,
        }
    }

    pub fn with_default_prompts(predictor: Arc<dyn Predictor>) -> Self {
        Self::new(
            predictor,
            PromptTemplate::new(DEFAULT_QA_TEMPLATE),
            PromptTemplate::new(DEFAULT_REFINE_TEMPLATE),
        )
    }

    /// Prompts framing the context as knowledge graph facts about a company.
    pub fn for_graph(predictor: Arc<dyn Predictor>) -> Self {
        Self::new(
            predictor,
            PromptTemplate::new(GRAPH_QA_TEMPLATE),
            PromptTemplate::new(GRAPH_REFINE_TEMPLATE),
        )
    }

    /// Prompts listing the selected documents' titles.
    pub fn for_documents(predictor: Arc<dyn Predictor>, doc_titles: &str) -> Self {
        let titles = [("doc_titles", doc_titles)];
        Self::new(
            predictor,
            PromptTemplate::new(DOCUMENT_QA_TEMPLATE).partial(&titles),
            PromptTemplate::new(DOCUMENT_REFINE_TEMPLATE).partial(&titles),
        )
    }

    pub async fn synthesize(&self, query: &str, chunks: &[String]) -> Result<String> {
        let Some((first, rest)) = chunks.split_first() else {
            return Ok(EMPTY_RESPONSE.to_string());
        };

        let mut answer = self
            .predictor
            .predict(&self.qa_prompt, &[("context_str", first.as_str()), ("query_str", query)])
            .await?;

        for chunk in rest {
            let refined = self
                .predictor
                .predict(
                    &self.refine_prompt,
                    &[
                        ("query_str", query),
                        ("existing_answer", answer.as_str()),
                        ("context_msg", chunk.as_str()),
                    ],
                )
                .await?;
            if refined.trim().is_empty() {
                log::debug!("Refine step returned nothing, keeping existing answer");
            } else {
                answer = refined;
            }
        }

        Ok(answer.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records formatted prompts and answers with a scripted sequence.
    struct RecordingPredictor {
        answers: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl RecordingPredictor {
        fn new(answers: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.iter().rev().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Predictor for RecordingPredictor {
        async fn predict(&self, prompt: &PromptTemplate, params: &[(&str, &str)]) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.format(params));
            Ok(self.answers.lock().unwrap().pop().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_answer_then_refine() {
        let predictor = RecordingPredictor::new(&["Acme earned 5", "Acme earned 5 in 2023"]);
        let synth = RefineSynthesizer::with_default_prompts(predictor.clone());
        let chunks = vec!["Acme revenue 5".to_string(), "Fiscal year 2023".to_string()];

        let answer = synth.synthesize("What did Acme earn?", &chunks).await.unwrap();
        assert_eq!(answer, "Acme earned 5 in 2023");

        let prompts = predictor.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("Acme revenue 5"));
        assert!(prompts[1].contains("We have provided an existing answer: Acme earned 5"));
        assert!(prompts[1].contains("Fiscal year 2023"));
    }

    #[tokio::test]
    async fn test_blank_refinement_keeps_answer() {
        let predictor = RecordingPredictor::new(&["first answer", "  "]);
        let synth = RefineSynthesizer::for_graph(predictor);
        let chunks = vec!["a".to_string(), "b".to_string()];
        assert_eq!(synth.synthesize("q", &chunks).await.unwrap(), "first answer");
    }

    #[tokio::test]
    async fn test_no_chunks_makes_no_call() {
        let predictor = RecordingPredictor::new(&["unused"]);
        let synth = RefineSynthesizer::for_documents(predictor.clone(), "- Acme 10-K");
        assert_eq!(synth.synthesize("q", &[]).await.unwrap(), EMPTY_RESPONSE);
        assert!(predictor.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_document_prompts_carry_titles() {
        let predictor = RecordingPredictor::new(&["ok"]);
        let synth = RefineSynthesizer::for_documents(predictor.clone(), "- Acme Corp (ACME) 10-K (2023)");
        synth.synthesize("q", &["ctx".to_string()]).await.unwrap();
        assert!(predictor.prompts.lock().unwrap()[0].contains("- Acme Corp (ACME) 10-K (2023)"));
    }

    #[tokio::test]
    async fn test_title_placeholders_stay_literal() {
        let predictor = RecordingPredictor::new(&["first", "second"]);
        let synth = RefineSynthesizer::for_documents(predictor.clone(), "- Fund {query_str} {context_msg} 10-K");
        let chunks = vec!["ctx one".to_string(), "ctx two".to_string()];
        synth.synthesize("What is NAV?", &chunks).await.unwrap();

        let prompts = predictor.prompts.lock().unwrap();
        for prompt in prompts.iter() {
            assert!(prompt.contains("- Fund {query_str} {context_msg} 10-K"));
        }
        assert!(prompts[1].contains("ctx two"));
    }
}
