//! Sub-question decomposition over a group of tools.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use super::agent::{ChatEvent, EventSink};
use super::synth::RefineSynthesizer;
use super::tools::{ensure_unique_names, QueryEngine, QueryResponse, Tool};
use crate::error::{RagrouteError, Result};
use crate::llm::prompts::sub_question_prompt;
use crate::llm::Predictor;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubQuestion {
    pub sub_question: String,
    pub tool_name: String,
}

/// Parse the JSON array between the first `[` and the last `]` of `output`.
pub fn parse_sub_questions(output: &str) -> Result<Vec<SubQuestion>> {
    let (Some(start), Some(end)) = (output.find('['), output.rfind(']')) else {
        return Err(RagrouteError::Parse(format!(
            "No JSON array in sub-question output: {}",
            output.trim()
        )));
    };
    if end < start {
        return Err(RagrouteError::Parse("Malformed sub-question output".to_string()));
    }
    serde_json::from_str(&output[start..=end])
        .map_err(|e| RagrouteError::Parse(format!("Invalid sub-question JSON: {}", e)))
}

/// `- name: description` lines, one per tool.
pub fn describe_tools(tools: &[Tool]) -> String {
    tools
        .iter()
        .map(|t| format!("- {}: {}", t.name(), t.description()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splits a question into sub-questions routed to its tools, answers them
/// concurrently, and synthesizes the answers in generation order.
pub struct SubQuestionQueryEngine {
    tools: Vec<Tool>,
    predictor: Arc<dyn Predictor>,
    synthesizer: RefineSynthesizer,
    concurrency: usize,
    events: EventSink,
}

impl SubQuestionQueryEngine {
    pub fn new(
        tools: Vec<Tool>,
        predictor: Arc<dyn Predictor>,
        synthesizer: RefineSynthesizer,
        concurrency: usize,
    ) -> Result<Self> {
        ensure_unique_names(&tools)?;
        Ok(Self {
            tools,
            predictor,
            synthesizer,
            concurrency: concurrency.max(1),
            events: EventSink::none(),
        })
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn generate(&self, query: &str) -> Result<Vec<SubQuestion>> {
        let tools_str = describe_tools(&self.tools);
        let output = self
            .predictor
            .predict(
                &sub_question_prompt(),
                &[("tools_str", tools_str.as_str()), ("query_str", query)],
            )
            .await?;
        let questions = parse_sub_questions(&output)?;
        log::debug!("Generated {} sub questions", questions.len());
        Ok(questions)
    }

    async fn answer(&self, question: SubQuestion) -> Option<(SubQuestion, QueryResponse)> {
        let Some(tool) = self.tools.iter().find(|t| t.name() == question.tool_name) else {
            log::warn!(
                "Skipping sub question {:?}: unknown tool {}",
                question.sub_question,
                question.tool_name
            );
            return None;
        };

        self.events.send(ChatEvent::SubQuestionStarted {
            sub_question: question.sub_question.clone(),
            tool_name: question.tool_name.clone(),
        });

        match tool.call(&question.sub_question).await {
            Ok(response) => {
                self.events.send(ChatEvent::SubQuestionAnswered {
                    sub_question: question.sub_question.clone(),
                    tool_name: question.tool_name.clone(),
                    answer: response.response.clone(),
                });
                Some((question, response))
            }
            Err(e) => {
                log::warn!("Sub question {:?} failed: {}", question.sub_question, e);
                None
            }
        }
    }
}

#[async_trait]
impl QueryEngine for SubQuestionQueryEngine {
    async fn query(&self, query: &str) -> Result<QueryResponse> {
        let questions = self.generate(query).await?;

        let answered: Vec<(SubQuestion, QueryResponse)> = stream::iter(questions)
            .map(|q| self.answer(q))
            .buffered(self.concurrency)
            .filter_map(|a| async move { a })
            .collect()
            .await;

        let chunks: Vec<String> = answered
            .iter()
            .map(|(q, r)| format!("Sub question: {}\nResponse: {}", q.sub_question, r.response))
            .collect();
        let response = self.synthesizer.synthesize(query, &chunks).await?;

        Ok(QueryResponse {
            response,
            source_nodes: answered.into_iter().flat_map(|(_, r)| r.source_nodes).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::synth::EMPTY_RESPONSE;
    use crate::chat::tools::tests::echo_tool;
    use crate::llm::PromptTemplate;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Returns the sub-question plan, then echoes the synthesis context.
    struct PlanPredictor {
        plan: String,
        contexts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Predictor for PlanPredictor {
        async fn predict(&self, prompt: &PromptTemplate, params: &[(&str, &str)]) -> Result<String> {
            if prompt.template().contains("# Sub-questions") {
                return Ok(self.plan.clone());
            }
            let context = params
                .iter()
                .find(|(k, _)| *k == "context_str" || *k == "context_msg")
                .map(|(_, v)| v.to_string())
                .unwrap_or_default();
            self.contexts.lock().unwrap().push(context.clone());
            Ok(context)
        }
    }

    struct SlowEngine(Duration, &'static str);

    #[async_trait]
    impl QueryEngine for SlowEngine {
        async fn query(&self, _query: &str) -> Result<QueryResponse> {
            tokio::time::sleep(self.0).await;
            Ok(QueryResponse::new(self.1))
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl QueryEngine for FailingEngine {
        async fn query(&self, _query: &str) -> Result<QueryResponse> {
            Err(RagrouteError::Llm("boom".to_string()))
        }
    }

    fn predictor(plan: &str) -> Arc<PlanPredictor> {
        Arc::new(PlanPredictor {
            plan: plan.to_string(),
            contexts: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_parse_sub_questions_with_surrounding_text() {
        let output = "Here you go:\n```json\n[{\"sub_question\": \"What is revenue?\", \"tool_name\": \"doc-1\"}]\n```";
        let questions = parse_sub_questions(output).unwrap();
        assert_eq!(
            questions,
            vec![SubQuestion {
                sub_question: "What is revenue?".to_string(),
                tool_name: "doc-1".to_string(),
            }]
        );
        assert!(matches!(parse_sub_questions("no plan"), Err(RagrouteError::Parse(_))));
    }

    #[tokio::test]
    async fn test_results_follow_generation_order() {
        let plan = r#"[{"sub_question": "slow?", "tool_name": "slow"},
                       {"sub_question": "fast?", "tool_name": "fast"}]"#;
        let predictor = predictor(plan);
        let tools = vec![
            Tool::new("slow", "slow tool", Arc::new(SlowEngine(Duration::from_millis(50), "slow answer"))),
            Tool::new("fast", "fast tool", Arc::new(SlowEngine(Duration::from_millis(1), "fast answer"))),
        ];
        let engine = SubQuestionQueryEngine::new(
            tools,
            predictor.clone(),
            RefineSynthesizer::with_default_prompts(predictor.clone()),
            4,
        )
        .unwrap();

        engine.query("compare").await.unwrap();
        let contexts = predictor.contexts.lock().unwrap();
        assert_eq!(
            *contexts,
            vec![
                "Sub question: slow?\nResponse: slow answer".to_string(),
                "Sub question: fast?\nResponse: fast answer".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_and_failing_sub_questions_skipped() {
        let plan = r#"[{"sub_question": "a?", "tool_name": "nope"},
                       {"sub_question": "b?", "tool_name": "broken"},
                       {"sub_question": "c?", "tool_name": "ok"}]"#;
        let predictor = predictor(plan);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let engine = SubQuestionQueryEngine::new(
            vec![Tool::new("broken", "fails", Arc::new(FailingEngine)), echo_tool("ok")],
            predictor.clone(),
            RefineSynthesizer::with_default_prompts(predictor.clone()),
            2,
        )
        .unwrap()
        .with_events(EventSink::new(tx));

        let response = engine.query("q").await.unwrap();
        assert_eq!(response.response, "Sub question: c?\nResponse: ok: c?");

        let mut answered = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ChatEvent::SubQuestionAnswered { tool_name, .. } = event {
                answered.push(tool_name);
            }
        }
        assert_eq!(answered, vec!["ok"]);
    }

    #[tokio::test]
    async fn test_empty_plan_gives_empty_response() {
        let predictor = predictor("[]");
        let engine = SubQuestionQueryEngine::new(
            vec![echo_tool("ok")],
            predictor.clone(),
            RefineSynthesizer::with_default_prompts(predictor),
            1,
        )
        .unwrap();
        assert_eq!(engine.query("q").await.unwrap().response, EMPTY_RESPONSE);
    }
}
