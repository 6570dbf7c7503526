//! Tool-calling agent loop with a hard cap on tool invocations.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use super::tools::{ensure_unique_names, Tool};
use crate::error::{RagrouteError, Result};
use crate::llm::{ChatMessage, ChatModel, ToolCall, ToolMetadata};

pub const DEFAULT_MAX_FUNCTION_CALLS: usize = 3;

/// Progress notifications emitted while a turn is answered.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    SubQuestionStarted { sub_question: String, tool_name: String },
    SubQuestionAnswered { sub_question: String, tool_name: String, answer: String },
    ToolCall { tool_name: String, input: String },
    ToolOutput { tool_name: String, output: String },
}

/// Optional event sink; sends are best effort.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<UnboundedSender<ChatEvent>>);

impl EventSink {
    pub fn new(sender: UnboundedSender<ChatEvent>) -> Self {
        Self(Some(sender))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn send(&self, event: ChatEvent) {
        if let Some(sender) = &self.0 {
            if sender.send(event).is_err() {
                log::debug!("Chat event receiver dropped");
            }
        }
    }
}

/// One tool call made during a turn, in call order.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub input: String,
    pub output: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub response: String,
    pub invocations: Vec<ToolInvocation>,
}

pub struct AgentLoop {
    model: Arc<dyn ChatModel>,
    tools: HashMap<String, Tool>,
    metadata: Vec<ToolMetadata>,
    max_function_calls: usize,
    events: EventSink,
}

impl AgentLoop {
    /// Fails with a configuration error when two tools share a name.
    pub fn new(model: Arc<dyn ChatModel>, tools: Vec<Tool>, max_function_calls: usize) -> Result<Self> {
        ensure_unique_names(&tools)?;
        let metadata = tools.iter().map(|t| t.metadata().clone()).collect();
        let tools = tools.into_iter().map(|t| (t.name().to_string(), t)).collect();
        Ok(Self {
            model,
            tools,
            metadata,
            max_function_calls,
            events: EventSink::none(),
        })
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.metadata.iter().map(|m| m.name.as_str()).collect()
    }

    /// Answer `message` given the system prompt and prior history.
    ///
    /// Once `max_function_calls` tools have run, the turn ends with the last
    /// assistant text or, failing that, the last tool output.
    pub async fn chat(&self, system_prompt: &str, history: Vec<ChatMessage>, message: &str) -> Result<AgentResponse> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(history);
        messages.push(ChatMessage::user(message));

        let mut invocations: Vec<ToolInvocation> = Vec::new();
        let mut last_text: Option<String> = None;

        loop {
            let remaining = self.max_function_calls.saturating_sub(invocations.len());
            let tools: &[ToolMetadata] = if remaining == 0 { &[] } else { &self.metadata };
            let response = self.model.chat(&messages, tools).await?;

            if let Some(text) = response.content.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                last_text = Some(text.to_string());
            }

            if response.tool_calls.is_empty() || remaining == 0 {
                let text = last_text
                    .or_else(|| invocations.last().map(|i| i.output.clone()))
                    .unwrap_or_default();
                return Ok(AgentResponse {
                    response: text,
                    invocations,
                });
            }

            let calls: Vec<ToolCall> = response.tool_calls.into_iter().take(remaining).collect();
            messages.push(ChatMessage::assistant_tool_calls(
                response.content.unwrap_or_default(),
                calls.clone(),
            ));

            for call in &calls {
                let invocation = self.invoke(call).await;
                messages.push(ChatMessage::tool_output(call, invocation.output.clone()));
                invocations.push(invocation);
            }

            if invocations.len() >= self.max_function_calls {
                log::info!(
                    "Reached the limit of {} tool calls, ending turn",
                    self.max_function_calls
                );
                let text = last_text
                    .or_else(|| invocations.last().map(|i| i.output.clone()))
                    .unwrap_or_default();
                return Ok(AgentResponse {
                    response: text,
                    invocations,
                });
            }
        }
    }

    async fn invoke(&self, call: &ToolCall) -> ToolInvocation {
        self.events.send(ChatEvent::ToolCall {
            tool_name: call.name.clone(),
            input: call.input.clone(),
        });

        let (output, is_error) = match self.tools.get(&call.name) {
            Some(tool) => match tool.call(&call.input).await {
                Ok(response) => (response.response, false),
                Err(e) => {
                    log::warn!("Tool {} failed: {}", call.name, e);
                    (format!("Error: {}", e), true)
                }
            },
            None => {
                log::warn!("Model requested unknown tool {}", call.name);
                let err = RagrouteError::ToolNotFound(call.name.clone());
                (format!("Error: {}", err), true)
            }
        };

        self.events.send(ChatEvent::ToolOutput {
            tool_name: call.name.clone(),
            output: output.clone(),
        });

        ToolInvocation {
            tool_name: call.name.clone(),
            input: call.input.clone(),
            output,
            is_error,
        }
    }
}
