//! Language-model seams: prompt templates, the text predictor used for
//! extraction and synthesis, and the tool-calling chat model driving the agent.

pub mod openai;
pub mod prompts;

pub use openai::OpenAIChat;
pub use prompts::PromptTemplate;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Prompt in, text out.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Format `prompt` with `params` and return the model completion.
    async fn predict(&self, prompt: &PromptTemplate, params: &[(&str, &str)]) -> Result<String>;
}

/// Role of a message in the agent conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the chat model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// The `input` argument the model passed to the tool.
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    /// Assistant turn that requested tool calls.
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(ChatRole::Assistant, content)
        }
    }

    /// Tool output answering `call`.
    pub fn tool_output(call: &ToolCall, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            ..Self::new(ChatRole::Tool, output)
        }
    }
}

/// Name and description the chat model sees for a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// One chat completion: text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Tool-calling chat model used by the agent loop.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion over `messages`. An empty `tools` slice disables tool calling.
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolMetadata]) -> Result<ChatResponse>;
}
