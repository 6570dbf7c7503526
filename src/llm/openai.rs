use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use super::{ChatMessage, ChatModel, ChatResponse, ChatRole, Predictor, PromptTemplate, ToolCall, ToolMetadata};
use crate::config::LlmConfig;
use crate::error::{Result, RagrouteError};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Request body for the chat completions API
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

/// OpenAI chat completions client
///
/// Serves both as the text predictor (extraction, synthesis, sub-question
/// generation) and as the tool-calling model behind the agent loop.
pub struct OpenAIChat {
    client: Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAIChat {
    /// Create a new client.
    pub fn new(api_key: String, model: String, temperature: f32, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagrouteError::Llm(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model,
            temperature,
        })
    }

    /// Build a client from `[llm]` config, reading the key from its env var.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            RagrouteError::Config(format!("Environment variable {} not set", config.api_key_env))
        })?;
        Self::new(
            api_key,
            config.model.clone(),
            config.temperature,
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolMetadata]) -> Result<ChatResponse> {
        let start = std::time::Instant::now();
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: messages.iter().map(message_to_wire).collect(),
            tools: tools.iter().map(tool_to_wire).collect(),
        };

        let response = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| RagrouteError::Llm(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(RagrouteError::Llm(format!("OpenAI API error {}: {}", status, body)));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| RagrouteError::Llm(format!("Failed to parse response: {}", e)))?;

        log::debug!("Chat completion ({}) took {:?}", self.model, start.elapsed());

        let message = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| RagrouteError::Llm("Empty response from OpenAI API".to_string()))?;

        let tool_calls = message
            .tool_calls
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                input: tool_input_from_arguments(&call.function.arguments),
            })
            .collect();

        Ok(ChatResponse {
            content: message.content,
            tool_calls,
        })
    }
}

fn role_name(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

fn message_to_wire(message: &ChatMessage) -> Value {
    let mut wire = json!({
        "role": role_name(message.role),
        "content": message.content,
    });
    if !message.tool_calls.is_empty() {
        wire["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": json!({ "input": call.input }).to_string(),
                    }
                })
            })
            .collect();
    }
    if let Some(id) = &message.tool_call_id {
        wire["tool_call_id"] = Value::String(id.clone());
    }
    wire
}

/// Every tool takes a single free-text `input` argument.
fn tool_to_wire(tool: &ToolMetadata) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": {
                "type": "object",
                "properties": {
                    "input": { "type": "string" }
                },
                "required": ["input"]
            }
        }
    })
}

/// Pull `input` out of the JSON arguments; fall back to the raw string.
fn tool_input_from_arguments(arguments: &str) -> String {
    serde_json::from_str::<Value>(arguments)
        .ok()
        .and_then(|v| v.get("input").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| arguments.to_string())
}

#[async_trait]
impl Predictor for OpenAIChat {
    async fn predict(&self, prompt: &PromptTemplate, params: &[(&str, &str)]) -> Result<String> {
        let messages = [ChatMessage::user(prompt.format(params))];
        let response = self.complete(&messages, &[]).await?;
        Ok(response.content.unwrap_or_default())
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolMetadata]) -> Result<ChatResponse> {
        self.complete(messages, tools).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_input_from_arguments() {
        assert_eq!(tool_input_from_arguments(r#"{"input": "revenue 2023"}"#), "revenue 2023");
        assert_eq!(tool_input_from_arguments("plain text"), "plain text");
        assert_eq!(tool_input_from_arguments(r#"{"other": 1}"#), r#"{"other": 1}"#);
    }

    #[test]
    fn test_message_to_wire_tool_round() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "question_engine".to_string(),
            input: "Who owns SME LENDING?".to_string(),
        };
        let assistant = message_to_wire(&ChatMessage::assistant_tool_calls("", vec![call.clone()]));
        assert_eq!(assistant["role"], "assistant");
        assert_eq!(assistant["tool_calls"][0]["function"]["name"], "question_engine");

        let tool = message_to_wire(&ChatMessage::tool_output(&call, "Peter Berry"));
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "call_1");
    }

    #[test]
    fn test_tool_to_wire_schema() {
        let wire = tool_to_wire(&ToolMetadata::new("doc-1", "ACME 10-K (2023)"));
        assert_eq!(wire["function"]["name"], "doc-1");
        assert_eq!(wire["function"]["parameters"]["required"][0], "input");
    }

    #[test]
    fn test_client_new() {
        let chat = OpenAIChat::new("test-key".to_string(), "gpt-4".to_string(), 0.0, Duration::from_secs(5)).unwrap();
        assert_eq!(chat.model, "gpt-4");
    }
}
