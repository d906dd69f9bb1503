// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI-compatible completion client
//!
//! Implements the CompletionClient trait against a `chat/completions`
//! endpoint. Any OpenAI-compatible server works via a custom base URL.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, DibiError, Result};
use crate::llm::message::{ContentBlock, Message, MessageContent, Role};
use crate::llm::provider::{
    CompletionClient, CompletionRequest, CompletionResponse, ToolCallRequest, ToolDescriptor,
};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible chat/completions client
pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiClient {
    /// Create a new client; the key may be absent, in which case every
    /// completion attempt fails before any network call is made.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    /// Use a custom endpoint (OpenAI-compatible servers, test servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Convert internal messages to the OpenAI wire format
    fn convert_messages(&self, messages: &[Message], system: Option<&str>) -> Vec<WireMessage> {
        let mut result = Vec::new();

        if let Some(sys) = system {
            result.push(WireMessage {
                role: "system".to_string(),
                content: Some(sys.to_string()),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
        }

        for m in messages.iter() {
            match m.role {
                Role::Tool => {
                    result.push(WireMessage {
                        role: "tool".to_string(),
                        content: Some(m.text().unwrap_or_default().to_string()),
                        tool_calls: None,
                        tool_call_id: m.tool_call_id.clone(),
                        name: m.tool_name.clone(),
                    });
                }
                Role::User => {
                    result.push(WireMessage {
                        role: "user".to_string(),
                        content: Some(m.text().unwrap_or_default().to_string()),
                        tool_calls: None,
                        tool_call_id: None,
                        name: None,
                    });
                }
                Role::Assistant => {
                    let (text, tool_calls) = match &m.content {
                        MessageContent::Text(text) => (text.clone(), Vec::new()),
                        MessageContent::Blocks(blocks) => {
                            let mut text_parts = Vec::new();
                            let mut calls = Vec::new();
                            for block in blocks {
                                match block {
                                    ContentBlock::Text { text } => text_parts.push(text.clone()),
                                    ContentBlock::ToolCall {
                                        id,
                                        name,
                                        arguments,
                                    } => calls.push(WireToolCall {
                                        id: id.clone(),
                                        r#type: "function".to_string(),
                                        function: WireFunctionCall {
                                            name: name.clone(),
                                            arguments: serde_json::to_string(arguments)
                                                .unwrap_or_default(),
                                        },
                                    }),
                                }
                            }
                            (text_parts.join("\n"), calls)
                        }
                    };

                    result.push(WireMessage {
                        role: "assistant".to_string(),
                        // The API rejects null content on tool-call turns; send ""
                        content: Some(text),
                        tool_calls: if tool_calls.is_empty() {
                            None
                        } else {
                            Some(tool_calls)
                        },
                        tool_call_id: None,
                        name: None,
                    });
                }
                // The fixed instruction is passed separately; stray system
                // messages in history are skipped.
                Role::System => continue,
            }
        }

        result
    }

    /// Convert tool descriptors to the OpenAI function-tool format
    fn convert_tools(&self, tools: &[ToolDescriptor]) -> Vec<WireTool> {
        tools
            .iter()
            .map(|t| WireTool {
                r#type: "function".to_string(),
                function: WireFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    /// Parse an error response body, preferring the server-reported message
    fn parse_error(&self, status: u16, status_text: &str, body: &str) -> DibiError {
        let message = serde_json::from_str::<WireErrorEnvelope>(body)
            .map(|envelope| envelope.error.message)
            .unwrap_or_else(|_| status_text.to_string());

        DibiError::Api(ApiError::ServerError { status, message })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let api_key = match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => {
                tracing::error!(
                    target: "dibi.llm.openai",
                    "completion requested without a configured API key"
                );
                return Err(DibiError::Api(ApiError::AuthenticationFailed));
            }
        };

        let body = WireRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            messages: self.convert_messages(&request.messages, request.system.as_deref()),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(self.convert_tools(&request.tools))
            },
            temperature: Some(request.temperature),
        };

        tracing::debug!(
            target: "dibi.llm.openai",
            model = %request.model,
            messages = body.messages.len(),
            tools = request.tools.len(),
            "sending completion request"
        );

        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let status_text = status
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_string();
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status.as_u16(), &status_text, &body));
        }

        let api_response: WireResponse = response.json().await?;

        let choice = api_response.choices.into_iter().next().ok_or_else(|| {
            DibiError::Api(ApiError::InvalidResponse(
                "no choices in response".to_string(),
            ))
        })?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallRequest {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or_else(|_| serde_json::json!({})),
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            target: "dibi.llm.openai",
            tool_calls = tool_calls.len(),
            has_text = choice.message.content.is_some(),
            "completion response parsed"
        );

        Ok(CompletionResponse {
            text: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
        })
    }
}

// OpenAI wire types

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// Serialized JSON payload, as the API delivers it
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    r#type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireErrorEnvelope {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}
