// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! The tool-calling orchestration loop
//!
//! Owns the multi-turn negotiation between the completion client and the
//! tool registry: send conversation state to the model, resolve requested
//! tool calls in request order, fold results back into the history, repeat
//! until the model produces a plain answer. Cancellation and tool failures
//! short-circuit the run.

use crate::chat::cancel::CancelToken;
use crate::error::{DibiError, Result};
use crate::llm::message::{ContentBlock, Conversation, Message};
use crate::llm::provider::{
    CompletionClient, CompletionRequest, CompletionResponse, ToolDescriptor,
};
use crate::mcp::client::ToolRegistry;

/// Default system instruction for the database assistant
pub const SYSTEM_PROMPT: &str = "You are a database assistant, built to answer the user's \
questions about their database. Analyze each question carefully and answer using the \
available tools whenever possible. The tools offered to you (execute_query, get_tables, \
get_table_structure and the like) exist to inspect and query the database; gather the \
facts with them before answering instead of guessing. Analyze relations between tables \
and return a more readable response with join operations when useful. Run SQL through the \
execute_query tool. To understand table layout or the database schema, use get_tables and \
get_table_structure first. Always give the user clear, understandable and technically \
correct answers. If you do not know the answer to a question, fetch the table names and \
their structure and reason from those.";

/// Configuration for one orchestration run
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Model identifier sent to the completion API
    pub model: String,
    /// Maximum tokens per completion round
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Cap on model rounds per run; exceeding it fails closed
    pub max_tool_rounds: usize,
    /// System instruction used when the conversation carries none
    pub system_prompt: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-nano".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            max_tool_rounds: 8,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Output hooks for the orchestration loop.
///
/// Every model round and every tool call is surfaced through these hooks as
/// it happens, so frontends can render progress instead of waiting for the
/// final answer.
pub trait ChatObserver {
    fn on_run_start(&mut self, _tools: &[ToolDescriptor]) -> Result<()> {
        Ok(())
    }

    fn on_model_round(&mut self, _round: usize) -> Result<()> {
        Ok(())
    }

    fn on_tool_invocation(&mut self, _tool_name: &str, _args: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    fn on_tool_result(&mut self, _tool_name: &str, _payload: &str) -> Result<()> {
        Ok(())
    }

    fn on_tool_error(&mut self, _tool_name: &str, _message: &str) -> Result<()> {
        Ok(())
    }

    fn on_final_answer(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// No-op observer for callers that don't need output hooks.
#[derive(Debug, Default)]
pub struct NoopChatObserver;

impl ChatObserver for NoopChatObserver {}

/// Run one orchestration turn to completion.
///
/// The conversation must already end with the user's message. On success the
/// final answer is returned and the conversation holds every intermediate
/// turn; on failure the error is the run's terminal outcome and the partial
/// history is the caller's to discard.
pub async fn run_chat_turn(
    client: &dyn CompletionClient,
    registry: &dyn ToolRegistry,
    conversation: &mut Conversation,
    config: &EngineConfig,
    cancel: &CancelToken,
    observer: &mut dyn ChatObserver,
) -> Result<String> {
    // Descriptors are fetched fresh every run so backend capability changes
    // are picked up; a listing failure degrades to zero tools inside the
    // registry and never fails the run.
    let tools = registry.list_tools().await;
    observer.on_run_start(&tools)?;

    tracing::info!(
        target: "dibi.chat.engine",
        model = %config.model,
        tools = tools.len(),
        starting_messages = conversation.len(),
        "orchestration run start"
    );

    let mut round: usize = 0;

    loop {
        round += 1;
        if round > config.max_tool_rounds {
            tracing::warn!(
                target: "dibi.chat.engine",
                max_rounds = config.max_tool_rounds,
                "round cap exceeded, failing closed"
            );
            return Err(DibiError::BoundedLoop(config.max_tool_rounds));
        }

        if cancel.is_cancelled() {
            tracing::info!(target: "dibi.chat.engine", round, "cancelled before model round");
            return Err(DibiError::Cancelled);
        }

        let system = conversation
            .system_prompt
            .clone()
            .unwrap_or_else(|| config.system_prompt.clone());
        let request = CompletionRequest::new(&config.model, conversation.messages.clone())
            .with_system(system)
            .with_max_tokens(config.max_tokens)
            .with_temperature(config.temperature)
            .with_tools(tools.clone());

        observer.on_model_round(round)?;
        tracing::debug!(
            target: "dibi.chat.engine",
            round,
            conversation_messages = conversation.len(),
            "awaiting model"
        );

        let response = tokio::select! {
            result = client.complete(request) => result?,
            _ = cancel.cancelled() => {
                tracing::info!(target: "dibi.chat.engine", round, "cancelled during model round");
                return Err(DibiError::Cancelled);
            }
        };

        let CompletionResponse { text, tool_calls } = response;

        if tool_calls.is_empty() {
            let answer = text.unwrap_or_default();
            conversation.push(Message::assistant(answer.clone()));
            observer.on_final_answer(&answer)?;
            tracing::info!(
                target: "dibi.chat.engine",
                round,
                final_messages = conversation.len(),
                "run complete"
            );
            return Ok(answer);
        }

        tracing::info!(
            target: "dibi.chat.engine",
            round,
            tool_calls = tool_calls.len(),
            "entering tool execution phase"
        );

        // Strictly sequential, in request order: later calls may depend on
        // earlier ones' side effects, and the model expects results in the
        // order it asked for them.
        let mut results = Vec::with_capacity(tool_calls.len());
        for call in &tool_calls {
            if cancel.is_cancelled() {
                // Abort the whole run; nothing from this batch is appended.
                tracing::info!(
                    target: "dibi.chat.engine",
                    round,
                    tool = %call.name,
                    "cancelled before tool call"
                );
                return Err(DibiError::Cancelled);
            }

            observer.on_tool_invocation(&call.name, &call.arguments)?;

            match registry.call_tool(&call.name, call.arguments.clone()).await {
                Ok(payload) => {
                    let serialized = serde_json::to_string(&payload)?;
                    observer.on_tool_result(&call.name, &serialized)?;
                    results.push(serialized);
                }
                Err(e) => {
                    // Fail fast: one tool error aborts the whole multi-call
                    // turn, with no further calls and no further model round.
                    observer.on_tool_error(&call.name, &e.to_string())?;
                    tracing::warn!(
                        target: "dibi.chat.engine",
                        round,
                        tool = %call.name,
                        error = %e,
                        "tool failed, aborting run"
                    );
                    return Err(e);
                }
            }
        }

        // The whole batch succeeded: append the model's tool-call turn with
        // the raw call list, then each result in request order.
        let mut blocks = Vec::with_capacity(tool_calls.len() + 1);
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            blocks.push(ContentBlock::Text { text });
        }
        blocks.extend(tool_calls.iter().map(|call| ContentBlock::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        }));
        conversation.push(Message::assistant_blocks(blocks));

        for (call, serialized) in tool_calls.iter().zip(results) {
            conversation.push(Message::tool_result(&call.id, &call.name, serialized));
        }
    }
}
