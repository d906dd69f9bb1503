// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Completion API integration
//!
//! Message model, client abstraction and the OpenAI-compatible implementation.

pub mod message;
pub mod mock;
pub mod openai;
pub mod provider;

pub use message::{Conversation, Message, Role};
pub use openai::OpenAiClient;
pub use provider::{
    CompletionClient, CompletionRequest, CompletionResponse, ToolCallRequest, ToolDescriptor,
};
