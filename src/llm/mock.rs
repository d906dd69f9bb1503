// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock completion client for testing
//!
//! Provides a configurable scripted implementation of the CompletionClient
//! trait that can be used in unit tests without making real API calls.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{DibiError, Result};
use crate::llm::provider::{
    CompletionClient, CompletionRequest, CompletionResponse, ToolCallRequest,
};

/// A scripted completion client for testing
#[derive(Clone, Default)]
pub struct MockCompletionClient {
    /// Queued responses, returned in order (the last one repeats)
    responses: Arc<Mutex<Vec<MockReply>>>,
    /// Call counter
    call_count: Arc<AtomicUsize>,
    /// Recorded requests
    recorded_requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

#[derive(Clone)]
enum MockReply {
    Response(CompletionResponse),
    Failure(Arc<dyn Fn() -> DibiError + Send + Sync>),
}

impl MockCompletionClient {
    /// Create a new mock client with no scripted responses
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a final text response
    pub fn push_text(&self, text: impl Into<String>) {
        self.lock_responses()
            .push(MockReply::Response(CompletionResponse::text(text)));
    }

    /// Queue a tool-call response
    pub fn push_tool_calls(&self, calls: Vec<ToolCallRequest>) {
        self.lock_responses()
            .push(MockReply::Response(CompletionResponse::tool_calls(calls)));
    }

    /// Queue an arbitrary response (e.g. text alongside tool calls)
    pub fn push_response(&self, response: CompletionResponse) {
        self.lock_responses().push(MockReply::Response(response));
    }

    /// Queue a failure produced by the given constructor
    pub fn push_failure(&self, make: impl Fn() -> DibiError + Send + Sync + 'static) {
        self.lock_responses().push(MockReply::Failure(Arc::new(make)));
    }

    /// Get the number of times complete() was called
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Get all recorded requests
    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.lock_recorded().clone()
    }

    /// Get the last request made
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.lock_recorded().last().cloned()
    }

    fn lock_responses(&self) -> std::sync::MutexGuard<'_, Vec<MockReply>> {
        match self.responses.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("mock client responses lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn lock_recorded(&self) -> std::sync::MutexGuard<'_, Vec<CompletionRequest>> {
        match self.recorded_requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("mock client recorded lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.lock_recorded().push(request);

        let responses = self.lock_responses();
        if responses.is_empty() {
            return Ok(CompletionResponse::text("mock response"));
        }
        match &responses[count.min(responses.len() - 1)] {
            MockReply::Response(response) => Ok(response.clone()),
            MockReply::Failure(make) => Err(make()),
        }
    }
}
