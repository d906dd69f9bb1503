// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Dibi
//!
//! This module defines all error types used throughout the application.

use thiserror::Error;

/// Main error type for Dibi operations
#[derive(Error, Debug)]
pub enum DibiError {
    /// Completion API errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Tool executor connection failed or timed out
    #[error("Connection error: {0}")]
    Connection(String),

    /// Tool call attempted before the executor connection was established
    #[error("Not connected to the tool executor")]
    NotConnected,

    /// Executor reported a failure for a specific tool call
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Run was cancelled by the user
    #[error("Request cancelled")]
    Cancelled,

    /// Tool-call loop exceeded the configured round cap
    #[error("Tool-call loop exceeded {0} rounds")]
    BoundedLoop(usize),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Completion-API-specific error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// No API key configured
    #[error("Authentication failed: no API key configured")]
    AuthenticationFailed,

    /// API returned a non-success status
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Invalid response from API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),
}

/// Result type alias for Dibi operations
pub type Result<T> = std::result::Result<T, DibiError>;

impl DibiError {
    /// Whether this error represents a user-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DibiError::Cancelled)
    }
}
