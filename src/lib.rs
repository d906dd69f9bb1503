// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Dibi - chat with your database from the terminal.
//!
//! Dibi bridges three actors: the user, an OpenAI-compatible completion API
//! and an MCP tool executor exposing database operations. The interesting
//! part is the tool-calling orchestration loop in `chat::engine`, which
//! repeatedly sends conversation state to the model, dispatches requested
//! tool calls to the executor and folds results back into the history until
//! the model produces a final answer.
//!
//! Module map:
//! - `chat`: orchestration loop, session transcript, cancellation
//! - `llm`: message model, completion client trait, OpenAI implementation
//! - `mcp`: correlated request/response client for the tool executor
//! - `config`: settings file and credential resolution
//! - `cli`: clap argument definitions

pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod mcp;

pub use error::{DibiError, Result};
