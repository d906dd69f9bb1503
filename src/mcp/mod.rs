// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! MCP tool executor integration
//!
//! Request/response correlation over a persistent WebSocket connection.

pub mod client;
pub mod protocol;

pub use client::{McpClient, ToolRegistry};
pub use protocol::McpRequest;
