// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! MCP message envelopes and reply parsing
//!
//! Requests follow a JSON-RPC-style envelope. Replies from executors in the
//! wild are loosely structured, so payload extraction walks a fixed
//! precedence list of well-known shapes. That list is load-bearing protocol
//! behavior and must not be reordered.
//!
//! # Request Format
//!
//! ```json
//! {
//!   "jsonrpc": "2.0",
//!   "id": "b54f3c1e...",
//!   "method": "tools/call",
//!   "params": { "toolName": "get_tables", "args": {} }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::provider::ToolDescriptor;

/// Protocol version sent on every request
pub const JSONRPC_VERSION: &str = "2.0";

/// Method name for listing available tools
pub const METHOD_TOOLS_LIST: &str = "tools/list";

/// Method name for invoking a tool
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Method name used by executors to push error messages
pub const METHOD_ERROR: &str = "error";

/// Request envelope sent to the tool executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    /// Protocol version (always "2.0")
    pub jsonrpc: String,

    /// Correlation id; assigned by the client right before sending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Method name
    pub method: String,

    /// Method parameters
    pub params: Value,
}

impl McpRequest {
    /// Build a `tools/list` request (params intentionally empty)
    pub fn list_tools() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: METHOD_TOOLS_LIST.to_string(),
            params: serde_json::json!({}),
        }
    }

    /// Build a `tools/call` request
    pub fn call_tool(tool_name: &str, args: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: METHOD_TOOLS_CALL.to_string(),
            params: serde_json::json!({
                "toolName": tool_name,
                "args": args,
            }),
        }
    }

    /// Assign the correlation id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Serialize to a JSON string for the wire
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Extract the payload from a loosely-structured reply.
///
/// Precedence (inherited as-is, changing it would silently alter behavior
/// against real executors): `params.tools`, `result`, `data`, `tools`,
/// `body`, `payload`, a bare array, else the whole reply.
pub fn extract_payload(reply: &Value) -> Value {
    if let Some(tools) = reply.pointer("/params/tools") {
        if !tools.is_null() {
            return tools.clone();
        }
    }
    // For the flat fields, presence wins even with a null value
    for field in ["result", "data", "tools", "body", "payload"] {
        if let Some(value) = reply.get(field) {
            return value.clone();
        }
    }
    if reply.is_array() {
        return reply.clone();
    }
    tracing::debug!(
        target: "dibi.mcp.protocol",
        "no standard reply shape found, returning whole reply"
    );
    reply.clone()
}

/// Extract the server-reported failure message, if the reply carries one
pub fn error_message(reply: &Value) -> Option<String> {
    let error = reply.get("error")?;
    if error.is_null() {
        return None;
    }
    Some(
        error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown executor error")
            .to_string(),
    )
}

/// Extract the message from an error-method push (`method: "error"`).
///
/// Executors put the text in `params.message` or `params.error`.
pub fn push_error_message(message: &Value) -> String {
    message
        .pointer("/params/message")
        .or_else(|| message.pointer("/params/error"))
        .and_then(Value::as_str)
        .unwrap_or("unknown executor error")
        .to_string()
}

/// Parse tool descriptors out of a `tools/list` payload.
///
/// Entries without a name are dropped; `parameters` and `inputSchema` are
/// both accepted as the argument schema field.
pub fn parse_descriptors(payload: &Value) -> Vec<ToolDescriptor> {
    let Some(entries) = payload.as_array() else {
        tracing::warn!(
            target: "dibi.mcp.protocol",
            "tools/list payload was not an array, treating as no tools"
        );
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?.to_string();
            let description = entry
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let parameters = entry
                .get("parameters")
                .or_else(|| entry.get("inputSchema"))
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));
            Some(ToolDescriptor {
                name,
                description,
                parameters,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_tools_request() {
        let request = McpRequest::list_tools().with_id("req-1");

        assert_eq!(request.jsonrpc, "2.0");
        assert_eq!(request.method, "tools/list");
        assert_eq!(request.id.as_deref(), Some("req-1"));
        assert_eq!(request.params, json!({}));
    }

    #[test]
    fn test_call_tool_request() {
        let request =
            McpRequest::call_tool("execute_query", json!({"query": "SELECT 1"})).with_id("req-2");

        assert_eq!(request.method, "tools/call");
        assert_eq!(request.params["toolName"], "execute_query");
        assert_eq!(request.params["args"]["query"], "SELECT 1");
    }

    #[test]
    fn test_request_to_json_single_line() {
        let json = McpRequest::call_tool("get_tables", json!({})).with_id("x").to_json();

        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"tools/call\""));
        assert!(!json.contains('\n'));
    }

    #[test]
    fn test_extract_payload_params_tools_wins() {
        let reply = json!({
            "params": {"tools": [{"name": "get_tables"}]},
            "result": "ignored"
        });
        assert_eq!(extract_payload(&reply), json!([{"name": "get_tables"}]));
    }

    #[test]
    fn test_extract_payload_precedence_order() {
        let reply = json!({"result": 1, "data": 2, "tools": 3, "body": 4, "payload": 5});
        assert_eq!(extract_payload(&reply), json!(1));

        let reply = json!({"data": 2, "tools": 3});
        assert_eq!(extract_payload(&reply), json!(2));

        let reply = json!({"tools": 3, "body": 4});
        assert_eq!(extract_payload(&reply), json!(3));

        let reply = json!({"body": 4, "payload": 5});
        assert_eq!(extract_payload(&reply), json!(4));

        let reply = json!({"payload": 5});
        assert_eq!(extract_payload(&reply), json!(5));
    }

    #[test]
    fn test_extract_payload_null_result_is_still_a_result() {
        let reply = json!({"result": null, "data": "ignored"});
        assert_eq!(extract_payload(&reply), json!(null));
    }

    #[test]
    fn test_extract_payload_bare_array() {
        let reply = json!([1, 2, 3]);
        assert_eq!(extract_payload(&reply), json!([1, 2, 3]));
    }

    #[test]
    fn test_extract_payload_whole_reply_fallback() {
        let reply = json!({"custom": "shape"});
        assert_eq!(extract_payload(&reply), reply);
    }

    #[test]
    fn test_error_message_present() {
        let reply = json!({"error": {"message": "table not found"}});
        assert_eq!(error_message(&reply).as_deref(), Some("table not found"));
    }

    #[test]
    fn test_error_message_without_text() {
        let reply = json!({"error": {}});
        assert_eq!(
            error_message(&reply).as_deref(),
            Some("unknown executor error")
        );
    }

    #[test]
    fn test_error_message_absent() {
        assert!(error_message(&json!({"result": 1})).is_none());
        assert!(error_message(&json!({"error": null})).is_none());
    }

    #[test]
    fn test_push_error_message_variants() {
        let with_message = json!({"method": "error", "params": {"message": "boom"}});
        assert_eq!(push_error_message(&with_message), "boom");

        let with_error = json!({"method": "error", "params": {"error": "kaboom"}});
        assert_eq!(push_error_message(&with_error), "kaboom");

        let bare = json!({"method": "error"});
        assert_eq!(push_error_message(&bare), "unknown executor error");
    }

    #[test]
    fn test_parse_descriptors() {
        let payload = json!([
            {"name": "get_tables", "description": "List tables", "parameters": {"type": "object"}},
            {"name": "execute_query", "inputSchema": {"type": "object", "required": ["query"]}},
            {"description": "nameless, dropped"}
        ]);

        let descriptors = parse_descriptors(&payload);
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].name, "get_tables");
        assert_eq!(descriptors[0].description, "List tables");
        assert_eq!(descriptors[1].name, "execute_query");
        assert_eq!(descriptors[1].parameters["required"][0], "query");
    }

    #[test]
    fn test_parse_descriptors_non_array() {
        assert!(parse_descriptors(&json!({"oops": true})).is_empty());
    }
}
