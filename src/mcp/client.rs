// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! MCP tool executor client
//!
//! Maintains a persistent WebSocket connection to the tool executor and
//! provides a correlated request/response abstraction over it. Replies are
//! not guaranteed to arrive in request order, so every outbound request
//! carries a fresh correlation id and a background reader task matches
//! inbound messages to pending callers by id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::error::{DibiError, Result};
use crate::llm::provider::ToolDescriptor;
use crate::mcp::protocol::{self, McpRequest, METHOD_ERROR};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Pending-request correlation table.
///
/// Entries are removed before the handler fires, so each correlation id is
/// delivered at most once and the table never grows past the number of
/// requests in flight.
type PendingTable = StdMutex<HashMap<String, oneshot::Sender<Value>>>;

/// Abstraction over the tool executor, so the orchestration loop can be
/// tested with a fake registry.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Fetch the declared tool set. Failures degrade to an empty set.
    async fn list_tools(&self) -> Vec<ToolDescriptor>;

    /// Invoke a tool by name and resolve its extracted result payload.
    async fn call_tool(&self, name: &str, args: Value) -> Result<Value>;
}

/// WebSocket client for the MCP tool executor
pub struct McpClient {
    url: String,
    connect_timeout: Duration,
    /// Write half of the connection; `None` until `connect` succeeds.
    /// The same lock serializes connection establishment, so concurrent
    /// callers share one in-flight attempt instead of racing sockets.
    sink: Mutex<Option<WsSink>>,
    pending: Arc<PendingTable>,
}

impl McpClient {
    /// Create a client for the given `ws://` or `wss://` URL
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            sink: Mutex::new(None),
            pending: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Establish the connection if it isn't established yet.
    ///
    /// Idempotent: an already-connected client returns immediately, and
    /// callers arriving during an in-flight attempt wait for its outcome.
    pub async fn connect(&self) -> Result<()> {
        let mut sink_slot = self.sink.lock().await;
        if sink_slot.is_some() {
            tracing::debug!(target: "dibi.mcp.client", "already connected, reusing connection");
            return Ok(());
        }

        tracing::info!(target: "dibi.mcp.client", url = %self.url, "connecting to tool executor");

        let handshake = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                tracing::error!(target: "dibi.mcp.client", "executor handshake timed out");
                DibiError::Connection(format!(
                    "timed out connecting to {} after {:?}",
                    self.url, self.connect_timeout
                ))
            })?;

        let (stream, _response) = handshake.map_err(|e| {
            tracing::error!(target: "dibi.mcp.client", error = %e, "executor connection failed");
            DibiError::Connection(e.to_string())
        })?;

        let (sink, source) = stream.split();
        *sink_slot = Some(sink);

        let pending = Arc::clone(&self.pending);
        tokio::spawn(run_reader(source, pending));

        tracing::info!(target: "dibi.mcp.client", "connected to tool executor");
        Ok(())
    }

    /// Whether a connection has been established
    pub async fn is_connected(&self) -> bool {
        self.sink.lock().await.is_some()
    }

    /// Send a request and await its correlated reply.
    ///
    /// Resolves to the extracted payload, or fails with `ToolExecution` when
    /// the reply carries an error, `NotConnected` before `connect`, and
    /// `Connection` when the link drops with the request in flight.
    async fn request(&self, request: McpRequest) -> Result<Value> {
        let id = Uuid::new_v4().simple().to_string();
        let request = request.with_id(id.clone());

        let (reply_tx, reply_rx) = oneshot::channel();
        self.lock_pending().insert(id.clone(), reply_tx);

        {
            let mut sink_slot = self.sink.lock().await;
            let Some(sink) = sink_slot.as_mut() else {
                self.lock_pending().remove(&id);
                return Err(DibiError::NotConnected);
            };

            tracing::debug!(
                target: "dibi.mcp.client",
                request_id = %id,
                method = %request.method,
                "sending request"
            );

            if let Err(e) = sink.send(WsMessage::Text(request.to_json())).await {
                self.lock_pending().remove(&id);
                // A failed send means the connection is gone; drop the sink
                // so later calls fail fast with NotConnected.
                *sink_slot = None;
                tracing::warn!(target: "dibi.mcp.client", error = %e, "send failed, dropping connection");
                return Err(DibiError::Connection(e.to_string()));
            }
        }

        let reply = reply_rx.await.map_err(|_| {
            DibiError::Connection("connection closed before reply arrived".to_string())
        })?;

        if let Some(message) = protocol::error_message(&reply) {
            tracing::warn!(
                target: "dibi.mcp.client",
                request_id = %id,
                error = %message,
                "executor reported failure"
            );
            return Err(DibiError::ToolExecution(message));
        }

        Ok(protocol::extract_payload(&reply))
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<Value>>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(target: "dibi.mcp.client", "pending table lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[async_trait]
impl ToolRegistry for McpClient {
    async fn list_tools(&self) -> Vec<ToolDescriptor> {
        match self.request(McpRequest::list_tools()).await {
            Ok(payload) => {
                let descriptors = protocol::parse_descriptors(&payload);
                tracing::info!(
                    target: "dibi.mcp.client",
                    tools = descriptors.len(),
                    "fetched tool descriptors"
                );
                descriptors
            }
            Err(e) => {
                // Callers must tolerate "no tools available"
                tracing::warn!(
                    target: "dibi.mcp.client",
                    error = %e,
                    "tools/list failed, degrading to empty tool set"
                );
                Vec::new()
            }
        }
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value> {
        if !self.is_connected().await {
            return Err(DibiError::NotConnected);
        }

        tracing::info!(target: "dibi.mcp.client", tool = %name, "invoking tool");
        self.request(McpRequest::call_tool(name, args)).await
    }
}

/// Background reader: matches inbound messages to pending requests by id.
///
/// When the stream ends the correlation table is drained, which wakes every
/// in-flight caller with a connection error instead of hanging.
async fn run_reader(mut source: WsSource, pending: Arc<PendingTable>) {
    while let Some(frame) = source.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(target: "dibi.mcp.client", error = %e, "read failed, closing");
                break;
            }
        };

        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => {
                tracing::info!(target: "dibi.mcp.client", "executor closed the connection");
                break;
            }
            // Pings are answered by tungstenite internally; binary is not
            // part of this protocol.
            _ => continue,
        };

        let message: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(target: "dibi.mcp.client", error = %e, "unparseable message, skipping");
                continue;
            }
        };

        dispatch(&pending, message);
    }

    let drained = match pending.lock() {
        Ok(mut guard) => guard.drain().count(),
        Err(poisoned) => poisoned.into_inner().drain().count(),
    };
    if drained > 0 {
        tracing::warn!(
            target: "dibi.mcp.client",
            failed_requests = drained,
            "connection closed with requests in flight"
        );
    }
}

/// Deliver one inbound message to its pending handler, if any.
fn dispatch(pending: &PendingTable, message: Value) {
    let id = match message.get("id") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let method = message.get("method").and_then(Value::as_str);

    let handler = id.as_deref().and_then(|id| {
        let mut table = match pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.remove(id)
    });

    match handler {
        Some(reply_tx) => {
            // Error-method pushes addressed to a request resolve it as a
            // failure with the pushed message.
            let delivered = if method == Some(METHOD_ERROR) {
                serde_json::json!({
                    "error": { "message": protocol::push_error_message(&message) }
                })
            } else {
                message
            };
            // The caller may have given up (cancellation); that's fine.
            let _ = reply_tx.send(delivered);
        }
        None if method == Some(METHOD_ERROR) => {
            // Unsolicited/broadcast failure: observable, never fatal.
            tracing::error!(
                target: "dibi.mcp.client",
                message = %protocol::push_error_message(&message),
                "executor broadcast an error"
            );
        }
        None => {
            tracing::debug!(
                target: "dibi.mcp.client",
                id = ?id,
                "reply without a pending handler, dropping"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Minimal scripted executor: one WebSocket connection, replies driven
    /// by a handler on the parsed request values.
    async fn spawn_executor<F>(handler: F) -> String
    where
        F: Fn(Value) -> Vec<Value> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut sink, mut source) = ws.split();

            while let Some(Ok(frame)) = source.next().await {
                if let WsMessage::Text(text) = frame {
                    let request: Value = serde_json::from_str(&text).unwrap();
                    for reply in handler(request.clone()) {
                        sink.send(WsMessage::Text(reply.to_string())).await.unwrap();
                    }
                }
            }
        });

        format!("ws://{}", addr)
    }

    fn echo_result_executor(request: Value) -> Vec<Value> {
        vec![json!({
            "id": request["id"],
            "result": { "echo": request["params"] }
        })]
    }

    #[tokio::test]
    async fn test_call_tool_before_connect_fails() {
        let client = McpClient::new("ws://127.0.0.1:1", Duration::from_secs(5));
        let result = client.call_tool("get_tables", json!({})).await;
        assert!(matches!(result, Err(DibiError::NotConnected)));
    }

    #[tokio::test]
    async fn test_list_tools_before_connect_degrades_to_empty() {
        let client = McpClient::new("ws://127.0.0.1:1", Duration::from_secs(5));
        assert!(client.list_tools().await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // A TCP listener that never completes the WebSocket handshake
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let client = McpClient::new(format!("ws://{}", addr), Duration::from_millis(100));
        let result = client.connect().await;
        assert!(matches!(result, Err(DibiError::Connection(_))));
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let url = spawn_executor(echo_result_executor).await;
        let client = McpClient::new(url, Duration::from_secs(5));

        client.connect().await.unwrap();
        client.connect().await.unwrap();
        assert!(client.is_connected().await);
    }

    #[tokio::test]
    async fn test_call_tool_extracts_result() {
        let url = spawn_executor(echo_result_executor).await;
        let client = McpClient::new(url, Duration::from_secs(5));
        client.connect().await.unwrap();

        let payload = client
            .call_tool("get_tables", json!({"schema": "public"}))
            .await
            .unwrap();

        assert_eq!(payload["echo"]["toolName"], "get_tables");
        assert_eq!(payload["echo"]["args"]["schema"], "public");
    }

    #[tokio::test]
    async fn test_error_reply_maps_to_tool_execution() {
        let url = spawn_executor(|request| {
            vec![json!({
                "id": request["id"],
                "error": { "message": "table not found" }
            })]
        })
        .await;
        let client = McpClient::new(url, Duration::from_secs(5));
        client.connect().await.unwrap();

        let result = client.call_tool("execute_query", json!({})).await;
        match result {
            Err(DibiError::ToolExecution(message)) => assert_eq!(message, "table not found"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_method_push_resolves_request_as_failure() {
        let url = spawn_executor(|request| {
            vec![json!({
                "id": request["id"],
                "method": "error",
                "params": { "message": "executor fell over" }
            })]
        })
        .await;
        let client = McpClient::new(url, Duration::from_secs(5));
        client.connect().await.unwrap();

        let result = client.call_tool("execute_query", json!({})).await;
        match result {
            Err(DibiError::ToolExecution(message)) => assert_eq!(message, "executor fell over"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsolicited_error_broadcast_is_harmless() {
        let url = spawn_executor(|request| {
            vec![
                // Broadcast with no id, then the real reply
                json!({"method": "error", "params": {"error": "background failure"}}),
                json!({"id": request["id"], "result": "ok"}),
            ]
        })
        .await;
        let client = McpClient::new(url, Duration::from_secs(5));
        client.connect().await.unwrap();

        let payload = client.call_tool("get_tables", json!({})).await.unwrap();
        assert_eq!(payload, json!("ok"));
    }

    #[tokio::test]
    async fn test_concurrent_calls_correlate_by_id() {
        // Two calls in flight at once; each caller must get its own payload,
        // never the other one's.
        let url = spawn_executor(|request| {
            let tool = request["params"]["toolName"].as_str().unwrap().to_string();
            if tool == "slow" {
                vec![json!({"id": request["id"], "result": "slow-result"})]
            } else {
                vec![json!({"id": request["id"], "result": "fast-result"})]
            }
        })
        .await;
        let client = Arc::new(McpClient::new(url, Duration::from_secs(5)));
        client.connect().await.unwrap();

        let slow_client = Arc::clone(&client);
        let fast_client = Arc::clone(&client);
        let (slow, fast) = tokio::join!(
            tokio::spawn(async move { slow_client.call_tool("slow", json!({})).await }),
            tokio::spawn(async move { fast_client.call_tool("fast", json!({})).await }),
        );

        assert_eq!(slow.unwrap().unwrap(), json!("slow-result"));
        assert_eq!(fast.unwrap().unwrap(), json!("fast-result"));
    }

    #[tokio::test]
    async fn test_list_tools_parses_descriptors() {
        let url = spawn_executor(|request| {
            vec![json!({
                "id": request["id"],
                "params": { "tools": [
                    {"name": "get_tables", "description": "List tables", "parameters": {}},
                    {"name": "execute_query", "parameters": {"type": "object"}}
                ]}
            })]
        })
        .await;
        let client = McpClient::new(url, Duration::from_secs(5));
        client.connect().await.unwrap();

        let tools = client.list_tools().await;
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "get_tables");
    }

    #[tokio::test]
    async fn test_list_tools_error_reply_degrades_to_empty() {
        let url = spawn_executor(|request| {
            vec![json!({
                "id": request["id"],
                "error": { "message": "listing unavailable" }
            })]
        })
        .await;
        let client = McpClient::new(url, Duration::from_secs(5));
        client.connect().await.unwrap();

        assert!(client.list_tools().await.is_empty());
    }

    #[tokio::test]
    async fn test_connection_drop_fails_inflight_request() {
        // Executor that closes the connection instead of replying
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut sink, mut source) = ws.split();
            let _ = source.next().await;
            let _ = sink.close().await;
        });

        let client = McpClient::new(format!("ws://{}", addr), Duration::from_secs(5));
        client.connect().await.unwrap();

        let result = client.call_tool("get_tables", json!({})).await;
        assert!(matches!(result, Err(DibiError::Connection(_))));
    }

    #[test]
    fn test_dispatch_removes_handler_before_firing() {
        let pending: PendingTable = StdMutex::new(HashMap::new());
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert("req-1".to_string(), tx);

        dispatch(&pending, json!({"id": "req-1", "result": 1}));

        assert!(pending.lock().unwrap().is_empty());
        assert_eq!(rx.try_recv().unwrap(), json!({"id": "req-1", "result": 1}));

        // A second message with the same id has nowhere to go and is dropped
        dispatch(&pending, json!({"id": "req-1", "result": 2}));
    }

    #[test]
    fn test_dispatch_numeric_id() {
        let pending: PendingTable = StdMutex::new(HashMap::new());
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert("7".to_string(), tx);

        dispatch(&pending, json!({"id": 7, "result": "numeric"}));
        assert_eq!(rx.try_recv().unwrap()["result"], "numeric");
    }
}
