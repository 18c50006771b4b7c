//! Stdio server implementing JSON-RPC 2.0 over stdin/stdout.
//!
//! Exposes the Forest tools to a single front-end client. Intelligence
//! request envelopes go out as notifications; the client fulfills them via
//! `llm/process_response`.
//!
//! Protocol: newline-delimited JSON-RPC 2.0 on stdin/stdout. Inbound
//! requests are dispatched on their own tasks so a tool call suspended on
//! the bridge never blocks the response that resolves it; responses are
//! serialized through one writer task and may appear in any order.
//! Logging goes to stderr (stdout is reserved for protocol messages).
//! A broken output pipe stops writing but never kills processing.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::services::IntelligenceBridge;

use super::router::ToolRouter;

pub struct StdioServer {
    router: Arc<ToolRouter>,
    bridge: Arc<IntelligenceBridge>,
}

impl StdioServer {
    pub fn new(router: Arc<ToolRouter>, bridge: Arc<IntelligenceBridge>) -> Self {
        Self { router, bridge }
    }

    /// Run the server over stdin/stdout until the input stream closes.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.run_io(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Run over arbitrary streams (tests drive this with in-memory pipes).
    pub async fn run_io<R, W>(&self, input: R, output: W) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(Self::write_loop(output, out_rx));

        // Bridge envelopes flow to the client as notifications.
        let (env_tx, mut env_rx) = mpsc::unbounded_channel();
        self.bridge.set_outbound(env_tx).await;
        let env_out = out_tx.clone();
        let envelope_pump = tokio::spawn(async move {
            while let Some(envelope) = env_rx.recv().await {
                let frame = json!({
                    "jsonrpc": "2.0",
                    "method": "intelligence/request",
                    "params": envelope,
                })
                .to_string();
                if env_out.send(frame).is_err() {
                    break;
                }
            }
        });

        tracing::info!("stdio server started");
        let reader = BufReader::new(input);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            let router = self.router.clone();
            let bridge = self.bridge.clone();
            let out = out_tx.clone();
            tokio::spawn(async move {
                if let Some(response) = handle_message(&router, &bridge, &line).await {
                    let _ = out.send(response);
                }
            });
        }

        tracing::info!("stdio input closed, draining");
        drop(out_tx);
        envelope_pump.abort();
        let _ = writer.await;
        Ok(())
    }

    async fn write_loop<W>(mut output: W, mut rx: mpsc::UnboundedReceiver<String>)
    where
        W: AsyncWrite + Unpin,
    {
        let mut sink_broken = false;
        while let Some(frame) = rx.recv().await {
            if sink_broken {
                continue;
            }
            let mut bytes = frame.into_bytes();
            bytes.push(b'\n');
            if let Err(e) = output.write_all(&bytes).await {
                // Client went away; keep processing without a sink.
                tracing::warn!(error = %e, "output pipe broken, suppressing further writes");
                sink_broken = true;
                continue;
            }
            if let Err(e) = output.flush().await {
                tracing::warn!(error = %e, "output flush failed, suppressing further writes");
                sink_broken = true;
            }
        }
    }
}

async fn handle_message(
    router: &ToolRouter,
    bridge: &IntelligenceBridge,
    line: &str,
) -> Option<String> {
    let request: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return Some(error_response(
                Value::Null,
                -32700,
                &format!("Parse error: {e}"),
            ));
        }
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or("");
    let params = request.get("params").cloned().unwrap_or_else(|| json!({}));

    match method {
        "initialize" => Some(handle_initialize(id)),
        "tools/list" => Some(success_response(id, router.tool_list())),
        "tools/call" => Some(handle_tools_call(router, id, &params).await),
        "llm/process_response" => Some(handle_llm_response(bridge, id, &params).await),
        "notifications/initialized" => None,
        _ => Some(error_response(
            id,
            -32601,
            &format!("Method not found: {method}"),
        )),
    }
}

fn handle_initialize(id: Value) -> String {
    let result = json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": "forest",
            "version": env!("CARGO_PKG_VERSION")
        }
    });
    success_response(id, result)
}

async fn handle_tools_call(router: &ToolRouter, id: Value, params: &Value) -> String {
    let tool_name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    match router.dispatch(tool_name, &arguments).await {
        Ok(payload) => {
            let result = json!({
                "content": [{
                    "type": "text",
                    "text": payload.to_string(),
                }]
            });
            success_response(id, result)
        }
        Err(error) => {
            let result = json!({
                "content": [{
                    "type": "text",
                    "text": error.to_wire().to_string(),
                }],
                "isError": true
            });
            success_response(id, result)
        }
    }
}

async fn handle_llm_response(bridge: &IntelligenceBridge, id: Value, params: &Value) -> String {
    let request_id = params
        .get("request_id")
        .and_then(Value::as_str)
        .unwrap_or("");
    let response = params.get("response").and_then(Value::as_str).unwrap_or("");

    match bridge.process_response(request_id, response).await {
        Ok(envelope) => success_response(
            id,
            serde_json::to_value(envelope).unwrap_or_else(|_| json!({})),
        ),
        Err(e) => error_response(id, -32602, &e.to_string()),
    }
}

fn success_response(id: Value, result: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
    .to_string()
}

fn error_response(id: Value, code: i32, message: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;

    use crate::adapters::mcp::router::tests::fixture_with;

    async fn run_session(frames: Vec<String>) -> Vec<Value> {
        let f = fixture_with(false);
        let server = StdioServer::new(Arc::new(f.router), f.bridge.clone());

        let (mut in_tx, in_rx) = tokio::io::duplex(64 * 1024);
        let (out_tx, mut out_rx) = tokio::io::duplex(64 * 1024);

        let task = tokio::spawn(async move { server.run_io(in_rx, out_tx).await });

        for frame in frames {
            in_tx.write_all(frame.as_bytes()).await.unwrap();
            in_tx.write_all(b"\n").await.unwrap();
        }
        in_tx.shutdown().await.unwrap();
        drop(in_tx);

        task.await.unwrap().unwrap();

        let mut collected = Vec::new();
        let mut buffer = String::new();
        use tokio::io::AsyncReadExt;
        let _ = out_rx.read_to_string(&mut buffer).await;
        for line in buffer.lines() {
            if !line.trim().is_empty() {
                collected.push(serde_json::from_str(line).unwrap());
            }
        }
        collected
    }

    fn by_id<'a>(frames: &'a [Value], id: i64) -> &'a Value {
        frames
            .iter()
            .find(|f| f["id"] == json!(id))
            .unwrap_or_else(|| panic!("no response with id {id}"))
    }

    #[tokio::test]
    async fn test_initialize_and_tools_list() {
        let frames = run_session(vec![
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}).to_string(),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}).to_string(),
        ])
        .await;

        let init = by_id(&frames, 1);
        assert_eq!(init["result"]["serverInfo"]["name"], "forest");

        let tools = by_id(&frames, 2);
        assert!(tools["result"]["tools"].as_array().unwrap().len() > 15);
    }

    #[tokio::test]
    async fn test_parse_error_and_unknown_method() {
        let frames = run_session(vec![
            "this is not json".to_string(),
            json!({"jsonrpc": "2.0", "id": 7, "method": "bogus/method"}).to_string(),
        ])
        .await;

        assert!(frames
            .iter()
            .any(|f| f["error"]["code"] == json!(-32700)));
        assert_eq!(by_id(&frames, 7)["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let frames = run_session(vec![
            json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                "params": {"name": "list_projects_forest", "arguments": {}}
            })
            .to_string(),
            json!({
                "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": {"name": "no_such_tool", "arguments": {}}
            })
            .to_string(),
        ])
        .await;

        let listed = by_id(&frames, 1);
        let text = listed["result"]["content"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["count"], 0);

        let unknown = by_id(&frames, 2);
        assert_eq!(unknown["result"]["isError"], true);
        let text = unknown["result"]["content"][0]["text"].as_str().unwrap();
        let wire: Value = serde_json::from_str(text).unwrap();
        assert_eq!(wire["error"], "UnknownTool");
    }

    #[tokio::test]
    async fn test_unknown_llm_response_is_an_error() {
        let frames = run_session(vec![json!({
            "jsonrpc": "2.0", "id": 3, "method": "llm/process_response",
            "params": {"request_id": "nope", "response": "{}"}
        })
        .to_string()])
        .await;
        assert!(by_id(&frames, 3)["error"]["message"]
            .as_str()
            .unwrap()
            .contains("nope"));
    }
}
