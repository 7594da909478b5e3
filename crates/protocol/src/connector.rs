use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

use agentmesh_core::{Error, Result, ServerConfig};
use agentmesh_events::EventBus;

use crate::framing::{encode_frame, FrameCodec};
use crate::wire::{
    InboundMessage, JsonRpcNotification, JsonRpcReply, JsonRpcRequest, ServerInfo, ToolDescriptor,
    JSONRPC_VERSION, PROTOCOL_VERSION,
};

const CLIENT_NAME: &str = "agentmesh";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
}

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// State shared between the connector API and its background reader task.
struct Shared {
    server_name: String,
    bus: Arc<EventBus>,
    state: StdMutex<ConnectionState>,
    pending: PendingMap,
    writer: Mutex<Option<BoxedWriter>>,
    /// Bumped on every connect. A reader task carries the generation it was
    /// spawned under; teardown from a previous generation's reader is a
    /// no-op, so a zombie reader cannot kill a reconnected session.
    generation: AtomicU64,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock().expect("connector state lock poisoned")
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("connector state lock poisoned") = state;
    }

    async fn write_frame(&self, payload: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::Connection(format!("{}: transport not wired", self.server_name)))?;
        writer.write_all(&encode_frame(payload)).await.map_err(|e| {
            Error::Connection(format!("{}: write error: {}", self.server_name, e))
        })?;
        writer
            .flush()
            .await
            .map_err(|e| Error::Connection(format!("{}: flush error: {}", self.server_name, e)))
    }

    /// Reject every outstanding request. Used on disconnect and dispose.
    async fn fail_pending(&self, reason: &str) {
        let mut map = self.pending.lock().await;
        for (id, tx) in map.drain() {
            debug!(server = %self.server_name, id, reason, "rejecting pending request");
            let _ = tx.send(Err(Error::Connection(reason.to_string())));
        }
    }

    /// Transition to Disconnected after the transport died underneath us.
    /// Ignored when the closing reader belongs to a superseded connection.
    async fn on_closed(&self, generation: u64, reason: &str) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(server = %self.server_name, generation, reason, "stale reader closed, ignoring");
            return;
        }
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        error!(server = %self.server_name, reason, "tool server connection closed");
        self.set_state(ConnectionState::Disconnected);
        self.fail_pending("connection closed").await;
        *self.writer.lock().await = None;
        self.bus.emit(
            "protocol.server.exit",
            json!({ "server": self.server_name, "reason": reason }),
        );
    }

    /// Background task: pull frames off the transport and dispatch them until
    /// EOF or a read error.
    async fn reader_task(
        self: Arc<Self>,
        mut reader: impl AsyncRead + Send + Unpin,
        generation: u64,
    ) {
        let mut codec = FrameCodec::new();
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    self.on_closed(generation, "server closed stdout").await;
                    break;
                }
                Ok(n) => {
                    codec.extend(&buf[..n]);
                    while let Some(payload) = codec.next_payload() {
                        self.dispatch(&payload).await;
                    }
                }
                Err(e) => {
                    self.on_closed(generation, &format!("read error: {}", e))
                        .await;
                    break;
                }
            }
        }
    }

    async fn dispatch(&self, payload: &[u8]) {
        let msg: InboundMessage = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(e) => {
                // Per-message decode errors are recovered locally; the
                // connection stays up.
                warn!(server = %self.server_name, error = %e, "dropping undecodable frame");
                return;
            }
        };

        if msg.is_response() {
            self.dispatch_response(msg).await;
        } else if msg.is_server_request() {
            self.dispatch_server_request(msg).await;
        } else if msg.is_notification() {
            self.dispatch_notification(msg);
        } else {
            warn!(server = %self.server_name, "frame is neither response, request nor notification");
        }
    }

    async fn dispatch_response(&self, msg: InboundMessage) {
        let id = match msg.id.as_ref().and_then(Value::as_u64) {
            Some(id) => id,
            None => {
                warn!(server = %self.server_name, id = ?msg.id, "response with non-numeric id dropped");
                return;
            }
        };
        let tx = self.pending.lock().await.remove(&id);
        match tx {
            Some(tx) => {
                let outcome = match msg.error {
                    Some(err) => Err(Error::Tool(format!(
                        "JSON-RPC error {}: {}",
                        err.code, err.message
                    ))),
                    None => Ok(msg.result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(outcome);
            }
            // Either never ours or already timed out; must not resolve anything.
            None => debug!(server = %self.server_name, id, "late or unknown response dropped"),
        }
    }

    /// Server-initiated requests are acknowledged with an empty result and
    /// republished on the bus for custom handling. Servers expecting a
    /// meaningful reply (e.g. sampling) will see an empty object; embedders
    /// needing real replies must handle the republished event out of band.
    async fn dispatch_server_request(&self, msg: InboundMessage) {
        let method = msg.method.unwrap_or_default();
        let id = msg.id.unwrap_or(Value::Null);
        debug!(server = %self.server_name, %method, id = %id, "server-initiated request, auto-acknowledging");

        let reply = JsonRpcReply {
            jsonrpc: JSONRPC_VERSION,
            id: id.clone(),
            result: json!({}),
        };
        if let Ok(bytes) = serde_json::to_vec(&reply) {
            if let Err(e) = self.write_frame(&bytes).await {
                warn!(server = %self.server_name, error = %e, "failed to acknowledge server request");
            }
        }

        self.bus.emit(
            &format!("protocol.request.{}", method.replace('/', ".")),
            json!({
                "server": self.server_name,
                "id": id,
                "method": method,
                "params": msg.params.unwrap_or(Value::Null),
            }),
        );
    }

    fn dispatch_notification(&self, msg: InboundMessage) {
        let method = msg.method.unwrap_or_default();
        debug!(server = %self.server_name, %method, "notification");
        self.bus.emit(
            &format!("protocol.notification.{}", method.replace('/', ".")),
            json!({
                "server": self.server_name,
                "method": method,
                "params": msg.params.unwrap_or(Value::Null),
            }),
        );
    }
}

/// Client for one tool-server child process speaking Content-Length framed
/// JSON-RPC 2.0 over stdio.
///
/// Lifecycle: `Disconnected → Connecting → Ready → Disconnected`; once
/// disconnected, only a fresh `connect` brings it back.
pub struct Connector {
    config: ServerConfig,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    default_timeout: Duration,
    tools: Mutex<Vec<ToolDescriptor>>,
    server_info: StdMutex<Option<ServerInfo>>,
    child: Mutex<Option<Child>>,
}

impl Connector {
    pub fn new(config: ServerConfig, bus: Arc<EventBus>, default_timeout: Duration) -> Self {
        let shared = Arc::new(Shared {
            server_name: config.name.clone(),
            bus,
            state: StdMutex::new(ConnectionState::Disconnected),
            pending: Mutex::new(HashMap::new()),
            writer: Mutex::new(None),
            generation: AtomicU64::new(0),
        });
        Self {
            config,
            shared,
            next_id: AtomicU64::new(1),
            default_timeout,
            tools: Mutex::new(Vec::new()),
            server_info: StdMutex::new(None),
            child: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn server_name(&self) -> &str {
        &self.config.name
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info
            .lock()
            .expect("server info lock poisoned")
            .clone()
    }

    /// Spawn the configured tool-server process and perform the handshake.
    /// Returns the identity the server reported.
    pub async fn connect(&self, timeout: Duration) -> Result<ServerInfo> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            // stderr is a diagnostic side-channel, never protocol data.
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        for (k, v) in &self.config.env {
            cmd.env(k, v);
        }
        if let Some(dir) = &self.config.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::Connection(format!(
                "{}: failed to spawn '{}': {}",
                self.config.name, self.config.command, e
            ))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Connection(format!("{}: no stdin", self.config.name)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Connection(format!("{}: no stdout", self.config.name)))?;
        *self.child.lock().await = Some(child);

        self.connect_with_io(stdout, stdin, timeout).await
    }

    /// Perform the handshake over an already-wired transport. `connect` uses
    /// this with the child's stdio; tests drive it over in-memory pipes.
    pub async fn connect_with_io(
        &self,
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        timeout: Duration,
    ) -> Result<ServerInfo> {
        if self.shared.state() != ConnectionState::Disconnected {
            return Err(Error::Connection(format!(
                "{}: connect while {:?}",
                self.config.name,
                self.shared.state()
            )));
        }
        self.shared.set_state(ConnectionState::Connecting);
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.shared.writer.lock().await = Some(Box::new(writer));
        tokio::spawn(self.shared.clone().reader_task(reader, generation));

        match self.handshake(timeout).await {
            Ok(info) => {
                self.shared.set_state(ConnectionState::Ready);
                *self
                    .server_info
                    .lock()
                    .expect("server info lock poisoned") = Some(info.clone());
                info!(server = %self.config.name, remote = %info.name, version = %info.version, "tool server ready");
                self.shared.bus.emit(
                    "protocol.server.connected",
                    json!({ "server": self.config.name, "serverInfo": info.clone() }),
                );
                if let Err(e) = self.refresh_tools().await {
                    self.dispose().await;
                    return Err(e);
                }
                Ok(info)
            }
            Err(e) => {
                self.dispose().await;
                Err(Error::Handshake(format!("{}: {}", self.config.name, e)))
            }
        }
    }

    async fn handshake(&self, timeout: Duration) -> Result<ServerInfo> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": CLIENT_NAME, "version": CLIENT_VERSION },
        });
        let result = self.send_request("initialize", Some(params), timeout).await?;
        let info: ServerInfo = result
            .get("serverInfo")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| Error::Handshake("initialize result missing serverInfo".to_string()))?;

        self.send_notification("notifications/initialized", None)
            .await?;
        Ok(info)
    }

    /// Send a request and wait for its correlated response.
    ///
    /// On timeout the pending entry is removed first, so a response that
    /// arrives later finds nothing to resolve and is dropped silently.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.to_string(),
            params,
        };
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, tx);

        debug!(server = %self.config.name, id, method, "→ request");
        let bytes = serde_json::to_vec(&req)?;
        if let Err(e) = self.shared.write_frame(&bytes).await {
            self.shared.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Connection(format!(
                "{}: connection closed",
                self.config.name
            ))),
            Err(_) => {
                self.shared.pending.lock().await.remove(&id);
                Err(Error::RequestTimeout(method.to_string()))
            }
        }
    }

    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notif = JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION,
            method: method.to_string(),
            params,
        };
        let bytes = serde_json::to_vec(&notif)?;
        self.shared.write_frame(&bytes).await
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.shared.state() != ConnectionState::Ready {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    /// Fetch tools/list and cache the descriptors.
    pub async fn refresh_tools(&self) -> Result<()> {
        let result = self
            .send_request("tools/list", None, self.default_timeout)
            .await?;
        let tools: Vec<ToolDescriptor> = serde_json::from_value(
            result.get("tools").cloned().unwrap_or(Value::Array(vec![])),
        )?;
        debug!(server = %self.config.name, count = tools.len(), "tool list refreshed");
        *self.tools.lock().await = tools;
        Ok(())
    }

    /// Cached tool descriptors from the last refresh.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.ensure_ready()?;
        Ok(self.tools.lock().await.clone())
    }

    /// Invoke tools/call. Text content is extracted and opportunistically
    /// parsed as JSON; a result flagged `isError` becomes a tool error.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.ensure_ready()?;
        let params = json!({ "name": name, "arguments": arguments });
        let result = self
            .send_request("tools/call", Some(params), self.default_timeout)
            .await?;

        let text = extract_text_content(&result);
        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            return Err(Error::Tool(
                text.unwrap_or_else(|| "tool returned an error".to_string()),
            ));
        }
        match text {
            Some(text) => {
                Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
            }
            None => Ok(result.get("content").cloned().unwrap_or(Value::Null)),
        }
    }

    /// Tear everything down. Safe to call any number of times.
    pub async fn dispose(&self) {
        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.fail_pending("connector disposed").await;
        *self.shared.writer.lock().await = None;
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(server = %self.config.name, error = %e, "failed to kill tool server");
            }
        }
        self.tools.lock().await.clear();
        *self
            .server_info
            .lock()
            .expect("server info lock poisoned") = None;
    }
}

/// Join the text blocks of a `{content: [{type: "text", text}]}` result.
fn extract_text_content(result: &Value) -> Option<String> {
    let blocks = result.get("content")?.as_array()?;
    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{split, DuplexStream, ReadHalf, WriteHalf};

    fn test_connector(bus: &Arc<EventBus>) -> Connector {
        let config = ServerConfig {
            name: "stub".to_string(),
            command: "unused".to_string(),
            args: vec![],
            env: Default::default(),
            cwd: None,
        };
        Connector::new(config, bus.clone(), Duration::from_secs(2))
    }

    async fn read_frame(
        reader: &mut ReadHalf<DuplexStream>,
        codec: &mut FrameCodec,
    ) -> Option<Value> {
        loop {
            if let Some(payload) = codec.next_payload() {
                return serde_json::from_slice(&payload).ok();
            }
            let mut buf = [0u8; 1024];
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => codec.extend(&buf[..n]),
            }
        }
    }

    async fn write_json(writer: &mut WriteHalf<DuplexStream>, value: Value) {
        writer
            .write_all(&encode_frame(value.to_string().as_bytes()))
            .await
            .unwrap();
        writer.flush().await.unwrap();
    }

    /// Serve the initialize handshake plus the post-handshake tools/list
    /// refresh, then hand the transport back to the test body.
    async fn serve_handshake(
        server: DuplexStream,
    ) -> (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>, FrameCodec) {
        let (mut reader, mut writer) = split(server);
        let mut codec = FrameCodec::new();

        let init = read_frame(&mut reader, &mut codec).await.unwrap();
        assert_eq!(init["method"], "initialize");
        assert_eq!(init["params"]["clientInfo"]["name"], "agentmesh");
        write_json(
            &mut writer,
            json!({
                "jsonrpc": "2.0",
                "id": init["id"],
                "result": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "serverInfo": { "name": "stub", "version": "0" },
                },
            }),
        )
        .await;

        let initialized = read_frame(&mut reader, &mut codec).await.unwrap();
        assert_eq!(initialized["method"], "notifications/initialized");

        let list = read_frame(&mut reader, &mut codec).await.unwrap();
        assert_eq!(list["method"], "tools/list");
        write_json(
            &mut writer,
            json!({
                "jsonrpc": "2.0",
                "id": list["id"],
                "result": { "tools": [{
                    "name": "echo",
                    "description": "echo back",
                    "inputSchema": { "type": "object", "required": ["x"] },
                }]},
            }),
        )
        .await;

        (reader, writer, codec)
    }

    #[tokio::test]
    async fn test_handshake_returns_server_identity() {
        let bus = EventBus::new(100);
        let connector = test_connector(&bus);
        let (client, server) = tokio::io::duplex(4096);
        let stub = tokio::spawn(async move { serve_handshake(server).await });

        let (client_r, client_w) = split(client);
        let info = connector
            .connect_with_io(client_r, client_w, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(info.name, "stub");
        assert_eq!(info.version, "0");
        assert_eq!(connector.state(), ConnectionState::Ready);

        let tools = connector.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        stub.await.unwrap();
    }

    #[tokio::test]
    async fn test_call_tool_before_connect_is_not_initialized() {
        let bus = EventBus::new(100);
        let connector = test_connector(&bus);
        let err = connector
            .call_tool("echo", json!({"x": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
    }

    #[tokio::test]
    async fn test_responses_correlate_in_any_order() {
        let bus = EventBus::new(100);
        let connector = Arc::new(test_connector(&bus));
        let (client, server) = tokio::io::duplex(4096);

        let stub = tokio::spawn(async move {
            let (mut reader, mut writer, mut codec) = serve_handshake(server).await;
            // Collect three requests, then answer them in reverse order.
            let mut requests = Vec::new();
            for _ in 0..3 {
                requests.push(read_frame(&mut reader, &mut codec).await.unwrap());
            }
            for req in requests.iter().rev() {
                write_json(
                    &mut writer,
                    json!({
                        "jsonrpc": "2.0",
                        "id": req["id"],
                        "result": { "tag": req["params"]["tag"] },
                    }),
                )
                .await;
            }
            // Keep the transport open until the assertions ran.
            let _ = read_frame(&mut reader, &mut codec).await;
        });

        let (client_r, client_w) = split(client);
        connector
            .connect_with_io(client_r, client_w, Duration::from_secs(1))
            .await
            .unwrap();

        let call = |tag: &'static str| {
            let connector = connector.clone();
            async move {
                connector
                    .send_request("test/probe", Some(json!({"tag": tag})), Duration::from_secs(1))
                    .await
                    .unwrap()
            }
        };
        let (a, b, c) = tokio::join!(call("a"), call("b"), call("c"));
        assert_eq!(a["tag"], "a");
        assert_eq!(b["tag"], "b");
        assert_eq!(c["tag"], "c");

        connector.dispose().await;
        stub.abort();
    }

    #[tokio::test]
    async fn test_timeout_then_late_response_is_dropped() {
        let bus = EventBus::new(100);
        let connector = test_connector(&bus);
        let (client, server) = tokio::io::duplex(4096);

        let stub = tokio::spawn(async move {
            let (mut reader, mut writer, mut codec) = serve_handshake(server).await;
            let slow = read_frame(&mut reader, &mut codec).await.unwrap();
            // Deliberately answer after the caller's deadline.
            tokio::time::sleep(Duration::from_millis(150)).await;
            write_json(
                &mut writer,
                json!({ "jsonrpc": "2.0", "id": slow["id"], "result": "too late" }),
            )
            .await;
            // The connector must still serve fresh requests afterwards.
            let next = read_frame(&mut reader, &mut codec).await.unwrap();
            write_json(
                &mut writer,
                json!({ "jsonrpc": "2.0", "id": next["id"], "result": "fresh" }),
            )
            .await;
        });

        let (client_r, client_w) = split(client);
        connector
            .connect_with_io(client_r, client_w, Duration::from_secs(1))
            .await
            .unwrap();

        let err = connector
            .send_request("test/slow", None, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequestTimeout(ref m) if m == "test/slow"));

        // Wait past the late delivery, then prove the connection still works.
        tokio::time::sleep(Duration::from_millis(250)).await;
        let result = connector
            .send_request("test/next", None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result, json!("fresh"));

        stub.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_exit_rejects_pending_requests() {
        let bus = EventBus::new(100);
        let connector = Arc::new(test_connector(&bus));
        let (client, server) = tokio::io::duplex(4096);

        let stub = tokio::spawn(async move {
            let (mut reader, writer, mut codec) = serve_handshake(server).await;
            // Swallow one request, then die without answering.
            let _ = read_frame(&mut reader, &mut codec).await;
            drop(reader);
            drop(writer);
        });

        let (client_r, client_w) = split(client);
        connector
            .connect_with_io(client_r, client_w, Duration::from_secs(1))
            .await
            .unwrap();

        let err = connector
            .send_request("test/doomed", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        stub.await.unwrap();

        assert_eq!(connector.state(), ConnectionState::Disconnected);
        let names: Vec<String> = bus.history().into_iter().map(|e| e.name).collect();
        assert!(names.contains(&"protocol.server.exit".to_string()));
    }

    #[tokio::test]
    async fn test_notifications_republished_on_bus() {
        let bus = EventBus::new(100);
        let connector = test_connector(&bus);
        let (client, server) = tokio::io::duplex(4096);

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = bus.subscribe("protocol.notification.*", move |event| {
            s.lock().unwrap().push(event.payload.clone());
        });

        let stub = tokio::spawn(async move {
            let (mut reader, mut writer, mut codec) = serve_handshake(server).await;
            write_json(
                &mut writer,
                json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/progress",
                    "params": { "progress": 0.5 },
                }),
            )
            .await;
            let _ = read_frame(&mut reader, &mut codec).await;
        });

        let (client_r, client_w) = split(client);
        connector
            .connect_with_io(client_r, client_w, Duration::from_secs(1))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["params"]["progress"], 0.5);
        stub.abort();
    }

    #[tokio::test]
    async fn test_server_request_auto_acknowledged() {
        let bus = EventBus::new(100);
        let connector = test_connector(&bus);
        let (client, server) = tokio::io::duplex(4096);

        let stub = tokio::spawn(async move {
            let (mut reader, mut writer, mut codec) = serve_handshake(server).await;
            write_json(
                &mut writer,
                json!({
                    "jsonrpc": "2.0",
                    "id": 99,
                    "method": "sampling/createMessage",
                    "params": {},
                }),
            )
            .await;
            // The connector must answer with an empty result for id 99.
            read_frame(&mut reader, &mut codec).await.unwrap()
        });

        let (client_r, client_w) = split(client);
        connector
            .connect_with_io(client_r, client_w, Duration::from_secs(1))
            .await
            .unwrap();

        let ack = stub.await.unwrap();
        assert_eq!(ack["id"], 99);
        assert_eq!(ack["result"], json!({}));

        let names: Vec<String> = bus.history().into_iter().map(|e| e.name).collect();
        assert!(names.contains(&"protocol.request.sampling.createMessage".to_string()));
    }

    #[tokio::test]
    async fn test_stale_reader_does_not_kill_reconnected_session() {
        let bus = EventBus::new(100);
        let connector = test_connector(&bus);

        // First session: connect, then dispose. Its reader task keeps
        // running until the transport actually closes.
        let (client1, server1) = tokio::io::duplex(4096);
        let stub1 = tokio::spawn(async move { serve_handshake(server1).await });
        let (r1, w1) = split(client1);
        connector
            .connect_with_io(r1, w1, Duration::from_secs(1))
            .await
            .unwrap();
        let first_session = stub1.await.unwrap();
        connector.dispose().await;
        assert_eq!(connector.state(), ConnectionState::Disconnected);

        // Second session over a fresh transport.
        let (client2, server2) = tokio::io::duplex(4096);
        let stub2 = tokio::spawn(async move {
            let (mut reader, mut writer, mut codec) = serve_handshake(server2).await;
            let req = read_frame(&mut reader, &mut codec).await.unwrap();
            write_json(
                &mut writer,
                json!({ "jsonrpc": "2.0", "id": req["id"], "result": "alive" }),
            )
            .await;
            let _ = read_frame(&mut reader, &mut codec).await;
        });
        let (r2, w2) = split(client2);
        connector
            .connect_with_io(r2, w2, Duration::from_secs(1))
            .await
            .unwrap();

        // The first session's transport dies only now. Its reader hits EOF
        // and must not tear down the live session.
        drop(first_session);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(connector.state(), ConnectionState::Ready);
        let result = connector
            .send_request("test/alive", None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result, json!("alive"));

        let exits = bus
            .history()
            .into_iter()
            .filter(|e| e.name == "protocol.server.exit")
            .count();
        assert_eq!(exits, 0);
        stub2.abort();
    }

    #[tokio::test]
    async fn test_failed_tool_refresh_tears_down_connection() {
        let bus = EventBus::new(100);
        let connector = test_connector(&bus);
        let (client, server) = tokio::io::duplex(4096);

        let stub = tokio::spawn(async move {
            let (mut reader, mut writer) = split(server);
            let mut codec = FrameCodec::new();

            let init = read_frame(&mut reader, &mut codec).await.unwrap();
            write_json(
                &mut writer,
                json!({
                    "jsonrpc": "2.0",
                    "id": init["id"],
                    "result": {
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": {},
                        "serverInfo": { "name": "stub", "version": "0" },
                    },
                }),
            )
            .await;
            let _initialized = read_frame(&mut reader, &mut codec).await.unwrap();

            let list = read_frame(&mut reader, &mut codec).await.unwrap();
            write_json(
                &mut writer,
                json!({
                    "jsonrpc": "2.0",
                    "id": list["id"],
                    "error": { "code": -32603, "message": "listing broke" },
                }),
            )
            .await;
            let _ = read_frame(&mut reader, &mut codec).await;
        });

        let (client_r, client_w) = split(client);
        let err = connector
            .connect_with_io(client_r, client_w, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
        assert_eq!(connector.state(), ConnectionState::Disconnected);
        stub.abort();
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let bus = EventBus::new(100);
        let connector = test_connector(&bus);
        connector.dispose().await;
        connector.dispose().await;
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }
}
