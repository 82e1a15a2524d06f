//! Common test utilities for evmux-client integration tests
//!
//! Provides a scriptable mock `eth_subscribe` server and small helpers for
//! testing client behavior without a real node.

#![allow(dead_code)]

use evmux_client::{ClientBuilder, EvmuxClient, FixedDelay};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

enum Command {
    Send(String),
    Close,
}

#[derive(Default)]
struct ServerState {
    physical_ids: VecDeque<String>,
    generated: u64,
    rejected: HashSet<String>,
    received: Vec<Value>,
    connections: Vec<mpsc::UnboundedSender<Command>>,
    accepted: usize,
    hold_confirmations: bool,
    held: Vec<(mpsc::UnboundedSender<Command>, String)>,
}

/// Mock `eth_subscribe` WebSocket server
///
/// - answers `eth_subscribe` with queued or generated physical ids
/// - answers `eth_subscribe` for rejected topics with an error object
/// - answers `eth_unsubscribe` with `true`
/// - records every request it receives
/// - can push notifications to, or forcibly close, every live connection
///   while the listener keeps accepting
pub struct MockEthServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    accept_task: Option<JoinHandle<()>>,
}

impl MockEthServer {
    /// Start a server on an ephemeral port
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(ServerState::default()));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        if let Ok((stream, _)) = accepted {
                            tokio::spawn(serve_connection(stream, Arc::clone(&accept_state)));
                        }
                    }
                }
            }
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            accept_task: Some(accept_task),
        }
    }

    /// Get the WebSocket URL for connecting to this server
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Use these physical ids, in order, for the next confirmations
    pub fn queue_physical_ids(&self, ids: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.physical_ids.extend(ids.iter().map(|id| id.to_string()));
    }

    /// Answer `eth_subscribe` for `topic` with an error
    pub fn reject(&self, topic: &str) {
        self.state.lock().unwrap().rejected.insert(topic.to_string());
    }

    /// Stop answering `eth_subscribe` until [`release_confirmations`]
    ///
    /// [`release_confirmations`]: MockEthServer::release_confirmations
    pub fn hold_confirmations(&self) {
        self.state.lock().unwrap().hold_confirmations = true;
    }

    /// Send every held confirmation and answer normally from now on
    pub fn release_confirmations(&self) {
        let mut state = self.state.lock().unwrap();
        state.hold_confirmations = false;
        for (connection, reply) in state.held.drain(..) {
            let _ = connection.send(Command::Send(reply));
        }
    }

    /// Push an `eth_subscription` notification on every live connection
    pub fn push(&self, physical_id: &str, result: Value) {
        let frame = json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {"subscription": physical_id, "result": result}
        })
        .to_string();
        self.send_raw(&frame);
    }

    /// Send an arbitrary text frame on every live connection
    pub fn send_raw(&self, frame: &str) {
        let state = self.state.lock().unwrap();
        for connection in &state.connections {
            let _ = connection.send(Command::Send(frame.to_string()));
        }
    }

    /// Close every live connection; the listener keeps accepting
    pub fn drop_connections(&self) {
        let mut state = self.state.lock().unwrap();
        for connection in state.connections.drain(..) {
            let _ = connection.send(Command::Close);
        }
    }

    /// Every received request with the given method, in arrival order
    pub fn received(&self, method: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .received
            .iter()
            .filter(|request| request["method"] == method)
            .cloned()
            .collect()
    }

    /// Wait until at least `count` requests with `method` arrived
    pub async fn wait_for_requests(&self, method: &str, count: usize) -> Vec<Value> {
        eventually(|| self.received(method).len() >= count).await;
        self.received(method)
    }

    /// Connections accepted so far
    pub fn accepted_connections(&self) -> usize {
        self.state.lock().unwrap().accepted
    }

    /// Connections still open
    pub fn live_connections(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .connections
            .iter()
            .filter(|connection| !connection.is_closed())
            .count()
    }

    /// Stop listening and close every connection
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        self.drop_connections();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn serve_connection(stream: TcpStream, state: Arc<Mutex<ServerState>>) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    {
        let mut state = state.lock().unwrap();
        state.accepted += 1;
        state.connections.push(tx.clone());
    }

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Send(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = answer(&state, &tx, &text) {
                        if write.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
}

fn answer(
    state: &Mutex<ServerState>,
    connection: &mpsc::UnboundedSender<Command>,
    text: &str,
) -> Option<String> {
    let request: Value = serde_json::from_str(text).ok()?;
    let mut state = state.lock().unwrap();
    state.received.push(request.clone());
    let id = request["id"].clone();

    match request["method"].as_str() {
        Some("eth_subscribe") => {
            let topic = request["params"][0].as_str().unwrap_or_default().to_string();
            if state.rejected.contains(&topic) {
                return Some(mock_error_response(
                    id,
                    -32602,
                    &format!("unsupported subscription type {}", topic),
                ));
            }

            let physical_id = match state.physical_ids.pop_front() {
                Some(id) => id,
                None => {
                    state.generated += 1;
                    format!("0x{:032x}", state.generated)
                }
            };
            let reply = mock_response(id, json!(physical_id));
            if state.hold_confirmations {
                state.held.push((connection.clone(), reply));
                None
            } else {
                Some(reply)
            }
        }
        Some("eth_unsubscribe") => Some(mock_response(id, json!(true))),
        _ => Some(mock_error_response(id, -32601, "Method not found")),
    }
}

/// Helper to create a mock JSON-RPC response
pub fn mock_response(id: Value, result: Value) -> String {
    json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()
}

/// Helper to create a mock JSON-RPC error response
pub fn mock_error_response(id: Value, code: i32, message: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message}
    })
    .to_string()
}

/// Builder preset used by the tests: fast fixed-delay reconnect, no heartbeat
pub fn test_builder(url: &str) -> ClientBuilder {
    ClientBuilder::new(url)
        .with_reconnect(Box::new(
            FixedDelay::new(Duration::from_millis(50)).with_max_attempts(20),
        ))
        .without_heartbeat()
}

/// Connect a test client to `server`
pub async fn connect(server: &MockEthServer) -> EvmuxClient {
    test_builder(&server.url()).connect().await.unwrap()
}

/// Poll `condition` for up to five seconds
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

/// Records every payload a handler receives
#[derive(Clone, Default)]
pub struct Collected {
    values: Arc<Mutex<Vec<Value>>>,
}

impl Collected {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler that appends to this collection
    pub fn handler(&self) -> impl Fn(Value) -> futures::future::Ready<()> + Send + Sync + 'static {
        let values = Arc::clone(&self.values);
        move |payload| {
            values.lock().unwrap().push(payload);
            futures::future::ready(())
        }
    }

    pub fn values(&self) -> Vec<Value> {
        self.values.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.values.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_response_format() {
        let response = mock_response(json!(1), json!("0xabc"));
        assert!(response.contains("\"jsonrpc\":\"2.0\""));
        assert!(response.contains("\"id\":1"));
        assert!(response.contains("\"result\":\"0xabc\""));
    }

    #[test]
    fn test_mock_error_response_format() {
        let response = mock_error_response(json!(1), -32601, "Method not found");
        assert!(response.contains("\"error\""));
        assert!(response.contains("-32601"));
        assert!(response.contains("Method not found"));
    }
}
