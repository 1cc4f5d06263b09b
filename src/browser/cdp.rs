//! Chrome DevTools Protocol client over WebSocket.
//!
//! One client talks to one page target. Commands are correlated by id and
//! every command races a local timer, so no call can hang forever.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::browser::driver::ProtocolError;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type ListenerMap = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>;

pub struct CdpClient {
    ws_tx: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicU64,
    event_listeners: ListenerMap,
    command_timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connects to a page. `endpoint` is either a `ws://` debugger URL or the
    /// browser's `http://host:port` address, in which case the first page
    /// target listed by `/json/list` is used.
    pub async fn connect_endpoint(endpoint: &str, command_timeout: Duration) -> Result<Self, ProtocolError> {
        let ws_url = if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
            endpoint.to_string()
        } else {
            discover_page_ws_url(endpoint).await?
        };
        Self::connect(&ws_url, command_timeout).await
    }

    pub async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self, ProtocolError> {
        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| ProtocolError::Transport(format!("failed to connect to {ws_url}: {e}")))?;
        tracing::info!(url = %ws_url, "CDP connected");

        let (mut ws_sink, mut ws_read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let event_listeners: ListenerMap = Arc::new(Mutex::new(HashMap::new()));

        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    tracing::error!(error = %e, "CDP write failed");
                    break;
                }
            }
        });

        let pending_reader = pending.clone();
        let listeners_reader = event_listeners.clone();
        let reader_handle = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            tracing::debug!("CDP frame is not JSON, skipped");
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(Value::as_u64) {
                            if let Some(tx) = pending_reader.lock().await.remove(&id) {
                                let _ = tx.send(val);
                            }
                        } else if let Some(method) = val.get("method").and_then(Value::as_str) {
                            let listeners = listeners_reader.lock().await;
                            if let Some(senders) = listeners.get(method) {
                                let params = val.get("params").cloned().unwrap_or(Value::Null);
                                for tx in senders {
                                    let _ = tx.try_send(params.clone());
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::debug!("CDP socket closed by browser");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "CDP read failed");
                        break;
                    }
                    _ => {}
                }
            }
            // Fail whatever is still waiting instead of letting it time out.
            pending_reader.lock().await.clear();
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            command_timeout,
            reader_handle,
            writer_handle,
        })
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, ProtocolError> {
        self.send_command_with_timeout(method, params, self.command_timeout).await
    }

    pub async fn send_command_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ProtocolError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let msg = json!({ "id": id, "method": method, "params": params });

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.ws_tx.send(msg.to_string()).await {
            self.pending.lock().await.remove(&id);
            return Err(ProtocolError::Transport(format!("failed to send {method}: {e}")));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(ProtocolError::Remote {
                        code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                        message: error
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                            .to_string(),
                    })
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(ProtocolError::Transport(format!(
                "connection closed while waiting for {method}"
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ProtocolError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Subscribes to a CDP event such as `Page.loadEventFired`.
    pub async fn subscribe_event(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        self.event_listeners
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Drops listeners whose receivers have gone away.
    pub async fn prune_listeners(&self) {
        let mut listeners = self.event_listeners.lock().await;
        for senders in listeners.values_mut() {
            senders.retain(|tx| !tx.is_closed());
        }
        listeners.retain(|_, senders| !senders.is_empty());
    }

    pub async fn enable_domain(&self, domain: &str) -> Result<(), ProtocolError> {
        self.send_command(&format!("{domain}.enable"), json!({})).await?;
        Ok(())
    }

    /// `Runtime.evaluate` with exceptions surfaced as `ScriptException`.
    pub async fn evaluate_js(&self, expression: &str) -> Result<Value, ProtocolError> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("uncaught exception")
                .to_string();
            return Err(ProtocolError::ScriptException(message));
        }

        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

async fn discover_page_ws_url(endpoint: &str) -> Result<String, ProtocolError> {
    let base = url::Url::parse(endpoint)
        .map_err(|e| ProtocolError::Transport(format!("invalid CDP endpoint '{endpoint}': {e}")))?;
    let list_url = base
        .join("/json/list")
        .map_err(|e| ProtocolError::Transport(e.to_string()))?;

    let targets: Vec<Value> = reqwest::Client::new()
        .get(list_url.clone())
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map_err(|e| ProtocolError::Transport(format!("GET {list_url} failed: {e}")))?
        .json()
        .await
        .map_err(|e| ProtocolError::Malformed(format!("target list: {e}")))?;

    pick_page_target(&targets)
        .ok_or_else(|| ProtocolError::Transport(format!("no page target exposed at {endpoint}")))
}

fn pick_page_target(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t.get("type").and_then(Value::as_str) == Some("page"))
        .find_map(|t| t.get("webSocketDebuggerUrl").and_then(Value::as_str))
        .map(str::to_string)
}
