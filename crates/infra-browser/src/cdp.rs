//! Chrome DevTools Protocol client over WebSocket.
//!
//! One client per endpoint: the browser endpoint for target management, and
//! one per tab for page work. A writer task owns the sink; a reader task
//! routes responses to the waiting caller by request id.

use citewatch_core::port::DriverError;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

pub struct CdpClient {
    endpoint: String,
    ws_tx: mpsc::Sender<String>,
    pending: Pending,
    next_id: AtomicU64,
    /// Set by the reader once the socket is gone
    closed: Arc<AtomicBool>,
    command_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl CdpClient {
    pub async fn connect(ws_url: &str) -> Result<Self, DriverError> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| DriverError::Connection(format!("{}: {}", ws_url, e)))?;
        let (mut ws_sink, mut ws_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    warn!(error = %e, "CDP write failed");
                    break;
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        let reader_closed = Arc::clone(&closed);
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let Ok(value) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        // Events carry no id and are not used
                        if let Some(id) = value.get("id").and_then(Value::as_u64) {
                            if let Some(tx) = reader_pending.lock().await.remove(&id) {
                                let _ = tx.send(value);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP socket closed by browser");
                        break;
                    }
                    Err(e) => {
                        debug!(error = %e, "CDP read failed");
                        break;
                    }
                    _ => {}
                }
            }
            reader_closed.store(true, Ordering::SeqCst);
            // Dropping the senders fails every outstanding command
            reader_pending.lock().await.clear();
        });

        Ok(Self {
            endpoint: ws_url.to_string(),
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            reader,
            writer,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a command and wait for its `result`
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, DriverError> {
        if self.is_closed() {
            return Err(DriverError::TabClosed(self.endpoint.clone()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let msg = json!({"id": id, "method": method, "params": params});

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.ws_tx.send(msg.to_string()).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(DriverError::Connection(format!(
                "{}: writer stopped",
                self.endpoint
            )));
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => response_result(method, response),
            Ok(Err(_)) => Err(DriverError::TabClosed(self.endpoint.clone())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(DriverError::Timeout(format!(
                    "{} after {}s",
                    method,
                    self.command_timeout.as_secs()
                )))
            }
        }
    }

    /// Enable a domain such as "Page" or "Runtime"
    pub async fn enable_domain(&self, domain: &str) -> Result<(), DriverError> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await?;
        Ok(())
    }

    /// Evaluate an expression in the page and return its JSON value
    pub async fn evaluate(&self, expression: &str) -> Result<Value, DriverError> {
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
        evaluation_value(result)
    }

    /// keyDown + keyUp for a named key on the focused element
    pub async fn press_key(&self, key: &str, code: &str, key_code: u32) -> Result<(), DriverError> {
        let typed = if key == "Enter" { "\r" } else { "" };
        for (event_type, text) in [("keyDown", typed), ("keyUp", "")] {
            self.send_command(
                "Input.dispatchKeyEvent",
                json!({
                    "type": event_type,
                    "key": key,
                    "code": code,
                    "windowsVirtualKeyCode": key_code,
                    "nativeVirtualKeyCode": key_code,
                    "text": text,
                }),
            )
            .await?;
        }
        Ok(())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

fn response_result(method: &str, response: Value) -> Result<Value, DriverError> {
    if let Some(error) = response.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(DriverError::Protocol(format!("{}: {}", method, message)));
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

/// Unwrap a Runtime.evaluate result into the returned value
fn evaluation_value(result: Value) -> Result<Value, DriverError> {
    if let Some(details) = result.get("exceptionDetails") {
        let message = details
            .pointer("/exception/description")
            .or_else(|| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("exception thrown");
        return Err(DriverError::Script(message.to_string()));
    }
    Ok(result
        .pointer("/result/value")
        .cloned()
        .unwrap_or(Value::Null))
}
