//! A shared WebSocket connection with type-tag request correlation
//!
//! Any number of requests can wait on one connection. Each registers a
//! one-shot listener for the `type` of reply it expects; the reader task hands
//! every inbound JSON message to the oldest listener waiting for that type and
//! ignores everything else.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use tapayoka_proto::ws::Envelope;

use crate::{Error, Result};

struct Listener {
    expected: &'static str,
    tx: oneshot::Sender<Value>,
}

type Listeners = Arc<Mutex<BTreeMap<u64, Listener>>>;

fn lock(listeners: &Mutex<BTreeMap<u64, Listener>>) -> MutexGuard<'_, BTreeMap<u64, Listener>> {
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a listener on every exit path of a request, including cancellation
struct ListenerGuard<'a> {
    id: u64,
    listeners: &'a Mutex<BTreeMap<u64, Listener>>,
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        lock(self.listeners).remove(&self.id);
    }
}

pub struct Connection {
    endpoint: String,
    outbound: mpsc::UnboundedSender<Message>,
    listeners: Listeners,
    next_listener: AtomicU64,
    open: Arc<AtomicBool>,
}

impl Connection {
    /// Open a connection; returns once the WebSocket handshake completed
    pub async fn open(endpoint: &str) -> Result<Self> {
        let (ws, _) = connect_async(endpoint).await?;
        let (mut sink, mut stream) = ws.split();
        tracing::info!(endpoint, "websocket connected");

        let open = Arc::new(AtomicBool::new(true));
        let listeners: Listeners = Arc::new(Mutex::new(BTreeMap::new()));
        let (outbound, mut rx) = mpsc::unbounded_channel::<Message>();

        let writer_open = open.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::warn!("websocket send failed: {e}");
                    writer_open.store(false, Ordering::SeqCst);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_open = open.clone();
        let reader_listeners = listeners.clone();
        let reader_endpoint = endpoint.to_string();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => dispatch(&reader_listeners, text.as_str()),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(
                            endpoint = %reader_endpoint,
                            "websocket receive failed: {e}"
                        );
                        break;
                    }
                }
            }
            reader_open.store(false, Ordering::SeqCst);
            // Dropping the senders fails every request still waiting
            lock(&reader_listeners).clear();
            tracing::info!(endpoint = %reader_endpoint, "websocket closed");
        });

        Ok(Self {
            endpoint: endpoint.to_string(),
            outbound,
            listeners,
            next_listener: AtomicU64::new(0),
            open,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    /// Requests currently waiting for a reply
    pub fn pending_requests(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Send `request` and wait for the first message tagged `expected`
    ///
    /// Messages that are not JSON or carry another tag are skipped. Fails with
    /// [`Error::Timeout`] if nothing matches within `timeout`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        request: &Envelope,
        expected: &'static str,
        timeout: Duration,
    ) -> Result<T> {
        let text = serde_json::to_string(request)?;

        let (tx, rx) = oneshot::channel();
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).insert(id, Listener { expected, tx });
        let _guard = ListenerGuard {
            id,
            listeners: &self.listeners,
        };

        self.outbound
            .send(Message::text(text))
            .map_err(|_| Error::ConnectionClosed)?;

        let data = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(data)) => data,
            Ok(Err(_)) => return Err(Error::ConnectionClosed),
            Err(_) => return Err(Error::Timeout(timeout)),
        };

        Ok(serde_json::from_value(data)?)
    }
}

fn dispatch(listeners: &Mutex<BTreeMap<u64, Listener>>, text: &str) {
    let mut message: Value = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!("ignoring non-JSON message: {e}");
            return;
        }
    };
    let Some(kind) = message.get("type").and_then(Value::as_str) else {
        tracing::debug!("ignoring message without type");
        return;
    };

    let mut listeners = lock(listeners);
    let Some(id) = listeners
        .iter()
        .find(|(_, listener)| listener.expected == kind)
        .map(|(id, _)| *id)
    else {
        tracing::debug!(kind, "ignoring message nobody waits for");
        return;
    };

    if let Some(listener) = listeners.remove(&id) {
        let data = message
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null);
        let _ = listener.tx.send(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Receivers = Vec<oneshot::Receiver<Value>>;

    fn listeners_with(expected: &[&'static str]) -> (Mutex<BTreeMap<u64, Listener>>, Receivers) {
        let mut map = BTreeMap::new();
        let mut receivers = Vec::new();
        for (i, &expected) in expected.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            map.insert(i as u64, Listener { expected, tx });
            receivers.push(rx);
        }
        (Mutex::new(map), receivers)
    }

    #[test]
    fn dispatch_matches_by_type() {
        let (listeners, mut receivers) = listeners_with(&["device_info", "response"]);

        dispatch(&listeners, "not json");
        dispatch(&listeners, r#"{"type":"heartbeat"}"#);
        dispatch(&listeners, r#"{"data":{"status":"OK"}}"#);
        assert_eq!(lock(&listeners).len(), 2);

        dispatch(&listeners, r#"{"type":"response","data":{"status":"OK"}}"#);
        assert_eq!(lock(&listeners).len(), 1);
        assert_eq!(receivers[1].try_recv().unwrap(), serde_json::json!({"status": "OK"}));
        assert!(receivers[0].try_recv().is_err());
    }

    #[test]
    fn dispatch_resolves_oldest_listener_once() {
        let (listeners, mut receivers) = listeners_with(&["response", "response"]);

        dispatch(&listeners, r#"{"type":"response","data":1}"#);
        assert_eq!(receivers[0].try_recv().unwrap(), serde_json::json!(1));
        assert!(receivers[1].try_recv().is_err());
        assert_eq!(lock(&listeners).len(), 1);
    }

    #[test]
    fn guard_detaches_listener() {
        let (listeners, _receivers) = listeners_with(&["device_info"]);
        {
            let _guard = ListenerGuard { id: 0, listeners: &listeners };
        }
        assert!(lock(&listeners).is_empty());
    }
}
