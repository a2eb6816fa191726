use crate::error::StreamError;
use crate::exchanges::adapter::EventSink;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Write half of a session socket, shareable with the renewal task
#[derive(Clone, Default)]
pub struct WsSender {
    inner: Arc<Mutex<Option<WsSink>>>,
}

impl WsSender {
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), StreamError> {
        self.send(Message::Text(text.into())).await
    }

    async fn send(&self, message: Message) -> Result<(), StreamError> {
        let mut guard = self.inner.lock().await;
        let sink = guard.as_mut().ok_or(StreamError::NotConnected)?;
        sink.send(message)
            .await
            .map_err(|e| StreamError::ConnectionError(e.to_string()))
    }

    async fn close(&self) {
        if let Some(mut sink) = self.inner.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!("Error closing websocket: {}", e);
            }
        }
    }
}

/// Socket, stop signal and renewal task of one private session.
///
/// `reset` arms the session, `close` stops it. A stopped session makes
/// `pump` return `Ok(())` until it is reset again.
pub struct WsSession {
    sender: WsSender,
    source: Mutex<Option<WsSource>>,
    stop_tx: watch::Sender<bool>,
    renewal: Mutex<Option<JoinHandle<()>>>,
}

impl Default for WsSession {
    fn default() -> Self {
        Self::new()
    }
}

impl WsSession {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            sender: WsSender::default(),
            source: Mutex::new(None),
            stop_tx,
            renewal: Mutex::new(None),
        }
    }

    pub fn sender(&self) -> WsSender {
        self.sender.clone()
    }

    pub fn reset(&self) {
        self.stop_tx.send_replace(false);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Whether a read half is attached. Only meaningful outside `pump`.
    pub async fn is_open(&self) -> bool {
        self.source.lock().await.is_some()
    }

    pub async fn open(&self, url: &str) -> Result<(), StreamError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| StreamError::ConnectionError(e.to_string()))?;
        let (sink, source) = ws.split();
        *self.sender.inner.lock().await = Some(sink);
        *self.source.lock().await = Some(source);
        debug!("Websocket opened: {}", url);
        Ok(())
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), StreamError> {
        self.sender.send_text(text).await
    }

    /// Wait for the next JSON text frame, used for login handshakes
    pub async fn recv_json(&self, wait: Duration) -> Result<Value, StreamError> {
        let mut guard = self.source.lock().await;
        let source = guard.as_mut().ok_or(StreamError::NotConnected)?;
        let deadline = Instant::now() + wait;
        loop {
            let next = timeout(deadline.saturating_duration_since(Instant::now()), source.next())
                .await
                .map_err(|_| StreamError::ProtocolError("timed out waiting for reply".to_string()))?;
            match next {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        return Ok(value);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(StreamError::Disconnected(format!("closed: {:?}", frame)))
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(StreamError::ConnectionError(e.to_string())),
                None => return Err(StreamError::Disconnected("stream ended".to_string())),
            }
        }
    }

    /// Forward JSON frames to `sink` until stopped or the socket fails.
    ///
    /// `control` inspects each frame first; returning an error ends the pump
    /// with it (expired listen key, login rejected).
    pub async fn pump<F>(&self, sink: &dyn EventSink, control: F) -> Result<(), StreamError>
    where
        F: Fn(&Value) -> Option<StreamError> + Send + Sync,
    {
        let mut stop_rx = self.stop_tx.subscribe();
        if *stop_rx.borrow() {
            return Ok(());
        }

        let mut guard = self.source.lock().await;
        let source = guard.as_mut().ok_or(StreamError::NotConnected)?;

        let result = loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break Ok(());
                    }
                }
                message = source.next() => match message {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(&text) {
                        Ok(value) => {
                            if let Some(err) = control(&value) {
                                break Err(err);
                            }
                            sink.on_event(value).await;
                        }
                        Err(_) => debug!("Ignoring non-JSON frame: {}", text),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = self.sender.send(Message::Pong(payload)).await {
                            break Err(e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break Err(StreamError::Disconnected(format!("closed: {:?}", frame)));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(StreamError::ConnectionError(e.to_string())),
                    None => break Err(StreamError::Disconnected("stream ended".to_string())),
                }
            }
        };

        *guard = None;
        result
    }

    /// Run `renew` every `period` until the session is closed.
    ///
    /// Replaces any renewal task from an earlier connect.
    pub async fn spawn_renewal<F, Fut>(&self, period: Duration, renew: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StreamError>> + Send + 'static,
    {
        let mut stop_rx = self.stop_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match renew().await {
                            Ok(()) => debug!("Session renewed"),
                            Err(e) => warn!("Session renewal failed, retrying next interval: {}", e),
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        if let Some(previous) = self.renewal.lock().await.replace(handle) {
            previous.abort();
        }
    }

    pub async fn close(&self) {
        self.stop_tx.send_replace(true);
        if let Some(handle) = self.renewal.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.sender.close().await;
    }
}
