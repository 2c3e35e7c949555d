//! Duplex message transport to the conversation service
//!
//! A [`Connector`] opens a connection and hands back a [`TransportHandle`]:
//! a cloneable [`Transport`] for outbound frames plus the ordered stream of
//! inbound [`TransportEvent`]s. The WebSocket implementation runs one pump
//! task per connection that owns the socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::protocol::ClientMessage;
use crate::{Error, Result};

/// Outbound frames buffered per connection
pub const OUTBOUND_CAPACITY: usize = 64;

/// Inbound frames buffered per connection
pub const INBOUND_CAPACITY: usize = 256;

/// Something that happened on the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text frame
    Message(String),
    /// The connection closed cleanly
    Closed {
        /// Close reason, if the remote gave one
        reason: Option<String>,
    },
    /// The connection broke
    Failed(String),
}

/// Outbound half of an open connection
#[derive(Clone)]
pub struct Transport {
    outbound: mpsc::Sender<String>,
    open: Arc<AtomicBool>,
    close: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Transport {
    fn new(outbound: mpsc::Sender<String>, close: oneshot::Sender<()>) -> Self {
        Self {
            outbound,
            open: Arc::new(AtomicBool::new(true)),
            close: Arc::new(Mutex::new(Some(close))),
        }
    }

    /// Whether frames can currently be sent
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    /// Send a media frame without waiting
    ///
    /// Dropped when the connection is closed or the outbound buffer is full.
    /// Returns whether the frame was accepted.
    pub fn send_media(&self, message: &ClientMessage) -> bool {
        if !self.is_open() {
            tracing::trace!("media frame dropped, transport closed");
            return false;
        }

        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize media frame");
                return false;
            }
        };

        match self.outbound.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("media frame dropped, outbound buffer full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.open.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Send a control frame (setup, tool response), waiting for buffer space
    ///
    /// # Errors
    ///
    /// Returns error if the connection is closed
    pub async fn send(&self, message: &ClientMessage) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(Error::Transport("connection is closed".to_string()));
        }

        let text = message.to_json()?;
        self.outbound.send(text).await.map_err(|_| {
            self.open.store(false, Ordering::Release);
            Error::Transport("connection is closed".to_string())
        })
    }

    /// Close the connection without waiting for acknowledgment
    ///
    /// Idempotent.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        if let Some(close) = self.close.lock().take() {
            let _ = close.send(());
            tracing::debug!("transport close requested");
        }
    }
}

/// An open connection
#[derive(Debug)]
pub struct TransportHandle {
    /// Outbound half
    pub transport: Transport,
    /// Inbound events in arrival order
    pub events: mpsc::Receiver<TransportEvent>,
}

/// The far side of a [`channel`] pair
///
/// Plays the remote service: reads what the local side sent and injects
/// inbound events.
#[derive(Debug)]
pub struct RemoteEnd {
    /// Frames sent by the local side
    pub sent: mpsc::Receiver<String>,
    /// Inject inbound events
    pub inbound: mpsc::Sender<TransportEvent>,
    /// Fires when the local side closes
    pub closed: oneshot::Receiver<()>,
}

/// In-process transport pair
///
/// Used by custom connectors and for driving a session without a network.
#[must_use]
pub fn channel(capacity: usize) -> (TransportHandle, RemoteEnd) {
    let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
    let (in_tx, in_rx) = mpsc::channel(capacity.max(1));
    let (close_tx, close_rx) = oneshot::channel();

    (
        TransportHandle {
            transport: Transport::new(out_tx, close_tx),
            events: in_rx,
        },
        RemoteEnd {
            sent: out_rx,
            inbound: in_tx,
            closed: close_rx,
        },
    )
}

/// Opens connections to the remote service
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be established
    async fn connect(&self, url: &Url) -> Result<TransportHandle>;
}

/// WebSocket connector
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<TransportHandle> {
        tracing::debug!(host = url.host_str().unwrap_or_default(), "connecting websocket");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("websocket connect failed: {e}")))?;

        tracing::info!("websocket connected");

        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(INBOUND_CAPACITY);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        let transport = Transport::new(out_tx, close_tx);
        let open = Arc::clone(&transport.open);

        tokio::spawn(async move {
            let outcome = loop {
                tokio::select! {
                    _ = &mut close_rx => {
                        let _ = sink.send(Message::Close(None)).await;
                        tracing::debug!("websocket closed locally");
                        break None;
                    }

                    Some(text) = out_rx.recv() => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            break Some(TransportEvent::Failed(format!("send failed: {e}")));
                        }
                    }

                    msg = stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let event = TransportEvent::Message(text.to_string());
                                if in_tx.send(event).await.is_err() {
                                    break None;
                                }
                            }
                            Some(Ok(Message::Binary(data))) => {
                                match String::from_utf8(data.to_vec()) {
                                    Ok(text) => {
                                        let event = TransportEvent::Message(text);
                                        if in_tx.send(event).await.is_err() {
                                            break None;
                                        }
                                    }
                                    Err(_) => {
                                        let len = data.len();
                                        tracing::warn!(len, "non-utf8 binary frame dropped");
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = sink.send(Message::Pong(data)).await {
                                    tracing::warn!(error = %e, "failed to send pong");
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                let reason = frame
                                    .map(|f| f.reason.to_string())
                                    .filter(|r| !r.is_empty());
                                tracing::info!(
                                    reason = reason.as_deref().unwrap_or(""),
                                    "websocket closed by remote"
                                );
                                break Some(TransportEvent::Closed { reason });
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                break Some(TransportEvent::Failed(e.to_string()));
                            }
                            None => break Some(TransportEvent::Closed { reason: None }),
                        }
                    }
                }
            };

            open.store(false, Ordering::Release);
            if let Some(event) = outcome {
                let _ = in_tx.send(event).await;
            }
        });

        Ok(TransportHandle {
            transport,
            events: in_rx,
        })
    }
}
