//! Duplex text-frame links to the relay.
//!
//! A [`Link`] is a pair of channels: frames queued on `outbound` are written
//! to the relay, and everything the relay sends (plus close and failure
//! notifications) arrives on `inbound`. Dropping the link stops its pump
//! tasks, so each connect attempt starts from a fresh link.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;

/// Capacity of the channels between the session and the pump tasks.
pub const LINK_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Frame(String),
    /// The relay closed the connection.
    Closed,
    /// The connection broke.
    Failed(String),
}

pub struct Link {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<LinkEvent>,
    pumps: PumpGuard,
}

impl Link {
    /// Split into channels plus the guard that keeps the pumps running.
    pub fn into_parts(self) -> (mpsc::Sender<String>, mpsc::Receiver<LinkEvent>, PumpGuard) {
        (self.outbound, self.inbound, self.pumps)
    }
}

/// Aborts the link's pump tasks on drop.
#[derive(Default)]
pub struct PumpGuard(Vec<JoinHandle<()>>);

impl Drop for PumpGuard {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Opens links to the relay.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Link, TransportError>;
}

/// Connects to the relay over WebSocket (TLS for `wss://` URLs).
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        tracing::debug!(url = %self.url, "websocket connected");

        let (ws_sender, ws_receiver) = stream.split();
        let (out_tx, out_rx) = mpsc::channel(LINK_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(LINK_CAPACITY);

        let send_handle = tokio::spawn(send_loop(ws_sender, out_rx, in_tx.clone()));
        let recv_handle = tokio::spawn(recv_loop(ws_receiver, in_tx));

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
            pumps: PumpGuard(vec![send_handle, recv_handle]),
        })
    }
}

async fn send_loop<S>(
    mut ws_sender: S,
    mut rx: mpsc::Receiver<String>,
    events: mpsc::Sender<LinkEvent>,
) where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    while let Some(text) = rx.recv().await {
        if let Err(e) = ws_sender.send(Message::Text(text)).await {
            let e = TransportError::from(e);
            tracing::debug!(error = %e, "websocket send error");
            let _ = events.send(LinkEvent::Failed(e.to_string())).await;
            return;
        }
    }
    // Outbound side dropped: the session let go of this link.
    let _ = ws_sender.send(Message::Close(None)).await;
}

async fn recv_loop<S>(mut ws_receiver: S, events: mpsc::Sender<LinkEvent>)
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(result) = ws_receiver.next().await {
        let event = match result {
            Ok(Message::Text(text)) => LinkEvent::Frame(text),
            Ok(Message::Close(_)) => {
                let _ = events.send(LinkEvent::Closed).await;
                return;
            }
            Ok(Message::Binary(_)) => {
                tracing::debug!("ignoring binary frame");
                continue;
            }
            // tungstenite answers pings itself
            Ok(_) => continue,
            Err(e) => {
                let e = TransportError::from(e);
                tracing::debug!(error = %e, "websocket receive error");
                let _ = events.send(LinkEvent::Failed(e.to_string())).await;
                return;
            }
        };
        if events.send(event).await.is_err() {
            return;
        }
    }
    let _ = events.send(LinkEvent::Closed).await;
}

/// The far end of an in-memory link, standing in for the relay.
pub struct MemoryPeer {
    sent: mpsc::Receiver<String>,
    deliver: mpsc::Sender<LinkEvent>,
}

impl MemoryPeer {
    /// Next frame the client wrote, or `None` once the client dropped the link.
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    /// A frame the client wrote, if one is already queued.
    pub fn try_recv_frame(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }

    pub async fn send_frame(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.deliver
            .send(LinkEvent::Frame(text.into()))
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub async fn close(&self) {
        let _ = self.deliver.send(LinkEvent::Closed).await;
    }

    pub async fn fail(&self, reason: &str) {
        let _ = self.deliver.send(LinkEvent::Failed(reason.to_string())).await;
    }
}

/// A connected in-memory link and its far end.
pub fn memory_pair(capacity: usize) -> (Link, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::channel(capacity);
    let (in_tx, in_rx) = mpsc::channel(capacity);
    (
        Link {
            outbound: out_tx,
            inbound: in_rx,
            pumps: PumpGuard::default(),
        },
        MemoryPeer {
            sent: out_rx,
            deliver: in_tx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pair_carries_frames_both_ways() {
        let (link, mut peer) = memory_pair(8);
        let (outbound, mut inbound, _guard) = link.into_parts();

        outbound.send("to relay".into()).await.unwrap();
        assert_eq!(peer.recv_frame().await.as_deref(), Some("to relay"));

        peer.send_frame("to client").await.unwrap();
        assert_eq!(
            inbound.recv().await,
            Some(LinkEvent::Frame("to client".into()))
        );

        peer.close().await;
        assert_eq!(inbound.recv().await, Some(LinkEvent::Closed));
    }

    #[tokio::test]
    async fn dropping_link_is_visible_to_peer() {
        let (link, mut peer) = memory_pair(8);
        drop(link);
        assert!(peer.recv_frame().await.is_none());
        assert!(peer.send_frame("late").await.is_err());
    }

    #[tokio::test]
    async fn pump_guard_aborts_tasks() {
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });
        drop(PumpGuard(vec![handle]));
        assert!(alive_rx.await.is_err());
    }

    #[tokio::test]
    async fn websocket_connector_reports_unreachable_relay() {
        let connector = WebSocketConnector::new("ws://127.0.0.1:1");
        assert!(matches!(
            connector.connect().await,
            Err(TransportError::ConnectionFailed(_))
        ));
    }
}
