//! Link transport abstraction shared by uplinks and downlinks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws;
use proto::GatewayError;
use tokio::sync::mpsc;

/// Direction of a link within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// Agent to gateway: synchronous echo/annotate channel.
    Uplink,
    /// Gateway to agent: driven on demand by triggers.
    Downlink,
}

impl std::fmt::Display for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkKind::Uplink => write!(f, "uplink"),
            LinkKind::Downlink => write!(f, "downlink"),
        }
    }
}

/// WebSocket data frame type. Replies go out with the type of the frame
/// they answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

/// One data frame. Binary payloads are carried as (lossy) UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    pub kind: FrameKind,
    pub payload: String,
}

impl LinkFrame {
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Text,
            payload: payload.into(),
        }
    }

    pub fn binary(payload: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Binary,
            payload: payload.into(),
        }
    }
}

/// A persistent, message-framed, bidirectional connection to one edge agent.
#[async_trait]
pub trait LinkSocket: Send + 'static {
    /// Waits for the next data frame. A closed connection is an error.
    async fn recv_frame(&mut self) -> Result<LinkFrame, GatewayError>;

    /// Writes one data frame.
    async fn send_frame(&mut self, frame: LinkFrame) -> Result<(), GatewayError>;

    /// Closes the connection. Errors are ignored.
    async fn close(&mut self);
}

#[async_trait]
impl LinkSocket for ws::WebSocket {
    async fn recv_frame(&mut self) -> Result<LinkFrame, GatewayError> {
        loop {
            match self.recv().await {
                Some(Ok(ws::Message::Text(text))) => return Ok(LinkFrame::text(text.as_str())),
                Some(Ok(ws::Message::Binary(bytes))) => {
                    return Ok(LinkFrame::binary(String::from_utf8_lossy(&bytes)));
                }
                Some(Ok(ws::Message::Close(_))) | None => {
                    return Err(GatewayError::Transport("link closed by peer".into()));
                }
                // ping/pong are answered by the websocket layer
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(GatewayError::Transport(e.to_string())),
            }
        }
    }

    async fn send_frame(&mut self, frame: LinkFrame) -> Result<(), GatewayError> {
        let message = match frame.kind {
            FrameKind::Text => ws::Message::Text(frame.payload.into()),
            FrameKind::Binary => ws::Message::Binary(frame.payload.into_bytes().into()),
        };
        self.send(message)
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.send(ws::Message::Close(None)).await;
    }
}

/// Reads one frame, bounded by `deadline` when set. Expiry is reported as
/// [`GatewayError::ReadTimeout`] and is handled like any transport fault.
pub(crate) async fn read_frame(
    socket: &mut dyn LinkSocket,
    deadline: Option<Duration>,
) -> Result<LinkFrame, GatewayError> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, socket.recv_frame())
            .await
            .map_err(|_| GatewayError::ReadTimeout(limit))?,
        None => socket.recv_frame().await,
    }
}

/// In-process link backed by tokio channels (for embedding and tests without sockets).
/// Every frame it delivers is a text frame.
pub struct MemoryLink {
    inbound: mpsc::Receiver<String>,
    outbound: mpsc::Sender<String>,
    closes: Arc<AtomicUsize>,
}

/// Agent-side end of a [`MemoryLink`].
pub struct MemoryPeer {
    inbound: mpsc::Receiver<String>,
    outbound: Option<mpsc::Sender<String>>,
    closes: Arc<AtomicUsize>,
}

/// Creates a connected gateway/agent link pair with bounded buffers.
pub fn memory_link(buffer: usize) -> (MemoryLink, MemoryPeer) {
    let (to_gateway, gateway_rx) = mpsc::channel(buffer);
    let (to_peer, peer_rx) = mpsc::channel(buffer);
    let closes = Arc::new(AtomicUsize::new(0));
    (
        MemoryLink {
            inbound: gateway_rx,
            outbound: to_peer,
            closes: closes.clone(),
        },
        MemoryPeer {
            inbound: peer_rx,
            outbound: Some(to_gateway),
            closes,
        },
    )
}

#[async_trait]
impl LinkSocket for MemoryLink {
    async fn recv_frame(&mut self) -> Result<LinkFrame, GatewayError> {
        self.inbound
            .recv()
            .await
            .map(LinkFrame::text)
            .ok_or_else(|| GatewayError::Transport("memory peer hung up".into()))
    }

    async fn send_frame(&mut self, frame: LinkFrame) -> Result<(), GatewayError> {
        self.outbound
            .send(frame.payload)
            .await
            .map_err(|_| GatewayError::Transport("memory peer hung up".into()))
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inbound.close();
    }
}

impl MemoryPeer {
    /// Sends a frame to the gateway. Returns `false` once the gateway side is gone.
    pub async fn send(&self, frame: impl Into<String>) -> bool {
        match &self.outbound {
            Some(tx) => tx.send(frame.into()).await.is_ok(),
            None => false,
        }
    }

    /// Receives the next frame written by the gateway, `None` once the link is dropped.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Simulates the agent dropping the connection.
    pub fn hang_up(&mut self) {
        self.outbound = None;
    }

    /// How many times the gateway side closed this link.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}
