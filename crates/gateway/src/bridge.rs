//! Per-link drivers: the uplink echo reader and the downlink round trip.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use proto::{GatewayError, Message, NodeId};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::link::{LinkFrame, LinkKind, LinkSocket, read_frame};
use crate::session::{DownlinkReply, SessionRegistry, SharedSocket};

/// Name written into the `reply` field of every message the gateway annotates.
pub const GATEWAY_STAMP: &str = "relay gateway";

/// One-shot teardown signal for a link. Once fired it stays fired, so a
/// task that starts waiting (or takes the socket) afterwards sees it too.
#[derive(Default)]
pub(crate) struct Teardown {
    fired: AtomicBool,
    notify: Notify,
}

impl Teardown {
    pub(crate) fn fire(&self) {
        self.fired.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        // the permit covers a waiter that checked the flag but is not yet registered
        self.notify.notify_one();
    }

    pub(crate) fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait(&self) {
        if self.is_fired() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Reads uplink frames until the link faults or the session is torn down.
///
/// Each decodable frame is stamped and written back on the same link, with
/// the frame type it arrived as. Undecodable frames are dropped. Any
/// read/write error closes the link and reports the fault to the registry.
pub(crate) async fn run_uplink(
    registry: Arc<SessionRegistry>,
    node_id: NodeId,
    link_id: u64,
    mut socket: Box<dyn LinkSocket>,
    teardown: Arc<Teardown>,
) {
    let deadline = registry.read_timeout();

    let fault = loop {
        let frame = tokio::select! {
            _ = teardown.wait() => None,
            frame = read_frame(&mut *socket, deadline) => Some(frame),
        };
        let Some(frame) = frame else {
            debug!(node_id = %node_id, link_id, "Uplink closed by session teardown");
            socket.close().await;
            return;
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => break e,
        };

        let mut message = match Message::decode(&frame.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(node_id = %node_id, error = %e, "Dropping malformed uplink frame");
                continue;
            }
        };
        message.stamp_reply(GATEWAY_STAMP);
        let reply = match message.encode() {
            Ok(payload) => LinkFrame {
                kind: frame.kind,
                payload,
            },
            Err(e) => {
                warn!(node_id = %node_id, error = %e, "Failed to encode uplink reply");
                continue;
            }
        };
        if let Err(e) = socket.send_frame(reply).await {
            break e;
        }

        debug!(node_id = %node_id, id = message.id, "Uplink message annotated");
        registry.publish(&node_id, LinkKind::Uplink, link_id, message);
    };

    socket.close().await;
    registry.fault(&node_id, LinkKind::Uplink, link_id, &fault);
}

/// Writes `request` on the downlink and performs exactly one read for the reply.
///
/// The socket lock is held for the whole exchange, so triggers on one
/// session are serialized. A trigger that gets the lock after teardown
/// fails without touching the socket.
pub(crate) async fn round_trip(
    socket: &SharedSocket,
    teardown: &Teardown,
    request: &Message,
    deadline: Option<Duration>,
) -> Result<DownlinkReply, GatewayError> {
    let frame = request.encode()?;
    let mut socket = socket.lock().await;
    if teardown.is_fired() {
        return Err(session_closed());
    }
    socket.send_frame(LinkFrame::text(frame)).await?;

    let raw = tokio::select! {
        _ = teardown.wait() => None,
        raw = read_frame(&mut **socket, deadline) => Some(raw),
    };
    let raw = raw.ok_or_else(session_closed)??.payload;

    let message = Message::decode(&raw)?;
    Ok(DownlinkReply {
        request_id: request.id,
        message,
        raw,
    })
}

fn session_closed() -> GatewayError {
    GatewayError::Transport("session closed".into())
}
