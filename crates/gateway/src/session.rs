//! Session registry: pairs each edge node's uplink and downlink.
//!
//! A session exists while at least one of its links is registered. A fault
//! on either current link removes the whole session and closes the other
//! half; a link that was replaced by a newer one is detached and its faults
//! only end its own task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use proto::{GatewayError, Message, NodeId};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::bridge::{self, Teardown};
use crate::link::{LinkKind, LinkSocket};

const QUEUE_CAPACITY: usize = 64;

pub(crate) type SharedSocket = Arc<Mutex<Box<dyn LinkSocket>>>;

/// Result of one downlink round trip.
#[derive(Debug, Clone)]
pub struct DownlinkReply {
    /// Id of the request that was pushed.
    pub request_id: u64,
    /// Decoded reply frame.
    pub message: Message,
    /// Reply frame exactly as received.
    pub raw: String,
}

struct UplinkHandle {
    link_id: u64,
    teardown: Arc<Teardown>,
}

struct DownlinkHandle {
    link_id: u64,
    socket: SharedSocket,
    teardown: Arc<Teardown>,
}

struct Session {
    uplink: Option<UplinkHandle>,
    downlink: Option<DownlinkHandle>,
    uplink_queue: broadcast::Sender<Message>,
    downlink_queue: broadcast::Sender<Message>,
}

impl Session {
    fn new() -> Self {
        let (uplink_queue, _) = broadcast::channel(QUEUE_CAPACITY);
        let (downlink_queue, _) = broadcast::channel(QUEUE_CAPACITY);
        Self {
            uplink: None,
            downlink: None,
            uplink_queue,
            downlink_queue,
        }
    }

    fn holds(&self, kind: LinkKind, link_id: u64) -> bool {
        match kind {
            LinkKind::Uplink => self.uplink.as_ref().is_some_and(|l| l.link_id == link_id),
            LinkKind::Downlink => self.downlink.as_ref().is_some_and(|l| l.link_id == link_id),
        }
    }

    fn queue(&self, kind: LinkKind) -> &broadcast::Sender<Message> {
        match kind {
            LinkKind::Uplink => &self.uplink_queue,
            LinkKind::Downlink => &self.downlink_queue,
        }
    }

    /// Closes both halves. Dropping `self` releases the queues.
    fn close(self) {
        if let Some(uplink) = self.uplink {
            uplink.teardown.fire();
        }
        if let Some(downlink) = self.downlink {
            downlink.teardown.fire();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    downlink.socket.lock().await.close().await;
                });
            }
        }
    }
}

/// Registry of live sessions keyed by edge node id.
pub struct SessionRegistry {
    sessions: DashMap<NodeId, Session>,
    read_timeout: Option<Duration>,
    link_counter: AtomicU64,
}

impl SessionRegistry {
    /// Creates an empty registry. `read_timeout` bounds every link read.
    pub fn new(read_timeout: Option<Duration>) -> Self {
        Self {
            sessions: DashMap::new(),
            read_timeout,
            link_counter: AtomicU64::new(0),
        }
    }

    /// Registers (or replaces) the uplink for `node_id` and starts its reader.
    ///
    /// Returns the id assigned to the new link.
    pub fn establish_uplink(self: &Arc<Self>, node_id: NodeId, socket: impl LinkSocket) -> u64 {
        let link_id = self.next_link_id();
        let teardown = Arc::new(Teardown::default());
        {
            let mut session = self
                .sessions
                .entry(node_id.clone())
                .or_insert_with(Session::new);
            if session.uplink.is_some() {
                debug!(node_id = %node_id, "Replacing existing uplink");
            }
            session.uplink = Some(UplinkHandle {
                link_id,
                teardown: teardown.clone(),
            });
        }
        info!(node_id = %node_id, link_id, "Uplink established");

        tokio::spawn(bridge::run_uplink(
            Arc::clone(self),
            node_id,
            link_id,
            Box::new(socket),
            teardown,
        ));
        link_id
    }

    /// Registers (or replaces) the downlink for `node_id`. No task is started;
    /// the link is driven by [`SessionRegistry::push`].
    pub fn establish_downlink(&self, node_id: NodeId, socket: impl LinkSocket) -> u64 {
        let link_id = self.next_link_id();
        let mut session = self
            .sessions
            .entry(node_id.clone())
            .or_insert_with(Session::new);
        if session.downlink.is_some() {
            debug!(node_id = %node_id, "Replacing existing downlink");
        }
        session.downlink = Some(DownlinkHandle {
            link_id,
            socket: Arc::new(Mutex::new(Box::new(socket))),
            teardown: Arc::new(Teardown::default()),
        });
        info!(node_id = %node_id, link_id, "Downlink established");
        link_id
    }

    /// Closes both links and forgets the session. Returns `false` when no
    /// session was registered.
    pub fn remove_session(&self, node_id: &NodeId) -> bool {
        match self.sessions.remove(node_id) {
            Some((_, session)) => {
                session.close();
                info!(node_id = %node_id, "Session removed");
                true
            }
            None => false,
        }
    }

    /// Sends one request on the downlink and waits for exactly one reply.
    ///
    /// Any failure tears the session down. A reply whose id differs from
    /// the request is still returned.
    pub async fn push(
        &self,
        node_id: &NodeId,
        body: impl Into<String>,
    ) -> Result<DownlinkReply, GatewayError> {
        let (link_id, socket, teardown) = {
            let session = self
                .sessions
                .get(node_id)
                .ok_or_else(|| GatewayError::SessionNotFound(node_id.to_string()))?;
            let downlink =
                session
                    .downlink
                    .as_ref()
                    .ok_or_else(|| GatewayError::LinkNotEstablished {
                        node_id: node_id.to_string(),
                        link: LinkKind::Downlink.to_string(),
                    })?;
            (
                downlink.link_id,
                downlink.socket.clone(),
                downlink.teardown.clone(),
            )
        };

        let request = Message::new(body);
        debug!(node_id = %node_id, id = request.id, "Pushing downlink request");
        match bridge::round_trip(&socket, &teardown, &request, self.read_timeout).await {
            Ok(reply) => {
                if reply.message.id != request.id {
                    warn!(
                        node_id = %node_id,
                        sent = request.id,
                        received = reply.message.id,
                        "Downlink reply id does not match request"
                    );
                }
                self.publish(node_id, LinkKind::Downlink, link_id, reply.message.clone());
                Ok(reply)
            }
            Err(e) => {
                self.fault(node_id, LinkKind::Downlink, link_id, &e);
                Err(e)
            }
        }
    }

    /// Subscribes to the delivery queue of one direction of a session.
    ///
    /// The receiver reports `Closed` once the session is removed.
    pub fn subscribe(
        &self,
        node_id: &NodeId,
        kind: LinkKind,
    ) -> Option<broadcast::Receiver<Message>> {
        self.sessions
            .get(node_id)
            .map(|session| session.queue(kind).subscribe())
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` when no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns `true` when a session is registered for `node_id`.
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.sessions.contains_key(node_id)
    }

    /// Returns `true` when the session for `node_id` has a link of `kind`.
    pub fn has_link(&self, node_id: &NodeId, kind: LinkKind) -> bool {
        self.sessions.get(node_id).is_some_and(|s| match kind {
            LinkKind::Uplink => s.uplink.is_some(),
            LinkKind::Downlink => s.downlink.is_some(),
        })
    }

    pub(crate) fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Tears the session down if `link_id` is still its current `kind` link.
    pub(crate) fn fault(&self, node_id: &NodeId, kind: LinkKind, link_id: u64, err: &GatewayError) {
        match self
            .sessions
            .remove_if(node_id, |_, session| session.holds(kind, link_id))
        {
            Some((_, session)) => {
                warn!(node_id = %node_id, link = %kind, error = %err, "Link fault, tearing down session");
                session.close();
            }
            None => {
                debug!(node_id = %node_id, link = %kind, link_id, error = %err, "Fault on detached link");
            }
        }
    }

    pub(crate) fn publish(&self, node_id: &NodeId, kind: LinkKind, link_id: u64, message: Message) {
        if let Some(session) = self.sessions.get(node_id)
            && session.holds(kind, link_id)
        {
            // no subscribers is fine
            let _ = session.queue(kind).send(message);
        }
    }

    fn next_link_id(&self) -> u64 {
        self.link_counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}
