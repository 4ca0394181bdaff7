//! In-process transport
//!
//! Sessions are pairs of unbounded channels matched by an endpoint id
//! carried in the offer. Used by the registry and signaling tests, and by
//! anything else that wants to wire two registries together inside one
//! process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use super::{PendingSession, SessionEvent, SessionEvents, Transport, TransportSession};
use crate::error::TransportError;
use crate::protocol::ControllerMessage;

/// One half-duplex channel pair between an initiator and a responder.
///
/// The initiator sends on `fwd` and receives on `rev`; the responder the
/// other way around. Each receiver can be claimed exactly once.
struct Link {
    fwd_tx: Mutex<Option<UnboundedSender<ControllerMessage>>>,
    fwd_rx: Mutex<Option<UnboundedReceiver<ControllerMessage>>>,
    rev_tx: Mutex<Option<UnboundedSender<ControllerMessage>>>,
    rev_rx: Mutex<Option<UnboundedReceiver<ControllerMessage>>>,
    /// When set, the responder-side session fails every send
    fail_responder_sends: AtomicBool,
}

impl Link {
    fn new() -> Arc<Self> {
        let (fwd_tx, fwd_rx) = tokio::sync::mpsc::unbounded_channel();
        let (rev_tx, rev_rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(Self {
            fwd_tx: Mutex::new(Some(fwd_tx)),
            fwd_rx: Mutex::new(Some(fwd_rx)),
            rev_tx: Mutex::new(Some(rev_tx)),
            rev_rx: Mutex::new(Some(rev_rx)),
            fail_responder_sends: AtomicBool::new(false),
        })
    }
}

/// Forward everything from `rx` into the owner's event channel.
fn pump(
    mut rx: UnboundedReceiver<ControllerMessage>,
    events: SessionEvents,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if events.send(SessionEvent::Message(msg)).is_err() {
                return;
            }
        }
        let _ = events.send(SessionEvent::Closed);
    })
}

/// In-process transport; clones share the same endpoint table.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    links: Arc<DashMap<String, Arc<Link>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, id: &str) -> Arc<Link> {
        let link = Link::new();
        self.links.insert(id.to_string(), Arc::clone(&link));
        link
    }

    /// Create an endpoint and hand back the initiator half as a test handle.
    ///
    /// The returned [`MemoryRemote`] plays the part of the remote peer: its
    /// `offer()` goes into a `ConnectRequest`, after which it can inject
    /// messages, observe what the local registry sends, simulate send
    /// failures, and close the link.
    pub fn remote_initiator(&self, id: &str) -> MemoryRemote {
        let link = self.register(id);
        MemoryRemote {
            id: id.to_string(),
            link,
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn accept(
        &self,
        offer: &Value,
        events: SessionEvents,
    ) -> Result<(Box<dyn TransportSession>, Value), TransportError> {
        let id = offer
            .get("endpoint")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::HandshakeFailed("offer has no endpoint".into()))?;
        let link = self
            .links
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TransportError::HandshakeFailed(format!("unknown endpoint '{id}'")))?;

        let fwd_rx = link
            .fwd_rx
            .lock()
            .take()
            .ok_or_else(|| TransportError::HandshakeFailed(format!("endpoint '{id}' already accepted")))?;
        let reader = pump(fwd_rx, events);

        let tx = link.rev_tx.lock().take();
        let session = MemorySession {
            tx: Mutex::new(tx),
            reader: Mutex::new(Some(reader)),
            link: Arc::clone(&link),
            responder: true,
        };
        Ok((Box::new(session), json!({ "endpoint": id })))
    }

    async fn open(&self, host: &str) -> Result<Box<dyn PendingSession>, TransportError> {
        let id = format!("{host}/{}", Uuid::new_v4());
        let link = self.register(&id);
        Ok(Box::new(MemoryPending { id, link }))
    }
}

struct MemoryPending {
    id: String,
    link: Arc<Link>,
}

#[async_trait]
impl PendingSession for MemoryPending {
    fn offer(&self) -> Value {
        json!({ "endpoint": self.id })
    }

    async fn establish(
        self: Box<Self>,
        _answer: &Value,
        events: SessionEvents,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        let rev_rx = self
            .link
            .rev_rx
            .lock()
            .take()
            .ok_or_else(|| TransportError::HandshakeFailed("link already established".into()))?;
        let reader = pump(rev_rx, events);

        let tx = self.link.fwd_tx.lock().take();
        Ok(Box::new(MemorySession {
            tx: Mutex::new(tx),
            reader: Mutex::new(Some(reader)),
            link: self.link,
            responder: false,
        }))
    }
}

struct MemorySession {
    tx: Mutex<Option<UnboundedSender<ControllerMessage>>>,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    link: Arc<Link>,
    responder: bool,
}

#[async_trait]
impl TransportSession for MemorySession {
    async fn send(&self, message: &ControllerMessage) -> Result<(), TransportError> {
        if self.responder && self.link.fail_responder_sends.load(Ordering::Relaxed) {
            return Err(TransportError::SendFailed("simulated failure".into()));
        }
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(TransportError::Closed)?;
        tx.send(message.clone()).map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        self.tx.lock().take();
        // a closed session must stop delivering inbound messages too
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

/// Test handle for the remote end of a memory session.
pub struct MemoryRemote {
    id: String,
    link: Arc<Link>,
}

impl MemoryRemote {
    pub fn offer(&self) -> Value {
        json!({ "endpoint": self.id })
    }

    /// Inject a message as if the remote peer had sent it.
    pub fn send(&self, message: ControllerMessage) -> bool {
        match self.link.fwd_tx.lock().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Next message the local side sent to this peer, or `None` once the
    /// local session is closed.
    pub async fn recv(&self) -> Option<ControllerMessage> {
        let mut rx = self.link.rev_rx.lock().take()?;
        let msg = rx.recv().await;
        *self.link.rev_rx.lock() = Some(rx);
        msg
    }

    /// Like [`recv`](Self::recv) but never waits.
    pub fn try_recv(&self) -> Option<ControllerMessage> {
        let mut guard = self.link.rev_rx.lock();
        guard.as_mut()?.try_recv().ok()
    }

    /// Make every send from the local side toward this peer fail.
    pub fn fail_sends(&self, fail: bool) {
        self.link.fail_responder_sends.store(fail, Ordering::Relaxed);
    }

    /// Drop the sending half; the local side observes a closed session.
    pub fn close(&self) {
        self.link.fwd_tx.lock().take();
    }
}
