//! Line-delimited JSON transport over TCP
//!
//! The offer advertises the initiator's listener endpoint together with a
//! one-shot token. The responder dials that endpoint, presents the token on
//! the first line, and the resulting connection becomes the session: one
//! JSON-encoded controller message per line in each direction.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;

use super::{PendingSession, SessionEvent, SessionEvents, Transport, TransportSession};
use crate::constants::SESSION_CONNECT_TIMEOUT_SECS;
use crate::error::TransportError;
use crate::protocol::ControllerMessage;

/// First line sent by the dialing side to match the connection to a handshake
#[derive(Serialize, Deserialize)]
struct Hello {
    token: String,
}

/// Stream halves handed from the listener to the awaiting handshake.
///
/// The reader stays buffered: bytes that arrived right behind the hello line
/// must not be lost.
type SessionHalves = (BufReader<OwnedReadHalf>, OwnedWriteHalf);

/// TCP session transport
///
/// One listener per process; every peer session is a separate connection.
pub struct TcpTransport {
    advertise: String,
    pending: Arc<DashMap<String, oneshot::Sender<SessionHalves>>>,
}

impl TcpTransport {
    /// Bind the session listener and spawn its accept loop.
    ///
    /// `advertise` is the endpoint other peers should dial; it defaults to
    /// the bound address, which is only useful on loopback setups.
    pub async fn bind(
        bind_addr: SocketAddr,
        advertise: Option<String>,
    ) -> crate::Result<Arc<Self>> {
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let transport = Arc::new(Self {
            advertise: advertise.unwrap_or_else(|| local_addr.to_string()),
            pending: Arc::new(DashMap::new()),
        });

        tracing::info!(addr = %local_addr, "session listener started");
        let pending = Arc::clone(&transport.pending);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        let pending = Arc::clone(&pending);
                        tokio::spawn(async move {
                            if let Err(e) = route_inbound(stream, &pending).await {
                                tracing::warn!(remote = %remote, "inbound session rejected: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("session listener accept failed: {e}");
                        return;
                    }
                }
            }
        });

        Ok(transport)
    }

    /// Endpoint other peers dial to reach this transport
    pub fn advertise(&self) -> &str {
        &self.advertise
    }
}

/// Match an inbound connection to the handshake that announced it.
async fn route_inbound(
    stream: TcpStream,
    pending: &DashMap<String, oneshot::Sender<SessionHalves>>,
) -> Result<(), TransportError> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    timeout(
        Duration::from_secs(SESSION_CONNECT_TIMEOUT_SECS),
        reader.read_line(&mut line),
    )
    .await
    .map_err(|_| TransportError::HandshakeFailed("hello timed out".into()))?
    .map_err(|e| TransportError::HandshakeFailed(format!("hello read failed: {e}")))?;

    let hello: Hello = serde_json::from_str(line.trim())
        .map_err(|e| TransportError::HandshakeFailed(format!("bad hello line: {e}")))?;

    let (_, tx) = pending
        .remove(&hello.token)
        .ok_or_else(|| TransportError::HandshakeFailed("unknown handshake token".into()))?;
    tx.send((reader, write_half))
        .map_err(|_| TransportError::HandshakeFailed("handshake no longer awaited".into()))
}

#[async_trait]
impl Transport for TcpTransport {
    async fn accept(
        &self,
        offer: &Value,
        events: SessionEvents,
    ) -> Result<(Box<dyn TransportSession>, Value), TransportError> {
        let endpoint = offer
            .get("endpoint")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::HandshakeFailed("offer has no endpoint".into()))?;
        let token = offer
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::HandshakeFailed("offer has no token".into()))?;

        let mut stream = timeout(
            Duration::from_secs(SESSION_CONNECT_TIMEOUT_SECS),
            TcpStream::connect(endpoint),
        )
        .await
        .map_err(|_| TransportError::ConnectFailed(format!("dialing {endpoint} timed out")))?
        .map_err(|e| TransportError::ConnectFailed(format!("dialing {endpoint}: {e}")))?;

        let hello = serde_json::to_string(&Hello {
            token: token.to_string(),
        })
        .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        stream
            .write_all(format!("{hello}\n").as_bytes())
            .await
            .map_err(|e| TransportError::HandshakeFailed(format!("hello write failed: {e}")))?;

        let (read_half, write_half) = stream.into_split();
        let session = TcpSession::start(BufReader::new(read_half), write_half, events);
        Ok((Box::new(session), json!({ "endpoint": self.advertise })))
    }

    async fn open(&self, _host: &str) -> Result<Box<dyn PendingSession>, TransportError> {
        let token = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(token.clone(), tx);
        Ok(Box::new(TcpPending {
            token,
            advertise: self.advertise.clone(),
            pending: Arc::clone(&self.pending),
            rx,
        }))
    }
}

struct TcpPending {
    token: String,
    advertise: String,
    pending: Arc<DashMap<String, oneshot::Sender<SessionHalves>>>,
    rx: oneshot::Receiver<SessionHalves>,
}

#[async_trait]
impl PendingSession for TcpPending {
    fn offer(&self) -> Value {
        json!({ "endpoint": self.advertise, "token": self.token })
    }

    async fn establish(
        self: Box<Self>,
        _answer: &Value,
        events: SessionEvents,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        let TcpPending {
            token, pending, rx, ..
        } = *self;
        let (reader, writer) = timeout(Duration::from_secs(SESSION_CONNECT_TIMEOUT_SECS), rx)
            .await
            .map_err(|_| {
                pending.remove(&token);
                TransportError::HandshakeFailed("responder never dialed back".into())
            })?
            .map_err(|_| TransportError::HandshakeFailed("listener dropped the handshake".into()))?;

        Ok(Box::new(TcpSession::start(reader, writer, events)))
    }
}

struct TcpSession {
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TcpSession {
    fn start(reader: BufReader<OwnedReadHalf>, writer: OwnedWriteHalf, events: SessionEvents) -> Self {
        let reader_task = tokio::spawn(read_loop(reader, events));
        Self {
            writer: Mutex::new(Some(writer)),
            reader_task: parking_lot::Mutex::new(Some(reader_task)),
        }
    }
}

async fn read_loop(reader: BufReader<OwnedReadHalf>, events: SessionEvents) {
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<ControllerMessage>(&line) {
                Ok(msg) => {
                    if events.send(SessionEvent::Message(msg)).is_err() {
                        return;
                    }
                }
                Err(e) => tracing::warn!("dropping unparseable controller message: {e}"),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("session read failed: {e}");
                break;
            }
        }
    }
    let _ = events.send(SessionEvent::Closed);
}

#[async_trait]
impl TransportSession for TcpSession {
    async fn send(&self, message: &ControllerMessage) -> Result<(), TransportError> {
        let line = serde_json::to_string(message)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&self) {
        self.writer.lock().await.take();
        // a closed session must stop delivering inbound messages too
        if let Some(reader) = self.reader_task.lock().take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn discovery(uuids: &[&str]) -> ControllerMessage {
        ControllerMessage::PeerDiscovery {
            peers_uuid: uuids.iter().map(|s| s.to_string()).collect(),
        }
    }

    async fn loopback() -> (Arc<TcpTransport>, Arc<TcpTransport>) {
        let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = TcpTransport::bind(bind, None).await.unwrap();
        let b = TcpTransport::bind(bind, None).await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_handshake_and_exchange() {
        let (initiator, responder) = loopback().await;

        let pending = initiator.open("ignored").await.unwrap();
        let offer = pending.offer();

        let (resp_tx, mut resp_rx) = mpsc::unbounded_channel();
        let (resp_session, answer) = responder.accept(&offer, resp_tx).await.unwrap();
        assert_eq!(answer["endpoint"], responder.advertise());

        let (init_tx, mut init_rx) = mpsc::unbounded_channel();
        let init_session = pending.establish(&answer, init_tx).await.unwrap();

        init_session.send(&discovery(&["A"])).await.unwrap();
        match resp_rx.recv().await.unwrap() {
            SessionEvent::Message(msg) => assert_eq!(msg, discovery(&["A"])),
            other => panic!("unexpected event: {other:?}"),
        }

        resp_session.send(&discovery(&["L", "A"])).await.unwrap();
        match init_rx.recv().await.unwrap() {
            SessionEvent::Message(msg) => assert_eq!(msg, discovery(&["L", "A"])),
            other => panic!("unexpected event: {other:?}"),
        }

        // closing our writer surfaces as a closed session on the other side
        init_session.close().await;
        assert!(matches!(resp_rx.recv().await.unwrap(), SessionEvent::Closed));
    }

    #[tokio::test]
    async fn test_accept_rejects_malformed_offer() {
        let (_, responder) = loopback().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = responder.accept(&json!({ "bogus": true }), tx).await;
        assert!(result.is_err());
    }
}
