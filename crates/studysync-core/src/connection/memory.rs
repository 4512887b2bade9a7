//! In-process transport with a scriptable server side.
//!
//! Each successful `connect` hands a [`ServerSession`] to the paired
//! [`MemoryServer`]. Dropping a session drops the link for the client.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;

use super::{Link, Transport, TransportError};
use crate::protocol::{AckPayload, Frame};

const LINK_BUFFER: usize = 64;

#[derive(Debug)]
struct ServerState {
    accepting: bool,
    fail_next: u32,
    connects: u32,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ServerState>,
    sessions: mpsc::UnboundedSender<ServerSession>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Client side; give it to [`ConnectionManager::spawn`](super::ConnectionManager::spawn).
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

/// Server side; accepts sessions and controls whether connects succeed.
#[derive(Debug)]
pub struct MemoryServer {
    shared: Arc<Shared>,
    sessions: mpsc::UnboundedReceiver<ServerSession>,
}

/// Create a connected transport/server pair.
pub fn pair() -> (MemoryTransport, MemoryServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        state: Mutex::new(ServerState {
            accepting: true,
            fail_next: 0,
            connects: 0,
        }),
        sessions: tx,
    });
    (
        MemoryTransport {
            shared: Arc::clone(&shared),
        },
        MemoryServer { shared, sessions: rx },
    )
}

impl MemoryTransport {
    fn open(&self) -> Result<Link, TransportError> {
        {
            let mut state = self.shared.state();
            if !state.accepting {
                return Err(TransportError("server not accepting connections".to_string()));
            }
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(TransportError("connection refused".to_string()));
            }
            state.connects += 1;
        }

        let (to_server, from_client) = mpsc::channel(LINK_BUFFER);
        let (to_client, from_server) = mpsc::channel(LINK_BUFFER);
        self.shared
            .sessions
            .send(ServerSession { from_client, to_client })
            .map_err(|_| TransportError("server is gone".to_string()))?;
        Ok(Link {
            outbound: to_server,
            inbound: from_server,
        })
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) -> impl Future<Output = Result<Link, TransportError>> + Send {
        std::future::ready(self.open())
    }
}

impl MemoryServer {
    /// Next session opened by the client, in connect order.
    pub async fn accept(&mut self) -> Option<ServerSession> {
        self.sessions.recv().await
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.shared.state().accepting = accepting;
    }

    /// Refuse the next `n` connect attempts.
    pub fn fail_next(&self, n: u32) {
        self.shared.state().fail_next = n;
    }

    /// Number of links opened so far.
    pub fn connect_count(&self) -> u32 {
        self.shared.state().connects
    }
}

/// Server end of one link.
#[derive(Debug)]
pub struct ServerSession {
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<String>,
}

impl ServerSession {
    /// Next frame sent by the client. `None` once the client dropped the link.
    /// Frames that do not parse are skipped.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        loop {
            let raw = self.from_client.recv().await?;
            match serde_json::from_str(&raw) {
                Ok(frame) => return Some(frame),
                Err(e) => tracing::warn!(error = %e, "memory server: unparseable client frame"),
            }
        }
    }

    /// Push an event to the client. Returns false if the client is gone.
    pub async fn push(&self, event: &str, data: Value) -> bool {
        self.push_raw(Frame::new(event, data).encode()).await
    }

    pub async fn push_raw(&self, raw: impl Into<String>) -> bool {
        self.to_client.send(raw.into()).await.is_ok()
    }

    /// Answer a frame that carried an ack id.
    pub async fn ack(&self, ack_id: u64, payload: AckPayload) -> bool {
        let data = serde_json::to_value(payload).unwrap_or(Value::Null);
        self.push_raw(Frame::new(crate::protocol::names::ACK, data).with_ack(ack_id).encode())
            .await
    }
}
