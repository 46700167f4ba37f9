use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::channel::mpsc;
use parking_lot::Mutex;

use crate::codec::{Event, Identifier};

use super::topic::TopicRef;
use super::HashMap;

pub type ConnectionRef = Arc<Connection>;
pub type Tx = mpsc::UnboundedSender<Message>;
pub type Rx = mpsc::UnboundedReceiver<Message>;

/// What the broker hands to a connection's worker.
#[derive(Debug)]
pub enum Message {
    Event(Event),
    /// Another connection logged in with the same identity.
    Close,
}

/// Broker side view of an authenticated transport.
///
/// Events are never written to the socket directly: they are queued on the
/// outbound channel and written by the worker that owns the stream.
pub struct Connection {
    id: Identifier,
    remote_addr: Option<SocketAddr>,
    tx: Tx,
    closed: AtomicBool,
    pub(crate) subs: Mutex<HashMap<Identifier, TopicRef>>,
}

impl Connection {
    pub fn new(id: Identifier, remote_addr: Option<SocketAddr>) -> (ConnectionRef, Rx) {
        let (tx, rx) = mpsc::unbounded();
        let conn = Connection {
            id,
            remote_addr,
            tx,
            closed: AtomicBool::new(false),
            subs: Mutex::new(HashMap::default()),
        };
        (Arc::new(conn), rx)
    }

    #[inline]
    pub fn id(&self) -> &Identifier {
        &self.id
    }

    #[inline]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queues an event for the owning worker. Returns false when the
    /// connection is already closed.
    #[inline]
    pub fn deliver(&self, ev: Event) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.unbounded_send(Message::Event(ev)).is_ok()
    }

    /// Marks the connection closed and asks its worker to terminate.
    /// Only the first call has an effect.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.tx.unbounded_send(Message::Close);
        true
    }

    #[inline]
    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Identifiers of the topics this connection is a member of.
    pub fn topics(&self) -> Vec<Identifier> {
        self.subs.lock().keys().cloned().collect()
    }

    #[inline]
    pub(crate) fn topic_refs(&self) -> Vec<TopicRef> {
        self.subs.lock().values().cloned().collect()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.remote_addr {
            Some(addr) => write!(f, "{}@{}", self.id, addr),
            None => write!(f, "{}", self.id),
        }
    }
}
