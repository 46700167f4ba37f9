//! Broker engine
//!
//! Holds the connection registry and the topic registry, and turns typed
//! requests into responses and queued events. Nothing in here touches a socket:
//! deliveries go through each connection's outbound channel, so every step runs
//! synchronously against in-memory state.

use std::sync::Arc;

use crate::codec::server::Reply;
use crate::codec::{Event, EventVerb, Identifier, Payload, Request, RequestVerb, Response, SubscriptionFlag};

pub mod connection;
pub mod topic;

pub use connection::{Connection, ConnectionRef, Message, Rx, Tx};
pub use topic::{Added, Removed, Subscription, Topic, TopicRef};

pub type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;
pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
pub type HashSet<K> = std::collections::HashSet<K, ahash::RandomState>;

/// What the session writes back after a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reply(Reply),
    /// Write the response, then close the connection.
    ReplyAndClose(Response),
}

impl Outcome {
    #[inline]
    fn code(code: u16) -> Self {
        Outcome::Reply(Reply::Response(Response::new(code)))
    }

    #[inline]
    fn ok() -> Self {
        Self::code(Response::OK)
    }

    /// The response code, when the outcome carries one.
    #[inline]
    pub fn response_code(&self) -> Option<u16> {
        match self {
            Outcome::Reply(Reply::Response(resp)) | Outcome::ReplyAndClose(resp) => Some(resp.code),
            Outcome::Reply(_) => None,
        }
    }
}

#[derive(Default)]
pub struct Broker {
    connections: DashMap<Identifier, ConnectionRef>,
    topics: DashMap<Identifier, TopicRef>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes an authenticated connection reachable under its identity.
    ///
    /// A connection already registered under the same identity is closed,
    /// the last login wins. Anonymous connections are never registered.
    pub fn register(&self, conn: &ConnectionRef) {
        if conn.id().is_anonymous() {
            return;
        }
        if let Some(prev) = self.connections.insert(conn.id().clone(), conn.clone()) {
            if !Arc::ptr_eq(&prev, conn) && prev.close() {
                log::info!("{:?} evicted by a new login from {:?}", prev, conn.remote_addr());
            }
        }
    }

    /// Tears a connection down: drops it from every topic without telling the
    /// other members, then from the registry. Safe to call more than once.
    pub fn disconnect(&self, conn: &ConnectionRef) {
        conn.mark_closed();
        let subs = std::mem::take(&mut *conn.subs.lock());
        for (_, topic) in subs {
            if let Removed::Emptied = topic.remove(conn.id(), false) {
                self.retire(&topic);
            }
        }
        if !conn.id().is_anonymous() {
            self.connections.remove_if(conn.id(), |_, c| Arc::ptr_eq(c, conn));
        }
        log::debug!("{:?} disconnected", conn);
    }

    /// Closes every registered connection.
    pub fn close_all(&self) {
        let conns: Vec<ConnectionRef> = self.connections.iter().map(|e| e.value().clone()).collect();
        for conn in conns {
            conn.close();
        }
    }

    pub fn dispatch(&self, conn: &ConnectionRef, req: Request) -> Outcome {
        if conn.is_closed() {
            return Outcome::ReplyAndClose(Response::new(Response::NOT_ALLOWED));
        }
        let Request { verb, to, payload } = req;
        match (verb, to, payload) {
            (RequestVerb::Subscribe, Some(topic), flag) => {
                self.subscribe(conn, topic, SubscriptionFlag::from_payload(flag.as_ref()))
            }
            (RequestVerb::Unsubscribe, Some(topic), _) => self.unsubscribe(conn, &topic),
            (RequestVerb::Ucast, Some(to), Some(payload)) => self.ucast(conn, to, payload),
            (RequestVerb::Mcast, Some(topic), Some(payload)) => self.mcast(conn, topic, payload),
            (RequestVerb::Bcast, _, Some(payload)) => self.bcast(conn, payload),
            (RequestVerb::Close, _, _) => Outcome::ReplyAndClose(Response::ok()),
            (RequestVerb::Ping | RequestVerb::Pong, _, _) => {
                log::debug!("{:?} {} reached the broker, keepalive belongs to the session", conn, verb);
                Outcome::code(Response::NOT_ALLOWED)
            }
            (RequestVerb::Login, _, _) => Outcome::ReplyAndClose(Response::new(Response::NOT_ALLOWED)),
            (verb, _, _) => {
                log::debug!("{:?} {} is missing a mandatory field", conn, verb);
                Outcome::code(Response::BAD_REQUEST)
            }
        }
    }

    pub fn subscribe(&self, conn: &ConnectionRef, topic_id: Identifier, flag: SubscriptionFlag) -> Outcome {
        if conn.id().is_anonymous() {
            return Outcome::code(Response::NOT_ALLOWED);
        }
        loop {
            let topic = self
                .topics
                .entry(topic_id.clone())
                .or_insert_with(|| Arc::new(Topic::new(topic_id.clone())))
                .value()
                .clone();
            match topic.add(conn, flag) {
                Added::Ok => {
                    conn.subs.lock().insert(topic_id, topic);
                    return Outcome::ok();
                }
                Added::Conflict => return Outcome::code(Response::CONFLICT),
                Added::Retired => self.retire(&topic),
            }
        }
    }

    pub fn unsubscribe(&self, conn: &ConnectionRef, topic_id: &Identifier) -> Outcome {
        if conn.id().is_anonymous() {
            return Outcome::code(Response::NOT_ALLOWED);
        }
        let Some(topic) = conn.subs.lock().remove(topic_id) else {
            return Outcome::code(Response::NOT_FOUND);
        };
        match topic.remove(conn.id(), true) {
            Removed::NotFound => Outcome::code(Response::NOT_FOUND),
            Removed::Ok => Outcome::ok(),
            Removed::Emptied => {
                self.retire(&topic);
                Outcome::ok()
            }
        }
    }

    pub fn ucast(&self, conn: &ConnectionRef, to: Identifier, payload: Payload) -> Outcome {
        let Some(target) = self.connection(&to) else {
            return Outcome::code(Response::NOT_FOUND);
        };
        target.deliver(Event::new(conn.id().clone(), EventVerb::Ucast, Some(to), Some(payload)));
        Outcome::ok()
    }

    /// Delivers to every current member of the topic, the sender included
    /// when it is one. An unknown topic has no members.
    pub fn mcast(&self, conn: &ConnectionRef, topic_id: Identifier, payload: Payload) -> Outcome {
        if let Some(topic) = self.topic(&topic_id) {
            let ev = Event::new(conn.id().clone(), EventVerb::Mcast, Some(topic_id), Some(payload));
            topic.for_each(|_, sub| {
                sub.conn.deliver(ev.clone());
            });
        }
        Outcome::ok()
    }

    /// Delivers once to each member of every topic the sender belongs to,
    /// never to the sender itself.
    pub fn bcast(&self, conn: &ConnectionRef, payload: Payload) -> Outcome {
        if conn.id().is_anonymous() {
            return Outcome::code(Response::NOT_ALLOWED);
        }
        let mut targets: HashMap<Identifier, ConnectionRef> = HashMap::default();
        for topic in conn.topic_refs() {
            topic.for_each(|id, sub| {
                if id != conn.id() && !targets.contains_key(id) {
                    targets.insert(id.clone(), sub.conn.clone());
                }
            });
        }
        let ev = Event::new(conn.id().clone(), EventVerb::Bcast, None, Some(payload));
        for target in targets.into_values() {
            target.deliver(ev.clone());
        }
        Outcome::ok()
    }

    #[inline]
    pub fn connection(&self, id: &Identifier) -> Option<ConnectionRef> {
        self.connections.get(id).map(|e| e.value().clone())
    }

    #[inline]
    pub fn topic(&self, id: &Identifier) -> Option<TopicRef> {
        self.topics.get(id).map(|e| e.value().clone())
    }

    #[inline]
    pub fn connections_count(&self) -> usize {
        self.connections.len()
    }

    #[inline]
    pub fn topics_count(&self) -> usize {
        self.topics.len()
    }

    /// Identifiers of the members of a topic, for inspection.
    pub fn members(&self, topic_id: &Identifier) -> HashSet<Identifier> {
        let mut ids = HashSet::default();
        if let Some(topic) = self.topic(topic_id) {
            topic.for_each(|id, _| {
                ids.insert(id.clone());
            });
        }
        ids
    }

    #[inline]
    fn retire(&self, topic: &TopicRef) {
        self.topics.remove_if(topic.id(), |_, t| Arc::ptr_eq(t, topic));
    }
}
