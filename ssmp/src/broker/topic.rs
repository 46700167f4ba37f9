use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::codec::{Event, EventVerb, Identifier, SubscriptionFlag};

use super::connection::ConnectionRef;
use super::HashMap;

pub type TopicRef = Arc<Topic>;

/// A member of a topic.
#[derive(Clone)]
pub struct Subscription {
    pub conn: ConnectionRef,
    pub flag: SubscriptionFlag,
}

impl Subscription {
    #[inline]
    pub fn is_presence(&self) -> bool {
        self.flag.is_presence()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:?})", self.conn, self.flag)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Added {
    Ok,
    /// Already a member, membership left untouched.
    Conflict,
    /// The topic emptied out and was retired, subscribe to a fresh one.
    Retired,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Removed {
    NotFound,
    Ok,
    /// The last member left; the topic is retired and must leave the registry.
    Emptied,
}

#[derive(Default)]
struct Members {
    subs: HashMap<Identifier, Subscription>,
    retired: bool,
}

/// A named multicast group.
///
/// Structural changes take the write lock; the presence announcements that
/// follow them run under the same lock downgraded to a read lock, so fan-outs
/// on the topic proceed in parallel with them but no other change interleaves.
pub struct Topic {
    id: Identifier,
    members: RwLock<Members>,
}

impl Topic {
    pub fn new(id: Identifier) -> Self {
        Topic { id, members: RwLock::new(Members::default()) }
    }

    #[inline]
    pub fn id(&self) -> &Identifier {
        &self.id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.members.read().subs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn contains(&self, id: &Identifier) -> bool {
        self.members.read().subs.contains_key(id)
    }

    /// Inserts `conn` and runs the presence exchange.
    ///
    /// Existing presence members learn about every newcomer; a newcomer with
    /// presence also learns about each of them. Members without presence are
    /// never reported to the newcomer.
    pub fn add(&self, conn: &ConnectionRef, flag: SubscriptionFlag) -> Added {
        let mut members = self.members.write();
        if members.retired {
            return Added::Retired;
        }
        if members.subs.contains_key(conn.id()) {
            return Added::Conflict;
        }
        members.subs.insert(conn.id().clone(), Subscription { conn: conn.clone(), flag });

        let members = RwLockWriteGuard::downgrade(members);
        for (id, sub) in members.subs.iter() {
            if id == conn.id() || !sub.is_presence() {
                continue;
            }
            sub.conn.deliver(self.event(EventVerb::Subscribe, conn.id(), flag));
            if flag.is_presence() {
                conn.deliver(self.event(EventVerb::Subscribe, id, sub.flag));
            }
        }
        Added::Ok
    }

    /// Removes `id`. With `notify`, the remaining presence members receive an
    /// UNSUBSCRIBE event; transport drops pass `false` and stay silent.
    pub fn remove(&self, id: &Identifier, notify: bool) -> Removed {
        let mut members = self.members.write();
        if members.subs.remove(id).is_none() {
            return Removed::NotFound;
        }
        if members.subs.is_empty() {
            members.retired = true;
            return Removed::Emptied;
        }
        if notify {
            let members = RwLockWriteGuard::downgrade(members);
            members
                .subs
                .values()
                .filter(|sub| sub.is_presence())
                .for_each(|sub| {
                    sub.conn.deliver(self.event(EventVerb::Unsubscribe, id, SubscriptionFlag::None));
                });
        }
        Removed::Ok
    }

    /// Visits every member under the shared lock.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Identifier, &Subscription),
    {
        let members = self.members.read();
        for (id, sub) in members.subs.iter() {
            f(id, sub)
        }
    }

    #[inline]
    fn event(&self, verb: EventVerb, about: &Identifier, flag: SubscriptionFlag) -> Event {
        Event::new(about.clone(), verb, Some(self.id.clone()), flag.payload())
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members = self.members.read();
        f.debug_struct("Topic")
            .field("id", &self.id)
            .field("members", &members.subs.len())
            .field("retired", &members.retired)
            .finish()
    }
}
