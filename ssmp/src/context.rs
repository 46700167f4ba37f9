use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::auth::{AllowAll, Authenticator};
use crate::broker::Broker;

/// Builder for [`ServerContext`].
pub struct ServerContextBuilder {
    authenticator: Arc<dyn Authenticator>,
}

impl Default for ServerContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerContextBuilder {
    pub fn new() -> ServerContextBuilder {
        ServerContextBuilder { authenticator: Arc::new(AllowAll) }
    }

    /// Login policy, every login is accepted when unset.
    pub fn authenticator<A: Authenticator>(mut self, authenticator: A) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    pub fn authenticator_arc(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    pub fn build(self) -> ServerContext {
        ServerContext {
            inner: Arc::new(ServerContextInner { broker: Broker::new(), authenticator: self.authenticator }),
        }
    }
}

/// State shared by every connection of a server.
#[derive(Clone)]
pub struct ServerContext {
    inner: Arc<ServerContextInner>,
}

pub struct ServerContextInner {
    pub broker: Broker,
    pub authenticator: Arc<dyn Authenticator>,
}

impl Deref for ServerContext {
    type Target = ServerContextInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl ServerContext {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> ServerContextBuilder {
        ServerContextBuilder::new()
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ServerContext {{ connections: {}, topics: {} }}",
            self.broker.connections_count(),
            self.broker.topics_count()
        )
    }
}
