//! Login authentication
//!
//! The session invokes the configured [`Authenticator`] once per connection,
//! with the identity, scheme and credential of the LOGIN frame.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;

use crate::codec::Identifier;

/// Frame written to a client whose login was rejected.
pub const UNAUTHORIZED: &[u8] = b"401\n";

#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn authenticate(&self, id: &Identifier, scheme: &Identifier, credential: &[u8]) -> bool;

    /// Bytes written verbatim before closing a rejected connection.
    fn unauthorized(&self) -> Bytes {
        Bytes::from_static(UNAUTHORIZED)
    }
}

/// Accepts every login.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl Authenticator for AllowAll {
    async fn authenticate(&self, _id: &Identifier, _scheme: &Identifier, _credential: &[u8]) -> bool {
        true
    }
}

/// Checks logins against a fixed table of user secrets under a single scheme.
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    scheme: Identifier,
    users: HashMap<Identifier, Bytes>,
    allow_anonymous: bool,
}

impl StaticAuthenticator {
    pub fn new(scheme: Identifier) -> Self {
        StaticAuthenticator { scheme, users: HashMap::new(), allow_anonymous: false }
    }

    pub fn user<S: Into<Bytes>>(mut self, id: Identifier, secret: S) -> Self {
        self.users.insert(id, secret.into());
        self
    }

    /// Lets the anonymous identity in with any credential of the scheme.
    pub fn allow_anonymous(mut self, allow: bool) -> Self {
        self.allow_anonymous = allow;
        self
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, id: &Identifier, scheme: &Identifier, credential: &[u8]) -> bool {
        if scheme != &self.scheme {
            log::debug!("{:?} unsupported scheme {}", id, scheme);
            return false;
        }
        if id.is_anonymous() {
            return self.allow_anonymous;
        }
        matches!(self.users.get(id), Some(secret) if secret.as_ref() == credential)
    }
}
