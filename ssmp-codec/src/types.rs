use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::EncodeError;
use crate::identifier::{Identifier, MAX_ID_LENGTH};
use crate::utils::is_text;

/// Width of a response code, and of the `000` event marker.
pub const CODE_LENGTH: usize = 3;
pub const MAX_VERB_LENGTH: usize = 16;
/// Upper bound for text payloads and for decoded binary payloads.
pub const MAX_PAYLOAD_LENGTH: usize = 1024;

bitflags::bitflags! {
    /// Fields following a verb on the wire.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct Fields: u8 {
        const TARGET   = 0b0000_0001;
        const PAYLOAD  = 0b0000_0010;
        /// The payload may be left out.
        const OPTIONAL = 0b0000_0100;
    }
}

macro_rules! verb_enum {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident {
            $(
                $( #[$item_attr:meta] )*
                $var:ident = ($kw:literal, $fields:expr)
            ),+ $(,)?
        }) => {
        $( #[$enum_attr] )*
        #[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
        pub enum $name {
            $(
                $( #[$item_attr] )*
                $var
            ),+
        }

        impl $name {
            /// Maps a verb token to its variant, `None` when the verb is unknown.
            #[inline]
            pub fn from_bytes(v: &[u8]) -> Option<Self> {
                match v {
                    $($kw => Some($name::$var),)+
                    _ => None,
                }
            }

            #[inline]
            pub fn as_bytes(&self) -> &'static [u8] {
                match self {
                    $($name::$var => $kw),+
                }
            }

            #[inline]
            pub fn fields(&self) -> Fields {
                match self {
                    $($name::$var => $fields),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&String::from_utf8_lossy(self.as_bytes()))
            }
        }
    };
}

verb_enum! {
    /// Verbs a client may send.
    pub enum RequestVerb {
        /// `LOGIN <id> <scheme> [<credential>]`, parsed by its own grammar.
        Login = (b"LOGIN", Fields::TARGET.union(Fields::PAYLOAD)),
        Subscribe = (b"SUBSCRIBE", Fields::all()),
        Unsubscribe = (b"UNSUBSCRIBE", Fields::TARGET),
        Ucast = (b"UCAST", Fields::TARGET.union(Fields::PAYLOAD)),
        Mcast = (b"MCAST", Fields::TARGET.union(Fields::PAYLOAD)),
        Bcast = (b"BCAST", Fields::PAYLOAD),
        Ping = (b"PING", Fields::empty()),
        Pong = (b"PONG", Fields::empty()),
        Close = (b"CLOSE", Fields::empty()),
    }
}

verb_enum! {
    /// Verbs a server may deliver inside an event.
    pub enum EventVerb {
        Subscribe = (b"SUBSCRIBE", Fields::all()),
        Unsubscribe = (b"UNSUBSCRIBE", Fields::TARGET),
        Ucast = (b"UCAST", Fields::TARGET.union(Fields::PAYLOAD)),
        Mcast = (b"MCAST", Fields::TARGET.union(Fields::PAYLOAD)),
        Bcast = (b"BCAST", Fields::PAYLOAD),
        Ping = (b"PING", Fields::empty()),
        Pong = (b"PONG", Fields::empty()),
    }
}

/// Advisory payload of SUBSCRIBE.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Default)]
pub enum SubscriptionFlag {
    #[default]
    None,
    /// Announce membership changes of the topic to, and about, this member.
    Presence,
}

impl SubscriptionFlag {
    pub const PRESENCE: &'static [u8] = b"PRESENCE";

    #[inline]
    pub fn from_payload(payload: Option<&Payload>) -> Self {
        match payload {
            Some(p) if p.as_bytes() == Self::PRESENCE => SubscriptionFlag::Presence,
            _ => SubscriptionFlag::None,
        }
    }

    #[inline]
    pub fn is_presence(&self) -> bool {
        matches!(self, SubscriptionFlag::Presence)
    }

    #[inline]
    pub fn payload(&self) -> Option<Payload> {
        match self {
            SubscriptionFlag::Presence => Some(Payload::from_validated(Bytes::from_static(Self::PRESENCE), false)),
            SubscriptionFlag::None => None,
        }
    }
}

/// A non-empty text or binary payload of at most [`MAX_PAYLOAD_LENGTH`] bytes.
///
/// Text payloads never contain a newline nor a byte in `0..=3`, the binary
/// markers; constructors refuse such content before it can reach the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload {
    data: Bytes,
    binary: bool,
}

impl Payload {
    pub fn text<T: Into<Bytes>>(data: T) -> Result<Self, EncodeError> {
        let data = data.into();
        check_len(&data)?;
        ensure!(is_text(&data), EncodeError::InvalidPayload);
        Ok(Payload { data, binary: false })
    }

    pub fn binary<T: Into<Bytes>>(data: T) -> Result<Self, EncodeError> {
        let data = data.into();
        check_len(&data)?;
        Ok(Payload { data, binary: true })
    }

    #[inline]
    pub(crate) fn from_validated(data: Bytes, binary: bool) -> Self {
        Payload { data, binary }
    }

    #[inline]
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    #[inline]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.data.len()
    }
}

#[inline]
fn check_len(data: &[u8]) -> Result<(), EncodeError> {
    ensure!(!data.is_empty(), EncodeError::EmptyPayload);
    ensure!(data.len() <= MAX_PAYLOAD_LENGTH, EncodeError::MaxSizeExceeded);
    Ok(())
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.binary {
            write!(f, "Binary({} bytes)", self.data.len())
        } else {
            write!(f, "Text({:?})", String::from_utf8_lossy(&self.data))
        }
    }
}

/// A client to server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub verb: RequestVerb,
    pub to: Option<Identifier>,
    pub payload: Option<Payload>,
}

impl Request {
    /// The credential may be empty, in which case only the scheme is sent.
    pub fn login(id: Identifier, scheme: Identifier, credential: &[u8]) -> Result<Self, EncodeError> {
        let mut buf = BytesMut::with_capacity(MAX_ID_LENGTH + 1 + credential.len());
        buf.put_slice(scheme.as_bytes());
        if !credential.is_empty() {
            buf.put_u8(b' ');
            buf.put_slice(credential);
        }
        Ok(Request { verb: RequestVerb::Login, to: Some(id), payload: Some(Payload::text(buf.freeze())?) })
    }

    pub fn subscribe(topic: Identifier, flag: SubscriptionFlag) -> Self {
        Request { verb: RequestVerb::Subscribe, to: Some(topic), payload: flag.payload() }
    }

    pub fn unsubscribe(topic: Identifier) -> Self {
        Request { verb: RequestVerb::Unsubscribe, to: Some(topic), payload: None }
    }

    pub fn ucast(to: Identifier, payload: Payload) -> Self {
        Request { verb: RequestVerb::Ucast, to: Some(to), payload: Some(payload) }
    }

    pub fn mcast(topic: Identifier, payload: Payload) -> Self {
        Request { verb: RequestVerb::Mcast, to: Some(topic), payload: Some(payload) }
    }

    pub fn bcast(payload: Payload) -> Self {
        Request { verb: RequestVerb::Bcast, to: None, payload: Some(payload) }
    }

    pub fn ping() -> Self {
        Request { verb: RequestVerb::Ping, to: None, payload: None }
    }

    pub fn pong() -> Self {
        Request { verb: RequestVerb::Pong, to: None, payload: None }
    }

    pub fn close() -> Self {
        Request { verb: RequestVerb::Close, to: None, payload: None }
    }

    /// Whether the server answers this request with a response frame.
    #[inline]
    pub fn expects_response(&self) -> bool {
        !matches!(self.verb, RequestVerb::Ping | RequestVerb::Pong)
    }

    /// Checks `to` and `payload` against the fields the verb carries, the same
    /// check the encoder runs before writing anything.
    #[inline]
    pub fn check(&self) -> Result<(), EncodeError> {
        crate::encode::check_fields(self.verb.fields(), self.to.as_ref(), self.payload.as_ref())
    }
}

/// Credentials carried by a LOGIN frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub id: Identifier,
    pub scheme: Identifier,
    /// Empty when the client sent only the scheme.
    pub credential: Bytes,
}

/// A server to client answer to exactly one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub payload: Option<Payload>,
}

impl Response {
    pub const OK: u16 = 200;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const NOT_FOUND: u16 = 404;
    pub const NOT_ALLOWED: u16 = 405;
    pub const CONFLICT: u16 = 409;
    pub const NOT_IMPLEMENTED: u16 = 501;

    #[inline]
    pub fn new(code: u16) -> Self {
        Response { code, payload: None }
    }

    #[inline]
    pub fn with_payload(code: u16, payload: Payload) -> Self {
        Response { code, payload: Some(payload) }
    }

    #[inline]
    pub fn ok() -> Self {
        Self::new(Self::OK)
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code == Self::OK
    }
}

/// A server to client notification, written as `000 <from> <VERB> ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub from: Identifier,
    pub verb: EventVerb,
    pub to: Option<Identifier>,
    pub payload: Option<Payload>,
}

impl Event {
    #[inline]
    pub fn new(from: Identifier, verb: EventVerb, to: Option<Identifier>, payload: Option<Payload>) -> Self {
        Event { from, verb, to, payload }
    }

    /// Keepalive probe, sent with the anonymous sender.
    #[inline]
    pub fn ping() -> Self {
        Event::new(Identifier::anonymous(), EventVerb::Ping, None, None)
    }

    #[inline]
    pub fn pong() -> Self {
        Event::new(Identifier::anonymous(), EventVerb::Pong, None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_lookup() {
        assert_eq!(RequestVerb::from_bytes(b"UNSUBSCRIBE"), Some(RequestVerb::Unsubscribe));
        assert_eq!(RequestVerb::from_bytes(b"PUBLISH"), None);
        assert_eq!(EventVerb::from_bytes(b"LOGIN"), None);
        assert_eq!(EventVerb::from_bytes(b"CLOSE"), None);
        assert_eq!(RequestVerb::Bcast.to_string(), "BCAST");
        assert!(RequestVerb::Subscribe.fields().contains(Fields::OPTIONAL));
        assert!(!RequestVerb::Ucast.fields().contains(Fields::OPTIONAL));
        assert!(EventVerb::Ping.fields().is_empty());
    }

    #[test]
    fn test_text_payload_rejects_newline() {
        assert!(matches!(Payload::text("hello\nworld"), Err(EncodeError::InvalidPayload)));
        assert!(matches!(Payload::text(&b"\x02abc"[..]), Err(EncodeError::InvalidPayload)));
        assert!(Payload::binary("hello\nworld").is_ok());
    }

    #[test]
    fn test_payload_bounds() {
        assert!(matches!(Payload::text(""), Err(EncodeError::EmptyPayload)));
        assert!(matches!(Payload::binary(Bytes::new()), Err(EncodeError::EmptyPayload)));
        assert_eq!(Payload::text("x").unwrap().len(), 1);
        assert!(Payload::text("x".repeat(MAX_PAYLOAD_LENGTH)).is_ok());
        assert!(matches!(Payload::text("x".repeat(MAX_PAYLOAD_LENGTH + 1)), Err(EncodeError::MaxSizeExceeded)));
        assert!(Payload::binary(vec![0u8; MAX_PAYLOAD_LENGTH]).is_ok());
        assert!(Payload::binary(vec![0u8; MAX_PAYLOAD_LENGTH + 1]).is_err());
    }

    #[test]
    fn test_login_request() {
        let req = Request::login(Identifier::from_static("alice"), Identifier::from_static("basic"), b"pw")
            .unwrap();
        assert_eq!(req.payload.unwrap().as_bytes(), b"basic pw");

        let req =
            Request::login(Identifier::from_static("alice"), Identifier::from_static("cert"), b"").unwrap();
        assert_eq!(req.payload.unwrap().as_bytes(), b"cert");

        assert!(Request::login(Identifier::from_static("alice"), Identifier::from_static("basic"), b"p\nw")
            .is_err());
    }

    #[test]
    fn test_request_check() {
        let bob = Identifier::from_static("bob");
        assert!(Request::ucast(bob.clone(), Payload::text("hi").unwrap()).check().is_ok());
        assert!(Request::subscribe(bob.clone(), SubscriptionFlag::None).check().is_ok());
        let req = Request { verb: RequestVerb::Ucast, to: Some(bob.clone()), payload: None };
        assert!(matches!(req.check(), Err(EncodeError::MissingField)));
        let req = Request { verb: RequestVerb::Close, to: Some(bob), payload: None };
        assert!(matches!(req.check(), Err(EncodeError::UnexpectedField)));
    }

    #[test]
    fn test_subscription_flag() {
        let req = Request::subscribe(Identifier::from_static("room"), SubscriptionFlag::Presence);
        assert_eq!(SubscriptionFlag::from_payload(req.payload.as_ref()), SubscriptionFlag::Presence);
        let req = Request::subscribe(Identifier::from_static("room"), SubscriptionFlag::None);
        assert!(req.payload.is_none());
        let other = Payload::text("presence").unwrap();
        assert_eq!(SubscriptionFlag::from_payload(Some(&other)), SubscriptionFlag::None);
    }
}
