//! Server side of a connection: decodes requests, encodes responses and events.

mod codec;
mod decode;

pub use self::codec::{Codec, State};

use bytes::Bytes;
use bytestring::ByteString;

use crate::types::{Event, Login, Request, Response};

/// A frame received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Login(Login),
    Request(Request),
    /// A verb this server does not implement; its fields were skipped.
    Unknown(ByteString),
}

/// A frame sent to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Response(Response),
    Event(Event),
    /// Bytes written verbatim, such as an authenticator's rejection frame.
    Raw(Bytes),
}

impl From<Response> for Reply {
    fn from(r: Response) -> Self {
        Reply::Response(r)
    }
}

impl From<Event> for Reply {
    fn from(e: Event) -> Self {
        Reply::Event(e)
    }
}
