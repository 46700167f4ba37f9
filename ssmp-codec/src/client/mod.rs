//! Client side of a connection: encodes requests, decodes responses and events.

mod codec;
mod decode;

pub use self::codec::Codec;

use bytestring::ByteString;

use crate::identifier::Identifier;
use crate::types::{Event, Response};

/// A frame received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Response(Response),
    Event(Event),
    /// An event whose verb this client does not know; its fields were skipped.
    Unknown { from: Identifier, verb: ByteString },
}
