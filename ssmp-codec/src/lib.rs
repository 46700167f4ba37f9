#![deny(unsafe_code)]

//! SSMP wire protocol codec
//!
//! SSMP is a line oriented publish/subscribe protocol. Every frame is terminated by
//! `\n` and made of space separated fields:
//!
//! ```text
//! request   VERB [<to>] [<payload>]\n
//! response  CCC [<payload>]\n
//! event     000 <from> VERB [<to>] [<payload>]\n
//! ```
//!
//! Payloads are either text (1 to 1024 bytes, no newline, no byte in `0..=3`) or
//! binary. A binary payload starts with two header bytes holding `len - 1` in 10
//! bits, which lets it carry newlines.
//!
//! ## Components:
//! - [`Identifier`]: validated names for users, topics and schemes
//! - [`types`]: verbs, payloads, requests, responses and events
//! - [`server::Codec`]: decodes requests, encodes responses and events
//! - [`client::Codec`]: decodes responses and events, encodes requests
//!
//! Both codecs plug into `tokio_util::codec::Framed`. A decoder handed a partial
//! frame returns `Ok(None)` and consumes nothing.
//!
//! ```
//! use bytes::BytesMut;
//! use ssmp_codec::{client, server, Identifier, Payload, Request};
//! use tokio_util::codec::{Decoder, Encoder};
//!
//! let mut buf = BytesMut::new();
//! let req = Request::mcast(Identifier::from_static("room1"), Payload::text("hello").unwrap());
//! client::Codec::new().encode(req.clone(), &mut buf).unwrap();
//!
//! let server = server::Codec::new();
//! server.set_state(server::State::Authenticated);
//! let mut server = server;
//! assert_eq!(server.decode(&mut buf).unwrap(), Some(server::Packet::Request(req)));
//! ```

#[macro_use]
mod utils;

mod encode;

/// Error types for encoding/decoding operations
pub mod error;

/// Identifier validation and the anonymous identity
pub mod identifier;

/// Shared protocol types and constants
pub mod types;

pub mod client;
pub mod server;

pub use error::{DecodeError, EncodeError};
pub use identifier::{Identifier, ANONYMOUS, MAX_ID_LENGTH};
pub use types::{
    Event, EventVerb, Fields, Login, Payload, Request, RequestVerb, Response, SubscriptionFlag,
    MAX_PAYLOAD_LENGTH, MAX_VERB_LENGTH,
};
