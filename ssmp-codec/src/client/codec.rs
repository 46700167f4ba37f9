use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{decode, Packet};
use crate::encode::encode_request;
use crate::error::{DecodeError, EncodeError};
use crate::types::Request;
use crate::utils::{ReadError, Reader};

/// SSMP client codec
#[derive(Debug, Clone, Default)]
pub struct Codec;

impl Codec {
    pub fn new() -> Self {
        Codec
    }
}

impl Decoder for Codec {
    type Item = Packet;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, DecodeError> {
        if src.is_empty() {
            return Ok(None);
        }
        let mut reader = Reader::new(src.as_ref());
        match decode::decode_packet(&mut reader) {
            Ok(packet) => {
                let consumed = reader.position();
                src.advance(consumed);
                Ok(Some(packet))
            }
            Err(ReadError::Incomplete) => Ok(None),
            Err(ReadError::Invalid(e)) => Err(e),
        }
    }
}

impl Encoder<Request> for Codec {
    type Error = EncodeError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), EncodeError> {
        encode_request(&item, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;
    use crate::server;
    use crate::types::{Event, EventVerb, Payload, Response, SubscriptionFlag};

    fn id(s: &'static str) -> Identifier {
        Identifier::from_static(s)
    }

    fn decode_one(input: &[u8]) -> Packet {
        let mut buf = BytesMut::from(input);
        let p = Codec.decode(&mut buf).unwrap().expect("complete frame");
        assert!(buf.is_empty());
        p
    }

    #[test]
    fn test_responses() {
        assert_eq!(decode_one(b"200\n"), Packet::Response(Response::ok()));
        assert_eq!(
            decode_one(b"401 bad password\n"),
            Packet::Response(Response::with_payload(401, Payload::text("bad password").unwrap()))
        );
        let mut buf = BytesMut::from(&b"20"[..]);
        assert!(Codec.decode(&mut buf).unwrap().is_none());
        let mut buf = BytesMut::from(&b"2O0\n"[..]);
        assert!(matches!(Codec.decode(&mut buf), Err(DecodeError::InvalidCode)));
    }

    #[test]
    fn test_events() {
        assert_eq!(decode_one(b"000 . PING\n"), Packet::Event(Event::ping()));
        assert_eq!(
            decode_one(b"000 bob MCAST room1 hello\n"),
            Packet::Event(Event::new(
                id("bob"),
                EventVerb::Mcast,
                Some(id("room1")),
                Some(Payload::text("hello").unwrap())
            ))
        );
        assert_eq!(
            decode_one(b"000 carol SUBSCRIBE room1\n"),
            Packet::Event(Event::new(id("carol"), EventVerb::Subscribe, Some(id("room1")), None))
        );
        assert_eq!(
            decode_one(b"000 carol SUBSCRIBE room1 PRESENCE\n"),
            Packet::Event(Event::new(
                id("carol"),
                EventVerb::Subscribe,
                Some(id("room1")),
                SubscriptionFlag::Presence.payload()
            ))
        );
        assert_eq!(
            decode_one(b"000 bob SHOUT loud noises\n"),
            Packet::Unknown { from: id("bob"), verb: "SHOUT".into() }
        );
        let mut buf = BytesMut::from(&b"000 bob UCAST alice\n"[..]);
        assert!(matches!(Codec.decode(&mut buf), Err(DecodeError::MalformedFrame)));
    }

    #[test]
    fn test_interleaved_stream_in_chunks() {
        let wire = b"200\n000 bob UCAST alice \x00\x02\n\n\n\n404\n000 . PONG\n";
        let mut buf = BytesMut::new();
        let mut packets = Vec::new();
        for chunk in wire.chunks(3) {
            buf.extend_from_slice(chunk);
            while let Some(p) = Codec.decode(&mut buf).unwrap() {
                packets.push(p);
            }
        }
        assert!(buf.is_empty());
        assert_eq!(packets.len(), 4);
        assert_eq!(packets[0], Packet::Response(Response::ok()));
        let Packet::Event(ev) = &packets[1] else { panic!("{:?}", packets[1]) };
        assert_eq!(ev.payload.as_ref().unwrap().as_bytes(), b"\n\n\n");
        assert_eq!(packets[2], Packet::Response(Response::new(Response::NOT_FOUND)));
        assert_eq!(packets[3], Packet::Event(Event::pong()));
    }

    #[test]
    fn test_server_events_decode_on_client() {
        let mut server = server::Codec::new();
        let mut buf = BytesMut::new();
        for len in [1usize, 1024] {
            for payload in [Payload::text("y".repeat(len)).unwrap(), Payload::binary(vec![0u8; len]).unwrap()] {
                let ev = Event::new(id("bob"), EventVerb::Bcast, None, Some(payload));
                server.encode(ev.clone().into(), &mut buf).unwrap();
                assert_eq!(Codec.decode(&mut buf).unwrap(), Some(Packet::Event(ev)));
            }
        }
        assert!(buf.is_empty());
    }
}
