use std::cell::Cell;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{decode, Packet, Reply};
use crate::encode::{encode_event, encode_response};
use crate::error::{DecodeError, EncodeError};
use crate::utils::{ReadError, Reader};

/// Protocol state of a server side connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// Only LOGIN is accepted.
    AwaitingLogin,
    Authenticated,
    /// Inbound bytes are discarded.
    Closed,
}

/// SSMP server codec
///
/// Decoding never consumes a partially received frame: when the buffer ends
/// inside a frame, `decode` returns `Ok(None)` and leaves the buffer untouched.
#[derive(Debug, Clone)]
pub struct Codec {
    state: Cell<State>,
}

impl Codec {
    /// Create `Codec` instance in the [`State::AwaitingLogin`] state
    pub fn new() -> Self {
        Codec { state: Cell::new(State::AwaitingLogin) }
    }

    #[inline]
    pub fn state(&self) -> State {
        self.state.get()
    }

    #[inline]
    pub fn set_state(&self, state: State) {
        self.state.set(state);
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for Codec {
    type Item = Packet;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, DecodeError> {
        let state = self.state.get();
        if state == State::Closed {
            src.clear();
            return Ok(None);
        }
        if src.is_empty() {
            return Ok(None);
        }
        let mut reader = Reader::new(src.as_ref());
        match decode::decode_packet(&mut reader, state) {
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

impl Encoder<Reply> for Codec {
    type Error = EncodeError;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> Result<(), EncodeError> {
        match item {
            Reply::Response(resp) => encode_response(&resp, dst),
            Reply::Event(ev) => encode_event(&ev, dst),
            Reply::Raw(raw) => {
                dst.put_slice(&raw);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::identifier::Identifier;
    use crate::types::{Event, EventVerb, Login, Payload, Request, RequestVerb, Response};

    fn id(s: &'static str) -> Identifier {
        Identifier::from_static(s)
    }

    fn authenticated() -> Codec {
        let codec = Codec::new();
        codec.set_state(State::Authenticated);
        codec
    }

    fn decode_all(codec: &mut Codec, input: &[u8]) -> Vec<Packet> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(p) = codec.decode(&mut buf).unwrap() {
            out.push(p);
        }
        assert!(buf.is_empty(), "left over: {buf:?}");
        out
    }

    #[test]
    fn test_login() {
        let mut codec = Codec::new();
        let packets = decode_all(&mut codec, b"LOGIN alice basic pw\n");
        assert_eq!(
            packets,
            vec![Packet::Login(Login {
                id: id("alice"),
                scheme: id("basic"),
                credential: Bytes::from_static(b"pw")
            })]
        );

        let packets = decode_all(&mut codec, b"LOGIN . anon\n");
        let Packet::Login(login) = &packets[0] else { panic!("{packets:?}") };
        assert!(login.id.is_anonymous());
        assert!(login.credential.is_empty());
    }

    #[test]
    fn test_login_credential_keeps_spaces() {
        let mut codec = Codec::new();
        let packets = decode_all(&mut codec, b"LOGIN alice basic a secret with spaces\n");
        let Packet::Login(login) = &packets[0] else { panic!("{packets:?}") };
        assert_eq!(&login.credential[..], b"a secret with spaces");
    }

    #[test]
    fn test_only_login_before_authentication() {
        let mut codec = Codec::new();
        let mut buf = BytesMut::from(&b"SUBSCRIBE room1\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::LoginRequired)));

        let mut buf = BytesMut::from(&b"LOGIN alice\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::MalformedFrame)));
    }

    #[test]
    fn test_partial_frame_is_not_consumed() {
        let mut codec = authenticated();
        let full = b"MCAST room1 hello\n";
        for n in 1..full.len() {
            let mut buf = BytesMut::from(&full[..n]);
            assert!(codec.decode(&mut buf).unwrap().is_none(), "{n}");
            assert_eq!(&buf[..], &full[..n]);
        }
    }

    #[test]
    fn test_requests() {
        let mut codec = authenticated();
        let packets = decode_all(
            &mut codec,
            b"SUBSCRIBE room1\nSUBSCRIBE room2 PRESENCE\nUNSUBSCRIBE room1\nUCAST bob hi there\nBCAST \x00\x01\n\n\nPING\nCLOSE\n",
        );
        let requests: Vec<Request> = packets
            .into_iter()
            .map(|p| match p {
                Packet::Request(r) => r,
                other => panic!("{other:?}"),
            })
            .collect();
        assert_eq!(requests.len(), 7);
        assert_eq!(requests[0].verb, RequestVerb::Subscribe);
        assert!(requests[0].payload.is_none());
        assert_eq!(requests[1].payload.as_ref().unwrap().as_bytes(), b"PRESENCE");
        assert_eq!(requests[2], Request::unsubscribe(id("room1")));
        assert_eq!(requests[3], Request::ucast(id("bob"), Payload::text("hi there").unwrap()));
        let bcast = requests[4].payload.as_ref().unwrap();
        assert!(bcast.is_binary());
        assert_eq!(bcast.as_bytes(), b"\n\n");
        assert_eq!(requests[5], Request::ping());
        assert_eq!(requests[6], Request::close());
    }

    #[test]
    fn test_missing_payload_is_malformed() {
        let mut codec = authenticated();
        for input in [&b"UCAST bob\n"[..], b"MCAST\n", b"BCAST\n", b"UCAST bob \n", b"PING now\n", b"CLOSE \n"] {
            let mut buf = BytesMut::from(input);
            assert!(codec.decode(&mut buf).is_err(), "{:?}", String::from_utf8_lossy(input));
        }
    }

    #[test]
    fn test_unknown_verb_is_skipped() {
        let mut codec = authenticated();
        let packets = decode_all(&mut codec, b"PUBLISH topic some data\nFOO\nPING\n");
        assert_eq!(packets[0], Packet::Unknown("PUBLISH".into()));
        assert_eq!(packets[1], Packet::Unknown("FOO".into()));
        assert_eq!(packets[2], Packet::Request(Request::ping()));
    }

    #[test]
    fn test_login_after_authentication_is_decoded() {
        let mut codec = authenticated();
        let packets = decode_all(&mut codec, b"LOGIN bob basic pw\n");
        assert!(matches!(packets[0], Packet::Login(_)));
    }

    #[test]
    fn test_closed_discards_input() {
        let mut codec = authenticated();
        codec.set_state(State::Closed);
        let mut buf = BytesMut::from(&b"PING\n"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_payload_boundaries_round_trip() {
        let mut codec = authenticated();
        for len in [1usize, 1024] {
            for payload in [Payload::text("x".repeat(len)).unwrap(), Payload::binary(vec![b'\n'; len]).unwrap()] {
                let req = Request::mcast(id("room1"), payload);
                let mut buf = BytesMut::new();
                crate::encode::encode_request(&req, &mut buf).unwrap();
                assert_eq!(codec.decode(&mut buf).unwrap(), Some(Packet::Request(req)));
                assert!(buf.is_empty());
            }
        }
    }

    #[test]
    fn test_encode_replies() {
        let mut codec = authenticated();
        let mut buf = BytesMut::new();
        codec.encode(Reply::Response(Response::ok()), &mut buf).unwrap();
        codec.encode(Event::new(id("bob"), EventVerb::Bcast, None, Some(Payload::text("yo").unwrap())).into(), &mut buf)
            .unwrap();
        codec.encode(Reply::Raw(Bytes::from_static(b"401 denied\n")), &mut buf).unwrap();
        assert_eq!(&buf[..], b"200\n000 bob BCAST yo\n401 denied\n");
    }
}
