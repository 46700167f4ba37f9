use bytes::{BufMut, BytesMut};

use crate::error::EncodeError;
use crate::identifier::Identifier;
use crate::types::{Event, Fields, Payload, Request, Response};
use crate::utils::{write_code, write_identifier, write_payload};

/// `VERB [<to>] [<payload>]\n`
pub(crate) fn encode_request(req: &Request, dst: &mut BytesMut) -> Result<(), EncodeError> {
    check_fields(req.verb.fields(), req.to.as_ref(), req.payload.as_ref())?;
    dst.put_slice(req.verb.as_bytes());
    write_fields(req.to.as_ref(), req.payload.as_ref(), dst);
    dst.put_u8(b'\n');
    Ok(())
}

/// `CCC [<payload>]\n`
pub(crate) fn encode_response(resp: &Response, dst: &mut BytesMut) -> Result<(), EncodeError> {
    write_code(resp.code, dst)?;
    if let Some(payload) = resp.payload.as_ref() {
        write_payload(payload, dst);
    }
    dst.put_u8(b'\n');
    Ok(())
}

/// `000 <from> VERB [<to>] [<payload>]\n`
pub(crate) fn encode_event(ev: &Event, dst: &mut BytesMut) -> Result<(), EncodeError> {
    check_fields(ev.verb.fields(), ev.to.as_ref(), ev.payload.as_ref())?;
    dst.put_slice(b"000");
    write_identifier(&ev.from, dst);
    dst.put_u8(b' ');
    dst.put_slice(ev.verb.as_bytes());
    write_fields(ev.to.as_ref(), ev.payload.as_ref(), dst);
    dst.put_u8(b'\n');
    Ok(())
}

#[inline]
fn write_fields(to: Option<&Identifier>, payload: Option<&Payload>, dst: &mut BytesMut) {
    if let Some(to) = to {
        write_identifier(to, dst);
    }
    if let Some(payload) = payload {
        write_payload(payload, dst);
    }
}

pub(crate) fn check_fields(fields: Fields, to: Option<&Identifier>, payload: Option<&Payload>) -> Result<(), EncodeError> {
    match (fields.contains(Fields::TARGET), to.is_some()) {
        (true, false) => return Err(EncodeError::MissingField),
        (false, true) => return Err(EncodeError::UnexpectedField),
        _ => {}
    }
    match (fields.contains(Fields::PAYLOAD), payload.is_some()) {
        (true, false) if !fields.contains(Fields::OPTIONAL) => Err(EncodeError::MissingField),
        (false, true) => Err(EncodeError::UnexpectedField),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::types::{EventVerb, RequestVerb, SubscriptionFlag};

    fn id(s: &'static str) -> Identifier {
        Identifier::from_static(s)
    }

    #[test]
    fn test_encode_request() {
        let mut buf = BytesMut::new();
        encode_request(&Request::subscribe(id("room1"), SubscriptionFlag::None), &mut buf).unwrap();
        encode_request(&Request::subscribe(id("room1"), SubscriptionFlag::Presence), &mut buf).unwrap();
        encode_request(&Request::mcast(id("room1"), Payload::text("hello").unwrap()), &mut buf).unwrap();
        encode_request(&Request::close(), &mut buf).unwrap();
        assert_eq!(&buf[..], &b"SUBSCRIBE room1\nSUBSCRIBE room1 PRESENCE\nMCAST room1 hello\nCLOSE\n"[..]);
    }

    #[test]
    fn test_encode_binary_header() {
        let mut buf = BytesMut::new();
        encode_request(&Request::bcast(Payload::binary(Bytes::from_static(b"\n")).unwrap()), &mut buf).unwrap();
        assert_eq!(&buf[..], b"BCAST \x00\x00\n\n");

        let mut buf = BytesMut::new();
        let data = vec![7u8; 1024];
        encode_request(&Request::bcast(Payload::binary(data).unwrap()), &mut buf).unwrap();
        assert_eq!(&buf[..8], b"BCAST \x03\xff");
        assert_eq!(buf.len(), 6 + 2 + 1024 + 1);

        let mut buf = BytesMut::new();
        encode_request(&Request::bcast(Payload::binary(vec![1u8; 257]).unwrap()), &mut buf).unwrap();
        assert_eq!(&buf[6..8], b"\x01\x00");
    }

    #[test]
    fn test_encode_response() {
        let mut buf = BytesMut::new();
        encode_response(&Response::ok(), &mut buf).unwrap();
        encode_response(&Response::with_payload(401, Payload::text("go away").unwrap()), &mut buf).unwrap();
        encode_response(&Response::new(7), &mut buf).unwrap();
        assert_eq!(&buf[..], b"200\n401 go away\n007\n");
        assert!(matches!(encode_response(&Response::new(1000), &mut buf), Err(EncodeError::InvalidCode(1000))));
    }

    #[test]
    fn test_encode_event() {
        let mut buf = BytesMut::new();
        encode_event(&Event::ping(), &mut buf).unwrap();
        let ev =
            Event::new(id("bob"), EventVerb::Mcast, Some(id("room1")), Some(Payload::text("hello").unwrap()));
        encode_event(&ev, &mut buf).unwrap();
        encode_event(&Event::new(id("bob"), EventVerb::Unsubscribe, Some(id("room1")), None), &mut buf).unwrap();
        assert_eq!(&buf[..], &b"000 . PING\n000 bob MCAST room1 hello\n000 bob UNSUBSCRIBE room1\n"[..]);
    }

    #[test]
    fn test_field_shape_is_checked() {
        let mut buf = BytesMut::new();
        let req = Request { verb: RequestVerb::Ucast, to: Some(id("bob")), payload: None };
        assert!(matches!(encode_request(&req, &mut buf), Err(EncodeError::MissingField)));
        let req = Request { verb: RequestVerb::Ping, to: Some(id("bob")), payload: None };
        assert!(matches!(encode_request(&req, &mut buf), Err(EncodeError::UnexpectedField)));
        assert!(buf.is_empty());
    }
}
