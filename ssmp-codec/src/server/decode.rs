use bytes::Bytes;
use bytestring::ByteString;

use super::{Packet, State};
use crate::error::DecodeError;
use crate::types::{Fields, Login, Request, RequestVerb};
use crate::utils::{ReadResult, Reader};

pub(super) fn decode_packet(r: &mut Reader<'_>, state: State) -> ReadResult<Packet> {
    let verb = r.read_verb()?;
    match (state, RequestVerb::from_bytes(verb)) {
        (_, Some(RequestVerb::Login)) => decode_login(r).map(Packet::Login),
        (State::AwaitingLogin, _) => Err(DecodeError::LoginRequired.into()),
        (_, Some(verb)) => decode_request(r, verb).map(Packet::Request),
        (_, None) => {
            let verb = ByteString::from(String::from_utf8_lossy(verb).into_owned());
            r.skip_unknown()?;
            Ok(Packet::Unknown(verb))
        }
    }
}

/// `LOGIN <id> <scheme> [<credential>]\n`
fn decode_login(r: &mut Reader<'_>) -> ReadResult<Login> {
    r.expect_field()?;
    let id = r.read_identifier()?;
    r.expect_field()?;
    let scheme = r.read_identifier()?;
    let credential = if r.next()? {
        let credential = r.read_payload()?.into_bytes();
        r.expect_end()?;
        credential
    } else {
        Bytes::new()
    };
    Ok(Login { id, scheme, credential })
}

fn decode_request(r: &mut Reader<'_>, verb: RequestVerb) -> ReadResult<Request> {
    let fields = verb.fields();
    let to = if fields.contains(Fields::TARGET) {
        r.expect_field()?;
        Some(r.read_identifier()?)
    } else {
        None
    };
    let payload = if fields.contains(Fields::PAYLOAD) {
        if r.at_end()? {
            ensure!(fields.contains(Fields::OPTIONAL), DecodeError::MalformedFrame);
            None
        } else {
            r.expect_field()?;
            Some(r.read_payload()?)
        }
    } else {
        None
    };
    r.expect_end()?;
    Ok(Request { verb, to, payload })
}
