use bytestring::ByteString;

use super::Packet;
use crate::error::DecodeError;
use crate::types::{Event, EventVerb, Fields, Response};
use crate::utils::{ReadResult, Reader};

pub(super) fn decode_packet(r: &mut Reader<'_>) -> ReadResult<Packet> {
    match r.read_code()? {
        0 => decode_event(r),
        code => {
            let payload = if r.next()? {
                let payload = r.read_payload()?;
                r.expect_end()?;
                Some(payload)
            } else {
                None
            };
            Ok(Packet::Response(Response { code, payload }))
        }
    }
}

/// `000 <from> VERB [<to>] [<payload>]\n`
fn decode_event(r: &mut Reader<'_>) -> ReadResult<Packet> {
    r.expect_field()?;
    let from = r.read_identifier()?;
    r.expect_field()?;
    let token = r.read_verb()?;
    let Some(verb) = EventVerb::from_bytes(token) else {
        let verb = ByteString::from(String::from_utf8_lossy(token).into_owned());
        r.skip_unknown()?;
        return Ok(Packet::Unknown { from, verb });
    };

    let fields = verb.fields();
    let to = if fields.contains(Fields::TARGET) {
        r.expect_field()?;
        Some(r.read_identifier()?)
    } else {
        None
    };
    let payload = if fields.contains(Fields::PAYLOAD) && !r.at_end()? {
        r.expect_field()?;
        Some(r.read_payload()?)
    } else {
        ensure!(!fields.contains(Fields::PAYLOAD) || fields.contains(Fields::OPTIONAL), DecodeError::MalformedFrame);
        None
    };
    r.expect_end()?;
    Ok(Packet::Event(Event { from, verb, to, payload }))
}
