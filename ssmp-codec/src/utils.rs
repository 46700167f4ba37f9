use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DecodeError, EncodeError};
use crate::identifier::{Identifier, MAX_ID_LENGTH};
use crate::types::{Payload, CODE_LENGTH, MAX_PAYLOAD_LENGTH, MAX_VERB_LENGTH};

macro_rules! ensure {
    ($cond:expr, $e:expr) => {
        if !($cond) {
            return Err($e.into());
        }
    };
}

/// Outcome of a failed read against a partially received buffer.
#[derive(Debug)]
pub(crate) enum ReadError {
    /// The frame is not complete yet, nothing may be consumed.
    Incomplete,
    Invalid(DecodeError),
}

impl From<DecodeError> for ReadError {
    fn from(e: DecodeError) -> Self {
        ReadError::Invalid(e)
    }
}

pub(crate) type ReadResult<T> = Result<T, ReadError>;

/// Lookup table over all byte values.
#[derive(Clone, Copy)]
pub(crate) struct ByteSet([bool; 256]);

impl ByteSet {
    pub(crate) const fn new(ranges: &[(u8, u8)], extra: &[u8]) -> Self {
        let mut set = [false; 256];
        let mut i = 0;
        while i < ranges.len() {
            let (lo, hi) = ranges[i];
            let mut b = lo as usize;
            while b <= hi as usize {
                set[b] = true;
                b += 1;
            }
            i += 1;
        }
        let mut j = 0;
        while j < extra.len() {
            set[extra[j] as usize] = true;
            j += 1;
        }
        ByteSet(set)
    }

    #[inline]
    pub(crate) const fn contains(&self, b: u8) -> bool {
        self.0[b as usize]
    }
}

pub(crate) const ID_CHARS: ByteSet =
    ByteSet::new(&[(b'a', b'z'), (b'A', b'Z'), (b'0', b'9')], b".@:/-_+=~");

pub(crate) const VERB_CHARS: ByteSet = ByteSet::new(&[(b'A', b'Z')], b"");

/// Bytes 0..=3 mark the start of a binary payload.
#[inline]
pub(crate) const fn is_binary_marker(b: u8) -> bool {
    b <= 3
}

#[inline]
pub(crate) fn is_text(data: &[u8]) -> bool {
    data.iter().all(|&b| b != b'\n' && !is_binary_marker(b))
}

/// Cursor over the unconsumed part of a receive buffer.
///
/// Reads never touch the underlying buffer; the caller advances it by
/// [`Reader::position`] once a whole frame has been parsed.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[inline]
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    #[inline]
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    #[inline]
    fn peek(&self) -> ReadResult<u8> {
        self.buf.get(self.pos).copied().ok_or(ReadError::Incomplete)
    }

    /// Consumes a field separator: `true` for a space, `false` for the frame terminator.
    pub(crate) fn next(&mut self) -> ReadResult<bool> {
        let b = self.peek()?;
        self.pos += 1;
        match b {
            b' ' => Ok(true),
            b'\n' => Ok(false),
            _ => Err(DecodeError::MalformedFrame.into()),
        }
    }

    #[inline]
    pub(crate) fn at_end(&self) -> ReadResult<bool> {
        Ok(self.peek()? == b'\n')
    }

    #[inline]
    pub(crate) fn expect_end(&mut self) -> ReadResult<()> {
        ensure!(!self.next()?, DecodeError::MalformedFrame);
        Ok(())
    }

    #[inline]
    pub(crate) fn expect_field(&mut self) -> ReadResult<()> {
        ensure!(self.next()?, DecodeError::MalformedFrame);
        Ok(())
    }

    /// Three ASCII digits followed by a space or a newline, which is left unconsumed.
    pub(crate) fn read_code(&mut self) -> ReadResult<u16> {
        let rest = self.remaining();
        if rest.len() < CODE_LENGTH + 1 {
            return Err(ReadError::Incomplete);
        }
        let mut code = 0u16;
        for &b in &rest[..CODE_LENGTH] {
            ensure!(b.is_ascii_digit(), DecodeError::InvalidCode);
            code = code * 10 + u16::from(b - b'0');
        }
        ensure!(matches!(rest[CODE_LENGTH], b' ' | b'\n'), DecodeError::InvalidCode);
        self.pos += CODE_LENGTH;
        Ok(code)
    }

    fn read_token(&mut self, set: &ByteSet, max: usize, err: DecodeError) -> ReadResult<&'a [u8]> {
        let rest = self.remaining();
        for (i, &b) in rest.iter().enumerate() {
            if b == b' ' || b == b'\n' {
                ensure!(i > 0, err);
                self.pos += i;
                return Ok(&rest[..i]);
            }
            ensure!(i < max && set.contains(b), err);
        }
        Err(ReadError::Incomplete)
    }

    #[inline]
    pub(crate) fn read_identifier(&mut self) -> ReadResult<Identifier> {
        let token = self.read_token(&ID_CHARS, MAX_ID_LENGTH, DecodeError::InvalidIdentifier)?;
        Ok(Identifier::from_validated(token))
    }

    #[inline]
    pub(crate) fn read_verb(&mut self) -> ReadResult<&'a [u8]> {
        self.read_token(&VERB_CHARS, MAX_VERB_LENGTH, DecodeError::InvalidVerb)
    }

    /// Reads a text or binary payload, leaving the frame terminator unconsumed.
    pub(crate) fn read_payload(&mut self) -> ReadResult<Payload> {
        let rest = self.remaining();
        let first = *rest.first().ok_or(ReadError::Incomplete)?;
        if is_binary_marker(first) {
            if rest.len() < 2 {
                return Err(ReadError::Incomplete);
            }
            let len = 1 + ((usize::from(first) << 8) | usize::from(rest[1]));
            if rest.len() < 2 + len + 1 {
                return Err(ReadError::Incomplete);
            }
            ensure!(rest[2 + len] == b'\n', DecodeError::InvalidPayload);
            let data = Bytes::copy_from_slice(&rest[2..2 + len]);
            self.pos += 2 + len;
            Ok(Payload::from_validated(data, true))
        } else {
            match rest.iter().position(|&b| b == b'\n') {
                Some(n) => {
                    ensure!(n > 0, DecodeError::InvalidPayload);
                    ensure!(n <= MAX_PAYLOAD_LENGTH, DecodeError::MaxSizeExceeded);
                    let data = &rest[..n];
                    ensure!(is_text(data), DecodeError::InvalidPayload);
                    self.pos += n;
                    Ok(Payload::from_validated(Bytes::copy_from_slice(data), false))
                }
                None => {
                    ensure!(rest.len() <= MAX_PAYLOAD_LENGTH, DecodeError::MaxSizeExceeded);
                    Err(ReadError::Incomplete)
                }
            }
        }
    }

    /// Skips the fields of a verb this side does not know, so the stream stays in sync.
    pub(crate) fn skip_unknown(&mut self) -> ReadResult<()> {
        if !self.next()? {
            return Ok(());
        }
        let start = self.pos;
        match self.read_identifier() {
            Ok(_) => {
                if !self.next()? {
                    return Ok(());
                }
            }
            Err(ReadError::Incomplete) => return Err(ReadError::Incomplete),
            Err(ReadError::Invalid(_)) => self.pos = start,
        }
        self.read_payload()?;
        self.expect_end()
    }
}

#[inline]
pub(crate) fn write_code(code: u16, dst: &mut BytesMut) -> Result<(), EncodeError> {
    ensure!(code <= 999, EncodeError::InvalidCode(code));
    dst.put_u8(b'0' + (code / 100) as u8);
    dst.put_u8(b'0' + (code / 10 % 10) as u8);
    dst.put_u8(b'0' + (code % 10) as u8);
    Ok(())
}

/// Writes a space followed by the payload, prefixed by the 10-bit `len - 1`
/// header when binary.
#[inline]
pub(crate) fn write_payload(payload: &Payload, dst: &mut BytesMut) {
    let data = payload.as_bytes();
    dst.reserve(data.len() + 3);
    dst.put_u8(b' ');
    if payload.is_binary() {
        let sz = data.len() - 1;
        dst.put_u8((sz >> 8) as u8);
        dst.put_u8((sz & 0xff) as u8);
    }
    dst.put_slice(data);
}

#[inline]
pub(crate) fn write_identifier(id: &Identifier, dst: &mut BytesMut) {
    dst.put_u8(b' ');
    dst.put_slice(id.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incomplete<T: std::fmt::Debug>(r: ReadResult<T>) -> bool {
        matches!(r, Err(ReadError::Incomplete))
    }

    #[test]
    fn test_read_code() {
        assert_eq!(Reader::new(b"200\n").read_code().unwrap(), 200);
        assert_eq!(Reader::new(b"000 a").read_code().unwrap(), 0);
        assert!(incomplete(Reader::new(b"404").read_code()));
        assert!(matches!(
            Reader::new(b"2x0\n").read_code(),
            Err(ReadError::Invalid(DecodeError::InvalidCode))
        ));
        assert!(matches!(
            Reader::new(b"2000\n").read_code(),
            Err(ReadError::Invalid(DecodeError::InvalidCode))
        ));
    }

    #[test]
    fn test_read_identifier() {
        let mut r = Reader::new(b"user@host:1/x-y_z+a=b~c.d MORE");
        let id = r.read_identifier().unwrap();
        assert_eq!(id.as_bytes(), b"user@host:1/x-y_z+a=b~c.d");
        assert!(r.next().unwrap());

        assert!(incomplete(Reader::new(b"alice").read_identifier()));
        assert!(matches!(
            Reader::new(b"al!ce ").read_identifier(),
            Err(ReadError::Invalid(DecodeError::InvalidIdentifier))
        ));
        assert!(matches!(
            Reader::new(b" alice").read_identifier(),
            Err(ReadError::Invalid(DecodeError::InvalidIdentifier))
        ));

        let mut max = vec![b'a'; MAX_ID_LENGTH];
        assert!(incomplete(Reader::new(&max).read_identifier()));
        max.push(b'\n');
        assert_eq!(Reader::new(&max).read_identifier().unwrap().as_bytes().len(), MAX_ID_LENGTH);
        max.insert(0, b'a');
        assert!(matches!(
            Reader::new(&max).read_identifier(),
            Err(ReadError::Invalid(DecodeError::InvalidIdentifier))
        ));
    }

    #[test]
    fn test_read_verb() {
        assert_eq!(Reader::new(b"MCAST ").read_verb().unwrap(), b"MCAST");
        assert!(Reader::new(b"mcast ").read_verb().is_err());
        assert!(Reader::new(b"ABCDEFGHIJKLMNOPQ ").read_verb().is_err());
        assert_eq!(Reader::new(b"ABCDEFGHIJKLMNOP\n").read_verb().unwrap().len(), MAX_VERB_LENGTH);
    }

    #[test]
    fn test_read_text_payload() {
        let mut r = Reader::new(b"hello world\n");
        let p = r.read_payload().unwrap();
        assert!(!p.is_binary());
        assert_eq!(p.as_bytes(), b"hello world");
        assert!(r.at_end().unwrap());

        assert!(incomplete(Reader::new(b"hello").read_payload()));
        assert!(Reader::new(b"\n").read_payload().is_err());

        let mut long = vec![b'x'; MAX_PAYLOAD_LENGTH + 1];
        assert!(matches!(
            Reader::new(&long).read_payload(),
            Err(ReadError::Invalid(DecodeError::MaxSizeExceeded))
        ));
        long.truncate(MAX_PAYLOAD_LENGTH);
        assert!(incomplete(Reader::new(&long).read_payload()));
        long.push(b'\n');
        assert_eq!(Reader::new(&long).read_payload().unwrap().len(), MAX_PAYLOAD_LENGTH);
    }

    #[test]
    fn test_read_binary_payload() {
        let mut r = Reader::new(b"\x00\x02a\nb\n");
        let p = r.read_payload().unwrap();
        assert!(p.is_binary());
        assert_eq!(p.as_bytes(), b"a\nb");
        assert!(r.at_end().unwrap());

        assert!(incomplete(Reader::new(b"\x00").read_payload()));
        assert!(incomplete(Reader::new(b"\x00\x02a\nb").read_payload()));
        assert!(matches!(
            Reader::new(b"\x00\x00ab").read_payload(),
            Err(ReadError::Invalid(DecodeError::InvalidPayload))
        ));

        let mut max = vec![0x03, 0xff];
        max.extend(std::iter::repeat(0u8).take(MAX_PAYLOAD_LENGTH));
        assert!(incomplete(Reader::new(&max).read_payload()));
        max.push(b'\n');
        let p = Reader::new(&max).read_payload().unwrap();
        assert_eq!(p.len(), MAX_PAYLOAD_LENGTH);
    }

    #[test]
    fn test_skip_unknown() {
        let mut r = Reader::new(b" target some payload\nPING\n");
        r.skip_unknown().unwrap();
        assert_eq!(r.read_verb().unwrap(), b"PING");

        let mut r = Reader::new(b" \x00\x01\n\n\n");
        r.skip_unknown().unwrap();
        assert_eq!(r.position(), 6);

        let mut r = Reader::new(b"\n");
        r.skip_unknown().unwrap();
        assert_eq!(r.position(), 1);

        assert!(incomplete(Reader::new(b" target").skip_unknown()));
    }

    #[test]
    fn test_write_code() {
        let mut buf = BytesMut::new();
        write_code(7, &mut buf).unwrap();
        write_code(409, &mut buf).unwrap();
        assert_eq!(&buf[..], b"007409");
        assert!(matches!(write_code(1000, &mut buf), Err(EncodeError::InvalidCode(1000))));
    }
}
