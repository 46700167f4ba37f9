use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use bytestring::ByteString;

use crate::error::DecodeError;
use crate::utils::ID_CHARS;

/// Maximum length of an identifier, in bytes.
pub const MAX_ID_LENGTH: usize = 64;

/// Reserved identity of callers that logged in without a name.
pub const ANONYMOUS: &str = ".";

/// A validated SSMP identifier.
///
/// Identifiers are 1 to 64 bytes drawn from `[A-Za-z0-9.@:/\-_+=~]`. They name
/// users, topics and authentication schemes. Equality and hashing are byte-exact.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Identifier(ByteString);

impl Identifier {
    /// Validates `v` and wraps it.
    pub fn new<T: Into<Bytes>>(v: T) -> Result<Self, DecodeError> {
        let v = v.into();
        if !is_valid(&v) {
            return Err(DecodeError::InvalidIdentifier);
        }
        // the alphabet is ASCII, so the bytes are valid UTF-8
        ByteString::try_from(v).map(Identifier).map_err(|_| DecodeError::InvalidIdentifier)
    }

    /// Panics if `v` is not a valid identifier.
    pub fn from_static(v: &'static str) -> Self {
        assert!(is_valid(v.as_bytes()), "invalid identifier: {v:?}");
        Identifier(ByteString::from_static(v))
    }

    #[inline]
    pub fn anonymous() -> Self {
        Identifier(ByteString::from_static(ANONYMOUS))
    }

    #[inline]
    pub fn is_anonymous(&self) -> bool {
        self.0 == ANONYMOUS
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The caller guarantees `v` was checked against the identifier alphabet.
    #[inline]
    pub(crate) fn from_validated(v: &[u8]) -> Self {
        debug_assert!(is_valid(v));
        Identifier(ByteString::from(String::from_utf8_lossy(v).into_owned()))
    }
}

#[inline]
fn is_valid(v: &[u8]) -> bool {
    !v.is_empty() && v.len() <= MAX_ID_LENGTH && v.iter().all(|&b| ID_CHARS.contains(b))
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identifier {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Identifier::new(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl TryFrom<&str> for Identifier {
    type Error = DecodeError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl TryFrom<String> for Identifier {
    type Error = DecodeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Identifier::new(s.into_bytes())
    }
}

impl AsRef<[u8]> for Identifier {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}
