use std::io;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid response code")]
    InvalidCode,
    #[error("Invalid identifier")]
    InvalidIdentifier,
    #[error("Invalid verb")]
    InvalidVerb,
    #[error("Invalid payload")]
    InvalidPayload,
    #[error("Max size exceeded")]
    MaxSizeExceeded,
    #[error("Malformed frame")]
    MalformedFrame,
    /// Anything but LOGIN received before the connection is authenticated.
    #[error("Login required")]
    LoginRequired,
    #[error("io error, {:?}", _0)]
    Io(io::Error),
}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> DecodeError {
        DecodeError::Io(e)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Response code out of range: {0}")]
    InvalidCode(u16),
    /// Text payload carrying a newline or a binary marker byte.
    #[error("Invalid text payload")]
    InvalidPayload,
    #[error("Empty payload")]
    EmptyPayload,
    #[error("Max size exceeded")]
    MaxSizeExceeded,
    #[error("Missing field")]
    MissingField,
    #[error("Unexpected field")]
    UnexpectedField,
    #[error("io error, {:?}", _0)]
    Io(io::Error),
}

impl From<io::Error> for EncodeError {
    fn from(e: io::Error) -> EncodeError {
        EncodeError::Io(e)
    }
}

impl EncodeError {
    /// True when the value was refused before reaching the wire because it
    /// would produce a malformed frame.
    #[inline]
    pub fn is_malformed(&self) -> bool {
        !matches!(self, EncodeError::Io(_))
    }
}
